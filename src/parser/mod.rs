pub mod analyzer;
pub mod attribution;
pub mod bitstream;
pub mod decode;
pub mod entity;
pub mod events;
pub mod game;
pub mod gameevent;
pub mod props;
pub mod weapon;

#[cfg(test)]
pub(crate) mod testutil;

use crate::schema::ClassTable;
use crate::{ParseError, Result};
use analyzer::MatchAnalyzer;
use bitbuffer::{BitReadBuffer, BitReadStream, LittleEndian};
use entity::{EntityTable, RawPlayer};
use events::{EventHandler, EventLog};
use fnv::FnvHashMap;
use game::TickInfo;
use gameevent::{GameEventDescriptor, RawGameEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, error_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Seconds per tick.
    pub tick_time: f32,
    /// Match players whose health loss equals someone's inflicted damage
    /// before the other attribution rules run.
    pub relax_verify_damage: bool,
    /// Seconds a decoy may show its flags before its start is assumed.
    pub decoy_start_threshold: f32,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            tick_time: 1.0 / 64.0,
            relax_verify_damage: false,
            decoy_start_threshold: 2.0,
        }
    }
}

/// One container message, already split out of the demo file.
#[derive(Debug, Clone)]
pub enum Chunk {
    /// Replaces the class table. Live entities are torn down and every
    /// instance baseline is dropped.
    ClassTable(ClassTable),
    InstanceBaseline { class_id: u32, data: Vec<u8> },
    ModelPrecache { index: i32, name: String },
    /// A userinfo table entry, `None` when the slot was cleared.
    PlayerInfo { slot: usize, info: Option<RawPlayer> },
    GameEventList(Vec<GameEventDescriptor>),
    GameEvent(RawGameEvent),
    PacketEntities { updated_entries: u32, data: Vec<u8> },
    Stop,
}

/// Everything the container holds for one tick, in container order.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub ingame_tick: i32,
    pub chunks: Vec<Chunk>,
}

/// Yields the frames of a demo.
pub trait DemoSource {
    /// `Ok(None)` and [`ParseError::EndOfData`] both end the demo when they
    /// arrive between frames.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

impl<I: Iterator<Item = Frame>> DemoSource for I {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.next())
    }
}

pub struct DemoParser<S: DemoSource, H: EventHandler = EventLog> {
    source: S,
    handler: H,
    analyzer: MatchAnalyzer,
    classes: ClassTable,
    entities: EntityTable,
    descriptors: FnvHashMap<i32, GameEventDescriptor>,
    current_tick: u32,
    finished: bool,
}

impl<S: DemoSource> DemoParser<S, EventLog> {
    pub fn new(source: S, config: ParserConfig) -> Self {
        Self::new_with_handler(source, config, EventLog::default())
    }
}

impl<S: DemoSource, H: EventHandler> DemoParser<S, H> {
    pub fn new_with_handler(source: S, config: ParserConfig, handler: H) -> Self {
        DemoParser {
            source,
            handler,
            analyzer: MatchAnalyzer::new(config),
            classes: ClassTable::default(),
            entities: EntityTable::new(),
            descriptors: FnvHashMap::default(),
            current_tick: 0,
            finished: false,
        }
    }

    pub fn analyzer(&self) -> &MatchAnalyzer {
        &self.analyzer
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Decode, apply and reconcile one frame. Returns `false` once the demo
    /// is over.
    ///
    /// Events of a tick reach the handler only when the whole tick succeeded.
    pub fn parse_next_tick(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) | Err(ParseError::EndOfData) => {
                debug!("Demo ended after {} ticks", self.current_tick);
                self.finished = true;
                return Ok(false);
            }
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        self.current_tick += 1;
        let tick = TickInfo {
            current_tick: self.current_tick,
            ingame_tick: frame.ingame_tick,
            current_time: self.current_tick as f32 * self.analyzer.config.tick_time,
        };
        let span = error_span!("tick", tick = tick.current_tick, ingame_tick = tick.ingame_tick);
        let _enter = span.enter();

        self.analyzer.begin_tick(tick);
        match self.apply_frame(frame) {
            Ok(stopped) => {
                for event in self.analyzer.take_events() {
                    self.handler.handle_event(&tick, event);
                }
                if stopped {
                    self.finished = true;
                }
                Ok(!stopped)
            }
            Err(e) => {
                self.analyzer.discard_tick();
                self.finished = true;
                Err(e)
            }
        }
    }

    /// Returns whether the frame held the stop marker.
    fn apply_frame(&mut self, frame: Frame) -> Result<bool> {
        for chunk in frame.chunks {
            match chunk {
                Chunk::ClassTable(classes) => {
                    // ids of the old table mean nothing under the new classes
                    self.entities.clear(&self.classes, &mut self.analyzer);
                    self.classes = classes;
                    self.analyzer.class_table_changed(&self.classes);
                }
                Chunk::InstanceBaseline { class_id, data } => {
                    self.classes.set_baseline(class_id, data);
                    self.entities.invalidate_baseline(class_id);
                }
                Chunk::ModelPrecache { index, name } => self.analyzer.model_precached(index, name),
                Chunk::PlayerInfo { slot, info } => self.analyzer.player_info(slot, info),
                Chunk::GameEventList(descriptors) => {
                    self.descriptors = descriptors.into_iter().map(|d| (d.event_id, d)).collect();
                }
                Chunk::GameEvent(event) => match self.descriptors.get(&event.event_id) {
                    Some(descriptor) => self.analyzer.handle_game_event(descriptor, &event)?,
                    None => warn!("Game event {} has no descriptor", event.event_id),
                },
                Chunk::PacketEntities {
                    updated_entries,
                    data,
                } => {
                    let mut stream = BitReadStream::new(BitReadBuffer::new(&data, LittleEndian));
                    self.entities.read_packet_entities(
                        &self.classes,
                        updated_entries,
                        &mut stream,
                        &mut self.analyzer,
                    )?;
                }
                Chunk::Stop => return Ok(true),
            }
        }

        self.analyzer.end_tick(&self.entities, &self.classes)?;
        Ok(false)
    }

    pub fn parse(mut self) -> Result<H::Output> {
        while self.parse_next_tick()? {}
        Ok(self.handler.into_output())
    }
}

/// Replay a whole demo into an [`EventLog`].
pub fn parse<S: DemoSource>(source: S, config: ParserConfig) -> Result<EventLog> {
    DemoParser::new(source, config).parse()
}
