use crate::parser::analyzer::{MatchAnalyzer, PendingAction};
use crate::parser::entity::{EntityBinder, Listener, PositionedBase, PropertyUpdate, UpdateSource};
use crate::parser::events::{BombDefuseEvent, BombEvent, Event};
use crate::parser::game::{EntityId, Vector};
use crate::parser::props::*;
use serde::Serialize;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum BombState {
    #[default]
    Held,
    Planting,
    Planted,
    Defusing,
    Defused,
    Exploded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BombSignal {
    ArmBegin,
    ArmAbort,
    ArmSuccess,
    DefuseBegin,
    DefuseAbort,
    DefuseSuccess,
    Explode,
}

impl BombState {
    /// The only legal transitions. Anything else leaves the state alone.
    pub fn next(self, signal: BombSignal) -> Option<BombState> {
        use BombSignal::*;
        use BombState::*;

        match (self, signal) {
            (Held, ArmBegin) => Some(Planting),
            (Planting, ArmAbort) => Some(Held),
            (Planting, ArmSuccess) => Some(Planted),
            (Planted, DefuseBegin) => Some(Defusing),
            (Defusing, DefuseAbort) => Some(Planted),
            (Defusing, DefuseSuccess) => Some(Defused),
            (Planted, Explode) => Some(Exploded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BombProp {
    StartedArming,
    Ticking,
    Defused,
}

/// Either the carried C4 or the planted one, they share the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct BombEntity {
    pub id: EntityId,
    pub base: PositionedBase,
    pub state: BombState,
    pub defuser: Option<EntityId>,
    pub explode_tick: Option<i32>,
    init_tick: u32,
    ever_ticking: bool,
    spurious: bool,
    pub(crate) destroyed: bool,
}

impl BombEntity {
    pub fn carried(id: EntityId) -> Self {
        BombEntity {
            id,
            base: PositionedBase::default(),
            state: BombState::Held,
            defuser: None,
            explode_tick: None,
            init_tick: 0,
            ever_ticking: false,
            spurious: false,
            destroyed: false,
        }
    }

    /// A planted bomb only exists once arming started, so it starts out
    /// planting and is armed when its entity finishes initializing.
    pub fn planted(id: EntityId, init_tick: u32) -> Self {
        BombEntity {
            state: BombState::Planting,
            init_tick,
            ..BombEntity::carried(id)
        }
    }

    pub fn signal(&mut self, signal: BombSignal) -> bool {
        match self.state.next(signal) {
            Some(state) => {
                trace!("Bomb {}: {:?} -> {state:?}", self.id, self.state);
                self.state = state;
                true
            }
            None => {
                debug!("Ignoring {signal:?} for bomb {} in {:?}", self.id, self.state);
                false
            }
        }
    }

    pub fn is_defused(&self) -> bool {
        self.state == BombState::Defused
    }

    /// Set for the planted entity some demos contain on their first tick
    /// that never existed in game.
    pub fn is_spurious(&self) -> bool {
        self.spurious
    }

    pub fn site(&self, cell_width: i32, site_a: Vector, site_b: Vector) -> char {
        let position = self.base.position(cell_width);
        if position.distance(&site_a) < position.distance(&site_b) {
            'A'
        } else {
            'B'
        }
    }
}

impl MatchAnalyzer {
    pub(crate) fn bind_carried_bomb(&mut self, binder: &mut EntityBinder<'_>) {
        PositionedBase::bind(binder);
        binder.bind(STARTED_ARMING, Listener::Bomb(BombProp::StartedArming));
        self.carried_bombs
            .insert(binder.id(), BombEntity::carried(binder.id()));
    }

    pub(crate) fn bind_planted_bomb(&mut self, binder: &mut EntityBinder<'_>) {
        PositionedBase::bind(binder);
        binder.bind(BOMB_TICKING, Listener::Bomb(BombProp::Ticking));
        binder.bind(BOMB_DEFUSED, Listener::Bomb(BombProp::Defused));
        self.planted_bomb = Some(BombEntity::planted(binder.id(), self.tick.current_tick));
    }

    pub(crate) fn bomb_event(&self, bomb: &BombEntity, player: Option<EntityId>) -> BombEvent {
        BombEvent {
            player: player.and_then(|id| self.player_ref(id)),
            site: bomb.site(self.cell_width, self.bombsite_a, self.bombsite_b),
        }
    }

    pub(crate) fn handle_bomb_prop(
        &mut self,
        id: EntityId,
        prop: BombProp,
        update: PropertyUpdate<'_>,
    ) {
        let Some(value) = update.value.as_int() else {
            return;
        };

        match prop {
            BombProp::StartedArming => self.handle_arming(id, value == 1),
            BombProp::Ticking => {
                let current_tick = self.tick.current_tick;
                let Some(bomb) = self.planted_bomb.as_mut().filter(|b| b.id == id) else {
                    return;
                };
                if value == 1 {
                    bomb.ever_ticking = true;
                    return;
                }
                if update.source == UpdateSource::Baseline || bomb.spurious {
                    return;
                }

                if current_tick == bomb.init_tick && !bomb.ever_ticking {
                    debug!("Discarding planted bomb {id} that never ticked");
                    bomb.spurious = true;
                    return;
                }
                // defused is networked after ticking, settle once the tick is done
                self.actions.push_back(PendingAction::ResolveExplosion);
            }
            BombProp::Defused => {
                if value != 1 {
                    return;
                }
                let Some(bomb) = self.planted_bomb.as_mut().filter(|b| b.id == id) else {
                    return;
                };
                if bomb.spurious || !bomb.signal(BombSignal::DefuseSuccess) {
                    return;
                }
                let defuser = bomb.defuser;
                let bomb = bomb.clone();
                let event = self.bomb_event(&bomb, defuser);
                self.emit(Event::BombDefused(event));
            }
        }
    }

    fn handle_arming(&mut self, id: EntityId, arming: bool) {
        let Some(bomb) = self.carried_bombs.get_mut(&id) else {
            return;
        };

        if arming {
            if bomb.signal(BombSignal::ArmBegin) {
                let bomb = bomb.clone();
                let event = self.bomb_event(&bomb, bomb.base.owner);
                self.emit(Event::BombBeginPlant(event));
            }
        } else if bomb.state == BombState::Planting {
            // arming also stops when the plant succeeds, which only the
            // planted entity showing up later this tick can tell
            self.actions.push_back(PendingAction::ResolvePlantAbort(id));
        }
    }

    pub(crate) fn planted_bomb_initialized(&mut self) {
        let Some(bomb) = self.planted_bomb.as_mut() else {
            return;
        };
        // baseline values count too, a bomb created without ticking never armed
        if !bomb.ever_ticking && !bomb.spurious {
            debug!("Discarding planted bomb {} that never ticked", bomb.id);
            bomb.spurious = true;
        }
        if bomb.spurious || !bomb.signal(BombSignal::ArmSuccess) {
            return;
        }

        for carried in self.carried_bombs.values_mut() {
            if carried.state == BombState::Planting {
                carried.state = BombState::Held;
            }
        }

        let bomb = bomb.clone();
        let event = self.bomb_event(&bomb, bomb.base.owner);
        self.emit(Event::BombPlanted(event));
    }

    pub(crate) fn resolve_plant_abort(&mut self, id: EntityId) {
        let Some(bomb) = self.carried_bombs.get_mut(&id) else {
            return;
        };
        if bomb.state != BombState::Planting || !bomb.signal(BombSignal::ArmAbort) {
            return;
        }
        let bomb = bomb.clone();
        let event = self.bomb_event(&bomb, bomb.base.owner);
        self.emit(Event::BombAbortPlant(event));
    }

    pub(crate) fn resolve_explosion(&mut self) {
        let ingame_tick = self.tick.ingame_tick;
        let Some(bomb) = self.planted_bomb.as_mut() else {
            return;
        };
        if bomb.spurious || bomb.is_defused() {
            return;
        }
        // the timer beats an unfinished defuse
        let interrupted = if bomb.state == BombState::Defusing && bomb.signal(BombSignal::DefuseAbort) {
            bomb.defuser.take()
        } else {
            None
        };
        if !bomb.signal(BombSignal::Explode) {
            return;
        }
        bomb.explode_tick = Some(ingame_tick);
        let bomb = bomb.clone();

        if let Some(defuser) = interrupted {
            let has_kit = match self.player_mut(defuser) {
                Some(player) => {
                    player.is_defusing = false;
                    player.has_defuse_kit
                }
                None => false,
            };
            let event = BombDefuseEvent {
                player: self.player_ref(defuser),
                has_kit,
            };
            self.emit(Event::BombAbortDefuse(event));
        }

        let event = self.bomb_event(&bomb, bomb.base.owner);
        self.emit(Event::BombExploded(event));
    }

    /// Owner of the bomb when it went off during the current tick.
    pub(crate) fn exploded_this_tick(&self) -> Option<Option<EntityId>> {
        self.planted_bomb
            .as_ref()
            .filter(|b| b.explode_tick == Some(self.tick.ingame_tick))
            .map(|b| b.base.owner)
    }
}
