use crate::parser::bitstream::BitSource;
use crate::parser::decode::{read_delta, PropertyValue};
use crate::parser::props::{CELL_X, CELL_Y, CELL_Z, ORIGIN, OWNER};
use crate::parser::game::{EntityId, Vector, ENTITY_SERIAL_BITS, MAX_COORD_INTEGER, MAX_ENTITIES};
use crate::schema::{ClassTable, SendPropType, ServerClass};
use crate::{ParseError, Result};
use bitbuffer::{BitReadBuffer, BitReadStream, LittleEndian};
use fnv::FnvHashMap;
use tracing::{debug, trace, warn};

pub mod bomb;
pub use bomb::*;

pub mod detonate;
pub use detonate::*;

pub mod player;
pub use player::*;

pub mod rules;
pub use rules::*;

pub mod weapon;
pub use weapon::*;

/// Identifies which domain handler a property slot feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    Player(PlayerProp),
    Resource(ResourceProp),
    Team(TeamProp),
    Rules(RulesProp),
    CellBits,
    Weapon(WeaponProp),
    Grenade(GrenadeProp),
    Base(BaseProp),
    Bomb(BombProp),
    Detonate(DetonateProp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    /// Replayed from the cached instance baseline of the class.
    Baseline,
    Live,
}

#[derive(Debug, Clone, Copy)]
pub struct PropertyUpdate<'a> {
    pub index: usize,
    pub value: &'a PropertyValue,
    pub source: UpdateSource,
}

/// Receives everything the entity table does.
///
/// Per created entity the calls arrive as `entity_created` (bind listeners
/// here), then the baseline values, then the first live delta, then
/// `entity_initialized`.
pub trait EntityObserver {
    fn entity_created(&mut self, binder: &mut EntityBinder<'_>) -> Result<()>;

    fn property_changed(
        &mut self,
        entity: EntityId,
        listener: Listener,
        update: PropertyUpdate<'_>,
    ) -> Result<()>;

    fn entity_initialized(&mut self, entity: EntityId, class: &ServerClass);

    fn entity_removed(&mut self, entity: EntityId, class: &ServerClass);
}

#[derive(Debug, Clone)]
pub struct PropertySlot {
    pub kind: SendPropType,
    listeners: Vec<Listener>,
}

impl PropertySlot {
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }
}

#[derive(Debug)]
pub struct Entity {
    pub id: EntityId,
    pub class_id: u32,
    slots: Vec<PropertySlot>,
}

impl Entity {
    fn new(id: EntityId, class: &ServerClass) -> Self {
        Entity {
            id,
            class_id: class.id,
            slots: class
                .props
                .iter()
                .map(|p| PropertySlot {
                    kind: p.prop.kind,
                    listeners: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn slots(&self) -> &[PropertySlot] {
        &self.slots
    }

    fn dispatch<O: EntityObserver>(
        &self,
        index: usize,
        value: &PropertyValue,
        source: UpdateSource,
        observer: &mut O,
    ) -> Result<()> {
        for listener in &self.slots[index].listeners {
            observer.property_changed(
                self.id,
                *listener,
                PropertyUpdate {
                    index,
                    value,
                    source,
                },
            )?;
        }
        Ok(())
    }

    fn apply_update<O: EntityObserver>(
        &self,
        class: &ServerClass,
        stream: &mut impl BitSource,
        observer: &mut O,
    ) -> Result<()> {
        read_delta(stream, class, |index, value| {
            self.dispatch(index, &value, UpdateSource::Live, observer)
        })
    }
}

/// Handed to observers while an entity is being created. Listeners can only
/// be attached through this, before any value reaches the entity.
pub struct EntityBinder<'a> {
    entity: &'a mut Entity,
    class: &'a ServerClass,
}

impl EntityBinder<'_> {
    pub fn id(&self) -> EntityId {
        self.entity.id
    }

    pub fn class(&self) -> &ServerClass {
        self.class
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.class.find_prop(name).is_some()
    }

    pub fn bind(&mut self, name: &str, listener: Listener) -> bool {
        let Some(index) = self.class.find_prop(name) else {
            debug!("{} has no property {name}", self.class.name);
            return false;
        };
        self.entity.slots[index].listeners.push(listener);
        true
    }
}

/// All live entities, indexed by entity id.
#[derive(Debug)]
pub struct EntityTable {
    entities: Vec<Option<Entity>>,
    baselines: FnvHashMap<u32, Vec<(usize, PropertyValue)>>,
}

impl Default for EntityTable {
    fn default() -> Self {
        EntityTable {
            entities: (0..MAX_ENTITIES).map(|_| None).collect(),
            baselines: FnvHashMap::default(),
        }
    }
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id as usize).and_then(Option::as_ref)
    }

    pub fn class_name<'c>(&self, id: EntityId, classes: &'c ClassTable) -> Option<&'c str> {
        self.get(id)
            .and_then(|e| classes.get(e.class_id))
            .map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entities.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the decoded baseline of a class after its bytes changed.
    pub fn invalidate_baseline(&mut self, class_id: u32) {
        self.baselines.remove(&class_id);
    }

    pub fn read_packet_entities<O: EntityObserver>(
        &mut self,
        classes: &ClassTable,
        updated_entries: u32,
        stream: &mut impl BitSource,
        observer: &mut O,
    ) -> Result<()> {
        let mut current: i64 = -1;
        for _ in 0..updated_entries {
            current += 1 + stream.read_ubit_int()? as i64;
            if current < 0 || current as usize >= MAX_ENTITIES {
                return Err(ParseError::EntityIndexOutOfRange(current));
            }
            let id = current as EntityId;

            if !stream.read_bit()? {
                if stream.read_bit()? {
                    let class_id = stream.read_int(classes.class_bits())?;
                    let _serial = stream.read_int(ENTITY_SERIAL_BITS)?;
                    self.enter_pvs(id, class_id, classes, stream, observer)?;
                } else {
                    let entity = self.get(id).ok_or(ParseError::UnknownEntity(id))?;
                    let class = classes
                        .get(entity.class_id)
                        .ok_or(ParseError::UnknownServerClass(entity.class_id))?;
                    entity.apply_update(class, stream, observer)?;
                }
            } else {
                self.remove(id, classes, observer);
                // delete flag, leaving the PVS tears the entity down either way
                stream.read_bit()?;
            }
        }
        Ok(())
    }

    fn enter_pvs<O: EntityObserver>(
        &mut self,
        id: EntityId,
        class_id: u32,
        classes: &ClassTable,
        stream: &mut impl BitSource,
        observer: &mut O,
    ) -> Result<()> {
        let class = classes
            .get(class_id)
            .ok_or(ParseError::UnknownServerClass(class_id))?;

        if let Some(old) = self.entities[id as usize].take() {
            match classes.get(old.class_id) {
                Some(old_class) if old_class.name != class.name => {
                    trace!("{id} replaced: {} -> {}", old_class.name, class.name);
                    observer.entity_removed(id, old_class);
                }
                _ => {}
            }
        }

        let mut entity = Entity::new(id, class);
        self.cache_baseline(class, classes)?;

        observer.entity_created(&mut EntityBinder {
            entity: &mut entity,
            class,
        })?;

        if let Some(baseline) = self.baselines.get(&class_id) {
            for (index, value) in baseline {
                entity.dispatch(*index, value, UpdateSource::Baseline, observer)?;
            }
        }
        entity.apply_update(class, stream, observer)?;
        observer.entity_initialized(id, class);

        self.entities[id as usize] = Some(entity);
        Ok(())
    }

    fn cache_baseline(&mut self, class: &ServerClass, classes: &ClassTable) -> Result<()> {
        if self.baselines.contains_key(&class.id) {
            return Ok(());
        }

        let mut values = Vec::new();
        if let Some(data) = classes.baseline(class.id) {
            let mut stream = BitReadStream::new(BitReadBuffer::new(data, LittleEndian));
            read_delta(&mut stream, class, |index, value| {
                values.push((index, value));
                Ok(())
            })?;
        } else {
            debug!("No instance baseline for {}", class.name);
        }
        self.baselines.insert(class.id, values);
        Ok(())
    }

    /// Tear down every live entity as if it left the PVS, then forget the
    /// decoded baselines.
    pub fn clear<O: EntityObserver>(&mut self, classes: &ClassTable, observer: &mut O) {
        for id in 0..self.entities.len() {
            if self.entities[id].is_some() {
                self.remove(id as EntityId, classes, observer);
            }
        }
        self.baselines.clear();
    }

    fn remove<O: EntityObserver>(&mut self, id: EntityId, classes: &ClassTable, observer: &mut O) {
        let Some(entity) = self.entities[id as usize].take() else {
            warn!("Removing entity {id} which does not exist");
            return;
        };
        if let Some(class) = classes.get(entity.class_id) {
            observer.entity_removed(id, class);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseProp {
    Owner,
    CellX,
    CellY,
    CellZ,
    Origin,
}

/// Fields shared by every positioned, ownable domain object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionedBase {
    /// Entity id of the owning player, when it is known.
    pub owner: Option<EntityId>,
    pub origin: Vector,
    pub cell: [i32; 3],
}

impl PositionedBase {
    pub fn bind(binder: &mut EntityBinder<'_>) {
        binder.bind(OWNER, Listener::Base(BaseProp::Owner));
        binder.bind(CELL_X, Listener::Base(BaseProp::CellX));
        binder.bind(CELL_Y, Listener::Base(BaseProp::CellY));
        binder.bind(CELL_Z, Listener::Base(BaseProp::CellZ));
        binder.bind(ORIGIN, Listener::Base(BaseProp::Origin));
    }

    pub fn position(&self, cell_width: i32) -> Vector {
        let axis = |cell: i32, origin: f32| (cell * cell_width - MAX_COORD_INTEGER) as f32 + origin;
        Vector::new(
            axis(self.cell[0], self.origin.x),
            axis(self.cell[1], self.origin.y),
            axis(self.cell[2], self.origin.z),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::testutil::DeltaWriter;
    use crate::schema::{FlattenedProp, SendProp, SendPropFlag};

    #[derive(Default)]
    struct Recorder {
        bind: Vec<&'static str>,
        log: Vec<String>,
    }

    impl EntityObserver for Recorder {
        fn entity_created(&mut self, binder: &mut EntityBinder<'_>) -> Result<()> {
            self.log.push(format!("created {}", binder.id()));
            for name in &self.bind {
                binder.bind(name, Listener::CellBits);
            }
            Ok(())
        }

        fn property_changed(
            &mut self,
            entity: EntityId,
            _listener: Listener,
            update: PropertyUpdate<'_>,
        ) -> Result<()> {
            self.log.push(format!(
                "{entity}.{} = {:?} {:?}",
                update.index, update.value, update.source
            ));
            Ok(())
        }

        fn entity_initialized(&mut self, entity: EntityId, _class: &ServerClass) {
            self.log.push(format!("initialized {entity}"));
        }

        fn entity_removed(&mut self, entity: EntityId, class: &ServerClass) {
            self.log.push(format!("removed {entity} {}", class.name));
        }
    }

    fn classes() -> ClassTable {
        let int = || SendProp::new(SendPropType::Int, 8).with_flags(SendPropFlag::Unsigned);
        let mut table = ClassTable::new(vec![
            ServerClass::new(
                0,
                "CFoo",
                "DT_Foo",
                vec![],
                vec![FlattenedProp::new("a", int()), FlattenedProp::new("b", int())],
            ),
            ServerClass::new(1, "CBar", "DT_Bar", vec![], vec![FlattenedProp::new("a", int())]),
        ]);
        let mut baseline = DeltaWriter::new();
        baseline.indices(&[0, 1], true).int(1, 8).int(2, 8);
        table.set_baseline(0, baseline.finish());
        table
    }

    fn enter(writer: &mut DeltaWriter, delta: u32, class_id: u32) {
        writer.ubit_int(delta).bit(false).bit(true).int(class_id, 1).int(7, 10);
    }

    fn run(writer: &DeltaWriter, entries: u32, table: &mut EntityTable, recorder: &mut Recorder) {
        let data = writer.finish();
        let mut stream = BitReadStream::new(BitReadBuffer::new(&data, LittleEndian));
        table
            .read_packet_entities(&classes(), entries, &mut stream, recorder)
            .unwrap();
    }

    #[test]
    fn creation_order_is_bind_baseline_delta_init() {
        let mut recorder = Recorder {
            bind: vec!["b"],
            ..Default::default()
        };
        let mut table = EntityTable::new();
        let mut writer = DeltaWriter::new();
        enter(&mut writer, 3, 0);
        writer.indices(&[1], true).int(9, 8);
        run(&writer, 1, &mut table, &mut recorder);

        assert_eq!(
            recorder.log,
            vec![
                "created 3",
                "3.1 = Int(2) Baseline",
                "3.1 = Int(9) Live",
                "initialized 3",
            ]
        );
    }

    #[test]
    fn removal_releases_listeners_even_on_same_tick_reuse() {
        let mut recorder = Recorder {
            bind: vec!["a"],
            ..Default::default()
        };
        let mut table = EntityTable::new();
        let mut writer = DeltaWriter::new();
        enter(&mut writer, 0, 0);
        writer.indices(&[], true);
        run(&writer, 1, &mut table, &mut recorder);

        recorder.bind.clear();
        recorder.log.clear();
        let mut writer = DeltaWriter::new();
        // leave and delete entity 0
        writer.ubit_int(0).bit(true).bit(true);
        run(&writer, 1, &mut table, &mut recorder);
        assert!(table.get(0).is_none());

        // id 0 comes straight back as another class, nothing is bound to it
        let mut writer = DeltaWriter::new();
        enter(&mut writer, 0, 1);
        writer.indices(&[0], true).int(5, 8);
        run(&writer, 1, &mut table, &mut recorder);

        assert_eq!(recorder.log, vec!["removed 0 CFoo", "created 0", "initialized 0"]);
    }

    #[test]
    fn class_change_without_delete_fires_removal() {
        let mut recorder = Recorder::default();
        let mut table = EntityTable::new();
        let mut writer = DeltaWriter::new();
        enter(&mut writer, 4, 0);
        writer.indices(&[], true);
        run(&writer, 1, &mut table, &mut recorder);

        let mut writer = DeltaWriter::new();
        enter(&mut writer, 4, 1);
        writer.indices(&[], true);
        run(&writer, 1, &mut table, &mut recorder);

        assert_eq!(
            recorder.log,
            vec![
                "created 4",
                "initialized 4",
                "removed 4 CFoo",
                "created 4",
                "initialized 4",
            ]
        );
        assert_eq!(table.get(4).map(|e| e.class_id), Some(1));
    }

    #[test]
    fn clearing_removes_every_live_entity() {
        let mut recorder = Recorder::default();
        let mut table = EntityTable::new();
        let mut writer = DeltaWriter::new();
        enter(&mut writer, 2, 0);
        writer.indices(&[], true);
        enter(&mut writer, 5, 1);
        writer.indices(&[], true);
        run(&writer, 2, &mut table, &mut recorder);

        recorder.log.clear();
        table.clear(&classes(), &mut recorder);
        assert_eq!(recorder.log, vec!["removed 2 CFoo", "removed 8 CBar"]);
        assert!(table.is_empty());
        assert!(table.baselines.is_empty());
    }

    #[test]
    fn slot_layout_is_fixed_per_class() {
        let mut recorder = Recorder::default();
        let mut table = EntityTable::new();
        let mut writer = DeltaWriter::new();
        enter(&mut writer, 1, 0);
        writer.indices(&[0], true).int(3, 8);
        enter(&mut writer, 9, 0);
        writer.indices(&[], true);
        run(&writer, 2, &mut table, &mut recorder);

        let kinds = |id| {
            table
                .get(id)
                .unwrap()
                .slots()
                .iter()
                .map(|s| s.kind)
                .collect::<Vec<_>>()
        };
        assert_eq!(kinds(1), kinds(11));
        assert_eq!(kinds(1).len(), 2);
    }

    #[test]
    fn delta_for_unknown_entity_is_fatal() {
        let mut recorder = Recorder::default();
        let mut table = EntityTable::new();
        let mut writer = DeltaWriter::new();
        writer.ubit_int(2).bit(false).bit(false);
        let data = writer.finish();
        let mut stream = BitReadStream::new(BitReadBuffer::new(&data, LittleEndian));
        assert!(matches!(
            table.read_packet_entities(&classes(), 1, &mut stream, &mut recorder),
            Err(ParseError::UnknownEntity(2))
        ));
    }

    #[test]
    fn cell_position() {
        let base = PositionedBase {
            owner: None,
            origin: Vector::new(1.0, 2.0, 3.0),
            cell: [512, 513, 511],
        };
        assert_eq!(base.position(32), Vector::new(1.0, 34.0, -29.0));
    }
}
