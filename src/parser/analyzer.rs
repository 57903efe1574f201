use crate::parser::attribution::{DamageAttribution, ReconcileContext};
use crate::parser::decode::PropertyValue;
use crate::parser::entity::*;
use crate::parser::events::{
    Event, PlayerHurtEvent, PlayerKilledEvent, PlayerRef, WeaponEvent,
};
use crate::parser::game::{
    EntityId, GameInfo, Hitgroup, Team, Teams, TickInfo, UserId, Vector, DEFAULT_CELL_BITS,
    INDEX_MASK, MAX_ENTITIES, MAX_PLAYERS,
};
use crate::parser::props::CELL_BITS;
use crate::parser::weapon::{Equipment, EquipmentClass, EquipmentElement};
use crate::parser::ParserConfig;
use crate::schema::{ClassTable, ServerClass};
use crate::Result;
use fnv::FnvHashMap;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace, warn};

/// Work deferred to the end of the tick, after every delta was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    ResolveWeaponModel { weapon: EntityId, model: i32 },
    ResolveDefuse(EntityId),
    ResolveExplosion,
    ResolvePlantAbort(EntityId),
}

/// Owns the reconstructed match state and turns entity updates and raw game
/// events into [`Event`]s.
pub struct MatchAnalyzer {
    pub(crate) config: ParserConfig,
    pub(crate) tick: TickInfo,
    pub(crate) game: GameInfo,
    pub(crate) teams: Teams,
    pub(crate) round_winner: Team,

    pub(crate) cell_width: i32,
    pub(crate) bombsite_a: Vector,
    pub(crate) bombsite_b: Vector,

    // indexed by entity id - 1
    pub(crate) players: Vec<Option<Player>>,
    pub(crate) users: BTreeMap<UserId, EntityId>,
    // indexed by player slot
    pub(crate) raw_players: Vec<Option<RawPlayer>>,
    pub(crate) resources: Vec<PlayerResource>,
    pub(crate) team_entities: FnvHashMap<EntityId, TeamEntity>,

    // indexed by entity id
    pub(crate) weapons: Vec<Equipment>,
    pub(crate) equipment_mapping: FnvHashMap<u32, EquipmentElement>,
    pub(crate) model_precache: FnvHashMap<i32, String>,
    pub(crate) grenades: FnvHashMap<EntityId, GrenadeWeapon>,

    pub(crate) carried_bombs: FnvHashMap<EntityId, BombEntity>,
    pub(crate) planted_bomb: Option<BombEntity>,

    pub(crate) detonates: BTreeMap<EntityId, DetonateEntity>,
    pub(crate) interp_detonates: VecDeque<EntityId>,
    pub(crate) blind_players: Vec<EntityId>,

    pub(crate) attribution: DamageAttribution,
    pub(crate) actions: VecDeque<PendingAction>,
    // raised this tick, handed out once the tick completes
    events: Vec<Event>,
    pub(crate) derived: Vec<Event>,
}

impl MatchAnalyzer {
    pub fn new(config: ParserConfig) -> Self {
        MatchAnalyzer {
            config,
            tick: TickInfo::default(),
            game: GameInfo::default(),
            teams: Teams::default(),
            round_winner: Team::default(),
            cell_width: 1 << DEFAULT_CELL_BITS,
            bombsite_a: Vector::default(),
            bombsite_b: Vector::default(),
            players: vec![None; MAX_PLAYERS],
            users: BTreeMap::new(),
            raw_players: vec![None; MAX_PLAYERS],
            resources: vec![PlayerResource::default(); MAX_PLAYERS + 1],
            team_entities: FnvHashMap::default(),
            weapons: vec![Equipment::default(); MAX_ENTITIES],
            equipment_mapping: FnvHashMap::default(),
            model_precache: FnvHashMap::default(),
            grenades: FnvHashMap::default(),
            carried_bombs: FnvHashMap::default(),
            planted_bomb: None,
            detonates: BTreeMap::new(),
            interp_detonates: VecDeque::new(),
            blind_players: Vec::new(),
            attribution: DamageAttribution::default(),
            actions: VecDeque::new(),
            events: Vec::new(),
            derived: Vec::new(),
        }
    }

    pub fn tick(&self) -> &TickInfo {
        &self.tick
    }

    pub fn game(&self) -> &GameInfo {
        &self.game
    }

    pub fn teams(&self) -> &Teams {
        &self.teams
    }

    pub fn planted_bomb(&self) -> Option<&BombEntity> {
        self.planted_bomb.as_ref()
    }

    pub fn resource(&self, id: EntityId) -> Option<&PlayerResource> {
        self.resources.get(id as usize)
    }

    /// Every player entity, bound or not.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().flatten()
    }

    pub fn player(&self, id: EntityId) -> Option<&Player> {
        let index = (id as usize).checked_sub(1)?;
        self.players.get(index)?.as_ref()
    }

    pub(crate) fn player_mut(&mut self, id: EntityId) -> Option<&mut Player> {
        let index = (id as usize).checked_sub(1)?;
        self.players.get_mut(index)?.as_mut()
    }

    pub(crate) fn user(&self, user_id: UserId) -> Option<EntityId> {
        self.users.get(&user_id).copied()
    }

    pub(crate) fn player_ref(&self, id: EntityId) -> Option<PlayerRef> {
        self.player(id).map(|player| PlayerRef {
            user_id: player.user_id,
            entity_id: player.entity_id,
            name: player.name.clone(),
            steam_id: player.steam_id,
            team: player.team,
        })
    }

    /// Only players already matched to a connected user.
    pub(crate) fn bound_player_ref(&self, id: EntityId) -> Option<PlayerRef> {
        let player = self.player(id)?;
        if self.user(player.user_id) != Some(id) {
            return None;
        }
        self.player_ref(id)
    }

    /// Resolve an owner handle, only live players count as owners.
    pub(crate) fn owner_from_handle(&self, handle: i32) -> Option<EntityId> {
        let id = (handle & INDEX_MASK) as EntityId;
        if !(1..=MAX_PLAYERS as EntityId).contains(&id) {
            return None;
        }
        self.player(id).map(|_| id)
    }

    pub(crate) fn active_weapon(&self, id: EntityId) -> Option<&Equipment> {
        let player = self.player(id)?;
        player
            .active_weapon_id
            .filter(|weapon| player.owns_weapon(*weapon))
            .and_then(|weapon| self.weapons.get(weapon as usize))
    }

    pub(crate) fn emit(&mut self, event: Event) {
        trace!("{event:?}");
        self.events.push(event);
    }

    pub(crate) fn begin_tick(&mut self, tick: TickInfo) {
        self.tick = tick;
    }

    /// Events raised since the last call.
    pub(crate) fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Forget whatever the failed tick raised or queued.
    pub(crate) fn discard_tick(&mut self) {
        self.events.clear();
        self.derived.clear();
        self.actions.clear();
    }

    pub(crate) fn class_table_changed(&mut self, classes: &ClassTable) {
        self.equipment_mapping = map_equipment(classes);
        debug!("Mapped {} weapon classes", self.equipment_mapping.len());
    }

    pub(crate) fn model_precached(&mut self, index: i32, name: String) {
        self.model_precache.insert(index, name);
    }

    pub(crate) fn player_info(&mut self, slot: usize, info: Option<RawPlayer>) {
        match self.raw_players.get_mut(slot) {
            Some(raw) => *raw = info,
            None => warn!("Player info for slot {slot} out of range"),
        }
    }

    /// Everything that has to wait for the tick to be fully applied.
    pub(crate) fn end_tick(&mut self, entities: &EntityTable, classes: &ClassTable) -> Result<()> {
        self.run_pending_actions()?;
        self.bind_raw_players();
        // transient flags reset whether or not the player is bound
        for player in self.players.iter_mut().flatten() {
            player.end_tick();
        }
        self.start_queued_detonates();
        self.sweep_replaced_detonates(entities, classes);
        if self.tick.current_tick % 10 == 0 {
            self.queue_stalled_decoys();
        }
        self.reconcile_damage();

        if self.planted_bomb.as_ref().is_some_and(|b| b.destroyed) {
            self.planted_bomb = None;
        }
        self.emit(Event::TickDone);
        Ok(())
    }

    fn run_pending_actions(&mut self) -> Result<()> {
        while let Some(action) = self.actions.pop_front() {
            match action {
                PendingAction::ResolveWeaponModel { weapon, model } => {
                    self.resolve_weapon_model(weapon, model)?
                }
                PendingAction::ResolveDefuse(player) => self.resolve_defuse(player),
                PendingAction::ResolveExplosion => self.resolve_explosion(),
                PendingAction::ResolvePlantAbort(bomb) => self.resolve_plant_abort(bomb),
            }
        }
        Ok(())
    }

    /// Match connection records to player entities by slot.
    fn bind_raw_players(&mut self) {
        for slot in 0..MAX_PLAYERS {
            let Some(raw) = self.raw_players[slot].clone() else {
                continue;
            };
            let id = slot as EntityId + 1;
            if self.players[slot].is_none() {
                continue;
            }

            let new_user = !self.users.contains_key(&raw.user_id);
            if new_user {
                self.users.insert(raw.user_id, id);
            }
            let Some(player) = self.player_mut(id) else {
                continue;
            };
            player.user_id = raw.user_id;
            player.name = raw.name;
            player.steam_id = raw.xuid;
            let steam_id = player.steam_id;
            let new_weapons = player.take_new_weapons();

            if new_user && steam_id != 0 {
                if let Some(player) = self.player_ref(id) {
                    self.emit(Event::PlayerBind { player });
                }
            }

            for weapon_id in new_weapons {
                let weapon = self.weapons[weapon_id as usize].clone();
                if weapon.class() == EquipmentClass::Grenade {
                    if let Some(player) = self.player_mut(id) {
                        player.remember_grenade(weapon.ammo_type, weapon_id);
                    }
                }
                let event = WeaponEvent {
                    player: self.player_ref(id),
                    weapon,
                };
                self.emit(Event::PickupWeapon(event));
            }
        }
    }

    fn reconcile_damage(&mut self) {
        let ctx = ReconcileContext {
            suspended: self.game.warmup_period || self.game.paused,
            track_inflicted: self.teams.total_score() < 30,
            bomb_exploded: self.exploded_this_tick(),
            relax: self.config.relax_verify_damage,
        };
        let hurts = self.attribution.reconcile(&ctx);

        for (index, hurt) in hurts.iter().enumerate() {
            let Some((health, armor)) = self.player(hurt.victim).map(|p| (p.hp, p.armor)) else {
                continue;
            };
            let weapon = Equipment::of(hurt.weapon);
            let event = PlayerHurtEvent {
                player: self.player_ref(hurt.victim),
                attacker: hurt.attacker.and_then(|id| self.player_ref(id)),
                health,
                armor,
                health_damage: hurt.amount,
                armor_damage: 0,
                hitgroup: Hitgroup::Generic,
                weapon: weapon.clone(),
            };
            self.emit(Event::PlayerHurt(event));

            let last_for_victim = hurts
                .get(index + 1)
                .map_or(true, |next| next.victim != hurt.victim);
            if last_for_victim && health == 0 {
                let kill = PlayerKilledEvent {
                    victim: self.player_ref(hurt.victim),
                    killer: hurt.attacker.and_then(|id| self.player_ref(id)),
                    assister: None,
                    weapon,
                    headshot: false,
                    penetrated_objects: 0,
                };
                self.emit(Event::PlayerKilled(kill));
            }
        }
    }

    fn handle_base_prop(&mut self, id: EntityId, prop: BaseProp, value: &PropertyValue) {
        let owner = match prop {
            BaseProp::Owner => value.as_int().and_then(|handle| self.owner_from_handle(handle)),
            _ => None,
        };

        let planted = self
            .planted_bomb
            .as_ref()
            .is_some_and(|b| b.id == id && !b.destroyed);
        let base = if planted {
            self.planted_bomb.as_mut().map(|b| &mut b.base)
        } else if let Some(bomb) = self.carried_bombs.get_mut(&id) {
            Some(&mut bomb.base)
        } else if let Some(det) = self.detonates.get_mut(&id) {
            if prop == BaseProp::Owner {
                det.set_owner(owner);
                return;
            }
            Some(&mut det.base)
        } else {
            None
        };
        let Some(base) = base else {
            return;
        };

        let cell = |axis: usize, base: &mut PositionedBase| {
            if let Some(v) = value.as_int() {
                base.cell[axis] = v;
            }
        };
        match prop {
            BaseProp::Owner => base.owner = owner,
            BaseProp::CellX => cell(0, base),
            BaseProp::CellY => cell(1, base),
            BaseProp::CellZ => cell(2, base),
            BaseProp::Origin => {
                if let Some(origin) = value.as_vector() {
                    base.origin = origin;
                }
            }
        }
    }
}

impl EntityObserver for MatchAnalyzer {
    fn entity_created(&mut self, binder: &mut EntityBinder<'_>) -> Result<()> {
        let name = binder.class().name.clone();
        match name.as_str() {
            "CCSPlayer" => self.bind_player(binder),
            "CCSPlayerResource" => self.bind_resource(binder),
            "CCSTeam" => self.bind_team(binder),
            "CCSGameRulesProxy" => self.bind_rules(binder),
            "CBaseEntity" => {
                binder.bind(CELL_BITS, Listener::CellBits);
            }
            "CPlantedC4" => self.bind_planted_bomb(binder),
            _ => {}
        }

        if name == "CC4" {
            self.bind_carried_bomb(binder);
        }
        if let Some(kind) = DetonateKind::for_class(&name) {
            self.bind_detonate(binder, kind);
        }
        if let Some(kind) = GrenadeWeapon::for_class(&name) {
            self.bind_grenade(binder, kind);
        }
        if binder.class().derives_from("CWeaponCSBase") {
            self.bind_weapon(binder);
        }
        Ok(())
    }

    fn property_changed(
        &mut self,
        entity: EntityId,
        listener: Listener,
        update: PropertyUpdate<'_>,
    ) -> Result<()> {
        match listener {
            Listener::Player(prop) => self.handle_player_prop(entity, prop, update),
            Listener::Resource(prop) => self.handle_resource_prop(prop, update),
            Listener::Team(prop) => self.handle_team_prop(entity, prop, update),
            Listener::Rules(prop) => self.handle_rules_prop(prop, update),
            Listener::CellBits => self.handle_cell_bits(update),
            Listener::Weapon(prop) => self.handle_weapon_prop(entity, prop, update),
            Listener::Grenade(prop) => self.handle_grenade_prop(entity, prop, update),
            Listener::Base(prop) => self.handle_base_prop(entity, prop, update.value),
            Listener::Bomb(prop) => self.handle_bomb_prop(entity, prop, update),
            Listener::Detonate(prop) => self.handle_detonate_prop(entity, prop, update),
        }
        Ok(())
    }

    fn entity_initialized(&mut self, _entity: EntityId, class: &ServerClass) {
        if class.name == "CPlantedC4" {
            self.planted_bomb_initialized();
        }
    }

    fn entity_removed(&mut self, entity: EntityId, class: &ServerClass) {
        match class.name.as_str() {
            "CPlantedC4" => {
                if let Some(bomb) = self.planted_bomb.as_mut().filter(|b| b.id == entity) {
                    bomb.destroyed = true;
                }
            }
            "CC4" => {
                self.carried_bombs.remove(&entity);
            }
            "CCSTeam" => {
                self.team_entities.remove(&entity);
            }
            name if DetonateKind::for_class(name).is_some() => self.pop_detonate(entity),
            name if GrenadeWeapon::for_class(name).is_some() => {
                self.grenades.remove(&entity);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer_with_player(id: EntityId, user_id: UserId) -> MatchAnalyzer {
        let mut analyzer = MatchAnalyzer::new(ParserConfig::default());
        analyzer.players[id as usize - 1] = Some(Player::new(id));
        analyzer.raw_players[id as usize - 1] = Some(RawPlayer {
            user_id,
            name: "player".to_string(),
            xuid: 76561197960265730,
            guid: "STEAM_1:0:1".to_string(),
            is_fake_player: false,
        });
        analyzer
    }

    #[test]
    fn owner_handles_resolve_to_live_players() {
        let analyzer = analyzer_with_player(3, 12);
        assert_eq!(analyzer.owner_from_handle(3 | (7 << 11)), Some(3));
        assert_eq!(analyzer.owner_from_handle(4), None);
        assert_eq!(analyzer.owner_from_handle(INDEX_MASK), None);
        assert_eq!(analyzer.owner_from_handle(0), None);
    }

    #[test]
    fn first_bind_raises_player_bind_once() {
        let mut analyzer = analyzer_with_player(2, 9);
        analyzer.bind_raw_players();
        analyzer.bind_raw_players();

        let events = analyzer.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            Event::PlayerBind { player } if player.user_id == 9 && player.entity_id == 2
        ));
        assert_eq!(analyzer.user(9), Some(2));
        assert!(analyzer.bound_player_ref(2).is_some());
    }

    #[test]
    fn unbound_players_reset_their_tick_flags() {
        let mut analyzer = MatchAnalyzer::new(ParserConfig::default());
        let mut player = Player::new(7);
        player.threw_nade = true;
        analyzer.players[6] = Some(player);

        analyzer
            .end_tick(&EntityTable::new(), &ClassTable::default())
            .unwrap();
        assert!(!analyzer.player(7).unwrap().threw_nade);
    }

    #[test]
    fn bots_bind_silently() {
        let mut analyzer = analyzer_with_player(5, 30);
        if let Some(raw) = analyzer.raw_players[4].as_mut() {
            raw.xuid = 0;
        }
        analyzer.bind_raw_players();
        assert!(analyzer.take_events().is_empty());
        assert_eq!(analyzer.user(30), Some(5));
    }
}
