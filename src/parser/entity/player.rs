use crate::parser::analyzer::{MatchAnalyzer, PendingAction};
use crate::parser::entity::{BombSignal, EntityBinder, Listener, PropertyUpdate, UpdateSource};
use crate::parser::events::{BombDefuseEvent, Event, PlayerStat, WeaponEvent};
use crate::parser::game::{
    EntityId, Team, UserId, Vector, INDEX_MASK, MAX_AMMO_TYPES, MAX_ROUND_STATS, MAX_WEAPONS,
};
use crate::parser::props::*;
use crate::parser::weapon::EquipmentClass;
use bit_set::BitSet;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{error, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerProp {
    OriginXY,
    OriginZ,
    TeamNum,
    Health,
    Armor,
    HasDefuser,
    HasHelmet,
    Ducking,
    Account,
    EyeAngleX,
    EyeAngleY,
    FlashDuration,
    VelocityX,
    VelocityY,
    VelocityZ,
    CurrentEquipmentValue,
    RoundStartEquipmentValue,
    FreezetimeEndEquipmentValue,
    RoundDamage(u8),
    IsDefusing,
    Weapon(u8),
    ActiveWeapon,
    Ammo(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub entity_id: EntityId,
    pub user_id: UserId,
    pub name: String,
    /// Community id, -1 until the player connected, 0 for bots.
    pub steam_id: i64,

    pub team_id: i32,
    pub team: Team,

    pub hp: i32,
    pub armor: i32,
    pub money: i32,
    pub has_defuse_kit: bool,
    pub has_helmet: bool,
    pub is_ducking: bool,
    pub is_defusing: bool,

    pub position: Vector,
    pub last_alive_position: Vector,
    pub velocity: Vector,
    pub view_direction_x: f32,
    pub view_direction_y: f32,
    pub flash_duration: f32,

    pub current_equipment_value: i32,
    pub round_start_equipment_value: i32,
    pub freezetime_end_equipment_value: i32,

    pub active_weapon_id: Option<EntityId>,
    raw_weapons: BitSet,
    // weapon entity per inventory slot, 0 when empty
    weapon_slots: [EntityId; MAX_WEAPONS],
    pub ammo_left: [i32; MAX_AMMO_TYPES],
    grenade_ammo_types: FnvHashMap<i32, EntityId>,
    new_weapons: VecDeque<EntityId>,

    // reset at the end of every tick
    pub(crate) threw_nade: bool,
    pub(crate) weapon_fire: Option<EntityId>,

    pub(crate) is_fallen: bool,
}

impl Player {
    pub fn new(entity_id: EntityId) -> Self {
        Player {
            entity_id,
            user_id: -1,
            name: "unconnected".to_string(),
            steam_id: -1,
            team_id: 0,
            team: Team::default(),
            hp: 0,
            armor: 0,
            money: 0,
            has_defuse_kit: false,
            has_helmet: false,
            is_ducking: false,
            is_defusing: false,
            position: Vector::default(),
            last_alive_position: Vector::default(),
            velocity: Vector::default(),
            view_direction_x: 0.0,
            view_direction_y: 0.0,
            flash_duration: 0.0,
            current_equipment_value: 0,
            round_start_equipment_value: 0,
            freezetime_end_equipment_value: 0,
            active_weapon_id: None,
            raw_weapons: BitSet::new(),
            weapon_slots: [0; MAX_WEAPONS],
            ammo_left: [0; MAX_AMMO_TYPES],
            grenade_ammo_types: FnvHashMap::default(),
            new_weapons: VecDeque::new(),
            threw_nade: false,
            weapon_fire: None,
            is_fallen: false,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }

    /// On one of the two sides, not spectating.
    pub fn is_playing(&self) -> bool {
        matches!(self.team, Team::Terrorist | Team::CounterTerrorist)
    }

    /// Entity ids of every weapon in the inventory.
    pub fn weapons(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.raw_weapons.iter().map(|id| id as EntityId)
    }

    pub fn has_weapons(&self) -> bool {
        !self.raw_weapons.is_empty()
    }

    pub fn owns_weapon(&self, id: EntityId) -> bool {
        self.raw_weapons.contains(id as usize)
    }

    pub(crate) fn take_new_weapons(&mut self) -> VecDeque<EntityId> {
        std::mem::take(&mut self.new_weapons)
    }

    pub(crate) fn remember_grenade(&mut self, ammo_type: i32, weapon: EntityId) {
        self.grenade_ammo_types.insert(ammo_type, weapon);
    }

    pub(crate) fn end_tick(&mut self) {
        if self.is_alive() {
            self.last_alive_position = self.position;
        }
        self.threw_nade = false;
        self.weapon_fire = None;
    }
}

/// Connection details from the userinfo table or a `player_connect` event,
/// keyed by player slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPlayer {
    pub user_id: UserId,
    pub name: String,
    pub xuid: i64,
    pub guid: String,
    pub is_fake_player: bool,
}

impl MatchAnalyzer {
    pub(crate) fn bind_player(&mut self, binder: &mut EntityBinder<'_>) {
        let id = binder.id();
        let Some(slot) = (id as usize)
            .checked_sub(1)
            .and_then(|index| self.players.get_mut(index))
        else {
            error!("Player entity {id} is out of range");
            return;
        };
        // keeps identity across a reconnect on the same slot
        let player = slot.get_or_insert_with(|| Player::new(id));
        player.entity_id = id;
        player.position = Vector::default();
        player.velocity = Vector::default();

        let bind = |binder: &mut EntityBinder<'_>, name: &str, prop: PlayerProp| {
            binder.bind(name, Listener::Player(prop));
        };
        bind(binder, PLAYER_ORIGIN_XY, PlayerProp::OriginXY);
        bind(binder, PLAYER_ORIGIN_Z, PlayerProp::OriginZ);
        bind(binder, TEAM, PlayerProp::TeamNum);
        bind(binder, HEALTH, PlayerProp::Health);
        bind(binder, ARMOR, PlayerProp::Armor);
        bind(binder, HAS_DEFUSER, PlayerProp::HasDefuser);
        bind(binder, HAS_HELMET, PlayerProp::HasHelmet);
        bind(binder, DUCKING, PlayerProp::Ducking);
        bind(binder, ACCOUNT, PlayerProp::Account);
        bind(binder, EYE_X, PlayerProp::EyeAngleX);
        bind(binder, EYE_Y, PlayerProp::EyeAngleY);
        bind(binder, FLASH_DURATION, PlayerProp::FlashDuration);
        bind(binder, VELOCITY_X, PlayerProp::VelocityX);
        bind(binder, VELOCITY_Y, PlayerProp::VelocityY);
        bind(binder, VELOCITY_Z, PlayerProp::VelocityZ);
        bind(binder, CURRENT_EQUIPMENT_VALUE, PlayerProp::CurrentEquipmentValue);
        bind(binder, ROUND_START_EQUIPMENT_VALUE, PlayerProp::RoundStartEquipmentValue);
        bind(binder, FREEZETIME_END_EQUIPMENT_VALUE, PlayerProp::FreezetimeEndEquipmentValue);
        bind(binder, IS_DEFUSING, PlayerProp::IsDefusing);
        bind(binder, ACTIVE_WEAPON, PlayerProp::ActiveWeapon);

        for round in 0..MAX_ROUND_STATS {
            let name = indexed(ROUND_DAMAGE_PREFIX, round);
            bind(binder, &name, PlayerProp::RoundDamage(round as u8));
        }

        let prefix = if binder.has_property(&indexed(WEAPONS_PREFIX, 0)) {
            WEAPONS_PREFIX
        } else {
            NONLOCAL_WEAPONS_PREFIX
        };
        for slot in 0..MAX_WEAPONS {
            bind(binder, &indexed(prefix, slot), PlayerProp::Weapon(slot as u8));
        }

        for ammo_type in 0..MAX_AMMO_TYPES {
            let name = indexed(AMMO_PREFIX, ammo_type);
            bind(binder, &name, PlayerProp::Ammo(ammo_type as u8));
        }
    }

    pub(crate) fn handle_player_prop(
        &mut self,
        id: EntityId,
        prop: PlayerProp,
        update: PropertyUpdate<'_>,
    ) {
        let value = update.value;
        let int = value.as_int().unwrap_or_default();
        let float = value.as_float().unwrap_or_default();
        let teams = &self.teams;
        let index = (id as usize).checked_sub(1);
        let Some(player) = index.and_then(|i| self.players.get_mut(i)).and_then(Option::as_mut) else {
            return;
        };

        let stat = match prop {
            PlayerProp::OriginXY => {
                if let Some(xy) = value.as_vector() {
                    player.position.x = xy.x;
                    player.position.y = xy.y;
                }
                None
            }
            PlayerProp::OriginZ => {
                player.position.z = float;
                None
            }
            // team entities can arrive after the players
            PlayerProp::TeamNum => {
                player.team_id = int;
                player.team = teams.side_of(int);
                None
            }
            PlayerProp::Health => {
                let tracked = self.tick.ingame_tick != 0
                    && int != 100
                    && update.source == UpdateSource::Live
                    && !self.game.warmup_period;
                if tracked {
                    self.attribution.record_health_loss(id, player.hp - int);
                }
                player.hp = int;
                Some(PlayerStat::Health(int))
            }
            PlayerProp::Armor => {
                player.armor = int;
                Some(PlayerStat::Armor(int))
            }
            PlayerProp::HasDefuser => {
                player.has_defuse_kit = int == 1;
                Some(PlayerStat::DefuseKit(int == 1))
            }
            PlayerProp::HasHelmet => {
                player.has_helmet = int == 1;
                Some(PlayerStat::Helmet(int == 1))
            }
            PlayerProp::Ducking => {
                player.is_ducking = int == 1;
                None
            }
            PlayerProp::Account => {
                player.money = int;
                Some(PlayerStat::Money(int))
            }
            PlayerProp::EyeAngleX => {
                player.view_direction_x = float;
                None
            }
            PlayerProp::EyeAngleY => {
                player.view_direction_y = float;
                None
            }
            PlayerProp::FlashDuration => {
                player.flash_duration = float;
                None
            }
            PlayerProp::VelocityX => {
                player.velocity.x = float;
                None
            }
            PlayerProp::VelocityY => {
                player.velocity.y = float;
                None
            }
            PlayerProp::VelocityZ => {
                player.velocity.z = float;
                None
            }
            PlayerProp::CurrentEquipmentValue => {
                player.current_equipment_value = int;
                None
            }
            PlayerProp::RoundStartEquipmentValue => {
                player.round_start_equipment_value = int;
                None
            }
            PlayerProp::FreezetimeEndEquipmentValue => {
                player.freezetime_end_equipment_value = int;
                None
            }
            PlayerProp::RoundDamage(round) => {
                // a rejoined player starts over as a spectator
                if player.team != Team::Spectate && !self.game.warmup_period {
                    self.attribution.record_round_damage(
                        id,
                        round as i32,
                        int,
                        self.game.total_rounds_played,
                    );
                }
                None
            }
            PlayerProp::IsDefusing => {
                // repeated on consecutive ticks
                if player.is_defusing != (int == 1) {
                    self.defusing_changed(id, int == 1);
                }
                None
            }
            PlayerProp::Weapon(slot) => {
                self.weapon_slot_changed(id, slot as usize, int);
                None
            }
            PlayerProp::ActiveWeapon => {
                player.active_weapon_id = Some((int & INDEX_MASK) as EntityId);
                None
            }
            PlayerProp::Ammo(ammo_type) => {
                self.ammo_changed(id, ammo_type as usize, int);
                None
            }
        };

        if let Some(stat) = stat {
            if let Some(player) = self.bound_player_ref(id) {
                self.emit(Event::PlayerStatUpdated { player, stat });
            }
        }
    }

    fn defusing_changed(&mut self, id: EntityId, defusing: bool) {
        if !defusing {
            // an abort or a defuse, the bomb entity after the players decides
            self.actions.push_back(PendingAction::ResolveDefuse(id));
            return;
        }

        let Some(player) = self.player_mut(id) else {
            return;
        };
        player.is_defusing = true;
        let has_kit = player.has_defuse_kit;

        let Some(bomb) = self.planted_bomb.as_mut() else {
            trace!("Player {id} defusing without a planted bomb");
            return;
        };
        if !bomb.signal(BombSignal::DefuseBegin) {
            return;
        }
        bomb.defuser = Some(id);

        let event = BombDefuseEvent {
            player: self.player_ref(id),
            has_kit,
        };
        self.emit(Event::BombBeginDefuse(event));
    }

    pub(crate) fn resolve_defuse(&mut self, id: EntityId) {
        let Some(player) = self.player_mut(id) else {
            return;
        };
        player.is_defusing = false;
        let has_kit = player.has_defuse_kit;

        let Some(bomb) = self.planted_bomb.as_mut() else {
            return;
        };
        if bomb.is_defused() || !bomb.signal(BombSignal::DefuseAbort) {
            return;
        }
        bomb.defuser = None;

        let event = BombDefuseEvent {
            player: self.player_ref(id),
            has_kit,
        };
        self.emit(Event::BombAbortDefuse(event));
    }

    fn weapon_slot_changed(&mut self, id: EntityId, slot: usize, handle: i32) {
        let index = handle & INDEX_MASK;
        let slot_of_player = (id as usize).checked_sub(1);
        let Some(player) = slot_of_player
            .and_then(|i| self.players.get_mut(i))
            .and_then(Option::as_mut)
        else {
            return;
        };
        let previous = player.weapon_slots[slot];
        if index != INDEX_MASK && previous == index as EntityId {
            return;
        }

        let mut dropped = None;
        if previous != 0 && player.raw_weapons.remove(previous as usize) {
            if index == INDEX_MASK {
                self.weapons[previous as usize].owner = None;
            }
            if self.weapons[previous as usize].class() != EquipmentClass::Grenade {
                dropped = Some(self.weapons[previous as usize].clone());
            }
        }
        player.weapon_slots[slot] = 0;

        if index != INDEX_MASK {
            let weapon = index as EntityId;
            // the weapon entity fills in its data later
            player.weapon_slots[slot] = weapon;
            player.raw_weapons.insert(weapon as usize);
            player.new_weapons.push_back(weapon);
            self.weapons[weapon as usize].owner = Some(id);
        }

        if let Some(weapon) = dropped {
            let event = WeaponEvent {
                player: self.player_ref(id),
                weapon,
            };
            self.emit(Event::DropWeapon(event));
        }
    }

    /// Inventory slots update slower than ammo, a grenade can go off before
    /// its slot empties, so grenade drops are raised from the ammo counter.
    fn ammo_changed(&mut self, id: EntityId, ammo_type: usize, ammo: i32) {
        let index = (id as usize).checked_sub(1);
        let Some(player) = index.and_then(|i| self.players.get_mut(i)).and_then(Option::as_mut) else {
            return;
        };
        let previous = player.ammo_left[ammo_type];
        player.ammo_left[ammo_type] = ammo;

        let Some(&weapon) = player.grenade_ammo_types.get(&(ammo_type as i32)) else {
            return;
        };
        if previous == 0 {
            return;
        }

        // throwing on top of a grenade of the same type can keep the count
        if ammo >= previous {
            player.new_weapons.push_back(weapon);
        }
        if ammo <= previous {
            player.threw_nade = true;
            let event = WeaponEvent {
                player: self.player_ref(id),
                weapon: self.weapons[weapon as usize].clone(),
            };
            self.emit(Event::DropWeapon(event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_players_are_unconnected() {
        let player = Player::new(3);
        assert_eq!(player.steam_id, -1);
        assert_eq!(player.user_id, -1);
        assert!(!player.is_playing());
        assert!(!player.has_weapons());
    }

    #[test]
    fn end_of_tick_resets_transient_flags() {
        let mut player = Player::new(1);
        player.hp = 50;
        player.position = Vector::new(1.0, 2.0, 3.0);
        player.threw_nade = true;
        player.weapon_fire = Some(70);
        player.end_tick();

        assert!(!player.threw_nade);
        assert_eq!(player.weapon_fire, None);
        assert_eq!(player.last_alive_position, Vector::new(1.0, 2.0, 3.0));

        player.hp = 0;
        player.position = Vector::default();
        player.end_tick();
        assert_eq!(player.last_alive_position, Vector::new(1.0, 2.0, 3.0));
    }
}
