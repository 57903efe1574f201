//! Maps raw keyed game events onto typed [`Event`]s.

use crate::parser::analyzer::MatchAnalyzer;
use crate::parser::attribution::QueuedHurt;
use crate::parser::entity::{DetonateEntity, DetonateKind, DetonateState, NadeState, RawPlayer};
use crate::parser::events::*;
use crate::parser::game::{
    EntityId, Hitgroup, RoundMvpReason, Team, UserId, Vector, STEAM_ID_BASE,
};
use crate::parser::weapon::{Equipment, EquipmentClass, EquipmentElement};
use crate::{ParseError, Result};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventValueKind {
    String,
    Float,
    Long,
    Short,
    Byte,
    Bool,
    Uint64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEventKey {
    pub kind: EventValueKind,
    pub name: String,
}

/// Schema of one raw event, registered once per demo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEventDescriptor {
    pub event_id: i32,
    pub name: String,
    pub keys: Vec<GameEventKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventValue {
    String(String),
    Float(f32),
    Long(i32),
    Short(i16),
    Byte(u8),
    Bool(bool),
    Uint64(u64),
}

/// Values in the order of the descriptor keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGameEvent {
    pub event_id: i32,
    pub keys: Vec<EventValue>,
}

/// A raw event with its values keyed by name.
#[derive(Debug)]
pub struct EventData<'a> {
    name: &'a str,
    values: FnvHashMap<&'a str, &'a EventValue>,
}

impl<'a> EventData<'a> {
    pub fn new(descriptor: &'a GameEventDescriptor, event: &'a RawGameEvent) -> Self {
        if descriptor.keys.len() != event.keys.len() {
            debug!(
                "{} has {} keys, got {} values",
                descriptor.name,
                descriptor.keys.len(),
                event.keys.len()
            );
        }
        EventData {
            name: &descriptor.name,
            values: descriptor
                .keys
                .iter()
                .zip(&event.keys)
                .map(|(key, value)| (key.name.as_str(), value))
                .collect(),
        }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    fn missing(&self, key: &str) -> ParseError {
        ParseError::MissingEventKey {
            event: self.name.to_string(),
            key: key.to_string(),
        }
    }

    fn mistyped(&self, key: &str) -> ParseError {
        ParseError::EventKeyType {
            event: self.name.to_string(),
            key: key.to_string(),
        }
    }

    pub fn opt_int(&self, key: &str) -> Result<Option<i32>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(EventValue::Long(v)) => Ok(Some(*v)),
            Some(EventValue::Short(v)) => Ok(Some(*v as i32)),
            Some(EventValue::Byte(v)) => Ok(Some(*v as i32)),
            Some(_) => Err(self.mistyped(key)),
        }
    }

    pub fn int(&self, key: &str) -> Result<i32> {
        self.opt_int(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn opt_float(&self, key: &str) -> Result<Option<f32>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(EventValue::Float(v)) => Ok(Some(*v)),
            Some(_) => Err(self.mistyped(key)),
        }
    }

    pub fn float(&self, key: &str) -> Result<f32> {
        self.opt_float(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn opt_string(&self, key: &str) -> Result<Option<&'a str>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(EventValue::String(v)) => Ok(Some(v.as_str())),
            Some(_) => Err(self.mistyped(key)),
        }
    }

    pub fn string(&self, key: &str) -> Result<&'a str> {
        self.opt_string(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn bool(&self, key: &str) -> Result<bool> {
        match self.values.get(key) {
            None => Err(self.missing(key)),
            Some(EventValue::Bool(v)) => Ok(*v),
            Some(_) => Err(self.mistyped(key)),
        }
    }
}

/// `STEAM_X:Y:Z` to a 64 bit community id.
pub fn community_id(guid: &str) -> Option<i64> {
    let mut parts = guid.split(':').skip(1);
    let auth_server: i64 = parts.next()?.parse().ok()?;
    let auth_id: i64 = parts.next()?.parse().ok()?;
    Some(STEAM_ID_BASE + auth_id * 2 + auth_server)
}

impl MatchAnalyzer {
    /// Map one raw event. Broken events are logged and dropped.
    pub(crate) fn handle_game_event(
        &mut self,
        descriptor: &GameEventDescriptor,
        event: &RawGameEvent,
    ) -> Result<()> {
        if self.users.is_empty() && descriptor.name != "player_connect" {
            return Ok(());
        }

        let data = EventData::new(descriptor, event);
        self.derived.clear();
        match self.map_game_event(&data) {
            Ok(event) => {
                if let Some(event) = event {
                    self.emit(event);
                }
                let derived = std::mem::take(&mut self.derived);
                for event in derived {
                    self.emit(event);
                }
                Ok(())
            }
            Err(e) if e.is_event_local() => {
                error!("Dropping {}: {e}", data.name());
                self.derived.clear();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn map_game_event(&mut self, data: &EventData) -> Result<Option<Event>> {
        let event = match data.name() {
            "round_start" => Event::RoundStart(RoundStartEvent {
                time_limit: data.int("timelimit")?,
                frag_limit: data.int("fraglimit")?,
                objective: data.string("objective")?.to_string(),
            }),
            "cs_win_panel_match" => Event::WinPanelMatch,
            "round_announce_final" => Event::RoundFinal,
            "round_announce_last_round_half" => Event::LastRoundHalf,
            "round_officially_ended" => Event::RoundOfficiallyEnded,
            "round_announce_match_start" => Event::RoundAnnounceMatchStarted,
            "round_mvp" => Event::RoundMvp(RoundMvpEvent {
                player: self.user_ref(data.int("userid")?),
                reason: RoundMvpReason::try_from(data.int("reason")? as u8).ok(),
            }),
            "bot_takeover" => Event::BotTakeOver {
                taker: self.user_ref(data.int("userid")?),
            },
            "weapon_fire" => return self.weapon_fire(data),
            "player_death" => return self.player_death(data),
            "player_falldamage" => {
                let damage = data.float("damage")?;
                if let Some(player) = self.user(data.int("userid")?).and_then(|id| self.player_mut(id)) {
                    // below 1 there is no player_hurt
                    player.is_fallen = damage >= 1.0;
                }
                return Ok(None);
            }
            "player_hurt" => return self.player_hurt(data),
            "player_blind" => return self.player_blind(data),
            "flashbang_detonate" | "hegrenade_detonate" => return self.projectile_detonate(data),
            "smokegrenade_detonate" | "decoy_started" => return self.effect_started(data),
            "smokegrenade_expired" | "decoy_detonate" | "inferno_expire" => {
                return self.effect_ended(data)
            }
            "inferno_startburn" => {
                let (id, nade) = self.reported_nade(data)?;
                let event = self.reported_event(id, &nade);
                let fire = DetonateEntity::reported(id, DetonateKind::Fire, nade);
                self.detonates.insert(id, fire);
                Event::FireNadeStarted(event)
            }
            "player_connect" => {
                self.player_connect(data)?;
                return Ok(None);
            }
            "player_disconnect" => {
                let user_id = data.int("userid")?;
                let event = Event::PlayerDisconnect {
                    player: self.user_ref(user_id),
                };
                if let Some(slot) = self
                    .raw_players
                    .iter_mut()
                    .find(|raw| raw.as_ref().is_some_and(|raw| raw.user_id == user_id))
                {
                    *slot = None;
                }
                self.users.remove(&user_id);
                event
            }
            "player_team" => Event::PlayerTeam(PlayerTeamEvent {
                player: self.user_ref(data.int("userid")?),
                new_team: self.teams.side_of(data.int("team")?),
                old_team: self.teams.side_of(data.int("oldteam")?),
                is_bot: data.bool("isbot")?,
                silent: data.bool("silent")?,
            }),
            name => {
                trace!("Unhandled game event {name}");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }

    fn user_ref(&self, user_id: UserId) -> Option<PlayerRef> {
        self.user(user_id).and_then(|id| self.player_ref(id))
    }

    fn weapon_fire(&mut self, data: &EventData) -> Result<Option<Event>> {
        let mut weapon = Equipment::new(data.string("weapon")?);
        let Some(shooter) = self.user(data.int("userid")?) else {
            return Ok(Some(Event::WeaponFired(WeaponEvent {
                player: None,
                weapon,
            })));
        };

        if weapon.class() != EquipmentClass::Grenade {
            if let Some(active) = self.active_weapon(shooter) {
                weapon = active.clone();
            }
        }

        // the interpolated shot may have been raised already
        if let (Some(fired), Some(player)) = (weapon.entity_id, self.player_mut(shooter)) {
            if player.weapon_fire == Some(fired) {
                return Ok(None);
            }
            player.weapon_fire = Some(fired);
        }

        Ok(Some(Event::WeaponFired(WeaponEvent {
            player: self.player_ref(shooter),
            weapon,
        })))
    }

    fn player_death(&mut self, data: &EventData) -> Result<Option<Event>> {
        let victim = self.user(data.int("userid")?);
        let killer = self.user(data.int("attacker")?);
        let assister = self.user(data.int("assister")?);
        let headshot = data.bool("headshot")?;
        let penetrated_objects = data.int("penetrated")?;
        let name = data.string("weapon")?;
        let mut weapon = match data.opt_string("weapon_itemid")? {
            Some(skin) => Equipment::with_skin(name, skin),
            None => Equipment::new(name),
        };

        if weapon.weapon == EquipmentElement::World && !self.game.warmup_period {
            // team switches and fatal falls, no player_hurt precedes these
            let Some((victim, hp)) = victim
                .and_then(|id| self.player(id))
                .filter(|p| p.is_playing())
                .map(|p| (p.entity_id, p.hp))
            else {
                return Ok(None);
            };
            self.attribution.queue(QueuedHurt {
                attacker: Some(victim),
                victim,
                amount: hp,
                weapon: weapon.weapon,
            });
            let suicide = PlayerHurtEvent {
                player: self.player_ref(victim),
                attacker: self.player_ref(victim),
                health: 0,
                armor: 0,
                health_damage: hp,
                armor_damage: 0,
                hitgroup: Hitgroup::Generic,
                weapon: weapon.clone(),
            };
            self.emit(Event::PlayerHurt(suicide));
        }

        if let Some(killer) = killer {
            let replaceable = weapon.class() != EquipmentClass::Grenade
                && weapon.weapon != EquipmentElement::Revolver
                && weapon.weapon != EquipmentElement::World;
            if replaceable && self.player(killer).is_some_and(|p| p.has_weapons()) {
                if let Some(active) = self.active_weapon(killer) {
                    weapon = active.clone();
                }
            }
        }

        Ok(Some(Event::PlayerKilled(PlayerKilledEvent {
            victim: victim.and_then(|id| self.player_ref(id)),
            killer: killer.and_then(|id| self.player_ref(id)),
            assister: assister.and_then(|id| self.player_ref(id)),
            weapon,
            headshot,
            penetrated_objects,
        })))
    }

    fn player_hurt(&mut self, data: &EventData) -> Result<Option<Event>> {
        let attacker_id = data.int("attacker")?;
        let health = data.int("health")?;
        let armor = data.int("armor")?;
        let health_damage = data.int("dmg_health")?;
        let armor_damage = data.int("dmg_armor")?;
        let hitgroup = Hitgroup::try_from(data.int("hitgroup")? as u8).unwrap_or_default();
        let name = data.string("weapon")?;

        let user_id = data.int("userid")?;
        let Some(victim) = self.user(user_id) else {
            warn!("Hurt for unknown user {user_id}");
            return Ok(None);
        };
        let mut attacker = self.user(attacker_id);
        let mut weapon = Equipment::new(name);

        if let Some(attacker) = attacker {
            if weapon.class() != EquipmentClass::Grenade {
                if let Some(active) = self.active_weapon(attacker) {
                    weapon = active.clone();
                }
            }
        }

        if attacker_id == 0 && name.is_empty() {
            let fallen = self.player(victim).is_some_and(|p| p.is_fallen);
            if fallen {
                // fall and bomb damage on the same tick can not be told apart
                attacker = Some(victim);
                weapon = Equipment::of(EquipmentElement::World);
                if let Some(player) = self.player_mut(victim) {
                    player.is_fallen = false;
                }
            } else {
                attacker = self.planted_bomb.as_ref().and_then(|b| b.base.owner);
                weapon = Equipment::of(EquipmentElement::Bomb);
            }

            // bomb deaths have no player_death, fatal falls report worldspawn
            if health == 0 && weapon.weapon != EquipmentElement::World {
                let kill = PlayerKilledEvent {
                    victim: self.player_ref(victim),
                    killer: attacker.and_then(|id| self.player_ref(id)),
                    assister: None,
                    weapon: weapon.clone(),
                    headshot: false,
                    penetrated_objects: 0,
                };
                self.derived.push(Event::PlayerKilled(kill));
            }
        }

        if !self.game.warmup_period {
            let hp = self.player(victim).map_or(0, |p| p.hp);
            let left = hp - self.attribution.queued_damage(victim);
            self.attribution.queue(QueuedHurt {
                attacker,
                victim,
                amount: health_damage.min(left),
                weapon: weapon.weapon,
            });
        }

        Ok(Some(Event::PlayerHurt(PlayerHurtEvent {
            player: self.player_ref(victim),
            attacker: attacker.and_then(|id| self.player_ref(id)),
            health,
            armor,
            health_damage,
            armor_damage,
            hitgroup,
            weapon,
        })))
    }

    fn player_blind(&mut self, data: &EventData) -> Result<Option<Event>> {
        let Some(id) = self.user(data.int("userid")?) else {
            return Ok(None);
        };
        let attacker = match data.opt_int("attacker")? {
            Some(user_id) => self.user_ref(user_id),
            None => None,
        };
        let duration = data.opt_float("blind_duration")?;
        let flashbang_id = data.opt_int("entityid")?;

        // flashed players are attached to the next flashbang_detonate
        self.blind_players.push(id);

        let Some(player) = self.player(id).filter(|p| p.team != Team::Spectate) else {
            return Ok(None);
        };
        Ok(Some(Event::Blind(BlindEvent {
            player: self.player_ref(player.entity_id),
            attacker,
            duration,
            flashbang_id,
        })))
    }

    fn reported_nade(&self, data: &EventData) -> Result<(EntityId, NadeState)> {
        let id = data.int("entityid")? as EntityId;
        let thrower = match data.opt_int("userid")? {
            Some(user_id) => self.user(user_id),
            None => None,
        };
        let position = Vector::new(data.float("x")?, data.float("y")?, data.float("z")?);
        Ok((
            id,
            NadeState {
                thrower,
                position,
                interpolated: false,
            },
        ))
    }

    fn reported_event(&self, id: EntityId, nade: &NadeState) -> NadeEvent {
        NadeEvent {
            entity_id: Some(id),
            thrown_by: nade.thrower.and_then(|id| self.player_ref(id)),
            position: nade.position,
            interpolated: false,
        }
    }

    /// Explosions are reported by the server, the projectile entity only
    /// fills in a missing thrower, and only when its radius agrees with the
    /// kind of explosion.
    fn projectile_detonate(&mut self, data: &EventData) -> Result<Option<Event>> {
        let (id, mut nade) = self.reported_nade(data)?;
        let flash = data.name() == "flashbang_detonate";

        let matches = match self.detonates.get(&id).map(|det| det.kind) {
            Some(DetonateKind::Projectile { explosive, .. }) => {
                if explosive == Some(flash) {
                    warn!("Projectile {id} does not look like a {}", data.name());
                    false
                } else {
                    true
                }
            }
            _ => false,
        };
        if matches {
            if let Some(projectile) = self.detonates.remove(&id) {
                if nade.thrower.is_none() {
                    nade.thrower = projectile.base.owner;
                }
            }
        }

        let event = self.reported_event(id, &nade);
        if !flash {
            return Ok(Some(Event::ExplosiveNadeExploded(event)));
        }

        let flashed_players = std::mem::take(&mut self.blind_players)
            .into_iter()
            .filter_map(|id| self.player_ref(id))
            .collect();
        Ok(Some(Event::FlashNadeExploded(FlashEvent {
            nade: event,
            flashed_players,
        })))
    }

    fn effect_started(&mut self, data: &EventData) -> Result<Option<Event>> {
        let (id, nade) = self.reported_nade(data)?;
        let event = self.reported_event(id, &nade);

        match self.detonates.get_mut(&id) {
            Some(det) => {
                det.state = DetonateState::Detonating;
                det.nade = nade;
            }
            None => debug!("{} for unknown entity {id}", data.name()),
        }

        Ok(Some(if data.name() == "decoy_started" {
            Event::DecoyNadeStarted(event)
        } else {
            Event::SmokeNadeStarted(event)
        }))
    }

    fn effect_ended(&mut self, data: &EventData) -> Result<Option<Event>> {
        let (id, mut nade) = self.reported_nade(data)?;
        let effect = self.detonates.remove(&id);

        let event = match data.name() {
            "inferno_expire" => {
                // the expiry names no thrower
                nade.thrower = effect.and_then(|fire| fire.nade.thrower);
                Event::FireNadeEnded(self.reported_event(id, &nade))
            }
            "decoy_detonate" => Event::DecoyNadeEnded(self.reported_event(id, &nade)),
            _ => Event::SmokeNadeEnded(self.reported_event(id, &nade)),
        };
        Ok(Some(event))
    }

    fn player_connect(&mut self, data: &EventData) -> Result<()> {
        let index = data.int("index")?;
        let guid = data.string("networkid")?;
        let is_bot = guid == "BOT";
        let xuid = if is_bot {
            0
        } else {
            community_id(guid).unwrap_or_else(|| {
                warn!("Unparsable network id {guid}");
                0
            })
        };
        let raw = RawPlayer {
            user_id: data.int("userid")?,
            name: data.string("name")?.to_string(),
            xuid,
            guid: guid.to_string(),
            is_fake_player: is_bot,
        };

        match usize::try_from(index).ok().and_then(|i| self.raw_players.get_mut(i)) {
            Some(slot) => *slot = Some(raw),
            None => warn!("player_connect for slot {index} out of range"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> GameEventDescriptor {
        let key = |kind, name: &str| GameEventKey {
            kind,
            name: name.to_string(),
        };
        GameEventDescriptor {
            event_id: 24,
            name: "player_hurt".to_string(),
            keys: vec![
                key(EventValueKind::Short, "userid"),
                key(EventValueKind::String, "weapon"),
                key(EventValueKind::Byte, "health"),
            ],
        }
    }

    #[test]
    fn values_are_keyed_by_name() {
        let descriptor = descriptor();
        let event = RawGameEvent {
            event_id: 24,
            keys: vec![
                EventValue::Short(7),
                EventValue::String("ak47".to_string()),
                EventValue::Byte(73),
            ],
        };
        let data = EventData::new(&descriptor, &event);

        assert_eq!(data.int("userid").unwrap(), 7);
        assert_eq!(data.int("health").unwrap(), 73);
        assert_eq!(data.string("weapon").unwrap(), "ak47");
        assert_eq!(data.opt_float("blind_duration").unwrap(), None);
        assert!(matches!(
            data.float("userid"),
            Err(ParseError::EventKeyType { .. })
        ));
        assert!(matches!(
            data.int("attacker"),
            Err(ParseError::MissingEventKey { ref key, .. }) if key == "attacker"
        ));
    }

    #[test]
    fn community_ids() {
        assert_eq!(community_id("STEAM_1:1:12345"), Some(76561197960290419));
        assert_eq!(community_id("STEAM_0:0:0"), Some(STEAM_ID_BASE));
        assert_eq!(community_id("BOT"), None);
    }
}
