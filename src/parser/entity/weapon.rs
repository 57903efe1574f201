use crate::parser::analyzer::{MatchAnalyzer, PendingAction};
use crate::parser::entity::{EntityBinder, Listener, PropertyUpdate};
use crate::parser::events::{Event, WeaponEvent};
use crate::parser::game::EntityId;
use crate::parser::props::*;
use crate::parser::weapon::EquipmentElement;
use crate::schema::{ClassTable, ServerClass};
use crate::{ParseError, Result};
use fnv::FnvHashMap;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaponProp {
    Clip,
    PrimaryAmmoType,
    ModelIndex,
    LastShotTime,
    LastMadeNoiseTime,
    BurstShotsRemaining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrenadeProp {
    Owner,
    State,
    ThrowTime,
}

// m_iState while the weapon sits in an inventory
const WEAPON_IS_CARRIED_BY_PLAYER: i32 = 1;

/// A grenade still in someone's hands.
#[derive(Debug, Clone, PartialEq)]
pub struct GrenadeWeapon {
    pub kind: EquipmentElement,
    pub thrower: Option<EntityId>,
    pub state: Option<i32>,
    created_tick: u32,
}

impl GrenadeWeapon {
    pub fn for_class(name: &str) -> Option<EquipmentElement> {
        match name {
            "CMolotovGrenade" => Some(EquipmentElement::Molotov),
            "CIncendiaryGrenade" => Some(EquipmentElement::Incendiary),
            "CSmokeGrenade" => Some(EquipmentElement::Smoke),
            "CHEGrenade" => Some(EquipmentElement::He),
            "CFlashbang" => Some(EquipmentElement::Flash),
            "CDecoyGrenade" => Some(EquipmentElement::Decoy),
            _ => None,
        }
    }
}

/// Work out which weapon every weapon class represents, from its base classes.
pub fn map_equipment(classes: &ClassTable) -> FnvHashMap<u32, EquipmentElement> {
    let mut mapping = FnvHashMap::default();
    for class in classes.iter() {
        if let Some(weapon) = equipment_for_class(class) {
            mapping.insert(class.id, weapon);
        }
    }
    mapping
}

fn equipment_for_class(class: &ServerClass) -> Option<EquipmentElement> {
    if class.base_class(6) != Some("CWeaponCSBase") {
        return None;
    }

    if class.base_classes.len() > 7 {
        let name = match class.base_class(7) {
            Some("CWeaponCSBaseGun") => class.dt_name.strip_prefix("DT_Weapon"),
            Some("CBaseCSGrenade") => class.dt_name.strip_prefix("DT_"),
            _ => None,
        };
        if let Some(name) = name {
            return Some(EquipmentElement::from_name(&name.to_lowercase()));
        }
    }

    match class.name.as_str() {
        "CC4" => Some(EquipmentElement::Bomb),
        name if name.starts_with("CKnife") || class.derives_from("CKnife") => {
            Some(EquipmentElement::Knife)
        }
        "CWeaponNOVA" | "CWeaponSawedoff" | "CWeaponXM1014" => {
            let name = class.name.strip_prefix("CWeapon")?;
            Some(EquipmentElement::from_name(&name.to_lowercase()))
        }
        _ => None,
    }
}

impl MatchAnalyzer {
    pub(crate) fn bind_weapon(&mut self, binder: &mut EntityBinder<'_>) {
        let id = binder.id();
        let weapon = match self.equipment_mapping.get(&binder.class().id) {
            Some(weapon) => *weapon,
            None => {
                trace!("No equipment for {}", binder.class().name);
                EquipmentElement::Unknown
            }
        };

        // the slot may already be owned, a player can reference the weapon
        // before its entity arrives
        let equipment = &mut self.weapons[id as usize];
        equipment.entity_id = Some(id);
        equipment.weapon = weapon;
        equipment.ammo_in_magazine = -1;
        equipment.created_tick = self.tick.ingame_tick;

        binder.bind(CLIP, Listener::Weapon(WeaponProp::Clip));
        binder.bind(PRIMARY_AMMO_TYPE, Listener::Weapon(WeaponProp::PrimaryAmmoType));
        if weapon.has_model_variants() {
            binder.bind(MODEL, Listener::Weapon(WeaponProp::ModelIndex));
        }

        match weapon {
            // secondary knife attacks have no weapon_fire and no shot time
            EquipmentElement::Knife => {
                binder.bind(LAST_MADE_NOISE_TIME, Listener::Weapon(WeaponProp::LastMadeNoiseTime));
            }
            EquipmentElement::Glock => {
                binder.bind(BURST_SHOTS_REMAINING, Listener::Weapon(WeaponProp::BurstShotsRemaining));
            }
            _ => {}
        }
        binder.bind(LAST_SHOT_TIME, Listener::Weapon(WeaponProp::LastShotTime));
    }

    pub(crate) fn handle_weapon_prop(
        &mut self,
        id: EntityId,
        prop: WeaponProp,
        update: PropertyUpdate<'_>,
    ) {
        let equipment = &mut self.weapons[id as usize];
        match prop {
            WeaponProp::Clip => {
                if let Some(clip) = update.value.as_int() {
                    equipment.ammo_in_magazine = clip - 1;
                }
            }
            WeaponProp::PrimaryAmmoType => {
                if let Some(ammo_type) = update.value.as_int() {
                    equipment.ammo_type = ammo_type;
                }
            }
            WeaponProp::ModelIndex => {
                if let Some(model) = update.value.as_int() {
                    self.actions
                        .push_back(PendingAction::ResolveWeaponModel { weapon: id, model });
                }
            }
            WeaponProp::LastShotTime
            | WeaponProp::LastMadeNoiseTime
            | WeaponProp::BurstShotsRemaining => self.interpolate_weapon_fire(id),
        }
    }

    /// Families sharing a class are told apart by the model they render.
    pub(crate) fn resolve_weapon_model(&mut self, id: EntityId, model: i32) -> Result<()> {
        let Some(name) = self.model_precache.get(&model) else {
            warn!("Model index {model} of weapon {id} is not precached");
            return Ok(());
        };

        let equipment = &mut self.weapons[id as usize];
        equipment.original_string = name.clone();
        match equipment.weapon.from_model(name) {
            Some(weapon) => {
                equipment.weapon = weapon;
                Ok(())
            }
            None => Err(ParseError::UnknownWeaponModel {
                weapon: equipment.weapon,
                model: name.clone(),
            }),
        }
    }

    fn interpolate_weapon_fire(&mut self, id: EntityId) {
        let ingame_tick = self.tick.ingame_tick;
        let equipment = &self.weapons[id as usize];
        // values arriving with the entity are not shots
        if equipment.created_tick == ingame_tick || ingame_tick == 0 {
            return;
        }
        let Some(owner) = equipment.owner else {
            return;
        };
        let Some(player) = self.player_mut(owner) else {
            return;
        };
        if player.weapon_fire == Some(id) {
            return;
        }
        player.weapon_fire = Some(id);

        let event = WeaponEvent {
            player: self.player_ref(owner),
            weapon: self.weapons[id as usize].clone(),
        };
        self.emit(Event::WeaponFired(event));
    }

    pub(crate) fn bind_grenade(&mut self, binder: &mut EntityBinder<'_>, kind: EquipmentElement) {
        binder.bind(OWNER, Listener::Grenade(GrenadeProp::Owner));
        binder.bind(WEAPON_STATE, Listener::Grenade(GrenadeProp::State));
        binder.bind(THROW_TIME, Listener::Grenade(GrenadeProp::ThrowTime));
        self.grenades.insert(
            binder.id(),
            GrenadeWeapon {
                kind,
                thrower: None,
                state: None,
                created_tick: self.tick.current_tick,
            },
        );
    }

    pub(crate) fn handle_grenade_prop(
        &mut self,
        id: EntityId,
        prop: GrenadeProp,
        update: PropertyUpdate<'_>,
    ) {
        let owner = match prop {
            GrenadeProp::Owner => update.value.as_int().and_then(|h| self.owner_from_handle(h)),
            _ => None,
        };
        let Some(grenade) = self.grenades.get_mut(&id) else {
            return;
        };

        match prop {
            GrenadeProp::Owner => {
                if owner.is_some() {
                    grenade.thrower = owner;
                }
            }
            // switching weapons mid throw resets the throw time and sets
            // the weapon back to carried
            GrenadeProp::State => grenade.state = update.value.as_int(),
            GrenadeProp::ThrowTime => {
                if update.value.as_float() != Some(0.0)
                    || grenade.state == Some(WEAPON_IS_CARRIED_BY_PLAYER)
                    || grenade.created_tick == self.tick.current_tick
                {
                    return;
                }
                let (kind, thrower) = (grenade.kind, grenade.thrower);
                if let Some(thrower) = thrower {
                    self.grenade_released(thrower, kind);
                }
            }
        }
    }

    /// Throwing on top of a grenade of the same type does not always move
    /// the ammo counter, so the drop is raised from the throw time instead.
    fn grenade_released(&mut self, thrower: EntityId, kind: EquipmentElement) {
        let Some(player) = self.player(thrower) else {
            return;
        };
        if player.steam_id == -1 || player.threw_nade {
            return;
        }
        let weapon = player
            .weapons()
            .map(|id| &self.weapons[id as usize])
            .find(|w| w.weapon == kind)
            .cloned();
        let Some(weapon) = weapon else {
            debug!("Player {thrower} released a {kind:?} it does not hold");
            return;
        };

        let event = WeaponEvent {
            player: self.player_ref(thrower),
            weapon,
        };
        self.emit(Event::DropWeapon(event));
    }
}
