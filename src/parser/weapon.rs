use crate::parser::game::EntityId;
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd, Default)]
pub enum EquipmentElement {
    #[default]
    Unknown,

    // Pistols
    P2000,
    Glock,
    P250,
    Deagle,
    FiveSeven,
    DualBarettas,
    Tec9,
    Cz,
    Usp,
    Revolver,

    // SMGs
    Mp7,
    Mp9,
    Bizon,
    Mac10,
    Ump,
    P90,
    Mp5Sd,

    // Heavy
    SawedOff,
    Nova,
    Swag7,
    Xm1014,
    M249,
    Negev,

    // Rifles
    Gallil,
    Famas,
    Ak47,
    M4a4,
    M4a1,
    Scout,
    Sg556,
    Aug,
    Awp,
    Scar20,
    G3sg1,

    // Equipment
    Zeus,
    Kevlar,
    Helmet,
    Bomb,
    Knife,
    DefuseKit,
    World,

    // Grenades
    Decoy,
    Molotov,
    Incendiary,
    Flash,
    Smoke,
    He,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EquipmentClass {
    #[default]
    Unknown,
    Pistol,
    Smg,
    Heavy,
    Rifle,
    Equipment,
    Grenade,
}

impl EquipmentElement {
    pub fn class(self) -> EquipmentClass {
        use EquipmentElement::*;
        match self {
            Unknown => EquipmentClass::Unknown,
            P2000 | Glock | P250 | Deagle | FiveSeven | DualBarettas | Tec9 | Cz | Usp
            | Revolver => EquipmentClass::Pistol,
            Mp7 | Mp9 | Bizon | Mac10 | Ump | P90 | Mp5Sd => EquipmentClass::Smg,
            SawedOff | Nova | Swag7 | Xm1014 | M249 | Negev => EquipmentClass::Heavy,
            Gallil | Famas | Ak47 | M4a4 | M4a1 | Scout | Sg556 | Aug | Awp | Scar20 | G3sg1 => {
                EquipmentClass::Rifle
            }
            Zeus | Kevlar | Helmet | Bomb | Knife | DefuseKit | World => {
                EquipmentClass::Equipment
            }
            Decoy | Molotov | Incendiary | Flash | Smoke | He => EquipmentClass::Grenade,
        }
    }

    pub fn is_grenade(self) -> bool {
        self.class() == EquipmentClass::Grenade
    }

    /// Map a weapon name as found in game events or class names.
    pub fn from_name(name: &str) -> Self {
        use EquipmentElement::*;

        let name = name.strip_prefix("weapon_").unwrap_or(name);
        if name.contains("knife") || name == "bayonet" {
            return Knife;
        }

        match name {
            "ak47" => Ak47,
            "aug" => Aug,
            "awp" => Awp,
            "bizon" => Bizon,
            "c4" | "planted_c4" => Bomb,
            "deagle" => Deagle,
            "decoy" | "decoygrenade" | "decoyprojectile" | "decoy_projectile" => Decoy,
            "elite" => DualBarettas,
            "famas" => Famas,
            "fiveseven" => FiveSeven,
            "flashbang" => Flash,
            "g3sg1" => G3sg1,
            "galil" | "galilar" => Gallil,
            "glock" => Glock,
            "hegrenade" => He,
            "hkp2000" => P2000,
            "incgrenade" | "incendiarygrenade" | "inferno" => Incendiary,
            "m249" => M249,
            "m4a1" => M4a4,
            "m4a1_silencer" | "m4a1_silencer_off" => M4a1,
            "mac10" => Mac10,
            "mag7" => Swag7,
            "molotov" | "molotovgrenade" | "molotov_projectile" => Molotov,
            "mp5sd" => Mp5Sd,
            "mp7" => Mp7,
            "mp9" => Mp9,
            "negev" => Negev,
            "nova" => Nova,
            "p250" => P250,
            "p90" => P90,
            "sawedoff" => SawedOff,
            "scar20" => Scar20,
            "sg556" => Sg556,
            "smokegrenade" => Smoke,
            "ssg08" => Scout,
            "taser" => Zeus,
            "tec9" => Tec9,
            "ump45" => Ump,
            "xm1014" => Xm1014,
            "cz75a" => Cz,
            "usp" | "usp_silencer" | "usp_silencer_off" => Usp,
            "revolver" => Revolver,
            "world" | "worldspawn" => World,
            "vesthelm" => Helmet,
            "vest" => Kevlar,
            "defuser" => DefuseKit,
            _ => {
                trace!("Unknown weapon name: {name}");
                Unknown
            }
        }
    }

    /// Families whose variants share a server class and are told apart by
    /// the model they render.
    pub fn has_model_variants(self) -> bool {
        matches!(
            self,
            EquipmentElement::P2000
                | EquipmentElement::M4a4
                | EquipmentElement::P250
                | EquipmentElement::Deagle
        )
    }

    /// Resolve the variant of a shared-class family from its model path.
    pub fn from_model(self, model: &str) -> Option<Self> {
        use EquipmentElement::*;

        // Longer patterns first, "_rif_m4a1" is a prefix of "_rif_m4a1_s".
        let variants: &[(&str, EquipmentElement)] = match self {
            P2000 | Usp => &[("_pist_223", Usp), ("_pist_hkp2000", P2000)],
            M4a4 | M4a1 => &[("_rif_m4a1_s", M4a1), ("_rif_m4a1", M4a4)],
            P250 | Cz => &[("_pist_cz_75", Cz), ("_pist_p250", P250)],
            Deagle | Revolver => &[("_pist_deagle", Deagle), ("_pist_revolver", Revolver)],
            _ => return Some(self),
        };

        variants
            .iter()
            .find(|(pattern, _)| model.contains(pattern))
            .map(|(_, weapon)| *weapon)
    }
}

/// A weapon instance, either held by a player or described by an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Equipment {
    pub entity_id: Option<EntityId>,
    pub weapon: EquipmentElement,
    pub original_string: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skin_id: Option<String>,
    pub ammo_in_magazine: i32,
    pub ammo_type: i32,
    /// Entity id of the owning player.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<EntityId>,
    #[serde(skip)]
    pub(crate) created_tick: i32,
}

impl Equipment {
    pub fn new(name: &str) -> Self {
        Equipment {
            weapon: EquipmentElement::from_name(name),
            original_string: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_skin(name: &str, skin: &str) -> Self {
        Equipment {
            skin_id: Some(skin.to_string()),
            ..Equipment::new(name)
        }
    }

    pub fn of(weapon: EquipmentElement) -> Self {
        Equipment {
            weapon,
            ..Default::default()
        }
    }

    pub fn class(&self) -> EquipmentClass {
        self.weapon.class()
    }
}
