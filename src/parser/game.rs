use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

pub type EntityId = u32;
pub type UserId = i32;

pub const MAX_EDICT_BITS: u32 = 11;
pub const INDEX_MASK: i32 = (1 << MAX_EDICT_BITS) - 1;
pub const MAX_ENTITIES: usize = 1 << MAX_EDICT_BITS;
pub const MAX_PLAYERS: usize = 64;
pub const MAX_WEAPONS: usize = 64;
pub const MAX_AMMO_TYPES: usize = 32;
pub const MAX_ROUND_STATS: usize = 30;
pub const ENTITY_SERIAL_BITS: usize = 10;

pub const MAX_COORD_INTEGER: i32 = 16384;
// Used when no CBaseEntity ever reported m_cellbits
pub const DEFAULT_CELL_BITS: i32 = 5;

/// Damage radius of an explosive grenade projectile. Flashbangs report
/// something else once the property settles.
pub const HE_DAMAGE_RADIUS: f32 = 350.0;

pub const STEAM_ID_BASE: i64 = 76561197960265728;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vector { x, y, z }
    }

    pub fn distance(&self, other: &Vector) -> f32 {
        let d = *self - *other;
        (d.x * d.x + d.y * d.y + d.z * d.z).sqrt()
    }
}

impl Add for Vector {
    type Output = Vector;

    fn add(self, rhs: Vector) -> Vector {
        Vector::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector {
    type Output = Vector;

    fn sub(self, rhs: Vector) -> Vector {
        Vector::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TryFromPrimitive,
)]
#[repr(u8)]
pub enum Team {
    #[default]
    Unassigned = 0,
    Spectate = 1,
    Terrorist = 2,
    CounterTerrorist = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive)]
#[repr(u8)]
pub enum RoundEndReason {
    TargetBombed = 1,
    VipEscaped,
    VipKilled,
    TerroristsEscaped,
    CtStoppedEscape,
    TerroristsStopped,
    BombDefused,
    CtWin,
    TerroristWin,
    Draw,
    HostagesRescued,
    TargetSaved,
    HostagesNotRescued,
    TerroristsNotEscaped,
    VipNotEscaped,
    GameStart,
    TerroristsSurrender,
    CtSurrender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive)]
#[repr(u8)]
pub enum RoundMvpReason {
    MostEliminations = 1,
    BombPlanted,
    BombDefused,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive,
)]
#[repr(u8)]
pub enum Hitgroup {
    #[default]
    Generic = 0,
    Head = 1,
    Chest = 2,
    Stomach = 3,
    LeftArm = 4,
    RightArm = 5,
    LeftLeg = 6,
    RightLeg = 7,
    Gear = 10,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive,
)]
#[repr(u8)]
pub enum GamePhase {
    #[default]
    Init = 0,
    Pregame = 1,
    StartGamePhase = 2,
    TeamSideSwitch = 3,
    GameHalfEnded = 4,
    GameEnded = 5,
}

/// Match wide flags driven by the game rules entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GameInfo {
    pub warmup_period: bool,
    pub freeze_period: bool,
    pub paused: bool,
    pub restarting: bool,
    pub match_started: bool,
    pub round_time: i32,
    pub game_phase: GamePhase,
    pub total_rounds_played: i32,
    pub round_win_status: i32,
}

/// Team side bookkeeping from the CCSTeam entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Teams {
    pub ct_id: i32,
    pub t_id: i32,
    pub ct_score: i32,
    pub t_score: i32,
    pub ct_clan_name: String,
    pub t_clan_name: String,
    pub ct_flag: String,
    pub t_flag: String,
}

impl Default for Teams {
    fn default() -> Self {
        Teams {
            ct_id: -1,
            t_id: -1,
            ct_score: 0,
            t_score: 0,
            ct_clan_name: String::new(),
            t_clan_name: String::new(),
            ct_flag: String::new(),
            t_flag: String::new(),
        }
    }
}

impl Teams {
    pub fn side_of(&self, team_num: i32) -> Team {
        if team_num == self.ct_id {
            Team::CounterTerrorist
        } else if team_num == self.t_id {
            Team::Terrorist
        } else {
            Team::Spectate
        }
    }

    pub fn total_score(&self) -> i32 {
        self.ct_score + self.t_score
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TickInfo {
    /// Frames consumed so far, starting at 1.
    pub current_tick: u32,
    /// Server tick reported by the demo.
    pub ingame_tick: i32,
    pub current_time: f32,
}
