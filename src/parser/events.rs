use crate::parser::game::{
    EntityId, Hitgroup, RoundEndReason, RoundMvpReason, Team, TickInfo, UserId, Vector,
};
use crate::parser::weapon::Equipment;
use serde::Serialize;

/// Identity of a player at the moment an event was raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerRef {
    pub user_id: UserId,
    pub entity_id: EntityId,
    pub name: String,
    pub steam_id: i64,
    pub team: Team,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundStartEvent {
    pub time_limit: i32,
    pub frag_limit: i32,
    pub objective: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundEndEvent {
    pub reason: Option<RoundEndReason>,
    pub winner: Team,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundMvpEvent {
    pub player: Option<PlayerRef>,
    pub reason: Option<RoundMvpReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerTeamEvent {
    pub player: Option<PlayerRef>,
    pub new_team: Team,
    pub old_team: Team,
    pub is_bot: bool,
    pub silent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlayerStat {
    Health(i32),
    Armor(i32),
    Money(i32),
    Helmet(bool),
    DefuseKit(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerHurtEvent {
    pub player: Option<PlayerRef>,
    pub attacker: Option<PlayerRef>,
    /// Health left after the hit.
    pub health: i32,
    pub armor: i32,
    pub health_damage: i32,
    pub armor_damage: i32,
    pub hitgroup: Hitgroup,
    pub weapon: Equipment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerKilledEvent {
    pub victim: Option<PlayerRef>,
    pub killer: Option<PlayerRef>,
    pub assister: Option<PlayerRef>,
    pub weapon: Equipment,
    pub headshot: bool,
    pub penetrated_objects: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeaponEvent {
    pub player: Option<PlayerRef>,
    pub weapon: Equipment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BombEvent {
    pub player: Option<PlayerRef>,
    pub site: char,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BombDefuseEvent {
    pub player: Option<PlayerRef>,
    pub has_kit: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NadeEvent {
    pub entity_id: Option<EntityId>,
    pub thrown_by: Option<PlayerRef>,
    pub position: Vector,
    /// Derived from entity state rather than reported by the server.
    pub interpolated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlashEvent {
    #[serde(flatten)]
    pub nade: NadeEvent,
    pub flashed_players: Vec<PlayerRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlindEvent {
    pub player: Option<PlayerRef>,
    pub attacker: Option<PlayerRef>,
    pub duration: Option<f32>,
    pub flashbang_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    MatchStarted,
    RoundAnnounceMatchStarted,
    RoundStart(RoundStartEvent),
    RoundEnd(RoundEndEvent),
    RoundOfficiallyEnded,
    RoundMvp(RoundMvpEvent),
    RoundFinal,
    LastRoundHalf,
    WinPanelMatch,
    FreezetimeStarted,
    FreezetimeEnded,

    PlayerBind { player: PlayerRef },
    PlayerDisconnect { player: Option<PlayerRef> },
    PlayerTeam(PlayerTeamEvent),
    BotTakeOver { taker: Option<PlayerRef> },
    PlayerKillInfo { player: PlayerRef, kills: i32 },
    PlayerStatUpdated { player: PlayerRef, stat: PlayerStat },

    PlayerHurt(PlayerHurtEvent),
    PlayerKilled(PlayerKilledEvent),
    Blind(BlindEvent),

    WeaponFired(WeaponEvent),
    PickupWeapon(WeaponEvent),
    DropWeapon(WeaponEvent),

    BombBeginPlant(BombEvent),
    BombAbortPlant(BombEvent),
    BombPlanted(BombEvent),
    BombBeginDefuse(BombDefuseEvent),
    BombAbortDefuse(BombDefuseEvent),
    BombDefused(BombEvent),
    BombExploded(BombEvent),

    SmokeNadeStarted(NadeEvent),
    SmokeNadeEnded(NadeEvent),
    DecoyNadeStarted(NadeEvent),
    DecoyNadeEnded(NadeEvent),
    FireNadeStarted(NadeEvent),
    FireNadeWithOwnerStarted(NadeEvent),
    FireNadeEnded(NadeEvent),
    ExplosiveNadeExploded(NadeEvent),
    FlashNadeExploded(FlashEvent),

    TickDone,
}

/// Consumer of the reconstructed event stream.
pub trait EventHandler {
    type Output;

    fn handle_event(&mut self, tick: &TickInfo, event: Event);

    fn into_output(self) -> Self::Output;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedEvent {
    pub tick: u32,
    pub ingame_tick: i32,
    pub event: Event,
}

/// Collects every event, skipping the per tick `TickDone` markers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventLog {
    pub ticks: u32,
    pub events: Vec<LoggedEvent>,
}

impl EventHandler for EventLog {
    type Output = EventLog;

    fn handle_event(&mut self, tick: &TickInfo, event: Event) {
        if let Event::TickDone = event {
            self.ticks += 1;
            return;
        }
        self.events.push(LoggedEvent {
            tick: tick.current_tick,
            ingame_tick: tick.ingame_tick,
            event,
        });
    }

    fn into_output(self) -> Self::Output {
        self
    }
}

impl EventLog {
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|e| &e.event)
    }
}
