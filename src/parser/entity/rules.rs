use crate::parser::analyzer::MatchAnalyzer;
use crate::parser::entity::{EntityBinder, Listener, PropertyUpdate};
use crate::parser::events::{Event, RoundEndEvent};
use crate::parser::game::{EntityId, GamePhase, RoundEndReason, Team, MAX_PLAYERS};
use crate::parser::props::*;
use serde::Serialize;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceProp {
    Clan(u8),
    Ping(u8),
    Score(u8),
    Kills(u8),
    Deaths(u8),
    Assists(u8),
    Mvps(u8),
    CashSpent(u8),
    BombsiteA,
    BombsiteB,
}

/// Scoreboard columns of one player, from the player resource entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerResource {
    pub clan_tag: String,
    pub ping: i32,
    pub score: i32,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    pub mvps: i32,
    pub total_cash_spent: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamProp {
    Score,
    TeamNum,
    Name,
    ClanName,
    Flag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamEntity {
    pub name: String,
    pub team_num: i32,
    pub score: i32,
    pub clan_name: String,
    pub flag: String,
}

impl Default for TeamEntity {
    fn default() -> Self {
        TeamEntity {
            name: String::new(),
            team_num: -1,
            score: 0,
            clan_name: String::new(),
            flag: String::new(),
        }
    }
}

impl TeamEntity {
    /// Only the two playing teams are tracked, by their internal name.
    pub fn side(&self) -> Option<Team> {
        match self.name.as_str() {
            "CT" => Some(Team::CounterTerrorist),
            "TERRORIST" => Some(Team::Terrorist),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulesProp {
    RoundWinStatus,
    RoundWinReason,
    GameRestart,
    WarmupPeriod,
    RoundTime,
    GamePhase,
    Paused,
    TotalRoundsPlayed,
    MatchStarted,
    FreezePeriod,
}

impl MatchAnalyzer {
    pub(crate) fn bind_resource(&mut self, binder: &mut EntityBinder<'_>) {
        let columns: [(&str, fn(u8) -> ResourceProp); 8] = [
            (CLAN_PREFIX, ResourceProp::Clan),
            (PING_PREFIX, ResourceProp::Ping),
            (SCORE_PREFIX, ResourceProp::Score),
            (KILLS_PREFIX, ResourceProp::Kills),
            (DEATHS_PREFIX, ResourceProp::Deaths),
            (ASSISTS_PREFIX, ResourceProp::Assists),
            (MVPS_PREFIX, ResourceProp::Mvps),
            (CASH_SPENT_PREFIX, ResourceProp::CashSpent),
        ];
        // slot 0 is the world
        for player in 1..=MAX_PLAYERS {
            for (prefix, prop) in &columns {
                binder.bind(&indexed(prefix, player), Listener::Resource(prop(player as u8)));
            }
        }
        binder.bind(BOMBSITE_CENTER_A, Listener::Resource(ResourceProp::BombsiteA));
        binder.bind(BOMBSITE_CENTER_B, Listener::Resource(ResourceProp::BombsiteB));
    }

    pub(crate) fn handle_resource_prop(&mut self, prop: ResourceProp, update: PropertyUpdate<'_>) {
        let value = update.value;
        let int = value.as_int().unwrap_or_default();

        let (player, column) = match prop {
            ResourceProp::BombsiteA => {
                self.bombsite_a = value.as_vector().unwrap_or_default();
                return;
            }
            ResourceProp::BombsiteB => {
                self.bombsite_b = value.as_vector().unwrap_or_default();
                return;
            }
            ResourceProp::Clan(p)
            | ResourceProp::Ping(p)
            | ResourceProp::Score(p)
            | ResourceProp::Kills(p)
            | ResourceProp::Deaths(p)
            | ResourceProp::Assists(p)
            | ResourceProp::Mvps(p)
            | ResourceProp::CashSpent(p) => (p as usize, prop),
        };
        let Some(resource) = self.resources.get_mut(player) else {
            return;
        };

        match column {
            ResourceProp::Clan(_) => {
                resource.clan_tag = value.as_str().unwrap_or_default().to_string();
            }
            ResourceProp::Ping(_) => resource.ping = int,
            ResourceProp::Score(_) => resource.score = int,
            ResourceProp::Kills(_) => {
                resource.kills = int;
                if self.users.is_empty() {
                    return;
                }
                if let Some(player) = self.player_ref(player as EntityId) {
                    self.emit(Event::PlayerKillInfo { player, kills: int });
                }
            }
            ResourceProp::Deaths(_) => resource.deaths = int,
            ResourceProp::Assists(_) => resource.assists = int,
            ResourceProp::Mvps(_) => resource.mvps = int,
            ResourceProp::CashSpent(_) => resource.total_cash_spent = int,
            ResourceProp::BombsiteA | ResourceProp::BombsiteB => {}
        }
    }

    pub(crate) fn bind_team(&mut self, binder: &mut EntityBinder<'_>) {
        binder.bind(TEAM_SCORE, Listener::Team(TeamProp::Score));
        binder.bind(TEAM, Listener::Team(TeamProp::TeamNum));
        binder.bind(TEAM_NAME, Listener::Team(TeamProp::Name));
        binder.bind(TEAM_CLAN_NAME, Listener::Team(TeamProp::ClanName));
        binder.bind(TEAM_FLAG, Listener::Team(TeamProp::Flag));
        self.team_entities.insert(binder.id(), TeamEntity::default());
    }

    pub(crate) fn handle_team_prop(&mut self, id: EntityId, prop: TeamProp, update: PropertyUpdate<'_>) {
        let Some(team) = self.team_entities.get_mut(&id) else {
            return;
        };
        let int = update.value.as_int().unwrap_or_default();
        let string = update.value.as_str().unwrap_or_default();

        match prop {
            TeamProp::Score => team.score = int,
            TeamProp::TeamNum => team.team_num = int,
            TeamProp::Name => team.name = string.to_string(),
            TeamProp::ClanName => team.clan_name = string.to_string(),
            TeamProp::Flag => team.flag = string.to_string(),
        }
        let team = team.clone();
        let Some(side) = team.side() else {
            trace!("Ignoring team {:?}", team.name);
            return;
        };

        match prop {
            TeamProp::Score => self.set_team_score(side, team.score),
            TeamProp::TeamNum => {
                self.set_team_score(side, team.score);
                self.assign_team_num(side, team.team_num);
            }
            TeamProp::Name => {
                self.set_team_score(side, team.score);
                self.set_clan_name(side, team.clan_name);
                // the number can arrive before the name
                if team.team_num != -1 {
                    self.assign_team_num(side, team.team_num);
                }
            }
            TeamProp::ClanName => self.set_clan_name(side, team.clan_name),
            TeamProp::Flag => match side {
                Team::CounterTerrorist => self.teams.ct_flag = team.flag,
                _ => self.teams.t_flag = team.flag,
            },
        }
    }

    fn set_team_score(&mut self, side: Team, score: i32) {
        match side {
            Team::CounterTerrorist => self.teams.ct_score = score,
            _ => self.teams.t_score = score,
        }
    }

    fn set_clan_name(&mut self, side: Team, name: String) {
        match side {
            Team::CounterTerrorist => self.teams.ct_clan_name = name,
            _ => self.teams.t_clan_name = name,
        }
    }

    /// Team numbers swap at half time, every player on the number changes side.
    fn assign_team_num(&mut self, side: Team, team_num: i32) {
        match side {
            Team::CounterTerrorist => self.teams.ct_id = team_num,
            _ => self.teams.t_id = team_num,
        }
        for player in self.players.iter_mut().flatten() {
            if player.team_id == team_num {
                player.team = side;
            }
        }
    }

    pub(crate) fn bind_rules(&mut self, binder: &mut EntityBinder<'_>) {
        let props = [
            (ROUND_WIN_STATUS, RulesProp::RoundWinStatus),
            (ROUND_WIN_REASON, RulesProp::RoundWinReason),
            (GAME_RESTART, RulesProp::GameRestart),
            (WARMUP_PERIOD, RulesProp::WarmupPeriod),
            (ROUND_TIME, RulesProp::RoundTime),
            (GAME_PHASE, RulesProp::GamePhase),
            (MATCH_WAITING_FOR_RESUME, RulesProp::Paused),
            (TOTAL_ROUNDS_PLAYED, RulesProp::TotalRoundsPlayed),
            (HAS_MATCH_STARTED, RulesProp::MatchStarted),
            (FREEZE_PERIOD, RulesProp::FreezePeriod),
        ];
        for (name, prop) in props {
            binder.bind(name, Listener::Rules(prop));
        }
    }

    pub(crate) fn handle_rules_prop(&mut self, prop: RulesProp, update: PropertyUpdate<'_>) {
        let Some(value) = update.value.as_int() else {
            return;
        };
        let game = &mut self.game;

        match prop {
            RulesProp::RoundWinStatus => {
                game.round_win_status = value;
                self.round_winner = Team::try_from(value as u8).unwrap_or_default();
            }
            RulesProp::RoundWinReason => {
                if value == 0 {
                    return;
                }
                let event = RoundEndEvent {
                    reason: RoundEndReason::try_from(value as u8).ok(),
                    winner: self.round_winner,
                };
                self.emit(Event::RoundEnd(event));
            }
            RulesProp::GameRestart => {
                game.restarting = value == 1;
                if value == 0 {
                    let event = RoundEndEvent {
                        reason: Some(RoundEndReason::GameStart),
                        winner: Team::Spectate,
                    };
                    self.emit(Event::RoundEnd(event));
                }
            }
            RulesProp::WarmupPeriod => game.warmup_period = value == 1,
            RulesProp::RoundTime => game.round_time = value,
            RulesProp::GamePhase => {
                game.game_phase = GamePhase::try_from(value as u8).unwrap_or_else(|_| {
                    debug!("Unknown game phase {value}");
                    GamePhase::default()
                });
            }
            RulesProp::Paused => game.paused = value == 1,
            RulesProp::TotalRoundsPlayed => game.total_rounds_played = value,
            RulesProp::MatchStarted => {
                game.match_started = value == 1;
                if value == 1 {
                    self.attribution.reset();
                    self.emit(Event::MatchStarted);
                }
            }
            RulesProp::FreezePeriod => {
                game.freeze_period = value == 1;
                let event = if value == 1 {
                    Event::FreezetimeStarted
                } else {
                    Event::FreezetimeEnded
                };
                self.emit(event);
            }
        }
    }

    /// `m_cellbits` of CBaseEntity sets the cell width of every position.
    pub(crate) fn handle_cell_bits(&mut self, update: PropertyUpdate<'_>) {
        if let Some(bits) = update.value.as_int() {
            self.cell_width = 1 << bits;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_playing_teams_have_a_side() {
        let team = |name: &str| TeamEntity {
            name: name.to_string(),
            ..Default::default()
        };
        assert_eq!(team("CT").side(), Some(Team::CounterTerrorist));
        assert_eq!(team("TERRORIST").side(), Some(Team::Terrorist));
        assert_eq!(team("Spectator").side(), None);
        assert_eq!(TeamEntity::default().team_num, -1);
    }
}
