//! Names of the flattened properties the analyzer listens to.

// CBaseEntity
pub const OWNER: &str = "m_hOwnerEntity";
pub const CELL_X: &str = "m_cellX";
pub const CELL_Y: &str = "m_cellY";
pub const CELL_Z: &str = "m_cellZ";
pub const ORIGIN: &str = "m_vecOrigin";
pub const CELL_BITS: &str = "m_cellbits";
pub const MODEL: &str = "m_nModelIndex";
pub const TEAM: &str = "m_iTeamNum";

// CCSPlayer
pub const PLAYER_ORIGIN_XY: &str = "cslocaldata.m_vecOrigin";
pub const PLAYER_ORIGIN_Z: &str = "cslocaldata.m_vecOrigin[2]";
pub const HEALTH: &str = "m_iHealth";
pub const ARMOR: &str = "m_ArmorValue";
pub const HAS_DEFUSER: &str = "m_bHasDefuser";
pub const HAS_HELMET: &str = "m_bHasHelmet";
pub const DUCKING: &str = "localdata.m_Local.m_bDucking";
pub const ACCOUNT: &str = "m_iAccount";
pub const EYE_X: &str = "m_angEyeAngles[1]";
pub const EYE_Y: &str = "m_angEyeAngles[0]";
pub const FLASH_DURATION: &str = "m_flFlashDuration";
pub const VELOCITY_X: &str = "localdata.m_vecVelocity[0]";
pub const VELOCITY_Y: &str = "localdata.m_vecVelocity[1]";
pub const VELOCITY_Z: &str = "localdata.m_vecVelocity[2]";
pub const CURRENT_EQUIPMENT_VALUE: &str = "m_unCurrentEquipmentValue";
pub const ROUND_START_EQUIPMENT_VALUE: &str = "m_unRoundStartEquipmentValue";
pub const FREEZETIME_END_EQUIPMENT_VALUE: &str = "m_unFreezetimeEndEquipmentValue";
pub const IS_DEFUSING: &str = "m_bIsDefusing";
pub const ACTIVE_WEAPON: &str = "m_hActiveWeapon";
pub const ROUND_DAMAGE_PREFIX: &str = "m_iMatchStats_Damage.";
pub const AMMO_PREFIX: &str = "m_iAmmo.";
pub const WEAPONS_PREFIX: &str = "m_hMyWeapons.";
// Used by demos recorded without local player data
pub const NONLOCAL_WEAPONS_PREFIX: &str = "bcc_nonlocaldata.m_hMyWeapons.";

// CCSPlayerResource
pub const CLAN_PREFIX: &str = "m_szClan.";
pub const PING_PREFIX: &str = "m_iPing.";
pub const SCORE_PREFIX: &str = "m_iScore.";
pub const KILLS_PREFIX: &str = "m_iKills.";
pub const DEATHS_PREFIX: &str = "m_iDeaths.";
pub const ASSISTS_PREFIX: &str = "m_iAssists.";
pub const MVPS_PREFIX: &str = "m_iMVPs.";
pub const CASH_SPENT_PREFIX: &str = "m_iTotalCashSpent.";
pub const BOMBSITE_CENTER_A: &str = "m_bombsiteCenterA";
pub const BOMBSITE_CENTER_B: &str = "m_bombsiteCenterB";

// CCSTeam
pub const TEAM_SCORE: &str = "m_scoreTotal";
pub const TEAM_NAME: &str = "m_szTeamname";
pub const TEAM_CLAN_NAME: &str = "m_szClanTeamname";
pub const TEAM_FLAG: &str = "m_szTeamFlagImage";

// CCSGameRulesProxy
pub const ROUND_WIN_STATUS: &str = "cs_gamerules_data.m_iRoundWinStatus";
pub const ROUND_WIN_REASON: &str = "cs_gamerules_data.m_eRoundWinReason";
pub const GAME_RESTART: &str = "cs_gamerules_data.m_bGameRestart";
pub const WARMUP_PERIOD: &str = "cs_gamerules_data.m_bWarmupPeriod";
pub const ROUND_TIME: &str = "cs_gamerules_data.m_iRoundTime";
pub const GAME_PHASE: &str = "cs_gamerules_data.m_gamePhase";
pub const MATCH_WAITING_FOR_RESUME: &str = "cs_gamerules_data.m_bMatchWaitingForResume";
pub const TOTAL_ROUNDS_PLAYED: &str = "cs_gamerules_data.m_totalRoundsPlayed";
pub const HAS_MATCH_STARTED: &str = "cs_gamerules_data.m_bHasMatchStarted";
pub const FREEZE_PERIOD: &str = "cs_gamerules_data.m_bFreezePeriod";

// Weapons
pub const CLIP: &str = "m_iClip1";
pub const PRIMARY_AMMO_TYPE: &str = "LocalWeaponData.m_iPrimaryAmmoType";
pub const LAST_SHOT_TIME: &str = "m_fLastShotTime";
pub const LAST_MADE_NOISE_TIME: &str = "m_flLastMadeNoiseTime";
pub const BURST_SHOTS_REMAINING: &str = "m_iBurstShotsRemaining";
pub const WEAPON_STATE: &str = "m_iState";
pub const THROW_TIME: &str = "m_fThrowTime";

// Bombs
pub const STARTED_ARMING: &str = "m_bStartedArming";
pub const BOMB_TICKING: &str = "m_bBombTicking";
pub const BOMB_DEFUSED: &str = "m_bBombDefused";

// Grenade effects
pub const DID_SMOKE_EFFECT: &str = "m_bDidSmokeEffect";
pub const FLAGS: &str = "m_fFlags";
pub const DAMAGE_RADIUS: &str = "m_DmgRadius";

/// Name of element `index` of a flattened array property, `m_iAmmo.007`.
pub fn indexed(prefix: &str, index: usize) -> String {
    format!("{prefix}{index:03}")
}
