use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

pub const PLATFORM_API_URL: &str = "https://kr.api.riotgames.com";
pub const REGIONAL_API_URL: &str = "https://asia.api.riotgames.com";

pub const USER_AGENT: &str = concat!("ranked-harvester/", env!("CARGO_PKG_VERSION"));

/// Header carrying the API key on every request.
pub const API_KEY_HEADER: &str = "x-riot-token";

/// Idle connections kept per host by the shared HTTP client.
pub const HTTP_POOL_MAX_IDLE: usize = 20;

/// Checkpoint file names, relative to `DATA_DIR`.
pub const PLAYERS_FILE: &str = "players_puuids.json";
pub const GAMES_FILE: &str = "latest_games.json";
pub const TIMELINE_FILE: &str = "matches_timeline.json";
pub const FAILED_MATCHES_FILE: &str = "failed_matches.json";

pub const MATCHES_OUTPUT: &str = "matches_data.parquet";
pub const PLAYERS_OUTPUT: &str = "players_data.parquet";

pub const QUEUES: &[&str] = &["RANKED_SOLO_5x5"];
pub const TIERS: &[&str] = &["MASTER", "GRANDMASTER", "CHALLENGER"];
pub const DIVISIONS: &[&str] = &["I", "II", "III", "IV"];

/// Ranked solo queue id on the match-v5 listing.
pub const MATCH_QUEUE_ID: u32 = 420;

/// Participant fields that grow with every patch and never make it into the player table.
pub const EXCLUDED_STATS: &[&str] = &[
    "PlayerScore0", "PlayerScore1", "PlayerScore10", "PlayerScore11", "PlayerScore2",
    "PlayerScore3", "PlayerScore4", "PlayerScore5", "PlayerScore6", "PlayerScore7",
    "PlayerScore8", "PlayerScore9", "challenges", "missions", "playerAugment1",
    "playerAugment2", "playerAugment3", "playerAugment4", "playerAugment5",
    "playerAugment6", "perks",
];

/// Canonical objective order. Each name owns a fixed `<name>First` / `<name>Kills` column pair
/// in the team table, whatever order the API returns the objectives in.
pub const OBJECTIVES: &[&str] = &[
    "atakhan", "baron", "champion", "dragon", "horde", "inhibitor", "riftHerald", "tower",
];

pub const PLAYERS_COLUMNS: &[&str] = &[
    "gameId", "allInPings", "assistMePings", "assists", "baronKills", "basicPings",
    "bountyLevel", "champExperience", "champLevel", "championId", "championName",
    "championTransform", "commandPings", "consumablesPurchased",
    "damageDealtToBuildings", "damageDealtToObjectives", "damageDealtToTurrets",
    "damageSelfMitigated", "dangerPings", "deaths", "detectorWardsPlaced",
    "doubleKills", "dragonKills", "eligibleForProgression", "enemyMissingPings",
    "enemyVisionPings", "firstBloodAssist", "firstBloodKill", "firstTowerAssist",
    "firstTowerKill", "gameEndedInEarlySurrender", "gameEndedInSurrender",
    "getBackPings", "goldEarned", "goldSpent", "holdPings", "individualPosition",
    "inhibitorKills", "inhibitorTakedowns", "inhibitorsLost", "item0", "item1",
    "item2", "item3", "item4", "item5", "item6", "itemsPurchased", "killingSprees",
    "kills", "lane", "largestCriticalStrike", "largestKillingSpree",
    "largestMultiKill", "longestTimeSpentLiving", "magicDamageDealt",
    "magicDamageDealtToChampions", "magicDamageTaken", "needVisionPings",
    "neutralMinionsKilled", "nexusKills", "nexusLost", "nexusTakedowns",
    "objectivesStolen", "objectivesStolenAssists", "onMyWayPings", "participantId",
    "pentaKills", "physicalDamageDealt", "physicalDamageDealtToChampions",
    "physicalDamageTaken", "placement", "playerSubteamId", "profileIcon",
    "pushPings", "puuid", "quadraKills", "retreatPings", "riotIdGameName",
    "riotIdTagline", "role", "sightWardsBoughtInGame", "spell1Casts", "spell2Casts",
    "spell3Casts", "spell4Casts", "subteamPlacement", "summoner1Casts",
    "summoner1Id", "summoner2Casts", "summoner2Id", "summonerId", "summonerLevel",
    "summonerName", "teamEarlySurrendered", "teamId", "teamPosition",
    "timeCCingOthers", "timePlayed", "totalAllyJungleMinionsKilled",
    "totalDamageDealt", "totalDamageDealtToChampions",
    "totalDamageShieldedOnTeammates", "totalDamageTaken",
    "totalEnemyJungleMinionsKilled", "totalHeal", "totalHealsOnTeammates",
    "totalMinionsKilled", "totalTimeCCDealt", "totalTimeSpentDead",
    "totalUnitsHealed", "tripleKills", "trueDamageDealt",
    "trueDamageDealtToChampions", "trueDamageTaken", "turretKills", "turretTakedowns",
    "turretsLost", "unrealKills", "visionClearedPings", "visionScore",
    "visionWardsBoughtInGame", "wardsKilled", "wardsPlaced", "win",
];

/// Retry and timeout knobs for the rate-limit-aware fetcher.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per request, rate-limited attempts included (MAX_RETRIES).
    pub max_attempts: u32,
    /// Timeout of the first attempt; later attempts get `base × (1 + 0.5 × attempt)`
    /// (BASE_TIMEOUT_SECS).
    pub base_timeout: Duration,
    /// Unit delay for exponential backoff (BACKOFF_BASE_MS).
    pub backoff_base: Duration,
    /// Backoff ceiling before jitter (MAX_BACKOFF_SECS).
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Riot API key (RIOT_API_KEY). Only the collector needs it.
    pub api_key: String,
    /// Platform routing host, serves league entries (PLATFORM_API_URL)
    pub platform_api_url: String,
    /// Regional routing host, serves match-v5 (REGIONAL_API_URL)
    pub regional_api_url: String,
    pub log_level: String,
    /// Directory holding the four checkpoint files (DATA_DIR)
    pub data_dir: PathBuf,
    /// Fixed pause after every request (PAUSE_BETWEEN_MS)
    pub pause_between: Duration,
    /// Save checkpoints every N iterations (CHECKPOINT_FREQ)
    pub checkpoint_freq: usize,
    pub retry: RetryPolicy,
    pub queues: Vec<String>,
    pub tiers: Vec<String>,
    pub divisions: Vec<String>,
    /// League-entry pages walked per (queue, tier, division) (LEAGUE_PAGES)
    pub league_pages: u32,
    pub match_queue_id: u32,
    /// Most recent match ids requested per player (MATCH_COUNT)
    pub match_count: u32,
    /// Transformer input; defaults to the collector's match-record checkpoint (INPUT_FILE)
    pub input_file: PathBuf,
    pub matches_output: PathBuf,
    pub players_output: PathBuf,
    pub excluded_stats: Vec<String>,
    pub objectives: Vec<String>,
    pub players_columns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from(".");
        Self {
            api_key: String::new(),
            platform_api_url: PLATFORM_API_URL.to_string(),
            regional_api_url: REGIONAL_API_URL.to_string(),
            log_level: "info".to_string(),
            input_file: data_dir.join(TIMELINE_FILE),
            data_dir,
            pause_between: Duration::from_millis(250),
            checkpoint_freq: 25,
            retry: RetryPolicy::default(),
            queues: owned(QUEUES),
            tiers: owned(TIERS),
            divisions: owned(DIVISIONS),
            league_pages: 1,
            match_queue_id: MATCH_QUEUE_ID,
            match_count: 20,
            matches_output: PathBuf::from(MATCHES_OUTPUT),
            players_output: PathBuf::from(PLAYERS_OUTPUT),
            excluded_stats: owned(EXCLUDED_STATS),
            objectives: owned(OBJECTIVES),
            players_columns: owned(PLAYERS_COLUMNS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        Ok(Self {
            api_key: std::env::var("RIOT_API_KEY").unwrap_or_default(),
            platform_api_url: std::env::var("PLATFORM_API_URL")
                .unwrap_or(defaults.platform_api_url),
            regional_api_url: std::env::var("REGIONAL_API_URL")
                .unwrap_or(defaults.regional_api_url),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            input_file: std::env::var("INPUT_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join(TIMELINE_FILE)),
            data_dir,
            pause_between: Duration::from_millis(env_parse("PAUSE_BETWEEN_MS", 250u64)?),
            checkpoint_freq: env_parse("CHECKPOINT_FREQ", defaults.checkpoint_freq)?.max(1),
            retry: RetryPolicy {
                max_attempts: env_parse("MAX_RETRIES", defaults.retry.max_attempts)?.max(1),
                base_timeout: Duration::from_secs(env_parse("BASE_TIMEOUT_SECS", 10u64)?),
                backoff_base: Duration::from_millis(env_parse("BACKOFF_BASE_MS", 1000u64)?),
                max_backoff: Duration::from_secs(env_parse("MAX_BACKOFF_SECS", 60u64)?),
            },
            queues: env_list("QUEUES").unwrap_or(defaults.queues),
            tiers: env_list("TIERS").unwrap_or(defaults.tiers),
            divisions: env_list("DIVISIONS").unwrap_or(defaults.divisions),
            league_pages: env_parse("LEAGUE_PAGES", defaults.league_pages)?.max(1),
            match_queue_id: env_parse("MATCH_QUEUE_ID", defaults.match_queue_id)?,
            match_count: env_parse("MATCH_COUNT", defaults.match_count)?,
            matches_output: std::env::var("MATCHES_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or(defaults.matches_output),
            players_output: std::env::var("PLAYERS_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or(defaults.players_output),
            excluded_stats: env_list("EXCLUDED_STATS").unwrap_or(defaults.excluded_stats),
            objectives: env_list("OBJECTIVES").unwrap_or(defaults.objectives),
            players_columns: env_list("PLAYERS_COLUMNS").unwrap_or(defaults.players_columns),
        })
    }

    /// The collector cannot talk to the API without a key.
    pub fn require_api_key(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(AppError::Config("RIOT_API_KEY must be set".to_string()));
        }
        Ok(())
    }

    pub fn players_file(&self) -> PathBuf {
        self.data_dir.join(PLAYERS_FILE)
    }

    pub fn games_file(&self) -> PathBuf {
        self.data_dir.join(GAMES_FILE)
    }

    pub fn timeline_file(&self) -> PathBuf {
        self.data_dir.join(TIMELINE_FILE)
    }

    pub fn failed_matches_file(&self) -> PathBuf {
        self.data_dir.join(FAILED_MATCHES_FILE)
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} must be a valid number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

/// Comma-separated list; `None` when unset or blank.
fn env_list(key: &str) -> Option<Vec<String>> {
    let items: Vec<String> = std::env::var(key)
        .ok()?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() { None } else { Some(items) }
}
