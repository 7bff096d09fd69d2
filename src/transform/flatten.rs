use std::collections::HashSet;
use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Ban columns per team; shorter ban lists are padded with nulls, longer ones truncated.
pub const BAN_SLOTS: usize = 5;

// ---------------------------------------------------------------------------
// Output rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectiveTally {
    pub first: bool,
    pub kills: i64,
}

/// One team's outcome in one match. `objectives` is aligned with the flattener's canonical
/// objective list.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamRow {
    pub game_id: i64,
    pub team_id: i64,
    pub win: Option<bool>,
    pub game_duration: i64,
    pub bans: [Option<i64>; BAN_SLOTS],
    pub objectives: Vec<ObjectiveTally>,
}

impl TeamRow {
    /// Column names matching `to_cells`.
    pub fn columns(objectives: &[String]) -> Vec<String> {
        let mut columns: Vec<String> = ["gameId", "teamId", "win", "gameDuration"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        columns.extend((1..=BAN_SLOTS).map(|i| format!("ban{i}")));
        for name in objectives {
            columns.push(format!("{name}First"));
            columns.push(format!("{name}Kills"));
        }
        columns
    }

    pub fn to_cells(&self) -> Vec<Value> {
        let mut cells = vec![
            Value::from(self.game_id),
            Value::from(self.team_id),
            self.win.map_or(Value::Null, Value::from),
            Value::from(self.game_duration),
        ];
        cells.extend(self.bans.iter().map(|b| b.map_or(Value::Null, Value::from)));
        for tally in &self.objectives {
            cells.push(Value::from(tally.first));
            cells.push(Value::from(tally.kills));
        }
        cells
    }
}

/// One participant's stats in one match, minus the excluded fields.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRow {
    pub game_id: i64,
    pub stats: Map<String, Value>,
}

impl PlayerRow {
    /// Cells in `columns` order. `gameId` comes from the match; fields the participant lacks
    /// are null and fields outside `columns` are dropped.
    pub fn project(&self, columns: &[String]) -> Vec<Value> {
        columns
            .iter()
            .map(|column| {
                if column == "gameId" {
                    Value::from(self.game_id)
                } else {
                    self.stats.get(column).cloned().unwrap_or(Value::Null)
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Validated views over the raw JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingInfo,
    MissingGameId,
    MissingGameDuration,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::MissingInfo => "missing 'info'",
            SkipReason::MissingGameId => "missing or non-integer 'gameId'",
            SkipReason::MissingGameDuration => "missing or non-integer 'gameDuration'",
        };
        write!(f, "{s}")
    }
}

struct MatchInfo<'a> {
    game_id: i64,
    game_duration: i64,
    teams: Option<&'a Vec<Value>>,
    participants: Option<&'a Vec<Value>>,
}

impl<'a> MatchInfo<'a> {
    fn parse(raw: &'a Value) -> Result<Self, SkipReason> {
        let info = raw
            .get("info")
            .filter(|i| i.is_object())
            .ok_or(SkipReason::MissingInfo)?;
        let game_id = info
            .get("gameId")
            .and_then(Value::as_i64)
            .ok_or(SkipReason::MissingGameId)?;
        let game_duration = info
            .get("gameDuration")
            .and_then(Value::as_i64)
            .ok_or(SkipReason::MissingGameDuration)?;
        Ok(Self {
            game_id,
            game_duration,
            teams: info.get("teams").and_then(Value::as_array),
            participants: info.get("participants").and_then(Value::as_array),
        })
    }
}

struct TeamEntry<'a> {
    team_id: i64,
    win: Option<bool>,
    bans: Option<&'a Vec<Value>>,
    objectives: Option<&'a Map<String, Value>>,
}

impl<'a> TeamEntry<'a> {
    fn parse(raw: &'a Value) -> Option<Self> {
        Some(Self {
            team_id: raw.get("teamId").and_then(Value::as_i64)?,
            win: raw.get("win").and_then(Value::as_bool),
            bans: raw.get("bans").and_then(Value::as_array),
            objectives: raw.get("objectives").and_then(Value::as_object),
        })
    }
}

// ---------------------------------------------------------------------------
// Flattener
// ---------------------------------------------------------------------------

/// Flattens raw match records into team rows and player rows.
///
/// A malformed match, team or participant is skipped with a warning; the batch always
/// completes.
#[derive(Debug)]
pub struct MatchFlattener {
    excluded: HashSet<String>,
    objectives: Vec<String>,
    processed_games: usize,
    skipped_games: usize,
}

impl MatchFlattener {
    pub fn new(excluded: &[String], objectives: &[String]) -> Self {
        Self {
            excluded: excluded.iter().cloned().collect(),
            objectives: objectives.to_vec(),
            processed_games: 0,
            skipped_games: 0,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.excluded_stats, &cfg.objectives)
    }

    pub fn processed_games(&self) -> usize {
        self.processed_games
    }

    pub fn skipped_games(&self) -> usize {
        self.skipped_games
    }

    pub fn team_columns(&self) -> Vec<String> {
        TeamRow::columns(&self.objectives)
    }

    pub fn process(&mut self, matches: &[Value]) -> (Vec<TeamRow>, Vec<PlayerRow>) {
        self.processed_games = 0;
        self.skipped_games = 0;
        let mut team_rows = Vec::new();
        let mut player_rows = Vec::new();

        for (index, raw) in matches.iter().enumerate() {
            let info = match MatchInfo::parse(raw) {
                Ok(info) => info,
                Err(reason) => {
                    warn!("Game at index {index} {reason} - skipping");
                    self.skipped_games += 1;
                    continue;
                }
            };
            let game_id = info.game_id;

            match info.teams {
                Some(teams) => team_rows.extend(
                    teams
                        .iter()
                        .filter_map(|team| self.team_row(game_id, info.game_duration, team)),
                ),
                None => warn!("Game ID {game_id} has invalid 'teams' data - skipping teams"),
            }

            match info.participants {
                Some(participants) => player_rows.extend(
                    participants
                        .iter()
                        .filter_map(|participant| self.player_row(game_id, participant)),
                ),
                None => {
                    warn!("Game ID {game_id} has invalid 'participants' data - skipping players")
                }
            }

            self.processed_games += 1;
        }

        info!(
            processed = self.processed_games,
            skipped = self.skipped_games,
            "Processed {} games successfully, skipped {} games",
            self.processed_games,
            self.skipped_games,
        );
        (team_rows, player_rows)
    }

    pub fn team_row(&self, game_id: i64, game_duration: i64, raw: &Value) -> Option<TeamRow> {
        let Some(team) = TeamEntry::parse(raw) else {
            warn!("Team in game {game_id} missing 'teamId' - skipping");
            return None;
        };
        let team_id = team.team_id;

        let mut bans = [None; BAN_SLOTS];
        match team.bans {
            Some(list) => {
                for (slot, ban) in bans.iter_mut().zip(list) {
                    *slot = ban.get("championId").and_then(Value::as_i64);
                }
            }
            None => warn!("Team {team_id} in game {game_id} has invalid 'bans' data"),
        }

        let objectives = match team.objectives {
            Some(map) => self.objective_tallies(map, game_id, team_id),
            None => {
                warn!("Team {team_id} in game {game_id} has invalid 'objectives' data");
                vec![ObjectiveTally::default(); self.objectives.len()]
            }
        };

        Some(TeamRow {
            game_id,
            team_id,
            win: team.win,
            game_duration,
            bans,
            objectives,
        })
    }

    fn objective_tallies(
        &self,
        map: &Map<String, Value>,
        game_id: i64,
        team_id: i64,
    ) -> Vec<ObjectiveTally> {
        for name in map.keys().filter(|k| !self.objectives.contains(k)) {
            debug!("Team {team_id} in game {game_id}: ignoring unknown objective '{name}'");
        }
        self.objectives
            .iter()
            .map(|name| match map.get(name) {
                Some(entry) => ObjectiveTally {
                    first: entry.get("first").and_then(Value::as_bool).unwrap_or(false),
                    kills: entry.get("kills").and_then(Value::as_i64).unwrap_or(0),
                },
                None => ObjectiveTally::default(),
            })
            .collect()
    }

    pub fn player_row(&self, game_id: i64, raw: &Value) -> Option<PlayerRow> {
        let Some(fields) = raw.as_object() else {
            warn!("Error processing player in game {game_id}: participant is not an object");
            return None;
        };
        let stats = fields
            .iter()
            .filter(|(key, _)| !self.excluded.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Some(PlayerRow { game_id, stats })
    }
}
