//! Offline transformation of collected match records into two columnar tables.

pub mod flatten;
pub mod writer;

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};

pub use flatten::{MatchFlattener, PlayerRow, TeamRow};
pub use writer::save_table;

/// Read the collector's match-record file. It must exist and hold a JSON array.
pub fn load_match_data(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Err(AppError::Input(format!("input file {} not found", path.display())));
    }
    let raw = fs::read(path)?;
    let matches = match serde_json::from_slice::<Value>(&raw)? {
        Value::Array(items) => items,
        _ => {
            return Err(AppError::Input(format!(
                "{} does not contain a JSON array of matches",
                path.display()
            )))
        }
    };

    if matches.is_empty() {
        warn!("No match data found in {}", path.display());
    }
    info!("Loaded {} matches from {}", matches.len(), path.display());
    Ok(matches)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransformReport {
    pub processed_games: usize,
    pub skipped_games: usize,
    pub team_rows: usize,
    pub player_rows: usize,
    pub matches_saved: bool,
    pub players_saved: bool,
}

impl TransformReport {
    pub fn saved(&self) -> bool {
        self.matches_saved && self.players_saved
    }
}

/// Load, flatten and write both tables. Only a load failure is an error; a failed table write
/// is reported through the returned flags.
pub fn run_transform(cfg: &Config) -> Result<TransformReport> {
    let matches = load_match_data(&cfg.input_file)?;

    let mut flattener = MatchFlattener::from_config(cfg);
    let (teams, players) = flattener.process(&matches);

    let team_cells: Vec<Vec<Value>> = teams.iter().map(TeamRow::to_cells).collect();
    let player_cells: Vec<Vec<Value>> = players
        .iter()
        .map(|row| row.project(&cfg.players_columns))
        .collect();

    let report = TransformReport {
        processed_games: flattener.processed_games(),
        skipped_games: flattener.skipped_games(),
        team_rows: team_cells.len(),
        player_rows: player_cells.len(),
        matches_saved: save_table(&team_cells, &flattener.team_columns(), &cfg.matches_output),
        players_saved: save_table(&player_cells, &cfg.players_columns, &cfg.players_output),
    };
    info!(
        processed = report.processed_games,
        skipped = report.skipped_games,
        team_rows = report.team_rows,
        player_rows = report.player_rows,
        "Transform finished"
    );
    Ok(report)
}
