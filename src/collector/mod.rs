//! Three sequential collection stages over the remote API, each resumable from its own
//! checkpoint file.

pub mod match_ids;
pub mod match_records;
pub mod players;

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::checkpoint::CheckpointFile;
use crate::config::Config;
use crate::fetcher::Fetch;
use crate::types::{MatchId, Puuid, StageOutcome, UniqueList};

pub use match_ids::discover_match_ids;
pub use match_records::fetch_match_records;
pub use players::discover_players;

/// Every checkpoint the collector owns, loaded once at start.
#[derive(Debug)]
pub struct CollectionState {
    pub players: CheckpointFile<UniqueList<Puuid>>,
    pub match_ids: CheckpointFile<UniqueList<MatchId>>,
    pub records: CheckpointFile<Vec<Value>>,
    pub failed: CheckpointFile<UniqueList<MatchId>>,
}

impl CollectionState {
    pub fn load(cfg: &Config) -> Self {
        let state = Self {
            players: CheckpointFile::load_or_create(cfg.players_file()),
            match_ids: CheckpointFile::load_or_create(cfg.games_file()),
            records: CheckpointFile::load_or_create(cfg.timeline_file()),
            failed: CheckpointFile::load_or_create(cfg.failed_matches_file()),
        };
        info!(
            players = state.players.data().len(),
            match_ids = state.match_ids.data().len(),
            records = state.records.data().len(),
            failed = state.failed.data().len(),
            "Checkpoints loaded from {}",
            cfg.data_dir.display(),
        );
        state
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CollectionReport {
    pub players: StageOutcome,
    pub match_ids: StageOutcome,
    pub records: StageOutcome,
}

impl CollectionReport {
    pub fn interrupted(&self) -> bool {
        self.players.interrupted || self.match_ids.interrupted || self.records.interrupted
    }
}

/// Run player discovery, match-id discovery and match-record fetch in order.
/// An interrupted stage stops the run; later stages are not started. A signal that lands
/// after a stage's last request still marks that stage as interrupted.
pub async fn run_collection<F: Fetch>(
    fetcher: &F,
    cfg: &Config,
    state: &mut CollectionState,
    cancel: &CancellationToken,
) -> CollectionReport {
    let mut report = CollectionReport::default();

    report.players = discover_players(fetcher, cfg, &mut state.players, cancel).await;
    report.players.interrupted |= cancel.is_cancelled();
    fetcher.stage_finished(players::STAGE);
    if report.players.interrupted {
        return report;
    }

    let roster = state.players.data().to_vec();
    report.match_ids =
        discover_match_ids(fetcher, cfg, &roster, &mut state.match_ids, cancel).await;
    report.match_ids.interrupted |= cancel.is_cancelled();
    fetcher.stage_finished(match_ids::STAGE);
    if report.match_ids.interrupted {
        return report;
    }

    let match_ids = state.match_ids.data().to_vec();
    report.records = fetch_match_records(
        fetcher,
        cfg,
        &match_ids,
        &mut state.records,
        &mut state.failed,
        cancel,
    )
    .await;
    report.records.interrupted |= cancel.is_cancelled();
    fetcher.stage_finished(match_records::STAGE);
    if report.records.interrupted {
        return report;
    }

    info!(
        players = state.players.data().len(),
        match_ids = state.match_ids.data().len(),
        records = state.records.data().len(),
        failed = state.failed.data().len(),
        "Collection finished: {} players, {} match ids, {} match records, {} failed",
        state.players.data().len(),
        state.match_ids.data().len(),
        state.records.data().len(),
        state.failed.data().len(),
    );
    report
}

/// Checkpoint after every `freq`-th iteration and after the last one.
pub(crate) fn is_checkpoint_due(index: usize, total: usize, freq: usize) -> bool {
    (index + 1) % freq.max(1) == 0 || index + 1 == total
}

/// Fixed pacing between requests. Returns early on shutdown so the loop can flush.
pub(crate) async fn pause(duration: Duration, cancel: &CancellationToken) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = cancel.cancelled() => {}
    }
}
