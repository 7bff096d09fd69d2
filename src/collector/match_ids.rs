use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointFile;
use crate::collector::{is_checkpoint_due, pause};
use crate::config::Config;
use crate::fetcher::Fetch;
use crate::types::{MatchId, Puuid, StageOutcome, UniqueList};

pub const STAGE: &str = "match-ids";

pub fn match_ids_url(regional_api_url: &str, puuid: &str) -> String {
    format!("{regional_api_url}/lol/match/v5/matches/by-puuid/{puuid}/ids")
}

fn match_ids_query(cfg: &Config) -> [(&'static str, String); 4] {
    [
        ("queue", cfg.match_queue_id.to_string()),
        ("type", "ranked".to_string()),
        ("start", "0".to_string()),
        ("count", cfg.match_count.to_string()),
    ]
}

/// Stage 2: collect each known player's most recent ranked match ids.
pub async fn discover_match_ids<F: Fetch>(
    fetcher: &F,
    cfg: &Config,
    players: &[Puuid],
    match_ids: &mut CheckpointFile<UniqueList<MatchId>>,
    cancel: &CancellationToken,
) -> StageOutcome {
    let total = players.len();
    let query = match_ids_query(cfg);
    let mut outcome = StageOutcome::default();
    info!("[{STAGE}] fetching match ids for {total} players ({} known)", match_ids.data().len());

    for (i, puuid) in players.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("[{STAGE}] interrupted, saving {} match ids", match_ids.data().len());
            match_ids.save();
            outcome.interrupted = true;
            return outcome;
        }

        outcome.requests += 1;
        match fetcher.get(&match_ids_url(&cfg.regional_api_url, puuid), &query).await {
            None => {
                outcome.failed += 1;
                warn!("[{STAGE}] failed to fetch match ids for {puuid}");
            }
            Some(body) => match serde_json::from_str::<Vec<MatchId>>(&body) {
                Ok(ids) => {
                    let added = match_ids.data_mut().extend(ids);
                    outcome.added += added;
                    debug!("[{STAGE}] {puuid}: +{added} ({} total)", match_ids.data().len());
                }
                Err(e) => {
                    outcome.failed += 1;
                    error!("[{STAGE}] error parsing matches for puuid {puuid}: {e}");
                }
            },
        }

        if is_checkpoint_due(i, total, cfg.checkpoint_freq) {
            match_ids.save();
        }
        pause(cfg.pause_between, cancel).await;
    }

    info!(
        "[{STAGE}] done: {} requests, +{} match ids, {} failed, {} total",
        outcome.requests,
        outcome.added,
        outcome.failed,
        match_ids.data().len(),
    );
    outcome
}
