use std::collections::HashSet;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointFile;
use crate::collector::{is_checkpoint_due, pause};
use crate::config::Config;
use crate::fetcher::Fetch;
use crate::types::{MatchId, StageOutcome, UniqueList};

pub const STAGE: &str = "match-records";

pub fn match_url(regional_api_url: &str, match_id: &str) -> String {
    format!("{regional_api_url}/lol/match/v5/matches/{match_id}")
}

fn record_match_id(record: &Value) -> Option<&str> {
    record.get("metadata")?.get("matchId")?.as_str()
}

/// `metadata.matchId` of every stored record.
pub fn stored_match_ids(records: &[Value]) -> HashSet<&str> {
    records.iter().filter_map(record_match_id).collect()
}

/// Match ids that are neither stored nor known to fail, in discovery order.
pub fn pending_match_ids<'a>(
    match_ids: &'a [MatchId],
    records: &[Value],
    failed: &UniqueList<MatchId>,
) -> Vec<&'a MatchId> {
    let stored = stored_match_ids(records);
    match_ids
        .iter()
        .filter(|id| !stored.contains(id.as_str()) && !failed.contains(id))
        .collect()
}

/// Stage 3: fetch the full record of every pending match.
///
/// A record is kept only when its `metadata.matchId` is the id that was requested, so every
/// stored record is recognised as stored on later runs. Failures are persisted immediately and
/// never retried. Successes are saved on the checkpoint cadence.
pub async fn fetch_match_records<F: Fetch>(
    fetcher: &F,
    cfg: &Config,
    match_ids: &[MatchId],
    records: &mut CheckpointFile<Vec<Value>>,
    failed: &mut CheckpointFile<UniqueList<MatchId>>,
    cancel: &CancellationToken,
) -> StageOutcome {
    let pending: Vec<MatchId> = pending_match_ids(match_ids, records.data(), failed.data())
        .into_iter()
        .cloned()
        .collect();
    let total = pending.len();
    let mut outcome = StageOutcome::default();
    info!(
        "[{STAGE}] {total} matches to fetch ({} stored, {} failed earlier)",
        records.data().len(),
        failed.data().len(),
    );

    for (i, match_id) in pending.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("[{STAGE}] interrupted, saving {} match records", records.data().len());
            records.save();
            failed.save();
            outcome.interrupted = true;
            return outcome;
        }

        outcome.requests += 1;
        let record = match fetcher.get(&match_url(&cfg.regional_api_url, match_id), &[]).await {
            None => {
                warn!("[{STAGE}] failed to fetch match {match_id}, adding to failed matches");
                None
            }
            Some(body) => match serde_json::from_str::<Value>(&body) {
                Ok(value) if record_match_id(&value) == Some(match_id.as_str()) => Some(value),
                Ok(_) => {
                    error!("[{STAGE}] match {match_id} response does not carry its own matchId");
                    None
                }
                Err(e) => {
                    error!("[{STAGE}] error parsing match data for {match_id}: {e}");
                    None
                }
            },
        };

        match record {
            Some(value) => {
                records.data_mut().push(value);
                outcome.added += 1;
                debug!("[{STAGE}] stored {match_id} ({} total)", records.data().len());
            }
            None => {
                outcome.failed += 1;
                failed.data_mut().push(match_id.clone());
                failed.save();
            }
        }

        if is_checkpoint_due(i, total, cfg.checkpoint_freq) {
            records.save();
        }
        pause(cfg.pause_between, cancel).await;
    }

    info!(
        "[{STAGE}] done: {} requests, +{} records, {} failed, {} total",
        outcome.requests,
        outcome.added,
        outcome.failed,
        records.data().len(),
    );
    outcome
}
