use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointFile;
use crate::collector::{is_checkpoint_due, pause};
use crate::config::Config;
use crate::fetcher::Fetch;
use crate::types::{Puuid, StageOutcome, UniqueList};

pub const STAGE: &str = "players";

/// One page of one ladder bracket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaguePage {
    pub queue: String,
    pub tier: String,
    pub division: String,
    pub page: u32,
}

impl LeaguePage {
    pub fn url(&self, platform_api_url: &str) -> String {
        format!(
            "{platform_api_url}/lol/league-exp/v4/entries/{}/{}/{}",
            self.queue, self.tier, self.division
        )
    }
}

/// Only the handle matters; everything else in a league entry is ignored.
#[derive(Debug, Deserialize)]
struct LeagueEntry {
    #[serde(default)]
    puuid: Option<Puuid>,
}

/// queue × tier × division × page, in that nesting order.
pub fn league_pages(cfg: &Config) -> Vec<LeaguePage> {
    let mut pages = Vec::new();
    for queue in &cfg.queues {
        for tier in &cfg.tiers {
            for division in &cfg.divisions {
                for page in 1..=cfg.league_pages.max(1) {
                    pages.push(LeaguePage {
                        queue: queue.clone(),
                        tier: tier.clone(),
                        division: division.clone(),
                        page,
                    });
                }
            }
        }
    }
    pages
}

/// Stage 1: collect player handles from the ladder listings.
pub async fn discover_players<F: Fetch>(
    fetcher: &F,
    cfg: &Config,
    players: &mut CheckpointFile<UniqueList<Puuid>>,
    cancel: &CancellationToken,
) -> StageOutcome {
    let pages = league_pages(cfg);
    let total = pages.len();
    let mut outcome = StageOutcome::default();
    info!("[{STAGE}] fetching {total} league pages ({} players known)", players.data().len());

    for (i, page) in pages.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("[{STAGE}] interrupted, saving {} players", players.data().len());
            players.save();
            outcome.interrupted = true;
            return outcome;
        }

        let label = format!("{} {} page {}", page.tier, page.division, page.page);
        outcome.requests += 1;
        match fetcher
            .get(&page.url(&cfg.platform_api_url), &[("page", page.page.to_string())])
            .await
        {
            None => {
                outcome.failed += 1;
                warn!("[{STAGE}] failed to fetch {label}, continuing to next");
            }
            Some(body) => match serde_json::from_str::<Vec<LeagueEntry>>(&body) {
                Ok(entries) => {
                    let added = players
                        .data_mut()
                        .extend(entries.into_iter().filter_map(|e| e.puuid));
                    outcome.added += added;
                    debug!("[{STAGE}] {label}: +{added} ({} total)", players.data().len());
                }
                Err(e) => {
                    outcome.failed += 1;
                    error!("[{STAGE}] error parsing league entries for {label}: {e}");
                }
            },
        }

        if is_checkpoint_due(i, total, cfg.checkpoint_freq) {
            players.save();
        }
        pause(cfg.pause_between, cancel).await;
    }

    info!(
        "[{STAGE}] done: {} requests, +{} players, {} failed, {} total",
        outcome.requests,
        outcome.added,
        outcome.failed,
        players.data().len(),
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::load_or_create;
    use crate::collector::testing::*;

    fn entries_url(division: &str) -> String {
        format!("{PLATFORM}/lol/league-exp/v4/entries/RANKED_SOLO_5x5/MASTER/{division}")
    }

    #[test]
    fn default_config_yields_twelve_pages() {
        let pages = league_pages(&Config::default());
        assert_eq!(pages.len(), 12);
        assert_eq!(pages[0].tier, "MASTER");
        assert_eq!(pages[0].division, "I");
        assert_eq!(pages[11].tier, "CHALLENGER");
        assert_eq!(pages[11].division, "IV");
        assert!(pages.iter().all(|p| p.page == 1));
    }

    #[test]
    fn extra_pages_nest_inside_each_division() {
        let cfg = Config { league_pages: 2, ..Config::default() };
        let pages = league_pages(&cfg);
        assert_eq!(pages.len(), 24);
        assert_eq!((pages[0].division.as_str(), pages[0].page), ("I", 1));
        assert_eq!((pages[1].division.as_str(), pages[1].page), ("I", 2));
    }

    #[tokio::test]
    async fn requests_first_page_of_each_bracket() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let fake = FakeFetch::new();
        let mut players = CheckpointFile::load_or_create(cfg.players_file());

        discover_players(&fake, &cfg, &mut players, &CancellationToken::new()).await;

        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, entries_url("I"));
        assert_eq!(calls[0].1, vec![("page".to_string(), "1".to_string())]);
        assert_eq!(calls[1].0, entries_url("II"));
    }

    #[tokio::test]
    async fn rerun_adds_no_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let fake = FakeFetch::new()
            .respond(entries_url("I"), r#"[{"puuid":"p1"},{"puuid":"p2"}]"#)
            .respond(entries_url("II"), r#"[{"puuid":"p2"},{"puuid":"p3"}]"#);

        let mut players = CheckpointFile::load_or_create(cfg.players_file());
        let first = discover_players(&fake, &cfg, &mut players, &CancellationToken::new()).await;
        assert_eq!(first.added, 3);

        let mut players = CheckpointFile::load_or_create(cfg.players_file());
        let second = discover_players(&fake, &cfg, &mut players, &CancellationToken::new()).await;
        assert_eq!(second.added, 0);

        let saved: Vec<String> = load_or_create(&cfg.players_file(), Vec::new());
        assert_eq!(saved, vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn failed_and_malformed_pages_do_not_stop_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            divisions: vec!["I".into(), "II".into(), "III".into()],
            ..test_config(dir.path())
        };
        let fake = FakeFetch::new()
            .respond(entries_url("II"), r#"{"status":"not a list"}"#)
            .respond(entries_url("III"), r#"[{"puuid":"p9"}]"#);

        let mut players = CheckpointFile::load_or_create(cfg.players_file());
        let outcome = discover_players(&fake, &cfg, &mut players, &CancellationToken::new()).await;

        assert_eq!(outcome.requests, 3);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.added, 1);
        assert_eq!(players.data().to_vec(), vec!["p9"]);
    }

    #[tokio::test]
    async fn interruption_flushes_players_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let fake = FakeFetch::new();
        let cancel = CancellationToken::new();

        let mut players: CheckpointFile<UniqueList<Puuid>> =
            CheckpointFile::load_or_create(cfg.players_file());
        players.data_mut().push("unsaved".to_string());
        cancel.cancel();
        let outcome = discover_players(&fake, &cfg, &mut players, &cancel).await;

        assert!(outcome.interrupted);
        assert_eq!(outcome.requests, 0);
        let saved: Vec<String> = load_or_create(&cfg.players_file(), Vec::new());
        assert_eq!(saved, vec!["unsaved"]);
    }
}
