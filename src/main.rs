use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ranked_harvester::collector::{run_collection, CollectionState};
use ranked_harvester::config::Config;
use ranked_harvester::error::Result;
use ranked_harvester::fetcher::RateLimitedFetcher;
use ranked_harvester::signal;

/// Exit status after a user interrupt, as a shell reports SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    match run(cfg).await {
        Ok(true) => {
            warn!("Process interrupted by user, progress saved");
            std::process::exit(EXIT_INTERRUPTED);
        }
        Ok(false) => {}
        Err(e) => {
            error!("Fatal error: {e}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the run was interrupted.
async fn run(cfg: Config) -> Result<bool> {
    cfg.require_api_key()?;
    let fetcher = RateLimitedFetcher::new(&cfg)?;
    info!(
        platform = %cfg.platform_api_url,
        regional = %cfg.regional_api_url,
        data_dir = %cfg.data_dir.display(),
        "Starting ranked match collection"
    );

    let mut state = CollectionState::load(&cfg);

    let shutdown = CancellationToken::new();
    signal::install(shutdown.clone());

    let report = run_collection(&fetcher, &cfg, &mut state, &shutdown).await;
    Ok(report.interrupted())
}
