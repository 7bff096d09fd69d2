use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ranked_harvester::config::Config;
use ranked_harvester::transform::run_transform;

fn main() {
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

    info!("Transforming {}", cfg.input_file.display());
    match run_transform(&cfg) {
        Ok(report) if report.saved() => {
            info!(
                "Wrote {} team rows to {} and {} player rows to {}",
                report.team_rows,
                cfg.matches_output.display(),
                report.player_rows,
                cfg.players_output.display(),
            );
        }
        Ok(report) => {
            error!(
                matches_saved = report.matches_saved,
                players_saved = report.players_saved,
                "Failed to write output tables"
            );
            std::process::exit(1);
        }
        Err(e) => {
            error!("Failed to load match data: {e}");
            std::process::exit(1);
        }
    }
}
