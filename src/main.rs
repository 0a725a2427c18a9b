use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use scout_audit::config::{self, SeasonConfig};
use scout_audit::pipeline;
use scout_audit::store::Store;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_path = config::resolve_db_path(parse_path_arg("--db"));
    let config_path = config::resolve_config_path(parse_path_arg("--config"));
    let interval = parse_interval_arg();

    let season = SeasonConfig::load(&config_path)?;
    let mut store =
        Store::open(&db_path).with_context(|| format!("open store {}", db_path.display()))?;

    loop {
        match pipeline::run_once(&mut store, &season) {
            Ok(summary) => print_summary(&season, &summary),
            Err(err) => {
                // A failed run is retried wholesale on the next cycle; there
                // is no partial progress to resume.
                if interval.is_none() {
                    return Err(err);
                }
                tracing::error!(error = %format!("{err:#}"), "run failed, will retry");
            }
        }

        let Some(secs) = interval else {
            break;
        };
        thread::sleep(Duration::from_secs(secs));
    }

    Ok(())
}

fn print_summary(season: &SeasonConfig, summary: &pipeline::RunSummary) {
    println!("Run complete for {}", season.event_key());
    println!(
        "Teams: {}  Observations: {}  Matches with results: {}",
        summary.teams, summary.observations, summary.matches_with_results
    );
    println!(
        "Discrepancies: {}  Columns written: {}  Elapsed: {}ms",
        summary.discrepancies, summary.columns_written, summary.elapsed_ms
    );
    for (category, count) in &summary.discrepancy_counts {
        if *count > 0 {
            println!("  {category}: {count}");
        }
    }
    if let Some(rating) = &summary.rating {
        println!(
            "Rating {}: {} teams in {} iterations{}",
            rating.column,
            rating.teams_rated,
            rating.iterations,
            if rating.converged {
                ""
            } else {
                " (did not converge)"
            }
        );
    }
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next.trim()));
        }
    }
    None
}

fn parse_interval_arg() -> Option<u64> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix("--interval=") {
            return raw.trim().parse::<u64>().ok().map(|s| s.max(1));
        }
        if arg == "--interval"
            && let Some(next) = args.get(idx + 1)
        {
            return next.trim().parse::<u64>().ok().map(|s| s.max(1));
        }
    }
    None
}
