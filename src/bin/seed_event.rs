use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use scout_audit::config;
use scout_audit::store::Store;
use scout_audit::synthetic::{self, SyntheticSpec};

/// Seeds a SQLite file with a consistent synthetic event and writes the
/// matching season config, so the engine can be exercised without live feeds.
fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_path = config::resolve_db_path(parse_path_arg("--db"));
    let config_path = config::resolve_config_path(parse_path_arg("--config"));

    let spec = SyntheticSpec {
        teams: parse_usize_arg("--teams").unwrap_or(12).max(6),
        matches: parse_usize_arg("--matches").unwrap_or(30).max(1),
        seed: parse_usize_arg("--seed").map(|s| s as u64).unwrap_or(4099),
    };

    let event = synthetic::generate(&spec);
    let store = Store::open(&db_path)
        .with_context(|| format!("open store {}", db_path.display()))?;
    synthetic::seed_store(&store, &event)?;

    let season = synthetic::season_config();
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&season).context("serialize season config")?;
    fs::write(&config_path, json)
        .with_context(|| format!("write season config {}", config_path.display()))?;

    println!("Seeded synthetic event {}", season.event_key());
    println!("DB: {}", db_path.display());
    println!("Config: {}", config_path.display());
    println!(
        "Teams: {}  Matches: {}  Observations: {}",
        event.teams.len(),
        event.results.len(),
        event.observations.len()
    );

    Ok(())
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

fn parse_usize_arg(name: &str) -> Option<usize> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix) {
            return raw.trim().parse::<usize>().ok();
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
        {
            return next.trim().parse::<usize>().ok();
        }
    }
    None
}
