use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// One explicit configuration table per season: which counter fields exist,
/// which reconciliation checks to run and against which authoritative columns,
/// and the tolerance for numeric comparisons. Loaded once at startup and
/// validated before any component sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonConfig {
    /// Event code without the year, e.g. `vahay`.
    pub event: String,
    pub year: u16,
    /// Numeric comparison tolerance. The historically used value is 2.0, an
    /// empirical constant that does not generalize across scoring scales, so
    /// it is data here rather than a constant in the checker.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Counter fields that get `_avg` and `_med` output columns.
    #[serde(default)]
    pub stat_fields: Vec<String>,
    /// Counters only meaningful when a flag was set for the observation
    /// (e.g. climb time conditional on a climb attempt).
    #[serde(default)]
    pub attempted_stats: Vec<FilteredStat>,
    /// Independent boolean flags that get `_pct` columns.
    #[serde(default)]
    pub flag_percentages: Vec<String>,
    /// Category space for the single categorical outcome field. Values absent
    /// from the data still produce an all-zero column.
    #[serde(default)]
    pub outcome_values: Vec<String>,
    /// Scouted-value normalization applied before percentage expansion and
    /// before the outcome reconciliation (e.g. `No Climb` -> `None`).
    #[serde(default)]
    pub outcome_replacements: BTreeMap<String, String>,
    /// Mutually exclusive quantity buckets that get `_volume_pct` columns.
    #[serde(default)]
    pub volume_fields: Vec<String>,
    /// Alliance-sum reconciliations to run.
    #[serde(default)]
    pub sum_checks: Vec<SumCheck>,
    /// Per-seat categorical reconciliation of the outcome field, if any.
    #[serde(default)]
    pub outcome_check: Option<OutcomeCheck>,
    /// Least-squares contribution rating, if any.
    #[serde(default)]
    pub rating: Option<RatingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredStat {
    pub field: String,
    pub flag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SumCheck {
    pub category: String,
    pub observation_fields: Vec<String>,
    pub authoritative_fields: Vec<String>,
    #[serde(default)]
    pub observation_weights: Option<Vec<f64>>,
    #[serde(default)]
    pub authoritative_weights: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeCheck {
    pub category: String,
    /// Authoritative per-robot fields in seat order; the ordering assumption
    /// (seat 1 maps to the first field) is load-bearing.
    pub authoritative_fields: [String; 3],
    /// Substituted for a missing scouted outcome so "no observation" stays
    /// distinguishable from a genuine mismatch.
    #[serde(default = "default_observation_missing")]
    pub observation_default: String,
    /// Substituted for a missing authoritative value ("confirmed none").
    #[serde(default = "default_authoritative_missing")]
    pub authoritative_default: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingConfig {
    /// Output column name, e.g. `total_points_rating`.
    pub column: String,
    /// Authoritative breakdown fields summed into each alliance total.
    pub authoritative_fields: Vec<String>,
}

fn default_tolerance() -> f64 {
    2.0
}

fn default_observation_missing() -> String {
    "Unknown".to_string()
}

fn default_authoritative_missing() -> String {
    "None".to_string()
}

impl SeasonConfig {
    /// `2020vahay`: the prefix every match key at this event must carry.
    pub fn event_key(&self) -> String {
        format!("{}{}", self.year, self.event)
    }

    pub fn load(path: &Path) -> Result<SeasonConfig> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read season config {}", path.display()))?;
        let config = serde_json::from_str::<SeasonConfig>(&raw)
            .with_context(|| format!("parse season config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event.trim().is_empty()
            || !self
                .event
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            bail!("event code {:?} must be lowercase alphanumeric", self.event);
        }
        if !(1992..=2100).contains(&self.year) {
            bail!("year {} is out of range", self.year);
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            bail!("tolerance {} must be finite and non-negative", self.tolerance);
        }
        for check in &self.sum_checks {
            if check.observation_fields.is_empty() || check.authoritative_fields.is_empty() {
                bail!("sum check {:?} has an empty field list", check.category);
            }
            if let Some(weights) = &check.observation_weights
                && weights.len() != check.observation_fields.len()
            {
                bail!(
                    "sum check {:?}: {} observation weights for {} fields",
                    check.category,
                    weights.len(),
                    check.observation_fields.len()
                );
            }
            if let Some(weights) = &check.authoritative_weights
                && weights.len() != check.authoritative_fields.len()
            {
                bail!(
                    "sum check {:?}: {} authoritative weights for {} fields",
                    check.category,
                    weights.len(),
                    check.authoritative_fields.len()
                );
            }
        }
        if let Some(rating) = &self.rating {
            if rating.column.trim().is_empty() {
                bail!("rating column name is empty");
            }
            if rating.authoritative_fields.is_empty() {
                bail!("rating has no authoritative fields");
            }
        }
        Ok(())
    }
}

/// Config path resolution: explicit CLI value, then `SCOUT_AUDIT_CONFIG`,
/// then the conventional in-repo location.
pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    if let Ok(raw) = env::var("SCOUT_AUDIT_CONFIG")
        && !raw.trim().is_empty()
    {
        return PathBuf::from(raw.trim());
    }
    PathBuf::from("config/season.json")
}

/// Db path resolution mirrors the config path: CLI, `SCOUT_AUDIT_DB`, default.
pub fn resolve_db_path(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    if let Ok(raw) = env::var("SCOUT_AUDIT_DB")
        && !raw.trim().is_empty()
    {
        return PathBuf::from(raw.trim());
    }
    PathBuf::from("data/scouting.sqlite")
}
