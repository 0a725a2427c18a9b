use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::aggregate::{self, MetricColumn};
use crate::alliances::AllianceIndex;
use crate::config::SeasonConfig;
use crate::rating;
use crate::reconcile::Checker;
use crate::sink::{self, SinkColumn};
use crate::store::{ObservationFilter, Store};

#[derive(Debug, Clone)]
pub struct RatingSummary {
    pub column: String,
    pub teams_rated: usize,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub teams: usize,
    pub observations: usize,
    pub matches_with_results: usize,
    pub discrepancies: usize,
    pub discrepancy_counts: BTreeMap<String, usize>,
    pub columns_written: usize,
    pub rating: Option<RatingSummary>,
    pub elapsed_ms: u128,
}

/// One batch run over a consistent snapshot: reconcile, aggregate, estimate,
/// replace. Either the whole run lands or the error propagates and the caller
/// retries on its next cycle; there is no partial-progress checkpoint.
pub fn run_once(store: &mut Store, config: &SeasonConfig) -> Result<RunSummary> {
    let started = Instant::now();

    let roster = store.teams().context("load roster")?;
    let observations = store
        .observations(&ObservationFilter::default())
        .context("load observations")?;
    let results = store.match_results().context("load match results")?;
    let membership = store.alliance_membership().context("load membership")?;
    let index = AllianceIndex::from_rows(&membership);
    info!(
        teams = roster.len(),
        observations = observations.len(),
        results = results.len(),
        alliances = index.len(),
        "snapshot loaded"
    );
    if roster.is_empty() {
        warn!("roster is empty, output table will be empty");
    }

    let checker = Checker::new(config.tolerance);
    let report = checker
        .run_checks(config, &observations, &results, &index)
        .context("reconciliation checks")?;
    let refresh = store
        .refresh_discrepancies(&report.discrepancies)
        .context("refresh discrepancies")?;
    info!(
        cleared = refresh.cleared,
        recorded = refresh.recorded,
        muted = refresh.muted,
        "discrepancies refreshed"
    );

    let mut columns: Vec<SinkColumn> = Vec::new();
    for field in &config.stat_fields {
        columns.push(SinkColumn::Number(aggregate::average(&observations, field)));
        columns.push(SinkColumn::Number(aggregate::median(&observations, field)));
    }
    for stat in &config.attempted_stats {
        columns.push(SinkColumn::Number(aggregate::average_filtered(
            &observations,
            &stat.field,
            &stat.flag,
        )));
        columns.push(SinkColumn::Number(aggregate::median_filtered(
            &observations,
            &stat.field,
            &stat.flag,
        )));
    }
    for column in aggregate::flag_percentages(&observations, &config.flag_percentages) {
        columns.push(SinkColumn::Number(column));
    }
    if !config.outcome_values.is_empty() {
        for column in aggregate::outcome_percentages(
            &observations,
            &config.outcome_values,
            &config.outcome_replacements,
        ) {
            columns.push(SinkColumn::Number(column));
        }
    }
    for column in aggregate::volume_percentages(&observations, &config.volume_fields) {
        columns.push(SinkColumn::Number(column));
    }
    columns.push(SinkColumn::Text(aggregate::notes_rollup(&observations)));

    let mut rating_summary = None;
    if let Some(rating_config) = &config.rating {
        let outcome =
            rating::contribution_rating(&rating_config.authoritative_fields, &results, &index);
        rating_summary = Some(RatingSummary {
            column: rating_config.column.clone(),
            teams_rated: outcome.values.len(),
            iterations: outcome.iterations,
            converged: outcome.converged,
        });
        columns.push(SinkColumn::Number(MetricColumn {
            name: rating_config.column.clone(),
            values: outcome.values,
        }));
    }

    let columns_written = columns.len();
    let rows = sink::build_team_table(&roster, columns);
    store
        .replace_team_metrics(&rows)
        .context("replace team metrics")?;
    info!(
        rows = rows.len(),
        columns = columns_written,
        "team metrics replaced"
    );

    Ok(RunSummary {
        teams: roster.len(),
        observations: observations.len(),
        matches_with_results: results.len(),
        discrepancies: report.discrepancies.len(),
        discrepancy_counts: report.counts,
        columns_written,
        rating: rating_summary,
        elapsed_ms: started.elapsed().as_millis(),
    })
}
