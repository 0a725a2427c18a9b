use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::alliances::AllianceIndex;
use crate::config::SeasonConfig;
use crate::match_key;
use crate::records::{
    Alliance, Discrepancy, MatchResult, OBSERVATIONS_PER_MATCH, TeamObservation,
};

/// Cross-checks the scouted observations against the authoritative results.
/// Holds nothing across matches; every match/alliance is judged independently.
pub struct Checker {
    tolerance: f64,
}

#[derive(Debug, Default)]
pub struct CheckReport {
    pub discrepancies: Vec<Discrepancy>,
    pub counts: BTreeMap<String, usize>,
}

impl Checker {
    pub fn new(tolerance: f64) -> Checker {
        Checker { tolerance }
    }

    /// Compares the weighted sum of observation counters across an alliance's
    /// three rows against the weighted sum of the authoritative breakdown
    /// fields. Matches with fewer than 6 observations are skipped outright;
    /// a partial alliance sum would only manufacture false positives while
    /// scouting coverage is still catching up.
    pub fn check_equals_by_alliance(
        &self,
        category: &str,
        observations: &[TeamObservation],
        results: &[MatchResult],
        index: &AllianceIndex,
        observation_fields: &[String],
        authoritative_fields: &[String],
        observation_weights: Option<&[f64]>,
        authoritative_weights: Option<&[f64]>,
    ) -> Result<Vec<Discrepancy>> {
        if let Some(weights) = observation_weights
            && weights.len() != observation_fields.len()
        {
            return Err(anyhow!(
                "check {category:?}: {} observation weights for {} fields",
                weights.len(),
                observation_fields.len()
            ));
        }
        if let Some(weights) = authoritative_weights
            && weights.len() != authoritative_fields.len()
        {
            return Err(anyhow!(
                "check {category:?}: {} authoritative weights for {} fields",
                weights.len(),
                authoritative_fields.len()
            ));
        }

        let by_match = group_by_match(observations);
        let mut out = Vec::new();
        let mut skipped_incomplete = 0usize;

        for result in results {
            let rows = by_match.get(result.match_key.as_str());
            let seen = rows.map(|r| r.len()).unwrap_or(0);
            if seen < OBSERVATIONS_PER_MATCH {
                skipped_incomplete += 1;
                debug!(
                    match_key = %result.match_key,
                    observations = seen,
                    "incomplete match, skipping sum comparison"
                );
                continue;
            }
            let rows = rows.expect("seen >= 6 implies rows exist");

            for alliance in Alliance::BOTH {
                let Some(members) = index.members(&result.match_key, alliance) else {
                    warn!(
                        match_key = %result.match_key,
                        alliance = %alliance,
                        "no alliance membership, skipping sum comparison"
                    );
                    continue;
                };

                let observed: f64 = rows
                    .iter()
                    .filter(|obs| members.contains(&obs.team.as_str()))
                    .map(|obs| weighted_counter_sum(obs, observation_fields, observation_weights))
                    .sum();

                let authoritative = weighted_breakdown_sum(
                    result,
                    alliance,
                    authoritative_fields,
                    authoritative_weights,
                )
                .with_context(|| {
                    format!("check {category:?} on match {}", result.match_key)
                })?;

                if (observed - authoritative).abs() > self.tolerance {
                    out.push(Discrepancy::new(
                        category,
                        Some(&result.match_key),
                        Some(alliance),
                        format!(
                            "scouted sum of {} ({observed}) does not match the official sum of {} ({authoritative})",
                            observation_fields.join(", "),
                            authoritative_fields.join(", "),
                        ),
                    ));
                }
            }
        }

        if skipped_incomplete > 0 {
            debug!(
                category,
                skipped = skipped_incomplete,
                "matches skipped for incomplete scouting coverage"
            );
        }
        Ok(out)
    }

    /// Compares the categorical outcome per robot, aligning the scouted rows
    /// to the authoritative per-seat fields by driver station. The
    /// authoritative field order must follow seat order; ingestion preserves
    /// that invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn check_same(
        &self,
        category: &str,
        observations: &[TeamObservation],
        results: &[MatchResult],
        index: &AllianceIndex,
        authoritative_fields: &[String; 3],
        observation_default: &str,
        authoritative_default: &str,
        replacements: &BTreeMap<String, String>,
    ) -> Vec<Discrepancy> {
        let by_match = group_by_match(observations);
        let by_team_match: HashMap<(&str, &str), &TeamObservation> = observations
            .iter()
            .map(|obs| ((obs.team.as_str(), obs.match_key.as_str()), obs))
            .collect();

        let mut out = Vec::new();
        for result in results {
            let seen = by_match
                .get(result.match_key.as_str())
                .map(|r| r.len())
                .unwrap_or(0);
            if seen < OBSERVATIONS_PER_MATCH {
                continue;
            }

            for alliance in Alliance::BOTH {
                for seat in 1..=3u8 {
                    let Some(team) = index.team_at(&result.match_key, alliance, seat) else {
                        warn!(
                            match_key = %result.match_key,
                            alliance = %alliance,
                            seat,
                            "no team mapped to seat, skipping outcome comparison"
                        );
                        continue;
                    };

                    let scouted_raw = by_team_match
                        .get(&(team, result.match_key.as_str()))
                        .and_then(|obs| obs.outcome.as_deref());
                    let scouted = match scouted_raw {
                        Some(value) => replacements
                            .get(value)
                            .map(|v| v.as_str())
                            .unwrap_or(value),
                        None => observation_default,
                    };

                    let field = &authoritative_fields[(seat - 1) as usize];
                    let authoritative = result
                        .breakdown(alliance)
                        .seat_label(field)
                        .unwrap_or(authoritative_default);

                    if scouted != authoritative {
                        out.push(Discrepancy::new(
                            category,
                            Some(&result.match_key),
                            Some(alliance),
                            format!(
                                "{team}'s {category} is recorded as {scouted:?} while the official result has {authoritative:?}"
                            ),
                        ));
                    }
                }
            }
        }
        out
    }

    /// Validates every observation's match key against the key grammar, and
    /// optionally pins the event prefix, catching keys entered for the wrong
    /// event. Guards against manual data-entry corruption upstream.
    pub fn check_key(
        &self,
        category: &str,
        observations: &[TeamObservation],
        event_key: Option<&str>,
    ) -> Vec<Discrepancy> {
        let mut out = Vec::new();
        for obs in observations {
            let parsed = match_key::parse(&obs.match_key);
            let ok = match (&parsed, event_key) {
                (Some(parsed), Some(event_key)) => parsed.event_key() == event_key,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !ok {
                out.push(Discrepancy::new(
                    category,
                    Some(&obs.match_key),
                    None,
                    format!(
                        "observation for team {} has malformed match key {:?}",
                        obs.team, obs.match_key
                    ),
                ));
            }
        }
        out
    }

    /// The per-season check suite: key validation, every configured alliance
    /// sum, and the per-seat outcome comparison when configured.
    pub fn run_checks(
        &self,
        config: &SeasonConfig,
        observations: &[TeamObservation],
        results: &[MatchResult],
        index: &AllianceIndex,
    ) -> Result<CheckReport> {
        let mut report = CheckReport::default();

        let result_keys: HashSet<&str> =
            results.iter().map(|r| r.match_key.as_str()).collect();
        let mut missing: Vec<&str> = observations
            .iter()
            .map(|obs| obs.match_key.as_str())
            .filter(|key| !result_keys.contains(key))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        missing.sort_unstable();
        for key in missing {
            warn!(match_key = key, "no official result for scouted match yet");
        }

        let event_key = config.event_key();
        let found = self.check_key("match key", observations, Some(&event_key));
        info!(check = "match key", discrepancies = found.len(), "check complete");
        report.counts.insert("match key".to_string(), found.len());
        report.discrepancies.extend(found);

        for check in &config.sum_checks {
            let found = self.check_equals_by_alliance(
                &check.category,
                observations,
                results,
                index,
                &check.observation_fields,
                &check.authoritative_fields,
                check.observation_weights.as_deref(),
                check.authoritative_weights.as_deref(),
            )?;
            info!(check = %check.category, discrepancies = found.len(), "check complete");
            report.counts.insert(check.category.clone(), found.len());
            report.discrepancies.extend(found);
        }

        if let Some(check) = &config.outcome_check {
            let found = self.check_same(
                &check.category,
                observations,
                results,
                index,
                &check.authoritative_fields,
                &check.observation_default,
                &check.authoritative_default,
                &config.outcome_replacements,
            );
            info!(check = %check.category, discrepancies = found.len(), "check complete");
            report.counts.insert(check.category.clone(), found.len());
            report.discrepancies.extend(found);
        }

        Ok(report)
    }
}

fn group_by_match(observations: &[TeamObservation]) -> HashMap<&str, Vec<&TeamObservation>> {
    let mut by_match: HashMap<&str, Vec<&TeamObservation>> = HashMap::new();
    for obs in observations {
        by_match.entry(obs.match_key.as_str()).or_default().push(obs);
    }
    by_match
}

fn weighted_counter_sum(
    obs: &TeamObservation,
    fields: &[String],
    weights: Option<&[f64]>,
) -> f64 {
    fields
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let weight = weights.map(|w| w[idx]).unwrap_or(1.0);
            obs.counter(field).unwrap_or(0.0) * weight
        })
        .sum()
}

fn weighted_breakdown_sum(
    result: &MatchResult,
    alliance: Alliance,
    fields: &[String],
    weights: Option<&[f64]>,
) -> Result<f64> {
    let breakdown = result.breakdown(alliance);
    let mut sum = 0.0;
    for (idx, field) in fields.iter().enumerate() {
        let value = breakdown.number(field).ok_or_else(|| {
            anyhow!("{alliance} breakdown is missing configured field {field:?}")
        })?;
        let weight = weights.map(|w| w[idx]).unwrap_or(1.0);
        sum += value * weight;
    }
    Ok(sum)
}
