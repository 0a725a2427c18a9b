use std::collections::{BTreeSet, HashMap};

use crate::match_key;
use crate::records::TeamObservation;

/// One computed numeric output column keyed by team. Teams with no usable
/// value for the metric are simply absent; the sink outer-joins the roster
/// and fills the gaps with explicit nulls.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricColumn {
    pub name: String,
    pub values: HashMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextColumn {
    pub name: String,
    pub values: HashMap<String, String>,
}

pub fn average(observations: &[TeamObservation], field: &str) -> MetricColumn {
    let grouped = group_counter(observations, field, None);
    MetricColumn {
        name: format!("{field}_avg"),
        values: grouped
            .into_iter()
            .map(|(team, values)| (team, mean(&values)))
            .collect(),
    }
}

pub fn median(observations: &[TeamObservation], field: &str) -> MetricColumn {
    let grouped = group_counter(observations, field, None);
    MetricColumn {
        name: format!("{field}_med"),
        values: grouped
            .into_iter()
            .map(|(team, values)| (team, median_of(values)))
            .collect(),
    }
}

/// Average restricted to observations where `flag` is set. A metric that is
/// only meaningful conditional on an attempt must not count non-attempts as
/// zero, and a team that never attempted simply has no value.
pub fn average_filtered(
    observations: &[TeamObservation],
    field: &str,
    flag: &str,
) -> MetricColumn {
    let grouped = group_counter(observations, field, Some(flag));
    MetricColumn {
        name: format!("{field}_avg"),
        values: grouped
            .into_iter()
            .map(|(team, values)| (team, mean(&values)))
            .collect(),
    }
}

pub fn median_filtered(
    observations: &[TeamObservation],
    field: &str,
    flag: &str,
) -> MetricColumn {
    let grouped = group_counter(observations, field, Some(flag));
    MetricColumn {
        name: format!("{field}_med"),
        values: grouped
            .into_iter()
            .map(|(team, values)| (team, median_of(values)))
            .collect(),
    }
}

/// Per-team fraction of observations with each boolean flag set. Observations
/// missing the flag entirely are dropped from that flag's denominator.
pub fn flag_percentages(
    observations: &[TeamObservation],
    fields: &[String],
) -> Vec<MetricColumn> {
    fields
        .iter()
        .map(|field| {
            let mut grouped: HashMap<String, Vec<f64>> = HashMap::new();
            for obs in observations {
                if let Some(set) = obs.flag(field) {
                    grouped
                        .entry(obs.team.clone())
                        .or_default()
                        .push(if set { 1.0 } else { 0.0 });
                }
            }
            MetricColumn {
                name: format!("{field}_pct"),
                values: grouped
                    .into_iter()
                    .map(|(team, values)| (team, mean(&values)))
                    .collect(),
            }
        })
        .collect()
}

/// Expands the single categorical outcome field into one `_pct` column per
/// category. The category space is the union of `possible_values` and what
/// was actually observed: a category nobody reached still yields an all-zero
/// column, and a value outside the configured space still contributes to the
/// denominator, so each team's percentages always sum to one.
pub fn outcome_percentages(
    observations: &[TeamObservation],
    possible_values: &[String],
    replacements: &std::collections::BTreeMap<String, String>,
) -> Vec<MetricColumn> {
    let mut categories: BTreeSet<String> = possible_values.iter().cloned().collect();
    let mut per_team: HashMap<String, Vec<String>> = HashMap::new();
    for obs in observations {
        let Some(raw) = obs.outcome.as_deref() else {
            continue;
        };
        let value = replacements.get(raw).map(|v| v.as_str()).unwrap_or(raw);
        categories.insert(value.to_string());
        per_team
            .entry(obs.team.clone())
            .or_default()
            .push(value.to_string());
    }

    categories
        .iter()
        .map(|category| {
            let values = per_team
                .iter()
                .map(|(team, outcomes)| {
                    let hits = outcomes.iter().filter(|o| *o == category).count();
                    (team.clone(), hits as f64 / outcomes.len() as f64)
                })
                .collect();
            MetricColumn {
                name: format!("{}_pct", slug(category)),
                values,
            }
        })
        .collect()
}

/// Each bucket's share of the team's total volume across all buckets: a ratio
/// of summed counts, not a mean of per-match ratios. Teams with zero total
/// volume have no defined share and are left absent.
pub fn volume_percentages(
    observations: &[TeamObservation],
    fields: &[String],
) -> Vec<MetricColumn> {
    let mut sums: HashMap<String, Vec<f64>> = HashMap::new();
    for obs in observations {
        let entry = sums
            .entry(obs.team.clone())
            .or_insert_with(|| vec![0.0; fields.len()]);
        for (idx, field) in fields.iter().enumerate() {
            entry[idx] += obs.counter(field).unwrap_or(0.0);
        }
    }

    fields
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let values = sums
                .iter()
                .filter_map(|(team, totals)| {
                    let all: f64 = totals.iter().sum();
                    if all > 0.0 {
                        Some((team.clone(), totals[idx] / all))
                    } else {
                        None
                    }
                })
                .collect();
            MetricColumn {
                name: format!("{field}_volume_pct"),
                values,
            }
        })
        .collect()
}

/// Concatenates every scouted note per team in schedule order, each entry
/// tagged with the abbreviated match key for traceability.
pub fn notes_rollup(observations: &[TeamObservation]) -> TextColumn {
    let mut per_team: HashMap<String, Vec<&TeamObservation>> = HashMap::new();
    for obs in observations {
        if obs.notes.as_deref().is_some_and(|n| !n.trim().is_empty()) {
            per_team.entry(obs.team.clone()).or_default().push(obs);
        }
    }

    let values = per_team
        .into_iter()
        .map(|(team, mut rows)| {
            rows.sort_by_key(|obs| match_key::parse(&obs.match_key).map(|p| p.sort_rank()));
            let joined = rows
                .iter()
                .map(|obs| {
                    format!(
                        "{}: {}",
                        match_key::short_label(&obs.match_key),
                        obs.notes.as_deref().unwrap_or("").trim()
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            (team, joined)
        })
        .collect();

    TextColumn {
        name: "notes".to_string(),
        values,
    }
}

fn group_counter(
    observations: &[TeamObservation],
    field: &str,
    flag: Option<&str>,
) -> HashMap<String, Vec<f64>> {
    let mut grouped: HashMap<String, Vec<f64>> = HashMap::new();
    for obs in observations {
        if let Some(flag) = flag
            && obs.flag(flag) != Some(true)
        {
            continue;
        }
        if let Some(value) = obs.counter(field) {
            grouped.entry(obs.team.clone()).or_default().push(value);
        }
    }
    grouped
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median_of(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// `Near Trench?` -> `near_trench` so category labels make sane column names.
fn slug(label: &str) -> String {
    let lower = label.trim().to_ascii_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut prev_us = false;
    for ch in lower.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            prev_us = false;
        } else if !prev_us && !out.is_empty() {
            out.push('_');
            prev_us = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Alliance;
    use std::collections::BTreeMap;

    fn obs(team: &str, match_key: &str, low: Option<f64>) -> TeamObservation {
        let mut counters = BTreeMap::new();
        if let Some(low) = low {
            counters.insert("low_goal".to_string(), low);
        }
        TeamObservation {
            team: team.to_string(),
            match_key: match_key.to_string(),
            alliance: Alliance::Red,
            seat: 1,
            counters,
            flags: BTreeMap::new(),
            outcome: None,
            notes: None,
            recorded_at: "2020-02-29T10:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn average_drops_missing_values_not_teams() {
        let rows = vec![
            obs("frc1", "2020vahay_qm1", Some(4.0)),
            obs("frc1", "2020vahay_qm2", None),
            obs("frc1", "2020vahay_qm3", Some(8.0)),
            obs("frc2", "2020vahay_qm1", None),
        ];
        let column = average(&rows, "low_goal");
        assert_eq!(column.name, "low_goal_avg");
        assert_eq!(column.values.get("frc1"), Some(&6.0));
        // frc2 never recorded the counter: absent here, nulled by the sink.
        assert!(!column.values.contains_key("frc2"));
    }

    #[test]
    fn median_handles_even_and_odd_counts() {
        let rows = vec![
            obs("frc1", "2020vahay_qm1", Some(1.0)),
            obs("frc1", "2020vahay_qm2", Some(9.0)),
            obs("frc1", "2020vahay_qm3", Some(2.0)),
            obs("frc2", "2020vahay_qm1", Some(1.0)),
            obs("frc2", "2020vahay_qm2", Some(4.0)),
        ];
        let column = median(&rows, "low_goal");
        assert_eq!(column.values.get("frc1"), Some(&2.0));
        assert_eq!(column.values.get("frc2"), Some(&2.5));
    }

    #[test]
    fn filtered_average_only_counts_attempts() {
        let mut attempted = obs("frc1", "2020vahay_qm1", Some(12.0));
        attempted.flags.insert("climb_attempted".to_string(), true);
        let mut skipped = obs("frc1", "2020vahay_qm2", Some(0.0));
        skipped.flags.insert("climb_attempted".to_string(), false);
        let mut never = obs("frc2", "2020vahay_qm1", Some(30.0));
        never.flags.insert("climb_attempted".to_string(), false);

        let rows = vec![attempted, skipped, never];
        let column = average_filtered(&rows, "low_goal", "climb_attempted");
        assert_eq!(column.values.get("frc1"), Some(&12.0));
        // A team that never attempted has no value at all, not a zero.
        assert!(!column.values.contains_key("frc2"));
    }

    #[test]
    fn flag_percentages_average_over_present_flags() {
        let mut a = obs("frc1", "2020vahay_qm1", None);
        a.flags.insert("near_trench".to_string(), true);
        let mut b = obs("frc1", "2020vahay_qm2", None);
        b.flags.insert("near_trench".to_string(), false);
        let c = obs("frc1", "2020vahay_qm3", None);

        let columns = flag_percentages(&[a, b, c], &["near_trench".to_string()]);
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "near_trench_pct");
        assert_eq!(columns[0].values.get("frc1"), Some(&0.5));
    }

    #[test]
    fn outcome_percentages_synthesize_absent_categories() {
        let mut a = obs("frc1", "2020vahay_qm1", None);
        a.outcome = Some("Hang".to_string());
        let mut b = obs("frc1", "2020vahay_qm2", None);
        b.outcome = Some("Park".to_string());
        let rows = vec![a, b];

        let possible = vec![
            "None".to_string(),
            "Park".to_string(),
            "Hang".to_string(),
        ];
        let columns = outcome_percentages(&rows, &possible, &BTreeMap::new());
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"none_pct"));
        assert!(names.contains(&"park_pct"));
        assert!(names.contains(&"hang_pct"));

        let none = columns.iter().find(|c| c.name == "none_pct").unwrap();
        let hang = columns.iter().find(|c| c.name == "hang_pct").unwrap();
        // Nobody recorded "None": the column still exists as all-zero, so the
        // category space is never silently shrunk.
        assert_eq!(none.values.get("frc1"), Some(&0.0));
        assert_eq!(hang.values.get("frc1"), Some(&0.5));

        let total: f64 = columns
            .iter()
            .filter_map(|c| c.values.get("frc1"))
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn outcome_percentages_apply_replacements_first() {
        let mut a = obs("frc1", "2020vahay_qm1", None);
        a.outcome = Some("No Climb".to_string());
        let mut replacements = BTreeMap::new();
        replacements.insert("No Climb".to_string(), "None".to_string());

        let columns = outcome_percentages(&[a], &["None".to_string()], &replacements);
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "none_pct");
        assert_eq!(columns[0].values.get("frc1"), Some(&1.0));
    }

    #[test]
    fn volume_percentages_are_ratios_of_sums() {
        let mut a = obs("frc1", "2020vahay_qm1", Some(9.0));
        a.counters.insert("high_goal".to_string(), 1.0);
        let mut b = obs("frc1", "2020vahay_qm2", Some(1.0));
        b.counters.insert("high_goal".to_string(), 9.0);
        let zero = obs("frc2", "2020vahay_qm1", Some(0.0));

        let fields = vec!["low_goal".to_string(), "high_goal".to_string()];
        let columns = volume_percentages(&[a, b, zero], &fields);
        let low = columns.iter().find(|c| c.name == "low_goal_volume_pct").unwrap();
        let high = columns
            .iter()
            .find(|c| c.name == "high_goal_volume_pct")
            .unwrap();
        assert_eq!(low.values.get("frc1"), Some(&0.5));
        assert_eq!(high.values.get("frc1"), Some(&0.5));
        // Zero total volume: share is undefined, not zero.
        assert!(!low.values.contains_key("frc2"));
    }

    #[test]
    fn notes_rollup_tags_entries_in_schedule_order() {
        let mut late = obs("frc1", "2020vahay_qm10", None);
        late.notes = Some("slow intake".to_string());
        let mut early = obs("frc1", "2020vahay_qm2", None);
        early.notes = Some("fast cycles".to_string());
        let blank = obs("frc1", "2020vahay_qm3", None);

        let column = notes_rollup(&[late, early, blank]);
        assert_eq!(
            column.values.get("frc1").map(|s| s.as_str()),
            Some("qm2: fast cycles; qm10: slow intake")
        );
    }

    #[test]
    fn slug_compacts_labels() {
        assert_eq!(slug("Near Trench?"), "near_trench");
        assert_eq!(slug("No Climb"), "no_climb");
        assert_eq!(slug("Hang"), "hang");
    }
}
