use std::collections::{BTreeMap, HashMap};

use crate::aggregate::{MetricColumn, TextColumn};
use crate::records::{MetricValue, TeamMetricRow};

/// A column headed for the output table, in the order the pipeline produced
/// it. Several stages independently emit `_pct` names, so ordering matters
/// for collision resolution.
#[derive(Debug, Clone)]
pub enum SinkColumn {
    Number(MetricColumn),
    Text(TextColumn),
}

impl SinkColumn {
    fn name(&self) -> &str {
        match self {
            SinkColumn::Number(col) => &col.name,
            SinkColumn::Text(col) => &col.name,
        }
    }
}

/// Outer-joins every computed column onto the full roster: one row per team,
/// every column present on every row, explicit nulls for gaps. Duplicate
/// column names get `_2`, `_3`, ... suffixes in arrival order. Deterministic
/// throughout, so an unchanged snapshot rebuilds identical rows.
pub fn build_team_table(roster: &[String], columns: Vec<SinkColumn>) -> Vec<TeamMetricRow> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut named: Vec<(String, SinkColumn)> = Vec::with_capacity(columns.len());
    for column in columns {
        let count = seen.entry(column.name().to_string()).or_insert(0);
        *count += 1;
        let name = if *count == 1 {
            column.name().to_string()
        } else {
            format!("{}_{count}", column.name())
        };
        named.push((name, column));
    }

    roster
        .iter()
        .map(|team| {
            let mut values = BTreeMap::new();
            for (name, column) in &named {
                let value = match column {
                    SinkColumn::Number(col) => col
                        .values
                        .get(team)
                        .map(|v| MetricValue::Number(*v))
                        .unwrap_or(MetricValue::Null),
                    SinkColumn::Text(col) => col
                        .values
                        .get(team)
                        .map(|v| MetricValue::Text(v.clone()))
                        .unwrap_or(MetricValue::Null),
                };
                values.insert(name.clone(), value);
            }
            TeamMetricRow {
                team: team.clone(),
                values,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(name: &str, pairs: &[(&str, f64)]) -> SinkColumn {
        SinkColumn::Number(MetricColumn {
            name: name.to_string(),
            values: pairs
                .iter()
                .map(|(team, value)| (team.to_string(), *value))
                .collect(),
        })
    }

    #[test]
    fn every_roster_team_gets_a_row_with_every_column() {
        let roster = vec!["frc1".to_string(), "frc2".to_string(), "frc3".to_string()];
        let rows = build_team_table(
            &roster,
            vec![
                number("low_goal_avg", &[("frc1", 4.0)]),
                SinkColumn::Text(TextColumn {
                    name: "notes".to_string(),
                    values: [("frc2".to_string(), "qm1: ok".to_string())]
                        .into_iter()
                        .collect(),
                }),
            ],
        );

        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(row.values.len(), 2);
        }
        assert_eq!(rows[0].values["low_goal_avg"], MetricValue::Number(4.0));
        assert_eq!(rows[1].values["low_goal_avg"], MetricValue::Null);
        assert_eq!(
            rows[1].values["notes"],
            MetricValue::Text("qm1: ok".to_string())
        );
        assert_eq!(rows[2].values["notes"], MetricValue::Null);
    }

    #[test]
    fn duplicate_column_names_are_disambiguated_in_arrival_order() {
        let roster = vec!["frc1".to_string()];
        let rows = build_team_table(
            &roster,
            vec![
                number("hang_pct", &[("frc1", 0.5)]),
                number("hang_pct", &[("frc1", 0.25)]),
                number("hang_pct", &[("frc1", 0.125)]),
            ],
        );
        assert_eq!(rows[0].values["hang_pct"], MetricValue::Number(0.5));
        assert_eq!(rows[0].values["hang_pct_2"], MetricValue::Number(0.25));
        assert_eq!(rows[0].values["hang_pct_3"], MetricValue::Number(0.125));
    }

    #[test]
    fn rebuilding_from_the_same_inputs_is_identical() {
        let roster = vec!["frc1".to_string(), "frc2".to_string()];
        let columns = || {
            vec![
                number("low_goal_avg", &[("frc1", 4.0), ("frc2", 2.0)]),
                number("low_goal_med", &[("frc1", 3.0)]),
            ]
        };
        assert_eq!(
            build_team_table(&roster, columns()),
            build_team_table(&roster, columns())
        );
    }
}
