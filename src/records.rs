use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const SEATS_PER_ALLIANCE: usize = 3;
pub const OBSERVATIONS_PER_MATCH: usize = 2 * SEATS_PER_ALLIANCE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Alliance {
    Red,
    Blue,
}

impl Alliance {
    pub const BOTH: [Alliance; 2] = [Alliance::Red, Alliance::Blue];

    pub fn as_str(self) -> &'static str {
        match self {
            Alliance::Red => "red",
            Alliance::Blue => "blue",
        }
    }

    pub fn parse(raw: &str) -> Option<Alliance> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "red" => Some(Alliance::Red),
            "blue" => Some(Alliance::Blue),
            _ => None,
        }
    }
}

impl fmt::Display for Alliance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scouted row for a single (team, match) pair. The per-season field sets
/// live in the counter/flag maps so the engine stays season-agnostic; which
/// fields exist is decided by the season config, not by this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamObservation {
    pub team: String,
    pub match_key: String,
    pub alliance: Alliance,
    /// Driver-station slot within the alliance, 1..=3.
    pub seat: u8,
    pub counters: BTreeMap<String, f64>,
    pub flags: BTreeMap<String, bool>,
    pub outcome: Option<String>,
    pub notes: Option<String>,
    pub recorded_at: String,
}

impl TeamObservation {
    pub fn counter(&self, field: &str) -> Option<f64> {
        self.counters.get(field).copied()
    }

    pub fn flag(&self, field: &str) -> Option<bool> {
        self.flags.get(field).copied()
    }
}

/// Per-alliance slice of an authoritative match result. Numeric fields mirror
/// the observation counters so the two sides can be compared; per-robot
/// categorical fields are keyed `<field><seat>` in scouted seat order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllianceBreakdown {
    #[serde(default)]
    pub numbers: BTreeMap<String, f64>,
    #[serde(default)]
    pub seat_labels: BTreeMap<String, String>,
}

impl AllianceBreakdown {
    pub fn number(&self, field: &str) -> Option<f64> {
        self.numbers.get(field).copied()
    }

    pub fn seat_label(&self, field: &str) -> Option<&str> {
        self.seat_labels.get(field).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_key: String,
    pub winner: Option<Alliance>,
    pub red: AllianceBreakdown,
    pub blue: AllianceBreakdown,
    pub fetched_at: String,
}

impl MatchResult {
    pub fn breakdown(&self, alliance: Alliance) -> &AllianceBreakdown {
        match alliance {
            Alliance::Red => &self.red,
            Alliance::Blue => &self.blue,
        }
    }
}

/// A recorded disagreement between the scouted and authoritative views, or a
/// malformed input caught before comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Discrepancy {
    pub category: String,
    pub match_key: Option<String>,
    pub alliance: Option<Alliance>,
    pub description: String,
}

impl Discrepancy {
    pub fn new(
        category: &str,
        match_key: Option<&str>,
        alliance: Option<Alliance>,
        description: String,
    ) -> Discrepancy {
        Discrepancy {
            category: category.to_string(),
            match_key: match_key.map(|k| k.to_string()),
            alliance,
            description,
        }
    }
}

/// A calculated cell. `Null` is an explicit marker, not an absent key: every
/// roster team carries every column even when it has no usable observations.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Text(String),
    Null,
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetricValue::Null)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MetricValue::Number(n) => serde_json::Value::from(*n),
            MetricValue::Text(s) => serde_json::Value::from(s.as_str()),
            MetricValue::Null => serde_json::Value::Null,
        }
    }

    pub fn from_json(value: &serde_json::Value) -> MetricValue {
        match value {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => MetricValue::Number(f),
                None => MetricValue::Null,
            },
            serde_json::Value::String(s) => MetricValue::Text(s.clone()),
            _ => MetricValue::Null,
        }
    }
}

/// One wide output row per roster team, fully recomputed each run.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamMetricRow {
    pub team: String,
    pub values: BTreeMap<String, MetricValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alliance_parse_is_case_insensitive() {
        assert_eq!(Alliance::parse("Red"), Some(Alliance::Red));
        assert_eq!(Alliance::parse(" BLUE "), Some(Alliance::Blue));
        assert_eq!(Alliance::parse("green"), None);
    }

    #[test]
    fn metric_value_json_round_trip() {
        let cases = [
            MetricValue::Number(1.5),
            MetricValue::Text("Hang".to_string()),
            MetricValue::Null,
        ];
        for value in cases {
            assert_eq!(MetricValue::from_json(&value.to_json()), value);
        }
    }
}
