use once_cell::sync::Lazy;
use regex::Regex;

/// Grammar: `<year><event>_<level><number>[m<replay>]`, e.g. `2020vahay_qm12`
/// or `2020vahay_sf1m2`. Anything else is manual data-entry corruption.
static MATCH_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})([a-z][a-z0-9]{2,7})_(qm|ef|qf|sf|f)(\d{1,3})(?:m(\d))?$")
        .expect("match key pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompLevel {
    Qualification,
    EighthFinal,
    QuarterFinal,
    SemiFinal,
    Final,
}

impl CompLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            CompLevel::Qualification => "qm",
            CompLevel::EighthFinal => "ef",
            CompLevel::QuarterFinal => "qf",
            CompLevel::SemiFinal => "sf",
            CompLevel::Final => "f",
        }
    }

    fn from_token(token: &str) -> Option<CompLevel> {
        match token {
            "qm" => Some(CompLevel::Qualification),
            "ef" => Some(CompLevel::EighthFinal),
            "qf" => Some(CompLevel::QuarterFinal),
            "sf" => Some(CompLevel::SemiFinal),
            "f" => Some(CompLevel::Final),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMatchKey {
    pub year: u16,
    pub event_code: String,
    pub level: CompLevel,
    pub number: u16,
    pub replay: Option<u8>,
}

impl ParsedMatchKey {
    pub fn event_key(&self) -> String {
        format!("{}{}", self.year, self.event_code)
    }

    /// Abbreviated form used to tag free-text rollups: `qm12`, `sf1m2`.
    pub fn short_label(&self) -> String {
        match self.replay {
            Some(replay) => format!("{}{}m{}", self.level.as_str(), self.number, replay),
            None => format!("{}{}", self.level.as_str(), self.number),
        }
    }

    /// Sort key giving schedule order: level, then match number, then replay.
    pub fn sort_rank(&self) -> (CompLevel, u16, u8) {
        (self.level, self.number, self.replay.unwrap_or(0))
    }
}

pub fn parse(key: &str) -> Option<ParsedMatchKey> {
    let caps = MATCH_KEY_RE.captures(key)?;
    let year = caps.get(1)?.as_str().parse::<u16>().ok()?;
    let event_code = caps.get(2)?.as_str().to_string();
    let level = CompLevel::from_token(caps.get(3)?.as_str())?;
    let number = caps.get(4)?.as_str().parse::<u16>().ok()?;
    let replay = match caps.get(5) {
        Some(m) => Some(m.as_str().parse::<u8>().ok()?),
        None => None,
    };
    Some(ParsedMatchKey {
        year,
        event_code,
        level,
        number,
        replay,
    })
}

pub fn is_valid(key: &str) -> bool {
    parse(key).is_some()
}

/// Abbreviation for display; falls back to the raw key when it does not parse.
pub fn short_label(key: &str) -> String {
    match parse(key) {
        Some(parsed) => parsed.short_label(),
        None => key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_keys() {
        assert!(is_valid("2020vahay_qm12"));
        assert!(is_valid("2020vahay_f1"));
        assert!(is_valid("2020vahay_sf1m2"));
        assert!(is_valid("2019nyro_ef3"));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(!is_valid("2020vahay-qm12"));
        assert!(!is_valid("qm12"));
        assert!(!is_valid("2020vahay_xx12"));
        assert!(!is_valid("2020vahay_qm"));
        assert!(!is_valid("2020VAHAY_qm12"));
        assert!(!is_valid(""));
    }

    #[test]
    fn parse_extracts_components() {
        let parsed = parse("2020vahay_sf1m2").expect("key should parse");
        assert_eq!(parsed.year, 2020);
        assert_eq!(parsed.event_code, "vahay");
        assert_eq!(parsed.level, CompLevel::SemiFinal);
        assert_eq!(parsed.number, 1);
        assert_eq!(parsed.replay, Some(2));
        assert_eq!(parsed.event_key(), "2020vahay");
    }

    #[test]
    fn short_labels_drop_the_event_prefix() {
        assert_eq!(short_label("2020vahay_qm12"), "qm12");
        assert_eq!(short_label("2020vahay_sf1m2"), "sf1m2");
        assert_eq!(short_label("garbage"), "garbage");
    }

    #[test]
    fn schedule_order_sorts_quals_before_playoffs() {
        let qm9 = parse("2020vahay_qm9").unwrap();
        let qm10 = parse("2020vahay_qm10").unwrap();
        let qf1 = parse("2020vahay_qf1").unwrap();
        assert!(qm9.sort_rank() < qm10.sort_rank());
        assert!(qm10.sort_rank() < qf1.sort_rank());
    }
}
