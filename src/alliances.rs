use std::collections::HashMap;

use tracing::warn;

use crate::records::{Alliance, SEATS_PER_ALLIANCE};
use crate::store::MemberRow;

/// Read-only lookup from (match, alliance, seat) to team, derived from the
/// stored match schedule. Built once per run from a snapshot; membership does
/// not change once a match is scheduled.
#[derive(Debug, Clone, Default)]
pub struct AllianceIndex {
    seats: HashMap<(String, Alliance), [Option<String>; SEATS_PER_ALLIANCE]>,
}

impl AllianceIndex {
    pub fn from_rows(rows: &[MemberRow]) -> AllianceIndex {
        let mut seats: HashMap<(String, Alliance), [Option<String>; SEATS_PER_ALLIANCE]> =
            HashMap::new();
        for row in rows {
            if !(1..=SEATS_PER_ALLIANCE as u8).contains(&row.seat) {
                warn!(
                    match_key = %row.match_key,
                    seat = row.seat,
                    "membership row has out-of-range seat, skipping"
                );
                continue;
            }
            let entry = seats
                .entry((row.match_key.clone(), row.alliance))
                .or_insert_with(|| [None, None, None]);
            let slot = &mut entry[(row.seat - 1) as usize];
            if let Some(existing) = slot
                && existing != &row.team
            {
                warn!(
                    match_key = %row.match_key,
                    alliance = %row.alliance,
                    seat = row.seat,
                    "duplicate membership row, keeping first"
                );
                continue;
            }
            *slot = Some(row.team.clone());
        }
        AllianceIndex { seats }
    }

    /// The three members in seat order, or None unless all seats are known.
    pub fn members(&self, match_key: &str, alliance: Alliance) -> Option<[&str; 3]> {
        let entry = self.seats.get(&(match_key.to_string(), alliance))?;
        match (&entry[0], &entry[1], &entry[2]) {
            (Some(a), Some(b), Some(c)) => Some([a.as_str(), b.as_str(), c.as_str()]),
            _ => None,
        }
    }

    pub fn team_at(&self, match_key: &str, alliance: Alliance, seat: u8) -> Option<&str> {
        if !(1..=SEATS_PER_ALLIANCE as u8).contains(&seat) {
            return None;
        }
        self.seats
            .get(&(match_key.to_string(), alliance))?
            .get((seat - 1) as usize)?
            .as_deref()
    }

    pub fn contains_match(&self, match_key: &str) -> bool {
        Alliance::BOTH
            .iter()
            .any(|alliance| self.seats.contains_key(&(match_key.to_string(), *alliance)))
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }
}
