use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::{FilteredStat, OutcomeCheck, RatingConfig, SeasonConfig, SumCheck};
use crate::records::{Alliance, AllianceBreakdown, MatchResult, TeamObservation};
use crate::store::{MemberRow, Store};

const OUTCOMES: [&str; 3] = ["None", "Park", "Hang"];
const NOTES: [&str; 4] = [
    "fast cycles",
    "slow intake",
    "played defense all match",
    "tipped over once",
];

#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub teams: usize,
    pub matches: usize,
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        SyntheticSpec {
            teams: 12,
            matches: 30,
            seed: 4099,
        }
    }
}

/// A fully consistent synthetic event: observations, authoritative results,
/// and a schedule that all agree with each other, plus the known per-team
/// contributions the results were built from. Checks on this data find
/// nothing; corrupt one side to get exactly the discrepancies you injected.
#[derive(Debug, Clone)]
pub struct SyntheticEvent {
    pub teams: Vec<String>,
    pub true_contribution: HashMap<String, f64>,
    pub observations: Vec<TeamObservation>,
    pub results: Vec<MatchResult>,
    pub members: Vec<MemberRow>,
}

/// The season config the generated fields line up with.
pub fn season_config() -> SeasonConfig {
    let string_vec = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut outcome_replacements = BTreeMap::new();
    outcome_replacements.insert("No Climb".to_string(), "None".to_string());

    SeasonConfig {
        event: "vahay".to_string(),
        year: 2020,
        tolerance: 2.0,
        stat_fields: string_vec(&["low_goal", "high_goal", "misses", "fouls"]),
        attempted_stats: vec![FilteredStat {
            field: "climb_time".to_string(),
            flag: "climb_attempted".to_string(),
        }],
        flag_percentages: string_vec(&["climb_attempted"]),
        outcome_values: string_vec(&["None", "Park", "Hang"]),
        outcome_replacements,
        volume_fields: string_vec(&["low_goal", "high_goal", "misses"]),
        sum_checks: vec![
            SumCheck {
                category: "low goal".to_string(),
                observation_fields: string_vec(&["low_goal"]),
                authoritative_fields: string_vec(&["low_goal_total"]),
                observation_weights: None,
                authoritative_weights: None,
            },
            SumCheck {
                category: "high goal".to_string(),
                observation_fields: string_vec(&["high_goal"]),
                authoritative_fields: string_vec(&["high_goal_total"]),
                observation_weights: None,
                authoritative_weights: None,
            },
            SumCheck {
                category: "total points".to_string(),
                observation_fields: string_vec(&["low_goal", "high_goal"]),
                authoritative_fields: string_vec(&["total_points"]),
                observation_weights: Some(vec![1.0, 2.0]),
                authoritative_weights: None,
            },
        ],
        outcome_check: Some(OutcomeCheck {
            category: "endgame status".to_string(),
            authoritative_fields: [
                "endgame_robot1".to_string(),
                "endgame_robot2".to_string(),
                "endgame_robot3".to_string(),
            ],
            observation_default: "Unknown".to_string(),
            authoritative_default: "None".to_string(),
        }),
        rating: Some(RatingConfig {
            column: "total_points_rating".to_string(),
            authoritative_fields: vec!["total_points".to_string()],
        }),
    }
}

pub fn generate(spec: &SyntheticSpec) -> SyntheticEvent {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let team_count = spec.teams.max(6);

    let teams: Vec<String> = (0..team_count)
        .map(|idx| format!("frc{}", 1000 + idx))
        .collect();

    // Each team scores at a fixed true rate; every alliance total below is the
    // exact sum of its members' rates, so the league is closed by construction.
    let mut low_rate: HashMap<String, f64> = HashMap::new();
    let mut high_rate: HashMap<String, f64> = HashMap::new();
    let mut true_contribution: HashMap<String, f64> = HashMap::new();
    for team in &teams {
        let low = rng.gen_range(0..=8) as f64;
        let high = rng.gen_range(0..=10) as f64;
        low_rate.insert(team.clone(), low);
        high_rate.insert(team.clone(), high);
        true_contribution.insert(team.clone(), low + 2.0 * high);
    }

    let mut observations = Vec::new();
    let mut results = Vec::new();
    let mut members = Vec::new();

    for match_idx in 0..spec.matches {
        let match_key = format!("2020vahay_qm{}", match_idx + 1);
        let mut order: Vec<usize> = (0..teams.len()).collect();
        order.shuffle(&mut rng);

        let mut breakdowns: HashMap<Alliance, AllianceBreakdown> = HashMap::new();
        let mut totals: HashMap<Alliance, f64> = HashMap::new();

        for (side, alliance) in Alliance::BOTH.into_iter().enumerate() {
            let mut breakdown = AllianceBreakdown::default();
            let mut low_total = 0.0;
            let mut high_total = 0.0;
            let mut points_total = 0.0;

            for seat in 1..=3u8 {
                let team = teams[order[side * 3 + (seat - 1) as usize]].clone();
                members.push(MemberRow {
                    match_key: match_key.clone(),
                    alliance,
                    seat,
                    team: team.clone(),
                });

                let low = low_rate[&team];
                let high = high_rate[&team];
                low_total += low;
                high_total += high;
                points_total += true_contribution[&team];

                let outcome = OUTCOMES[rng.gen_range(0..OUTCOMES.len())];
                let attempted = outcome != "None";

                let mut counters = BTreeMap::new();
                counters.insert("low_goal".to_string(), low);
                counters.insert("high_goal".to_string(), high);
                counters.insert("misses".to_string(), rng.gen_range(0..=5) as f64);
                counters.insert("fouls".to_string(), rng.gen_range(0..=2) as f64);
                if attempted {
                    counters.insert("climb_time".to_string(), rng.gen_range(5..=20) as f64);
                }
                let mut flags = BTreeMap::new();
                flags.insert("climb_attempted".to_string(), attempted);

                let notes = if rng.gen_bool(0.3) {
                    Some(NOTES[rng.gen_range(0..NOTES.len())].to_string())
                } else {
                    None
                };

                breakdown.seat_labels.insert(
                    format!("endgame_robot{seat}"),
                    outcome.to_string(),
                );
                observations.push(TeamObservation {
                    team,
                    match_key: match_key.clone(),
                    alliance,
                    seat,
                    counters,
                    flags,
                    outcome: Some(outcome.to_string()),
                    notes,
                    recorded_at: "2020-02-29T10:00:00+00:00".to_string(),
                });
            }

            breakdown.numbers.insert("low_goal_total".to_string(), low_total);
            breakdown.numbers.insert("high_goal_total".to_string(), high_total);
            breakdown.numbers.insert("total_points".to_string(), points_total);
            totals.insert(alliance, points_total);
            breakdowns.insert(alliance, breakdown);
        }

        let red_total = totals[&Alliance::Red];
        let blue_total = totals[&Alliance::Blue];
        let winner = if red_total > blue_total {
            Some(Alliance::Red)
        } else if blue_total > red_total {
            Some(Alliance::Blue)
        } else {
            None
        };

        results.push(MatchResult {
            match_key,
            winner,
            red: breakdowns.remove(&Alliance::Red).unwrap_or_default(),
            blue: breakdowns.remove(&Alliance::Blue).unwrap_or_default(),
            fetched_at: "2020-02-29T11:00:00+00:00".to_string(),
        });
    }

    SyntheticEvent {
        teams,
        true_contribution,
        observations,
        results,
        members,
    }
}

pub fn seed_store(store: &Store, event: &SyntheticEvent) -> Result<()> {
    for team in &event.teams {
        store.add_team(team)?;
    }
    for obs in &event.observations {
        store.upsert_observation(obs)?;
    }
    for result in &event.results {
        store.upsert_match_result(result)?;
    }
    for row in &event.members {
        store.set_alliance_member(&row.match_key, row.alliance, row.seat, &row.team)?;
    }
    Ok(())
}
