use scout_audit::alliances::AllianceIndex;
use scout_audit::rating;
use scout_audit::synthetic::{self, SyntheticSpec};

#[test]
fn contribution_rating_recovers_true_rates() {
    // The synthetic league is closed: every alliance total is the exact sum
    // of its members' fixed rates, so the fit has a unique exact answer.
    let spec = SyntheticSpec {
        teams: 12,
        matches: 60,
        seed: 4099,
    };
    let event = synthetic::generate(&spec);
    let index = AllianceIndex::from_rows(&event.members);

    let outcome = rating::contribution_rating(
        &["total_points".to_string()],
        &event.results,
        &index,
    );

    assert!(outcome.converged);
    assert_eq!(outcome.equations, 2 * spec.matches);
    assert_eq!(outcome.values.len(), event.teams.len());
    for (team, truth) in &event.true_contribution {
        let fitted = outcome.values[team];
        assert!(
            (fitted - truth).abs() < 1e-3,
            "{team}: fitted {fitted}, true {truth}"
        );
    }
}

#[test]
fn rating_sums_multiple_authoritative_fields() {
    let spec = SyntheticSpec {
        teams: 12,
        matches: 60,
        seed: 7,
    };
    let event = synthetic::generate(&spec);
    let index = AllianceIndex::from_rows(&event.members);

    // low + high alliance totals fit a rate of low_rate + high_rate per team,
    // which differs from the points rate whenever a team shoots high at all.
    let outcome = rating::contribution_rating(
        &["low_goal_total".to_string(), "high_goal_total".to_string()],
        &event.results,
        &index,
    );

    assert!(outcome.converged);
    let points = rating::contribution_rating(
        &["total_points".to_string()],
        &event.results,
        &index,
    );
    let differs = event
        .teams
        .iter()
        .any(|team| (outcome.values[team] - points.values[team]).abs() > 0.5);
    assert!(differs, "high goals should be worth more in the points fit");
}

#[test]
fn missing_field_drops_the_equation_instead_of_failing() {
    let spec = SyntheticSpec::default();
    let mut event = synthetic::generate(&spec);
    let index = AllianceIndex::from_rows(&event.members);

    event.results[0].red.numbers.remove("total_points");

    let outcome = rating::contribution_rating(
        &["total_points".to_string()],
        &event.results,
        &index,
    );
    assert_eq!(outcome.equations, 2 * spec.matches - 1);
}
