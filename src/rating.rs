use std::collections::{BTreeMap, HashMap};

use tracing::{debug, error, warn};

use crate::alliances::AllianceIndex;
use crate::records::{Alliance, MatchResult};

/// Estimated average contribution per team to a scoring metric, from
/// decomposing alliance totals. Residual-minimizing, not unique: teams that
/// always play together are not individually identifiable, and callers must
/// treat ties accordingly.
#[derive(Debug, Clone, Default)]
pub struct RatingOutcome {
    pub values: HashMap<String, f64>,
    pub equations: usize,
    pub iterations: usize,
    pub converged: bool,
}

/// Models each alliance total as the sum of its three members' unknown average
/// contributions: one equation per (match, alliance), a 0/1 incidence vector
/// with exactly three ones, and the summed authoritative fields on the right.
/// Solved iteratively; at hundreds of unknowns and three nonzeros per row a
/// dense inversion is both infeasible to justify and unnecessary.
pub fn contribution_rating(
    fields: &[String],
    results: &[MatchResult],
    index: &AllianceIndex,
) -> RatingOutcome {
    let mut columns: BTreeMap<String, usize> = BTreeMap::new();
    let mut rows: Vec<[usize; 3]> = Vec::new();
    let mut rhs: Vec<f64> = Vec::new();
    let mut skipped = 0usize;

    for result in results {
        for alliance in Alliance::BOTH {
            let Some(members) = index.members(&result.match_key, alliance) else {
                skipped += 1;
                continue;
            };
            let Some(total) = alliance_total(result, alliance, fields) else {
                skipped += 1;
                continue;
            };
            let row = members.map(|team| {
                let next = columns.len();
                *columns.entry(team.to_string()).or_insert(next)
            });
            rows.push(row);
            rhs.push(total);
        }
    }

    if skipped > 0 {
        debug!(skipped, "alliance equations skipped for missing membership or fields");
    }
    if rows.is_empty() {
        warn!("no usable alliance equations, contribution rating is empty");
        return RatingOutcome::default();
    }

    let n = columns.len();
    let solve = lsqr(&rows, &rhs, n, 2 * n + 50, 1e-10);
    if !solve.converged {
        error!(
            iterations = solve.iterations,
            equations = rows.len(),
            unknowns = n,
            "contribution rating did not converge, keeping best estimate"
        );
    }

    let mut values = HashMap::with_capacity(n);
    for (team, idx) in columns {
        values.insert(team, solve.x[idx]);
    }
    RatingOutcome {
        values,
        equations: rows.len(),
        iterations: solve.iterations,
        converged: solve.converged,
    }
}

fn alliance_total(result: &MatchResult, alliance: Alliance, fields: &[String]) -> Option<f64> {
    let breakdown = result.breakdown(alliance);
    let mut total = 0.0;
    for field in fields {
        total += breakdown.number(field)?;
    }
    Some(total)
}

struct LsqrSolve {
    x: Vec<f64>,
    iterations: usize,
    converged: bool,
}

/// LSQR (Paige & Saunders) specialized to unit-coefficient incidence rows.
/// Stops when either the relative residual or the normal-equation residual
/// estimate drops below `tol`; rank-deficient systems settle on the
/// minimum-norm least-squares solution.
fn lsqr(rows: &[[usize; 3]], rhs: &[f64], n: usize, max_iter: usize, tol: f64) -> LsqrSolve {
    let m = rows.len();
    let mut x = vec![0.0; n];

    let mut u = rhs.to_vec();
    let bnorm = norm(&u);
    if bnorm == 0.0 {
        return LsqrSolve {
            x,
            iterations: 0,
            converged: true,
        };
    }
    scale(&mut u, 1.0 / bnorm);

    let mut v = vec![0.0; n];
    mul_transpose(rows, &u, &mut v);
    let mut alpha = norm(&v);
    if alpha == 0.0 {
        return LsqrSolve {
            x,
            iterations: 0,
            converged: true,
        };
    }
    scale(&mut v, 1.0 / alpha);

    let mut w = v.clone();
    let mut phibar = bnorm;
    let mut rhobar = alpha;
    let mut anorm_sq = 0.0f64;

    let mut iterations = 0;
    let mut converged = false;
    let mut scratch_m = vec![0.0; m];
    let mut scratch_n = vec![0.0; n];

    for iter in 1..=max_iter {
        iterations = iter;

        // Bidiagonalization step: u = A v - alpha u, v = A' u - beta v.
        mul(rows, &v, &mut scratch_m);
        for i in 0..m {
            scratch_m[i] -= alpha * u[i];
        }
        let beta = norm(&scratch_m);
        if beta > 0.0 {
            scale(&mut scratch_m, 1.0 / beta);
        }
        std::mem::swap(&mut u, &mut scratch_m);

        mul_transpose(rows, &u, &mut scratch_n);
        for j in 0..n {
            scratch_n[j] -= beta * v[j];
        }
        alpha = norm(&scratch_n);
        if alpha > 0.0 {
            scale(&mut scratch_n, 1.0 / alpha);
        }
        std::mem::swap(&mut v, &mut scratch_n);

        anorm_sq += alpha * alpha + beta * beta;

        // Givens rotation eliminating beta from the bidiagonal system.
        let rho = (rhobar * rhobar + beta * beta).sqrt();
        let c = rhobar / rho;
        let s = beta / rho;
        let theta = s * alpha;
        rhobar = -c * alpha;
        let phi = c * phibar;
        phibar *= s;

        let step = phi / rho;
        let shrink = theta / rho;
        for j in 0..n {
            x[j] += step * w[j];
            w[j] = v[j] - shrink * w[j];
        }

        let residual_ok = phibar <= tol * bnorm;
        let normal_eq = phibar * alpha * c.abs();
        let normal_ok = anorm_sq > 0.0 && normal_eq <= tol * anorm_sq.sqrt() * phibar.max(f64::MIN_POSITIVE);
        if residual_ok || normal_ok || alpha == 0.0 || beta == 0.0 {
            converged = true;
            break;
        }
    }

    LsqrSolve {
        x,
        iterations,
        converged,
    }
}

fn mul(rows: &[[usize; 3]], v: &[f64], out: &mut [f64]) {
    for (i, row) in rows.iter().enumerate() {
        out[i] = v[row[0]] + v[row[1]] + v[row[2]];
    }
}

fn mul_transpose(rows: &[[usize; 3]], u: &[f64], out: &mut [f64]) {
    out.fill(0.0);
    for (i, row) in rows.iter().enumerate() {
        out[row[0]] += u[i];
        out[row[1]] += u[i];
        out[row[2]] += u[i];
    }
}

fn norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

fn scale(values: &mut [f64], factor: f64) {
    for v in values.iter_mut() {
        *v *= factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::AllianceBreakdown;
    use crate::store::MemberRow;

    fn member(match_key: &str, alliance: Alliance, seat: u8, team: &str) -> MemberRow {
        MemberRow {
            match_key: match_key.to_string(),
            alliance,
            seat,
            team: team.to_string(),
        }
    }

    fn result(match_key: &str, red_total: f64, blue_total: f64) -> MatchResult {
        let mut red = AllianceBreakdown::default();
        red.numbers.insert("total_points".to_string(), red_total);
        let mut blue = AllianceBreakdown::default();
        blue.numbers.insert("total_points".to_string(), blue_total);
        MatchResult {
            match_key: match_key.to_string(),
            winner: None,
            red,
            blue,
            fetched_at: "2020-02-29T11:00:00+00:00".to_string(),
        }
    }

    /// A closed league where alliance totals are exact sums of known per-team
    /// contributions; the solve should recover them.
    #[test]
    fn recovers_exact_contributions() {
        let truth = [("a", 10.0), ("b", 20.0), ("c", 30.0), ("d", 5.0), ("e", 15.0), ("f", 25.0)];
        let schedules: [([&str; 3], [&str; 3]); 4] = [
            (["a", "b", "c"], ["d", "e", "f"]),
            (["a", "d", "e"], ["b", "c", "f"]),
            (["a", "b", "f"], ["c", "d", "e"]),
            (["a", "c", "e"], ["b", "d", "f"]),
        ];

        let lookup: HashMap<&str, f64> = truth.iter().copied().collect();
        let mut members = Vec::new();
        let mut results = Vec::new();
        for (idx, (red, blue)) in schedules.iter().enumerate() {
            let key = format!("2020vahay_qm{}", idx + 1);
            for seat in 0..3 {
                members.push(member(&key, Alliance::Red, (seat + 1) as u8, red[seat]));
                members.push(member(&key, Alliance::Blue, (seat + 1) as u8, blue[seat]));
            }
            let red_total: f64 = red.iter().map(|t| lookup[t]).sum();
            let blue_total: f64 = blue.iter().map(|t| lookup[t]).sum();
            results.push(result(&key, red_total, blue_total));
        }

        let index = AllianceIndex::from_rows(&members);
        let outcome = contribution_rating(&["total_points".to_string()], &results, &index);
        assert!(outcome.converged);
        assert_eq!(outcome.equations, 8);
        for (team, expected) in truth {
            let got = outcome.values[team];
            assert!(
                (got - expected).abs() < 1e-6,
                "{team}: expected {expected}, got {got}"
            );
        }
    }

    #[test]
    fn rank_deficient_system_stays_finite() {
        // Two teams that always play together: only their sum is identified.
        let members = vec![
            member("2020vahay_qm1", Alliance::Red, 1, "a"),
            member("2020vahay_qm1", Alliance::Red, 2, "b"),
            member("2020vahay_qm1", Alliance::Red, 3, "c"),
            member("2020vahay_qm2", Alliance::Red, 1, "a"),
            member("2020vahay_qm2", Alliance::Red, 2, "b"),
            member("2020vahay_qm2", Alliance::Red, 3, "c"),
        ];
        let mut results = vec![result("2020vahay_qm1", 30.0, 0.0), result("2020vahay_qm2", 30.0, 0.0)];
        // Blue has no membership rows; those equations are skipped.
        results[0].blue.numbers.clear();
        results[1].blue.numbers.clear();

        let index = AllianceIndex::from_rows(&members);
        let outcome = contribution_rating(&["total_points".to_string()], &results, &index);
        assert_eq!(outcome.equations, 2);
        let sum: f64 = ["a", "b", "c"].iter().map(|t| outcome.values[*t]).sum();
        assert!((sum - 30.0).abs() < 1e-6);
        for value in outcome.values.values() {
            assert!(value.is_finite());
        }
    }

    #[test]
    fn empty_system_yields_empty_outcome() {
        let index = AllianceIndex::from_rows(&[]);
        let outcome = contribution_rating(&["total_points".to_string()], &[], &index);
        assert!(outcome.values.is_empty());
        assert_eq!(outcome.equations, 0);
    }
}
