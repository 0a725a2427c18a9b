use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, params, params_from_iter, types::Value};

use crate::records::{
    Alliance, AllianceBreakdown, Discrepancy, MatchResult, MetricValue, TeamMetricRow,
    TeamObservation,
};

/// The storage collaborator. Every cross-entity navigation in the engine goes
/// through these queries; nothing holds references between records.
pub struct Store {
    conn: Connection,
}

#[derive(Debug, Clone, Default)]
pub struct ObservationFilter {
    pub team: Option<String>,
    pub match_key: Option<String>,
    pub alliance: Option<Alliance>,
    pub seat: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberRow {
    pub match_key: String,
    pub alliance: Alliance,
    pub seat: u8,
    pub team: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscrepancyRefresh {
    pub cleared: usize,
    pub recorded: usize,
    pub muted: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscrepancyRow {
    pub id: i64,
    pub category: String,
    pub match_key: Option<String>,
    pub alliance: Option<Alliance>,
    pub description: String,
    pub ignored: bool,
    pub created_at: String,
}

impl Store {
    pub fn open(path: &Path) -> Result<Store> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite db {}", path.display()))?;
        init_schema(&conn)?;
        Ok(Store { conn })
    }

    pub fn open_in_memory() -> Result<Store> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        init_schema(&conn)?;
        Ok(Store { conn })
    }

    pub fn add_team(&self, team: &str) -> Result<()> {
        self.conn
            .execute("INSERT OR IGNORE INTO teams (id) VALUES (?1)", params![team])
            .with_context(|| format!("insert team {team}"))?;
        Ok(())
    }

    /// Full roster in stable id order. Aggregation output is keyed on this.
    pub fn teams(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM teams ORDER BY id ASC")
            .context("prepare teams query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query teams")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode team row")?);
        }
        Ok(out)
    }

    pub fn upsert_observation(&self, obs: &TeamObservation) -> Result<()> {
        if !(1..=3).contains(&obs.seat) {
            return Err(anyhow!(
                "observation for {} in {} has seat {} out of range",
                obs.team,
                obs.match_key,
                obs.seat
            ));
        }
        let counters_json =
            serde_json::to_string(&obs.counters).context("serialize observation counters")?;
        let flags_json =
            serde_json::to_string(&obs.flags).context("serialize observation flags")?;
        self.conn
            .execute(
                r#"
                INSERT INTO observations (
                    team, match_key, alliance, seat,
                    counters_json, flags_json, outcome, notes, recorded_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(team, match_key) DO UPDATE SET
                    alliance = excluded.alliance,
                    seat = excluded.seat,
                    counters_json = excluded.counters_json,
                    flags_json = excluded.flags_json,
                    outcome = excluded.outcome,
                    notes = excluded.notes,
                    recorded_at = excluded.recorded_at
                "#,
                params![
                    obs.team,
                    obs.match_key,
                    obs.alliance.as_str(),
                    obs.seat as i64,
                    counters_json,
                    flags_json,
                    obs.outcome,
                    obs.notes,
                    obs.recorded_at,
                ],
            )
            .context("upsert observation")?;
        Ok(())
    }

    pub fn observations(&self, filter: &ObservationFilter) -> Result<Vec<TeamObservation>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(team) = &filter.team {
            clauses.push("team = ?");
            values.push(Value::Text(team.clone()));
        }
        if let Some(match_key) = &filter.match_key {
            clauses.push("match_key = ?");
            values.push(Value::Text(match_key.clone()));
        }
        if let Some(alliance) = filter.alliance {
            clauses.push("alliance = ?");
            values.push(Value::Text(alliance.as_str().to_string()));
        }
        if let Some(seat) = filter.seat {
            clauses.push("seat = ?");
            values.push(Value::Integer(seat as i64));
        }

        let mut sql = String::from(
            "SELECT team, match_key, alliance, seat, counters_json, flags_json, \
             outcome, notes, recorded_at FROM observations",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY match_key ASC, alliance ASC, seat ASC, team ASC");

        let mut stmt = self.conn.prepare(&sql).context("prepare observations query")?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })
            .context("query observations")?;

        let mut out = Vec::new();
        for row in rows {
            let (team, match_key, alliance, seat, counters_json, flags_json, outcome, notes, at) =
                row.context("decode observation row")?;
            let alliance = parse_alliance(&alliance)?;
            let counters: BTreeMap<String, f64> = serde_json::from_str(&counters_json)
                .with_context(|| format!("decode counters for {team} in {match_key}"))?;
            let flags: BTreeMap<String, bool> = serde_json::from_str(&flags_json)
                .with_context(|| format!("decode flags for {team} in {match_key}"))?;
            out.push(TeamObservation {
                team,
                match_key,
                alliance,
                seat: seat as u8,
                counters,
                flags,
                outcome,
                notes,
                recorded_at: at,
            });
        }
        Ok(out)
    }

    pub fn upsert_match_result(&self, result: &MatchResult) -> Result<()> {
        let red_json =
            serde_json::to_string(&result.red).context("serialize red breakdown")?;
        let blue_json =
            serde_json::to_string(&result.blue).context("serialize blue breakdown")?;
        self.conn
            .execute(
                r#"
                INSERT INTO match_results (match_key, winner, red_json, blue_json, fetched_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(match_key) DO UPDATE SET
                    winner = excluded.winner,
                    red_json = excluded.red_json,
                    blue_json = excluded.blue_json,
                    fetched_at = excluded.fetched_at
                "#,
                params![
                    result.match_key,
                    result.winner.map(|a| a.as_str()),
                    red_json,
                    blue_json,
                    result.fetched_at,
                ],
            )
            .context("upsert match result")?;
        Ok(())
    }

    pub fn match_results(&self) -> Result<Vec<MatchResult>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT match_key, winner, red_json, blue_json, fetched_at \
                 FROM match_results ORDER BY match_key ASC",
            )
            .context("prepare match results query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("query match results")?;

        let mut out = Vec::new();
        for row in rows {
            let (match_key, winner, red_json, blue_json, fetched_at) =
                row.context("decode match result row")?;
            let winner = match winner {
                Some(raw) => Some(parse_alliance(&raw)?),
                None => None,
            };
            let red: AllianceBreakdown = serde_json::from_str(&red_json)
                .with_context(|| format!("decode red breakdown for {match_key}"))?;
            let blue: AllianceBreakdown = serde_json::from_str(&blue_json)
                .with_context(|| format!("decode blue breakdown for {match_key}"))?;
            out.push(MatchResult {
                match_key,
                winner,
                red,
                blue,
                fetched_at,
            });
        }
        Ok(out)
    }

    pub fn set_alliance_member(
        &self,
        match_key: &str,
        alliance: Alliance,
        seat: u8,
        team: &str,
    ) -> Result<()> {
        if !(1..=3).contains(&seat) {
            return Err(anyhow!("seat {seat} out of range for {match_key}"));
        }
        self.conn
            .execute(
                r#"
                INSERT INTO alliance_members (match_key, alliance, seat, team)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(match_key, alliance, seat) DO UPDATE SET team = excluded.team
                "#,
                params![match_key, alliance.as_str(), seat as i64, team],
            )
            .context("upsert alliance member")?;
        Ok(())
    }

    pub fn alliance_membership(&self) -> Result<Vec<MemberRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT match_key, alliance, seat, team FROM alliance_members \
                 ORDER BY match_key ASC, alliance ASC, seat ASC",
            )
            .context("prepare membership query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("query membership")?;

        let mut out = Vec::new();
        for row in rows {
            let (match_key, alliance, seat, team) = row.context("decode membership row")?;
            out.push(MemberRow {
                match_key,
                alliance: parse_alliance(&alliance)?,
                seat: seat as u8,
                team,
            });
        }
        Ok(out)
    }

    pub fn record_discrepancy(&self, discrepancy: &Discrepancy) -> Result<i64> {
        self.conn
            .execute(
                r#"
                INSERT INTO discrepancies (category, match_key, alliance, description, ignored, created_at)
                VALUES (?1, ?2, ?3, ?4, 0, ?5)
                "#,
                params![
                    discrepancy.category,
                    discrepancy.match_key,
                    discrepancy.alliance.map(|a| a.as_str()),
                    discrepancy.description,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("insert discrepancy")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn discrepancies(&self) -> Result<Vec<DiscrepancyRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, category, match_key, alliance, description, ignored, created_at \
                 FROM discrepancies ORDER BY id ASC",
            )
            .context("prepare discrepancies query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("query discrepancies")?;

        let mut out = Vec::new();
        for row in rows {
            let (id, category, match_key, alliance, description, ignored, created_at) =
                row.context("decode discrepancy row")?;
            let alliance = match alliance {
                Some(raw) => Some(parse_alliance(&raw)?),
                None => None,
            };
            out.push(DiscrepancyRow {
                id,
                category,
                match_key,
                alliance,
                description,
                ignored: ignored != 0,
                created_at,
            });
        }
        Ok(out)
    }

    /// Operator-facing mute switch; the only mutation discrepancies allow.
    pub fn set_discrepancy_ignored(&self, id: i64, ignored: bool) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE discrepancies SET ignored = ?1 WHERE id = ?2",
                params![if ignored { 1 } else { 0 }, id],
            )
            .context("update discrepancy ignore flag")?;
        if changed == 0 {
            return Err(anyhow!("discrepancy {id} does not exist"));
        }
        Ok(())
    }

    /// A re-run regenerates everything it reported last time, in one
    /// transaction so readers never see a half-refreshed table. Ignored rows
    /// are operator decisions: they survive, and a regenerated finding that
    /// matches one on (category, match, alliance) stays muted rather than
    /// coming back as a fresh open row.
    pub fn refresh_discrepancies(&mut self, findings: &[Discrepancy]) -> Result<DiscrepancyRefresh> {
        let tx = self
            .conn
            .transaction()
            .context("begin discrepancy transaction")?;
        let cleared = tx
            .execute("DELETE FROM discrepancies WHERE ignored = 0", [])
            .context("clear discrepancies")?;

        let mut muted_keys: HashSet<(String, Option<String>, Option<String>)> = HashSet::new();
        {
            let mut stmt = tx
                .prepare("SELECT category, match_key, alliance FROM discrepancies WHERE ignored = 1")
                .context("prepare ignored discrepancies query")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })
                .context("query ignored discrepancies")?;
            for row in rows {
                muted_keys.insert(row.context("decode ignored discrepancy row")?);
            }
        }

        let now = Utc::now().to_rfc3339();
        let mut recorded = 0usize;
        let mut muted = 0usize;
        for finding in findings {
            let key = (
                finding.category.clone(),
                finding.match_key.clone(),
                finding.alliance.map(|a| a.as_str().to_string()),
            );
            if muted_keys.contains(&key) {
                muted += 1;
                continue;
            }
            tx.execute(
                r#"
                INSERT INTO discrepancies (category, match_key, alliance, description, ignored, created_at)
                VALUES (?1, ?2, ?3, ?4, 0, ?5)
                "#,
                params![
                    finding.category,
                    finding.match_key,
                    finding.alliance.map(|a| a.as_str()),
                    finding.description,
                    now,
                ],
            )
            .context("insert discrepancy")?;
            recorded += 1;
        }

        tx.commit().context("commit discrepancy transaction")?;
        Ok(DiscrepancyRefresh {
            cleared,
            recorded,
            muted,
        })
    }

    /// Ignored rows are operator decisions and survive a clear.
    pub fn clear_unignored_discrepancies(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM discrepancies WHERE ignored = 0", [])
            .context("clear discrepancies")?;
        Ok(removed)
    }

    /// Full-table replace inside one transaction. Readers see either the prior
    /// run or this one, never a mix.
    pub fn replace_team_metrics(&mut self, rows: &[TeamMetricRow]) -> Result<()> {
        let tx = self.conn.transaction().context("begin metrics transaction")?;
        tx.execute("DELETE FROM team_metrics", [])
            .context("clear team metrics")?;
        for row in rows {
            let mut payload = serde_json::Map::new();
            for (name, value) in &row.values {
                payload.insert(name.clone(), value.to_json());
            }
            let payload_json = serde_json::to_string(&serde_json::Value::Object(payload))
                .context("serialize team metrics payload")?;
            tx.execute(
                "INSERT INTO team_metrics (team, payload_json) VALUES (?1, ?2)",
                params![row.team, payload_json],
            )
            .with_context(|| format!("insert metrics for {}", row.team))?;
        }
        tx.commit().context("commit metrics transaction")?;
        Ok(())
    }

    pub fn team_metrics(&self) -> Result<Vec<TeamMetricRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT team, payload_json FROM team_metrics ORDER BY team ASC")
            .context("prepare team metrics query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("query team metrics")?;

        let mut out = Vec::new();
        for row in rows {
            let (team, payload_json) = row.context("decode team metrics row")?;
            let payload: serde_json::Value = serde_json::from_str(&payload_json)
                .with_context(|| format!("decode metrics payload for {team}"))?;
            let object = payload
                .as_object()
                .ok_or_else(|| anyhow!("metrics payload for {team} is not an object"))?;
            let values: BTreeMap<String, MetricValue> = object
                .iter()
                .map(|(name, value)| (name.clone(), MetricValue::from_json(value)))
                .collect();
            out.push(TeamMetricRow { team, values });
        }
        Ok(out)
    }
}

fn parse_alliance(raw: &str) -> Result<Alliance> {
    Alliance::parse(raw).ok_or_else(|| anyhow!("invalid alliance {raw:?} in storage"))
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA user_version = 1;
        CREATE TABLE IF NOT EXISTS teams (
            id TEXT PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS observations (
            team TEXT NOT NULL,
            match_key TEXT NOT NULL,
            alliance TEXT NOT NULL,
            seat INTEGER NOT NULL,
            counters_json TEXT NOT NULL,
            flags_json TEXT NOT NULL,
            outcome TEXT NULL,
            notes TEXT NULL,
            recorded_at TEXT NOT NULL,
            UNIQUE (team, match_key)
        );
        CREATE INDEX IF NOT EXISTS idx_observations_match ON observations(match_key);
        CREATE TABLE IF NOT EXISTS match_results (
            match_key TEXT PRIMARY KEY,
            winner TEXT NULL,
            red_json TEXT NOT NULL,
            blue_json TEXT NOT NULL,
            fetched_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS alliance_members (
            match_key TEXT NOT NULL,
            alliance TEXT NOT NULL,
            seat INTEGER NOT NULL,
            team TEXT NOT NULL,
            UNIQUE (match_key, alliance, seat)
        );
        CREATE TABLE IF NOT EXISTS discrepancies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            match_key TEXT NULL,
            alliance TEXT NULL,
            description TEXT NOT NULL,
            ignored INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS team_metrics (
            team TEXT PRIMARY KEY,
            payload_json TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_observation(team: &str, match_key: &str, seat: u8) -> TeamObservation {
        let mut counters = BTreeMap::new();
        counters.insert("low_goal".to_string(), 4.0);
        TeamObservation {
            team: team.to_string(),
            match_key: match_key.to_string(),
            alliance: Alliance::Red,
            seat,
            counters,
            flags: BTreeMap::new(),
            outcome: Some("Hang".to_string()),
            notes: None,
            recorded_at: "2020-02-29T10:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn observation_upsert_is_unique_per_team_match() {
        let store = Store::open_in_memory().unwrap();
        store.add_team("frc4099").unwrap();
        store
            .upsert_observation(&sample_observation("frc4099", "2020vahay_qm1", 1))
            .unwrap();
        let mut updated = sample_observation("frc4099", "2020vahay_qm1", 2);
        updated.counters.insert("low_goal".to_string(), 7.0);
        store.upsert_observation(&updated).unwrap();

        let rows = store.observations(&ObservationFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].seat, 2);
        assert_eq!(rows[0].counter("low_goal"), Some(7.0));
    }

    #[test]
    fn observation_filters_apply() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_observation(&sample_observation("frc1", "2020vahay_qm1", 1))
            .unwrap();
        store
            .upsert_observation(&sample_observation("frc2", "2020vahay_qm2", 1))
            .unwrap();

        let filter = ObservationFilter {
            match_key: Some("2020vahay_qm2".to_string()),
            ..ObservationFilter::default()
        };
        let rows = store.observations(&filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].team, "frc2");

        let filter = ObservationFilter {
            alliance: Some(Alliance::Blue),
            ..ObservationFilter::default()
        };
        assert!(store.observations(&filter).unwrap().is_empty());
    }

    #[test]
    fn out_of_range_seat_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let obs = sample_observation("frc1", "2020vahay_qm1", 4);
        assert!(store.upsert_observation(&obs).is_err());
        assert!(store
            .set_alliance_member("2020vahay_qm1", Alliance::Red, 0, "frc1")
            .is_err());
    }

    #[test]
    fn ignored_discrepancies_survive_a_clear() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .record_discrepancy(&Discrepancy::new(
                "low goal",
                Some("2020vahay_qm1"),
                Some(Alliance::Red),
                "sums disagree".to_string(),
            ))
            .unwrap();
        store
            .record_discrepancy(&Discrepancy::new(
                "low goal",
                Some("2020vahay_qm2"),
                Some(Alliance::Blue),
                "sums disagree".to_string(),
            ))
            .unwrap();
        store.set_discrepancy_ignored(id, true).unwrap();

        assert_eq!(store.clear_unignored_discrepancies().unwrap(), 1);
        let rows = store.discrepancies().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert!(rows[0].ignored);
    }

    #[test]
    fn refresh_skips_findings_matching_an_ignored_row() {
        let mut store = Store::open_in_memory().unwrap();
        let low = Discrepancy::new(
            "low goal",
            Some("2020vahay_qm1"),
            Some(Alliance::Red),
            "sums disagree".to_string(),
        );
        let points = Discrepancy::new(
            "total points",
            Some("2020vahay_qm1"),
            Some(Alliance::Red),
            "sums disagree".to_string(),
        );

        let refresh = store
            .refresh_discrepancies(&[low.clone(), points.clone()])
            .unwrap();
        assert_eq!(refresh.recorded, 2);
        assert_eq!(refresh.muted, 0);

        let rows = store.discrepancies().unwrap();
        let muted_id = rows
            .iter()
            .find(|row| row.category == "low goal")
            .unwrap()
            .id;
        store.set_discrepancy_ignored(muted_id, true).unwrap();

        // Same findings next run: the ignored one stays muted, the rest are
        // regenerated without duplicating it.
        let refresh = store.refresh_discrepancies(&[low, points]).unwrap();
        assert_eq!(refresh.cleared, 1);
        assert_eq!(refresh.muted, 1);
        assert_eq!(refresh.recorded, 1);

        let rows = store.discrepancies().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|row| row.ignored).count(), 1);
        assert_eq!(
            rows.iter().filter(|row| row.category == "low goal").count(),
            1
        );
    }

    #[test]
    fn team_metrics_round_trip_through_replace() {
        let mut store = Store::open_in_memory().unwrap();
        let mut values = BTreeMap::new();
        values.insert("low_goal_avg".to_string(), MetricValue::Number(3.5));
        values.insert("notes".to_string(), MetricValue::Text("qm1: fast".to_string()));
        values.insert("climb_time_avg".to_string(), MetricValue::Null);
        let rows = vec![TeamMetricRow {
            team: "frc4099".to_string(),
            values,
        }];

        store.replace_team_metrics(&rows).unwrap();
        assert_eq!(store.team_metrics().unwrap(), rows);

        store.replace_team_metrics(&[]).unwrap();
        assert!(store.team_metrics().unwrap().is_empty());
    }
}
