use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub mod models;
use models::*;

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Everything one training step (or a retried flush) writes atomically.
pub struct StateSnapshot<'a> {
    pub ratings: &'a [TeamRating],
    pub network_json: &'a str,
    pub batch_json: &'a str,
    pub weights: &'a [ModelWeightRow],
    pub processed: &'a [String],
    pub records: &'a [AccuracyRecord],
    /// Prediction-log keys of the games this step played, with their dates.
    pub resolved_matchups: &'a [(String, NaiveDate)],
    /// Drop logged and resolved matchups dated before this day.
    pub prune_before: Option<NaiveDate>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path.
    /// `":memory:"` yields a private in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Team ratings ─────────────────────────────────────────────────────────

    pub fn load_ratings(&self) -> Result<Vec<TeamRating>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT team_code, elo_rating, goal_rate_for, goal_rate_against, form_json,
                    games_played, wins, losses, last_game_date, last_updated
             FROM team_ratings ORDER BY team_code",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, u32>(6)?,
                    row.get::<_, u32>(7)?,
                    row.get(8)?,
                    row.get(9)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut ratings = Vec::with_capacity(rows.len());
        for (team_code, elo, gf, ga, form_json, gp, w, l, last_game_date, last_updated) in rows {
            let rolling_form: VecDeque<FormEntry> = serde_json::from_str(&form_json)?;
            ratings.push(TeamRating {
                team_code,
                elo_rating: elo,
                goal_rate_for: gf,
                goal_rate_against: ga,
                rolling_form,
                games_played: gp,
                wins: w,
                losses: l,
                last_game_date,
                last_updated,
            });
        }
        Ok(ratings)
    }

    // ── Model state ──────────────────────────────────────────────────────────

    /// Serialized network parameters, if a network was ever saved.
    pub fn load_network(&self) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let json = conn
            .query_row("SELECT params_json FROM network_params WHERE id = 1", [], |r| r.get(0))
            .optional()?;
        Ok(json)
    }

    /// Serialized pending training batch, if any.
    pub fn load_training_batch(&self) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let json = conn
            .query_row("SELECT examples_json FROM training_batch WHERE id = 1", [], |r| r.get(0))
            .optional()?;
        Ok(json)
    }

    pub fn load_model_weights(&self) -> Result<Vec<ModelWeightRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT model_name, weight, ema_accuracy, window_json, state
             FROM model_weights ORDER BY model_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(model_name, weight, ema_accuracy, window_json, state)| {
                Ok(ModelWeightRow {
                    model_name,
                    weight,
                    ema_accuracy,
                    window: serde_json::from_str(&window_json)?,
                    state,
                })
            })
            .collect()
    }

    /// Persist weights after a recalibration.
    pub fn save_model_weights(&self, weights: &[ModelWeightRow]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        upsert_weights(&tx, weights)?;
        tx.commit()?;
        Ok(())
    }

    /// Platt parameters `(a, b)` of the ensemble calibration, if fitted.
    pub fn load_calibration(&self) -> Result<Option<(f64, f64)>> {
        let conn = self.conn.lock().unwrap();
        let params = conn
            .query_row("SELECT a, b FROM ensemble_calibration WHERE id = 1", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .optional()?;
        Ok(params)
    }

    pub fn save_calibration(&self, a: f64, b: f64, samples: usize) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ensemble_calibration (id, a, b, samples, fitted_at)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                a=excluded.a, b=excluded.b, samples=excluded.samples, fitted_at=excluded.fitted_at",
            params![a, b, samples as i64, Utc::now()],
        )?;
        Ok(())
    }

    // ── Training steps ───────────────────────────────────────────────────────

    /// Write one training step in a single transaction.
    pub fn commit_state(&self, snap: &StateSnapshot<'_>) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now();

        for r in snap.ratings {
            let form_json = serde_json::to_string(&r.rolling_form)?;
            tx.execute(
                "INSERT INTO team_ratings (team_code, elo_rating, goal_rate_for, goal_rate_against,
                                           form_json, games_played, wins, losses,
                                           last_game_date, last_updated)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
                 ON CONFLICT(team_code) DO UPDATE SET
                    elo_rating=excluded.elo_rating,
                    goal_rate_for=excluded.goal_rate_for,
                    goal_rate_against=excluded.goal_rate_against,
                    form_json=excluded.form_json,
                    games_played=excluded.games_played,
                    wins=excluded.wins,
                    losses=excluded.losses,
                    last_game_date=excluded.last_game_date,
                    last_updated=excluded.last_updated",
                params![
                    r.team_code,
                    r.elo_rating,
                    r.goal_rate_for,
                    r.goal_rate_against,
                    form_json,
                    r.games_played,
                    r.wins,
                    r.losses,
                    r.last_game_date,
                    r.last_updated,
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO network_params (id, params_json, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET params_json=excluded.params_json, updated_at=excluded.updated_at",
            params![snap.network_json, now],
        )?;
        tx.execute(
            "INSERT INTO training_batch (id, examples_json, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET examples_json=excluded.examples_json, updated_at=excluded.updated_at",
            params![snap.batch_json, now],
        )?;
        upsert_weights(&tx, snap.weights)?;

        for game_id in snap.processed {
            tx.execute(
                "INSERT OR IGNORE INTO processed_games (game_id, processed_at) VALUES (?1, ?2)",
                params![game_id, now],
            )?;
        }
        for rec in snap.records {
            tx.execute(
                "INSERT INTO accuracy_records (
                    game_id, model_name, home_team, predicted_winner, actual_winner,
                    predicted_probability, confidence, recorded_at
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    rec.game_id,
                    rec.model_name,
                    rec.home_team,
                    rec.predicted_winner,
                    rec.actual_winner,
                    rec.predicted_probability,
                    rec.confidence,
                    rec.recorded_at,
                ],
            )?;
        }
        for (key, game_date) in snap.resolved_matchups {
            tx.execute("DELETE FROM pending_predictions WHERE key = ?1", params![key])?;
            tx.execute(
                "INSERT OR IGNORE INTO resolved_matchups (key, game_date) VALUES (?1, ?2)",
                params![key, game_date],
            )?;
        }
        if let Some(cutoff) = snap.prune_before {
            tx.execute("DELETE FROM pending_predictions WHERE game_date < ?1", params![cutoff])?;
            tx.execute("DELETE FROM resolved_matchups WHERE game_date < ?1", params![cutoff])?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn load_processed_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT game_id FROM processed_games")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    // ── Evaluation ───────────────────────────────────────────────────────────

    /// All accuracy records in insertion order.
    pub fn load_accuracy_records(&self) -> Result<Vec<AccuracyRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT game_id, model_name, home_team, predicted_winner, actual_winner,
                    predicted_probability, confidence, recorded_at
             FROM accuracy_records ORDER BY id",
        )?;
        let records = stmt
            .query_map([], map_accuracy_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    // ── Prediction log ───────────────────────────────────────────────────────

    pub fn save_pending_prediction(&self, key: &str, game_date: NaiveDate, prediction_json: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pending_predictions (key, game_date, prediction_json, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET prediction_json=excluded.prediction_json,
                                            created_at=excluded.created_at",
            params![key, game_date, prediction_json, Utc::now()],
        )?;
        Ok(())
    }

    pub fn load_pending_predictions(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, prediction_json FROM pending_predictions")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Matchups already played inside the retention window.
    pub fn load_resolved_matchups(&self) -> Result<Vec<(String, NaiveDate)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, game_date FROM resolved_matchups")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Completed-game queue ─────────────────────────────────────────────────

    /// Queue a completed game for the training scan. Re-queuing is a no-op.
    pub fn enqueue_completed_game(&self, game: &CompletedGame) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO completed_games (game_id, game_date, game_json, received_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![game.game_id, game.game_date, serde_json::to_string(game)?, Utc::now()],
        )?;
        Ok(())
    }

    /// Queued games not yet processed, oldest first.
    pub fn list_unprocessed_games(&self, limit: i64) -> Result<Vec<CompletedGame>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.game_json FROM completed_games c
             LEFT JOIN processed_games p ON p.game_id = c.game_id
             WHERE p.game_id IS NULL
             ORDER BY c.game_date, c.game_id LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.iter()
            .map(|json| Ok(serde_json::from_str(json)?))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        Ok(())
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn upsert_weights(tx: &rusqlite::Transaction<'_>, weights: &[ModelWeightRow]) -> Result<()> {
    let now = Utc::now();
    for w in weights {
        tx.execute(
            "INSERT INTO model_weights (model_name, weight, ema_accuracy, window_json, state, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(model_name) DO UPDATE SET
                weight=excluded.weight,
                ema_accuracy=excluded.ema_accuracy,
                window_json=excluded.window_json,
                state=excluded.state,
                updated_at=excluded.updated_at",
            params![
                w.model_name,
                w.weight,
                w.ema_accuracy,
                serde_json::to_string(&w.window)?,
                w.state,
                now,
            ],
        )?;
    }
    Ok(())
}

fn map_accuracy_record(row: &rusqlite::Row) -> rusqlite::Result<AccuracyRecord> {
    Ok(AccuracyRecord {
        game_id: row.get(0)?,
        model_name: row.get(1)?,
        home_team: row.get(2)?,
        predicted_winner: row.get(3)?,
        actual_winner: row.get(4)?,
        predicted_probability: row.get(5)?,
        confidence: row.get(6)?,
        recorded_at: row.get(7)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS team_ratings (
    team_code         TEXT    PRIMARY KEY,
    elo_rating        REAL    NOT NULL,
    goal_rate_for     REAL    NOT NULL,
    goal_rate_against REAL    NOT NULL,
    form_json         TEXT    NOT NULL,
    games_played      INTEGER NOT NULL DEFAULT 0,
    wins              INTEGER NOT NULL DEFAULT 0,
    losses            INTEGER NOT NULL DEFAULT 0,
    last_game_date    TEXT,
    last_updated      TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS network_params (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    params_json TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS training_batch (
    id            INTEGER PRIMARY KEY CHECK (id = 1),
    examples_json TEXT    NOT NULL,
    updated_at    TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS model_weights (
    model_name   TEXT    PRIMARY KEY,
    weight       REAL    NOT NULL,
    ema_accuracy REAL    NOT NULL,
    window_json  TEXT    NOT NULL,
    state        TEXT    NOT NULL DEFAULT 'active',
    updated_at   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS ensemble_calibration (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    a          REAL    NOT NULL,
    b          REAL    NOT NULL,
    samples    INTEGER NOT NULL,
    fitted_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS processed_games (
    game_id      TEXT    PRIMARY KEY,
    processed_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS completed_games (
    game_id     TEXT    PRIMARY KEY,
    game_date   TEXT    NOT NULL,
    game_json   TEXT    NOT NULL,
    received_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_predictions (
    key             TEXT    PRIMARY KEY,
    game_date       TEXT    NOT NULL,
    prediction_json TEXT    NOT NULL,
    created_at      TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS resolved_matchups (
    key       TEXT    PRIMARY KEY,
    game_date TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS accuracy_records (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id               TEXT    NOT NULL,
    model_name            TEXT    NOT NULL,
    home_team             TEXT    NOT NULL,
    predicted_winner      TEXT    NOT NULL,
    actual_winner         TEXT    NOT NULL,
    predicted_probability REAL    NOT NULL,
    confidence            REAL    NOT NULL,
    recorded_at           TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_accuracy_model ON accuracy_records(model_name);
CREATE INDEX IF NOT EXISTS idx_completed_date ON completed_games(game_date);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_game(id: &str, day: u32) -> CompletedGame {
        CompletedGame {
            game_id: id.to_string(),
            game_date: NaiveDate::from_ymd_opt(2025, 11, day).unwrap(),
            home: TeamGameStats {
                team_code: "BOS".into(),
                score: 4,
                shots: 33,
                power_play_pct: 25.0,
                penalty_kill_pct: 80.0,
            },
            away: TeamGameStats {
                team_code: "NYR".into(),
                score: 1,
                shots: 24,
                power_play_pct: 0.0,
                penalty_kill_pct: 75.0,
            },
            overtime: false,
            playoff: false,
        }
    }

    #[test]
    fn queue_skips_processed_games() {
        let db = Database::open(":memory:").unwrap();
        db.enqueue_completed_game(&sample_game("g2", 3)).unwrap();
        db.enqueue_completed_game(&sample_game("g1", 2)).unwrap();
        db.enqueue_completed_game(&sample_game("g1", 2)).unwrap();

        let queued = db.list_unprocessed_games(10).unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].game_id, "g1");

        db.commit_state(&StateSnapshot {
            ratings: &[],
            network_json: "{}",
            batch_json: "[]",
            weights: &[],
            processed: &["g1".to_string()],
            records: &[],
            resolved_matchups: &[],
            prune_before: None,
        })
        .unwrap();
        let queued = db.list_unprocessed_games(10).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].game_id, "g2");
        assert_eq!(db.load_processed_ids().unwrap(), vec!["g1".to_string()]);
    }

    #[test]
    fn ratings_round_trip_exactly() {
        let db = Database::open(":memory:").unwrap();
        let mut form = VecDeque::new();
        form.push_back(FormEntry {
            won: true,
            goals_for: 3,
            goals_against: 2,
            shots_for: 31,
            shots_against: 28,
            power_play_pct: 33.3,
        });
        let rating = TeamRating {
            team_code: "EDM".into(),
            elo_rating: 1512.345678901234,
            goal_rate_for: 3.0 + 1.0 / 3.0,
            goal_rate_against: 2.9,
            rolling_form: form,
            games_played: 1,
            wins: 1,
            losses: 0,
            last_game_date: NaiveDate::from_ymd_opt(2025, 10, 9),
            last_updated: Utc::now(),
        };
        db.commit_state(&StateSnapshot {
            ratings: std::slice::from_ref(&rating),
            network_json: "{\"layers\":[]}",
            batch_json: "[]",
            weights: &[ModelWeightRow {
                model_name: "Elo Rating".into(),
                weight: 0.2,
                ema_accuracy: 0.61,
                window: vec![true, false],
                state: "active".into(),
            }],
            processed: &[],
            records: &[],
            resolved_matchups: &[],
            prune_before: None,
        })
        .unwrap();

        let loaded = db.load_ratings().unwrap();
        assert_eq!(loaded, vec![rating]);
        assert_eq!(db.load_network().unwrap().as_deref(), Some("{\"layers\":[]}"));
        assert_eq!(db.load_model_weights().unwrap()[0].window, vec![true, false]);
    }

    #[test]
    fn calibration_upserts_single_row() {
        let db = Database::open(":memory:").unwrap();
        assert_eq!(db.load_calibration().unwrap(), None);
        db.save_calibration(1.1, -0.05, 40).unwrap();
        db.save_calibration(0.9, 0.02, 55).unwrap();
        assert_eq!(db.load_calibration().unwrap(), Some((0.9, 0.02)));
    }

    #[test]
    fn commit_resolves_and_prunes_the_prediction_log() {
        let db = Database::open(":memory:").unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2025, 11, d).unwrap();
        db.save_pending_prediction("BOS|NYR|2025-11-02", day(2), "{}").unwrap();
        db.save_pending_prediction("TOR|MTL|2025-11-20", day(20), "{}").unwrap();
        db.save_pending_prediction("EDM|CGY|2025-11-25", day(25), "{}").unwrap();

        let snapshot = |resolved: &[(String, NaiveDate)], prune_before| {
            db.commit_state(&StateSnapshot {
                ratings: &[],
                network_json: "{}",
                batch_json: "[]",
                weights: &[],
                processed: &[],
                records: &[],
                resolved_matchups: resolved,
                prune_before,
            })
        };
        snapshot(&[("TOR|MTL|2025-11-20".to_string(), day(20))], None).unwrap();
        assert_eq!(db.load_pending_predictions().unwrap().len(), 2);
        assert_eq!(db.load_resolved_matchups().unwrap(), vec![("TOR|MTL|2025-11-20".to_string(), day(20))]);

        snapshot(&[], Some(day(21))).unwrap();
        let pending = db.load_pending_predictions().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, "EDM|CGY|2025-11-25");
        assert!(db.load_resolved_matchups().unwrap().is_empty());
    }
}
