use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rand::Rng;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Result, Row};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{Error, ScheduleError};
use crate::models::{
    Challenge, ReviewStatus, Reward, Schedule, StudySession, Strategy, Subject, UserProfile,
};
use crate::offline;
use crate::rewards::{self, RewardDelta, RESEARCH_BONUS_XP};
use crate::scheduler::{compute_next_review, Quality, ReviewUpdate, INITIAL_EASE_FACTOR};

pub const DEFAULT_SUBJECT_COLOR: &str = "#64748b";

const DEFAULT_SUBJECTS: [(&str, &str); 4] = [
    ("Anatomy", "#ef4444"),
    ("Pharmacology", "#3b82f6"),
    ("Pathology", "#10b981"),
    ("Neurology", "#8b5cf6"),
];

const CHALLENGE_DAYS: i64 = 7;

const SESSION_COLUMNS: &str = "id, subject_id, topic, due_date, last_reviewed, interval_days, \
     ease_factor, repetitions, strategy, fixed_pattern, status";

// Fixed width, UTC, so TEXT comparisons order chronologically
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_ts(idx: usize, s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn get_ts(row: &Row, idx: usize) -> Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_ts(idx, &s)
}

fn get_opt_ts(row: &Row, idx: usize) -> Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_ts(idx, &s)).transpose()
}

fn session_from_row(row: &Row) -> Result<StudySession> {
    let strategy_str: String = row.get(8)?;
    let strategy = Strategy::from_str(&strategy_str).ok_or_else(|| {
        conversion_error(
            8,
            ScheduleError::InvalidState(format!("unknown strategy '{}'", strategy_str)),
        )
    })?;

    let pattern_json: Option<String> = row.get(9)?;
    let pattern = pattern_json
        .map(|s| serde_json::from_str::<Vec<u32>>(&s))
        .transpose()
        .map_err(|e| conversion_error(9, e))?;

    let schedule = Schedule::from_parts(strategy, row.get(6)?, row.get(7)?, pattern)
        .map_err(|e| conversion_error(8, e))?;

    let status_str: String = row.get(10)?;
    let status = ReviewStatus::from_str(&status_str).ok_or_else(|| {
        conversion_error(
            10,
            ScheduleError::InvalidState(format!("unknown status '{}'", status_str)),
        )
    })?;

    Ok(StudySession {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        topic: row.get(2)?,
        due_date: get_ts(row, 3)?,
        last_reviewed: get_opt_ts(row, 4)?,
        interval: row.get(5)?,
        schedule,
        status,
    })
}

// Columns that encode a schedule: (ease_factor, repetitions, fixed_pattern).
// The pattern is stored as a JSON array, e.g. `[1,3,7]`.
fn schedule_columns(schedule: &Schedule) -> Result<(f64, u32, Option<String>)> {
    let columns = match schedule {
        Schedule::Smart {
            ease_factor,
            repetitions,
        } => (*ease_factor, *repetitions, None),
        Schedule::Fixed { pattern } => {
            let json = serde_json::to_string(pattern)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            (INITIAL_EASE_FACTOR, 0, Some(json))
        }
    };
    Ok(columns)
}

fn challenge_from_row(row: &Row) -> Result<Challenge> {
    Ok(Challenge {
        id: row.get(0)?,
        category: row.get(1)?,
        title: row.get(2)?,
        deadline: get_ts(row, 3)?,
        reward: row.get(4)?,
        completed: row.get(5)?,
    })
}

/// What a recorded review changed.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewReceipt {
    pub session: StudySession,
    pub quality: Quality,
    pub reward: RewardDelta,
    pub profile: UserProfile,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// Creates the schema and seeds defaults. Safe to call repeatedly.
    pub fn init(&self, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS subjects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                color TEXT NOT NULL
            );

            -- One row per scheduled topic; the schedule columns mirror the export format
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id INTEGER NOT NULL,
                topic TEXT NOT NULL,
                due_date TEXT NOT NULL,
                last_reviewed TEXT,
                interval_days INTEGER NOT NULL DEFAULT 1,
                ease_factor REAL NOT NULL DEFAULT 2.5,
                repetitions INTEGER NOT NULL DEFAULT 0,
                strategy TEXT NOT NULL CHECK(strategy IN ('smart', 'fixed')),
                fixed_pattern TEXT,
                status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'due', 'reviewed'))
            );

            CREATE TABLE IF NOT EXISTS review_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                quality INTEGER NOT NULL CHECK(quality BETWEEN 0 AND 5),
                reviewed_at TEXT NOT NULL,
                xp_gained INTEGER NOT NULL,
                coins_gained INTEGER NOT NULL
            );

            -- Single-row table
            CREATE TABLE IF NOT EXISTS profile (
                id INTEGER PRIMARY KEY CHECK(id = 1),
                name TEXT NOT NULL,
                avatar TEXT NOT NULL,
                xp INTEGER NOT NULL DEFAULT 0,
                coins INTEGER NOT NULL DEFAULT 0,
                current_streak INTEGER NOT NULL DEFAULT 0,
                longest_streak INTEGER NOT NULL DEFAULT 0,
                total_reviews INTEGER NOT NULL DEFAULT 0,
                last_study_date TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS study_history (
                day TEXT PRIMARY KEY,
                reviews INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS rewards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                cost INTEGER NOT NULL CHECK(cost > 0),
                icon TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS challenges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL,
                title TEXT NOT NULL,
                deadline TEXT NOT NULL,
                reward INTEGER NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_due_date ON sessions(due_date);
            CREATE INDEX IF NOT EXISTS idx_sessions_subject ON sessions(subject_id);
            CREATE INDEX IF NOT EXISTS idx_review_history_session ON review_history(session_id);
            "#,
        )?;

        let subject_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM subjects", [], |row| row.get(0))?;
        if subject_count == 0 {
            for (name, color) in DEFAULT_SUBJECTS {
                self.add_subject(name, color)?;
            }
            debug!(count = DEFAULT_SUBJECTS.len(), "seeded default subjects");
        }

        let fresh = UserProfile::new(now);
        self.conn.execute(
            r#"
            INSERT OR IGNORE INTO profile (id, name, avatar, xp, coins, last_study_date)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            "#,
            params![fresh.name, fresh.avatar, fresh.xp, fresh.coins, fmt_ts(now)],
        )?;

        Ok(())
    }

    // Subject operations
    pub fn add_subject(&self, name: &str, color: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO subjects (name, color) VALUES (?1, ?2)",
            params![name, color],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_subject(&self, id: i64) -> Result<Option<Subject>> {
        let subject = self.conn.query_row(
            "SELECT id, name, color FROM subjects WHERE id = ?1",
            params![id],
            |row| {
                Ok(Subject {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    color: row.get(2)?,
                })
            },
        );

        match subject {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn list_subjects(&self) -> Result<Vec<Subject>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, color FROM subjects ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Subject {
                id: row.get(0)?,
                name: row.get(1)?,
                color: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    fn subject_id_by_name(&self, name: &str) -> Result<Option<i64>> {
        match self.conn.query_row(
            "SELECT id FROM subjects WHERE name = ?1",
            params![name],
            |row| row.get(0),
        ) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Stores an imported subject and returns the local id it lives under.
    /// A name already used by another local subject resolves to that subject.
    fn upsert_subject(&self, subject: &Subject) -> Result<i64> {
        if let Some(existing) = self.subject_id_by_name(&subject.name)? {
            if existing != subject.id {
                debug!(
                    imported_id = subject.id,
                    local_id = existing,
                    name = %subject.name,
                    "imported subject matched by name"
                );
                return Ok(existing);
            }
        }

        self.conn.execute(
            r#"
            INSERT INTO subjects (id, name, color) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, color = excluded.color
            "#,
            params![subject.id, subject.name, subject.color],
        )?;
        Ok(subject.id)
    }

    // Session operations
    pub fn add_session(
        &self,
        subject_id: i64,
        topic: &str,
        schedule: &Schedule,
        start: DateTime<Utc>,
    ) -> Result<i64> {
        let (ease_factor, repetitions, pattern) = schedule_columns(schedule)?;
        self.conn.execute(
            r#"
            INSERT INTO sessions (subject_id, topic, due_date, interval_days, ease_factor,
                                  repetitions, strategy, fixed_pattern, status)
            VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, 'pending')
            "#,
            params![
                subject_id,
                topic,
                fmt_ts(start),
                ease_factor,
                repetitions,
                schedule.strategy().as_str(),
                pattern
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(session_id = id, strategy = schedule.strategy().as_str(), "session scheduled");
        Ok(id)
    }

    /// Inserts or overwrites a whole session, keeping its id.
    pub fn upsert_session(&self, session: &StudySession) -> Result<()> {
        let (ease_factor, repetitions, pattern) = schedule_columns(&session.schedule)?;
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO sessions (id, subject_id, topic, due_date, last_reviewed,
                                             interval_days, ease_factor, repetitions, strategy,
                                             fixed_pattern, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                session.id,
                session.subject_id,
                session.topic,
                fmt_ts(session.due_date),
                session.last_reviewed.map(fmt_ts),
                session.interval,
                ease_factor,
                repetitions,
                session.strategy().as_str(),
                pattern,
                session.status.as_str()
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: i64) -> Result<Option<StudySession>> {
        let query = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
        match self.conn.query_row(&query, params![id], session_from_row) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sessions in the order they were created.
    pub fn list_sessions(&self, subject_filter: Option<i64>) -> Result<Vec<StudySession>> {
        match subject_filter {
            Some(subject_id) => {
                let query = format!(
                    "SELECT {} FROM sessions WHERE subject_id = ?1 ORDER BY id",
                    SESSION_COLUMNS
                );
                let mut stmt = self.conn.prepare(&query)?;
                let rows = stmt.query_map(params![subject_id], session_from_row)?;
                rows.collect()
            }
            None => {
                let query = format!("SELECT {} FROM sessions ORDER BY id", SESSION_COLUMNS);
                let mut stmt = self.conn.prepare(&query)?;
                let rows = stmt.query_map([], session_from_row)?;
                rows.collect()
            }
        }
    }

    pub fn delete_session(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Sessions whose due date has passed, most overdue first.
    pub fn due_sessions(&self, now: DateTime<Utc>) -> Result<Vec<StudySession>> {
        let query = format!(
            "SELECT {} FROM sessions WHERE due_date <= ?1 ORDER BY due_date ASC, id ASC",
            SESSION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(params![fmt_ts(now)], session_from_row)?;
        rows.collect()
    }

    /// Sessions due on a given UTC calendar day.
    pub fn sessions_on(&self, day: NaiveDate) -> Result<Vec<StudySession>> {
        let Some(start) = day.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()) else {
            return Ok(vec![]);
        };
        let end = start + Duration::days(1);

        let query = format!(
            "SELECT {} FROM sessions WHERE due_date >= ?1 AND due_date < ?2 ORDER BY due_date ASC, id ASC",
            SESSION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(params![fmt_ts(start), fmt_ts(end)], session_from_row)?;
        rows.collect()
    }

    /// Merges a scheduler result into the stored session. Returns false if
    /// no session has that id.
    pub fn replace_session(&self, id: i64, update: &ReviewUpdate) -> Result<bool> {
        let (ease_factor, repetitions) = match update.smart {
            Some(state) => (Some(state.ease_factor), Some(state.repetitions)),
            None => (None, None),
        };

        let rows = self.conn.execute(
            r#"
            UPDATE sessions
            SET interval_days = ?1,
                due_date = ?2,
                last_reviewed = ?3,
                status = ?4,
                ease_factor = COALESCE(?5, ease_factor),
                repetitions = COALESCE(?6, repetitions)
            WHERE id = ?7
            "#,
            params![
                update.interval,
                fmt_ts(update.due_date),
                fmt_ts(update.last_reviewed),
                update.status.as_str(),
                ease_factor,
                repetitions,
                id
            ],
        )?;
        Ok(rows > 0)
    }

    /// Scores a session: reschedules it, pays out the reward and updates the
    /// profile, all in one transaction.
    pub fn record_review<R: Rng + ?Sized>(
        &self,
        id: i64,
        quality: Quality,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> crate::error::Result<ReviewReceipt> {
        let tx = self.conn.unchecked_transaction()?;

        let mut session = self
            .get_session(id)?
            .ok_or(Error::NotFound { kind: "session", id })?;

        let update = compute_next_review(&session, quality, now)?;
        let reward = rewards::allocate(quality, session.interval, rng);

        let mut profile = self.get_profile()?;
        profile.record_review(reward, now);
        self.save_profile(&profile)?;

        self.conn.execute(
            r#"
            INSERT INTO review_history (session_id, quality, reviewed_at, xp_gained, coins_gained)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![id, quality.value(), fmt_ts(now), reward.xp, reward.coins],
        )?;

        self.replace_session(id, &update)?;
        tx.commit()?;

        session.apply(&update);
        info!(
            session_id = id,
            quality = quality.value(),
            interval = update.interval,
            xp = reward.xp,
            coins = reward.coins,
            "review recorded"
        );

        Ok(ReviewReceipt {
            session,
            quality,
            reward,
            profile,
        })
    }

    // Profile operations
    pub fn get_profile(&self) -> Result<UserProfile> {
        let mut profile = self.conn.query_row(
            r#"
            SELECT name, avatar, xp, coins, current_streak, longest_streak, total_reviews,
                   last_study_date
            FROM profile
            WHERE id = 1
            "#,
            [],
            |row| {
                let total_reviews: i64 = row.get(6)?;
                Ok(UserProfile {
                    name: row.get(0)?,
                    avatar: row.get(1)?,
                    xp: row.get(2)?,
                    coins: row.get(3)?,
                    current_streak: row.get(4)?,
                    longest_streak: row.get(5)?,
                    total_reviews: total_reviews.max(0) as u64,
                    last_study_date: get_ts(row, 7)?,
                    history: BTreeMap::new(),
                })
            },
        )?;

        let mut stmt = self
            .conn
            .prepare("SELECT day, reviews FROM study_history ORDER BY day")?;
        let rows = stmt.query_map([], |row| {
            let day: String = row.get(0)?;
            let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                .map_err(|e| conversion_error(0, e))?;
            Ok((day, row.get::<_, u32>(1)?))
        })?;
        for entry in rows {
            let (day, reviews) = entry?;
            profile.history.insert(day, reviews);
        }

        Ok(profile)
    }

    pub fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE profile
            SET name = ?1,
                avatar = ?2,
                xp = ?3,
                coins = ?4,
                current_streak = ?5,
                longest_streak = ?6,
                total_reviews = ?7,
                last_study_date = ?8
            WHERE id = 1
            "#,
            params![
                profile.name,
                profile.avatar,
                profile.xp,
                profile.coins,
                profile.current_streak,
                profile.longest_streak,
                profile.total_reviews as i64,
                fmt_ts(profile.last_study_date)
            ],
        )?;

        for (day, reviews) in &profile.history {
            self.conn.execute(
                r#"
                INSERT INTO study_history (day, reviews) VALUES (?1, ?2)
                ON CONFLICT(day) DO UPDATE SET reviews = excluded.reviews
                "#,
                params![day.format("%Y-%m-%d").to_string(), reviews],
            )?;
        }

        Ok(())
    }

    /// Loads the profile, dropping a stale streak first.
    pub fn refresh_profile(&self, now: DateTime<Utc>) -> Result<UserProfile> {
        let mut profile = self.get_profile()?;
        if profile.decay_streak(now) {
            warn!(
                last_study_date = %profile.last_study_date,
                "streak lost after a long break"
            );
            self.save_profile(&profile)?;
        }
        Ok(profile)
    }

    // Reward shop
    pub fn add_reward(&self, name: &str, cost: i64, icon: &str) -> crate::error::Result<i64> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("reward name must not be empty".to_string()));
        }
        if cost <= 0 {
            return Err(Error::InvalidInput(format!(
                "reward cost must be positive, got {}",
                cost
            )));
        }
        self.conn.execute(
            "INSERT INTO rewards (name, cost, icon) VALUES (?1, ?2, ?3)",
            params![name.trim(), cost, icon],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_rewards(&self) -> Result<Vec<Reward>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, cost, icon FROM rewards ORDER BY cost, id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Reward {
                id: row.get(0)?,
                name: row.get(1)?,
                cost: row.get(2)?,
                icon: row.get(3)?,
            })
        })?;
        rows.collect()
    }

    pub fn redeem_reward(&self, id: i64) -> crate::error::Result<(Reward, UserProfile)> {
        let reward = self
            .list_rewards()?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or(Error::NotFound { kind: "reward", id })?;

        let mut profile = self.get_profile()?;
        profile.spend(reward.cost)?;
        self.save_profile(&profile)?;

        info!(reward_id = id, cost = reward.cost, coins_left = profile.coins, "reward redeemed");
        Ok((reward, profile))
    }

    // Research challenges
    pub fn add_challenge(
        &self,
        category: &str,
        title: &str,
        reward: i64,
        now: DateTime<Utc>,
    ) -> crate::error::Result<i64> {
        if title.trim().is_empty() {
            return Err(Error::InvalidInput("challenge title must not be empty".to_string()));
        }
        if reward < 0 {
            return Err(Error::InvalidInput(format!(
                "challenge reward must not be negative, got {}",
                reward
            )));
        }
        let deadline = now + Duration::days(CHALLENGE_DAYS);
        self.conn.execute(
            "INSERT INTO challenges (category, title, deadline, reward) VALUES (?1, ?2, ?3, ?4)",
            params![category, title.trim(), fmt_ts(deadline), reward],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_challenge(&self, id: i64) -> Result<Option<Challenge>> {
        let challenge = self.conn.query_row(
            "SELECT id, category, title, deadline, reward, completed FROM challenges WHERE id = ?1",
            params![id],
            challenge_from_row,
        );
        match challenge {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn list_challenges(&self) -> Result<Vec<Challenge>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, category, title, deadline, reward, completed FROM challenges ORDER BY completed, deadline, id",
        )?;
        let rows = stmt.query_map([], challenge_from_row)?;
        rows.collect()
    }

    /// Starts one medical and one general research challenge.
    pub fn generate_challenges<R: Rng + ?Sized>(
        &self,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> crate::error::Result<Vec<Challenge>> {
        let mut created = Vec::with_capacity(2);
        for draft in offline::generate_challenges(rng) {
            let id = self.add_challenge(draft.category, draft.title, draft.reward, now)?;
            let challenge = self
                .get_challenge(id)?
                .ok_or(Error::NotFound { kind: "challenge", id })?;
            created.push(challenge);
        }
        info!(count = created.len(), "research challenges generated");
        Ok(created)
    }

    /// Marks a challenge done and pays its coins plus the research XP bonus.
    pub fn complete_challenge(&self, id: i64) -> crate::error::Result<(Challenge, UserProfile)> {
        let tx = self.conn.unchecked_transaction()?;

        let mut challenge = self
            .get_challenge(id)?
            .ok_or(Error::NotFound { kind: "challenge", id })?;
        if challenge.completed {
            return Err(Error::AlreadyCompleted(id));
        }

        let mut profile = self.get_profile()?;
        profile.grant(RewardDelta {
            xp: RESEARCH_BONUS_XP,
            coins: challenge.reward,
        });
        self.save_profile(&profile)?;
        self.conn.execute(
            "UPDATE challenges SET completed = 1 WHERE id = ?1",
            params![id],
        )?;
        tx.commit()?;

        challenge.completed = true;
        info!(challenge_id = id, coins = challenge.reward, "challenge completed");
        Ok((challenge, profile))
    }

    // Import/export helpers
    /// Upserts subjects then sessions by id. Sessions follow their subject
    /// when it was merged into an existing one of the same name.
    pub fn restore(&self, subjects: &[Subject], sessions: &[StudySession]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut subject_ids = HashMap::new();
        for subject in subjects {
            let local_id = self.upsert_subject(subject)?;
            subject_ids.insert(subject.id, local_id);
        }
        for session in sessions {
            match subject_ids.get(&session.subject_id) {
                Some(&local_id) if local_id != session.subject_id => {
                    let mut remapped = session.clone();
                    remapped.subject_id = local_id;
                    self.upsert_session(&remapped)?;
                }
                _ => self.upsert_session(session)?,
            }
        }
        tx.commit()?;
        Ok(sessions.len())
    }

    pub fn get_stats(&self, now: DateTime<Utc>) -> Result<Stats> {
        let total_sessions: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;

        let smart_sessions: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE strategy = 'smart'",
            [],
            |row| row.get(0),
        )?;

        let pending: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;

        let due_now: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE due_date <= ?1",
            params![fmt_ts(now)],
            |row| row.get(0),
        )?;

        let total_reviews: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM review_history", [], |row| row.get(0))?;

        let avg_quality: f64 = self.conn.query_row(
            "SELECT COALESCE(AVG(quality), 0.0) FROM review_history",
            [],
            |row| row.get(0),
        )?;

        Ok(Stats {
            total_sessions,
            smart_sessions,
            fixed_sessions: total_sessions - smart_sessions,
            pending,
            due_now,
            total_reviews,
            avg_quality,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_sessions: i64,
    pub smart_sessions: i64,
    pub fixed_sessions: i64,
    pub pending: i64,
    pub due_now: i64,
    pub total_reviews: i64,
    pub avg_quality: f64,
}
