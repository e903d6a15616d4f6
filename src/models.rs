use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;
use crate::scheduler::{ReviewUpdate, INITIAL_EASE_FACTOR, MAX_INTERVAL_DAYS};

/// Ladder given to fixed sessions when none is specified.
pub const DEFAULT_FIXED_PATTERN: [u32; 5] = [1, 3, 7, 14, 30];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Smart,
    Fixed,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Smart => "smart",
            Strategy::Fixed => "fixed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "smart" | "sm2" | "adaptive" => Some(Strategy::Smart),
            "fixed" | "ladder" => Some(Strategy::Fixed),
            _ => None,
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::from_str(s).ok_or_else(|| {
            ScheduleError::InvalidArgument(format!(
                "unknown strategy '{}', use smart or fixed",
                s
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    // Reserved; nothing assigns it yet.
    Due,
    Reviewed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Due => "due",
            ReviewStatus::Reviewed => "reviewed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(ReviewStatus::Pending),
            "due" => Some(ReviewStatus::Due),
            "reviewed" => Some(ReviewStatus::Reviewed),
            _ => None,
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReviewStatus::from_str(s)
            .ok_or_else(|| ScheduleError::InvalidArgument(format!("unknown status '{}'", s)))
    }
}

/// Strategy-specific scheduling state.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    Smart { ease_factor: f64, repetitions: u32 },
    Fixed { pattern: Vec<u32> },
}

impl Schedule {
    pub fn smart() -> Self {
        Schedule::Smart {
            ease_factor: INITIAL_EASE_FACTOR,
            repetitions: 0,
        }
    }

    pub fn fixed(pattern: Vec<u32>) -> Result<Self, ScheduleError> {
        validate_pattern(&pattern)?;
        Ok(Schedule::Fixed { pattern })
    }

    /// Rebuilds a schedule from its flat, persisted columns.
    pub fn from_parts(
        strategy: Strategy,
        ease_factor: f64,
        repetitions: u32,
        fixed_pattern: Option<Vec<u32>>,
    ) -> Result<Self, ScheduleError> {
        match strategy {
            Strategy::Smart => {
                if !ease_factor.is_finite() {
                    return Err(ScheduleError::InvalidState(format!(
                        "ease factor must be finite, got {}",
                        ease_factor
                    )));
                }
                Ok(Schedule::Smart {
                    ease_factor,
                    repetitions,
                })
            }
            Strategy::Fixed => {
                let pattern = fixed_pattern.ok_or_else(|| {
                    ScheduleError::InvalidState("fixed strategy requires a pattern".to_string())
                })?;
                Schedule::fixed(pattern)
            }
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Schedule::Smart { .. } => Strategy::Smart,
            Schedule::Fixed { .. } => Strategy::Fixed,
        }
    }

    pub fn pattern(&self) -> Option<&[u32]> {
        match self {
            Schedule::Fixed { pattern } => Some(pattern),
            Schedule::Smart { .. } => None,
        }
    }
}

/// Checks that a ladder is non-empty and every step is a usable interval.
pub(crate) fn validate_pattern(pattern: &[u32]) -> Result<(), ScheduleError> {
    if pattern.is_empty() {
        return Err(ScheduleError::InvalidState(
            "fixed pattern must not be empty".to_string(),
        ));
    }
    if let Some(bad) = pattern
        .iter()
        .find(|&&step| step == 0 || step > MAX_INTERVAL_DAYS)
    {
        return Err(ScheduleError::InvalidState(format!(
            "fixed pattern steps must be between 1 and {} days, got {}",
            MAX_INTERVAL_DAYS, bad
        )));
    }
    Ok(())
}

/// Parses a comma-separated day ladder such as `1,3,7,14`.
pub fn parse_pattern(s: &str) -> Result<Vec<u32>, ScheduleError> {
    let pattern = s
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>().map_err(|_| {
                ScheduleError::InvalidArgument(format!("'{}' is not a day count", part))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    validate_pattern(&pattern)?;
    Ok(pattern)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SessionRecord", into = "SessionRecord")]
pub struct StudySession {
    pub id: i64,
    pub subject_id: i64,
    pub topic: String,
    pub due_date: DateTime<Utc>,
    pub last_reviewed: Option<DateTime<Utc>>,
    pub interval: u32,
    pub schedule: Schedule,
    pub status: ReviewStatus,
}

impl StudySession {
    pub fn new(
        id: i64,
        subject_id: i64,
        topic: impl Into<String>,
        schedule: Schedule,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            subject_id,
            topic: topic.into(),
            due_date,
            last_reviewed: None,
            interval: 1,
            schedule,
            status: ReviewStatus::Pending,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.schedule.strategy()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_date <= now
    }

    /// Merges a scheduler result into this session.
    pub fn apply(&mut self, update: &ReviewUpdate) {
        self.interval = update.interval;
        self.due_date = update.due_date;
        self.last_reviewed = Some(update.last_reviewed);
        self.status = update.status;

        if let (
            Schedule::Smart {
                ease_factor,
                repetitions,
            },
            Some(state),
        ) = (&mut self.schedule, update.smart)
        {
            *ease_factor = state.ease_factor;
            *repetitions = state.repetitions;
        }
    }
}

/// Flat on-disk shape of a session, as exported to JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: i64,
    pub subject_id: i64,
    #[serde(default)]
    pub topic: String,
    pub due_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reviewed: Option<DateTime<Utc>>,
    pub interval: u32,
    pub ease_factor: f64,
    pub repetitions: u32,
    pub strategy: Strategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_pattern: Option<Vec<u32>>,
    pub status: ReviewStatus,
}

impl TryFrom<SessionRecord> for StudySession {
    type Error = ScheduleError;

    fn try_from(r: SessionRecord) -> Result<Self, Self::Error> {
        let schedule = Schedule::from_parts(r.strategy, r.ease_factor, r.repetitions, r.fixed_pattern)?;
        Ok(StudySession {
            id: r.id,
            subject_id: r.subject_id,
            topic: r.topic,
            due_date: r.due_date,
            last_reviewed: r.last_reviewed,
            interval: r.interval,
            schedule,
            status: r.status,
        })
    }
}

impl From<StudySession> for SessionRecord {
    fn from(s: StudySession) -> Self {
        let strategy = s.strategy();
        let (ease_factor, repetitions, fixed_pattern) = match s.schedule {
            Schedule::Smart {
                ease_factor,
                repetitions,
            } => (ease_factor, repetitions, None),
            Schedule::Fixed { pattern } => (INITIAL_EASE_FACTOR, 0, Some(pattern)),
        };
        SessionRecord {
            id: s.id,
            subject_id: s.subject_id,
            topic: s.topic,
            due_date: s.due_date,
            last_reviewed: s.last_reviewed,
            interval: s.interval,
            ease_factor,
            repetitions,
            strategy,
            fixed_pattern,
            status: s.status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    pub avatar: String,
    pub xp: i64,
    pub coins: i64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_reviews: u64,
    pub last_study_date: DateTime<Utc>,
    #[serde(default)]
    pub history: BTreeMap<NaiveDate, u32>,
}

impl UserProfile {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            name: "Medical Student".to_string(),
            avatar: "\u{1F468}\u{200D}\u{2695}\u{FE0F}".to_string(),
            xp: 0,
            coins: 50,
            current_streak: 0,
            longest_streak: 0,
            total_reviews: 0,
            last_study_date: now,
            history: BTreeMap::new(),
        }
    }
}

// A shop item the user buys with coins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reward {
    pub id: i64,
    pub name: String,
    pub cost: i64,
    pub icon: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: i64,
    pub category: String,
    pub title: String,
    pub deadline: DateTime<Utc>,
    pub reward: i64,
    pub completed: bool,
}

impl Challenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.deadline < now
    }

    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline.date_naive() - now.date_naive()).num_days()
    }
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
