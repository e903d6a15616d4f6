//! Spaced-repetition scheduling.
//!
//! Given a session and a recall quality in `0..=5`, decides the next interval,
//! due date and (for adaptive sessions) the new ease factor and repetition
//! count. Two strategies are supported:
//!
//! - **Smart**: SM-2 style. Intervals go 1 day, 6 days, then grow by the
//!   ease factor. The ease factor moves with every review and never drops
//!   below [`MIN_EASE_FACTOR`].
//! - **Fixed**: a rehearsal ladder such as `[1, 3, 7, 14, 30]`. Success climbs
//!   one rung, failure drops back to the first, and success on the top rung
//!   doubles it.
//!
//! Everything here is pure: the caller supplies `now` and merges the returned
//! [`ReviewUpdate`] into its own copy of the session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;
use crate::models::{validate_pattern, ReviewStatus, Schedule, StudySession};

pub const MIN_EASE_FACTOR: f64 = 1.3;
pub const INITIAL_EASE_FACTOR: f64 = 2.5;

/// Upper bound on any computed interval (roughly a century).
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

const PASSING_QUALITY: u8 = 3;
const MAX_QUALITY: u8 = 5;

/// Recall quality for a single review, always within `0..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Quality(u8);

impl Quality {
    pub const AGAIN: Quality = Quality(1);
    pub const HARD: Quality = Quality(2);
    pub const GOOD: Quality = Quality(3);
    pub const EASY: Quality = Quality(5);

    pub fn new(value: u8) -> Result<Self, ScheduleError> {
        if value > MAX_QUALITY {
            return Err(ScheduleError::InvalidArgument(format!(
                "quality must be between 0 and {}, got {}",
                MAX_QUALITY, value
            )));
        }
        Ok(Quality(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 >= PASSING_QUALITY
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            0 | 1 => "Again",
            2 => "Hard",
            3 => "Good",
            4 => "Very Good",
            _ => "Easy",
        }
    }
}

impl TryFrom<u8> for Quality {
    type Error = ScheduleError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Quality::new(value)
    }
}

impl TryFrom<i64> for Quality {
    type Error = ScheduleError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| {
                ScheduleError::InvalidArgument(format!(
                    "quality must be between 0 and {}, got {}",
                    MAX_QUALITY, value
                ))
            })
            .and_then(Quality::new)
    }
}

impl From<Quality> for u8 {
    fn from(q: Quality) -> Self {
        q.0
    }
}

/// Adaptive state carried only by smart sessions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartState {
    pub ease_factor: f64,
    pub repetitions: u32,
}

/// Fields to overwrite on the reviewed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewUpdate {
    pub interval: u32,
    pub due_date: DateTime<Utc>,
    pub last_reviewed: DateTime<Utc>,
    pub status: ReviewStatus,
    #[serde(flatten)]
    pub smart: Option<SmartState>,
}

/// Where the current interval sits on a fixed ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LadderPosition {
    /// Found below the top rung; holds the index of the next rung.
    Inner(usize),
    /// Found on the top rung.
    Last,
    /// Not on the ladder at all.
    Missing,
}

fn locate(pattern: &[u32], interval: u32) -> LadderPosition {
    match pattern.iter().position(|&step| step == interval) {
        Some(i) if i + 1 < pattern.len() => LadderPosition::Inner(i + 1),
        Some(_) => LadderPosition::Last,
        None => LadderPosition::Missing,
    }
}

fn ease_delta(quality: Quality) -> f64 {
    let miss = f64::from(MAX_QUALITY - quality.value());
    0.1 - miss * (0.08 + miss * 0.02)
}

fn grow(interval: u32, ease_factor: f64) -> u32 {
    let next = (f64::from(interval) * ease_factor).round();
    // Float-to-int casts saturate, so only the lower bound needs care.
    (next as u32).clamp(1, MAX_INTERVAL_DAYS)
}

fn next_fixed_interval(pattern: &[u32], interval: u32, quality: Quality) -> u32 {
    let first = pattern[0];
    if !quality.is_success() {
        return first;
    }
    match locate(pattern, interval) {
        LadderPosition::Inner(next) => pattern[next],
        LadderPosition::Last => pattern[pattern.len() - 1]
            .saturating_mul(2)
            .min(MAX_INTERVAL_DAYS),
        LadderPosition::Missing => first,
    }
}

fn next_smart_state(
    interval: u32,
    state: SmartState,
    quality: Quality,
) -> (u32, SmartState) {
    let (interval, repetitions) = if quality.is_success() {
        let next = match state.repetitions {
            0 => 1,
            1 => 6,
            _ => grow(interval, state.ease_factor),
        };
        (next, state.repetitions.saturating_add(1))
    } else {
        (1, 0)
    };

    let ease_factor = (state.ease_factor + ease_delta(quality)).max(MIN_EASE_FACTOR);

    (
        interval,
        SmartState {
            ease_factor,
            repetitions,
        },
    )
}

fn due_after(now: DateTime<Utc>, interval: u32) -> Result<DateTime<Utc>, ScheduleError> {
    now.checked_add_signed(Duration::days(i64::from(interval)))
        .ok_or_else(|| {
            ScheduleError::InvalidArgument(format!(
                "due date overflows when adding {} days to {}",
                interval, now
            ))
        })
}

/// Computes the next review for `session` as of `now`.
///
/// The session itself is left untouched; merge the result with
/// [`StudySession::apply`] or the store's `replace_session`.
pub fn compute_next_review(
    session: &StudySession,
    quality: Quality,
    now: DateTime<Utc>,
) -> Result<ReviewUpdate, ScheduleError> {
    let (interval, smart) = match &session.schedule {
        Schedule::Fixed { pattern } => {
            validate_pattern(pattern)?;
            (next_fixed_interval(pattern, session.interval, quality), None)
        }
        Schedule::Smart {
            ease_factor,
            repetitions,
        } => {
            if !ease_factor.is_finite() {
                return Err(ScheduleError::InvalidState(format!(
                    "session {} has a non-finite ease factor",
                    session.id
                )));
            }
            let (interval, state) = next_smart_state(
                session.interval,
                SmartState {
                    ease_factor: *ease_factor,
                    repetitions: *repetitions,
                },
                quality,
            );
            (interval, Some(state))
        }
    };

    Ok(ReviewUpdate {
        interval,
        due_date: due_after(now, interval)?,
        last_reviewed: now,
        status: ReviewStatus::Reviewed,
        smart,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EPS: f64 = 1e-9;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap()
    }

    fn smart(interval: u32, ease_factor: f64, repetitions: u32) -> StudySession {
        let mut s = StudySession::new(
            1,
            1,
            "Cardiac cycle",
            Schedule::Smart {
                ease_factor,
                repetitions,
            },
            now(),
        );
        s.interval = interval;
        s
    }

    fn fixed(interval: u32, pattern: &[u32]) -> StudySession {
        let mut s = StudySession::new(
            2,
            1,
            "Cranial nerves",
            Schedule::Fixed {
                pattern: pattern.to_vec(),
            },
            now(),
        );
        s.interval = interval;
        s
    }

    fn q(v: u8) -> Quality {
        Quality::new(v).unwrap()
    }

    const LADDER: [u32; 5] = [1, 3, 7, 14, 30];

    mod quality_tests {
        use super::*;

        #[test]
        fn accepts_zero_through_five() {
            for v in 0..=5u8 {
                assert_eq!(Quality::new(v).unwrap().value(), v);
            }
        }

        #[test]
        fn rejects_out_of_range() {
            assert!(matches!(
                Quality::new(6),
                Err(ScheduleError::InvalidArgument(_))
            ));
            assert!(matches!(
                Quality::try_from(-1i64),
                Err(ScheduleError::InvalidArgument(_))
            ));
            assert!(matches!(
                Quality::try_from(300i64),
                Err(ScheduleError::InvalidArgument(_))
            ));
        }

        #[test]
        fn success_threshold_is_three() {
            assert!(!q(0).is_success());
            assert!(!q(2).is_success());
            assert!(q(3).is_success());
            assert!(q(4).is_success());
            assert!(q(5).is_success());
        }

        #[test]
        fn labels() {
            assert_eq!(Quality::AGAIN.label(), "Again");
            assert_eq!(Quality::HARD.label(), "Hard");
            assert_eq!(Quality::GOOD.label(), "Good");
            assert_eq!(Quality::EASY.label(), "Easy");
        }

        #[test]
        fn deserialize_rejects_invalid() {
            assert!(serde_json::from_str::<Quality>("4").is_ok());
            assert!(serde_json::from_str::<Quality>("7").is_err());
        }
    }

    mod fixed_tests {
        use super::*;

        #[test]
        fn success_advances_one_rung() {
            let update = compute_next_review(&fixed(1, &LADDER), q(5), now()).unwrap();
            assert_eq!(update.interval, 3);
            assert_eq!(update.due_date, now() + Duration::days(3));
            assert!(update.smart.is_none());
        }

        #[test]
        fn success_on_top_rung_doubles() {
            let update = compute_next_review(&fixed(30, &LADDER), q(5), now()).unwrap();
            assert_eq!(update.interval, 60);
        }

        #[test]
        fn past_the_top_falls_back_to_first() {
            // 60 is not on the ladder, so another success restarts it
            let update = compute_next_review(&fixed(60, &LADDER), q(5), now()).unwrap();
            assert_eq!(update.interval, 1);
        }

        #[test]
        fn failure_resets_to_first_rung() {
            let update = compute_next_review(&fixed(7, &LADDER), q(1), now()).unwrap();
            assert_eq!(update.interval, 1);
        }

        #[test]
        fn hard_counts_as_failure() {
            let update = compute_next_review(&fixed(14, &LADDER), q(2), now()).unwrap();
            assert_eq!(update.interval, 1);
        }

        #[test]
        fn unknown_interval_uses_first_rung() {
            let update = compute_next_review(&fixed(5, &[2, 4, 8]), q(3), now()).unwrap();
            assert_eq!(update.interval, 2);
        }

        #[test]
        fn single_rung_ladder_doubles() {
            let update = compute_next_review(&fixed(4, &[4]), q(4), now()).unwrap();
            assert_eq!(update.interval, 8);
        }

        #[test]
        fn empty_pattern_is_invalid_state() {
            let err = compute_next_review(&fixed(1, &[]), q(5), now()).unwrap_err();
            assert!(matches!(err, ScheduleError::InvalidState(_)));
        }

        #[test]
        fn zero_step_is_invalid_state() {
            let err = compute_next_review(&fixed(1, &[0, 3]), q(1), now()).unwrap_err();
            assert!(matches!(err, ScheduleError::InvalidState(_)));
        }

        #[test]
        fn over_cap_step_is_invalid_state() {
            let err =
                compute_next_review(&fixed(1, &[1, 4_000_000_000]), q(5), now()).unwrap_err();
            assert!(matches!(err, ScheduleError::InvalidState(_)));
        }

        #[test]
        fn doubling_is_capped() {
            let update =
                compute_next_review(&fixed(30_000, &[30_000]), q(5), now()).unwrap();
            assert_eq!(update.interval, MAX_INTERVAL_DAYS);
        }

        #[test]
        fn climbing_the_whole_ladder() {
            let mut session = fixed(1, &LADDER);
            let mut seen = vec![];
            for _ in 0..5 {
                let update = compute_next_review(&session, q(5), now()).unwrap();
                seen.push(update.interval);
                session.apply(&update);
            }
            assert_eq!(seen, vec![3, 7, 14, 30, 60]);
        }
    }

    mod smart_tests {
        use super::*;

        #[test]
        fn bootstrap_with_easy() {
            let update = compute_next_review(&smart(1, 2.5, 0), q(5), now()).unwrap();
            let state = update.smart.unwrap();
            assert_eq!(update.interval, 1);
            assert_eq!(state.repetitions, 1);
            assert!((state.ease_factor - 2.6).abs() < EPS);
            assert_eq!(update.due_date, now() + Duration::days(1));
        }

        #[test]
        fn second_success_is_six_days() {
            let update = compute_next_review(&smart(1, 2.6, 1), q(4), now()).unwrap();
            let state = update.smart.unwrap();
            assert_eq!(update.interval, 6);
            assert_eq!(state.repetitions, 2);
            // q=4: 0.1 - 1 * (0.08 + 0.02) = 0.0
            assert!((state.ease_factor - 2.6).abs() < EPS);
        }

        #[test]
        fn later_successes_multiply_by_previous_ease() {
            let update = compute_next_review(&smart(6, 2.5, 2), q(3), now()).unwrap();
            let state = update.smart.unwrap();
            assert_eq!(update.interval, 15);
            assert_eq!(state.repetitions, 3);
            // q=3: 0.1 - 2 * (0.08 + 0.04) = -0.14
            assert!((state.ease_factor - 2.36).abs() < EPS);
        }

        #[test]
        fn interval_rounds_half_up() {
            // 5 * 2.5 = 12.5
            let update = compute_next_review(&smart(5, 2.5, 3), q(4), now()).unwrap();
            assert_eq!(update.interval, 13);
        }

        #[test]
        fn failure_resets_and_penalises() {
            let update = compute_next_review(&smart(40, 2.5, 5), q(0), now()).unwrap();
            let state = update.smart.unwrap();
            assert_eq!(update.interval, 1);
            assert_eq!(state.repetitions, 0);
            assert!((state.ease_factor - 1.7).abs() < EPS);
        }

        #[test]
        fn failure_penalty_is_floored() {
            let update = compute_next_review(&smart(40, 1.8, 5), q(0), now()).unwrap();
            assert_eq!(update.smart.unwrap().ease_factor, MIN_EASE_FACTOR);
        }

        #[test]
        fn hard_fail_is_milder_than_blackout() {
            let hard = compute_next_review(&smart(10, 2.5, 3), q(2), now()).unwrap();
            let blackout = compute_next_review(&smart(10, 2.5, 3), q(0), now()).unwrap();
            assert!(
                hard.smart.unwrap().ease_factor > blackout.smart.unwrap().ease_factor
            );
        }

        #[test]
        fn low_ease_input_is_lifted_to_floor() {
            let update = compute_next_review(&smart(10, 1.0, 3), q(5), now()).unwrap();
            assert_eq!(update.smart.unwrap().ease_factor, MIN_EASE_FACTOR);
            // interval growth used the stored ease
            assert_eq!(update.interval, 10);
        }

        #[test]
        fn zero_interval_never_schedules_today() {
            let update = compute_next_review(&smart(0, 2.5, 4), q(5), now()).unwrap();
            assert_eq!(update.interval, 1);
        }

        #[test]
        fn non_finite_ease_is_invalid_state() {
            let err = compute_next_review(&smart(3, f64::NAN, 2), q(5), now()).unwrap_err();
            assert!(matches!(err, ScheduleError::InvalidState(_)));
        }

        #[test]
        fn growth_is_capped() {
            let update =
                compute_next_review(&smart(MAX_INTERVAL_DAYS, 2.5, 9), q(5), now()).unwrap();
            assert_eq!(update.interval, MAX_INTERVAL_DAYS);
        }
    }

    mod property_tests {
        use super::*;

        #[test]
        fn invariants_hold_for_every_quality() {
            let sessions = [
                smart(1, 2.5, 0),
                smart(6, 1.3, 1),
                smart(25, 1.31, 7),
                smart(3, 3.1, 2),
                fixed(1, &LADDER),
                fixed(30, &LADDER),
                fixed(11, &LADDER),
            ];
            for session in &sessions {
                for v in 0..=5u8 {
                    let update = compute_next_review(session, q(v), now()).unwrap();
                    assert!(update.interval >= 1);
                    assert!(update.due_date > now());
                    assert_eq!(update.last_reviewed, now());
                    assert_eq!(update.status, ReviewStatus::Reviewed);
                    if let Some(state) = update.smart {
                        assert!(state.ease_factor >= MIN_EASE_FACTOR);
                    }
                }
            }
        }

        #[test]
        fn repeated_failures_stay_on_floor() {
            let mut session = smart(1, 2.5, 0);
            for _ in 0..10 {
                let update = compute_next_review(&session, q(0), now()).unwrap();
                session.apply(&update);
            }
            match session.schedule {
                Schedule::Smart { ease_factor, .. } => assert_eq!(ease_factor, MIN_EASE_FACTOR),
                Schedule::Fixed { .. } => panic!("expected smart schedule"),
            }
        }

        #[test]
        fn deterministic_for_same_inputs() {
            let session = smart(15, 2.2, 4);
            let a = compute_next_review(&session, q(4), now()).unwrap();
            let b = compute_next_review(&session, q(4), now()).unwrap();
            assert_eq!(a, b);
        }

        #[test]
        fn input_is_not_mutated() {
            let session = smart(15, 2.2, 4);
            let before = session.clone();
            compute_next_review(&session, q(1), now()).unwrap();
            assert_eq!(session, before);
        }

        #[test]
        fn due_date_tracks_now() {
            let later = now() + Duration::hours(13);
            let update = compute_next_review(&fixed(3, &LADDER), q(5), later).unwrap();
            assert_eq!(update.due_date, later + Duration::days(7));
        }
    }

    mod ladder_tests {
        use super::*;

        #[test]
        fn locate_positions() {
            assert_eq!(locate(&LADDER, 1), LadderPosition::Inner(1));
            assert_eq!(locate(&LADDER, 14), LadderPosition::Inner(4));
            assert_eq!(locate(&LADDER, 30), LadderPosition::Last);
            assert_eq!(locate(&LADDER, 2), LadderPosition::Missing);
        }

        #[test]
        fn ease_delta_by_quality() {
            assert!((ease_delta(q(5)) - 0.1).abs() < EPS);
            assert!(ease_delta(q(4)).abs() < EPS);
            assert!((ease_delta(q(3)) + 0.14).abs() < EPS);
            assert!((ease_delta(q(2)) + 0.32).abs() < EPS);
            assert!((ease_delta(q(0)) + 0.8).abs() < EPS);
        }
    }
}
