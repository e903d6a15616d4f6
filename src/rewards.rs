//! XP, coins, streaks and the title ladder.
//!
//! Rewards are derived from the quality signal and the interval the session
//! had *before* it was rescheduled; they never look at scheduler output.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::UserProfile;
use crate::scheduler::Quality;

pub const FAILED_REVIEW_XP: i64 = 5;
pub const RESEARCH_BONUS_XP: i64 = 50;

// Days without study after which the streak is lost
const STREAK_GRACE_DAYS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rank {
    pub xp: i64,
    pub title: &'static str,
}

pub const TITLES: [Rank; 8] = [
    Rank { xp: 0, title: "Med Student" },
    Rank { xp: 500, title: "Intern" },
    Rank { xp: 1500, title: "Resident" },
    Rank { xp: 3000, title: "Registrar" },
    Rank { xp: 5000, title: "Specialist" },
    Rank { xp: 8000, title: "Consultant" },
    Rank { xp: 12000, title: "Chief of Medicine" },
    Rank { xp: 20000, title: "Surgeon General" },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trophy {
    pub name: &'static str,
    pub label: &'static str,
    /// Unlocked once XP strictly exceeds this.
    pub threshold: i64,
}

pub const TROPHIES: [Trophy; 4] = [
    Trophy { name: "Novice", label: "100 XP", threshold: 100 },
    Trophy { name: "Scholar", label: "1K XP", threshold: 1000 },
    Trophy { name: "Master", label: "5K XP", threshold: 5000 },
    Trophy { name: "Legend", label: "10K XP", threshold: 10000 },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RewardDelta {
    pub xp: i64,
    pub coins: i64,
}

/// Works out what a single review is worth.
///
/// Passing reviews earn `10 * (q - 2)` XP, half again if the session had
/// already moved past a one-day interval, plus 1 to 3 coins. Failed reviews
/// still earn a small flat XP amount.
pub fn allocate<R: Rng + ?Sized>(quality: Quality, prior_interval: u32, rng: &mut R) -> RewardDelta {
    if !quality.is_success() {
        return RewardDelta {
            xp: FAILED_REVIEW_XP,
            coins: 0,
        };
    }

    let base = 10 * (i64::from(quality.value()) - 2);
    let xp = if prior_interval > 1 { base * 3 / 2 } else { base };

    RewardDelta {
        xp,
        coins: rng.gen_range(1..=3),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankProgress {
    pub level: usize,
    pub title: &'static str,
    pub next_title: Option<&'static str>,
    pub next_xp: Option<i64>,
    /// Percent of the way from the current rung to the next one.
    pub progress: f64,
}

pub fn rank_for(xp: i64) -> RankProgress {
    let index = TITLES
        .iter()
        .rposition(|rank| xp >= rank.xp)
        .unwrap_or(0);
    let current = TITLES[index];
    let next = TITLES.get(index + 1);

    let progress = match next {
        Some(next) => {
            let span = (next.xp - current.xp) as f64;
            (((xp - current.xp) as f64 / span) * 100.0).clamp(0.0, 100.0)
        }
        None => 100.0,
    };

    RankProgress {
        level: index + 1,
        title: current.title,
        next_title: next.map(|r| r.title),
        next_xp: next.map(|r| r.xp),
        progress,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrophyStatus {
    pub name: &'static str,
    pub label: &'static str,
    pub unlocked: bool,
}

pub fn trophies_for(xp: i64) -> Vec<TrophyStatus> {
    TROPHIES
        .iter()
        .map(|t| TrophyStatus {
            name: t.name,
            label: t.label,
            unlocked: xp > t.threshold,
        })
        .collect()
}

impl UserProfile {
    /// Books a finished review: XP, coins, streak, counters and the day's tally.
    pub fn record_review(&mut self, delta: RewardDelta, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.last_study_date.date_naive() != today {
            self.current_streak += 1;
        }
        self.longest_streak = self.longest_streak.max(self.current_streak);

        self.xp += delta.xp;
        self.coins += delta.coins;
        self.total_reviews += 1;
        self.last_study_date = now;
        *self.history.entry(today).or_insert(0) += 1;
    }

    /// Clears the streak after too long away. Returns true if it was reset.
    pub fn decay_streak(&mut self, now: DateTime<Utc>) -> bool {
        if self.last_study_date.date_naive() == now.date_naive() || self.current_streak == 0 {
            return false;
        }
        let away = (now - self.last_study_date).num_milliseconds() as f64 / 86_400_000.0;
        if away > STREAK_GRACE_DAYS {
            self.current_streak = 0;
            return true;
        }
        false
    }

    pub fn grant(&mut self, delta: RewardDelta) {
        self.xp += delta.xp;
        self.coins += delta.coins;
    }

    pub fn spend(&mut self, cost: i64) -> Result<()> {
        if self.coins < cost {
            return Err(Error::InsufficientCoins {
                have: self.coins,
                need: cost,
            });
        }
        self.coins -= cost;
        Ok(())
    }

    pub fn rank(&self) -> RankProgress {
        rank_for(self.xp)
    }

    pub fn trophies(&self) -> Vec<TrophyStatus> {
        trophies_for(self.xp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap()
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn q(v: u8) -> Quality {
        Quality::new(v).unwrap()
    }

    mod allocate_tests {
        use super::*;

        #[test]
        fn failed_review_earns_flat_xp() {
            for v in 0..3 {
                let delta = allocate(q(v), 10, &mut rng());
                assert_eq!(delta, RewardDelta { xp: 5, coins: 0 });
            }
        }

        #[test]
        fn passing_xp_scales_with_quality() {
            assert_eq!(allocate(q(3), 1, &mut rng()).xp, 10);
            assert_eq!(allocate(q(4), 1, &mut rng()).xp, 20);
            assert_eq!(allocate(q(5), 1, &mut rng()).xp, 30);
        }

        #[test]
        fn mature_sessions_earn_half_again() {
            assert_eq!(allocate(q(3), 6, &mut rng()).xp, 15);
            assert_eq!(allocate(q(5), 2, &mut rng()).xp, 45);
        }

        #[test]
        fn coins_between_one_and_three() {
            let mut rng = rng();
            for _ in 0..200 {
                let coins = allocate(q(4), 1, &mut rng).coins;
                assert!((1..=3).contains(&coins));
            }
        }
    }

    mod profile_tests {
        use super::*;

        fn profile_last_studied(at: DateTime<Utc>) -> UserProfile {
            UserProfile::new(at)
        }

        #[test]
        fn first_review_of_a_new_day_extends_streak() {
            let mut p = profile_last_studied(now() - Duration::days(1));
            p.record_review(RewardDelta { xp: 10, coins: 2 }, now());
            assert_eq!(p.current_streak, 1);
            assert_eq!(p.longest_streak, 1);
            assert_eq!(p.xp, 10);
            assert_eq!(p.coins, 52);
            assert_eq!(p.total_reviews, 1);
            assert_eq!(p.last_study_date, now());
        }

        #[test]
        fn same_day_reviews_do_not_extend_streak() {
            let mut p = profile_last_studied(now() - Duration::days(1));
            p.record_review(RewardDelta { xp: 10, coins: 0 }, now());
            p.record_review(RewardDelta { xp: 10, coins: 0 }, now() + Duration::hours(2));
            assert_eq!(p.current_streak, 1);
            assert_eq!(p.total_reviews, 2);
            let day = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
            assert_eq!(p.history.get(&day), Some(&2));
        }

        #[test]
        fn longest_streak_is_kept() {
            let mut p = profile_last_studied(now() - Duration::days(1));
            p.longest_streak = 9;
            p.record_review(RewardDelta { xp: 0, coins: 0 }, now());
            assert_eq!(p.current_streak, 1);
            assert_eq!(p.longest_streak, 9);
        }

        #[test]
        fn streak_survives_short_break() {
            let mut p = profile_last_studied(now() - Duration::days(2));
            p.current_streak = 4;
            assert!(!p.decay_streak(now()));
            assert_eq!(p.current_streak, 4);
        }

        #[test]
        fn streak_resets_after_long_break() {
            let mut p = profile_last_studied(now() - Duration::days(3));
            p.current_streak = 4;
            p.longest_streak = 4;
            assert!(p.decay_streak(now()));
            assert_eq!(p.current_streak, 0);
            assert_eq!(p.longest_streak, 4);
        }

        #[test]
        fn spend_checks_balance() {
            let mut p = profile_last_studied(now());
            assert!(p.spend(30).is_ok());
            assert_eq!(p.coins, 20);
            let err = p.spend(25).unwrap_err();
            assert!(matches!(err, Error::InsufficientCoins { have: 20, need: 25 }));
            assert_eq!(p.coins, 20);
        }

        #[test]
        fn grant_adds_both() {
            let mut p = profile_last_studied(now());
            p.grant(RewardDelta { xp: RESEARCH_BONUS_XP, coins: 20 });
            assert_eq!(p.xp, 50);
            assert_eq!(p.coins, 70);
        }
    }

    mod rank_tests {
        use super::*;

        #[test]
        fn starts_as_med_student() {
            let r = rank_for(0);
            assert_eq!(r.level, 1);
            assert_eq!(r.title, "Med Student");
            assert_eq!(r.next_title, Some("Intern"));
            assert_eq!(r.next_xp, Some(500));
            assert_eq!(r.progress, 0.0);
        }

        #[test]
        fn thresholds_are_inclusive() {
            assert_eq!(rank_for(499).title, "Med Student");
            assert_eq!(rank_for(500).title, "Intern");
            assert_eq!(rank_for(1000).progress, 50.0);
        }

        #[test]
        fn top_rank_is_capped() {
            let r = rank_for(50_000);
            assert_eq!(r.level, 8);
            assert_eq!(r.title, "Surgeon General");
            assert!(r.next_title.is_none());
            assert_eq!(r.progress, 100.0);
        }

        #[test]
        fn trophies_unlock_strictly_above_threshold() {
            let at_100 = trophies_for(100);
            assert!(at_100.iter().all(|t| !t.unlocked));

            let unlocked: Vec<_> = trophies_for(5001)
                .into_iter()
                .filter(|t| t.unlocked)
                .map(|t| t.name)
                .collect();
            assert_eq!(unlocked, vec!["Novice", "Scholar", "Master"]);
        }
    }
}
