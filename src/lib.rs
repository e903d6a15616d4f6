//! Gamified spaced-repetition study scheduler.
//!
//! The scheduling core lives in [`scheduler`] and is pure; [`db`] persists
//! sessions and the player profile in SQLite, and [`rewards`] turns reviews
//! into XP, coins and streaks.

pub mod clock;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod offline;
pub mod rewards;
pub mod scheduler;
