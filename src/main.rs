use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use memoria::clock::{Clock, SystemClock};
use memoria::db::{Database, DEFAULT_SUBJECT_COLOR};
use memoria::error::Error;
use memoria::export;
use memoria::models::{parse_pattern, JsonOutput, Schedule, StudySession, Strategy, DEFAULT_FIXED_PATTERN};
use memoria::offline;
use memoria::scheduler::Quality;

const DEFAULT_DB_NAME: &str = "memoria.db";
const DEFAULT_CHALLENGE_REWARD: i64 = 20;

#[derive(Parser)]
#[command(name = "memoria")]
#[command(about = "A gamified spaced-repetition study scheduler")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage subjects
    #[command(subcommand)]
    Subject(SubjectCommands),

    /// Manage study sessions
    #[command(subcommand)]
    Session(SessionCommands),

    /// List sessions that are due now
    Due,

    /// Show sessions scheduled for a day
    Agenda {
        /// Day to show (YYYY-MM-DD), defaults to today
        #[arg(long, short)]
        date: Option<NaiveDate>,
    },

    /// Record a review for a session
    Review {
        /// Session ID
        id: i64,

        /// Recall quality from 0 (blackout) to 5 (perfect)
        #[arg(long, short, allow_negative_numbers = true)]
        quality: i64,
    },

    /// Show XP, coins, streak and rank
    Profile,

    /// Spend coins on rewards
    #[command(subcommand)]
    Reward(RewardCommands),

    /// Research challenges
    #[command(subcommand)]
    Challenge(ChallengeCommands),

    /// Export subjects and sessions to a JSON file
    Export {
        /// Output file
        path: PathBuf,
    },

    /// Import subjects and sessions from a JSON file
    Import {
        /// Input file
        path: PathBuf,
    },

    /// Print a motivational quote
    Quote,
}

#[derive(Subcommand)]
enum SubjectCommands {
    /// List all subjects
    List,

    /// Add a new subject
    Add {
        /// Subject name
        name: String,

        /// Display color, e.g. #f59e0b
        #[arg(long, short)]
        color: Option<String>,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List all sessions
    List {
        /// Filter by subject ID
        #[arg(long, short)]
        subject: Option<i64>,
    },

    /// Schedule a new topic
    Add {
        /// Topic name
        topic: String,

        /// Subject ID
        #[arg(long, short)]
        subject: i64,

        /// Scheduling strategy: smart or fixed
        #[arg(long, default_value = "smart")]
        strategy: Strategy,

        /// Comma-separated day ladder for fixed sessions
        #[arg(long, short)]
        pattern: Option<String>,

        /// First due day (YYYY-MM-DD), defaults to now
        #[arg(long)]
        start: Option<NaiveDate>,
    },

    /// Show session details
    Show {
        /// Session ID
        id: i64,
    },

    /// Delete a session
    Delete {
        /// Session ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum RewardCommands {
    /// List rewards in the shop
    List,

    /// Add a reward to the shop
    Add {
        /// Reward name
        name: String,

        /// Price in coins
        #[arg(long, short)]
        cost: i64,

        /// Icon shown next to the reward
        #[arg(long, short, default_value = "🎁")]
        icon: String,
    },

    /// Buy a reward
    Redeem {
        /// Reward ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum ChallengeCommands {
    /// List challenges
    List,

    /// Start a new one-week research challenge
    Add {
        /// Challenge title
        title: String,

        /// Category, e.g. Medical or General
        #[arg(long, short, default_value = "General")]
        category: String,

        /// Coins paid on completion
        #[arg(long, short, default_value_t = DEFAULT_CHALLENGE_REWARD)]
        reward: i64,
    },

    /// Start one medical and one general research challenge
    Generate,

    /// Get feedback on research notes
    Submit {
        /// Challenge ID
        id: i64,

        /// Research notes
        #[arg(long, short)]
        notes: String,
    },

    /// Mark a challenge as completed and collect the reward
    Complete {
        /// Challenge ID
        id: i64,
    },
}

fn get_db_path() -> io::Result<PathBuf> {
    if let Ok(path) = std::env::var("MEMORIA_DB") {
        return Ok(PathBuf::from(path));
    }

    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("memoria");

    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join(DEFAULT_DB_NAME))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli, &SystemClock) {
        if json {
            match serde_json::to_string(&JsonOutput::<()>::err(e.to_string())) {
                Ok(out) => println!("{}", out),
                Err(_) => eprintln!("Error: {}", e),
            }
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli, clock: &dyn Clock) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = get_db_path()?;
    debug!(path = %db_path.display(), "opening database");
    let db = Database::open(&db_path)?;
    let now = clock.now();
    db.init(now)?;
    let mut rng = rand::thread_rng();

    match cli.command {
        Commands::Init => {
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Database initialized at: {}", db_path.display());
            }
        }

        Commands::Subject(subject_cmd) => match subject_cmd {
            SubjectCommands::List => {
                let subjects = db.list_subjects()?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&subjects))?);
                } else if subjects.is_empty() {
                    println!("No subjects found.");
                } else {
                    println!("{:<5} {:<30} COLOR", "ID", "NAME");
                    println!("{}", "-".repeat(50));
                    for subject in subjects {
                        println!(
                            "{:<5} {:<30} {}",
                            subject.id,
                            truncate(&subject.name, 28),
                            subject.color
                        );
                    }
                }
            }

            SubjectCommands::Add { name, color } => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(Error::InvalidInput("subject name must not be empty".to_string()).into());
                }
                let color = color.unwrap_or_else(|| DEFAULT_SUBJECT_COLOR.to_string());
                let id = db.add_subject(name, &color)?;

                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "id": id,
                            "name": name
                        })))?
                    );
                } else {
                    println!("Added subject '{}' with ID: {}", name, id);
                }
            }
        },

        Commands::Session(session_cmd) => match session_cmd {
            SessionCommands::List { subject } => {
                let sessions = db.list_sessions(subject)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&sessions))?);
                } else if sessions.is_empty() {
                    println!("No sessions found.");
                } else {
                    print_session_table(&sessions, now);
                }
            }

            SessionCommands::Add {
                topic,
                subject,
                strategy,
                pattern,
                start,
            } => {
                let topic = topic.trim();
                if topic.is_empty() {
                    return Err(Error::InvalidInput("topic must not be empty".to_string()).into());
                }
                if db.get_subject(subject)?.is_none() {
                    return Err(Error::NotFound {
                        kind: "subject",
                        id: subject,
                    }
                    .into());
                }

                let schedule = build_schedule(strategy, pattern.as_deref())?;
                let due = match start {
                    Some(day) => start_of_day(day)?,
                    None => now,
                };
                let id = db.add_session(subject, topic, &schedule, due)?;

                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "id": id,
                            "topic": topic,
                            "strategy": schedule.strategy()
                        })))?
                    );
                } else {
                    println!(
                        "Scheduled '{}' ({}) with ID: {}, first review {}",
                        topic,
                        schedule.strategy().as_str(),
                        id,
                        due.format("%Y-%m-%d")
                    );
                }
            }

            SessionCommands::Show { id } => {
                let session = db
                    .get_session(id)?
                    .ok_or(Error::NotFound { kind: "session", id })?;
                let subject = db.get_subject(session.subject_id)?;

                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "session": session,
                            "subject": subject
                        })))?
                    );
                } else {
                    println!("Topic: {}", session.topic);
                    println!("ID: {}", session.id);
                    println!(
                        "Subject: {}",
                        subject
                            .map(|s| s.name)
                            .unwrap_or_else(|| format!("#{}", session.subject_id))
                    );
                    println!("Strategy: {}", session.strategy().as_str());
                    match &session.schedule {
                        Schedule::Smart {
                            ease_factor,
                            repetitions,
                        } => {
                            println!("Ease factor: {:.2}", ease_factor);
                            println!("Repetitions: {}", repetitions);
                        }
                        Schedule::Fixed { pattern } => {
                            let steps: Vec<String> = pattern.iter().map(u32::to_string).collect();
                            println!("Pattern: {} days", steps.join(", "));
                        }
                    }
                    println!("Interval: {} day(s)", session.interval);
                    println!("Status: {}", session.status.as_str());
                    println!("Due: {}", session.due_date.format("%Y-%m-%d %H:%M"));
                    if let Some(last) = session.last_reviewed {
                        println!("Last reviewed: {}", last.format("%Y-%m-%d %H:%M"));
                    }
                }
            }

            SessionCommands::Delete { id } => {
                if db.delete_session(id)? {
                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
                    } else {
                        println!("Session {} deleted.", id);
                    }
                } else {
                    return Err(Error::NotFound { kind: "session", id }.into());
                }
            }
        },

        Commands::Due => {
            let due = db.due_sessions(now)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&due))?);
            } else if due.is_empty() {
                println!("Nothing due. Enjoy the break!");
            } else {
                println!("=== {} session(s) due ===", due.len());
                print_session_table(&due, now);
                println!();
                println!("Record a review with:");
                println!("  memoria review <id> --quality <0-5>");
            }
        }

        Commands::Agenda { date } => {
            let day = date.unwrap_or_else(|| now.date_naive());
            let sessions = db.sessions_on(day)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&sessions))?);
            } else if sessions.is_empty() {
                println!("No sessions scheduled for {}.", day);
            } else {
                println!("=== Agenda for {} ===", day);
                print_session_table(&sessions, now);
            }
        }

        Commands::Review { id, quality } => {
            let quality = Quality::try_from(quality)?;
            let receipt = db.record_review(id, quality, now, &mut rng)?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&receipt))?);
            } else {
                println!(
                    "Review recorded for '{}' ({}).",
                    receipt.session.topic,
                    quality.label()
                );
                println!(
                    "Next review in {} day(s): {}",
                    receipt.session.interval,
                    receipt.session.due_date.format("%Y-%m-%d")
                );
                if receipt.reward.coins > 0 {
                    println!("+{} XP, +{} coins", receipt.reward.xp, receipt.reward.coins);
                } else {
                    println!("+{} XP", receipt.reward.xp);
                }
                println!(
                    "Streak: {} day(s), {} XP total",
                    receipt.profile.current_streak, receipt.profile.xp
                );
            }
        }

        Commands::Profile => {
            let profile = db.refresh_profile(now)?;
            let stats = db.get_stats(now)?;
            let rank = profile.rank();
            let trophies = profile.trophies();

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                        "profile": profile,
                        "rank": rank,
                        "trophies": trophies,
                        "stats": stats
                    })))?
                );
            } else {
                println!("=== {} {} ===", profile.avatar, profile.name);
                println!("Rank: {} (level {})", rank.title, rank.level);
                match (rank.next_title, rank.next_xp) {
                    (Some(next), Some(xp)) => {
                        println!("XP: {} / {} ({:.0}% to {})", profile.xp, xp, rank.progress, next)
                    }
                    _ => println!("XP: {} (max rank)", profile.xp),
                }
                println!("Coins: {}", profile.coins);
                println!(
                    "Streak: {} day(s) (longest {})",
                    profile.current_streak, profile.longest_streak
                );
                println!("Total reviews: {}", profile.total_reviews);
                println!();
                println!("--- Sessions ---");
                println!(
                    "{} total ({} smart, {} fixed), {} due now",
                    stats.total_sessions, stats.smart_sessions, stats.fixed_sessions, stats.due_now
                );
                println!("Average quality: {:.1}/5", stats.avg_quality);
                println!();
                println!("--- Trophies ---");
                for trophy in trophies {
                    let mark = if trophy.unlocked { "x" } else { " " };
                    println!("[{}] {:<8} {}", mark, trophy.name, trophy.label);
                }
            }
        }

        Commands::Reward(reward_cmd) => match reward_cmd {
            RewardCommands::List => {
                let rewards = db.list_rewards()?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&rewards))?);
                } else if rewards.is_empty() {
                    println!("The shop is empty. Add a reward first!");
                } else {
                    println!("{:<5} {:<30} COST", "ID", "REWARD");
                    println!("{}", "-".repeat(45));
                    for reward in rewards {
                        println!(
                            "{:<5} {:<30} {}",
                            reward.id,
                            truncate(&format!("{} {}", reward.icon, reward.name), 28),
                            reward.cost
                        );
                    }
                }
            }

            RewardCommands::Add { name, cost, icon } => {
                let id = db.add_reward(&name, cost, &icon)?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "id": id,
                            "name": name.trim(),
                            "cost": cost
                        })))?
                    );
                } else {
                    println!("Added reward '{}' for {} coins with ID: {}", name.trim(), cost, id);
                }
            }

            RewardCommands::Redeem { id } => {
                let (reward, profile) = db.redeem_reward(id)?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "reward": reward,
                            "coins": profile.coins
                        })))?
                    );
                } else {
                    println!(
                        "Enjoy your {} {}! {} coins left.",
                        reward.icon, reward.name, profile.coins
                    );
                }
            }
        },

        Commands::Challenge(challenge_cmd) => match challenge_cmd {
            ChallengeCommands::List => {
                let challenges = db.list_challenges()?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&challenges))?);
                } else if challenges.is_empty() {
                    println!("No challenges yet.");
                } else {
                    println!("{:<5} {:<35} {:<10} {:<7} STATUS", "ID", "TITLE", "CATEGORY", "REWARD");
                    println!("{}", "-".repeat(75));
                    for c in challenges {
                        let status = if c.completed {
                            "done".to_string()
                        } else if c.is_expired(now) {
                            "expired".to_string()
                        } else {
                            format!("{}d left", c.days_left(now))
                        };
                        println!(
                            "{:<5} {:<35} {:<10} {:<7} {}",
                            c.id,
                            truncate(&c.title, 33),
                            truncate(&c.category, 10),
                            c.reward,
                            status
                        );
                    }
                }
            }

            ChallengeCommands::Add {
                title,
                category,
                reward,
            } => {
                let id = db.add_challenge(&category, &title, reward, now)?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "id": id,
                            "title": title.trim()
                        })))?
                    );
                } else {
                    println!("Challenge '{}' started with ID: {} (one week)", title.trim(), id);
                }
            }

            ChallengeCommands::Generate => {
                let created = db.generate_challenges(now, &mut rng)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&created))?);
                } else {
                    for c in created {
                        println!(
                            "New {} challenge '{}' (ID: {}, {} coins, due {})",
                            c.category,
                            c.title,
                            c.id,
                            c.reward,
                            c.deadline.format("%Y-%m-%d")
                        );
                    }
                }
            }

            ChallengeCommands::Submit { id, notes } => {
                let challenge = db
                    .get_challenge(id)?
                    .ok_or(Error::NotFound { kind: "challenge", id })?;
                let feedback = offline::research_feedback(&challenge.title, &notes);
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "id": id,
                            "feedback": feedback
                        })))?
                    );
                } else {
                    println!("{}", feedback);
                }
            }

            ChallengeCommands::Complete { id } => {
                let (challenge, profile) = db.complete_challenge(id)?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "challenge": challenge,
                            "profile": profile
                        })))?
                    );
                } else {
                    println!(
                        "Challenge '{}' completed: +{} coins. Balance: {}",
                        challenge.title, challenge.reward, profile.coins
                    );
                }
            }
        },

        Commands::Export { path } => {
            let snapshot = export::export_snapshot(&db, &path, now)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                        "path": path,
                        "subjects": snapshot.subjects.len(),
                        "sessions": snapshot.sessions.len()
                    })))?
                );
            } else {
                println!(
                    "Exported {} session(s) to {}",
                    snapshot.sessions.len(),
                    path.display()
                );
            }
        }

        Commands::Import { path } => {
            let restored = export::import_snapshot(&db, &path)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                        "sessions": restored
                    })))?
                );
            } else {
                println!("Imported {} session(s) from {}", restored, path.display());
            }
        }

        Commands::Quote => {
            let quote = offline::daily_quote(&mut rng);
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(quote))?);
            } else {
                println!("{}", quote);
            }
        }
    }

    Ok(())
}

fn build_schedule(strategy: Strategy, pattern: Option<&str>) -> memoria::error::Result<Schedule> {
    match (strategy, pattern) {
        (Strategy::Smart, None) => Ok(Schedule::smart()),
        (Strategy::Smart, Some(_)) => Err(Error::InvalidInput(
            "--pattern only applies to fixed sessions".to_string(),
        )),
        (Strategy::Fixed, None) => Ok(Schedule::fixed(DEFAULT_FIXED_PATTERN.to_vec())?),
        (Strategy::Fixed, Some(p)) => Ok(Schedule::fixed(parse_pattern(p)?)?),
    }
}

fn start_of_day(day: NaiveDate) -> memoria::error::Result<DateTime<Utc>> {
    day.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| Error::InvalidInput(format!("invalid start date {}", day)))
}

fn print_session_table(sessions: &[StudySession], now: DateTime<Utc>) {
    println!(
        "{:<5} {:<35} {:<7} {:<9} DUE",
        "ID", "TOPIC", "STRAT", "INTERVAL"
    );
    println!("{}", "-".repeat(75));
    for s in sessions {
        let marker = if s.is_due(now) { " *" } else { "" };
        println!(
            "{:<5} {:<35} {:<7} {:<9} {}{}",
            s.id,
            truncate(&s.topic, 33),
            s.strategy().as_str(),
            format!("{}d", s.interval),
            s.due_date.format("%Y-%m-%d"),
            marker
        );
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
