//! JSON backup of subjects and sessions.
//!
//! Sessions use the flat camelCase record (`easeFactor`, `fixedPattern`, ...)
//! so a snapshot can be read back and rescheduled with identical results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

use crate::db::Database;
use crate::error::Result;
use crate::models::{StudySession, Subject};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub subjects: Vec<Subject>,
    pub sessions: Vec<StudySession>,
}

impl Snapshot {
    pub fn capture(db: &Database, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            version: SNAPSHOT_VERSION,
            exported_at: now,
            subjects: db.list_subjects()?,
            sessions: db.list_sessions(None)?,
        })
    }
}

/// Writes every subject and session to `path`. Returns the snapshot written.
pub fn export_snapshot<P: AsRef<Path>>(
    db: &Database,
    path: P,
    now: DateTime<Utc>,
) -> Result<Snapshot> {
    let snapshot = Snapshot::capture(db, now)?;
    let json_string = serde_json::to_string_pretty(&snapshot)?;
    let mut file = File::create(path.as_ref())?;
    file.write_all(json_string.as_bytes())?;

    info!(
        path = %path.as_ref().display(),
        sessions = snapshot.sessions.len(),
        "snapshot exported"
    );
    Ok(snapshot)
}

pub fn read_snapshot<P: AsRef<Path>>(path: P) -> Result<Snapshot> {
    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    // Sessions are validated while deserializing
    let snapshot: Snapshot = serde_json::from_str(&contents)?;
    Ok(snapshot)
}

/// Loads a snapshot into the database, overwriting rows with the same ids.
/// Returns the number of sessions restored.
pub fn import_snapshot<P: AsRef<Path>>(db: &Database, path: P) -> Result<usize> {
    let snapshot = read_snapshot(path.as_ref())?;
    let restored = db.restore(&snapshot.subjects, &snapshot.sessions)?;

    info!(
        path = %path.as_ref().display(),
        sessions = restored,
        "snapshot imported"
    );
    Ok(restored)
}
