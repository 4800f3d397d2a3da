//! SQLite persistence for formcoach-daemon.
//!
//! Holds the durable session records written when a session ends, plus one
//! patient intake profile per user. Session rows are insert-only; profiles
//! are replaced on every save.

use chrono::{DateTime, SecondsFormat, Utc};
use formcoach_protocol::{PatientProfile, SessionRecord};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::PathBuf;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    pub fn insert_session_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sessions \
                    (id, user_id, exercise_name, target_reps, completed_reps, avg_angle, max_angle, min_angle, \
                     total_frames, correct_form_frames, accuracy, duration_seconds, llm_notes, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.id,
                    record.user_id,
                    record.exercise_name,
                    record.target_reps,
                    record.completed_reps,
                    record.avg_angle,
                    record.max_angle,
                    record.min_angle,
                    record.total_frames as i64,
                    record.correct_form_frames as i64,
                    record.accuracy,
                    record.duration_seconds as i64,
                    record.llm_notes,
                    format_timestamp(&record.created_at),
                ],
            )
            .map_err(StoreError::sqlite("Failed to insert session record"))?;
            Ok(())
        })
    }

    /// Records for one user, newest first.
    pub fn list_session_records(&self, user_id: &str) -> Result<Vec<SessionRecord>, StoreError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, exercise_name, target_reps, completed_reps, avg_angle, \
                            max_angle, min_angle, total_frames, correct_form_frames, accuracy, \
                            duration_seconds, llm_notes, created_at \
                     FROM sessions WHERE user_id = ?1 \
                     ORDER BY created_at DESC, id DESC",
                )
                .map_err(StoreError::sqlite("Failed to prepare sessions query"))?;

            let rows = stmt
                .query_map(params![user_id], read_record_row)
                .map_err(StoreError::sqlite("Failed to read session rows"))?;

            let mut records = Vec::new();
            for row in rows {
                let (record, created_at) =
                    row.map_err(StoreError::sqlite("Failed to decode session row"))?;
                records.push(SessionRecord {
                    created_at: parse_timestamp(&created_at)?,
                    ..record
                });
            }
            Ok(records)
        })
    }

    pub fn count_session_records(&self) -> Result<u64, StoreError> {
        let count = self.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(StoreError::sqlite("Failed to count sessions"))
        })?;
        Ok(count.max(0) as u64)
    }

    /// Inserts or replaces the user's profile. `created_at` of an existing
    /// row is kept. Returns the stored profile.
    pub fn upsert_profile(&self, profile: &PatientProfile) -> Result<PatientProfile, StoreError> {
        let document = serde_json::to_string(profile)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, profile, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(user_id) DO UPDATE SET \
                    profile = excluded.profile, \
                    updated_at = excluded.updated_at",
                params![
                    profile.user_id,
                    document,
                    format_timestamp(&profile.created_at),
                    format_timestamp(&profile.updated_at),
                ],
            )
            .map_err(StoreError::sqlite("Failed to upsert profile"))?;
            Ok(())
        })?;

        self.get_profile(&profile.user_id)?
            .ok_or_else(|| StoreError::Task("Profile missing after upsert".to_string()))
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<PatientProfile>, StoreError> {
        let row = self.with_connection(|conn| {
            conn.query_row(
                "SELECT profile, created_at, updated_at FROM profiles WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::sqlite("Failed to read profile"))
        })?;

        let Some((document, created_at, updated_at)) = row else {
            return Ok(None);
        };
        let profile: PatientProfile = serde_json::from_str(&document)?;
        Ok(Some(PatientProfile {
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            ..profile
        }))
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    exercise_name TEXT NOT NULL,
                    target_reps INTEGER NOT NULL,
                    completed_reps INTEGER NOT NULL,
                    avg_angle REAL NOT NULL,
                    max_angle REAL NOT NULL,
                    min_angle REAL NOT NULL,
                    total_frames INTEGER NOT NULL,
                    correct_form_frames INTEGER NOT NULL,
                    accuracy INTEGER NOT NULL,
                    duration_seconds INTEGER NOT NULL,
                    llm_notes TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS sessions_user_created
                    ON sessions (user_id, created_at);
                 CREATE TABLE IF NOT EXISTS profiles (
                    user_id TEXT PRIMARY KEY,
                    profile TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 COMMIT;",
            )
            .map_err(StoreError::sqlite("Failed to initialize schema"))?;
            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|source| StoreError::DataDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(StoreError::sqlite("Failed to open sqlite db"))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StoreError::sqlite("Failed to enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(StoreError::sqlite("Failed to set synchronous"))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(StoreError::sqlite("Failed to set busy_timeout"))?;

        Ok(conn)
    }
}

/// Runs a store operation on the blocking pool.
pub async fn run_blocking<T, F>(op: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
}

fn read_record_row(row: &Row<'_>) -> rusqlite::Result<(SessionRecord, String)> {
    let record = SessionRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        exercise_name: row.get(2)?,
        target_reps: row.get(3)?,
        completed_reps: row.get(4)?,
        avg_angle: row.get(5)?,
        max_angle: row.get(6)?,
        min_angle: row.get(7)?,
        total_frames: row.get::<_, i64>(8)?.max(0) as u64,
        correct_form_frames: row.get::<_, i64>(9)?.max(0) as u64,
        accuracy: row.get(10)?,
        duration_seconds: row.get::<_, i64>(11)?.max(0) as u64,
        llm_notes: row.get(12)?,
        created_at: DateTime::<Utc>::UNIX_EPOCH,
    };
    Ok((record, row.get(13)?))
}

// Fixed-width UTC timestamps so lexical order in SQLite matches time order.
fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp(value.to_string()))
}
