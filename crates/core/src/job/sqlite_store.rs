//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};

use super::{Job, JobError, JobFilter, JobOrder, JobStatus, JobStore};

const JOB_COLUMNS: &str = "id, target_digest, max_length, alphabet, part_count, status, matches, completed_parts, created_at, updated_at";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path).map_err(|e| JobError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(|e| JobError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| JobError::Database(e.to_string()))?;
        // In-memory databases answer "memory" instead of switching to WAL.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| JobError::Database(e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                target_digest TEXT NOT NULL,
                max_length INTEGER NOT NULL,
                alphabet TEXT NOT NULL,
                part_count INTEGER NOT NULL,
                status TEXT NOT NULL,
                matches TEXT NOT NULL,
                completed_parts TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status_updated ON jobs(status, updated_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            "#,
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(())
    }

    /// Fixed-width timestamps so that text ordering matches time ordering.
    fn timestamp(at: &DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn encode(job: &Job) -> Result<(String, String, String), JobError> {
        let alphabet = serde_json::to_string(&job.alphabet)
            .map_err(|e| JobError::Database(e.to_string()))?;
        let matches =
            serde_json::to_string(&job.matches).map_err(|e| JobError::Database(e.to_string()))?;
        let completed = serde_json::to_string(&job.completed_parts)
            .map_err(|e| JobError::Database(e.to_string()))?;
        Ok((alphabet, matches, completed))
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if filter.statuses.is_empty() {
            return (String::new(), params);
        }

        let placeholders = vec!["?"; filter.statuses.len()].join(", ");
        for status in &filter.statuses {
            params.push(Box::new(status.as_str()));
        }

        (format!("WHERE status IN ({})", placeholders), params)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        fn json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
            serde_json::from_str(raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        }

        fn time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        }

        let status_str: String = row.get(5)?;
        let status = JobStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                Type::Text,
                format!("unknown job status {:?}", status_str).into(),
            )
        })?;

        let alphabet_json: String = row.get(3)?;
        let matches_json: String = row.get(6)?;
        let completed_json: String = row.get(7)?;
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;

        Ok(Job {
            id: row.get(0)?,
            target_digest: row.get(1)?,
            max_length: row.get(2)?,
            alphabet: json(3, &alphabet_json)?,
            part_count: row.get(4)?,
            status,
            matches: json(6, &matches_json)?,
            completed_parts: json(7, &completed_json)?,
            created_at: time(8, &created_at)?,
            updated_at: time(9, &updated_at)?,
        })
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, job: &Job) -> Result<(), JobError> {
        let conn = self.conn.lock().unwrap();
        let (alphabet, matches, completed) = Self::encode(job)?;

        let result = conn.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.target_digest,
                job.max_length,
                alphabet,
                job.part_count,
                job.status.as_str(),
                matches,
                completed,
                Self::timestamp(&job.created_at),
                Self::timestamp(&job.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(JobError::AlreadyExists(job.id.clone()))
            }
            Err(e) => Err(JobError::Database(e.to_string())),
        }
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        let conn = self.conn.lock().unwrap();

        let result = conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        );

        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(JobError::Database(e.to_string())),
        }
    }

    fn save(&self, job: &Job) -> Result<(), JobError> {
        let conn = self.conn.lock().unwrap();
        let (_, matches, completed) = Self::encode(job)?;

        let updated = conn
            .execute(
                "UPDATE jobs SET status = ?, matches = ?, completed_parts = ?, updated_at = ? WHERE id = ?",
                params![
                    job.status.as_str(),
                    matches,
                    completed,
                    Self::timestamp(&job.updated_at),
                    job.id,
                ],
            )
            .map_err(|e| JobError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(JobError::NotFound(job.id.clone()));
        }
        Ok(())
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let order = match filter.order {
            JobOrder::CreatedDesc => "created_at DESC",
            JobOrder::UpdatedAsc => "updated_at ASC",
        };

        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY {} LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause, order
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| JobError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)
            .map_err(|e| JobError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| JobError::Database(e.to_string()))
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| JobError::Database(e.to_string()))
    }
}
