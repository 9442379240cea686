//! Durable broker backed by a SQLite file.
//!
//! Several processes may open the same file. Consumers claim messages by
//! stamping them with their channel id and a lease. Live consumers keep
//! extending the lease; one that expires before the message is settled
//! makes it deliverable again.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Notify;

use super::{BrokerChannel, BrokerConnector, DeadLetter, Delivery, TransportError};

fn db_err(e: rusqlite::Error) -> TransportError {
    TransportError::Broker(e.to_string())
}

struct Shared {
    conn: Mutex<Connection>,
    notify: Notify,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

/// SQLite-backed durable broker.
#[derive(Clone)]
pub struct SqliteBroker {
    shared: Arc<Shared>,
}

impl SqliteBroker {
    /// Open (or create) a broker database file.
    pub fn new(
        path: &Path,
        poll_interval: Duration,
        visibility_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn, poll_interval, visibility_timeout)
    }

    /// Create an in-memory broker (useful for testing).
    pub fn in_memory(
        poll_interval: Duration,
        visibility_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn, poll_interval, visibility_timeout)
    }

    fn with_connection(
        conn: Connection,
        poll_interval: Duration,
        visibility_timeout: Duration,
    ) -> Result<Self, TransportError> {
        Self::initialize_schema(&conn)?;
        Ok(Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                notify: Notify::new(),
                poll_interval,
                visibility_timeout,
            }),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TransportError> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(db_err)?;
        // In-memory databases answer "memory" instead of switching to WAL.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(db_err)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                name TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                payload BLOB NOT NULL,
                state TEXT NOT NULL DEFAULT 'ready',
                owner TEXT,
                lease_until INTEGER,
                attempts INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_messages_topic_state ON messages(topic, state, id);
            CREATE INDEX IF NOT EXISTS idx_messages_owner ON messages(owner);

            CREATE TABLE IF NOT EXISTS dead_letters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                payload BLOB NOT NULL,
                attempts INTEGER NOT NULL,
                rejected_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(db_err)
    }

    /// Messages waiting for delivery (ready or with an expired lease).
    pub fn pending(&self, topic: &str) -> Result<i64, TransportError> {
        let conn = self.shared.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE topic = ? AND (state = 'ready' OR lease_until <= ?)",
            params![topic, Utc::now().timestamp_millis()],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    /// Messages that consumers rejected, oldest first.
    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, TransportError> {
        let conn = self.shared.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT topic, payload FROM dead_letters ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DeadLetter {
                    topic: row.get(0)?,
                    payload: row.get(1)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}

#[async_trait]
impl BrokerConnector for SqliteBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        // Fails fast if the file has become unusable.
        self.shared
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        Ok(Arc::new(SqliteChannel {
            owner: uuid::Uuid::new_v4().to_string(),
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }
}

struct SqliteChannel {
    owner: String,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl SqliteChannel {
    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        Ok(self.shared.conn.lock().unwrap())
    }

    fn check_topic(conn: &Connection, topic: &str) -> Result<(), TransportError> {
        let declared = conn
            .query_row("SELECT 1 FROM topics WHERE name = ?", params![topic], |_| {
                Ok(())
            })
            .optional()
            .map_err(db_err)?;
        declared.ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))
    }

    fn lease_deadline(&self, now: i64) -> i64 {
        now + self.shared.visibility_timeout.as_millis() as i64
    }

    fn try_claim(&self, topic: &str) -> Result<Option<Delivery>, TransportError> {
        let conn = self.conn()?;
        Self::check_topic(&conn, topic)?;

        let now = Utc::now().timestamp_millis();
        let held: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE owner = ? AND state = 'claimed' AND lease_until > ?",
                params![self.owner, now],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if held > 0 {
            return Err(TransportError::PrefetchExceeded);
        }

        let lease_until = self.lease_deadline(now);
        conn.query_row(
            r#"
            UPDATE messages
               SET state = 'claimed', owner = ?1, lease_until = ?2, attempts = attempts + 1
             WHERE id = (
                SELECT id FROM messages
                 WHERE topic = ?3
                   AND (state = 'ready' OR (state = 'claimed' AND lease_until <= ?4))
                 ORDER BY id
                 LIMIT 1
             )
            RETURNING id, payload, attempts
            "#,
            params![self.owner, lease_until, topic, now],
            |row| {
                Ok(Delivery {
                    tag: row.get::<_, i64>(0)? as u64,
                    topic: topic.to_string(),
                    payload: row.get(1)?,
                    attempts: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }
}

#[async_trait]
impl BrokerChannel for SqliteChannel {
    async fn declare(&self, topic: &str) -> Result<(), TransportError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO topics (name) VALUES (?)",
            params![topic],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        {
            let conn = self.conn()?;
            Self::check_topic(&conn, topic)?;
            conn.execute(
                "INSERT INTO messages (topic, payload) VALUES (?, ?)",
                params![topic, payload],
            )
            .map_err(db_err)?;
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn next_delivery(&self, topic: &str) -> Result<Delivery, TransportError> {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(delivery) = self.try_claim(topic)? {
                return Ok(delivery);
            }
            // Other processes publish without notifying us, hence the poll.
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.shared.poll_interval) => {}
            }
        }
    }

    async fn extend(&self, tag: u64) -> Result<(), TransportError> {
        let conn = self.conn()?;
        let lease_until = self.lease_deadline(Utc::now().timestamp_millis());
        let renewed = conn
            .execute(
                "UPDATE messages SET lease_until = ? WHERE id = ? AND owner = ? AND state = 'claimed'",
                params![lease_until, tag as i64, self.owner],
            )
            .map_err(db_err)?;
        if renewed == 0 {
            return Err(TransportError::UnknownDelivery(tag));
        }
        Ok(())
    }

    fn lease(&self) -> Option<Duration> {
        Some(self.shared.visibility_timeout)
    }

    async fn ack(&self, tag: u64) -> Result<(), TransportError> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM messages WHERE id = ? AND owner = ? AND state = 'claimed'",
                params![tag as i64, self.owner],
            )
            .map_err(db_err)?;
        if removed == 0 {
            return Err(TransportError::UnknownDelivery(tag));
        }
        Ok(())
    }

    async fn nack(&self, tag: u64, requeue: bool) -> Result<(), TransportError> {
        {
            let mut conn = self.conn()?;
            if requeue {
                let updated = conn
                    .execute(
                        "UPDATE messages SET state = 'ready', owner = NULL, lease_until = NULL WHERE id = ? AND owner = ? AND state = 'claimed'",
                        params![tag as i64, self.owner],
                    )
                    .map_err(db_err)?;
                if updated == 0 {
                    return Err(TransportError::UnknownDelivery(tag));
                }
            } else {
                let tx = conn.transaction().map_err(db_err)?;
                let moved = tx
                    .execute(
                        "INSERT INTO dead_letters (topic, payload, attempts, rejected_at) SELECT topic, payload, attempts, ? FROM messages WHERE id = ? AND owner = ? AND state = 'claimed'",
                        params![Utc::now().to_rfc3339(), tag as i64, self.owner],
                    )
                    .map_err(db_err)?;
                if moved == 0 {
                    return Err(TransportError::UnknownDelivery(tag));
                }
                tx.execute("DELETE FROM messages WHERE id = ?", params![tag as i64])
                    .map_err(db_err)?;
                tx.commit().map_err(db_err)?;
            }
        }
        if requeue {
            self.shared.notify.notify_waiters();
        }
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let conn = self.shared.conn.lock().unwrap();
        if let Err(e) = conn.execute(
            "UPDATE messages SET state = 'ready', owner = NULL, lease_until = NULL WHERE owner = ? AND state = 'claimed'",
            params![self.owner],
        ) {
            tracing::warn!("Failed to release claims for channel {}: {}", self.owner, e);
        }
        drop(conn);
        self.shared.notify.notify_waiters();
    }
}
