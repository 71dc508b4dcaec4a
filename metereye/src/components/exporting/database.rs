use crate::config::model::{DatabaseExportConfig, DatabaseType};
use crate::errors::ExportError;
use crate::messages::readings::Observation;
use crate::utils::queue::BoundedQueue;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Consumer poll interval.
const POLL: Duration = Duration::from_millis(200);
/// First reconnect delay.
const BACKOFF_START: Duration = Duration::from_secs(1);
/// Reconnect delay ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(60);
/// How often the retention pass runs.
const RETENTION_PERIOD: Duration = Duration::from_secs(3600);
/// Upper bound on a single statement (sqlite lock wait, postgres
/// connect).
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

const SQLITE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    camera_id VARCHAR(64) NOT NULL,
    meter_id VARCHAR(64) NOT NULL,
    value FLOAT,
    raw_text VARCHAR(32),
    timestamp DATETIME NOT NULL,
    confidence FLOAT
);
CREATE INDEX IF NOT EXISTS idx_readings_key_time
    ON readings (camera_id, meter_id, timestamp);
CREATE TABLE IF NOT EXISTS indicator_readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    camera_id VARCHAR(64) NOT NULL,
    indicator_id VARCHAR(64) NOT NULL,
    state BOOLEAN NOT NULL,
    brightness FLOAT,
    timestamp DATETIME NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_indicator_readings_key_time
    ON indicator_readings (camera_id, indicator_id, timestamp);
";

const POSTGRES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS readings (
    id BIGSERIAL PRIMARY KEY,
    camera_id VARCHAR(64) NOT NULL,
    meter_id VARCHAR(64) NOT NULL,
    value DOUBLE PRECISION,
    raw_text VARCHAR(32),
    timestamp TIMESTAMPTZ NOT NULL,
    confidence DOUBLE PRECISION
);
CREATE INDEX IF NOT EXISTS idx_readings_key_time
    ON readings (camera_id, meter_id, timestamp);
CREATE TABLE IF NOT EXISTS indicator_readings (
    id BIGSERIAL PRIMARY KEY,
    camera_id VARCHAR(64) NOT NULL,
    indicator_id VARCHAR(64) NOT NULL,
    state BOOLEAN NOT NULL,
    brightness DOUBLE PRECISION,
    timestamp TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_indicator_readings_key_time
    ON indicator_readings (camera_id, indicator_id, timestamp);
";

/// One open database connection of either engine.
pub(crate) enum DbClient {
    Sqlite(rusqlite::Connection),
    Postgres(postgres::Client),
}

/// Timestamps are stored as fixed width RFC 3339 UTC text in sqlite,
/// which makes lexicographic comparison chronological.
fn timestamp_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl DbClient {
    /// Open a connection for the configured engine. The loader has
    /// already checked that the required location field is present.
    pub(crate) fn open(config: &DatabaseExportConfig) -> Result<Self, ExportError> {
        match config.kind {
            DatabaseType::Sqlite => {
                let path = config.path.clone().unwrap_or_default();
                let connection = rusqlite::Connection::open(&path)
                    .map_err(|e| ExportError::Transient(e.to_string()))?;
                connection
                    .busy_timeout(QUERY_TIMEOUT)
                    .map_err(|e| ExportError::Transient(e.to_string()))?;
                Ok(DbClient::Sqlite(connection))
            }
            DatabaseType::Postgresql => {
                let connection_string = config.connection_string.clone().unwrap_or_default();
                let mut pg_config = connection_string
                    .parse::<postgres::Config>()
                    .map_err(|e| ExportError::Permanent(e.to_string()))?;
                pg_config.connect_timeout(QUERY_TIMEOUT);
                let client = pg_config
                    .connect(postgres::NoTls)
                    .map_err(|e| ExportError::Transient(e.to_string()))?;
                Ok(DbClient::Postgres(client))
            }
        }
    }

    /// Create the tables and indexes if they do not exist yet.
    pub(crate) fn ensure_schema(&mut self) -> Result<(), ExportError> {
        match self {
            DbClient::Sqlite(connection) => connection
                .execute_batch(SQLITE_SCHEMA)
                .map_err(|e| ExportError::Permanent(e.to_string())),
            DbClient::Postgres(client) => client
                .batch_execute(POSTGRES_SCHEMA)
                .map_err(|e| ExportError::Transient(e.to_string())),
        }
    }

    /// Insert one observation into its table. Failed readings are
    /// inserted like any other, a null value is how operators tell a
    /// broken meter from an unread one.
    pub(crate) fn insert(&mut self, observation: &Observation) -> Result<(), ExportError> {
        match (self, observation) {
            (DbClient::Sqlite(connection), Observation::Meter(r)) => connection
                .execute(
                    "INSERT INTO readings \
                     (camera_id, meter_id, value, raw_text, timestamp, confidence) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        r.camera_id,
                        r.meter_id,
                        r.value,
                        r.raw_text,
                        timestamp_text(r.timestamp),
                        r.confidence,
                    ],
                )
                .map(|_| ())
                .map_err(|e| ExportError::Permanent(e.to_string())),
            (DbClient::Sqlite(connection), Observation::Indicator(r)) => connection
                .execute(
                    "INSERT INTO indicator_readings \
                     (camera_id, indicator_id, state, brightness, timestamp) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        r.camera_id,
                        r.indicator_id,
                        r.state,
                        r.score,
                        timestamp_text(r.timestamp),
                    ],
                )
                .map(|_| ())
                .map_err(|e| ExportError::Permanent(e.to_string())),
            (DbClient::Postgres(client), Observation::Meter(r)) => client
                .execute(
                    "INSERT INTO readings \
                     (camera_id, meter_id, value, raw_text, timestamp, confidence) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &[
                        &r.camera_id,
                        &r.meter_id,
                        &r.value,
                        &r.raw_text,
                        &r.timestamp,
                        &r.confidence,
                    ],
                )
                .map(|_| ())
                .map_err(|e| classify_postgres(client, e)),
            (DbClient::Postgres(client), Observation::Indicator(r)) => client
                .execute(
                    "INSERT INTO indicator_readings \
                     (camera_id, indicator_id, state, brightness, timestamp) \
                     VALUES ($1, $2, $3, $4, $5)",
                    &[&r.camera_id, &r.indicator_id, &r.state, &r.score, &r.timestamp],
                )
                .map(|_| ())
                .map_err(|e| classify_postgres(client, e)),
        }
    }

    /// Delete rows older than the cutoff from both tables. Returns how
    /// many rows went away.
    pub(crate) fn purge_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<u64, ExportError> {
        match self {
            DbClient::Sqlite(connection) => {
                let text = timestamp_text(cutoff);
                let mut removed = connection
                    .execute("DELETE FROM readings WHERE timestamp < ?1", [&text])
                    .map_err(|e| ExportError::Permanent(e.to_string()))?;
                removed += connection
                    .execute("DELETE FROM indicator_readings WHERE timestamp < ?1", [&text])
                    .map_err(|e| ExportError::Permanent(e.to_string()))?;
                Ok(removed as u64)
            }
            DbClient::Postgres(client) => {
                let mut removed = client
                    .execute("DELETE FROM readings WHERE timestamp < $1", &[&cutoff])
                    .map_err(|e| ExportError::Transient(e.to_string()))?;
                removed += client
                    .execute(
                        "DELETE FROM indicator_readings WHERE timestamp < $1",
                        &[&cutoff],
                    )
                    .map_err(|e| ExportError::Transient(e.to_string()))?;
                Ok(removed)
            }
        }
    }
}

fn classify_postgres(client: &postgres::Client, error: postgres::Error) -> ExportError {
    if client.is_closed() {
        ExportError::Transient(error.to_string())
    } else {
        ExportError::Permanent(error.to_string())
    }
}

/// Open a connection with backoff, giving up once the queue closes.
fn open_until_ready(
    config: &DatabaseExportConfig,
    queue: &BoundedQueue<Observation>,
) -> Option<DbClient> {
    let mut backoff = BACKOFF_START;
    loop {
        match DbClient::open(config).and_then(|mut client| {
            client.ensure_schema()?;
            Ok(client)
        }) {
            Ok(client) => return Some(client),
            Err(err) => {
                warn!(error = %err, retry_in = ?backoff, "database unavailable");
                if queue.is_closed() {
                    return None;
                }
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }
}

/// Consume the sink queue, inserting each observation. A second
/// connection runs the hourly retention pass; together they are the
/// whole pool this sink needs.
pub(crate) fn run(config: DatabaseExportConfig, queue: Arc<BoundedQueue<Observation>>) {
    let Some(mut client) = open_until_ready(&config, &queue) else {
        return;
    };
    info!(kind = %config.kind, "database sink connected");

    let retention_config = config.clone();
    let retention_queue = queue.clone();
    let retention = std::thread::spawn(move || {
        retention_loop(retention_config, retention_queue);
    });

    loop {
        match queue.recv_timeout(POLL) {
            Some(observation) => {
                if let Err(err) = client.insert(&observation) {
                    if err.is_transient() {
                        warn!(error = %err, "database write failed, reconnecting");
                        match open_until_ready(&config, &queue) {
                            Some(next) => {
                                client = next;
                                if let Err(err) = client.insert(&observation) {
                                    warn!(error = %err, "dropping observation after reconnect");
                                }
                            }
                            None => break,
                        }
                    } else {
                        warn!(error = %err, "dropping observation");
                    }
                }
            }
            None => {
                if queue.is_closed() && queue.is_empty() {
                    break;
                }
            }
        }
    }
    let _ = retention.join();
}

/// Hourly deletion of rows older than the retention window, on its
/// own connection so a slow delete never delays inserts.
fn retention_loop(config: DatabaseExportConfig, queue: Arc<BoundedQueue<Observation>>) {
    let mut last_run: Option<Instant> = None;
    while !queue.is_closed() {
        let due = last_run.map_or(true, |at| at.elapsed() >= RETENTION_PERIOD);
        if due {
            last_run = Some(Instant::now());
            let cutoff = Utc::now() - ChronoDuration::days(config.retention_days as i64);
            match DbClient::open(&config).and_then(|mut client| client.purge_older_than(cutoff)) {
                Ok(removed) if removed > 0 => {
                    info!(removed, "retention pass deleted expired rows")
                }
                Ok(_) => debug!("retention pass found nothing to delete"),
                Err(err) => warn!(error = %err, "retention pass failed"),
            }
        }
        std::thread::sleep(Duration::from_millis(500));
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::messages::readings::{IndicatorReading, Reading};
    use chrono::TimeZone;

    fn sqlite_config(path: &std::path::Path) -> DatabaseExportConfig {
        DatabaseExportConfig {
            enabled: true,
            kind: DatabaseType::Sqlite,
            path: Some(path.to_string_lossy().into_owned()),
            connection_string: None,
            retention_days: 30,
        }
    }

    fn meter_reading(value: Option<f64>, at: DateTime<Utc>) -> Observation {
        Observation::Meter(Reading {
            camera_id: "cam-01".to_string(),
            meter_id: "m1".to_string(),
            value,
            raw_text: "123".to_string(),
            unit: "kPa".to_string(),
            confidence: if value.is_some() { 0.97 } else { 0.0 },
            timestamp: at,
        })
    }

    fn indicator_reading(state: bool, at: DateTime<Utc>) -> Observation {
        Observation::Indicator(IndicatorReading {
            camera_id: "cam-01".to_string(),
            indicator_id: "fire-west".to_string(),
            state,
            score: 182.4,
            timestamp: at,
        })
    }

    fn count(client: &DbClient, table: &str) -> i64 {
        match client {
            DbClient::Sqlite(connection) => connection
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .expect("Failed to count rows"),
            DbClient::Postgres(_) => unreachable!("sqlite only in unit tests"),
        }
    }

    #[test]
    fn test_insert_both_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let config = sqlite_config(&dir.path().join("readings.db"));
        let mut client = DbClient::open(&config).expect("Failed to open");
        client.ensure_schema().expect("Failed to create schema");

        let now = Utc::now();
        client.insert(&meter_reading(Some(1.23), now)).unwrap();
        client.insert(&indicator_reading(true, now)).unwrap();
        assert_eq!(count(&client, "readings"), 1);
        assert_eq!(count(&client, "indicator_readings"), 1);
    }

    #[test]
    /// Failed readings are rows too: value is null, confidence zero.
    fn test_failed_reading_stored_with_null_value() {
        let dir = tempfile::tempdir().unwrap();
        let config = sqlite_config(&dir.path().join("readings.db"));
        let mut client = DbClient::open(&config).expect("Failed to open");
        client.ensure_schema().unwrap();
        client.insert(&meter_reading(None, Utc::now())).unwrap();

        match &client {
            DbClient::Sqlite(connection) => {
                let value: Option<f64> = connection
                    .query_row("SELECT value FROM readings", [], |row| row.get(0))
                    .unwrap();
                assert_eq!(value, None);
            }
            DbClient::Postgres(_) => unreachable!(),
        }
    }

    #[test]
    fn test_retention_purges_only_expired_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = sqlite_config(&dir.path().join("readings.db"));
        let mut client = DbClient::open(&config).expect("Failed to open");
        client.ensure_schema().unwrap();

        let old = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let now = Utc::now();
        client.insert(&meter_reading(Some(1.0), old)).unwrap();
        client.insert(&meter_reading(Some(2.0), now)).unwrap();
        client.insert(&indicator_reading(true, old)).unwrap();

        let removed = client
            .purge_older_than(now - ChronoDuration::days(30))
            .expect("Failed to purge");
        assert_eq!(removed, 2);
        assert_eq!(count(&client, "readings"), 1);
        assert_eq!(count(&client, "indicator_readings"), 0);
    }

    #[test]
    /// Schema creation is idempotent, reopening an existing file must
    /// not fail.
    fn test_schema_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = sqlite_config(&dir.path().join("readings.db"));
        for _ in 0..2 {
            let mut client = DbClient::open(&config).expect("Failed to open");
            client.ensure_schema().expect("Failed to ensure schema");
        }
    }

    #[test]
    /// The sink loop drains its queue into the database and exits once
    /// the queue closes.
    fn test_run_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.db");
        let config = sqlite_config(&path);
        let queue = Arc::new(BoundedQueue::new(16));
        for index in 0..5 {
            queue.push(meter_reading(Some(index as f64), Utc::now()));
        }
        queue.close();
        run(config.clone(), queue);

        let client = DbClient::open(&config).unwrap();
        assert_eq!(count(&client, "readings"), 5);
    }
}
