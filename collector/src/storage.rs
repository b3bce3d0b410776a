//! Sample persistence
//!
//! Every sample is written twice: one formatted line to an append-only log
//! and one row to a SQLite store. The two writes happen in that order for
//! each sample and are committed immediately. When only one of them
//! succeeds the drift is reported as a
//! [`StorageError::PartialPersistenceFailure`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::error::{SinkKind, StorageError, StorageResult};
use crate::sample::Sample;

const METRICS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS metrics (
        timestamp TEXT,
        cpu_percent REAL,
        memory_percent REAL,
        net_sent_kb REAL,
        net_recv_kb REAL
    )
";

/// Durable form of a sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub timestamp: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub net_sent_kb: f64,
    pub net_recv_kb: f64,
}

impl From<&Sample> for PersistedRecord {
    fn from(sample: &Sample) -> Self {
        Self {
            timestamp: sample.formatted_timestamp(),
            cpu_percent: sample.cpu_percent,
            memory_percent: sample.memory_percent,
            net_sent_kb: sample.net_sent_kbps,
            net_recv_kb: sample.net_recv_kbps,
        }
    }
}

impl PersistedRecord {
    /// Line written to the sample log, newline included
    pub fn log_line(&self) -> String {
        format!(
            "{}, CPU: {:.2}%, Memory: {:.2}%, Net Sent: {:.2} KB, Net Recv: {:.2} KB\n",
            self.timestamp,
            self.cpu_percent,
            self.memory_percent,
            self.net_sent_kb,
            self.net_recv_kb
        )
    }
}

/// One durable destination for persisted records
pub trait SampleSink: Send {
    fn write(&mut self, record: &PersistedRecord) -> StorageResult<()>;
}

/// Append-only text log
pub struct LogFile {
    path: PathBuf,
    file: File,
}

impl LogFile {
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_parent(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| init_failed(&path, e))?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleSink for LogFile {
    fn write(&mut self, record: &PersistedRecord) -> StorageResult<()> {
        self.file
            .write_all(record.log_line().as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|e| StorageError::LogWrite { reason: e.to_string() })
    }
}

/// SQLite table of samples
pub struct SqliteStore {
    path: PathBuf,
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_parent(&path)?;

        let conn = Connection::open(&path).map_err(|e| init_failed(&path, e))?;
        conn.execute_batch(METRICS_SCHEMA).map_err(|e| init_failed(&path, e))?;

        Ok(Self { path, conn })
    }

    /// In-memory store with the same schema
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| init_failed(Path::new(":memory:"), e))?;
        conn.execute_batch(METRICS_SCHEMA)
            .map_err(|e| init_failed(Path::new(":memory:"), e))?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn row_count(&self) -> StorageResult<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM metrics", [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| StorageError::StoreWrite { reason: e.to_string() })
    }
}

impl SampleSink for SqliteStore {
    fn write(&mut self, record: &PersistedRecord) -> StorageResult<()> {
        self.conn
            .execute(
                "INSERT INTO metrics
                 (timestamp, cpu_percent, memory_percent, net_sent_kb, net_recv_kb)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.timestamp,
                    record.cpu_percent,
                    record.memory_percent,
                    record.net_sent_kb,
                    record.net_recv_kb,
                ],
            )
            .map(|_| ())
            .map_err(|e| StorageError::StoreWrite { reason: e.to_string() })
    }
}

/// Writes each sample to the log, then the store
pub struct PersistenceSink {
    log: Box<dyn SampleSink>,
    store: Box<dyn SampleSink>,
    appended: u64,
}

impl PersistenceSink {
    pub fn new(log: Box<dyn SampleSink>, store: Box<dyn SampleSink>) -> Self {
        Self { log, store, appended: 0 }
    }

    /// Open the file log and SQLite store named in the configuration
    ///
    /// With `reset_on_start` both files are removed first. Any failure here
    /// is a [`StorageError::InitFailed`] and must abort the run.
    pub fn open(config: &StorageConfig) -> StorageResult<Self> {
        if config.reset_on_start {
            reset_file(&config.log_path)?;
            reset_file(&config.db_path)?;
        }

        let log = LogFile::open(&config.log_path)?;
        let store = SqliteStore::open(&config.db_path)?;

        tracing::info!(
            "Persistence ready - log: {}, store: {}",
            log.path().display(),
            store.path().display()
        );

        Ok(Self::new(Box::new(log), Box::new(store)))
    }

    /// Persist one sample to both sinks
    pub fn append(&mut self, sample: &Sample) -> StorageResult<PersistedRecord> {
        let record = PersistedRecord::from(sample);

        let log_result = self.log.write(&record);
        let store_result = self.store.write(&record);

        match (log_result, store_result) {
            (Ok(()), Ok(())) => {
                self.appended += 1;
                Ok(record)
            }
            (Ok(()), Err(e)) => Err(StorageError::PartialPersistenceFailure {
                failed: SinkKind::Store,
                reason: e.to_string(),
            }),
            (Err(e), Ok(())) => Err(StorageError::PartialPersistenceFailure {
                failed: SinkKind::Log,
                reason: e.to_string(),
            }),
            (Err(log_err), Err(store_err)) => Err(StorageError::PersistenceFailed {
                log_reason: log_err.to_string(),
                store_reason: store_err.to_string(),
            }),
        }
    }

    /// Samples written to both sinks so far
    pub fn appended(&self) -> u64 {
        self.appended
    }
}

fn reset_file(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("Removed previous run data: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(init_failed(path, e)),
    }
}

fn ensure_parent(path: &Path) -> StorageResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| init_failed(parent, e))
        }
        _ => Ok(()),
    }
}

fn init_failed(path: &Path, err: impl ToString) -> StorageError {
    StorageError::InitFailed {
        path: path.to_string_lossy().to_string(),
        reason: err.to_string(),
    }
}
