use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use rusqlite::{Connection, ErrorCode, InterruptHandle};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use parley_types::ChatError;

use crate::migrations;

/// Sizing and time bounds for one shard's pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: usize,
    /// How long a caller may wait for a free connection.
    pub acquire_timeout: Duration,
    /// How long a statement batch may run before it is interrupted.
    pub query_timeout: Duration,
    /// SQLite busy handler timeout for write lock contention.
    pub busy_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout: Duration::from_secs(4),
            query_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Fixed-size pool of SQLite connections to one shard file.
///
/// Blocking work runs on tokio's blocking pool. A permit is held for the whole
/// time a connection is checked out, so at most `max_connections` statements
/// run against the shard at once. Connections close when the pool is closed
/// or dropped.
#[derive(Clone)]
pub struct ShardPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    index: usize,
    path: PathBuf,
    settings: PoolSettings,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl ShardPool {
    /// Open every connection up front and bootstrap the schema.
    pub fn open(index: usize, path: &Path, settings: PoolSettings) -> Result<Self> {
        let size = settings.max_connections.max(1);

        let first = open_connection(path, &settings)?;
        // WAL persists in the file, so one connection is enough to switch it
        first.pragma_update(None, "journal_mode", "WAL")?;
        migrations::run(&first)?;

        let mut conns = Vec::with_capacity(size);
        conns.push(first);
        for _ in 1..size {
            conns.push(open_connection(path, &settings)?);
        }

        info!(
            "Shard {} opened at {} ({} connections)",
            index,
            path.display(),
            size
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                index,
                path: path.to_path_buf(),
                settings: PoolSettings {
                    max_connections: size,
                    ..settings
                },
                idle: Mutex::new(conns),
                permits: Arc::new(Semaphore::new(size)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn index(&self) -> usize {
        self.inner.index
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Run `f` against a pooled connection.
    ///
    /// Waiting for a connection is bounded by `acquire_timeout` and execution
    /// by `query_timeout`. If the deadline passes or the returned future is
    /// dropped, the running statement is interrupted and the connection goes
    /// back to the pool once the blocking task unwinds.
    pub async fn run<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Connection) -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.acquire().await?;
        let conn = self.inner.checkout()?;

        let in_flight = Arc::new(InFlight {
            handle: conn.get_interrupt_handle(),
            running: Mutex::new(true),
        });
        let _guard = InterruptOnDrop(in_flight.clone());

        let inner = self.inner.clone();
        let task = tokio::task::spawn_blocking(move || {
            let result = f(&conn);
            *lock(&in_flight.running) = false;
            inner.checkin(conn);
            drop(permit);
            result
        });

        match tokio::time::timeout(self.inner.settings.query_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ChatError::transient(format!(
                "shard {} worker failed: {}",
                self.inner.index, e
            ))),
            Err(_) => {
                warn!(
                    "Shard {} query exceeded {:?}, interrupting",
                    self.inner.index, self.inner.settings.query_timeout
                );
                Err(ChatError::transient(format!(
                    "shard {} query timed out",
                    self.inner.index
                )))
            }
        }
    }

    /// Round-trip a trivial statement.
    pub async fn ping(&self) -> Result<(), ChatError> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    /// Refuse new work and close idle connections. Connections still checked
    /// out are closed when their task hands them back.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();

        let conns: Vec<Connection> = lock(&self.inner.idle).drain(..).collect();
        let count = conns.len();
        for conn in conns {
            if let Err((_, e)) = conn.close() {
                warn!("Shard {} failed to close connection: {}", self.inner.index, e);
            }
        }
        info!("Shard {} pool closed ({} idle connections)", self.inner.index, count);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, ChatError> {
        let index = self.inner.index;
        tokio::time::timeout(
            self.inner.settings.acquire_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| ChatError::transient(format!("shard {} pool exhausted", index)))?
        .map_err(|_| ChatError::transient(format!("shard {} pool closed", index)))
    }
}

impl PoolInner {
    fn checkout(&self) -> Result<Connection, ChatError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::transient(format!("shard {} pool closed", self.index)));
        }
        if let Some(conn) = lock(&self.idle).pop() {
            return Ok(conn);
        }

        // A worker panicked with a connection checked out
        debug!("Shard {} replacing lost connection", self.index);
        open_connection(&self.path, &self.settings).map_err(|e| {
            ChatError::transient(format!("shard {} reconnect failed: {}", self.index, e))
        })
    }

    fn checkin(&self, conn: Connection) {
        if self.closed.load(Ordering::SeqCst) {
            drop(conn);
            return;
        }
        lock(&self.idle).push(conn);
    }
}

struct InFlight {
    handle: InterruptHandle,
    running: Mutex<bool>,
}

/// Interrupts the statement if the caller goes away while it is running.
/// The flag is checked under its lock so a connection already handed back
/// to the pool is never interrupted on behalf of a stale caller.
struct InterruptOnDrop(Arc<InFlight>);

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        let running = lock(&self.0.running);
        if *running {
            self.0.handle.interrupt();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn open_connection(path: &Path, settings: &PoolSettings) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(settings.busy_timeout)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Map a SQLite failure onto the storage error taxonomy.
/// Callers translate "no rows" into `NotFound` themselves.
pub fn db_err(err: rusqlite::Error) -> ChatError {
    match err.sqlite_error_code() {
        Some(ErrorCode::OperationInterrupted) => ChatError::transient("query interrupted"),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            ChatError::transient(format!("shard busy: {}", err))
        }
        _ => ChatError::transient(format!("database error: {}", err)),
    }
}

/// True when `err` is a UNIQUE constraint violation.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}
