//! Connection pool and native transactions
//!
//! Every transaction owns one connection for its lifetime, so concurrent
//! transactions get SQLite's own isolation. Idle connections are reused.
//!
//! In-memory databases use a process-unique `memdb` URI so that every
//! pooled connection sees the same database; an anchor connection keeps it
//! alive while the pool is open.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};

use crate::error::{Backend, Result, StoreError};

use super::sql_error;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Idle connections kept around for reuse
const MAX_IDLE: usize = 8;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    Memory(String),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolSettings {
    pub cache_kib: u32,
    pub busy_timeout: Duration,
}

struct PoolInner {
    target: Target,
    settings: PoolSettings,
    idle: Mutex<Vec<Connection>>,
    /// Pins the in-memory database
    anchor: Mutex<Option<Connection>>,
    traced: AtomicBool,
    closed: AtomicBool,
}

#[derive(Clone)]
pub(crate) struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Pool over the database file at `path`, created if missing
    pub fn open_file(path: PathBuf, settings: PoolSettings) -> Result<Self> {
        let pool = Self::new(Target::File(path), settings);
        let conn = pool.connect()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| sql_error(e, "open"))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| sql_error(e, "create schema"))?;
        pool.inner.idle.lock().push(conn);
        Ok(pool)
    }

    /// Pool over a fresh in-memory database private to this pool
    pub fn open_memory(settings: PoolSettings) -> Result<Self> {
        let uri = format!(
            "file:/chainstore-{}-{}?vfs=memdb",
            std::process::id(),
            MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let pool = Self::new(Target::Memory(uri), settings);
        let anchor = pool.connect()?;
        anchor
            .execute_batch(SCHEMA_SQL)
            .map_err(|e| sql_error(e, "create schema"))?;
        *pool.inner.anchor.lock() = Some(anchor);
        Ok(pool)
    }

    fn new(target: Target, settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                target,
                settings,
                idle: Mutex::new(Vec::new()),
                anchor: Mutex::new(None),
                traced: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn connect(&self) -> Result<Connection> {
        let settings = self.inner.settings;
        let conn = match &self.inner.target {
            Target::File(path) => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            ),
            Target::Memory(uri) => Connection::open_with_flags(
                uri,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            ),
        }
        .map_err(|e| StoreError::Open {
            backend: Backend::Metadata,
            reason: e.to_string(),
        })?;

        conn.busy_timeout(settings.busy_timeout)
            .map_err(|e| sql_error(e, "configure"))?;
        if let Target::File(_) = self.inner.target {
            conn.pragma_update(None, "synchronous", "OFF")
                .map_err(|e| sql_error(e, "configure"))?;
        }
        conn.pragma_update(None, "cache_size", -(settings.cache_kib as i64))
            .map_err(|e| sql_error(e, "configure"))?;
        Ok(conn)
    }

    /// Check out a connection
    pub fn get(&self) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(StoreError::Closed(Backend::Metadata));
        }
        let idle = self.inner.idle.lock().pop();
        let mut conn = match idle {
            Some(conn) => conn,
            None => self.connect()?,
        };
        if self.inner.traced.load(Ordering::SeqCst) {
            conn.trace(Some(trace_statement));
        }
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            broken: false,
        })
    }

    /// Route every statement through `tracing` at TRACE level
    pub fn install_tracing(&self) {
        self.inner.traced.store(true, Ordering::SeqCst);
        for conn in self.inner.idle.lock().iter_mut() {
            conn.trace(Some(trace_statement));
        }
    }

    /// Drop idle connections and release the in-memory database.
    ///
    /// Connections still held by open transactions close when those end.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.idle.lock().clear();
        self.inner.anchor.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.inner.target, Target::Memory(_))
    }
}

fn trace_statement(sql: &str) {
    tracing::trace!(target: "chainstore::metadata::sql", sql, "sqlite: statement");
}

/// A connection on loan from the pool
pub(crate) struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    broken: bool,
}

impl PooledConnection {
    /// Close instead of returning to the pool
    fn discard(&mut self) {
        self.broken = true;
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        if self.broken || self.pool.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut idle = self.pool.idle.lock();
        if idle.len() < MAX_IDLE {
            idle.push(conn);
        }
    }
}

/// Native SQLite transaction holding its own connection
///
/// Writers start with `BEGIN IMMEDIATE` (`BEGIN EXCLUSIVE` in memory) and
/// hold the database write lock until they finish, so their COMMIT cannot
/// lose a lock race. Readers run in `query_only` mode. Dropping an
/// unfinished transaction rolls it back.
pub struct SqliteTxn {
    conn: PooledConnection,
    read_write: bool,
    finished: bool,
}

impl SqliteTxn {
    pub(crate) fn begin(pool: &ConnectionPool, read_write: bool) -> Result<Self> {
        let mut conn = pool.get()?;
        // Without WAL a reader's SHARED lock makes COMMIT fail, so memdb
        // writers take the exclusive lock up front
        let sql = match (read_write, pool.is_memory()) {
            (true, true) => "BEGIN EXCLUSIVE",
            (true, false) => "BEGIN IMMEDIATE",
            (false, _) => "PRAGMA query_only = ON; BEGIN",
        };
        if let Err(e) = conn.execute_batch(sql) {
            conn.discard();
            return Err(sql_error(e, "begin"));
        }
        Ok(Self {
            conn,
            read_write,
            finished: false,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn is_read_write(&self) -> bool {
        self.read_write
    }

    pub fn commit(mut self) -> Result<()> {
        self.finish("COMMIT", "commit")
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finish("ROLLBACK", "rollback")
    }

    fn finish(&mut self, sql: &str, operation: &'static str) -> Result<()> {
        self.finished = true;
        let mut result = self.conn.execute_batch(sql);
        if result.is_err() && !self.conn.is_autocommit() {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
        if !self.read_write {
            if let Err(e) = self.conn.execute_batch("PRAGMA query_only = OFF") {
                result = result.and(Err(e));
            }
        }
        if result.is_err() || !self.conn.is_autocommit() {
            self.conn.discard();
        }
        result.map_err(|e| sql_error(e, operation))
    }
}

impl Drop for SqliteTxn {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.finish("ROLLBACK", "rollback") {
                tracing::warn!(error = %e, "sqlite: rollback on drop failed");
            }
        }
    }
}
