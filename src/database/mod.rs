//! Database Module
//!
//! Composes the three backends behind one handle.
//!
//! ## Responsibilities
//! - Open the metadata, blob and graph backends from one [`Config`]
//! - Run post-open setup: instrumentation, metrics, GC task, consistency check
//! - Hand out [`Txn`]s spanning any subset of backends
//! - Close every backend, reporting all failures

mod consistency;
mod gc;
mod txn;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use prometheus::Registry;

use crate::blob::{BlobStore, COMMIT_TIMESTAMP_KEY};
use crate::config::Config;
use crate::error::{Backend, OpenError, Result, StoreError};
use crate::graph::GraphClient;
use crate::metadata::MetadataStore;
use crate::registry::{PluginContext, PluginRegistry};

pub use consistency::{check_commit_timestamp, CommitMarker};
pub use gc::{collect_garbage, BlobGc, Compactor, GcReport};
pub use txn::Txn;

pub(crate) use consistency::encode_timestamp;

/// The storage layer handle
///
/// Safe to share across threads; opening a [`Txn`] never needs exclusive
/// access. Dropping the handle closes every backend.
pub struct Database {
    config: Config,
    metadata: Box<dyn MetadataStore>,
    blob: Arc<BlobStore>,
    graph: Option<GraphClient>,
    gc: Mutex<Option<BlobGc>>,
    metrics: Registry,
    closed: AtomicBool,
}

impl Database {
    /// Open with the built-in backends
    ///
    /// Backend open failures return `OpenError::Failed` with no handle.
    /// Setup failures after that (including a failed consistency check)
    /// return `OpenError::Init`, which carries the usable database.
    pub fn open(config: Config) -> std::result::Result<Self, OpenError> {
        let registry = PluginRegistry::with_builtin()?;
        Self::open_with_registry(config, &registry)
    }

    /// Open with backends looked up in `registry`
    pub fn open_with_registry(
        config: Config,
        registry: &PluginRegistry,
    ) -> std::result::Result<Self, OpenError> {
        let db = Self::open_backends(config, registry)?;
        match db.init() {
            Ok(()) => Ok(db),
            Err(source) => {
                tracing::warn!(component = "database", error = %source, "database: init failed");
                Err(OpenError::Init {
                    db: Box::new(db),
                    source,
                })
            }
        }
    }

    /// Everything in memory, GC disabled
    pub fn in_memory() -> std::result::Result<Self, OpenError> {
        Self::open(Config::in_memory())
    }

    /// On-disk database in `data_dir`, created if missing
    pub fn persistent(data_dir: impl AsRef<Path>) -> std::result::Result<Self, OpenError> {
        Self::open(Config::persistent(data_dir.as_ref()))
    }

    fn open_backends(config: Config, registry: &PluginRegistry) -> Result<Self> {
        if let Some(dir) = &config.data_dir {
            fs::create_dir_all(dir)?;
        }

        let ctx = PluginContext {
            data_dir: config.data_dir.as_deref(),
            cache_kib: config.metadata_cache_kib,
            busy_timeout_ms: config.metadata_busy_timeout_ms,
        };
        let metadata = registry.new_metadata_store(&config.metadata_plugin, &ctx)?;

        let blob = match BlobStore::open(config.blob_config()) {
            Ok(blob) => Arc::new(blob),
            Err(e) => {
                if let Err(close_err) = metadata.close() {
                    tracing::warn!(error = %close_err, "database: closing metadata after failed open");
                }
                return Err(StoreError::Open {
                    backend: Backend::Blob,
                    reason: e.to_string(),
                });
            }
        };

        let graph = config.graph_addr.as_ref().map(|addr| {
            GraphClient::new(
                addr.clone(),
                Duration::from_millis(config.graph_connect_timeout_ms),
                Duration::from_millis(config.graph_io_timeout_ms),
            )
        });

        let metrics = config.metrics_registry.clone().unwrap_or_else(Registry::new);

        tracing::info!(
            component = "database",
            data_dir = ?config.data_dir,
            metadata = metadata.name(),
            graph = ?config.graph_addr,
            "database: backends opened"
        );

        Ok(Self {
            config,
            metadata,
            blob,
            graph,
            gc: Mutex::new(None),
            metrics,
            closed: AtomicBool::new(false),
        })
    }

    /// Post-open setup; the handle stays usable if this fails
    fn init(&self) -> Result<()> {
        self.metadata.install_instrumentation()?;
        self.blob.metrics().register(&self.metrics)?;

        if self.config.gc_active() && !self.blob.is_in_memory() {
            let compactor: Arc<dyn Compactor> = self.blob.clone();
            *self.gc.lock() = Some(BlobGc::spawn(compactor, self.config.gc)?);
        }

        match self.check_consistency()? {
            CommitMarker::Fresh => {
                tracing::debug!(component = "database", "database: no commits recorded yet")
            }
            CommitMarker::Consistent(ts) => {
                tracing::debug!(component = "database", commit_timestamp = ts, "database: consistent")
            }
        }
        Ok(())
    }

    /// Close every backend, collecting all failures
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mut gc) = self.gc.lock().take() {
            gc.stop();
        }

        let mut errors = Vec::new();
        if let Err(e) = self.blob.close() {
            errors.push(e.in_backend(Backend::Blob, "close"));
        }
        if let Some(graph) = &self.graph {
            if let Err(e) = graph.close() {
                errors.push(e.in_backend(Backend::Graph, "close"));
            }
        }
        if let Err(e) = self.metadata.close() {
            errors.push(e.in_backend(Backend::Metadata, "close"));
        }
        tracing::info!(component = "database", failures = errors.len(), "database: closed");
        StoreError::join(errors)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn metadata(&self) -> &dyn MetadataStore {
        self.metadata.as_ref()
    }

    pub fn blob(&self) -> &BlobStore {
        &self.blob
    }

    /// `None` when no graph store is configured
    pub fn graph(&self) -> Option<&GraphClient> {
        self.graph.as_ref()
    }

    /// Registry holding the blob store metrics
    pub fn metrics_registry(&self) -> &Registry {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.config.data_dir.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn gc_running(&self) -> bool {
        self.gc.lock().as_ref().map(|gc| gc.is_running()).unwrap_or(false)
    }

    /// Start a unit of work
    ///
    /// A read-write transaction holds the metadata write lock until it
    /// finishes, so a second writer waits for it (up to the busy timeout).
    pub fn transaction(&self, read_write: bool) -> Result<Txn<'_>> {
        if self.is_closed() {
            return Err(StoreError::Closed(Backend::Metadata));
        }
        let metadata = self.metadata.begin(read_write)?;
        let blob = self.blob.begin(read_write);
        Ok(Txn::new(self, read_write, metadata, blob))
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Re-run the commit marker check
    pub fn check_consistency(&self) -> Result<CommitMarker> {
        check_commit_timestamp(self.metadata.as_ref(), &self.blob)
    }

    /// Overwrite both commit markers with a fresh timestamp
    ///
    /// Used to continue after an inconsistency has been accepted.
    pub fn repair_commit_timestamp(&self) -> Result<i64> {
        let timestamp = now_millis()?;
        self.transaction(true)?.commit_at(timestamp)?;
        tracing::info!(
            component = "database",
            commit_timestamp = timestamp,
            "database: commit markers rewritten"
        );
        Ok(timestamp)
    }

    /// Run one GC wake-up synchronously
    pub fn collect_garbage(&self) -> Result<GcReport> {
        if self.blob.is_in_memory() {
            return Err(StoreError::Storage(
                "value log GC is not available in memory mode".to_string(),
            ));
        }
        Ok(collect_garbage(&*self.blob, &self.config.gc))
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(component = "database", error = %e, "database: close on drop failed");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.config.data_dir)
            .field("metadata", &self.metadata.name())
            .field("blob_in_memory", &self.blob.is_in_memory())
            .field("graph", &self.graph)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Wall clock in unix milliseconds
pub(crate) fn now_millis() -> Result<i64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .map_err(|e| StoreError::Storage(format!("system clock before unix epoch: {}", e)))
}

/// Blob key/value pair for a commit marker
pub(crate) fn commit_marker(timestamp: i64) -> (&'static [u8], [u8; 8]) {
    (COMMIT_TIMESTAMP_KEY, encode_timestamp(timestamp))
}
