//! Configuration for chainstore
//!
//! Centralized configuration with sensible defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default address of the external graph store
pub const DEFAULT_GRAPH_ADDR: &str = "127.0.0.1:9080";

/// Name of the bundled metadata backend
pub const DEFAULT_METADATA_PLUGIN: &str = "sqlite";

/// Main configuration for a chainstore database
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files. `None` selects the in-memory
    /// configuration.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── metadata.sqlite   (relational metadata)
    ///     └── blob/             (log-structured blob store)
    ///         ├── wal.log
    ///         └── vlog/
    pub data_dir: Option<PathBuf>,

    // -------------------------------------------------------------------------
    // Metadata Configuration
    // -------------------------------------------------------------------------
    /// Registered metadata backend to open
    pub metadata_plugin: String,

    /// SQLite page cache size in KiB
    pub metadata_cache_kib: u32,

    /// How long a writer waits on a locked SQLite database (milliseconds)
    pub metadata_busy_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Blob Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the blob WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Max size of the blob memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    /// Periodic value log garbage collection
    pub gc: GcSettings,

    /// Force GC on or off; `None` enables it for persistent stores only
    pub gc_enabled: Option<bool>,

    // -------------------------------------------------------------------------
    // Graph Configuration
    // -------------------------------------------------------------------------
    /// Address of the graph store process; `None` disables the graph backend
    pub graph_addr: Option<String>,

    /// Connect timeout for the graph store (milliseconds)
    pub graph_connect_timeout_ms: u64,

    /// Read/write timeout for graph store requests (milliseconds)
    pub graph_io_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Observability
    // -------------------------------------------------------------------------
    /// Registry that receives the blob metrics; a private one is created when unset
    pub metrics_registry: Option<prometheus::Registry>,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Blob value log GC schedule
#[derive(Debug, Clone, Copy)]
pub struct GcSettings {
    /// Time between wake-ups
    pub interval: Duration,

    /// Minimum share of stale bytes for a segment to be rewritten
    pub discard_ratio: f64,

    /// Upper bound on compaction passes within one wake-up
    pub max_passes: usize,
}

impl Default for GcSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            discard_ratio: 0.5,
            max_passes: 64,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            metadata_plugin: DEFAULT_METADATA_PLUGIN.to_string(),
            metadata_cache_kib: 50_000, // ~50 MB, up from SQLite's 2 MB
            metadata_busy_timeout_ms: 5000,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            memtable_size_limit: 64 * 1024 * 1024, // 64 MB
            gc: GcSettings::default(),
            gc_enabled: None,
            graph_addr: None,
            graph_connect_timeout_ms: 2000,
            graph_io_timeout_ms: 5000,
            metrics_registry: None,
        }
    }
}

impl Config {
    /// Everything in memory; nothing survives the process
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// On-disk configuration rooted at `data_dir`, graph store on its default address
    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            graph_addr: Some(DEFAULT_GRAPH_ADDR.to_string()),
            ..Self::default()
        }
    }

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn is_persistent(&self) -> bool {
        self.data_dir.is_some()
    }

    /// Whether the background GC task should run
    pub fn gc_active(&self) -> bool {
        self.gc_enabled.unwrap_or(self.is_persistent()) && self.is_persistent()
    }

    /// Location of the SQLite file, if persistent
    pub fn metadata_path(&self) -> Option<PathBuf> {
        self.data_dir.as_deref().map(|d| d.join("metadata.sqlite"))
    }

    /// Root of the blob store, if persistent
    pub fn blob_dir(&self) -> Option<PathBuf> {
        self.data_dir.as_deref().map(|d| d.join("blob"))
    }

    /// Blob engine settings derived from this config
    pub fn blob_config(&self) -> BlobConfig {
        BlobConfig {
            dir: self.blob_dir(),
            wal_sync_strategy: self.wal_sync_strategy,
            memtable_size_limit: self.memtable_size_limit,
        }
    }
}

/// Settings for opening a [`crate::blob::BlobStore`] on its own
#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// Root directory; `None` keeps everything in memory
    pub dir: Option<PathBuf>,

    pub wal_sync_strategy: WalSyncStrategy,

    pub memtable_size_limit: usize,
}

impl BlobConfig {
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            memtable_size_limit: 64 * 1024 * 1024,
        }
    }

    pub fn persistent(dir: &Path) -> Self {
        Self {
            dir: Some(dir.to_path_buf()),
            ..Self::in_memory()
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (switches to the persistent configuration)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = Some(path.into());
        self
    }

    /// Select the metadata backend by registered name
    pub fn metadata_plugin(mut self, name: impl Into<String>) -> Self {
        self.config.metadata_plugin = name.into();
        self
    }

    /// Set the SQLite page cache size (in KiB)
    pub fn metadata_cache_kib(mut self, kib: u32) -> Self {
        self.config.metadata_cache_kib = kib;
        self
    }

    /// Set the SQLite busy timeout (in milliseconds)
    pub fn metadata_busy_timeout_ms(mut self, ms: u64) -> Self {
        self.config.metadata_busy_timeout_ms = ms;
        self
    }

    /// Set the blob WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the blob memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the GC schedule
    pub fn gc(mut self, settings: GcSettings) -> Self {
        self.config.gc = settings;
        self
    }

    /// Force the background GC task on or off
    pub fn gc_enabled(mut self, enabled: bool) -> Self {
        self.config.gc_enabled = Some(enabled);
        self
    }

    /// Set the graph store address
    pub fn graph_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.graph_addr = Some(addr.into());
        self
    }

    /// Disable the graph backend
    pub fn without_graph(mut self) -> Self {
        self.config.graph_addr = None;
        self
    }

    /// Set the graph connect timeout (in milliseconds)
    pub fn graph_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.graph_connect_timeout_ms = ms;
        self
    }

    /// Set the graph request timeout (in milliseconds)
    pub fn graph_io_timeout_ms(mut self, ms: u64) -> Self {
        self.config.graph_io_timeout_ms = ms;
        self
    }

    /// Register blob metrics into this registry
    pub fn metrics_registry(mut self, registry: prometheus::Registry) -> Self {
        self.config.metrics_registry = Some(registry);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
