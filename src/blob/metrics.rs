//! Prometheus instrumentation for the blob store

use prometheus::core::Collector;
use prometheus::{IntCounter, IntGauge, Opts, Registry};

use crate::error::Result;

/// Counters and gauges describing one blob store
///
/// Created unregistered with the store; the database registers them into
/// its registry during init.
#[derive(Clone)]
pub struct BlobMetrics {
    pub reads: IntCounter,
    pub writes: IntCounter,
    pub bytes_written: IntCounter,
    pub flushes: IntCounter,
    pub gc_runs: IntCounter,
    pub gc_reclaimed_bytes: IntCounter,
    pub memtable_bytes: IntGauge,
    pub segments: IntGauge,
    pub vlog_bytes: IntGauge,
}

impl BlobMetrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            reads: IntCounter::with_opts(Opts::new(
                "chainstore_blob_reads_total",
                "Blob store key lookups",
            ))?,
            writes: IntCounter::with_opts(Opts::new(
                "chainstore_blob_writes_total",
                "Blob store put and delete operations",
            ))?,
            bytes_written: IntCounter::with_opts(Opts::new(
                "chainstore_blob_written_bytes_total",
                "Key and value bytes written to the blob store",
            ))?,
            flushes: IntCounter::with_opts(Opts::new(
                "chainstore_blob_flushes_total",
                "Memtable flushes to the value log",
            ))?,
            gc_runs: IntCounter::with_opts(Opts::new(
                "chainstore_blob_gc_runs_total",
                "Value log GC passes",
            ))?,
            gc_reclaimed_bytes: IntCounter::with_opts(Opts::new(
                "chainstore_blob_gc_reclaimed_bytes_total",
                "Bytes reclaimed by value log GC",
            ))?,
            memtable_bytes: IntGauge::with_opts(Opts::new(
                "chainstore_blob_memtable_bytes",
                "Approximate memtable size",
            ))?,
            segments: IntGauge::with_opts(Opts::new(
                "chainstore_blob_segments",
                "Value log segments on disk",
            ))?,
            vlog_bytes: IntGauge::with_opts(Opts::new(
                "chainstore_blob_vlog_bytes",
                "Value log size on disk",
            ))?,
        })
    }

    fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.reads.clone()),
            Box::new(self.writes.clone()),
            Box::new(self.bytes_written.clone()),
            Box::new(self.flushes.clone()),
            Box::new(self.gc_runs.clone()),
            Box::new(self.gc_reclaimed_bytes.clone()),
            Box::new(self.memtable_bytes.clone()),
            Box::new(self.segments.clone()),
            Box::new(self.vlog_bytes.clone()),
        ]
    }

    /// Register every metric into `registry`
    ///
    /// All or nothing: on a conflict the metrics registered so far are
    /// removed again, so the call can be retried.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        for (i, collector) in self.collectors().into_iter().enumerate() {
            if let Err(e) = registry.register(collector) {
                for done in self.collectors().into_iter().take(i) {
                    let _ = registry.unregister(done);
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Remove every metric from `registry`
    pub fn unregister(&self, registry: &Registry) -> Result<()> {
        for collector in self.collectors() {
            registry.unregister(collector)?;
        }
        Ok(())
    }
}
