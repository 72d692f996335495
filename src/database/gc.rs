//! Blob garbage collection task
//!
//! One background thread per persistent database. Every tick it runs value
//! log GC passes until a pass finds nothing to reclaim, bounded by
//! `GcSettings::max_passes`. Errors are logged and the thread waits for the
//! next tick.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{bounded, tick, Receiver, Sender};
use crossbeam::select;

use crate::blob::{BlobStore, GcOutcome};
use crate::config::GcSettings;
use crate::error::Result;

/// Something whose value log can be compacted one pass at a time
pub trait Compactor: Send + Sync {
    fn run_value_log_gc(&self, discard_ratio: f64) -> Result<GcOutcome>;
}

impl Compactor for BlobStore {
    fn run_value_log_gc(&self, discard_ratio: f64) -> Result<GcOutcome> {
        BlobStore::run_value_log_gc(self, discard_ratio)
    }
}

/// What one wake-up of the collector did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Passes attempted, failed ones included
    pub attempts: usize,
    pub rewrites: usize,
    pub reclaimed_bytes: u64,
    pub failed: bool,
}

/// Run passes until one reports nothing to reclaim, an error occurs, or
/// `max_passes` is reached
pub fn collect_garbage(compactor: &dyn Compactor, settings: &GcSettings) -> GcReport {
    let mut report = GcReport::default();
    while report.attempts < settings.max_passes.max(1) {
        report.attempts += 1;
        match compactor.run_value_log_gc(settings.discard_ratio) {
            Ok(GcOutcome::Rewrote {
                segment_id,
                reclaimed_bytes,
            }) => {
                report.rewrites += 1;
                report.reclaimed_bytes += reclaimed_bytes;
                tracing::debug!(
                    component = "database",
                    segment = segment_id,
                    reclaimed_bytes,
                    "blob gc: segment reclaimed"
                );
            }
            Ok(GcOutcome::NothingToReclaim) => break,
            Err(e) => {
                tracing::warn!(component = "database", error = %e, "blob gc: failure");
                report.failed = true;
                break;
            }
        }
    }
    report
}

/// Handle to the background GC thread
///
/// Dropping the handle stops the thread.
pub struct BlobGc {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BlobGc {
    /// Start the collector on a fixed `settings.interval` ticker
    pub fn spawn(compactor: Arc<dyn Compactor>, settings: GcSettings) -> Result<Self> {
        let ticker = tick(settings.interval);
        Self::spawn_with_ticker(compactor, ticker, settings)
    }

    /// Start the collector driven by an arbitrary tick source
    ///
    /// The thread also exits when the tick source disconnects.
    pub fn spawn_with_ticker(
        compactor: Arc<dyn Compactor>,
        ticker: Receiver<Instant>,
        settings: GcSettings,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("blob-gc".to_string())
            .spawn(move || run(compactor, ticker, shutdown_rx, settings))?;
        tracing::debug!(
            component = "database",
            interval_secs = settings.interval.as_secs(),
            "blob gc: started"
        );
        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        // Disconnecting the channel wakes the select below
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(component = "database", "blob gc: thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for BlobGc {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    compactor: Arc<dyn Compactor>,
    ticker: Receiver<Instant>,
    shutdown: Receiver<()>,
    settings: GcSettings,
) {
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> msg => {
                if msg.is_err() {
                    break;
                }
                let report = collect_garbage(compactor.as_ref(), &settings);
                if report.rewrites > 0 {
                    tracing::info!(
                        component = "database",
                        rewrites = report.rewrites,
                        reclaimed_bytes = report.reclaimed_bytes,
                        "blob gc: pass complete"
                    );
                }
            }
        }
    }
    tracing::debug!(component = "database", "blob gc: stopped");
}
