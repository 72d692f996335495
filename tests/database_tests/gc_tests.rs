//! Blob GC task tests
//!
//! Tests verify:
//! - One wake-up runs passes until nothing is left, bounded by max_passes
//! - Errors end the wake-up and are reported, not propagated
//! - The background thread makes one attempt per tick
//! - Stop is prompt and idempotent; a dropped ticker ends the thread

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chainstore::blob::GcOutcome;
use chainstore::config::GcSettings;
use chainstore::database::{collect_garbage, BlobGc, Compactor};
use chainstore::StoreError;
use crossbeam::channel::unbounded;

// =============================================================================
// Mock Compactor
// =============================================================================

/// Reports `rewrites_left` rewrites, then nothing to reclaim (or an error)
struct MockCompactor {
    calls: AtomicUsize,
    rewrites_left: AtomicUsize,
    fail: bool,
}

impl MockCompactor {
    fn idle() -> Self {
        Self::with_rewrites(0)
    }

    fn with_rewrites(n: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            rewrites_left: AtomicUsize::new(n),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::idle()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Compactor for MockCompactor {
    fn run_value_log_gc(&self, discard_ratio: f64) -> chainstore::Result<GcOutcome> {
        assert!(discard_ratio > 0.0 && discard_ratio <= 1.0);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StoreError::Storage("disk on fire".to_string()));
        }
        let left = self.rewrites_left.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(GcOutcome::NothingToReclaim);
        }
        self.rewrites_left.store(left - 1, Ordering::SeqCst);
        Ok(GcOutcome::Rewrote {
            segment_id: left as u64,
            reclaimed_bytes: 100,
        })
    }
}

/// Stopping races queued ticks, so let the thread drain them first
fn wait_for_calls(compactor: &MockCompactor, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while compactor.calls() < expected && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn settings() -> GcSettings {
    GcSettings {
        interval: Duration::from_secs(3600),
        ..GcSettings::default()
    }
}

// =============================================================================
// Single Wake-up Tests
// =============================================================================

#[test]
fn test_wakeup_stops_when_nothing_to_reclaim() {
    let compactor = MockCompactor::with_rewrites(3);

    let report = collect_garbage(&compactor, &settings());

    assert_eq!(report.attempts, 4);
    assert_eq!(report.rewrites, 3);
    assert_eq!(report.reclaimed_bytes, 300);
    assert!(!report.failed);
}

#[test]
fn test_wakeup_bounded_by_max_passes() {
    let compactor = MockCompactor::with_rewrites(100);
    let settings = GcSettings {
        max_passes: 5,
        ..settings()
    };

    let report = collect_garbage(&compactor, &settings);

    assert_eq!(report.attempts, 5);
    assert_eq!(compactor.calls(), 5);
}

#[test]
fn test_wakeup_error_is_reported() {
    let compactor = MockCompactor::failing();

    let report = collect_garbage(&compactor, &settings());

    assert_eq!(report.attempts, 1);
    assert!(report.failed);
    assert_eq!(report.rewrites, 0);
}

// =============================================================================
// Background Thread Tests
// =============================================================================

#[test]
fn test_one_attempt_per_tick() {
    let compactor = Arc::new(MockCompactor::idle());
    let (tick_tx, tick_rx) = unbounded::<Instant>();

    let mut gc = BlobGc::spawn_with_ticker(compactor.clone(), tick_rx, settings()).unwrap();
    for _ in 0..3 {
        tick_tx.send(Instant::now()).unwrap();
    }
    drop(tick_tx);
    wait_for_calls(&compactor, 3);
    gc.stop();

    assert_eq!(compactor.calls(), 3);
    assert!(!gc.is_running());
}

#[test]
fn test_errors_do_not_stop_the_thread() {
    let compactor = Arc::new(MockCompactor::failing());
    let (tick_tx, tick_rx) = unbounded::<Instant>();

    let mut gc = BlobGc::spawn_with_ticker(compactor.clone(), tick_rx, settings()).unwrap();
    tick_tx.send(Instant::now()).unwrap();
    tick_tx.send(Instant::now()).unwrap();
    drop(tick_tx);
    wait_for_calls(&compactor, 2);
    gc.stop();

    assert_eq!(compactor.calls(), 2);
}

#[test]
fn test_stop_is_prompt_without_ticks() {
    let compactor = Arc::new(MockCompactor::idle());
    let mut gc = BlobGc::spawn(compactor.clone(), settings()).unwrap();
    assert!(gc.is_running());

    let started = Instant::now();
    gc.stop();
    gc.stop();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(compactor.calls(), 0);
    assert!(!gc.is_running());
}

#[test]
fn test_drop_stops_thread() {
    let compactor = Arc::new(MockCompactor::idle());
    let (_tick_tx, tick_rx) = unbounded::<Instant>();
    {
        let _gc = BlobGc::spawn_with_ticker(compactor.clone(), tick_rx, settings()).unwrap();
    }
    // The thread held the only other reference
    assert_eq!(Arc::strong_count(&compactor), 1);
}

#[test]
fn test_fast_ticker_drives_real_interval() {
    let compactor = Arc::new(MockCompactor::idle());
    let settings = GcSettings {
        interval: Duration::from_millis(10),
        ..GcSettings::default()
    };

    let mut gc = BlobGc::spawn(compactor.clone(), settings).unwrap();
    wait_for_calls(&compactor, 2);
    gc.stop();

    assert!(compactor.calls() >= 2);
}
