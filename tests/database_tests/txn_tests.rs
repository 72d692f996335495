//! Cross-backend transaction tests
//!
//! Tests verify:
//! - `run` commits on success and rolls back every backend on error
//! - Explicit commit, rollback, and drop-without-commit
//! - Read-only transactions reject writes on every backend
//! - Reads see the transaction's own writes
//! - Graph transactions start lazily and commit with the rest
//! - A refused graph commit leaves the blob and metadata stores untouched

use std::io::BufReader;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

use chainstore::error::Backend;
use chainstore::graph::protocol::{read_request, write_response, Request, Response};
use chainstore::metadata::{Epoch, PParams, Utxo, UtxoRef};
use chainstore::{Config, Database, StoreError};

// =============================================================================
// Helper Functions
// =============================================================================

fn epoch(epoch_id: u64, era_id: u32) -> Epoch {
    Epoch {
        epoch_id,
        era_id,
        start_slot: epoch_id * 21_600,
        slot_length: 20_000,
        length_in_slots: 21_600,
        nonce: vec![0x0E; 32],
    }
}

fn utxo(tx: u8, idx: u32) -> Utxo {
    Utxo {
        tx_id: vec![tx; 32],
        output_idx: idx,
        address: b"addr_test1".to_vec(),
        amount: 5_000_000,
        cbor: vec![0x82, 0x00],
        added_slot: 12,
    }
}

/// Graph server that records requests and answers them with `respond`
fn spawn_graph_server_with(respond: fn(&Request) -> Response) -> (String, Arc<Mutex<Vec<Request>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let log = Arc::new(Mutex::new(Vec::new()));
    let server_log = Arc::clone(&log);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let log = Arc::clone(&server_log);
            thread::spawn(move || {
                let mut writer = stream.try_clone().unwrap();
                let mut reader = BufReader::new(stream);
                while let Ok(request) = read_request(&mut reader) {
                    let response = respond(&request);
                    log.lock().unwrap().push(request);
                    if write_response(&mut writer, &response).is_err() {
                        break;
                    }
                }
            });
        }
    });
    (addr, log)
}

fn spawn_graph_server() -> (String, Arc<Mutex<Vec<Request>>>) {
    spawn_graph_server_with(|_| Response::ok(Vec::<u8>::new()))
}

// =============================================================================
// Run Tests
// =============================================================================

#[test]
fn test_run_commits_on_ok() {
    let db = Database::in_memory().unwrap();

    let value = db
        .transaction(true)
        .unwrap()
        .run(|txn| {
            txn.set_epoch(&epoch(1, 1))?;
            txn.blob().put(b"block/1", b"body")?;
            Ok(42)
        })
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(db.metadata().get_epoch_latest(None).unwrap().epoch_id, 1);
    assert_eq!(db.blob().get(b"block/1").unwrap(), Some(b"body".to_vec()));
}

#[test]
fn test_run_rolls_back_every_backend_on_err() {
    let db = Database::in_memory().unwrap();

    let result: chainstore::Result<()> = db.transaction(true).unwrap().run(|txn| {
        txn.set_epoch(&epoch(1, 1))?;
        txn.blob().put(b"block/1", b"body")?;
        Err(StoreError::Config("abort".to_string()))
    });

    assert!(matches!(result, Err(StoreError::Config(ref m)) if m == "abort"));
    assert!(db
        .metadata()
        .get_epoch_latest(None)
        .unwrap_err()
        .is_not_found());
    assert_eq!(db.blob().get(b"block/1").unwrap(), None);
    assert_eq!(db.metadata().get_commit_timestamp(None).unwrap(), None);
}

#[test]
fn test_run_propagates_domain_error_from_inside() {
    let db = Database::in_memory().unwrap();

    let result = db
        .transaction(true)
        .unwrap()
        .run(|txn| txn.delete_utxo(&UtxoRef::new(vec![1; 32], 0)));

    assert!(result.unwrap_err().is_not_found());
}

// =============================================================================
// Commit / Rollback Tests
// =============================================================================

#[test]
fn test_explicit_rollback_hides_writes() {
    let db = Database::in_memory().unwrap();
    let mut txn = db.transaction(true).unwrap();
    txn.add_utxo(&utxo(1, 0)).unwrap();
    txn.blob().put(b"k", b"v").unwrap();
    txn.rollback().unwrap();

    let reader = db.transaction(false).unwrap();
    assert!(reader.get_utxo(&UtxoRef::new(vec![1; 32], 0)).unwrap_err().is_not_found());
    drop(reader);
    assert_eq!(db.blob().get(b"k").unwrap(), None);
}

#[test]
fn test_drop_without_commit_rolls_back() {
    let db = Database::in_memory().unwrap();
    {
        let mut txn = db.transaction(true).unwrap();
        txn.set_epoch(&epoch(2, 1)).unwrap();
        txn.blob().put(b"k", b"v").unwrap();
    }

    assert!(db.metadata().get_epoch_latest(None).unwrap_err().is_not_found());
    assert_eq!(db.blob().get(b"k").unwrap(), None);
    // The write lock was released
    db.transaction(true).unwrap().commit().unwrap();
}

#[test]
fn test_reads_see_own_writes() {
    let db = Database::in_memory().unwrap();
    let mut txn = db.transaction(true).unwrap();

    txn.set_epoch(&epoch(3, 2)).unwrap();
    txn.set_epoch(&epoch(4, 2)).unwrap();
    txn.add_utxo(&utxo(9, 1)).unwrap();
    txn.blob().put(b"pending", b"yes").unwrap();

    assert_eq!(txn.get_epoch_latest().unwrap().epoch_id, 4);
    assert_eq!(txn.get_epochs_by_era(2).unwrap().len(), 2);
    assert_eq!(txn.get_utxos_by_address(b"addr_test1").unwrap().len(), 1);
    assert_eq!(txn.blob().get(b"pending").unwrap(), Some(b"yes".to_vec()));
    txn.commit().unwrap();
}

#[test]
fn test_pparams_order_through_txn() {
    let db = Database::in_memory().unwrap();
    db.transaction(true)
        .unwrap()
        .run(|txn| {
            for slot in [100, 200] {
                txn.set_pparams(&PParams {
                    epoch: 5,
                    added_slot: slot,
                    era_id: 3,
                    cbor: vec![0xA0],
                })?;
            }
            Ok(())
        })
        .unwrap();

    let txn = db.transaction(false).unwrap();
    let slots: Vec<u64> = txn.get_pparams(5).unwrap().iter().map(|p| p.added_slot).collect();
    assert_eq!(slots, vec![200, 100]);
}

#[test]
fn test_delete_utxos_through_txn() {
    let db = Database::in_memory().unwrap();
    db.transaction(true)
        .unwrap()
        .run(|txn| {
            txn.add_utxo(&utxo(1, 0))?;
            txn.add_utxo(&utxo(1, 1))
        })
        .unwrap();

    db.transaction(true)
        .unwrap()
        .run(|txn| txn.delete_utxos(&[utxo(1, 0).reference(), utxo(1, 1).reference()]))
        .unwrap();

    assert!(db
        .metadata()
        .get_utxos_by_address(b"addr_test1", None)
        .unwrap()
        .is_empty());
}

// =============================================================================
// Read-only Tests
// =============================================================================

#[test]
fn test_read_only_rejects_writes() {
    let db = Database::in_memory().unwrap();
    let mut txn = db.transaction(false).unwrap();
    assert!(!txn.is_read_write());

    assert!(matches!(txn.set_epoch(&epoch(1, 1)), Err(StoreError::ReadOnly)));
    assert!(matches!(txn.add_utxo(&utxo(1, 0)), Err(StoreError::ReadOnly)));
    assert!(matches!(
        txn.delete_utxos(&[UtxoRef::new(vec![1; 32], 0)]),
        Err(StoreError::ReadOnly)
    ));
    assert!(matches!(txn.blob().put(b"k", b"v"), Err(StoreError::ReadOnly)));

    txn.commit().unwrap();
    assert!(db.metadata().get_epoch_latest(None).unwrap_err().is_not_found());
}

#[test]
fn test_read_only_direct_metadata_write_rejected() {
    let db = Database::in_memory().unwrap();
    let mut txn = db.transaction(false).unwrap();

    let result = db.metadata().set_epoch(&epoch(1, 1), Some(txn.metadata()));
    assert!(matches!(result, Err(StoreError::ReadOnly)));
}

// =============================================================================
// Graph Tests
// =============================================================================

#[test]
fn test_graph_not_configured() {
    let db = Database::in_memory().unwrap();
    let mut txn = db.transaction(true).unwrap();

    assert!(matches!(
        txn.graph(),
        Err(StoreError::NotConfigured(Backend::Graph))
    ));
}

#[test]
fn test_graph_txn_commits_with_the_rest() {
    let (addr, log) = spawn_graph_server();
    let db = Database::open(Config::builder().graph_addr(addr).build()).unwrap();

    let txn_id = db
        .transaction(true)
        .unwrap()
        .run(|txn| {
            txn.set_epoch(&epoch(1, 1))?;
            let graph = txn.graph()?;
            graph.mutate(b"<_:utxo> <spent> \"false\" .")?;
            Ok(graph.id())
        })
        .unwrap();

    let requests = log.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert!(matches!(requests[0], Request::Mutate { txn_id: id, .. } if id == txn_id));
    assert_eq!(requests[1], Request::Commit { txn_id });
    assert_eq!(db.metadata().get_epoch_latest(None).unwrap().epoch_id, 1);
}

#[test]
fn test_graph_txn_discarded_on_rollback() {
    let (addr, log) = spawn_graph_server();
    let db = Database::open(Config::builder().graph_addr(addr).build()).unwrap();

    let mut txn = db.transaction(true).unwrap();
    txn.graph().unwrap().query(b"{ q }").unwrap();
    let txn_id = txn.graph().unwrap().id();
    txn.rollback().unwrap();

    let requests = log.lock().unwrap().clone();
    assert_eq!(requests.last(), Some(&Request::Discard { txn_id }));
}

#[test]
fn test_unused_graph_costs_nothing() {
    let (addr, log) = spawn_graph_server();
    let db = Database::open(Config::builder().graph_addr(addr).build()).unwrap();

    db.transaction(true)
        .unwrap()
        .run(|txn| txn.set_epoch(&epoch(1, 1)))
        .unwrap();

    assert!(log.lock().unwrap().is_empty());
    assert!(!db.graph().unwrap().is_connected());
}

#[test]
fn test_graph_commit_failure_leaves_other_backends_untouched() {
    let (addr, log) = spawn_graph_server_with(|request| match request {
        Request::Commit { .. } => Response::error("conflict"),
        _ => Response::ok(Vec::<u8>::new()),
    });
    let db = Database::open(Config::builder().graph_addr(addr).build()).unwrap();

    let result = db.transaction(true).unwrap().run(|txn| {
        txn.set_epoch(&epoch(1, 1))?;
        txn.blob().put(b"block/1", b"body")?;
        txn.graph()?.mutate(b"<_:a> <b> \"c\" .")?;
        Ok(())
    });

    assert!(result.is_err());
    assert!(matches!(
        log.lock().unwrap().last(),
        Some(Request::Commit { .. })
    ));
    assert_eq!(db.blob().get(b"block/1").unwrap(), None);
    assert!(db.metadata().get_epoch_latest(None).unwrap_err().is_not_found());
    assert_eq!(
        db.check_consistency().unwrap(),
        chainstore::database::CommitMarker::Fresh
    );
}
