//! Graph client tests against an in-process fake server
//!
//! Tests verify:
//! - The client connects lazily and only once
//! - Transactions send their id on every request
//! - Untouched transactions commit without a round trip
//! - Dropping a started transaction discards it
//! - Server statuses map onto NotFound / Backend errors
//! - Unreachable servers and closed clients fail cleanly

use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chainstore::error::Backend;
use chainstore::graph::protocol::{read_request, write_response, Request, Response};
use chainstore::graph::GraphClient;
use chainstore::StoreError;

// =============================================================================
// Fake Server
// =============================================================================

struct FakeServer {
    addr: String,
    requests: Arc<Mutex<Vec<Request>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let (log, count) = (Arc::clone(&requests), Arc::clone(&connections));
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                count.fetch_add(1, Ordering::SeqCst);
                let log = Arc::clone(&log);
                thread::spawn(move || serve(stream, log));
            }
        });

        Self {
            addr,
            requests,
            connections,
        }
    }

    fn client(&self) -> GraphClient {
        GraphClient::new(
            self.addr.clone(),
            Duration::from_millis(500),
            Duration::from_millis(2000),
        )
    }

    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

fn serve(stream: TcpStream, log: Arc<Mutex<Vec<Request>>>) {
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    while let Ok(request) = read_request(&mut reader) {
        log.lock().unwrap().push(request.clone());
        let response = match &request {
            Request::Query { query, .. } if query == b"missing" => Response::not_found(),
            Request::Query { query, .. } if query == b"explode" => {
                Response::error("query failed")
            }
            Request::Query { query, .. } => Response::ok(query.clone()),
            Request::Mutate { payload, .. } => Response::ok(payload.len().to_string()),
            _ => Response::ok(Vec::<u8>::new()),
        };
        if write_response(&mut writer, &response).is_err() {
            break;
        }
    }
}

fn unreachable_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

// =============================================================================
// Connection Tests
// =============================================================================

#[test]
fn test_new_client_does_not_connect() {
    let server = FakeServer::start();
    let client = server.client();

    assert!(!client.is_connected());
    assert_eq!(server.connections.load(Ordering::SeqCst), 0);
}

#[test]
fn test_ping_connects_once() {
    let server = FakeServer::start();
    let client = server.client();

    client.ping().unwrap();
    client.ping().unwrap();

    assert!(client.is_connected());
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
    assert_eq!(server.requests(), vec![Request::Ping, Request::Ping]);
}

#[test]
fn test_unreachable_server() {
    let client = GraphClient::new(
        unreachable_addr(),
        Duration::from_millis(200),
        Duration::from_millis(200),
    );

    let result = client.ping();

    assert!(matches!(
        result,
        Err(StoreError::Backend {
            backend: Backend::Graph,
            ..
        })
    ));
    assert!(!client.is_connected());
}

#[test]
fn test_closed_client_rejects_requests() {
    let server = FakeServer::start();
    let client = server.client();
    client.ping().unwrap();

    client.close().unwrap();

    assert!(!client.is_connected());
    assert!(matches!(
        client.ping(),
        Err(StoreError::Closed(Backend::Graph))
    ));
}

// =============================================================================
// Transaction Tests
// =============================================================================

#[test]
fn test_txn_query_mutate_commit() {
    let server = FakeServer::start();
    let client = server.client();

    let mut txn = client.new_txn(true);
    let id = txn.id();
    assert_eq!(txn.query(b"{ utxo }").unwrap(), b"{ utxo }".to_vec());
    assert_eq!(txn.mutate(b"abcd").unwrap(), b"4".to_vec());
    txn.commit().unwrap();

    assert_eq!(
        server.requests(),
        vec![
            Request::Query {
                txn_id: id,
                read_only: false,
                query: b"{ utxo }".to_vec(),
            },
            Request::Mutate {
                txn_id: id,
                payload: b"abcd".to_vec(),
            },
            Request::Commit { txn_id: id },
        ]
    );
}

#[test]
fn test_txn_ids_are_unique() {
    let server = FakeServer::start();
    let client = server.client();

    let a = client.new_txn(false);
    let b = client.new_txn(false);
    assert_ne!(a.id(), b.id());
}

#[test]
fn test_untouched_txn_commits_without_network() {
    let server = FakeServer::start();
    let client = server.client();

    client.new_txn(true).commit().unwrap();
    client.new_txn(true).discard().unwrap();
    drop(client.new_txn(true));

    assert!(!client.is_connected());
    assert!(server.requests().is_empty());
}

#[test]
fn test_read_only_txn_rejects_mutation() {
    let server = FakeServer::start();
    let client = server.client();

    let mut txn = client.new_txn(false);
    assert!(matches!(txn.mutate(b"x"), Err(StoreError::ReadOnly)));
    txn.query(b"q").unwrap();
    txn.discard().unwrap();

    let requests = server.requests();
    assert!(matches!(
        requests[0],
        Request::Query {
            read_only: true,
            ..
        }
    ));
    assert!(matches!(requests[1], Request::Discard { .. }));
}

#[test]
fn test_drop_discards_started_txn() {
    let server = FakeServer::start();
    let client = server.client();

    let id = {
        let mut txn = client.new_txn(true);
        txn.mutate(b"pending").unwrap();
        txn.id()
    };

    assert_eq!(
        server.requests().last(),
        Some(&Request::Discard { txn_id: id })
    );
}

// =============================================================================
// Status Mapping Tests
// =============================================================================

#[test]
fn test_not_found_status() {
    let server = FakeServer::start();
    let client = server.client();
    let mut txn = client.new_txn(false);

    let err = txn.query(b"missing").unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_error_status_carries_message() {
    let server = FakeServer::start();
    let client = server.client();
    let mut txn = client.new_txn(false);

    match txn.query(b"explode") {
        Err(StoreError::Backend {
            backend: Backend::Graph,
            operation,
            reason,
        }) => {
            assert_eq!(operation, "query");
            assert_eq!(reason, "query failed");
        }
        other => panic!("expected graph backend error, got {:?}", other),
    }
    // The connection stays usable after an application-level error
    assert!(client.is_connected());
    client.ping().unwrap();
}
