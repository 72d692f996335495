//! Graph Module
//!
//! Client for the out-of-process graph store that holds densely linked
//! ledger state. The client is lazy: creating it never touches the network,
//! the first request connects, and a failed request drops the connection so
//! the next one reconnects.

pub mod protocol;

use std::io::BufReader;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Backend, Result, StoreError};

use protocol::{Request, Response, Status};

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

pub struct GraphClient {
    addr: String,
    connect_timeout: Duration,
    io_timeout: Duration,
    conn: Mutex<Option<Connection>>,
    next_txn_id: AtomicU64,
    closed: AtomicBool,
}

impl GraphClient {
    /// Create a client for `addr`; no connection is made yet
    pub fn new(addr: impl Into<String>, connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            io_timeout,
            conn: Mutex::new(None),
            next_txn_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Round-trip a PING
    pub fn ping(&self) -> Result<()> {
        self.call(Request::Ping, "ping").map(|_| ())
    }

    /// Start a server-side transaction
    ///
    /// Nothing is sent until the first query or mutation.
    pub fn new_txn(&self, read_write: bool) -> GraphTxn<'_> {
        GraphTxn {
            client: self,
            id: self.next_txn_id.fetch_add(1, Ordering::Relaxed),
            read_write,
            started: false,
            finished: false,
        }
    }

    /// Drop the connection; later requests fail with `Closed`
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(conn) = self.conn.lock().take() {
            let _ = conn.writer.shutdown(std::net::Shutdown::Both);
        }
        Ok(())
    }

    /// Send a request and map the response status onto the error taxonomy
    fn call(&self, request: Request, operation: &'static str) -> Result<Vec<u8>> {
        let response = self
            .round_trip(&request)
            .map_err(|e| e.in_backend(Backend::Graph, operation))?;
        match response.status {
            Status::Ok => Ok(response.payload.to_vec()),
            Status::NotFound => Err(StoreError::NotFound),
            Status::Error => Err(StoreError::Backend {
                backend: Backend::Graph,
                operation,
                reason: String::from_utf8_lossy(&response.payload).into_owned(),
            }),
        }
    }

    fn round_trip(&self, request: &Request) -> Result<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed(Backend::Graph));
        }
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let conn = match guard.as_mut() {
            Some(conn) => conn,
            None => return Err(StoreError::Network("no connection".to_string())),
        };

        let result = protocol::write_request(&mut conn.writer, request)
            .and_then(|_| protocol::read_response(&mut conn.reader));
        if result.is_err() {
            // The stream may be mid-frame; start over next time
            *guard = None;
        }
        result
    }

    fn connect(&self) -> Result<Connection> {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|e| StoreError::Network(format!("resolve {}: {}", self.addr, e)))?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(self.io_timeout))?;
                    stream.set_write_timeout(Some(self.io_timeout))?;
                    let reader = BufReader::new(stream.try_clone()?);
                    tracing::debug!(addr = %addr, "graph: connected");
                    return Ok(Connection {
                        reader,
                        writer: stream,
                    });
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(StoreError::Network(match last_error {
            Some(e) => format!("connect {}: {}", self.addr, e),
            None => format!("connect {}: no addresses", self.addr),
        }))
    }
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("addr", &self.addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// A server-side graph transaction
///
/// Dropping a started transaction without finishing it discards it.
pub struct GraphTxn<'a> {
    client: &'a GraphClient,
    id: u64,
    read_write: bool,
    started: bool,
    finished: bool,
}

impl<'a> GraphTxn<'a> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_read_write(&self) -> bool {
        self.read_write
    }

    pub fn query(&mut self, query: &[u8]) -> Result<Vec<u8>> {
        self.started = true;
        self.client.call(
            Request::Query {
                txn_id: self.id,
                read_only: !self.read_write,
                query: query.to_vec(),
            },
            "query",
        )
    }

    pub fn mutate(&mut self, mutation: &[u8]) -> Result<Vec<u8>> {
        if !self.read_write {
            return Err(StoreError::ReadOnly);
        }
        self.started = true;
        self.client.call(
            Request::Mutate {
                txn_id: self.id,
                payload: mutation.to_vec(),
            },
            "mutate",
        )
    }

    /// Commit; a transaction that never sent a request is a no-op
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if !self.started {
            return Ok(());
        }
        self.client
            .call(Request::Commit { txn_id: self.id }, "commit")
            .map(|_| ())
    }

    pub fn discard(mut self) -> Result<()> {
        self.finish_discard()
    }

    fn finish_discard(&mut self) -> Result<()> {
        self.finished = true;
        if !self.started {
            return Ok(());
        }
        self.client
            .call(Request::Discard { txn_id: self.id }, "discard")
            .map(|_| ())
    }
}

impl Drop for GraphTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.finish_discard() {
                tracing::warn!(txn = self.id, error = %e, "graph: discard on drop failed");
            }
        }
    }
}
