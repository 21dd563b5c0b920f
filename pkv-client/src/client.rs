//! # Synchronous Client API
//!
//! Purpose: Expose blocking entry points for pipelined batches and optimistic
//! transactions over one RESP2 connection.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides the connection and codec.
//! 2. **Serialized Access**: A session holds the connection lock for its whole
//!    lifetime, so two batches never interleave on the wire.
//! 3. **Never Reuse a Broken Socket**: After a transport error the connection
//!    is dropped and the next call reconnects.
//! 4. **Fail Fast**: Transport failures surface as `Err`; command failures stay
//!    inside the reply.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::call::{Arg, Call};
use crate::connection::{BatchSender, Connection};
use crate::error::{ClientError, ClientResult};
use crate::multicall::{run_batch, MultiCall};
use crate::reply::Reply;

/// Configuration for the synchronous client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Unix socket path; takes precedence over `addr` when set.
    pub path: Option<PathBuf>,
    /// Database index selected right after connecting.
    pub database: u32,
    /// Optional socket read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional socket write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            path: None,
            database: 0,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

/// Synchronous client owning a single connection.
pub struct KVClient {
    config: ClientConfig,
    conn: Mutex<Option<Connection>>,
}

impl KVClient {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let conn = Connection::connect(&config)?;
        debug!(addr = %config.addr, path = ?config.path, database = config.database, "connected");
        Ok(KVClient {
            config,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Sends one command and returns its reply.
    pub fn call<I, A>(&self, command: &str, args: I) -> ClientResult<Reply>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let call = Call::new(command, args);
        let reply = self.with_connection(|conn| conn.send_batch(vec![call]))?;
        reply.into_elems().pop().ok_or(ClientError::Protocol)
    }

    /// Queues the calls made by `body` and sends them in one round trip.
    ///
    /// The reply has one element per call of the final round trip, in order.
    pub fn multi_call<F>(&self, body: F) -> ClientResult<Reply>
    where
        F: FnOnce(&mut MultiCall<'_>) -> ClientResult<()>,
    {
        self.run(false, body)
    }

    /// Runs the calls made by `body` as a `MULTI`/`EXEC` transaction.
    ///
    /// On commit the reply holds one element per body call. If the commit
    /// fails (including a watched key changing) the reply's top-level error is
    /// set and it carries no elements.
    pub fn transaction<F>(&self, body: F) -> ClientResult<Reply>
    where
        F: FnOnce(&mut MultiCall<'_>) -> ClientResult<()>,
    {
        self.run(true, body)
    }

    fn run<F>(&self, transaction: bool, body: F) -> ClientResult<Reply>
    where
        F: FnOnce(&mut MultiCall<'_>) -> ClientResult<()>,
    {
        self.with_connection(|conn| run_batch(conn, transaction, body))
    }

    /// Runs `op` on a healthy connection, reconnecting first if the previous
    /// one was invalidated, and drops the connection if `op` breaks it.
    fn with_connection<T, F>(&self, op: F) -> ClientResult<T>
    where
        F: FnOnce(&mut Connection) -> ClientResult<T>,
    {
        let mut slot = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map_or(true, |conn| !conn.is_valid()) {
            debug!(addr = %self.config.addr, path = ?self.config.path, "reconnecting");
            *slot = None;
            *slot = Some(Connection::connect(&self.config)?);
        }
        let Some(conn) = slot.as_mut() else {
            return Err(ClientError::ConnectionBroken);
        };

        let result = op(conn);
        if !conn.is_valid() {
            *slot = None;
        }
        result
    }
}
