//! # PipeKV Sync Client
//!
//! Purpose: Batch Redis-compatible commands into single pipelined round trips
//! and run optimistic `WATCH`/`MULTI`/`EXEC` transactions on top of them.
//!
//! ## Design Principles
//! 1. **One Round Trip per Batch**: Calls are queued locally and written together.
//! 2. **Ordered Replies**: The Nth queued call owns the Nth reply element.
//! 3. **Flat Transaction Results**: Commit replies are unwrapped into one level.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.
//!
//! ```no_run
//! use pkv_client::KVClient;
//!
//! let client = KVClient::connect("127.0.0.1:6379")?;
//! let reply = client.transaction(|tx| {
//!     tx.set("a", 1).get("a");
//!     Ok(())
//! })?;
//! assert_eq!(reply.elems()[1].str()?, "1");
//! # Ok::<(), pkv_client::ClientError>(())
//! ```

mod call;
mod client;
mod connection;
mod error;
mod multicall;
mod reply;
mod resp;

pub use call::{control, Arg, Call, CallQueue};
pub use client::{ClientConfig, KVClient};
pub use connection::{BatchSender, Connection};
pub use error::{ClientError, ClientResult, ReplyError, SessionError};
pub use multicall::{run_batch, MultiCall, TxState};
pub use reply::{Reply, Value};
