//! # Error Types
//!
//! Purpose: Separate failures of the round trip itself from errors that the
//! server (or the transaction machinery) embeds inside a reply.
//!
//! ## Design Principles
//! 1. **Two Layers**: `ClientError` aborts the call; `ReplyError` rides inside
//!    a `Reply` so sibling results stay usable.
//! 2. **Fail Fast**: Framing violations and session misuse surface before any
//!    reply is trusted.

use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned instead of a reply.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Reply shape did not match what the accessor expected.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// An earlier transport failure left unread replies on this connection.
    #[error("connection broken by an earlier transport error")]
    ConnectionBroken,
    /// Address could not be parsed into a socket address.
    #[error("invalid address")]
    InvalidAddress,
    /// The reply carried an error where a value was requested.
    #[error(transparent)]
    Reply(#[from] ReplyError),
    /// A batching session was driven through an invalid transition.
    #[error("session misuse: {0}")]
    Session(#[from] SessionError),
}

/// Errors embedded in a `Reply`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    /// Server returned an error reply, e.g. `ERR wrong number of arguments`.
    #[error("server error: {0}")]
    Server(String),
    /// Commit reply carried neither results nor an error.
    #[error("unknown transaction error")]
    UnknownTransaction,
}

impl ReplyError {
    /// Builds a server error from raw reply bytes.
    pub fn server(message: &[u8]) -> Self {
        ReplyError::Server(String::from_utf8_lossy(message).into_owned())
    }
}

/// Invalid transitions of the transaction state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("MULTI issued while a transaction body is already open")]
    NestedBegin,
    #[error("EXEC or DISCARD issued without MULTI")]
    CommitWithoutBegin,
    #[error("commit is injected by the transaction session")]
    ManualCommit,
    #[error("MULTI left open without EXEC or DISCARD")]
    UnclosedBody,
    #[error("session already committed or aborted")]
    Terminated,
}
