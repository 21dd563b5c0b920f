//! # Replies
//!
//! Purpose: Represent the result of one command or one batch as a tagged
//! variant, and reconcile a transaction's two-level reply into one level.
//!
//! ## Design Principles
//! 1. **Tagged Variant**: A reply is either a scalar or an ordered batch; a
//!    scalar never carries elements.
//! 2. **Errors Are Values**: Per-command and transaction errors live inside the
//!    reply, so siblings stay readable.
//! 3. **Explicit Promotion**: Transaction unwrapping is a pure transform over an
//!    owned reply, not in-place patching of a shared structure.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{ClientError, ClientResult, ReplyError};

/// Scalar payload of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `$-1`, `*-1`, or the payload of an error reply.
    Nil,
    /// `+OK`, `+QUEUED` style status lines.
    Status(Bytes),
    /// `:123` replies.
    Integer(i64),
    /// `$...` bulk strings.
    Bulk(Bytes),
}

/// Result of a single command or of a whole round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Scalar {
        value: Value,
        error: Option<ReplyError>,
    },
    Batch {
        elems: Vec<Reply>,
        error: Option<ReplyError>,
    },
}

impl Reply {
    /// Successful scalar reply.
    pub fn value(value: Value) -> Self {
        Reply::Scalar { value, error: None }
    }

    /// Scalar reply carrying an error.
    pub fn error_reply(error: ReplyError) -> Self {
        Reply::Scalar {
            value: Value::Nil,
            error: Some(error),
        }
    }

    /// Successful batch of child replies.
    pub fn batch(elems: Vec<Reply>) -> Self {
        Reply::Batch { elems, error: None }
    }

    /// Batch whose results were discarded in favour of a top-level error.
    pub fn failed_batch(error: ReplyError) -> Self {
        Reply::Batch {
            elems: Vec::new(),
            error: Some(error),
        }
    }

    pub fn error(&self) -> Option<&ReplyError> {
        match self {
            Reply::Scalar { error, .. } | Reply::Batch { error, .. } => error.as_ref(),
        }
    }

    /// Child replies; empty for scalars.
    pub fn elems(&self) -> &[Reply] {
        match self {
            Reply::Batch { elems, .. } => elems,
            Reply::Scalar { .. } => &[],
        }
    }

    pub fn into_elems(self) -> Vec<Reply> {
        match self {
            Reply::Batch { elems, .. } => elems,
            Reply::Scalar { .. } => Vec::new(),
        }
    }

    pub fn elem(&self, index: usize) -> Option<&Reply> {
        self.elems().get(index)
    }

    pub fn len(&self) -> usize {
        self.elems().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems().is_empty()
    }

    /// True for a nil scalar without an error.
    pub fn is_nil(&self) -> bool {
        matches!(
            self,
            Reply::Scalar {
                value: Value::Nil,
                error: None
            }
        )
    }

    /// Converts an embedded error into `Err`, keeping the reply otherwise.
    pub fn into_result(self) -> ClientResult<Reply> {
        if let Some(err) = self.error().cloned() {
            return Err(ClientError::Reply(err));
        }
        Ok(self)
    }

    /// Raw bytes of a status or bulk reply; `None` for nil.
    pub fn bytes(&self) -> ClientResult<Option<&[u8]>> {
        match self.scalar()? {
            Value::Bulk(data) | Value::Status(data) => Ok(Some(&data[..])),
            Value::Nil => Ok(None),
            Value::Integer(_) => Err(ClientError::UnexpectedResponse),
        }
    }

    /// UTF-8 string of a status, bulk or integer reply.
    pub fn str(&self) -> ClientResult<String> {
        match self.scalar()? {
            Value::Bulk(data) | Value::Status(data) => std::str::from_utf8(data)
                .map(str::to_owned)
                .map_err(|_| ClientError::UnexpectedResponse),
            Value::Integer(value) => Ok(value.to_string()),
            Value::Nil => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Integer reply, or a bulk string holding a decimal integer.
    pub fn int(&self) -> ClientResult<i64> {
        match self.scalar()? {
            Value::Integer(value) => Ok(*value),
            Value::Bulk(data) => std::str::from_utf8(data)
                .ok()
                .and_then(|text| text.parse().ok())
                .ok_or(ClientError::UnexpectedResponse),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// `:1` / `:0` style boolean replies.
    pub fn bool(&self) -> ClientResult<bool> {
        Ok(self.int()? != 0)
    }

    /// Batch of strings, e.g. `MGET` or `LRANGE`. Nil elements are rejected.
    pub fn list(&self) -> ClientResult<Vec<String>> {
        self.batch_elems()?.iter().map(Reply::str).collect()
    }

    /// Field/value pairs, e.g. `HGETALL`.
    pub fn hash(&self) -> ClientResult<HashMap<String, String>> {
        let elems = self.batch_elems()?;
        if elems.len() % 2 != 0 {
            return Err(ClientError::UnexpectedResponse);
        }
        elems
            .chunks_exact(2)
            .map(|pair| -> ClientResult<(String, String)> { Ok((pair[0].str()?, pair[1].str()?)) })
            .collect()
    }

    fn scalar(&self) -> ClientResult<&Value> {
        match self {
            Reply::Scalar {
                error: Some(err), ..
            }
            | Reply::Batch {
                error: Some(err), ..
            } => Err(ClientError::Reply(err.clone())),
            Reply::Scalar { value, error: None } => Ok(value),
            Reply::Batch { .. } => Err(ClientError::UnexpectedResponse),
        }
    }

    fn batch_elems(&self) -> ClientResult<&[Reply]> {
        match self {
            Reply::Batch { error: Some(err), .. } | Reply::Scalar { error: Some(err), .. } => {
                Err(ClientError::Reply(err.clone()))
            }
            Reply::Batch { elems, error: None } => Ok(elems),
            Reply::Scalar { .. } => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Replaces a transaction round trip with the result of its commit.
    ///
    /// The last element answers the commit command. A clean nested result
    /// becomes the whole reply; a commit error becomes the top-level error;
    /// anything else (typically a nil reply after a watched key changed) is
    /// reported as `ReplyError::UnknownTransaction`.
    pub fn promote_commit(self) -> Reply {
        let commit = match self {
            Reply::Batch { error: Some(err), .. } => return Reply::failed_batch(err),
            Reply::Batch { mut elems, error: None } => elems.pop(),
            Reply::Scalar { .. } => None,
        };
        match commit {
            Some(Reply::Batch { elems, error: None }) => Reply::batch(elems),
            Some(Reply::Batch { error: Some(err), .. })
            | Some(Reply::Scalar {
                error: Some(err), ..
            }) => Reply::failed_batch(err),
            Some(Reply::Scalar { error: None, .. }) | None => {
                Reply::failed_batch(ReplyError::UnknownTransaction)
            }
        }
    }
}
