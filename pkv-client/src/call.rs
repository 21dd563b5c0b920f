//! # Call Queue
//!
//! Purpose: Accumulate commands in call order without touching the network.
//!
//! ## Design Principles
//! 1. **Positional Identity**: A call's index is its correlation key to the reply.
//! 2. **Binary-Safe**: Arguments are stored as raw bytes.
//! 3. **Cheap Drain**: Draining swaps the backing vector out instead of copying.

use bytes::Bytes;

/// Control commands framing an optimistic transaction.
pub mod control {
    pub const WATCH: &str = "WATCH";
    pub const UNWATCH: &str = "UNWATCH";
    pub const MULTI: &str = "MULTI";
    pub const EXEC: &str = "EXEC";
    pub const DISCARD: &str = "DISCARD";
}

/// One opaque command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg(Bytes);

impl Arg {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Arg {
    fn from(value: Bytes) -> Self {
        Arg(value)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg(Bytes::from(value))
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for Arg {
    fn from(value: &[u8; N]) -> Self {
        Arg(Bytes::copy_from_slice(value))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg(Bytes::from(value))
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::from(value.as_str())
    }
}

macro_rules! arg_from_display {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg(Bytes::from(value.to_string()))
                }
            }
        )*
    };
}

arg_from_display!(i32, i64, u32, u64, usize, f64);

/// A queued command with its positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    command: String,
    args: Vec<Arg>,
}

impl Call {
    pub fn new<I, A>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Call {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a call with no arguments.
    pub fn bare(command: impl Into<String>) -> Self {
        Call {
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, value: impl Into<Arg>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Case-insensitive match on the command identifier.
    pub fn is(&self, command: &str) -> bool {
        self.command.eq_ignore_ascii_case(command)
    }
}

/// Ordered, append-only list of pending calls.
#[derive(Debug, Default)]
pub struct CallQueue {
    calls: Vec<Call>,
}

impl CallQueue {
    pub fn new() -> Self {
        CallQueue { calls: Vec::new() }
    }

    /// Appends a call to the tail.
    pub fn enqueue(&mut self, call: Call) {
        self.calls.push(call);
    }

    /// Returns every queued call in order and leaves the queue empty.
    pub fn drain(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
