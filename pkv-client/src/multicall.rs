//! # Multi-Call Sessions
//!
//! Purpose: Queue several commands, send them in one round trip, and shape
//! the ordered replies. Transactions wrap the same primitive in
//! `MULTI`/`EXEC` and unwrap the commit reply into one flat result.
//!
//! ## Design Principles
//! 1. **Session by Reference**: The caller's queuing function receives
//!    `&mut MultiCall` and nothing else; the session owns the queue and
//!    borrows the connection.
//! 2. **Explicit State Machine**: `TxState` rejects transitions such as a
//!    commit without a begin instead of corrupting the wire stream.
//! 3. **Order Is Identity**: The Nth queued call maps to the Nth element.
//!
//! ## Transaction Flow
//!
//! ```text
//! Idle --MULTI queued--> Begun --body runs--> BodyAccumulating
//!                                                 |
//!                        EXEC queued, round trip  |
//!                        +------------------------+
//!                        v                        v
//!                    Committed                 Aborted
//! ```

use tracing::{debug, warn};

use crate::call::{control, Arg, Call, CallQueue};
use crate::connection::BatchSender;
use crate::error::{ClientError, ClientResult, SessionError};
use crate::reply::Reply;

/// Transaction framing state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// No transaction body is open.
    Idle,
    /// `MULTI` queued, body not started.
    Begun,
    /// Commands are being queued into the transaction body.
    BodyAccumulating,
    /// `EXEC` succeeded; the reply holds the body results.
    Committed,
    /// `EXEC` failed or the outcome was ambiguous.
    Aborted,
}

impl TxState {
    fn is_terminal(self) -> bool {
        matches!(self, TxState::Committed | TxState::Aborted)
    }

    /// True while a `MULTI` body is open.
    fn in_body(self) -> bool {
        matches!(self, TxState::Begun | TxState::BodyAccumulating)
    }

    fn live(self) -> Result<TxState, SessionError> {
        if self.is_terminal() {
            return Err(SessionError::Terminated);
        }
        Ok(self)
    }

    fn begin(self) -> Result<TxState, SessionError> {
        match self.live()? {
            TxState::Idle => Ok(TxState::Begun),
            _ => Err(SessionError::NestedBegin),
        }
    }

    fn accumulate(self) -> Result<TxState, SessionError> {
        match self.live()? {
            TxState::Idle => Ok(TxState::Idle),
            _ => Ok(TxState::BodyAccumulating),
        }
    }

    /// Closes a manually framed body (`EXEC`/`DISCARD` queued by the caller).
    fn close(self) -> Result<TxState, SessionError> {
        match self.live()? {
            TxState::Idle => Err(SessionError::CommitWithoutBegin),
            _ => Ok(TxState::Idle),
        }
    }

    fn settle(self, promoted: &Reply) -> Result<TxState, SessionError> {
        match self.live()? {
            TxState::BodyAccumulating if promoted.error().is_none() => Ok(TxState::Committed),
            TxState::BodyAccumulating => Ok(TxState::Aborted),
            _ => Err(SessionError::CommitWithoutBegin),
        }
    }
}

/// Runs one batching session against `sender`.
///
/// `body` queues calls on the session and may flush intermediate round trips.
/// Without `transaction` the queued calls are sent verbatim and the batch
/// reply is returned as is. With `transaction` the calls are framed by
/// `MULTI`/`EXEC`, and the result is the flattened `EXEC` reply or a
/// top-level transaction error.
pub fn run_batch<F>(sender: &mut dyn BatchSender, transaction: bool, body: F) -> ClientResult<Reply>
where
    F: FnOnce(&mut MultiCall<'_>) -> ClientResult<()>,
{
    MultiCall::new(sender, transaction).process(body)
}

/// Handle for queuing calls within one batching session.
pub struct MultiCall<'a> {
    sender: &'a mut dyn BatchSender,
    transaction: bool,
    state: TxState,
    queue: CallQueue,
    misuse: Option<SessionError>,
}

impl<'a> MultiCall<'a> {
    fn new(sender: &'a mut dyn BatchSender, transaction: bool) -> Self {
        MultiCall {
            sender,
            transaction,
            state: TxState::Idle,
            queue: CallQueue::new(),
            misuse: None,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    fn process<F>(mut self, body: F) -> ClientResult<Reply>
    where
        F: FnOnce(&mut MultiCall<'a>) -> ClientResult<()>,
    {
        if self.transaction {
            self.state = self.state.begin()?;
            self.queue.enqueue(Call::bare(control::MULTI));
            self.state = self.state.accumulate()?;
        }

        if let Err(err) = body(&mut self) {
            debug!(transaction = self.transaction, error = %err, "multicall body failed");
            return Err(err);
        }
        if !self.transaction && self.state.in_body() {
            self.record(Err(SessionError::UnclosedBody));
        }
        self.check()?;

        if !self.transaction {
            return self.sender.send_batch(self.queue.drain());
        }

        self.queue.enqueue(Call::bare(control::EXEC));
        let calls = self.queue.drain();
        debug!(body = calls.len() - 2, "committing transaction");
        let reply = self.sender.send_batch(calls)?.promote_commit();
        self.state = self.state.settle(&reply)?;
        if let Some(err) = reply.error() {
            warn!(error = %err, "transaction aborted");
        }
        Ok(reply)
    }

    fn check(&self) -> ClientResult<()> {
        match self.misuse {
            Some(err) => Err(ClientError::Session(err)),
            None => Ok(()),
        }
    }

    fn record(&mut self, transition: Result<TxState, SessionError>) {
        match transition {
            Ok(state) => self.state = state,
            Err(err) => {
                warn!(error = %err, state = ?self.state, "invalid session transition");
                if self.misuse.is_none() {
                    self.misuse = Some(err);
                }
            }
        }
    }

    /// Queues a prepared call.
    ///
    /// Control commands move the state machine the same way the dedicated
    /// helpers do, so `call("EXEC", ..)` is checked like [`MultiCall::exec`].
    pub fn queue(&mut self, call: Call) -> &mut Self {
        let next = self.transition(&call);
        self.record(next);
        self.queue.enqueue(call);
        self
    }

    fn transition(&self, call: &Call) -> Result<TxState, SessionError> {
        if call.is(control::MULTI) {
            self.state.begin()
        } else if call.is(control::EXEC) || call.is(control::DISCARD) {
            if self.transaction {
                // The session queues its own EXEC.
                Err(SessionError::ManualCommit)
            } else {
                self.state.close()
            }
        } else {
            self.state.accumulate()
        }
    }

    /// Queues a command for the next round trip.
    pub fn call<I, A>(&mut self, command: &str, args: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.queue(Call::new(command, args))
    }

    /// Sends the calls queued so far and returns their batch reply.
    ///
    /// Inside a transaction the calls go out ahead of the `MULTI` framing, so
    /// their results are live values the body can act on. Flushing an empty
    /// queue is a valid round trip with no elements.
    pub fn flush(&mut self) -> ClientResult<Reply> {
        self.check()?;
        let mut calls = self.queue.drain();
        if self.transaction && calls.first().is_some_and(|call| call.is(control::MULTI)) {
            calls.remove(0);
            self.queue.enqueue(Call::bare(control::MULTI));
        }
        debug!(calls = calls.len(), transaction = self.transaction, "nested flush");
        self.sender.send_batch(calls)
    }

    /// Registers optimistic-lock keys.
    pub fn watch<I, A>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.call(control::WATCH, keys)
    }

    pub fn unwatch(&mut self) -> &mut Self {
        self.queue(Call::bare(control::UNWATCH))
    }

    /// Opens a transaction body in a plain session.
    pub fn multi(&mut self) -> &mut Self {
        self.queue(Call::bare(control::MULTI))
    }

    /// Commits a body opened with [`MultiCall::multi`].
    pub fn exec(&mut self) -> &mut Self {
        self.queue(Call::bare(control::EXEC))
    }

    /// Drops a body opened with [`MultiCall::multi`].
    pub fn discard(&mut self) -> &mut Self {
        self.queue(Call::bare(control::DISCARD))
    }

    pub fn get(&mut self, key: impl Into<Arg>) -> &mut Self {
        self.queue(Call::bare("GET").arg(key))
    }

    pub fn set(&mut self, key: impl Into<Arg>, value: impl Into<Arg>) -> &mut Self {
        self.queue(Call::bare("SET").arg(key).arg(value))
    }

    pub fn del<I, A>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.call("DEL", keys)
    }

    pub fn incr(&mut self, key: impl Into<Arg>) -> &mut Self {
        self.queue(Call::bare("INCR").arg(key))
    }

    pub fn mget<I, A>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.call("MGET", keys)
    }

    pub fn mset<I, K, V>(&mut self, pairs: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Arg>,
        V: Into<Arg>,
    {
        let mut call = Call::bare("MSET");
        for (key, value) in pairs {
            call = call.arg(key).arg(value);
        }
        self.queue(call)
    }
}
