//! Connection-scoped transaction state
//!
//! MULTI/EXEC/DISCARD intent lives at the client-connection level: MULTI
//! flips the connection into queueing mode, subsequent commands accumulate
//! here instead of executing, and EXEC hands the queue back to the
//! dispatcher for in-order execution.
//!
//! Queued commands own their bytes outright (the parser copies bulk
//! payloads out of the connection's input buffer), so the buffer is free
//! to be reused while a transaction is open.

use crate::protocol::RespValue;

/// Per-connection MULTI/EXEC state machine: `Normal -> Multi -> Normal`.
#[derive(Debug, Default)]
pub struct TransactionSession {
    in_multi: bool,
    queued: Vec<RespValue>,
}

impl TransactionSession {
    /// Creates a session in the normal (non-transactional) state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters MULTI mode.
    ///
    /// Returns `false` when a transaction is already open (MULTI calls
    /// can not be nested).
    pub fn begin_multi(&mut self) -> bool {
        if self.in_multi {
            return false;
        }
        self.in_multi = true;
        self.queued.clear();
        true
    }

    /// Queues one command array for later EXEC.
    pub fn queue_command(&mut self, command: RespValue) {
        debug_assert!(self.in_multi);
        self.queued.push(command);
    }

    /// Drops the queue and returns to the normal state.
    ///
    /// Returns `false` when no transaction is open.
    pub fn discard(&mut self) -> bool {
        if !self.in_multi {
            return false;
        }
        self.in_multi = false;
        self.queued.clear();
        true
    }

    /// Leaves MULTI mode and yields the queued commands for execution.
    ///
    /// Returns `None` when no transaction is open.
    pub fn take_queued_for_exec(&mut self) -> Option<Vec<RespValue>> {
        if !self.in_multi {
            return None;
        }
        self.in_multi = false;
        Some(std::mem::take(&mut self.queued))
    }

    /// Whether this connection is currently queueing a transaction.
    pub fn in_multi(&self) -> bool {
        self.in_multi
    }

    /// Number of commands queued so far.
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }
}
