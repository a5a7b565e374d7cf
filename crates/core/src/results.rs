use crate::action::Action;
use chaindb_primitives::{F32Bits, F64Bits, Name};
use core::fmt::{self, Write};

/// The trace of one applied action, drained console output included.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionTrace {
    pub receiver: Name,
    pub act: Action,
    pub console: String,
}

/// A future action sequence scheduled by the current one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeferredTransaction {
    pub sender: Name,
    pub sender_id: u128,
    pub payer: Name,
    pub delay_sec: u32,
    pub actions: Vec<Action>,
}

/// Cancels a previously scheduled deferred transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeferredReference {
    pub sender: Name,
    pub sender_id: u128,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeferredTransactionRequest {
    Schedule(DeferredTransaction),
    Cancel(DeferredReference),
}

/// Everything one action application produced, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyResults {
    pub applied_actions: Vec<ActionTrace>,
    pub deferred_transaction_requests: Vec<DeferredTransactionRequest>,
    /// Monotonic count of scheduled deferred transactions, used by hosts for
    /// nonce generation. Never decremented, not even by cancels.
    pub deferred_transactions_count: usize,
}

impl ApplyResults {
    /// Moves `other`'s sequences onto the end of this accumulator,
    /// preserving order.
    pub fn append_results(&mut self, mut other: ApplyResults) {
        self.applied_actions.append(&mut other.applied_actions);
        self.deferred_transaction_requests
            .append(&mut other.deferred_transaction_requests);
        self.deferred_transactions_count += other.deferred_transactions_count;
    }
}

/// The pending console output of one action.
///
/// Appends serialize to text in a stable, architecture-independent form:
/// integers and names through their `Display` impls, floats through their
/// raw bit patterns, bytes as lowercase hex.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsoleBuffer {
    out: String,
}

impl ConsoleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, value: impl fmt::Display) {
        // Writing to a String cannot fail.
        let _ = write!(self.out, "{value}");
    }

    pub fn append_name(&mut self, name: Name) {
        self.append(name);
    }

    pub fn append_f32(&mut self, bits: F32Bits) {
        self.append(bits.to_f32());
    }

    pub fn append_f64(&mut self, bits: F64Bits) {
        self.append(bits.to_f64());
    }

    pub fn append_hex(&mut self, bytes: &[u8]) {
        self.out.push_str(&hex::encode(bytes));
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    /// Drains the buffer, leaving it empty for the next appends.
    pub fn take(&mut self) -> String {
        core::mem::take(&mut self.out)
    }
}
