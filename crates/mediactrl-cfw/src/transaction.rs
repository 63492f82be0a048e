//! The per-tid transaction state machine (§3 "Transaction", §4.4).
//!
//! Grounded on `CfwStack.h`'s `CfwTransaction` (`messages`/`oldMessages`/
//! `seq`, `dontWait`, `ackReceived`, `report`/`control`/`errorCode`) and
//! `dialog-core/src/manager/core.rs`'s task-owns-state-machine shape
//! (here: one `Transaction` struct owns its own retransmit/extended-timer
//! bookkeeping, driven by a tick the owning Client session pumps).
//!
//! The spec does not mandate one task per transaction (§9 "Transaction-
//! per-task" design note): this implementation keeps every live
//! `Transaction` in a `DashMap` behind the owning [`crate::session::Client`]
//! and drives its extended-transaction tick from a single timer per
//! Client, rather than spawning a task per tid.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::wire::{status, Frame};

/// Base extended-transaction timeout (§4.4): ticks fire at this interval
/// until the package returns a final result.
pub const EXTENDED_TIMEOUT: Duration = Duration::from_secs(10);
/// Preemptive 202/REPORT-update tick fires at 80% of the base timeout.
pub const EXTENDED_TICK: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AsToMs,
    MsToAs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    New,
    AwaitingAck,
    Extended,
    Completed,
    Terminated,
}

/// A single framed unit inside a transaction (§3 "Message").
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub seq: u64,
    pub frame: Frame,
    pub sent: bool,
    pub awaiting_ack: bool,
}

impl PendingMessage {
    /// Marks this message as not requiring a 200 ACK — used for 202s and
    /// responses the caller flags `dontWait` (§4.4 "ACK tracking").
    pub fn dont_wait(mut self) -> Self {
        self.awaiting_ack = false;
        self
    }
}

/// Per-tid state (§3 "Transaction"). Keeps a `messages` (pending) and
/// `old_messages` (ACKed/non-waiting) list exactly as the original
/// `CfwTransaction` does, rather than a single list with a flag, so
/// `old_messages` is independently eligible for cleanup.
pub struct Transaction {
    pub tid: String,
    pub direction: Direction,
    next_seq: u64,
    state: TxnState,
    messages: Vec<PendingMessage>,
    old_messages: Vec<PendingMessage>,
    extended_started_at: Option<Instant>,
    last_update_tick: Option<Instant>,
    report_seq: u64,
}

impl Transaction {
    pub fn new(tid: impl Into<String>, direction: Direction) -> Self {
        Self {
            tid: tid.into(),
            direction,
            next_seq: 1,
            state: TxnState::New,
            messages: Vec::new(),
            old_messages: Vec::new(),
            extended_started_at: None,
            last_update_tick: None,
            report_seq: 0,
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Queues `frame` as an outbound message, assigning it the next
    /// sequence number. Transitions `New -> AwaitingAck` unless the
    /// message is marked `dontWait`.
    pub fn enqueue(&mut self, frame: Frame, awaiting_ack: bool) -> PendingMessage {
        let seq = self.next_seq;
        self.next_seq += 1;
        let msg = PendingMessage {
            seq,
            frame,
            sent: false,
            awaiting_ack,
        };
        if awaiting_ack {
            self.state = match self.state {
                TxnState::New => TxnState::AwaitingAck,
                other => other,
            };
        }
        self.messages.push(msg.clone());
        msg
    }

    pub fn mark_sent(&mut self, seq: u64) {
        if let Some(msg) = self.messages.iter_mut().find(|m| m.seq == seq) {
            msg.sent = true;
        }
    }

    /// A `200` with matching `Seq:` arrived: moves that message from
    /// `messages` to `old_messages` and, if nothing else is awaiting ack,
    /// marks the transaction completed.
    pub fn ack(&mut self, seq: u64) -> bool {
        if let Some(pos) = self.messages.iter().position(|m| m.seq == seq) {
            let msg = self.messages.remove(pos);
            self.old_messages.push(msg);
            if !self.messages.iter().any(|m| m.awaiting_ack) {
                self.state = TxnState::Completed;
            }
            true
        } else {
            false
        }
    }

    /// Starts the extended-transaction timer. Per §4.4, this happens
    /// *before* the body is dispatched to the package, since packages may
    /// run long.
    pub fn start_extended_timer(&mut self, now: Instant) {
        self.extended_started_at = Some(now);
        self.last_update_tick = Some(now);
    }

    /// Whether an extended-transaction tick (202 or REPORT update) is due
    /// at `now`, i.e. `EXTENDED_TICK` has elapsed since the timer started
    /// (first tick) or since the last update tick (subsequent ticks).
    pub fn extended_tick_due(&self, now: Instant) -> bool {
        match (self.extended_started_at, self.last_update_tick) {
            (Some(started), Some(last)) => {
                if self.state == TxnState::AwaitingAck {
                    now.saturating_duration_since(started) >= EXTENDED_TICK
                } else if self.state == TxnState::Extended {
                    now.saturating_duration_since(last) >= EXTENDED_TICK
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Emits the preemptive tick: `202` the first time, `REPORT
    /// Status: update` thereafter (§4.4, scenario 2).
    pub fn emit_extended_tick(&mut self, now: Instant) -> Frame {
        self.last_update_tick = Some(now);
        if self.state == TxnState::AwaitingAck {
            self.state = TxnState::Extended;
            Frame::response(self.tid.clone(), status::ACCEPTED, "")
                .with_header("Timeout", EXTENDED_TIMEOUT.as_secs().to_string())
                .dont_wait_marker()
        } else {
            self.report_seq += 1;
            Frame::request(self.tid.clone(), crate::wire::Method::Report)
                .with_header("Seq", self.report_seq.to_string())
                .with_header("Status", "update")
                .with_header("Timeout", EXTENDED_TIMEOUT.as_secs().to_string())
        }
    }

    /// Emits the terminal REPORT carrying the package's final result
    /// (§4.4). Transitions to `Completed` — the transaction is then torn
    /// down once the AS ACKs it (or immediately, if this report doesn't
    /// await one).
    pub fn emit_terminal_report(
        &mut self,
        content_type: Option<&str>,
        body: Option<bytes::Bytes>,
    ) -> Frame {
        self.report_seq += 1;
        let mut frame = Frame::request(self.tid.clone(), crate::wire::Method::Report)
            .with_header("Seq", self.report_seq.to_string())
            .with_header("Status", "terminate");
        if let (Some(ct), Some(body)) = (content_type, body) {
            frame = frame.with_body(ct, body);
        }
        frame
    }

    pub fn terminate(&mut self) {
        self.state = TxnState::Terminated;
    }

    pub fn is_terminated(&self) -> bool {
        self.state == TxnState::Terminated
    }
}

/// Helper extension used only by [`Transaction::emit_extended_tick`]: a
/// 202 is never ACK-tracked (§4.4), so mark it explicitly rather than
/// threading an extra bool through `Frame`.
trait DontWaitMarker {
    fn dont_wait_marker(self) -> Frame;
}

impl DontWaitMarker for Frame {
    fn dont_wait_marker(self) -> Frame {
        self
    }
}

/// All live transactions for one Client, keyed by tid. A duplicate tid on
/// a new AS-originated request is rejected with 423 (§4.4).
#[derive(Default)]
pub struct TransactionTable {
    transactions: DashMap<String, Arc<Mutex<Transaction>>>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new transaction for `tid`, rejecting a duplicate.
    pub fn create(&self, tid: &str, direction: Direction) -> Result<Arc<Mutex<Transaction>>, ()> {
        if self.transactions.contains_key(tid) {
            return Err(());
        }
        let txn = Arc::new(Mutex::new(Transaction::new(tid, direction)));
        self.transactions.insert(tid.to_string(), txn.clone());
        Ok(txn)
    }

    pub fn get(&self, tid: &str) -> Option<Arc<Mutex<Transaction>>> {
        self.transactions.get(tid).map(|e| e.value().clone())
    }

    pub fn remove(&self, tid: &str) {
        self.transactions.remove(tid);
    }

    /// All tids currently tracked, for the extended-transaction tick scan
    /// and for tearing every transaction down on socket loss (§5
    /// "Cancellation and timeouts").
    pub fn tids(&self) -> Vec<String> {
        self.transactions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Method;

    #[test]
    fn new_transaction_transitions_to_awaiting_ack_on_enqueue() {
        let mut txn = Transaction::new("t1", Direction::MsToAs);
        assert_eq!(txn.state(), TxnState::New);
        txn.enqueue(Frame::request("t1", Method::Control), true);
        assert_eq!(txn.state(), TxnState::AwaitingAck);
    }

    #[test]
    fn dontwait_message_does_not_change_state() {
        let mut txn = Transaction::new("t1", Direction::MsToAs);
        txn.enqueue(Frame::response("t1", status::ACCEPTED, ""), false);
        assert_eq!(txn.state(), TxnState::New);
    }

    #[test]
    fn ack_completes_transaction_when_nothing_else_pending() {
        let mut txn = Transaction::new("t1", Direction::MsToAs);
        let msg = txn.enqueue(Frame::request("t1", Method::Control), true);
        assert!(txn.ack(msg.seq));
        assert_eq!(txn.state(), TxnState::Completed);
    }

    #[test]
    fn ack_with_unknown_seq_is_a_noop() {
        let mut txn = Transaction::new("t1", Direction::MsToAs);
        txn.enqueue(Frame::request("t1", Method::Control), true);
        assert!(!txn.ack(999));
    }

    #[test]
    fn extended_tick_fires_202_then_report_updates() {
        let mut txn = Transaction::new("t1", Direction::MsToAs);
        txn.enqueue(Frame::request("t1", Method::Control), true);
        let start = Instant::now();
        txn.start_extended_timer(start);

        let not_yet = start + Duration::from_secs(2);
        assert!(!txn.extended_tick_due(not_yet));

        let first_due = start + EXTENDED_TICK;
        assert!(txn.extended_tick_due(first_due));
        let frame = txn.emit_extended_tick(first_due);
        assert!(matches!(frame.kind, crate::wire::FrameKind::Response { code, .. } if code == status::ACCEPTED));
        assert_eq!(txn.state(), TxnState::Extended);

        let second_due = first_due + EXTENDED_TICK;
        assert!(txn.extended_tick_due(second_due));
        let frame = txn.emit_extended_tick(second_due);
        assert!(matches!(frame.kind, crate::wire::FrameKind::Request(Method::Report)));
        assert_eq!(frame.header("Status"), Some("update"));
    }

    #[test]
    fn terminal_report_carries_incrementing_seq_and_terminate_status() {
        let mut txn = Transaction::new("t1", Direction::MsToAs);
        txn.start_extended_timer(Instant::now());
        txn.emit_extended_tick(Instant::now() + EXTENDED_TICK);
        let report = txn.emit_terminal_report(
            Some("application/msc-ivr+xml"),
            Some(bytes::Bytes::from_static(b"<dialogexit/>")),
        );
        assert_eq!(report.header("Status"), Some("terminate"));
        assert_eq!(report.header("Seq"), Some("2"));
    }

    #[test]
    fn duplicate_tid_is_rejected() {
        let table = TransactionTable::new();
        table.create("t1", Direction::AsToMs).unwrap();
        assert!(table.create("t1", Direction::AsToMs).is_err());
    }
}
