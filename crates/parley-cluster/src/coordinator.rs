//! Transaction Coordinator
//!
//! Authoritative decision state for in-flight transactions and the
//! commit-acknowledgment bookkeeping that releases a waiting operation
//! once every participant has confirmed `doCommit`.
//!
//! The decision map and the commit-wait map are guarded by independent
//! locks; they are never required to be consistent with each other
//! atomically.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

use parley_common::prelude::*;

struct CommitWait {
    /// Participants still owed an acknowledgment. Never zero while the
    /// entry exists: the entry is removed the moment it would reach zero.
    remaining: usize,
    done: Option<oneshot::Sender<()>>,
}

/// Coordinator bookkeeping for in-flight transactions.
pub struct TxnCoordinator {
    next_txn_id: AtomicU64,
    decisions: Mutex<HashMap<TxnId, Decision>>,
    commit_waits: Mutex<HashMap<TxnId, CommitWait>>,
}

impl TxnCoordinator {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            decisions: Mutex::new(HashMap::new()),
            commit_waits: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh transaction id.
    pub fn next_txn(&self) -> TxnId {
        TxnId(self.next_txn_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocate a transaction and record its decision state as `Na`.
    pub fn begin(&self, op: TxnOp, key: impl Into<String>, value: impl Into<String>) -> Transaction {
        let id = self.next_txn();
        self.set_decision(id, Decision::Na);
        Transaction::new(id, op, key, value)
    }

    /// Overwrite the decision for a transaction. No precondition.
    pub fn set_decision(&self, txn: TxnId, decision: Decision) {
        self.decisions.lock().insert(txn, decision);
    }

    /// Current decision, or `Na` for an unknown transaction.
    pub fn decision(&self, txn: TxnId) -> Decision {
        self.decisions.lock().get(&txn).copied().unwrap_or(Decision::Na)
    }

    /// Drop the decision entry once a round fully resolves.
    pub fn clear_decision(&self, txn: TxnId) {
        self.decisions.lock().remove(&txn);
    }

    /// Register the number of `doCommit` acknowledgments the transaction
    /// is owed, returning the signal that fires once they all arrive.
    ///
    /// Re-entry for a transaction with a live wait entry is a logic
    /// error: the live entry is left untouched and the returned receiver
    /// resolves immediately with a recv error.
    pub fn begin_commit_wait(&self, txn: TxnId, expected: usize) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut waits = self.commit_waits.lock();

        if waits.contains_key(&txn) {
            error!(%txn, "commit wait already registered; refusing to overwrite");
            return done_rx;
        }
        if expected == 0 {
            let _ = done_tx.send(());
            return done_rx;
        }

        waits.insert(
            txn,
            CommitWait {
                remaining: expected,
                done: Some(done_tx),
            },
        );
        done_rx
    }

    /// Record one participant's `doCommit` acknowledgment. When the last
    /// one arrives, the waiting operation is released and the entry is
    /// dropped. An acknowledgment for an unknown transaction is logged
    /// and ignored.
    pub fn acknowledge_commit(&self, txn: TxnId) {
        let mut waits = self.commit_waits.lock();
        match waits.get_mut(&txn) {
            Some(wait) => {
                wait.remaining -= 1;
                debug!(%txn, remaining = wait.remaining, "commit acknowledged");
                if wait.remaining == 0 {
                    if let Some(done) = wait.done.take() {
                        let _ = done.send(());
                    }
                    waits.remove(&txn);
                }
            }
            None => {
                warn!(%txn, "commit acknowledgment for unknown transaction; ignoring");
            }
        }
    }

    /// Drop a wait entry whose caller gave up (commit wait timeout).
    /// Late acknowledgments will then hit the unknown-transaction path.
    pub fn abandon_commit_wait(&self, txn: TxnId) {
        if self.commit_waits.lock().remove(&txn).is_some() {
            warn!(%txn, "abandoned commit wait with acknowledgments outstanding");
        }
    }

    /// Acknowledgments still outstanding for a transaction, if any.
    pub fn outstanding_acks(&self, txn: TxnId) -> Option<usize> {
        self.commit_waits.lock().get(&txn).map(|w| w.remaining)
    }
}

impl Default for TxnCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_allocates_and_marks_na() {
        let coordinator = TxnCoordinator::new();

        let txn = coordinator.begin(TxnOp::CreateUser, "alice", "pw");
        assert_eq!(coordinator.decision(txn.id), Decision::Na);

        let other = coordinator.begin(TxnOp::CreateChatroom, "lobby", "alice");
        assert_ne!(txn.id, other.id);
    }

    #[test]
    fn test_decision_lifecycle() {
        let coordinator = TxnCoordinator::new();
        let txn = TxnId(5);

        // Unknown transactions answer Na
        assert_eq!(coordinator.decision(txn), Decision::Na);

        coordinator.set_decision(txn, Decision::Yes);
        assert_eq!(coordinator.decision(txn), Decision::Yes);

        coordinator.clear_decision(txn);
        assert_eq!(coordinator.decision(txn), Decision::Na);
    }

    #[tokio::test]
    async fn test_commit_wait_releases_after_all_acks() {
        let coordinator = TxnCoordinator::new();
        let txn = TxnId(1);

        let done = coordinator.begin_commit_wait(txn, 3);
        coordinator.acknowledge_commit(txn);
        coordinator.acknowledge_commit(txn);
        assert_eq!(coordinator.outstanding_acks(txn), Some(1));

        coordinator.acknowledge_commit(txn);
        done.await.unwrap();
        assert_eq!(coordinator.outstanding_acks(txn), None);
    }

    #[tokio::test]
    async fn test_zero_expected_completes_immediately() {
        let coordinator = TxnCoordinator::new();
        let done = coordinator.begin_commit_wait(TxnId(2), 0);
        done.await.unwrap();
    }

    #[test]
    fn test_unknown_ack_is_ignored() {
        let coordinator = TxnCoordinator::new();
        // Must not panic or create an entry
        coordinator.acknowledge_commit(TxnId(99));
        assert_eq!(coordinator.outstanding_acks(TxnId(99)), None);
    }

    #[tokio::test]
    async fn test_reentry_refused() {
        let coordinator = TxnCoordinator::new();
        let txn = TxnId(3);

        let first = coordinator.begin_commit_wait(txn, 2);
        // Re-entry must not clobber the live count
        let second = coordinator.begin_commit_wait(txn, 1);
        assert!(second.await.is_err());
        assert_eq!(coordinator.outstanding_acks(txn), Some(2));

        coordinator.acknowledge_commit(txn);
        coordinator.acknowledge_commit(txn);
        first.await.unwrap();
    }

    #[test]
    fn test_abandon_then_late_ack() {
        let coordinator = TxnCoordinator::new();
        let txn = TxnId(4);

        let _done = coordinator.begin_commit_wait(txn, 2);
        coordinator.acknowledge_commit(txn);
        coordinator.abandon_commit_wait(txn);

        // The straggler hits the unknown-transaction path; no panic
        coordinator.acknowledge_commit(txn);
        assert_eq!(coordinator.outstanding_acks(txn), None);
    }
}
