//! Two-Phase Commit Engine
//!
//! Drives the `canCommit -> doCommit|doAbort` protocol against data-node
//! participants. Unreachable participants are skipped rather than counted
//! as NO votes unless `require_full_quorum` is set; an explicit NO always
//! aborts. The commit-acknowledgment wait is bounded by
//! `commit_wait_timeout`.
//!
//! Rounds are serialized through a single engine-wide lock: concurrent
//! transactions never interleave their decision state. This trades
//! throughput for the absence of interleaved-decision races.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use parley_common::prelude::*;

use crate::coordinator::TxnCoordinator;
use crate::transport::NodeRpc;

struct VoteOutcome {
    /// Participants that answered the vote at all
    reached: Vec<Endpoint>,
    /// Subset of `reached` that voted yes
    yes: Vec<Endpoint>,
    /// Whether any participant voted an explicit no
    rejected: bool,
}

/// Runs two-phase-commit rounds against a set of participant endpoints.
pub struct TwoPhaseEngine {
    coordinator: Arc<TxnCoordinator>,
    rpc: Arc<dyn NodeRpc>,
    config: TwoPhaseConfig,
    round_lock: AsyncMutex<()>,
}

impl TwoPhaseEngine {
    pub fn new(
        coordinator: Arc<TxnCoordinator>,
        rpc: Arc<dyn NodeRpc>,
        config: TwoPhaseConfig,
    ) -> Self {
        Self {
            coordinator,
            rpc,
            config,
            round_lock: AsyncMutex::new(()),
        }
    }

    /// Run a full round with no interleaved side effect.
    pub async fn run(&self, txn: &Transaction, participants: &[Endpoint]) -> Result<()> {
        self.run_with_side_effect(txn, participants, || async { Ok(()) })
            .await
    }

    /// Run a full round with a side effect between the vote and the
    /// commit broadcast. The ordering is the protocol's key invariant:
    /// the effect runs only after every reached participant voted yes,
    /// and `doCommit` is issued only after the effect succeeded. An
    /// effect failure forces an abort despite the yes votes.
    pub async fn run_with_side_effect<F, Fut>(
        &self,
        txn: &Transaction,
        participants: &[Endpoint],
        effect: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let _round = self.round_lock.lock().await;
        self.coordinator.set_decision(txn.id, Decision::Na);

        let outcome = self.collect_votes(txn, participants).await;

        if outcome.reached.is_empty() {
            self.coordinator.clear_decision(txn.id);
            return Err(TransactionError::NoParticipants(txn.id.0).into());
        }
        if outcome.rejected {
            self.abort(txn, &outcome.yes).await;
            return Err(TransactionError::Rejected(txn.id.0).into());
        }
        if self.config.require_full_quorum && outcome.reached.len() < participants.len() {
            info!(
                txn = %txn.id,
                reached = outcome.reached.len(),
                expected = participants.len(),
                "aborting: full quorum required but some participants were unreachable"
            );
            self.abort(txn, &outcome.yes).await;
            return Err(TransactionError::QuorumIncomplete(txn.id.0).into());
        }

        if let Err(e) = effect().await {
            warn!(txn = %txn.id, error = %e, "side effect failed after yes votes; aborting");
            self.abort(txn, &outcome.yes).await;
            return Err(e);
        }

        self.commit(txn, outcome.yes).await
    }

    /// Phase 1: collect votes from every participant concurrently.
    /// Unreachable participants are logged and excluded from the vote
    /// denominator; they never count as a NO.
    async fn collect_votes(&self, txn: &Transaction, participants: &[Endpoint]) -> VoteOutcome {
        let votes = futures::future::join_all(participants.iter().map(|ep| {
            let rpc = self.rpc.clone();
            let txn = txn.clone();
            let ep = ep.clone();
            async move {
                let vote = rpc.can_commit(&ep, &txn).await;
                (ep, vote)
            }
        }))
        .await;

        let mut outcome = VoteOutcome {
            reached: Vec::new(),
            yes: Vec::new(),
            rejected: false,
        };
        for (ep, vote) in votes {
            match vote {
                Ok(Vote::Yes) => {
                    outcome.reached.push(ep.clone());
                    outcome.yes.push(ep);
                }
                Ok(Vote::No) => {
                    info!(txn = %txn.id, endpoint = %ep, "participant voted no");
                    outcome.reached.push(ep);
                    outcome.rejected = true;
                }
                Err(e) => {
                    warn!(
                        txn = %txn.id,
                        endpoint = %ep,
                        error = %e,
                        "participant unreachable during vote; skipping"
                    );
                }
            }
        }
        outcome
    }

    /// Phase 2b: broadcast `doCommit` as one task per participant, each
    /// reporting completion through the coordinator, then wait for the
    /// completion signal. A participant that fails during `doCommit` is
    /// logged but still counted so the caller can never block forever.
    async fn commit(&self, txn: &Transaction, targets: Vec<Endpoint>) -> Result<()> {
        self.coordinator.set_decision(txn.id, Decision::Yes);
        let done = self.coordinator.begin_commit_wait(txn.id, targets.len());

        for ep in targets {
            let rpc = self.rpc.clone();
            let coordinator = self.coordinator.clone();
            let txn = txn.clone();
            tokio::spawn(async move {
                if let Err(e) = rpc.do_commit(&ep, &txn).await {
                    warn!(
                        txn = %txn.id,
                        endpoint = %ep,
                        error = %e,
                        "doCommit failed; counting toward completion"
                    );
                }
                coordinator.acknowledge_commit(txn.id);
            });
        }

        let waited = tokio::time::timeout(self.config.commit_wait_timeout, done).await;
        self.coordinator.clear_decision(txn.id);
        match waited {
            Ok(Ok(())) => {
                debug!(txn = %txn.id, "transaction committed");
                Ok(())
            }
            Ok(Err(_)) => {
                // The completion sender was dropped without firing, which
                // only happens when the wait registration was refused.
                Err(TransactionError::WaitInProgress(txn.id.0).into())
            }
            Err(_) => {
                warn!(txn = %txn.id, "timed out waiting for commit acknowledgments");
                self.coordinator.abandon_commit_wait(txn.id);
                Err(TransactionError::CommitTimeout(txn.id.0).into())
            }
        }
    }

    /// Phase 2a: broadcast `doAbort` to the participants that voted yes.
    /// A participant that voted no already refused and is not contacted.
    async fn abort(&self, txn: &Transaction, targets: &[Endpoint]) {
        self.coordinator.set_decision(txn.id, Decision::No);

        futures::future::join_all(targets.iter().map(|ep| {
            let rpc = self.rpc.clone();
            let txn = txn.clone();
            let ep = ep.clone();
            async move {
                if let Err(e) = rpc.do_abort(&ep, &txn).await {
                    warn!(txn = %txn.id, endpoint = %ep, error = %e, "doAbort failed");
                }
            }
        }))
        .await;

        self.coordinator.clear_decision(txn.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InMemoryRpc, RpcCall};
    use std::time::Duration;

    fn engine_with(rpc: Arc<InMemoryRpc>, config: TwoPhaseConfig) -> TwoPhaseEngine {
        TwoPhaseEngine::new(Arc::new(TxnCoordinator::new()), rpc, config)
    }

    fn participants(rpc: &InMemoryRpc, count: usize) -> Vec<Endpoint> {
        (1..=count)
            .map(|i| {
                let ep = Endpoint::new(format!("data-{}", i), 8001);
                rpc.add_node(ep.clone());
                ep
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_yes_commits_everywhere() {
        let rpc = Arc::new(InMemoryRpc::new());
        let parts = participants(&rpc, 3);
        let engine = engine_with(rpc.clone(), TwoPhaseConfig::default());

        let txn = Transaction::new(TxnId(1), TxnOp::CreateUser, "alice", "pw");
        engine.run(&txn, &parts).await.unwrap();

        for ep in &parts {
            assert!(rpc.node(ep).unwrap().users.contains_key("alice"));
        }
        assert_eq!(rpc.count_calls(|c| matches!(c, RpcCall::DoCommit(..))), 3);
        assert_eq!(rpc.count_calls(|c| matches!(c, RpcCall::DoAbort(..))), 0);
    }

    #[tokio::test]
    async fn test_one_no_aborts_the_yes_voters() {
        let rpc = Arc::new(InMemoryRpc::new());
        let parts = participants(&rpc, 3);
        rpc.set_vote(&parts[1], Vote::No);
        let engine = engine_with(rpc.clone(), TwoPhaseConfig::default());

        let txn = Transaction::new(TxnId(2), TxnOp::CreateUser, "bob", "pw");
        let err = engine.run(&txn, &parts).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::Rejected(_))
        ));

        // Abort reaches the yes voters only; no commit anywhere
        let aborted: Vec<_> = rpc
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                RpcCall::DoAbort(ep, _) => Some(ep),
                _ => None,
            })
            .collect();
        assert_eq!(aborted.len(), 2);
        assert!(!aborted.contains(&parts[1]));
        assert_eq!(rpc.count_calls(|c| matches!(c, RpcCall::DoCommit(..))), 0);
    }

    #[tokio::test]
    async fn test_fail_skip_commits_without_unreachable() {
        let rpc = Arc::new(InMemoryRpc::new());
        let parts = participants(&rpc, 3);
        rpc.set_reachable(&parts[2], false);
        let engine = engine_with(rpc.clone(), TwoPhaseConfig::default());

        let txn = Transaction::new(TxnId(3), TxnOp::CreateUser, "carol", "pw");
        engine.run(&txn, &parts).await.unwrap();

        // Commit reached only the two live participants
        assert_eq!(rpc.count_calls(|c| matches!(c, RpcCall::DoCommit(..))), 2);
        assert!(rpc.node(&parts[0]).unwrap().users.contains_key("carol"));
        assert!(!rpc.node(&parts[2]).unwrap().users.contains_key("carol"));
    }

    #[tokio::test]
    async fn test_full_quorum_aborts_on_unreachable() {
        let rpc = Arc::new(InMemoryRpc::new());
        let parts = participants(&rpc, 3);
        rpc.set_reachable(&parts[2], false);
        let engine = engine_with(
            rpc.clone(),
            TwoPhaseConfig {
                require_full_quorum: true,
                ..TwoPhaseConfig::default()
            },
        );

        let txn = Transaction::new(TxnId(4), TxnOp::CreateUser, "dave", "pw");
        let err = engine.run(&txn, &parts).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::QuorumIncomplete(_))
        ));
        assert_eq!(rpc.count_calls(|c| matches!(c, RpcCall::DoCommit(..))), 0);
        assert_eq!(rpc.count_calls(|c| matches!(c, RpcCall::DoAbort(..))), 2);
    }

    #[tokio::test]
    async fn test_no_reachable_participants_fails() {
        let rpc = Arc::new(InMemoryRpc::new());
        let parts = participants(&rpc, 2);
        for ep in &parts {
            rpc.set_reachable(ep, false);
        }
        let engine = engine_with(rpc.clone(), TwoPhaseConfig::default());

        let txn = Transaction::new(TxnId(5), TxnOp::CreateUser, "erin", "pw");
        let err = engine.run(&txn, &parts).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::NoParticipants(_))
        ));
    }

    #[tokio::test]
    async fn test_side_effect_failure_forces_abort() {
        let rpc = Arc::new(InMemoryRpc::new());
        let parts = participants(&rpc, 2);
        let engine = engine_with(rpc.clone(), TwoPhaseConfig::default());

        let txn = Transaction::new(TxnId(6), TxnOp::CreateChatroom, "lobby", "alice");
        let err = engine
            .run_with_side_effect(&txn, &parts, || async {
                Err(Error::internal("chat node refused"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        // Yes votes were collected, then aborted; doCommit never issued
        assert_eq!(rpc.count_calls(|c| matches!(c, RpcCall::CanCommit(..))), 2);
        assert_eq!(rpc.count_calls(|c| matches!(c, RpcCall::DoAbort(..))), 2);
        assert_eq!(rpc.count_calls(|c| matches!(c, RpcCall::DoCommit(..))), 0);
    }

    #[tokio::test]
    async fn test_side_effect_runs_only_after_yes_votes() {
        let rpc = Arc::new(InMemoryRpc::new());
        let parts = participants(&rpc, 2);
        rpc.set_vote(&parts[0], Vote::No);
        let engine = engine_with(rpc.clone(), TwoPhaseConfig::default());

        let effect_ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = effect_ran.clone();

        let txn = Transaction::new(TxnId(7), TxnOp::CreateChatroom, "lobby", "alice");
        let _ = engine
            .run_with_side_effect(&txn, &parts, || async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(!effect_ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_commit_wait_timeout() {
        let rpc = Arc::new(InMemoryRpc::new());
        let parts = participants(&rpc, 1);
        rpc.set_ack_delay(&parts[0], Duration::from_secs(5));
        let engine = engine_with(
            rpc.clone(),
            TwoPhaseConfig {
                commit_wait_timeout: Duration::from_millis(100),
                ..TwoPhaseConfig::default()
            },
        );

        let txn = Transaction::new(TxnId(8), TxnOp::CreateUser, "frank", "pw");
        let err = engine.run(&txn, &parts).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::CommitTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_decision_cleared_after_round() {
        let rpc = Arc::new(InMemoryRpc::new());
        let parts = participants(&rpc, 2);
        let coordinator = Arc::new(TxnCoordinator::new());
        let engine =
            TwoPhaseEngine::new(coordinator.clone(), rpc.clone(), TwoPhaseConfig::default());

        let txn = coordinator.begin(TxnOp::CreateUser, "grace", "pw");
        engine.run(&txn, &parts).await.unwrap();
        assert_eq!(coordinator.decision(txn.id), Decision::Na);

        rpc.set_vote(&parts[0], Vote::No);
        let txn = coordinator.begin(TxnOp::CreateUser, "heidi", "pw");
        let _ = engine.run(&txn, &parts).await;
        assert_eq!(coordinator.decision(txn.id), Decision::Na);
    }
}
