//! Transactional execution with guaranteed cleanup.
//!
//! The coordinator wraps a batch of store operations in one session-scoped
//! transaction: commit on success, abort on any failure, and the session is
//! ended on every path. Callers can neither forget the abort nor leak the
//! session.

use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error};
use uuid::Uuid;

use crate::audit::AccessLogger;
use crate::error::{AppResult, SecurityError};
use crate::store::{SessionStore, StoreSession};

/// Lifecycle state of one coordinated transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Pending,
    Committed,
    Aborted,
}

/// Tracks one transaction's identity and single state transition.
///
/// A context moves from `Pending` to exactly one terminal state; any second
/// transition is a logic error and is rejected.
#[derive(Debug)]
pub struct TransactionContext {
    pub id: String,
    pub started_at: DateTime<Utc>,
    state: TxnState,
}

impl TransactionContext {
    /// Begin tracking a transaction, minting an id when none is supplied.
    pub fn new(id: Option<String>) -> Self {
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            started_at: Utc::now(),
            state: TxnState::Pending,
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Transition to `Committed`. Fails unless currently `Pending`.
    pub fn mark_committed(&mut self) -> AppResult<()> {
        self.transition(TxnState::Committed)
    }

    /// Transition to `Aborted`. Fails unless currently `Pending`.
    pub fn mark_aborted(&mut self) -> AppResult<()> {
        self.transition(TxnState::Aborted)
    }

    fn transition(&mut self, target: TxnState) -> AppResult<()> {
        if self.state != TxnState::Pending {
            return Err(SecurityError::Internal(format!(
                "transaction {} already resolved as {:?}",
                self.id, self.state
            )));
        }
        self.state = target;
        Ok(())
    }
}

/// Runs operation batches under transactional guarantees.
pub struct TransactionCoordinator<S: SessionStore> {
    store: Arc<S>,
    audit: AccessLogger,
}

impl<S: SessionStore> TransactionCoordinator<S> {
    pub fn new(store: Arc<S>, audit: AccessLogger) -> Self {
        Self { store, audit }
    }

    /// Execute `ops` inside one transaction.
    ///
    /// Begins a session and transaction, runs the batch, and commits on
    /// success. Any failure — in the batch or in the commit itself — aborts
    /// the transaction and surfaces as `TransactionAborted`. The session is
    /// ended on every path.
    pub async fn execute_secure_transaction<T, F>(
        &self,
        txn_id: Option<String>,
        ops: F,
    ) -> AppResult<T>
    where
        T: Send,
        F: for<'s> FnOnce(
                &'s mut S::Session,
            )
                -> Pin<Box<dyn Future<Output = AppResult<T>> + Send + 's>>
            + Send,
    {
        let mut context = TransactionContext::new(txn_id);
        let mut session = self.store.start_session().await?;

        if let Err(e) = session.start_transaction().await {
            session.end_session().await;
            return Err(e);
        }
        self.audit.transaction(&context.id, "begin");
        debug!(txn_id = %context.id, "Transaction started");

        let outcome = match ops(&mut session).await {
            Ok(value) => match session.commit_transaction().await {
                Ok(()) => {
                    context.mark_committed()?;
                    self.audit.transaction(&context.id, "commit");
                    crate::metrics::record_transaction("committed");
                    Ok(value)
                }
                Err(commit_err) => {
                    // Commit failure leaves the transaction open; abort it
                    if let Err(abort_err) = session.abort_transaction().await {
                        error!(
                            txn_id = %context.id,
                            error = %abort_err,
                            "Abort after failed commit also failed"
                        );
                    }
                    context.mark_aborted()?;
                    self.audit.transaction(&context.id, "abort");
                    crate::metrics::record_transaction("aborted");
                    Err(SecurityError::TransactionAborted(format!(
                        "commit failed: {commit_err}"
                    )))
                }
            },
            Err(ops_err) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    error!(
                        txn_id = %context.id,
                        error = %abort_err,
                        "Abort failed after operation error"
                    );
                }
                context.mark_aborted()?;
                self.audit.transaction(&context.id, "abort");
                crate::metrics::record_transaction("aborted");
                Err(SecurityError::TransactionAborted(ops_err.to_string()))
            }
        };

        session.end_session().await;
        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn coordinator(store: &Arc<MemoryStore>) -> TransactionCoordinator<MemoryStore> {
        TransactionCoordinator::new(Arc::clone(store), AccessLogger::new())
    }

    #[test]
    fn test_context_single_transition() {
        let mut ctx = TransactionContext::new(Some("txn-1".to_string()));
        assert_eq!(ctx.state(), TxnState::Pending);

        ctx.mark_committed().unwrap();
        assert_eq!(ctx.state(), TxnState::Committed);
        assert!(ctx.mark_aborted().is_err());
        assert!(ctx.mark_committed().is_err());
    }

    #[test]
    fn test_context_mints_id_when_absent() {
        let ctx = TransactionContext::new(None);
        assert!(!ctx.id.is_empty());
        let other = TransactionContext::new(None);
        assert_ne!(ctx.id, other.id);
    }

    #[tokio::test]
    async fn test_successful_batch_commits() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(&store);

        let result = coordinator
            .execute_secure_transaction(None, |session| {
                Box::pin(async move {
                    session.insert("memories", json!({ "title": "a" })).await?;
                    session.insert("memories", json!({ "title": "b" })).await?;
                    Ok(2_usize)
                })
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(store.committed_docs("memories").len(), 2);
    }

    #[tokio::test]
    async fn test_failing_batch_aborts_all_writes() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(&store);

        let result: AppResult<()> = coordinator
            .execute_secure_transaction(None, |session| {
                Box::pin(async move {
                    session.insert("memories", json!({ "title": "a" })).await?;
                    Err(SecurityError::Validation("boom".to_string()))
                })
            })
            .await;

        assert!(matches!(result, Err(SecurityError::TransactionAborted(_))));
        assert!(
            store.committed_docs("memories").is_empty(),
            "partial writes must not survive an abort"
        );
    }

    #[tokio::test]
    async fn test_supplied_txn_id_is_used() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(&store);

        // Supplied ids are accepted and the batch still commits
        coordinator
            .execute_secure_transaction(Some("txn-custom".to_string()), |session| {
                Box::pin(async move {
                    session.insert("memories", json!({ "title": "x" })).await
                })
            })
            .await
            .unwrap();
        assert_eq!(store.committed_docs("memories").len(), 1);
    }
}
