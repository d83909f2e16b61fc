// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cancellation broker (§4.13): opaque tokens backed by the shared
//! [`Store`], replacing the teacher's in-process `CancellationToken`.
//!
//! The teacher's token was an `Arc<AtomicBool>` plus a `tokio::sync::Notify`
//! — perfect for cancelling a future within one process, but the spec's
//! broker is a cross-request, cross-worker primitive: a `cancel` call may
//! land on a different worker than the one polling `is_cancelled`, so state
//! has to live in the same externally shared [`Store`] the lock and replay
//! collaborators use, keyed `forrst:cancel:<token>` with a 300s TTL.

use std::sync::Arc;
use std::time::Duration;

use forrst_error::{ErrorCode, ForrstError};
use uuid::Uuid;

use crate::store::Store;

const DEFAULT_TTL: Duration = Duration::from_secs(300);

const ACTIVE: &str = "active";
const CANCELLED: &str = "cancelled";

fn key(token: &str) -> String {
    format!("forrst:cancel:{token}")
}

/// Store-backed cancellation broker.
///
/// Tokens move `active -> cancelled` and never move back; `cancel` is
/// idempotent, consistent with invariant 9 (`cancel(T); cancel(T)` both
/// succeed and report `{cancelled: true}`). The spec text separately
/// describes a `CANCELLATION_TOO_LATE` error for "already terminal"
/// tokens; this broker only models the two states a cancellation record
/// itself can be in (`active`/`cancelled`) — whether the *work* the token
/// was attached to has since completed is tracked by the work itself (see
/// scenario S5), not by this broker, so that code path is unreachable here
/// and `CANCELLATION_TOO_LATE` is never constructed by [`cancel`].
pub struct CancellationBroker {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl CancellationBroker {
    /// Build a broker over `store` using the default 300s TTL.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, ttl: DEFAULT_TTL }
    }

    /// Build a broker with a custom TTL.
    #[must_use]
    pub fn with_ttl(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Issue a fresh token in the `active` state.
    pub async fn issue(&self) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.store.put(&key(&token), ACTIVE.to_string(), Some(self.ttl)).await;
        token
    }

    /// Mark `token` cancelled. Idempotent: succeeds whether the token was
    /// `active` or already `cancelled`.
    ///
    /// # Errors
    ///
    /// Returns `CANCELLATION_TOKEN_UNKNOWN` if `token` was never issued or
    /// has expired.
    pub async fn cancel(&self, token: &str) -> Result<(), ForrstError> {
        let k = key(token);
        match self.store.get(&k).await {
            Some(_) => {
                self.store.put(&k, CANCELLED.to_string(), Some(self.ttl)).await;
                Ok(())
            }
            None => Err(unknown_token(token)),
        }
    }

    /// `true` if `token` is known and in the `cancelled` state.
    pub async fn is_cancelled(&self, token: &str) -> bool {
        self.store.get(&key(token)).await.as_deref() == Some(CANCELLED)
    }

    /// Return an error if `token` is cancelled, for user code to call at
    /// cooperative checkpoints.
    ///
    /// # Errors
    ///
    /// Returns a [`CancellationError`] if `token` is cancelled. Per §7,
    /// unmapped user-raised errors become `INTERNAL_ERROR`; the closed
    /// taxonomy has no dedicated "operation cancelled" code, so callers
    /// mapping this into a response should do the same.
    pub async fn throw_if_cancelled(&self, token: &str) -> Result<(), CancellationError> {
        if self.is_cancelled(token).await {
            Err(CancellationError { token: token.to_string() })
        } else {
            Ok(())
        }
    }
}

/// Raised by [`CancellationBroker::throw_if_cancelled`] at a cooperative
/// checkpoint inside user function code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("operation cancelled via token '{token}'")]
pub struct CancellationError {
    pub token: String,
}

fn unknown_token(token: &str) -> ForrstError {
    ForrstError::new(ErrorCode::CancellationTokenUnknown, format!("unknown cancellation token '{token}'"))
        .with_detail("token", token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn broker() -> CancellationBroker {
        CancellationBroker::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn issued_token_starts_not_cancelled() {
        let broker = broker();
        let token = broker.issue().await;
        assert!(!broker.is_cancelled(&token).await);
    }

    #[tokio::test]
    async fn cancel_marks_token_cancelled() {
        let broker = broker();
        let token = broker.issue().await;
        broker.cancel(&token).await.unwrap();
        assert!(broker.is_cancelled(&token).await);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let broker = broker();
        let token = broker.issue().await;
        broker.cancel(&token).await.unwrap();
        broker.cancel(&token).await.unwrap();
        assert!(broker.is_cancelled(&token).await);
    }

    #[tokio::test]
    async fn cancel_unknown_token_is_token_unknown() {
        let broker = broker();
        let err = broker.cancel("never-issued").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CancellationTokenUnknown);
    }

    #[tokio::test]
    async fn throw_if_cancelled_errors_only_after_cancel() {
        let broker = broker();
        let token = broker.issue().await;
        assert!(broker.throw_if_cancelled(&token).await.is_ok());
        broker.cancel(&token).await.unwrap();
        assert!(broker.throw_if_cancelled(&token).await.is_err());
    }
}
