// SPDX-License-Identifier: MIT OR Apache-2.0
//! Atomic-lock primitive (§4.14): `acquire`/`release`/`force-release`/
//! `status`, store-backed per the persisted state layout in §6
//! (`forrst_lock:<domain>:<resource>` with `…:meta:owner`,
//! `…:meta:acquired_at`, `…:meta:expires_at` siblings).
//!
//! Grounded on [`crate::store`]'s key-based CAS/TTL contract and the
//! teacher registry's lookup-then-act shape.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use forrst_error::{ErrorCode, ForrstError};
use serde::{Deserialize, Serialize};

use crate::Amount;
use crate::store::Store;

fn meta_owner(key: &str) -> String {
    format!("{key}:meta:owner")
}
fn meta_acquired_at(key: &str) -> String {
    format!("{key}:meta:acquired_at")
}
fn meta_expires_at(key: &str) -> String {
    format!("{key}:meta:expires_at")
}

/// Current status of a lock key, returned by
/// [`LockRegistry::status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockStatus {
    pub key: String,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_remaining: Option<Amount>,
}

/// Result of a successful `release`/`force-release` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResult {
    pub released: bool,
    pub key: String,
    pub forced: bool,
}

/// Store-backed distributed lock registry.
pub struct LockRegistry {
    store: Arc<dyn Store>,
    default_ttl: Duration,
}

impl LockRegistry {
    /// Build a registry over `store`, defaulting new acquisitions to
    /// `default_ttl` when the caller doesn't specify one.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Acquire `key` for `owner`. Fails silently (returns `false`) if
    /// already held by a different owner; succeeds (and refreshes the TTL)
    /// if already held by the same owner.
    pub async fn acquire(&self, key: &str, owner: &str, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let owner_key = meta_owner(key);
        let current = self.store.get(&owner_key).await;
        if let Some(existing) = &current {
            if existing != owner {
                return false;
            }
        }
        let acquired_at = Utc::now();
        let expires_at = acquired_at + chrono::Duration::from_std(ttl).unwrap_or_default();
        self.store.put(&owner_key, owner.to_string(), Some(ttl)).await;
        self.store
            .put(&meta_acquired_at(key), acquired_at.to_rfc3339(), Some(ttl))
            .await;
        self.store
            .put(&meta_expires_at(key), expires_at.to_rfc3339(), Some(ttl))
            .await;
        true
    }

    /// Release `key`, requiring the caller to supply the owner that holds
    /// it.
    ///
    /// # Errors
    ///
    /// Returns `LOCK_NOT_FOUND` if `key` isn't held, or
    /// `LOCK_OWNERSHIP_MISMATCH` if held by a different owner.
    pub async fn release(&self, key: &str, owner: &str) -> Result<ReleaseResult, ForrstError> {
        let owner_key = meta_owner(key);
        let current = self.store.get(&owner_key).await.ok_or_else(|| not_found(key))?;
        if current != owner {
            return Err(ownership_mismatch(key, owner, &current));
        }
        self.store.compare_and_delete(&owner_key, owner).await;
        self.purge_meta(key).await;
        Ok(ReleaseResult { released: true, key: key.to_string(), forced: false })
    }

    /// Release `key` regardless of owner.
    ///
    /// # Errors
    ///
    /// Returns `LOCK_NOT_FOUND` if `key` isn't held.
    pub async fn force_release(&self, key: &str) -> Result<ReleaseResult, ForrstError> {
        let owner_key = meta_owner(key);
        if self.store.get(&owner_key).await.is_none() {
            return Err(not_found(key));
        }
        self.store.delete(&owner_key).await;
        self.purge_meta(key).await;
        Ok(ReleaseResult { released: true, key: key.to_string(), forced: true })
    }

    /// Report the current status of `key`.
    pub async fn status(&self, key: &str) -> LockStatus {
        let owner = self.store.get(&meta_owner(key)).await;
        let Some(owner) = owner else {
            return LockStatus { key: key.to_string(), locked: false, owner: None, acquired_at: None, expires_at: None, ttl_remaining: None };
        };
        let acquired_at = self.store.get(&meta_acquired_at(key)).await.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc));
        let expires_at = self.store.get(&meta_expires_at(key)).await.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc));
        let ttl_remaining = expires_at.map(|exp| {
            let remaining = (exp - Utc::now()).num_seconds().max(0) as u64;
            Amount::seconds(remaining)
        });
        LockStatus { key: key.to_string(), locked: true, owner: Some(owner), acquired_at, expires_at, ttl_remaining }
    }

    async fn purge_meta(&self, key: &str) {
        self.store.delete(&meta_acquired_at(key)).await;
        self.store.delete(&meta_expires_at(key)).await;
    }
}

fn not_found(key: &str) -> ForrstError {
    ForrstError::new(ErrorCode::LockNotFound, format!("lock '{key}' is not held")).with_detail("key", key)
}

fn ownership_mismatch(key: &str, requested_owner: &str, actual_owner: &str) -> ForrstError {
    ForrstError::new(ErrorCode::LockOwnershipMismatch, format!("lock '{key}' is held by a different owner"))
        .with_detail("key", key)
        .with_detail("requested_owner", requested_owner)
        .with_detail("actual_owner", actual_owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn registry() -> LockRegistry {
        LockRegistry::new(Arc::new(InMemoryStore::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn acquire_then_status_reports_locked() {
        let reg = registry();
        assert!(reg.acquire("forrst_lock:p:u:1", "owner-a", None).await);
        let status = reg.status("forrst_lock:p:u:1").await;
        assert!(status.locked);
        assert_eq!(status.owner.as_deref(), Some("owner-a"));
    }

    #[tokio::test]
    async fn status_of_unheld_key_is_unlocked_with_no_extra_fields() {
        let reg = registry();
        let status = reg.status("forrst_lock:p:u:none").await;
        assert!(!status.locked);
        assert!(status.owner.is_none());
    }

    #[tokio::test]
    async fn acquire_fails_for_different_owner_while_held() {
        let reg = registry();
        assert!(reg.acquire("k", "owner-a", None).await);
        assert!(!reg.acquire("k", "owner-b", None).await);
    }

    #[tokio::test]
    async fn release_unheld_key_is_lock_not_found() {
        let reg = registry();
        let err = reg.release("k", "owner-a").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LockNotFound);
    }

    #[tokio::test]
    async fn release_with_wrong_owner_is_ownership_mismatch_and_lock_stays_held() {
        let reg = registry();
        reg.acquire("forrst_lock:p:u:1", "owner-a", None).await;
        let err = reg.release("forrst_lock:p:u:1", "owner-b").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LockOwnershipMismatch);
        let status = reg.status("forrst_lock:p:u:1").await;
        assert!(status.locked);
        assert_eq!(status.owner.as_deref(), Some("owner-a"));
    }

    #[tokio::test]
    async fn release_with_matching_owner_unlocks() {
        let reg = registry();
        reg.acquire("k", "owner-a", None).await;
        let result = reg.release("k", "owner-a").await.unwrap();
        assert!(result.released);
        assert!(!result.forced);
        assert!(!reg.status("k").await.locked);
    }

    #[tokio::test]
    async fn force_release_skips_ownership_check() {
        let reg = registry();
        reg.acquire("k", "owner-a", None).await;
        let result = reg.force_release("k").await.unwrap();
        assert!(result.forced);
        assert!(!reg.status("k").await.locked);
    }

    #[tokio::test]
    async fn force_release_unheld_key_is_lock_not_found() {
        let reg = registry();
        let err = reg.force_release("k").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LockNotFound);
    }
}
