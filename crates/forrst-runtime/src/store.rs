// SPDX-License-Identifier: MIT OR Apache-2.0
//! Abstract external key/value store backing the lock, cancellation, and
//! replay collaborators.
//!
//! Per the concurrency model, the pipeline core never holds an internal
//! mutex across a suspension point: lock, cancellation, and replay state all
//! live in an externally shared store reachable only through compare-and-swap
//! or TTL-bounded operations. [`Store`] is that seam; [`InMemoryStore`] is a
//! reference implementation suitable for a single-process deployment or
//! tests, in the same spirit the teacher crate's `ReceiptStore` persisted
//! receipts to a directory — the entries here are just key/value pairs with
//! an optional expiry instead of one file per run id.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A value as held by the store, with its absolute expiry if any.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// External key/value collaborator used by the lock, cancellation, and
/// replay subsystems.
///
/// All mutating operations are atomic with respect to the stored key: a
/// caller racing another worker observes either the pre- or post-state of a
/// [`compare_and_swap`](Store::compare_and_swap)/[`compare_and_delete`](Store::compare_and_delete)
/// call, never a torn write.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the current value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Option<String>;

    /// Unconditionally write `value` for `key`, with an optional TTL.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>);

    /// Write `new` for `key` only if the current value equals `expected`
    /// (`None` meaning "key absent or expired"). Returns whether the swap
    /// took effect.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: String,
        ttl: Option<Duration>,
    ) -> bool;

    /// Delete `key` only if its current value equals `expected`. Returns
    /// whether the key was removed.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> bool;

    /// Unconditionally delete `key`. Returns whether a live entry was
    /// removed.
    async fn delete(&self, key: &str) -> bool;
}

/// In-process [`Store`] implementation backed by a mutex-guarded map.
///
/// Suitable for a single-process deployment or tests; a production
/// multi-process deployment would back [`Store`] with something like Redis
/// or a SQL table instead, without the rest of the runtime noticing.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn expiry(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        match entries.get(key) {
            Some(e) if e.is_live(now) => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Self::expiry(ttl),
            },
        );
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: String,
        ttl: Option<Duration>,
    ) -> bool {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let current = entries.get(key).filter(|e| e.is_live(now)).map(|e| e.value.as_str());
        if current != expected {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: new,
                expires_at: Self::expiry(ttl),
            },
        );
        true
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> bool {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let matches = entries
            .get(key)
            .is_some_and(|e| e.is_live(now) && e.value == expected);
        if matches {
            entries.remove(key);
        }
        matches
    }

    async fn delete(&self, key: &str) -> bool {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        match entries.remove(key) {
            Some(e) => e.is_live(now),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("nope").await, None);
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryStore::new();
        store.put("k", "v".into(), None).await;
        assert_eq!(store.get("k").await, Some("v".into()));
    }

    #[tokio::test]
    async fn compare_and_swap_succeeds_when_expected_matches() {
        let store = InMemoryStore::new();
        store.put("k", "a".into(), None).await;
        assert!(store.compare_and_swap("k", Some("a"), "b".into(), None).await);
        assert_eq!(store.get("k").await, Some("b".into()));
    }

    #[tokio::test]
    async fn compare_and_swap_fails_when_expected_mismatches() {
        let store = InMemoryStore::new();
        store.put("k", "a".into(), None).await;
        assert!(!store.compare_and_swap("k", Some("wrong"), "b".into(), None).await);
        assert_eq!(store.get("k").await, Some("a".into()));
    }

    #[tokio::test]
    async fn compare_and_swap_creates_absent_key_when_expected_none() {
        let store = InMemoryStore::new();
        assert!(store.compare_and_swap("k", None, "a".into(), None).await);
        assert_eq!(store.get("k").await, Some("a".into()));
    }

    #[tokio::test]
    async fn compare_and_delete_removes_on_match() {
        let store = InMemoryStore::new();
        store.put("k", "owner-a".into(), None).await;
        assert!(store.compare_and_delete("k", "owner-a").await);
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn compare_and_delete_leaves_key_on_mismatch() {
        let store = InMemoryStore::new();
        store.put("k", "owner-a".into(), None).await;
        assert!(!store.compare_and_delete("k", "owner-b").await);
        assert_eq!(store.get("k").await, Some("owner-a".into()));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let store = InMemoryStore::new();
        store.put("k", "v".into(), Some(Duration::from_millis(1))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn delete_reports_whether_a_live_entry_was_removed() {
        let store = InMemoryStore::new();
        assert!(!store.delete("k").await);
        store.put("k", "v".into(), None).await;
        assert!(store.delete("k").await);
    }
}
