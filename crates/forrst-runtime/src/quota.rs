// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rate-limit and quota reporters (§4.10): advisory response extensions
//! that must never block the pipeline.
//!
//! Grounded on the teacher crate's `RateLimitStage` (timestamp-window
//! counting) and `RunMetrics` (atomic-counter snapshot), generalized from
//! pipeline stages into standalone reporter traits the bus's advisory
//! extensions call into — failure here is logged and skipped, never
//! propagated as a fatal error, matching §4.10's "MUST NOT block" rule.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Amount;

/// The scope a rate limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Service,
    Function,
    User,
}

/// Response-side `urn:cline:forrst:ext:rate-limit` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitReport {
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub window: Amount,
    pub resets_in: Amount,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<bool>,
}

impl RateLimitReport {
    /// Build a report, deriving `remaining` and a near-limit `warning` at
    /// the default 90% threshold.
    #[must_use]
    pub fn new(limit: u64, used: u64, window_seconds: u64, resets_in_seconds: u64, scope: Scope) -> Self {
        let remaining = limit.saturating_sub(used);
        let warning = near_limit(limit, used, 0.90);
        Self {
            limit,
            used,
            remaining,
            window: Amount::seconds(window_seconds),
            resets_in: Amount::seconds(resets_in_seconds),
            scope,
            warning: Some(warning),
        }
    }

    /// `true` once `used >= limit`.
    #[must_use]
    pub fn exceeded(&self) -> bool {
        self.used >= self.limit
    }
}

/// Response-side entry contributed by a `urn:cline:forrst:ext:quota`
/// payload. A single request may report multiple quota entries (e.g.
/// daily call count and monthly data volume).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaEntry {
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub period: String,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
}

impl QuotaEntry {
    /// Build an entry, deriving `remaining`.
    #[must_use]
    pub fn new(type_: impl Into<String>, name: impl Into<String>, limit: u64, used: u64, period: impl Into<String>, unit: impl Into<String>, resets_at: Option<DateTime<Utc>>) -> Self {
        Self {
            type_: type_.into(),
            name: name.into(),
            limit,
            used,
            remaining: limit.saturating_sub(used),
            period: period.into(),
            unit: unit.into(),
            resets_at,
        }
    }

    /// `true` once usage crosses the given threshold fraction (default 80%
    /// per §4.10).
    #[must_use]
    pub fn near_limit(&self, threshold: f64) -> bool {
        near_limit(self.limit, self.used, threshold)
    }

    /// `true` once `used >= limit`.
    #[must_use]
    pub fn exceeded(&self) -> bool {
        self.used >= self.limit
    }
}

fn near_limit(limit: u64, used: u64, threshold: f64) -> bool {
    if limit == 0 {
        return true;
    }
    (used as f64) >= (limit as f64) * threshold
}

/// Advisory collaborator contributing a rate-limit report for a request.
/// Implementations MUST NOT block the pipeline; a reporter that cannot
/// produce a report in time should be skipped by its caller rather than
/// awaited indefinitely.
pub trait RateLimitReporter: Send + Sync {
    /// Produce a rate-limit report for `scope_key` (e.g. a user or
    /// function URN), or `None` if no limit applies / the reporter failed.
    fn report(&self, scope_key: &str) -> Option<RateLimitReport>;
}

/// Advisory collaborator contributing quota entries for a request.
pub trait QuotaReporter: Send + Sync {
    /// Produce zero or more quota entries for `scope_key`.
    fn report(&self, scope_key: &str) -> Vec<QuotaEntry>;
}

struct Window {
    count: u64,
    started_at: Instant,
}

/// Default [`RateLimitReporter`] using a fixed-size sliding window counted
/// per scope key, in the spirit of the teacher's `RateLimitStage`.
pub struct WindowedRateLimiter {
    limit: u64,
    window: Duration,
    scope: Scope,
    windows: Mutex<HashMap<String, Window>>,
}

impl WindowedRateLimiter {
    /// Create a limiter admitting up to `limit` calls per `window` per
    /// scope key, reported under `scope`.
    #[must_use]
    pub fn new(limit: u64, window: Duration, scope: Scope) -> Self {
        Self { limit, window, scope, windows: Mutex::new(HashMap::new()) }
    }

    /// Record one call against `scope_key`, returning the report for the
    /// call just recorded.
    pub fn record(&self, scope_key: &str) -> RateLimitReport {
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        let entry = windows.entry(scope_key.to_string()).or_insert_with(|| Window { count: 0, started_at: now });
        if now.duration_since(entry.started_at) >= self.window {
            entry.count = 0;
            entry.started_at = now;
        }
        entry.count += 1;
        let resets_in = self.window.saturating_sub(now.duration_since(entry.started_at));
        RateLimitReport::new(self.limit, entry.count, self.window.as_secs(), resets_in.as_secs(), self.scope)
    }
}

impl RateLimitReporter for WindowedRateLimiter {
    fn report(&self, scope_key: &str) -> Option<RateLimitReport> {
        Some(self.record(scope_key))
    }
}
