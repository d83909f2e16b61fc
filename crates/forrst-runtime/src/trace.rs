// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-request tracing context and the request-scoped handle threaded
//! through the pipeline.
//!
//! Grounded on the teacher crate's `Span`/`RuntimeObserver` pair, adapted to
//! the wire-visible shape §4.8 requires: a 128-bit `trace_id`, a fresh
//! 64-bit `span_id` per hop, and an explicit `parent_span_id` rather than a
//! tree walked through a collector. IDs are derived from [`uuid::Uuid`]
//! rather than a `rand` dependency, keeping the crate's third-party surface
//! aligned with the rest of the workspace.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::Amount;

/// Caller-supplied tracing options, parsed out of a request's `context`
/// member (typically under a `urn:cline:forrst:ext:tracing` key).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceOptions {
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub baggage: Option<Map<String, Value>>,
}

fn random_hex_128() -> String {
    Uuid::new_v4().simple().to_string()
}

fn random_hex_64() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Live tracing context for one request, opened at `ExecutingFunction` and
/// closed at `FunctionExecuted`.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub baggage: Map<String, Value>,
    start: Instant,
}

impl TraceContext {
    /// Open a context from request-supplied options. A request without a
    /// `trace_id` gets a freshly generated one; a request with a `span_id`
    /// has that value carried forward as this hop's `parent_span_id`, with
    /// a new `span_id` generated for this server regardless.
    #[must_use]
    pub fn begin(options: &TraceOptions) -> Self {
        Self {
            trace_id: options.trace_id.clone().unwrap_or_else(random_hex_128),
            span_id: random_hex_64(),
            parent_span_id: options.span_id.clone(),
            baggage: options.baggage.clone().unwrap_or_default(),
            start: Instant::now(),
        }
    }

    /// Derive a child context (e.g. for a nested outbound call), carrying
    /// `trace_id` and `baggage` forward and making this context's
    /// `span_id` the child's `parent_span_id`.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: random_hex_64(),
            parent_span_id: Some(self.span_id.clone()),
            baggage: self.baggage.clone(),
            start: Instant::now(),
        }
    }

    /// Close the context, producing the response-side tracing extension
    /// payload. Duration is rounded to the nearest millisecond.
    #[must_use]
    pub fn finish(self) -> TracingExtension {
        let elapsed = self.start.elapsed();
        TracingExtension {
            trace_id: self.trace_id,
            span_id: self.span_id,
            duration: Amount::milliseconds(round_to_nearest_ms(elapsed)),
        }
    }
}

fn round_to_nearest_ms(elapsed: Duration) -> u64 {
    let nanos = elapsed.as_nanos();
    ((nanos + 500_000) / 1_000_000) as u64
}

/// Response-side `urn:cline:forrst:ext:tracing` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingExtension {
    pub trace_id: String,
    pub span_id: String,
    pub duration: Amount,
}

/// Per-request state threaded through the pipeline: tracing, cancellation,
/// and deadline. Owned exclusively by the worker handling one request and
/// reset at `FunctionExecuted`, per the concurrency model's "no hidden
/// ambient state" design note.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace: TraceContext,
    pub cancellation_token: Option<String>,
    pub deadline: Option<Instant>,
    pub extra: HashMap<String, Value>,
}

impl RequestContext {
    /// Build a context from a request's tracing options and an optional
    /// wall-clock deadline duration from now.
    #[must_use]
    pub fn new(trace_options: &TraceOptions, cancellation_token: Option<String>, deadline_from_now: Option<Duration>) -> Self {
        Self {
            trace: TraceContext::begin(trace_options),
            cancellation_token,
            deadline: deadline_from_now.map(|d| Instant::now() + d),
            extra: HashMap::new(),
        }
    }

    /// `true` if a deadline was set and has already elapsed.
    #[must_use]
    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Remaining time before the deadline, or `None` if no deadline is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}
