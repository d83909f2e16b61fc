// SPDX-License-Identifier: MIT OR Apache-2.0
//! Replay queue (§4.15): an at-most-once state machine for work that can't
//! complete synchronously within the request.
//!
//! Grounded on [`crate::store`]'s persistence style and the teacher
//! pipeline's `StageResult`-flavored diagnostic reporting, generalized into
//! an explicit, monotone state machine rather than a linear stage chain.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use forrst_error::{ErrorCode, ForrstError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Amount;

/// Replay priority. Ordered `High > Normal > Low`, used to break ties when
/// reporting queue position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// A replay's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl ReplayStatus {
    /// `true` for the four states a replay never leaves once entered.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired | Self::Cancelled)
    }

    fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self {
            Self::Queued => matches!(next, Self::Processing | Self::Expired | Self::Cancelled),
            Self::Processing => matches!(next, Self::Completed | Self::Failed | Self::Cancelled),
            _ => false,
        }
    }
}

/// A single queued/in-flight/terminal replay record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub replay_id: String,
    pub status: ReplayStatus,
    pub priority: Priority,
    pub queued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub reason: String,
}

/// Response payload emitted when a call is queued for replay rather than
/// completing inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedResponse {
    pub status: &'static str,
    pub replay_id: String,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_replay: Option<Amount>,
}

/// In-process replay queue enforcing the monotone state machine.
#[derive(Default)]
pub struct ReplayQueue {
    records: Mutex<HashMap<String, ReplayRecord>>,
}

impl ReplayQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a new replay, returning its record and the
    /// caller-facing [`QueuedResponse`].
    pub fn enqueue(&self, reason: impl Into<String>, priority: Priority, ttl: chrono::Duration, callback_url: Option<String>) -> (ReplayRecord, QueuedResponse) {
        let replay_id = Uuid::new_v4().to_string();
        let queued_at = Utc::now();
        let expires_at = queued_at + ttl;
        let reason = reason.into();
        let record = ReplayRecord {
            replay_id: replay_id.clone(),
            status: ReplayStatus::Queued,
            priority,
            queued_at,
            expires_at,
            attempts: 0,
            callback_url,
            reason: reason.clone(),
        };
        let position = self.queued_ahead_of(priority, queued_at) + 1;
        self.records.lock().expect("replay queue mutex poisoned").insert(replay_id.clone(), record.clone());
        let response = QueuedResponse {
            status: "queued",
            replay_id,
            reason,
            queued_at,
            expires_at,
            position: Some(position),
            estimated_replay: None,
        };
        (record, response)
    }

    fn queued_ahead_of(&self, priority: Priority, queued_at: DateTime<Utc>) -> u64 {
        self.records
            .lock()
            .expect("replay queue mutex poisoned")
            .values()
            .filter(|r| r.status == ReplayStatus::Queued)
            .filter(|r| r.priority > priority || (r.priority == priority && r.queued_at < queued_at))
            .count() as u64
    }

    /// Look up a record by id.
    #[must_use]
    pub fn get(&self, replay_id: &str) -> Option<ReplayRecord> {
        self.records.lock().expect("replay queue mutex poisoned").get(replay_id).cloned()
    }

    /// Transition `replay_id` to `next`, incrementing `attempts` whenever
    /// it moves into `Processing`.
    ///
    /// # Errors
    ///
    /// Returns `REPLAY_NOT_FOUND` for an unknown id, `REPLAY_EXPIRED` if
    /// the record's TTL has elapsed, or `REPLAY_ALREADY_COMPLETE` /
    /// `REPLAY_CANCELLED` if attempting to leave a terminal state.
    pub fn transition(&self, replay_id: &str, next: ReplayStatus) -> Result<ReplayRecord, ForrstError> {
        let mut records = self.records.lock().expect("replay queue mutex poisoned");
        let record = records.get_mut(replay_id).ok_or_else(|| not_found(replay_id))?;

        if record.status != ReplayStatus::Expired && record.status != ReplayStatus::Cancelled && Utc::now() > record.expires_at && record.status == ReplayStatus::Queued {
            record.status = ReplayStatus::Expired;
            return Err(expired(replay_id));
        }

        if !record.status.can_transition_to(next) {
            return Err(terminal_violation(replay_id, record.status));
        }

        if next == ReplayStatus::Processing {
            record.attempts += 1;
        }
        record.status = next;
        Ok(record.clone())
    }
}

fn not_found(replay_id: &str) -> ForrstError {
    ForrstError::new(ErrorCode::ReplayNotFound, format!("no replay '{replay_id}'")).with_detail("replay_id", replay_id)
}

fn expired(replay_id: &str) -> ForrstError {
    ForrstError::new(ErrorCode::ReplayExpired, format!("replay '{replay_id}' has expired")).with_detail("replay_id", replay_id)
}

fn terminal_violation(replay_id: &str, current: ReplayStatus) -> ForrstError {
    let code = match current {
        ReplayStatus::Cancelled => ErrorCode::ReplayCancelled,
        _ => ErrorCode::ReplayAlreadyComplete,
    };
    ForrstError::new(code, format!("replay '{replay_id}' is already in a terminal state"))
        .with_detail("replay_id", replay_id)
        .with_detail("status", serde_json::to_value(current).unwrap_or(serde_json::Value::Null))
}
