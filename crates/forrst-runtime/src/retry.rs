// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry guidance derivation (§4.9): attached to every error response so a
//! retryable failure's client knows whether, and how, to retry.
//!
//! The teacher crate delegated this concern entirely to an external
//! `abp_retry` policy type; here the guidance is a closed, spec-defined
//! table keyed on [`ErrorCode`] rather than a configurable policy object,
//! so it's reimplemented in place as a pure function.

use forrst_error::ErrorCode;
use serde::{Deserialize, Serialize};

use crate::Amount;

/// The shape of backoff a client should apply before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Immediate,
    Fixed,
    Exponential,
}

/// Retry guidance attached to a failing response as the
/// `urn:cline:forrst:ext:retry` extension payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryGuidance {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RetryStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl RetryGuidance {
    fn not_allowed() -> Self {
        Self { allowed: false, strategy: None, after: None, max_attempts: None }
    }

    fn immediate(max_attempts: u32) -> Self {
        Self { allowed: true, strategy: Some(RetryStrategy::Immediate), after: None, max_attempts: Some(max_attempts) }
    }

    fn fixed(after_seconds: u64, max_attempts: u32) -> Self {
        Self {
            allowed: true,
            strategy: Some(RetryStrategy::Fixed),
            after: Some(Amount::seconds(after_seconds)),
            max_attempts: Some(max_attempts),
        }
    }

    fn exponential(base_seconds: u64, max_attempts: u32) -> Self {
        Self {
            allowed: true,
            strategy: Some(RetryStrategy::Exponential),
            after: Some(Amount::seconds(base_seconds)),
            max_attempts: Some(max_attempts),
        }
    }
}

/// Derive retry guidance for the first error code on a response, per the
/// table in §4.9. Non-retryable codes (including anything outside
/// [`ErrorCode::is_retryable`]) always yield `{allowed: false}`.
#[must_use]
pub fn derive(code: ErrorCode) -> RetryGuidance {
    if !code.is_retryable() {
        return RetryGuidance::not_allowed();
    }
    match code {
        ErrorCode::RateLimited => RetryGuidance::fixed(60, 3),
        ErrorCode::Unavailable => RetryGuidance::exponential(1, 5),
        ErrorCode::DeadlineExceeded => RetryGuidance::immediate(1),
        ErrorCode::InternalError | ErrorCode::DependencyError => RetryGuidance::exponential(2, 3),
        ErrorCode::IdempotencyProcessing => RetryGuidance::fixed(1, 3),
        ErrorCode::ServerMaintenance | ErrorCode::FunctionMaintenance => RetryGuidance::fixed(60, 1),
        _ => RetryGuidance::exponential(1, 3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_fixed_sixty_seconds_three_attempts() {
        let g = derive(ErrorCode::RateLimited);
        assert!(g.allowed);
        assert_eq!(g.strategy, Some(RetryStrategy::Fixed));
        assert_eq!(g.after.unwrap().value, 60);
        assert_eq!(g.max_attempts, Some(3));
    }

    #[test]
    fn unavailable_is_exponential_five_attempts() {
        let g = derive(ErrorCode::Unavailable);
        assert_eq!(g.strategy, Some(RetryStrategy::Exponential));
        assert_eq!(g.max_attempts, Some(5));
    }

    #[test]
    fn deadline_exceeded_is_immediate_one_attempt_with_no_after() {
        let g = derive(ErrorCode::DeadlineExceeded);
        assert_eq!(g.strategy, Some(RetryStrategy::Immediate));
        assert!(g.after.is_none());
        assert_eq!(g.max_attempts, Some(1));
    }

    #[test]
    fn maintenance_codes_are_fixed_one_attempt() {
        assert_eq!(derive(ErrorCode::ServerMaintenance).max_attempts, Some(1));
        assert_eq!(derive(ErrorCode::FunctionMaintenance).max_attempts, Some(1));
    }

    #[test]
    fn non_retryable_code_disallows_retry() {
        let g = derive(ErrorCode::NotFound);
        assert!(!g.allowed);
        assert!(g.strategy.is_none());
        assert!(g.after.is_none());
    }

    #[test]
    fn every_retryable_code_yields_allowed_guidance() {
        for code in forrst_error::ALL_CODES.iter().copied().filter(|c| c.is_retryable()) {
            assert!(derive(code).allowed, "{code:?} should be retryable");
        }
    }
}
