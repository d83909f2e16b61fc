// SPDX-License-Identifier: MIT OR Apache-2.0
//! Audit trail for `none`-mode authorization decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AuthorizationGate, Decision};

/// A single recorded authorization check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub policy: String,
    pub allowed: bool,
    pub reason: Option<String>,
}

/// Wraps an [`AuthorizationGate`] and records every decision it makes, so
/// an operator can later reconstruct who was granted unredacted access and
/// under which policy.
pub struct PolicyAuditor<G: AuthorizationGate> {
    gate: G,
    log: Vec<AuditEntry>,
}

impl<G: AuthorizationGate> PolicyAuditor<G> {
    /// Wrap `gate`, starting with an empty log.
    #[must_use]
    pub fn new(gate: G) -> Self {
        Self {
            gate,
            log: Vec::new(),
        }
    }

    /// All recorded entries in chronological order.
    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.log
    }

    /// Number of denied checks recorded so far.
    #[must_use]
    pub fn denied_count(&self) -> usize {
        self.log.iter().filter(|e| !e.allowed).count()
    }
}

impl<G: AuthorizationGate> AuthorizationGate for PolicyAuditor<G> {
    // `authorize` takes `&self`, so it can't append to the log; callers
    // that want a recorded entry use `authorize_and_record` instead.
    fn authorize(&self, policy: &str) -> Decision {
        self.gate.authorize(policy)
    }
}

impl<G: AuthorizationGate> PolicyAuditor<G> {
    /// Authorize `policy` and record the outcome.
    pub fn authorize_and_record(&mut self, policy: &str) -> Decision {
        let decision = self.gate.authorize(policy);
        self.log.push(AuditEntry {
            timestamp: Utc::now(),
            policy: policy.to_string(),
            allowed: decision.allowed,
            reason: decision.reason.clone(),
        });
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AllowGate;
    impl AuthorizationGate for AllowGate {
        fn authorize(&self, _policy: &str) -> Decision {
            Decision::allow()
        }
    }

    struct DenyGate;
    impl AuthorizationGate for DenyGate {
        fn authorize(&self, _policy: &str) -> Decision {
            Decision::deny("nope")
        }
    }

    #[test]
    fn records_allow_decision() {
        let mut auditor = PolicyAuditor::new(AllowGate);
        let decision = auditor.authorize_and_record("export");
        assert!(decision.allowed);
        assert_eq!(auditor.entries().len(), 1);
        assert_eq!(auditor.denied_count(), 0);
    }

    #[test]
    fn records_deny_decision_with_reason() {
        let mut auditor = PolicyAuditor::new(DenyGate);
        let decision = auditor.authorize_and_record("export");
        assert!(!decision.allowed);
        assert_eq!(auditor.denied_count(), 1);
        assert_eq!(auditor.entries()[0].reason.as_deref(), Some("nope"));
    }

    #[test]
    fn entries_are_chronological() {
        let mut auditor = PolicyAuditor::new(AllowGate);
        auditor.authorize_and_record("a");
        auditor.authorize_and_record("b");
        assert_eq!(auditor.entries()[0].policy, "a");
        assert_eq!(auditor.entries()[1].policy, "b");
    }
}
