//! Function and extension descriptors: the machine-readable shape of a
//! registered `(urn, version)` callable and of an extension's subscription
//! list.

use forrst_error::{ErrorCode, ForrstError};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::version::Deprecation;

/// Maturity level of a registered function version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    Stable,
    Alpha,
    Beta,
    Rc,
}

/// A side effect a function may perform, surfaced to callers for
/// idempotency/caching decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    Create,
    Update,
    Delete,
}

/// Specification of one named call argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    /// Argument name (matches a key under `call.arguments`).
    pub name: String,
    /// Human-readable type tag consumed by the pluggable validator (e.g.
    /// `"string"`, `"integer"`, `"object"`). The core does not interpret
    /// this beyond handing it to the validator.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Whether the argument must be present.
    pub required: bool,
    /// Free-form description for discovery responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Specification of a function's success result shape, for discovery only;
/// the core never validates `result` against this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One error a function may emit, for discovery responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSpec {
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A function's extension participation: either an explicit allow-list
/// (`supported`) or deny-list (`excluded`) against the globally active
/// extension set. Mutually exclusive by construction — see
/// [`ExtensionParticipation::supported`]/[`ExtensionParticipation::excluded`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtensionParticipation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    supported: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    excluded: Option<Vec<String>>,
}

impl ExtensionParticipation {
    /// No restriction: every globally active/declared extension applies.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Build an allow-list participation.
    ///
    /// # Errors
    ///
    /// Never fails by construction through this constructor alone; use
    /// [`ExtensionParticipation::validate`] after deserializing untrusted
    /// descriptors to enforce the mutual-exclusivity invariant.
    #[must_use]
    pub fn supported(urns: Vec<String>) -> Self {
        Self {
            supported: Some(urns),
            excluded: None,
        }
    }

    /// Build a deny-list participation.
    #[must_use]
    pub fn excluded(urns: Vec<String>) -> Self {
        Self {
            supported: None,
            excluded: Some(urns),
        }
    }

    /// Enforce the invariant that `supported` and `excluded` are mutually
    /// exclusive.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_REQUEST` if both are present.
    pub fn validate(&self) -> Result<(), ForrstError> {
        if self.supported.is_some() && self.excluded.is_some() {
            return Err(ForrstError::new(
                ErrorCode::InvalidRequest,
                "a function descriptor's extension participation may not set both 'supported' and 'excluded'",
            ));
        }
        Ok(())
    }

    /// Narrow `active` (the global + request-declared extension URN set) to
    /// the URNs this function actually participates with.
    #[must_use]
    pub fn narrow<'a>(&self, active: &'a [String]) -> Vec<&'a str> {
        match (&self.supported, &self.excluded) {
            (Some(allow), _) => active
                .iter()
                .filter(|urn| allow.iter().any(|a| a == *urn))
                .map(String::as_str)
                .collect(),
            (_, Some(deny)) => active
                .iter()
                .filter(|urn| !deny.iter().any(|d| d == *urn))
                .map(String::as_str)
                .collect(),
            (None, None) => active.iter().map(String::as_str).collect(),
        }
    }
}

/// A registered function version's complete machine-readable description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub urn: String,
    pub version: Version,
    pub stability: Stability,
    #[serde(default)]
    pub side_effects: Vec<SideEffect>,
    pub arguments: Vec<ArgumentSpec>,
    pub result: ResultSpec,
    #[serde(default)]
    pub errors: Vec<ErrorSpec>,
    pub discoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<Deprecation>,
    #[serde(default)]
    pub extensions: ExtensionParticipation,
}

impl FunctionDescriptor {
    /// Validate the descriptor's own invariants (extension participation
    /// exclusivity). `(urn, version)` registry-wide uniqueness is enforced
    /// by the registry that holds descriptors, not by the descriptor
    /// itself.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_REQUEST` if `extensions` sets both `supported` and
    /// `excluded`.
    pub fn validate(&self) -> Result<(), ForrstError> {
        self.extensions.validate()
    }
}

/// One event subscription an extension registers: which event it listens
/// to, at what priority, and (conceptually) which method handles it. The
/// method itself is not representable in a wire descriptor; this type is
/// the data half consumed by `forrst-runtime`'s event bus to order
/// dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub event_type: String,
    /// Lower runs first; ties break by registration order.
    pub priority: i32,
}

/// An extension's machine-readable registration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    pub urn: String,
    /// Applies to every request regardless of `call` declaration.
    pub is_global: bool,
    /// If `true`, an error raised by this extension aborts the pipeline; if
    /// `false`, the error is advisory and dispatch continues.
    pub is_error_fatal: bool,
    pub subscriptions: Vec<Subscription>,
    /// Arbitrary descriptor-level metadata (e.g. default options schema),
    /// opaque to the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argument() -> ArgumentSpec {
        ArgumentSpec {
            name: "customer_id".into(),
            type_name: "string".into(),
            required: true,
            description: None,
        }
    }

    fn descriptor(extensions: ExtensionParticipation) -> FunctionDescriptor {
        FunctionDescriptor {
            urn: "urn:acme:forrst:fn:orders-create".into(),
            version: Version::parse("2.0.0").unwrap(),
            stability: Stability::Stable,
            side_effects: vec![SideEffect::Create],
            arguments: vec![argument()],
            result: ResultSpec {
                type_name: "object".into(),
                description: None,
            },
            errors: vec![],
            discoverable: true,
            deprecated: None,
            extensions,
        }
    }

    #[test]
    fn unrestricted_participation_passes_everything_through() {
        let p = ExtensionParticipation::unrestricted();
        let active = vec!["a".to_string(), "b".to_string()];
        assert_eq!(p.narrow(&active), vec!["a", "b"]);
    }

    #[test]
    fn supported_narrows_to_allow_list() {
        let p = ExtensionParticipation::supported(vec!["a".into()]);
        let active = vec!["a".to_string(), "b".to_string()];
        assert_eq!(p.narrow(&active), vec!["a"]);
    }

    #[test]
    fn excluded_narrows_by_removing_deny_list() {
        let p = ExtensionParticipation::excluded(vec!["b".into()]);
        let active = vec!["a".to_string(), "b".to_string()];
        assert_eq!(p.narrow(&active), vec!["a"]);
    }

    #[test]
    fn both_supported_and_excluded_is_invalid() {
        let mut p = ExtensionParticipation::supported(vec!["a".into()]);
        p.excluded = Some(vec!["b".into()]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn descriptor_validate_rejects_conflicting_participation() {
        let mut ext = ExtensionParticipation::supported(vec!["a".into()]);
        ext.excluded = Some(vec!["b".into()]);
        let descriptor = descriptor(ext);
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn descriptor_validate_accepts_unrestricted() {
        let descriptor = descriptor(ExtensionParticipation::unrestricted());
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn descriptor_round_trips_through_json() {
        let descriptor = descriptor(ExtensionParticipation::supported(vec!["a".into()]));
        let json = serde_json::to_string(&descriptor).unwrap();
        let back: FunctionDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, descriptor);
    }

    #[test]
    fn subscription_ordering_fields_present() {
        let ext = ExtensionDescriptor {
            urn: "urn:cline:forrst:ext:tracing".into(),
            is_global: true,
            is_error_fatal: false,
            subscriptions: vec![Subscription {
                event_type: "RequestValidated".into(),
                priority: 10,
            }],
            metadata: None,
        };
        assert_eq!(ext.subscriptions[0].priority, 10);
    }
}
