// SPDX-License-Identifier: MIT OR Apache-2.0
//! Recursive field redaction over arbitrary result trees, with an
//! authorization gate guarding unredacted (`none`-mode) access.
//!
//! Two modes apply unconditionally: `full` replaces a sensitive leaf
//! outright, `partial` applies a field-type-aware masking strategy. A
//! third mode, `none`, bypasses redaction entirely but only after an
//! [`AuthorizationGate`] grants it — denial downgrades the call to
//! `FORBIDDEN` rather than silently falling back to a safer mode.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;

use std::collections::BTreeSet;

use forrst_error::{ErrorCode, ForrstError};
use serde_json::{Map, Value};

pub use audit::{AuditEntry, PolicyAuditor};

/// Default sensitive field names, matched case-sensitively against JSON
/// object keys at any depth.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "card_number",
    "cvv",
    "account_number",
    "ssn",
    "tax_id",
    "passport_number",
    "email",
    "phone",
];

/// How a sensitive leaf is transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    /// Replace the entire value with `***`.
    Full,
    /// Apply a field-type-aware partial mask.
    Partial,
    /// Do not redact at all. Requires [`AuthorizationGate`] approval.
    None,
}

/// Decision returned by an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Decision {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Authorizes (or denies) a caller's request to receive unredacted
/// (`none`-mode) data under a named policy.
pub trait AuthorizationGate: Send + Sync {
    /// Decide whether `policy` permits unredacted access for this call.
    fn authorize(&self, policy: &str) -> Decision;
}

/// An [`AuthorizationGate`] that never grants `none`-mode access. The safe
/// default for callers that haven't wired in a real authorization backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllGate;

impl AuthorizationGate for DenyAllGate {
    fn authorize(&self, policy: &str) -> Decision {
        Decision::deny(format!("no authorization backend configured for policy '{policy}'"))
    }
}

/// The outcome of a redaction pass, matching the wire-level response data
/// `{mode, redacted_fields, policy}`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RedactionReport {
    pub mode: RedactionMode,
    /// JSON-pointer paths (rooted at the redacted value) of every field
    /// that was mutated. Empty when `mode` is `none`.
    pub redacted_fields: Vec<String>,
    /// The policy name this redaction was evaluated under; flipped to
    /// `"authorized_access"` when a `none`-mode request was granted.
    pub policy: String,
}

/// Recursively redact `value` in place, returning the redaction report.
///
/// # Errors
///
/// Returns `FORBIDDEN` if `mode` is [`RedactionMode::None`] and `gate`
/// denies the named `policy`.
pub fn redact(
    value: &mut Value,
    sensitive_fields: &BTreeSet<String>,
    mode: RedactionMode,
    policy: &str,
    gate: &dyn AuthorizationGate,
) -> Result<RedactionReport, ForrstError> {
    if mode == RedactionMode::None {
        let decision = gate.authorize(policy);
        if !decision.allowed {
            return Err(ForrstError::new(
                ErrorCode::Forbidden,
                decision
                    .reason
                    .unwrap_or_else(|| format!("unredacted access denied under policy '{policy}'")),
            )
            .with_detail("policy", policy));
        }
        return Ok(RedactionReport {
            mode,
            redacted_fields: Vec::new(),
            policy: "authorized_access".to_string(),
        });
    }

    let mut redacted_fields = Vec::new();
    walk(value, sensitive_fields, mode, String::new(), &mut redacted_fields);

    Ok(RedactionReport {
        mode,
        redacted_fields,
        policy: policy.to_string(),
    })
}

fn walk(
    value: &mut Value,
    sensitive_fields: &BTreeSet<String>,
    mode: RedactionMode,
    path: String,
    redacted_fields: &mut Vec<String>,
) {
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                let child_path = format!("{path}/{}", escape(&key));
                if sensitive_fields.contains(&key) {
                    if let Some(v) = map.get_mut(&key) {
                        mask_leaf(v, &key, mode);
                        redacted_fields.push(child_path);
                    }
                } else if let Some(v) = map.get_mut(&key) {
                    walk(v, sensitive_fields, mode, child_path, redacted_fields);
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                walk(item, sensitive_fields, mode, format!("{path}/{i}"), redacted_fields);
            }
        }
        _ => {}
    }
}

fn mask_leaf(value: &mut Value, field_name: &str, mode: RedactionMode) {
    if value.is_null() {
        return;
    }
    *value = match mode {
        RedactionMode::Full => Value::String("***".to_string()),
        RedactionMode::Partial => Value::String(partial_mask(field_name, value)),
        RedactionMode::None => unreachable!("none-mode redaction is handled before recursion"),
    };
}

fn partial_mask(field_name: &str, value: &Value) -> String {
    let s = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match field_name {
        "email" => mask_email(&s),
        "phone" | "card_number" | "cvv" | "account_number" | "ssn" | "tax_id" | "passport_number" => {
            mask_tail(&s)
        }
        "name" => initials(&s),
        _ => "***".to_string(),
    }
}

fn mask_email(s: &str) -> String {
    match s.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            let tld = domain.rsplit('.').next().unwrap_or("");
            format!("{first}***@***.{tld}")
        }
        None => "***".to_string(),
    }
}

fn mask_tail(s: &str) -> String {
    let digits: Vec<char> = s.chars().collect();
    if digits.len() <= 4 {
        return "*".repeat(digits.len());
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("{}{tail}", "*".repeat(digits.len() - 4))
}

fn initials(s: &str) -> String {
    s.split_whitespace()
        .filter_map(|word| word.chars().next())
        .map(|c| format!("{}.", c.to_ascii_uppercase()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// RFC 6901 reference-token escaping.
fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Build a sensitive-field set starting from [`DEFAULT_SENSITIVE_FIELDS`]
/// plus any caller-supplied additions.
#[must_use]
pub fn sensitive_fields(extra: impl IntoIterator<Item = String>) -> BTreeSet<String> {
    let mut set: BTreeSet<String> = DEFAULT_SENSITIVE_FIELDS.iter().map(|s| s.to_string()).collect();
    set.extend(extra);
    set
}

/// Convenience: build a [`Map`] fixture from key/value pairs, used by tests
/// and by callers assembling result trees without a full JSON document.
#[must_use]
pub fn object(pairs: Vec<(&str, Value)>) -> Value {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), v);
    }
    Value::Object(map)
}
