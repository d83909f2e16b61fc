//! Request/response envelope types.
//!
//! Free-form JSON sub-objects (`result`, error `details`, extension
//! `options`/`data`) are modeled with [`serde_json::Value`], which already
//! is the null|scalar|list|map-to-sum shape the design notes call for;
//! absent-vs-null is preserved because each of those fields is `Option<..>`
//! and simply omitted from the wire document when `None` (see the
//! `skip_serializing_if` attributes below), while an explicit `null` is
//! still observable as `Some(Value::Null)` after parsing.

use std::collections::BTreeMap;

use forrst_error::ErrorDto;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `protocol` header shared by request and response envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    /// MUST equal the implementation's name (e.g. `"forrst"`).
    pub name: String,
    /// MUST have a supported major component.
    pub version: String,
}

/// `call` member of a request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Function URN, or a dotted name accepted for compatibility.
    pub function: String,
    /// Requested semver. Absent means "resolve the default version".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Call arguments, keyed by argument name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
}

/// One entry of the request-level `extensions` list: a declared extension
/// and its request-time options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionRequest {
    /// Extension URN.
    pub urn: String,
    /// Request-time options for this extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// One entry of the response-level `extensions` list: an extension's
/// response-time enrichment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionResponse {
    /// Extension URN (canonical form — see [`crate::urn`] aliasing rules).
    pub urn: String,
    /// Response-time data contributed by this extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A parsed request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Protocol header.
    pub protocol: Protocol,
    /// Caller-assigned id, unique per caller, echoed verbatim in the
    /// response.
    pub id: String,
    /// The function call itself.
    pub call: Call,
    /// Caller-supplied context (deadlines, tracing options, auth
    /// passthrough, etc). Receivers MUST ignore unknown members.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
    /// Declared extensions and their request-time options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<ExtensionRequest>>,
}

/// A response envelope. Exactly one of `result`/`errors` is present; this is
/// enforced by [`ResponseEnvelope::success`]/[`ResponseEnvelope::failure`]
/// rather than by the type alone, since both must round-trip through plain
/// `serde_json` without a custom `Deserialize` impl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Protocol header, echoing the implementation's own version.
    pub protocol: Protocol,
    /// Echoes `request.id`; `null` only when the original id could not be
    /// parsed.
    pub id: Option<String>,
    /// Present on success; mutually exclusive with `errors`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure (one or more entries); mutually exclusive with
    /// `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorDto>>,
    /// Server-contributed side-channel data (deprecation notices,
    /// maintenance info, etc) that isn't tied to a specific extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    /// Response-time extension enrichments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<ExtensionResponse>>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn success(protocol: Protocol, id: Option<String>, result: Value) -> Self {
        Self {
            protocol,
            id,
            result: Some(result),
            errors: None,
            meta: None,
            extensions: None,
        }
    }

    /// Build a failing response envelope from one or more errors.
    ///
    /// # Panics
    ///
    /// Panics if `errors` is empty — the exclusivity invariant requires at
    /// least one entry.
    #[must_use]
    pub fn failure(protocol: Protocol, id: Option<String>, errors: Vec<ErrorDto>) -> Self {
        assert!(
            !errors.is_empty(),
            "a failing response envelope must carry at least one error"
        );
        Self {
            protocol,
            id,
            result: None,
            errors: Some(errors),
            meta: None,
            extensions: None,
        }
    }

    /// `true` if the exclusivity invariant (`result` XOR `errors`) holds.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match (&self.result, &self.errors) {
            (Some(_), None) => true,
            (None, Some(errs)) => !errs.is_empty(),
            _ => false,
        }
    }

    /// Attach (merging with any existing entry) a `meta` key.
    pub fn set_meta(&mut self, key: impl Into<String>, value: Value) {
        self.meta
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
    }

    /// Append a response-side extension enrichment.
    pub fn push_extension(&mut self, urn: impl Into<String>, data: Option<Value>) {
        self.extensions
            .get_or_insert_with(Vec::new)
            .push(ExtensionResponse {
                urn: urn.into(),
                data,
            });
    }

    /// Return the first error's code, if this is a failing response.
    #[must_use]
    pub fn first_error_code(&self) -> Option<forrst_error::ErrorCode> {
        self.errors.as_ref().and_then(|e| e.first()).map(|e| e.code)
    }
}

/// Merge caller-declared context into a plain map, useful for constructing
/// test fixtures without going through a full JSON document.
#[must_use]
pub fn context_map(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), v);
    }
    map
}

/// Convenience alias used by callers that want a `BTreeMap` view over
/// deterministic small maps (e.g. extension `data` payloads) without
/// depending on `serde_json`'s map ordering feature flags.
pub type OrderedMap = BTreeMap<String, Value>;
