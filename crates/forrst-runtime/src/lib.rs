// SPDX-License-Identifier: MIT OR Apache-2.0
//! forrst-runtime
//!
//! Pipeline engine, event bus, and stateful collaborators for the Forrst
//! RPC runtime.
//!
//! Responsibilities:
//! - parse and validate the wire envelope, then resolve `(function, version)`
//! - evaluate the maintenance gate and compute the active extension set
//! - dispatch the six lifecycle events to extensions in priority order
//! - invoke the resolved function and enrich the response with tracing,
//!   retry guidance, and rate-limit/quota advisories
//! - host the lock, cancellation, and replay collaborators

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Synchronous, priority-ordered event bus and the `Extension` trait.
pub mod bus;
/// Store-backed cancellation broker.
pub mod cancel;
/// Store-backed atomic-lock primitive.
pub mod lock;
/// Server-wide and per-function maintenance gate.
pub mod maintenance;
/// Advisory rate-limit and quota reporters.
pub mod quota;
/// Function and extension registries.
pub mod registry;
/// Replay queue state machine.
pub mod replay;
/// Retry guidance derivation.
pub mod retry;
/// Abstract external key/value store.
pub mod store;
/// Per-request tracing context.
pub mod trace;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use forrst_error::{ErrorCode, ForrstError};
use forrst_policy::{AuthorizationGate, DenyAllGate, RedactionMode};
use forrst_validate::{BasicValidator, Validator};
use forrst_wire::{
    Call, Codec, ExtensionDescriptor, ExtensionParticipation, FunctionDescriptor, ResultSpec,
    RequestEnvelope, ResponseEnvelope, Stability,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bus::{EventBus, EventControl, EventType, Extension};
use crate::cancel::CancellationBroker;
use crate::lock::LockRegistry;
use crate::maintenance::{InMemoryMaintenanceStore, MaintenanceStore};
use crate::quota::{QuotaReporter, RateLimitReporter};
use crate::registry::{ExtensionRegistry, FunctionHandler, FunctionRegistry};
use crate::replay::ReplayQueue;
use crate::store::{InMemoryStore, Store};
use crate::trace::{RequestContext, TraceOptions};

/// A value paired with its unit, used wherever the wire format needs a
/// duration or count with an explicit unit (tracing duration, retry
/// `after`, rate-limit window, maintenance `retry_after`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub value: u64,
    pub unit: &'static str,
}

impl Amount {
    /// Build an amount in seconds.
    #[must_use]
    pub fn seconds(value: u64) -> Self {
        Self { value, unit: "second" }
    }

    /// Build an amount in minutes.
    #[must_use]
    pub fn minutes(value: u64) -> Self {
        Self { value, unit: "minute" }
    }

    /// Build an amount in milliseconds.
    #[must_use]
    pub fn milliseconds(value: u64) -> Self {
        Self { value, unit: "millisecond" }
    }
}

const TRACING_EXTENSION_URN: &str = "urn:cline:forrst:ext:tracing";
const RETRY_EXTENSION_URN: &str = "urn:cline:forrst:ext:retry";
const RATE_LIMIT_EXTENSION_URN: &str = "urn:cline:forrst:ext:rate-limit";
const QUOTA_EXTENSION_URN: &str = "urn:cline:forrst:ext:quota";
const REDACTION_EXTENSION_URN: &str = "urn:cline:forrst:ext:redaction";

/// Caller-supplied redaction options, parsed out of a request's `context`
/// member (typically under the `urn:cline:forrst:ext:redaction` key).
#[derive(Debug, Clone, Default, Deserialize)]
struct RedactionOptions {
    #[serde(default)]
    mode: Option<RedactionMode>,
    #[serde(default)]
    policy: Option<String>,
}

fn extract_redaction_options(request: &RequestEnvelope) -> RedactionOptions {
    request
        .context
        .as_ref()
        .and_then(|ctx| ctx.get(REDACTION_EXTENSION_URN))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn unrestricted_function(urn: &str, version: &str, result_type: &str) -> FunctionDescriptor {
    FunctionDescriptor {
        urn: urn.to_string(),
        version: semver::Version::parse(version).expect("reserved function version is a valid semver literal"),
        stability: Stability::Stable,
        side_effects: vec![],
        arguments: vec![],
        result: ResultSpec { type_name: result_type.to_string(), description: None },
        errors: vec![],
        discoverable: true,
        deprecated: None,
        extensions: ExtensionParticipation::unrestricted(),
    }
}

fn string_arg(arguments: &Option<Map<String, Value>>, name: &str) -> Result<String, ForrstError> {
    arguments
        .as_ref()
        .and_then(|m| m.get(name))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ForrstError::new(ErrorCode::InvalidArguments, format!("missing required argument '{name}'"))
                .with_source(forrst_error::ErrorSource::Pointer(format!("/call/arguments/{name}")))
        })
}

struct PingHandler;
#[async_trait]
impl FunctionHandler for PingHandler {
    async fn invoke(&self, _arguments: Option<Map<String, Value>>, _ctx: &RequestContext) -> Result<Value, ForrstError> {
        Ok(serde_json::json!({ "pong": true }))
    }
}

struct HealthHandler;
#[async_trait]
impl FunctionHandler for HealthHandler {
    async fn invoke(&self, _arguments: Option<Map<String, Value>>, _ctx: &RequestContext) -> Result<Value, ForrstError> {
        Ok(serde_json::json!({ "status": "ok" }))
    }
}

struct CapabilitiesHandler {
    max_request_bytes: usize,
    max_response_bytes: usize,
    supported_major_versions: Vec<u64>,
}
#[async_trait]
impl FunctionHandler for CapabilitiesHandler {
    async fn invoke(&self, _arguments: Option<Map<String, Value>>, _ctx: &RequestContext) -> Result<Value, ForrstError> {
        Ok(serde_json::json!({
            "protocol": forrst_wire::PROTOCOL_NAME,
            "supported_major_versions": self.supported_major_versions,
            "max_request_bytes": self.max_request_bytes,
            "max_response_bytes": self.max_response_bytes,
        }))
    }
}

struct DescribeHandler {
    descriptors: Arc<Vec<FunctionDescriptor>>,
}
#[async_trait]
impl FunctionHandler for DescribeHandler {
    async fn invoke(&self, arguments: Option<Map<String, Value>>, _ctx: &RequestContext) -> Result<Value, ForrstError> {
        match arguments.as_ref().and_then(|m| m.get("function")).and_then(Value::as_str) {
            Some(urn) => match self.descriptors.iter().find(|d| d.urn == urn) {
                Some(d) => Ok(serde_json::to_value(d).unwrap_or(Value::Null)),
                None => Err(ForrstError::new(ErrorCode::FunctionNotFound, format!("no function '{urn}'")).with_detail("function", urn)),
            },
            None => Ok(serde_json::to_value(&*self.descriptors).unwrap_or(Value::Null)),
        }
    }
}

struct LockReleaseHandler {
    locks: Arc<LockRegistry>,
    forced: bool,
}
#[async_trait]
impl FunctionHandler for LockReleaseHandler {
    async fn invoke(&self, arguments: Option<Map<String, Value>>, _ctx: &RequestContext) -> Result<Value, ForrstError> {
        let key = string_arg(&arguments, "key")?;
        let result = if self.forced {
            self.locks.force_release(&key).await?
        } else {
            let owner = string_arg(&arguments, "owner")?;
            self.locks.release(&key, &owner).await?
        };
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }
}

struct LockStatusHandler {
    locks: Arc<LockRegistry>,
}
#[async_trait]
impl FunctionHandler for LockStatusHandler {
    async fn invoke(&self, arguments: Option<Map<String, Value>>, _ctx: &RequestContext) -> Result<Value, ForrstError> {
        let key = string_arg(&arguments, "key")?;
        Ok(serde_json::to_value(self.locks.status(&key).await).unwrap_or(Value::Null))
    }
}

struct CancelHandler {
    cancellation: Arc<CancellationBroker>,
}
#[async_trait]
impl FunctionHandler for CancelHandler {
    async fn invoke(&self, arguments: Option<Map<String, Value>>, _ctx: &RequestContext) -> Result<Value, ForrstError> {
        let token = string_arg(&arguments, "token")?;
        self.cancellation.cancel(&token).await?;
        Ok(serde_json::json!({ "cancelled": true }))
    }
}

/// Builds an [`Engine`], registering caller-supplied functions and
/// extensions before wiring in the reserved system functions named in §6.
pub struct EngineBuilder {
    functions: FunctionRegistry,
    extensions: ExtensionRegistry,
    validator: Arc<dyn Validator>,
    maintenance: Arc<dyn MaintenanceStore>,
    locks: Arc<LockRegistry>,
    cancellation: Arc<CancellationBroker>,
    replay: Arc<ReplayQueue>,
    redaction_gate: Arc<dyn AuthorizationGate>,
    sensitive_fields: BTreeSet<String>,
    rate_limiter: Option<Arc<dyn RateLimitReporter>>,
    quota_reporter: Option<Arc<dyn QuotaReporter>>,
    codec: Codec,
    supported_major_versions: Vec<u64>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        Self {
            functions: FunctionRegistry::new(),
            extensions: ExtensionRegistry::new(),
            validator: Arc::new(BasicValidator),
            maintenance: Arc::new(InMemoryMaintenanceStore::new()),
            locks: Arc::new(LockRegistry::new(Arc::clone(&store), std::time::Duration::from_secs(30))),
            cancellation: Arc::new(CancellationBroker::new(Arc::clone(&store))),
            replay: Arc::new(ReplayQueue::new()),
            redaction_gate: Arc::new(DenyAllGate),
            sensitive_fields: forrst_policy::sensitive_fields([]),
            rate_limiter: None,
            quota_reporter: None,
            codec: Codec::default(),
            supported_major_versions: vec![u64::from(forrst_wire::PROTOCOL_MAJOR)],
        }
    }
}

impl EngineBuilder {
    /// Start building an engine with default collaborators (in-memory
    /// store, [`BasicValidator`], no active maintenance, deny-all
    /// redaction gate).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user-defined function.
    ///
    /// # Errors
    ///
    /// See [`FunctionRegistry::register`].
    pub fn register_function(mut self, descriptor: FunctionDescriptor, handler: impl FunctionHandler + 'static) -> Result<Self, ForrstError> {
        self.functions.register(descriptor, handler, false)?;
        Ok(self)
    }

    /// Register a user-defined extension.
    ///
    /// # Errors
    ///
    /// See [`ExtensionRegistry::register`].
    pub fn register_extension(mut self, extension: Arc<dyn Extension>) -> Result<Self, ForrstError> {
        self.extensions.register(extension, false)?;
        Ok(self)
    }

    /// Override the default (deny-all) redaction authorization gate.
    #[must_use]
    pub fn with_redaction_gate(mut self, gate: Arc<dyn AuthorizationGate>) -> Self {
        self.redaction_gate = gate;
        self
    }

    /// Extend the default sensitive-field set ([`forrst_policy::DEFAULT_SENSITIVE_FIELDS`])
    /// redaction matches against.
    #[must_use]
    pub fn with_sensitive_fields(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.sensitive_fields = forrst_policy::sensitive_fields(extra);
        self
    }

    /// Install a rate-limit reporter contributing a `rate-limit` response
    /// extension on every successfully resolved call.
    #[must_use]
    pub fn with_rate_limiter(mut self, reporter: Arc<dyn RateLimitReporter>) -> Self {
        self.rate_limiter = Some(reporter);
        self
    }

    /// Install a quota reporter contributing a `quota` response extension on
    /// every successfully resolved call.
    #[must_use]
    pub fn with_quota_reporter(mut self, reporter: Arc<dyn QuotaReporter>) -> Self {
        self.quota_reporter = Some(reporter);
        self
    }

    /// Override the default maintenance store.
    #[must_use]
    pub fn with_maintenance_store(mut self, store: Arc<dyn MaintenanceStore>) -> Self {
        self.maintenance = store;
        self
    }

    /// Finalize the engine, registering the reserved system functions
    /// (`ping`, `health`, `capabilities`, `describe`, the atomic-lock trio,
    /// and `cancel`) under the reserved `cline` vendor.
    ///
    /// # Panics
    ///
    /// Panics if a reserved function URN collides with a caller
    /// registration (reserved functions use fixed, known-unique URNs, so
    /// this only happens if the registry itself is inconsistent).
    #[must_use]
    pub fn build(mut self) -> Engine {
        let descriptors: Vec<FunctionDescriptor> = self
            .functions
            .urns()
            .into_iter()
            .filter_map(|urn| self.functions.resolve(urn, None).ok())
            .map(|(d, _, _)| d.clone())
            .collect();
        let descriptors = Arc::new(descriptors);

        let reserved: Vec<(&str, FunctionDescriptor, Arc<dyn FunctionHandler>)> = vec![
            ("ping", unrestricted_function("urn:cline:forrst:fn:ping", "1.0.0", "object"), Arc::new(PingHandler)),
            ("health", unrestricted_function("urn:cline:forrst:fn:health", "1.0.0", "object"), Arc::new(HealthHandler)),
            (
                "capabilities",
                unrestricted_function("urn:cline:forrst:fn:capabilities", "1.0.0", "object"),
                Arc::new(CapabilitiesHandler {
                    max_request_bytes: self.codec.max_request_bytes(),
                    max_response_bytes: self.codec.max_response_bytes(),
                    supported_major_versions: self.supported_major_versions.clone(),
                }),
            ),
            (
                "describe",
                unrestricted_function("urn:cline:forrst:fn:describe", "1.0.0", "any"),
                Arc::new(DescribeHandler { descriptors: Arc::clone(&descriptors) }),
            ),
            (
                "lock-release",
                unrestricted_function("urn:cline:forrst:ext:atomic-lock:fn:release", "1.0.0", "object"),
                Arc::new(LockReleaseHandler { locks: Arc::clone(&self.locks), forced: false }),
            ),
            (
                "lock-force-release",
                unrestricted_function("urn:cline:forrst:ext:atomic-lock:fn:force-release", "1.0.0", "object"),
                Arc::new(LockReleaseHandler { locks: Arc::clone(&self.locks), forced: true }),
            ),
            (
                "lock-status",
                unrestricted_function("urn:cline:forrst:ext:atomic-lock:fn:status", "1.0.0", "object"),
                Arc::new(LockStatusHandler { locks: Arc::clone(&self.locks) }),
            ),
            (
                "cancel",
                unrestricted_function("urn:cline:forrst:ext:cancellation:fn:cancel", "1.0.0", "object"),
                Arc::new(CancelHandler { cancellation: Arc::clone(&self.cancellation) }),
            ),
        ];

        for (label, descriptor, handler) in reserved {
            self.functions
                .register(descriptor, ArcHandler(handler), true)
                .unwrap_or_else(|err| panic!("reserved function '{label}' failed to register: {err:?}"));
        }

        Engine {
            functions: self.functions,
            extensions: self.extensions,
            validator: self.validator,
            maintenance: self.maintenance,
            locks: self.locks,
            cancellation: self.cancellation,
            replay: self.replay,
            redaction_gate: self.redaction_gate,
            sensitive_fields: self.sensitive_fields,
            rate_limiter: self.rate_limiter,
            quota_reporter: self.quota_reporter,
            codec: self.codec,
            supported_major_versions: self.supported_major_versions,
        }
    }
}

struct ArcHandler(Arc<dyn FunctionHandler>);
#[async_trait]
impl FunctionHandler for ArcHandler {
    async fn invoke(&self, arguments: Option<Map<String, Value>>, ctx: &RequestContext) -> Result<Value, ForrstError> {
        self.0.invoke(arguments, ctx).await
    }
}

/// The pipeline engine (§4.6): parses, validates, resolves, and dispatches
/// one request at a time per the fixed 11-step sequence.
pub struct Engine {
    functions: FunctionRegistry,
    extensions: ExtensionRegistry,
    validator: Arc<dyn Validator>,
    maintenance: Arc<dyn MaintenanceStore>,
    locks: Arc<LockRegistry>,
    cancellation: Arc<CancellationBroker>,
    replay: Arc<ReplayQueue>,
    redaction_gate: Arc<dyn AuthorizationGate>,
    sensitive_fields: BTreeSet<String>,
    rate_limiter: Option<Arc<dyn RateLimitReporter>>,
    quota_reporter: Option<Arc<dyn QuotaReporter>>,
    codec: Codec,
    supported_major_versions: Vec<u64>,
}

impl Engine {
    /// The lock registry, for callers that want to pre-seed or inspect
    /// lock state outside the wire protocol.
    #[must_use]
    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    /// The cancellation broker.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationBroker> {
        &self.cancellation
    }

    /// The replay queue.
    #[must_use]
    pub fn replay(&self) -> &Arc<ReplayQueue> {
        &self.replay
    }

    /// Handle one request end-to-end: parse, validate, resolve, dispatch,
    /// invoke, enrich, serialize. Never panics on malformed input — parse
    /// and validation failures become well-formed error responses.
    pub async fn handle(&self, bytes: &[u8]) -> Vec<u8> {
        let response = self.process(bytes).await;
        self.codec.serialize(&response).unwrap_or_else(|_| {
            br#"{"protocol":{"name":"forrst","version":"1.0.0"},"id":null,"errors":[{"code":"INTERNAL_ERROR","message":"failed to serialize response"}]}"#.to_vec()
        })
    }

    async fn process(&self, bytes: &[u8]) -> ResponseEnvelope {
        // Step 1: parse envelope.
        let request = match self.codec.parse(bytes) {
            Ok(r) => r,
            Err(err) => return failure_without_request(&err),
        };
        let protocol = request.protocol.clone();
        let id = Some(request.id.clone());

        // Step 2: validate protocol version.
        if let Err(err) = forrst_wire::check_protocol(&request.protocol) {
            return failure(protocol, id, err, &self.supported_major_versions);
        }

        // Step 3: resolve (function, version).
        let requested_version = match request.call.version.as_deref().map(semver::Version::parse).transpose() {
            Ok(v) => v,
            Err(_) => {
                return failure(
                    protocol,
                    id,
                    ForrstError::new(ErrorCode::InvalidRequest, "call.version is not a valid semver string"),
                    &self.supported_major_versions,
                );
            }
        };
        let (descriptor, handler, resolution) = match self.functions.resolve(&request.call.function, requested_version.as_ref()) {
            Ok(r) => (r.0.clone(), r.1, r.2),
            Err(err) => return failure(protocol, id, err, &self.supported_major_versions),
        };

        // Step 4: maintenance gate.
        if let Err(err) = maintenance::check(self.maintenance.as_ref(), &descriptor.urn) {
            return failure(protocol, id, err, &self.supported_major_versions);
        }

        // Step 5: active extension set.
        let declared: Vec<String> = request
            .extensions
            .iter()
            .flatten()
            .map(|e| e.urn.clone())
            .collect();
        let active = match self.extensions.active_set(&declared, &descriptor) {
            Ok(a) => a,
            Err(err) => return failure(protocol, id, err, &self.supported_major_versions),
        };
        let event_bus = EventBus::from_active_extensions(&active);

        let mut response = ResponseEnvelope::success(protocol.clone(), id.clone(), Value::Null);
        let mut control = EventControl::default();

        // Step 6: fire RequestValidated.
        event_bus.dispatch(EventType::RequestValidated, &request, &mut response, &mut control).await;
        if control.is_stopped() {
            if let Some(short_circuited) = control.take_response() {
                return self.finalize(short_circuited, &request, &event_bus, &mut control, &resolution.deprecated).await;
            }
            return self.finalize(response, &request, &event_bus, &mut control, &resolution.deprecated).await;
        }

        // Step 7: validate arguments.
        let validation_errors = self.validator.validate(&descriptor.arguments, &request.call.arguments);
        if !validation_errors.is_empty() {
            let errors = validation_errors.iter().map(Into::into).collect();
            let failed = ResponseEnvelope::failure(protocol.clone(), id.clone(), errors);
            return self.finalize(failed, &request, &event_bus, &mut control, &resolution.deprecated).await;
        }

        let trace_options = extract_trace_options(&request);
        let ctx = RequestContext::new(&trace_options, None, None);

        // Step 8: fire ExecutingFunction.
        event_bus.dispatch(EventType::ExecutingFunction, &request, &mut response, &mut control).await;
        if control.is_stopped() {
            let resp = control.take_response().unwrap_or(response);
            return self.finalize(resp, &request, &event_bus, &mut control, &resolution.deprecated).await;
        }

        // Step 9: invoke function.
        let outcome = handler.invoke(request.call.arguments.clone(), &ctx).await;
        let mut response = match outcome {
            Ok(result) => ResponseEnvelope::success(protocol.clone(), id.clone(), result),
            Err(err) => ResponseEnvelope::failure(protocol.clone(), id.clone(), vec![(&err).into()]),
        };

        // Step 10: fire FunctionExecuted; attach tracing, retry guidance,
        // rate-limit/quota advisories, and result redaction.
        event_bus.dispatch(EventType::FunctionExecuted, &request, &mut response, &mut control).await;
        let tracing_ext = ctx.trace.finish();
        response.push_extension(TRACING_EXTENSION_URN, serde_json::to_value(&tracing_ext).ok());
        if let Some(code) = response.first_error_code() {
            let guidance = retry::derive(code);
            response.push_extension(RETRY_EXTENSION_URN, serde_json::to_value(&guidance).ok());
        }
        if let Some(limiter) = &self.rate_limiter {
            if let Some(report) = limiter.report(&descriptor.urn) {
                response.push_extension(RATE_LIMIT_EXTENSION_URN, serde_json::to_value(&report).ok());
            }
        }
        if let Some(reporter) = &self.quota_reporter {
            let entries = reporter.report(&descriptor.urn);
            if !entries.is_empty() {
                response.push_extension(QUOTA_EXTENSION_URN, serde_json::to_value(&entries).ok());
            }
        }
        if let Some(result) = response.result.as_mut() {
            let redaction_options = extract_redaction_options(&request);
            let mode = redaction_options.mode.unwrap_or(RedactionMode::Full);
            let policy = redaction_options.policy.unwrap_or_else(|| "default".to_string());
            match forrst_policy::redact(result, &self.sensitive_fields, mode, &policy, self.redaction_gate.as_ref()) {
                Ok(report) => response.push_extension(REDACTION_EXTENSION_URN, serde_json::to_value(&report).ok()),
                Err(err) => response = ResponseEnvelope::failure(protocol.clone(), id.clone(), vec![(&err).into()]),
            }
        }

        self.finalize(response, &request, &event_bus, &mut control, &resolution.deprecated).await
    }

    async fn finalize(
        &self,
        mut response: ResponseEnvelope,
        request: &RequestEnvelope,
        event_bus: &EventBus,
        control: &mut EventControl,
        deprecated: &Option<forrst_wire::Deprecation>,
    ) -> ResponseEnvelope {
        if let Some(deprecation) = deprecated {
            response.set_meta("deprecated", serde_json::to_value(deprecation).unwrap_or(Value::Null));
        }
        event_bus.dispatch(EventType::ResponseReady, request, &mut response, control).await;
        if let Some(replacement) = control.take_response() {
            return replacement;
        }
        response
    }
}

fn extract_trace_options(request: &RequestEnvelope) -> TraceOptions {
    request
        .context
        .as_ref()
        .and_then(|ctx| ctx.get(TRACING_EXTENSION_URN))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn failure(protocol: forrst_wire::Protocol, id: Option<String>, err: ForrstError, supported_major_versions: &[u64]) -> ResponseEnvelope {
    let mut err = err;
    if err.code == ErrorCode::InvalidProtocolVersion {
        err = err.with_detail("supported_major_versions", serde_json::to_value(supported_major_versions).unwrap_or(Value::Null));
    }
    ResponseEnvelope::failure(protocol, id, vec![(&err).into()])
}

fn failure_without_request(err: &ForrstError) -> ResponseEnvelope {
    ResponseEnvelope::failure(
        forrst_wire::Protocol { name: forrst_wire::PROTOCOL_NAME.to_string(), version: format!("{}.0.0", forrst_wire::PROTOCOL_MAJOR) },
        None,
        vec![err.into()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use forrst_wire::{ArgumentSpec, Protocol};

    fn base_request(function: &str, id: &str) -> Value {
        serde_json::json!({
            "protocol": {"name": "forrst", "version": "1.0.0"},
            "id": id,
            "call": {"function": function}
        })
    }

    #[tokio::test]
    async fn ping_round_trips_through_the_engine() {
        let engine = EngineBuilder::new().build();
        let body = serde_json::to_vec(&base_request("urn:cline:forrst:fn:ping", "r1")).unwrap();
        let out = engine.handle(&body).await;
        let response: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert!(response.is_well_formed());
        assert_eq!(response.id.as_deref(), Some("r1"));
        assert_eq!(response.result, Some(serde_json::json!({"pong": true})));
    }

    #[tokio::test]
    async fn unknown_function_is_function_not_found() {
        let engine = EngineBuilder::new().build();
        let body = serde_json::to_vec(&base_request("urn:acme:forrst:fn:missing", "r1")).unwrap();
        let out = engine.handle(&body).await;
        let response: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert_eq!(response.first_error_code(), Some(ErrorCode::FunctionNotFound));
    }

    #[tokio::test]
    async fn malformed_json_yields_null_id_parse_error() {
        let engine = EngineBuilder::new().build();
        let out = engine.handle(b"{not json").await;
        let response: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert_eq!(response.id, None);
        assert_eq!(response.first_error_code(), Some(ErrorCode::ParseError));
    }

    struct EchoHandler;
    #[async_trait]
    impl FunctionHandler for EchoHandler {
        async fn invoke(&self, arguments: Option<Map<String, Value>>, _ctx: &RequestContext) -> Result<Value, ForrstError> {
            Ok(Value::Object(arguments.unwrap_or_default()))
        }
    }

    fn echo_descriptor() -> FunctionDescriptor {
        FunctionDescriptor {
            urn: "urn:acme:forrst:fn:echo".into(),
            version: semver::Version::parse("1.0.0").unwrap(),
            stability: Stability::Stable,
            side_effects: vec![],
            arguments: vec![ArgumentSpec { name: "text".into(), type_name: "string".into(), required: true, description: None }],
            result: ResultSpec { type_name: "object".into(), description: None },
            errors: vec![],
            discoverable: true,
            deprecated: None,
            extensions: ExtensionParticipation::unrestricted(),
        }
    }

    #[tokio::test]
    async fn registered_function_is_invoked_with_arguments() {
        let engine = EngineBuilder::new().register_function(echo_descriptor(), EchoHandler).unwrap().build();
        let mut req = base_request("urn:acme:forrst:fn:echo", "r1");
        req["call"]["arguments"] = serde_json::json!({"text": "hi"});
        let body = serde_json::to_vec(&req).unwrap();
        let out = engine.handle(&body).await;
        let response: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert_eq!(response.result, Some(serde_json::json!({"text": "hi"})));
    }

    #[tokio::test]
    async fn missing_required_argument_is_invalid_arguments_with_pointer() {
        let engine = EngineBuilder::new().register_function(echo_descriptor(), EchoHandler).unwrap().build();
        let body = serde_json::to_vec(&base_request("urn:acme:forrst:fn:echo", "r1")).unwrap();
        let out = engine.handle(&body).await;
        let response: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert_eq!(response.first_error_code(), Some(ErrorCode::InvalidArguments));
    }

    #[tokio::test]
    async fn response_carries_tracing_extension_with_fresh_span() {
        let engine = EngineBuilder::new().build();
        let mut req = base_request("urn:cline:forrst:fn:ping", "r1");
        req["context"] = serde_json::json!({ TRACING_EXTENSION_URN: {"trace_id": "tr_abc", "span_id": "sp_01"} });
        let body = serde_json::to_vec(&req).unwrap();
        let out = engine.handle(&body).await;
        let response: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        let tracing = response.extensions.unwrap().into_iter().find(|e| e.urn == TRACING_EXTENSION_URN).unwrap();
        let data = tracing.data.unwrap();
        assert_eq!(data["trace_id"], "tr_abc");
        assert_ne!(data["span_id"], "sp_01");
    }

    #[tokio::test]
    async fn function_under_maintenance_short_circuits_with_retry_guidance() {
        let store = Arc::new(InMemoryMaintenanceStore::new());
        store.set_function_maintenance(
            "urn:acme:forrst:fn:echo",
            Some(maintenance::Maintenance {
                scope: maintenance::MaintenanceScope::Function,
                reason: "upgrade".into(),
                started_at: chrono::Utc::now(),
                until: None,
                retry_after: Amount::minutes(30),
            }),
        );
        let engine = EngineBuilder::new()
            .register_function(echo_descriptor(), EchoHandler)
            .unwrap()
            .with_maintenance_store(store)
            .build();
        let mut req = base_request("urn:acme:forrst:fn:echo", "r1");
        req["call"]["arguments"] = serde_json::json!({"text": "hi"});
        let body = serde_json::to_vec(&req).unwrap();
        let out = engine.handle(&body).await;
        let response: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert_eq!(response.first_error_code(), Some(ErrorCode::FunctionMaintenance));
    }

    #[tokio::test]
    async fn lock_lifecycle_through_reserved_functions() {
        let engine = EngineBuilder::new().build();
        engine.locks().acquire("forrst_lock:p:u:1", "owner-a", None).await;

        let mut req = base_request("urn:cline:forrst:ext:atomic-lock:fn:status", "r1");
        req["call"]["arguments"] = serde_json::json!({"key": "forrst_lock:p:u:1"});
        let out = engine.handle(&serde_json::to_vec(&req).unwrap()).await;
        let response: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert_eq!(response.result.unwrap()["locked"], true);

        let mut req = base_request("urn:cline:forrst:ext:atomic-lock:fn:release", "r2");
        req["call"]["arguments"] = serde_json::json!({"key": "forrst_lock:p:u:1", "owner": "owner-b"});
        let out = engine.handle(&serde_json::to_vec(&req).unwrap()).await;
        let response: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert_eq!(response.first_error_code(), Some(ErrorCode::LockOwnershipMismatch));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_through_reserved_function() {
        let engine = EngineBuilder::new().build();
        let token = engine.cancellation().issue().await;

        let mut req = base_request("urn:cline:forrst:ext:cancellation:fn:cancel", "r1");
        req["call"]["arguments"] = serde_json::json!({"token": token});
        let out = engine.handle(&serde_json::to_vec(&req).unwrap()).await;
        let response: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert_eq!(response.result, Some(serde_json::json!({"cancelled": true})));

        let out = engine.handle(&serde_json::to_vec(&req).unwrap()).await;
        let response: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert_eq!(response.result, Some(serde_json::json!({"cancelled": true})));
    }

    #[tokio::test]
    async fn describe_without_function_argument_lists_all_descriptors() {
        let engine = EngineBuilder::new().register_function(echo_descriptor(), EchoHandler).unwrap().build();
        let body = serde_json::to_vec(&base_request("urn:cline:forrst:fn:describe", "r1")).unwrap();
        let out = engine.handle(&body).await;
        let response: ResponseEnvelope = serde_json::from_slice(&out).unwrap();
        assert!(response.result.unwrap().as_array().unwrap().iter().any(|d| d["urn"] == "urn:acme:forrst:fn:echo"));
    }

    #[test]
    fn protocol_is_importable_for_fixture_construction() {
        let _ = Protocol { name: "forrst".into(), version: "1.0.0".into() };
    }
}
