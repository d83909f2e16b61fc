// SPDX-License-Identifier: MIT OR Apache-2.0
//! Synchronous, priority-ordered event bus driving the pipeline's six
//! lifecycle events.
//!
//! The teacher crate's `EventBus` fanned events out over a
//! `tokio::sync::broadcast` channel to independent async subscribers with no
//! ordering guarantee between them. That shape doesn't fit here: the
//! concurrency model requires `(priority asc, registration order asc)`
//! total ordering per event, the ability for a handler to stop propagation
//! or short-circuit the response, and a hard fatal/advisory error policy —
//! none of which a fire-and-forget broadcast channel can express. So instead
//! each extension registers an explicit `(priority, Arc<dyn Extension>)`
//! subscription, sorted once at boot, and dispatch walks that list in order
//! within the same request's worker — the "explicit subscription registry"
//! redesign called for over reflective/annotation-driven wiring.

use std::sync::Arc;

use async_trait::async_trait;
use forrst_error::{ErrorCode, ForrstError};
use forrst_wire::{ExtensionDescriptor, RequestEnvelope, ResponseEnvelope};
use tracing::warn;

/// One of the six fixed points in the pipeline where extensions may observe
/// or influence a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    RequestReceived,
    RequestParsed,
    RequestValidated,
    ExecutingFunction,
    FunctionExecuted,
    ResponseReady,
}

impl EventType {
    /// The wire name used in `ExtensionDescriptor::subscriptions`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestReceived => "RequestReceived",
            Self::RequestParsed => "RequestParsed",
            Self::RequestValidated => "RequestValidated",
            Self::ExecutingFunction => "ExecutingFunction",
            Self::FunctionExecuted => "FunctionExecuted",
            Self::ResponseReady => "ResponseReady",
        }
    }
}

/// Mutable control block a handler uses to halt dispatch or short-circuit
/// the response for the current event.
#[derive(Debug, Default)]
pub struct EventControl {
    stop_propagation: bool,
    response: Option<ResponseEnvelope>,
}

impl EventControl {
    /// Prevent any subscriber after the current one (for this event) from
    /// running.
    pub fn stop_propagation(&mut self) {
        self.stop_propagation = true;
    }

    /// `true` once a handler has called [`stop_propagation`](Self::stop_propagation).
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_propagation
    }

    /// Replace the in-flight response, short-circuiting the remainder of
    /// the pipeline once combined with `stop_propagation`.
    pub fn set_response(&mut self, response: ResponseEnvelope) {
        self.response = Some(response);
    }

    /// Take the short-circuit response set by a handler, if any.
    #[must_use]
    pub fn take_response(&mut self) -> Option<ResponseEnvelope> {
        self.response.take()
    }
}

/// An extension: a registered participant in the event bus.
///
/// Implementors correspond to the spec's "Extension" glossary entry: a
/// pluggable unit subscribing to one or more lifecycle events by priority.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Static registration metadata: URN, global/declared, fatal/advisory,
    /// and the event subscriptions this extension wants dispatched.
    fn descriptor(&self) -> &ExtensionDescriptor;

    /// Handle `event` for the in-flight request.
    ///
    /// # Errors
    ///
    /// Any `Err` is subject to the fatal/advisory policy in
    /// [`EventBus::dispatch`]: fatal extensions replace the response with
    /// `INTERNAL_ERROR`; advisory extensions are logged and ignored.
    async fn on_event(
        &self,
        event: EventType,
        request: &RequestEnvelope,
        response: &mut ResponseEnvelope,
        control: &mut EventControl,
    ) -> Result<(), ForrstError>;
}

struct Subscriber {
    event_type: String,
    priority: i32,
    registration_order: usize,
    extension: Arc<dyn Extension>,
}

/// Ordered dispatcher for the pipeline's six lifecycle events.
///
/// Built fresh per request from the active extension set computed by
/// [`crate::registry::ExtensionRegistry::active_set`], so there is no
/// shared mutable subscriber list to protect across requests — each
/// worker owns its own `EventBus` for the duration of one request.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    /// Build a bus from an ordered active extension set, subscribing each
    /// extension to every event it declares in its descriptor.
    #[must_use]
    pub fn from_active_extensions(extensions: &[Arc<dyn Extension>]) -> Self {
        let mut subscribers = Vec::new();
        for (registration_order, extension) in extensions.iter().enumerate() {
            for subscription in &extension.descriptor().subscriptions {
                subscribers.push(Subscriber {
                    event_type: subscription.event_type.clone(),
                    priority: subscription.priority,
                    registration_order,
                    extension: Arc::clone(extension),
                });
            }
        }
        subscribers.sort_by_key(|s| (s.priority, s.registration_order));
        Self { subscribers }
    }

    /// Dispatch `event` to every subscribed extension in
    /// `(priority asc, registration order asc)` order.
    ///
    /// Honors `control.stop_propagation()` (halts remaining subscribers for
    /// this event only) and the fatal/advisory extension error policy: a
    /// fatal extension's error replaces `response` with `INTERNAL_ERROR`
    /// (or the extension's declared specific code, if `on_event` returned
    /// one) and halts dispatch; an advisory extension's error is logged and
    /// dispatch continues with `response` unchanged.
    pub async fn dispatch(
        &self,
        event: EventType,
        request: &RequestEnvelope,
        response: &mut ResponseEnvelope,
        control: &mut EventControl,
    ) {
        for subscriber in &self.subscribers {
            if control.is_stopped() {
                break;
            }
            if subscriber.event_type != event.as_str() {
                continue;
            }
            let outcome = subscriber.extension.on_event(event, request, response, control).await;
            if let Err(err) = outcome {
                let descriptor = subscriber.extension.descriptor();
                if descriptor.is_error_fatal {
                    warn!(extension = %descriptor.urn, event = event.as_str(), error = %err.message, "fatal extension error, replacing response");
                    let replacement = ForrstError::new(ErrorCode::InternalError, format!("extension '{}' raised a fatal error: {}", descriptor.urn, err.message))
                        .with_detail("extension", descriptor.urn.clone())
                        .with_detail("extension_error_code", serde_json::to_value(err.code).unwrap_or(serde_json::Value::Null));
                    *response = ResponseEnvelope::failure(response.protocol.clone(), response.id.clone(), vec![(&replacement).into()]);
                    control.stop_propagation();
                    break;
                }
                warn!(extension = %descriptor.urn, event = event.as_str(), error = %err.message, "advisory extension error, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forrst_wire::{Protocol, Subscription};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn request() -> RequestEnvelope {
        RequestEnvelope {
            protocol: Protocol { name: "forrst".into(), version: "1.0.0".into() },
            id: "req-1".into(),
            call: forrst_wire::Call { function: "urn:acme:forrst:fn:noop".into(), version: None, arguments: None },
            context: None,
            extensions: None,
        }
    }

    fn response() -> ResponseEnvelope {
        ResponseEnvelope::success(Protocol { name: "forrst".into(), version: "1.0.0".into() }, Some("req-1".into()), serde_json::Value::Null)
    }

    struct RecordingExtension {
        descriptor: ExtensionDescriptor,
        order: Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    }

    #[async_trait]
    impl Extension for RecordingExtension {
        fn descriptor(&self) -> &ExtensionDescriptor {
            &self.descriptor
        }
        async fn on_event(
            &self,
            _event: EventType,
            _request: &RequestEnvelope,
            _response: &mut ResponseEnvelope,
            _control: &mut EventControl,
        ) -> Result<(), ForrstError> {
            self.order.lock().unwrap().push(self.label);
            Ok(())
        }
    }

    fn extension(urn: &str, priority: i32, label: &'static str, order: Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Extension> {
        Arc::new(RecordingExtension {
            descriptor: ExtensionDescriptor {
                urn: urn.into(),
                is_global: true,
                is_error_fatal: false,
                subscriptions: vec![Subscription { event_type: EventType::ExecutingFunction.as_str().into(), priority }],
                metadata: None,
            },
            order,
            label,
        })
    }

    #[tokio::test]
    async fn dispatch_runs_in_priority_then_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let extensions = vec![
            extension("urn:acme:forrst:ext:b", 10, "b", Arc::clone(&order)),
            extension("urn:acme:forrst:ext:a", 5, "a", Arc::clone(&order)),
            extension("urn:acme:forrst:ext:c", 10, "c", Arc::clone(&order)),
        ];
        let bus = EventBus::from_active_extensions(&extensions);
        let request = request();
        let mut response = response();
        let mut control = EventControl::default();
        bus.dispatch(EventType::ExecutingFunction, &request, &mut response, &mut control).await;
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    struct StoppingExtension {
        descriptor: ExtensionDescriptor,
        ran: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Extension for StoppingExtension {
        fn descriptor(&self) -> &ExtensionDescriptor {
            &self.descriptor
        }
        async fn on_event(
            &self,
            _event: EventType,
            _request: &RequestEnvelope,
            _response: &mut ResponseEnvelope,
            control: &mut EventControl,
        ) -> Result<(), ForrstError> {
            self.ran.fetch_add(1, Ordering::SeqCst);
            control.stop_propagation();
            Ok(())
        }
    }

    #[tokio::test]
    async fn stop_propagation_halts_remaining_subscribers() {
        let ran = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let stopper: Arc<dyn Extension> = Arc::new(StoppingExtension {
            descriptor: ExtensionDescriptor {
                urn: "urn:acme:forrst:ext:stop".into(),
                is_global: true,
                is_error_fatal: false,
                subscriptions: vec![Subscription { event_type: EventType::ExecutingFunction.as_str().into(), priority: 0 }],
                metadata: None,
            },
            ran: Arc::clone(&ran),
        });
        let extensions = vec![stopper, extension("urn:acme:forrst:ext:after", 100, "after", Arc::clone(&order))];
        let bus = EventBus::from_active_extensions(&extensions);
        let request = request();
        let mut response = response();
        let mut control = EventControl::default();
        bus.dispatch(EventType::ExecutingFunction, &request, &mut response, &mut control).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(order.lock().unwrap().is_empty());
    }

    struct FailingExtension {
        descriptor: ExtensionDescriptor,
    }

    #[async_trait]
    impl Extension for FailingExtension {
        fn descriptor(&self) -> &ExtensionDescriptor {
            &self.descriptor
        }
        async fn on_event(
            &self,
            _event: EventType,
            _request: &RequestEnvelope,
            _response: &mut ResponseEnvelope,
            _control: &mut EventControl,
        ) -> Result<(), ForrstError> {
            Err(ForrstError::new(ErrorCode::DependencyError, "downstream exploded"))
        }
    }

    #[tokio::test]
    async fn fatal_extension_error_replaces_response_with_internal_error() {
        let fatal: Arc<dyn Extension> = Arc::new(FailingExtension {
            descriptor: ExtensionDescriptor {
                urn: "urn:acme:forrst:ext:fatal".into(),
                is_global: true,
                is_error_fatal: true,
                subscriptions: vec![Subscription { event_type: EventType::ExecutingFunction.as_str().into(), priority: 0 }],
                metadata: None,
            },
        });
        let bus = EventBus::from_active_extensions(&[fatal]);
        let request = request();
        let mut response = response();
        let mut control = EventControl::default();
        bus.dispatch(EventType::ExecutingFunction, &request, &mut response, &mut control).await;
        assert_eq!(response.first_error_code(), Some(ErrorCode::InternalError));
    }

    #[tokio::test]
    async fn subscriber_only_fires_for_its_subscribed_event() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let only_executing = extension("urn:acme:forrst:ext:only-executing", 0, "only-executing", Arc::clone(&order));
        let bus = EventBus::from_active_extensions(&[only_executing]);
        let request = request();
        let mut response = response();
        let mut control = EventControl::default();

        bus.dispatch(EventType::RequestReceived, &request, &mut response, &mut control).await;
        assert!(order.lock().unwrap().is_empty());

        bus.dispatch(EventType::ExecutingFunction, &request, &mut response, &mut control).await;
        assert_eq!(*order.lock().unwrap(), vec!["only-executing"]);
    }

    #[tokio::test]
    async fn advisory_extension_error_is_ignored() {
        let advisory: Arc<dyn Extension> = Arc::new(FailingExtension {
            descriptor: ExtensionDescriptor {
                urn: "urn:acme:forrst:ext:advisory".into(),
                is_global: true,
                is_error_fatal: false,
                subscriptions: vec![Subscription { event_type: EventType::ExecutingFunction.as_str().into(), priority: 0 }],
                metadata: None,
            },
        });
        let bus = EventBus::from_active_extensions(&[advisory]);
        let request = request();
        let mut response = response();
        let mut control = EventControl::default();
        bus.dispatch(EventType::ExecutingFunction, &request, &mut response, &mut control).await;
        assert!(response.result.is_some());
        assert!(response.errors.is_none());
    }
}
