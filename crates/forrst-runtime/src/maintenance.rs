// SPDX-License-Identifier: MIT OR Apache-2.0
//! Maintenance gate (§4.11): a server-wide or per-function check evaluated
//! before invocation. A positive result short-circuits the pipeline with a
//! fatal `SERVER_MAINTENANCE`/`FUNCTION_MAINTENANCE` error.
//!
//! Grounded on the teacher crate's `BudgetTracker`/`BudgetStatus` gate — an
//! atomic/mutex-guarded store consulted before a unit of work runs and
//! capable of rejecting it outright — adapted here from consumption
//! tracking to simple presence checking.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use forrst_error::{ErrorCode, ForrstError};
use serde::{Deserialize, Serialize};

use crate::Amount;

/// Which part of the system a [`Maintenance`] window covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceScope {
    Server,
    Function,
}

/// A declared maintenance window, attached to a short-circuited response
/// as the `maintenance` meta entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Maintenance {
    pub scope: MaintenanceScope,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    pub retry_after: Amount,
}

/// Server-wide or per-function maintenance store, consulted once per
/// request before invocation.
pub trait MaintenanceStore: Send + Sync {
    /// The active server-wide maintenance window, if any.
    fn server_maintenance(&self) -> Option<Maintenance>;

    /// The active maintenance window for `urn`, if any.
    fn function_maintenance(&self, urn: &str) -> Option<Maintenance>;
}

/// In-process [`MaintenanceStore`], suitable for tests or a single-process
/// deployment driven by an operator toggling maintenance windows directly.
#[derive(Default)]
pub struct InMemoryMaintenanceStore {
    server: Mutex<Option<Maintenance>>,
    functions: Mutex<HashMap<String, Maintenance>>,
}

impl InMemoryMaintenanceStore {
    /// Create a store with no active maintenance windows.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or clear, with `None`) the server-wide maintenance window.
    pub fn set_server_maintenance(&self, maintenance: Option<Maintenance>) {
        *self.server.lock().expect("maintenance mutex poisoned") = maintenance;
    }

    /// Declare (or clear, with `None`) a maintenance window for `urn`.
    pub fn set_function_maintenance(&self, urn: &str, maintenance: Option<Maintenance>) {
        let mut functions = self.functions.lock().expect("maintenance mutex poisoned");
        match maintenance {
            Some(m) => {
                functions.insert(urn.to_string(), m);
            }
            None => {
                functions.remove(urn);
            }
        }
    }
}

impl MaintenanceStore for InMemoryMaintenanceStore {
    fn server_maintenance(&self) -> Option<Maintenance> {
        self.server.lock().expect("maintenance mutex poisoned").clone()
    }

    fn function_maintenance(&self, urn: &str) -> Option<Maintenance> {
        self.functions.lock().expect("maintenance mutex poisoned").get(urn).cloned()
    }
}

/// Evaluate the maintenance gate for `urn` against `store`. Server-wide
/// maintenance takes precedence over a function-specific window.
///
/// # Errors
///
/// Returns `SERVER_MAINTENANCE` or `FUNCTION_MAINTENANCE` (fatal, per
/// §4.6 step 4) if a window is active, with the `Maintenance` object
/// attached as a detail for the caller to surface in the response.
pub fn check(store: &dyn MaintenanceStore, urn: &str) -> Result<(), ForrstError> {
    if let Some(maintenance) = store.server_maintenance() {
        return Err(maintenance_error(ErrorCode::ServerMaintenance, "server is under maintenance", None, maintenance));
    }
    if let Some(maintenance) = store.function_maintenance(urn) {
        return Err(maintenance_error(
            ErrorCode::FunctionMaintenance,
            format!("function '{urn}' is under maintenance"),
            Some(urn),
            maintenance,
        ));
    }
    Ok(())
}

/// Build the fatal maintenance error, with `details` flattened to the wire
/// shape `{function?, reason, until?, retry_after}` rather than nesting the
/// `Maintenance` object under a single key.
fn maintenance_error(code: ErrorCode, message: impl Into<String>, function: Option<&str>, maintenance: Maintenance) -> ForrstError {
    let mut err = ForrstError::new(code, message)
        .with_detail("reason", maintenance.reason)
        .with_detail("retry_after", maintenance.retry_after);
    if let Some(function) = function {
        err = err.with_detail("function", function);
    }
    if let Some(until) = maintenance.until {
        err = err.with_detail("until", until);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(scope: MaintenanceScope) -> Maintenance {
        Maintenance {
            scope,
            reason: "scheduled upgrade".into(),
            started_at: Utc::now(),
            until: None,
            retry_after: Amount::minutes(30),
        }
    }

    #[test]
    fn no_maintenance_passes() {
        let store = InMemoryMaintenanceStore::new();
        assert!(check(&store, "urn:acme:forrst:fn:reports-generate").is_ok());
    }

    #[test]
    fn server_maintenance_is_fatal_and_takes_precedence() {
        let store = InMemoryMaintenanceStore::new();
        store.set_server_maintenance(Some(window(MaintenanceScope::Server)));
        store.set_function_maintenance("urn:acme:forrst:fn:reports-generate", Some(window(MaintenanceScope::Function)));
        let err = check(&store, "urn:acme:forrst:fn:reports-generate").unwrap_err();
        assert_eq!(err.code, ErrorCode::ServerMaintenance);
    }

    #[test]
    fn function_maintenance_is_fatal_for_that_function_only() {
        let store = InMemoryMaintenanceStore::new();
        store.set_function_maintenance("urn:acme:forrst:fn:reports-generate", Some(window(MaintenanceScope::Function)));
        let err = check(&store, "urn:acme:forrst:fn:reports-generate").unwrap_err();
        assert_eq!(err.code, ErrorCode::FunctionMaintenance);
        assert!(check(&store, "urn:acme:forrst:fn:orders-create").is_ok());
    }

    #[test]
    fn function_maintenance_error_details_match_flat_wire_shape() {
        let store = InMemoryMaintenanceStore::new();
        store.set_function_maintenance("urn:acme:forrst:fn:reports-generate", Some(window(MaintenanceScope::Function)));
        let err = check(&store, "urn:acme:forrst:fn:reports-generate").unwrap_err();
        assert_eq!(err.details["function"], "urn:acme:forrst:fn:reports-generate");
        assert_eq!(err.details["reason"], "scheduled upgrade");
        assert!(!err.details.contains_key("maintenance"));
        assert!(!err.details.contains_key("until"));
        assert_eq!(err.details["retry_after"]["value"], 30);
    }

    #[test]
    fn clearing_maintenance_restores_availability() {
        let store = InMemoryMaintenanceStore::new();
        store.set_server_maintenance(Some(window(MaintenanceScope::Server)));
        store.set_server_maintenance(None);
        assert!(check(&store, "urn:acme:forrst:fn:ping").is_ok());
    }
}
