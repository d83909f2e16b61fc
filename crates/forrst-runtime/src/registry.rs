// SPDX-License-Identifier: MIT OR Apache-2.0
//! `FunctionRegistry` and `ExtensionRegistry`: the read-after-boot maps the
//! pipeline consults to resolve `(urn, version)` and compute a request's
//! active extension set.
//!
//! Structurally these mirror the teacher crate's `BackendRegistry` — a typed
//! `HashMap<String, Arc<dyn _>>` with `register`/`get`/`list`/`contains` —
//! generalized to hold one or more versions per URN and to enforce the
//! reserved-namespace rule at registration time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use forrst_error::{ErrorCode, ForrstError};
use forrst_wire::{ExtensionDescriptor, ExtensionParticipation, FunctionDescriptor, RegisteredVersion};
use serde_json::{Map, Value};

use crate::trace::RequestContext;

/// A callable function body, invoked once the pipeline has resolved
/// `(urn, version)`, validated arguments, and computed the active extension
/// set.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    /// Invoke the function with validated arguments and the per-request
    /// context (tracing, cancellation token, deadline).
    async fn invoke(
        &self,
        arguments: Option<Map<String, Value>>,
        ctx: &RequestContext,
    ) -> Result<Value, ForrstError>;
}

struct RegisteredFunction {
    descriptor: FunctionDescriptor,
    handler: Arc<dyn FunctionHandler>,
}

/// Registry of callable functions, keyed by URN with one or more registered
/// versions each.
///
/// Read-only after boot: the concurrency model forbids mutating the
/// registry once requests are being served.
#[derive(Default)]
pub struct FunctionRegistry {
    by_urn: HashMap<String, Vec<RegisteredFunction>>,
    disabled: std::collections::HashSet<String>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function version under `descriptor.urn`.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_REQUEST` if the URN is malformed, claims the
    /// reserved `cline` vendor while `is_core` is `false`, or the
    /// descriptor's own invariants (extension participation exclusivity)
    /// are violated.
    pub fn register(
        &mut self,
        descriptor: FunctionDescriptor,
        handler: impl FunctionHandler + 'static,
        is_core: bool,
    ) -> Result<(), ForrstError> {
        let urn = forrst_wire::urn::parse(&descriptor.urn)?;
        forrst_wire::urn::enforce_reserved_namespace(&urn, is_core)?;
        descriptor.validate()?;

        self.by_urn
            .entry(urn.as_str().to_string())
            .or_default()
            .push(RegisteredFunction {
                descriptor,
                handler: Arc::new(handler),
            });
        Ok(())
    }

    /// Mark every version of `urn` as administratively disabled.
    pub fn disable(&mut self, urn: &str) {
        self.disabled.insert(urn.to_string());
    }

    /// Clear the disabled flag for `urn`.
    pub fn enable(&mut self, urn: &str) {
        self.disabled.remove(urn);
    }

    /// `true` if `urn` has been marked disabled.
    #[must_use]
    pub fn is_disabled(&self, urn: &str) -> bool {
        self.disabled.contains(urn)
    }

    /// Resolve `(urn, requested_version)` to a descriptor and handler.
    ///
    /// # Errors
    ///
    /// Returns `FUNCTION_NOT_FOUND` if the URN has no registered versions,
    /// `FUNCTION_DISABLED` if the URN is disabled, or `VERSION_NOT_FOUND`
    /// (via [`forrst_wire::version::resolve`]) if no version matches.
    pub fn resolve(
        &self,
        urn: &str,
        requested_version: Option<&semver::Version>,
    ) -> Result<(&FunctionDescriptor, Arc<dyn FunctionHandler>, forrst_wire::version::Resolution), ForrstError> {
        let versions = self.by_urn.get(urn).filter(|v| !v.is_empty()).ok_or_else(|| {
            ForrstError::new(ErrorCode::FunctionNotFound, format!("no function registered for '{urn}'"))
                .with_detail("function", urn)
        })?;

        if self.disabled.contains(urn) {
            return Err(
                ForrstError::new(ErrorCode::FunctionDisabled, format!("function '{urn}' is disabled"))
                    .with_detail("function", urn),
            );
        }

        let registered: Vec<RegisteredVersion> = versions
            .iter()
            .map(|r| RegisteredVersion {
                version: r.descriptor.version.clone(),
                deprecated: r.descriptor.deprecated.clone(),
            })
            .collect();

        let resolution = forrst_wire::version::resolve(urn, requested_version, &registered)?;

        let matched = versions
            .iter()
            .find(|r| r.descriptor.version == resolution.version)
            .expect("resolution always names a version present in `registered`");

        Ok((&matched.descriptor, Arc::clone(&matched.handler), resolution))
    }

    /// Return every registered URN, sorted.
    #[must_use]
    pub fn urns(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.by_urn.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    /// `true` if at least one version of `urn` is registered.
    #[must_use]
    pub fn contains(&self, urn: &str) -> bool {
        self.by_urn.contains_key(urn)
    }
}

/// A registered extension: its descriptor plus its event handler.
pub struct RegisteredExtension {
    /// Machine-readable registration record.
    pub descriptor: ExtensionDescriptor,
    /// Participation narrowing rules, if the extension only applies to a
    /// subset of functions. `None` means the extension itself imposes no
    /// restriction beyond each function's own [`ExtensionParticipation`].
    pub handler: Arc<dyn crate::bus::Extension>,
}

/// Registry of extensions, distinguishing the always-on global set from
/// extensions a caller must declare explicitly.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: HashMap<String, RegisteredExtension>,
}

impl ExtensionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_REQUEST` if the URN is malformed or claims the
    /// reserved `cline` vendor while `is_core` is `false`.
    pub fn register(
        &mut self,
        handler: Arc<dyn crate::bus::Extension>,
        is_core: bool,
    ) -> Result<(), ForrstError> {
        let descriptor = handler.descriptor().clone();
        let urn = forrst_wire::urn::parse(&descriptor.urn)?;
        forrst_wire::urn::enforce_reserved_namespace(&urn, is_core)?;
        self.extensions
            .insert(urn.as_str().to_string(), RegisteredExtension { descriptor, handler });
        Ok(())
    }

    /// `true` if `urn` is registered.
    #[must_use]
    pub fn contains(&self, urn: &str) -> bool {
        self.extensions.contains_key(urn)
    }

    /// Look up a registered extension by URN.
    #[must_use]
    pub fn get(&self, urn: &str) -> Option<&RegisteredExtension> {
        self.extensions.get(urn)
    }

    /// Compute the active extension set for a request, per §4.4: start with
    /// every global extension, add each declared URN, then narrow by the
    /// resolved function's [`ExtensionParticipation`].
    ///
    /// # Errors
    ///
    /// Returns `EXTENSION_NOT_SUPPORTED` if a declared URN is not
    /// registered, or `EXTENSION_NOT_APPLICABLE` if a declared URN is
    /// excluded (explicitly or by omission from an allow-list) by the
    /// resolved function.
    pub fn active_set(
        &self,
        declared: &[String],
        function: &FunctionDescriptor,
    ) -> Result<Vec<Arc<dyn crate::bus::Extension>>, ForrstError> {
        for urn in declared {
            if !self.contains(urn) {
                return Err(
                    ForrstError::new(ErrorCode::ExtensionNotSupported, format!("extension '{urn}' is not registered"))
                        .with_detail("extension", urn.clone()),
                );
            }
        }

        let mut active: Vec<String> = self
            .extensions
            .values()
            .filter(|e| e.descriptor.is_global)
            .map(|e| e.descriptor.urn.clone())
            .collect();
        for urn in declared {
            if !active.contains(urn) {
                active.push(urn.clone());
            }
        }

        let narrowed = function.extensions.narrow(&active);
        let narrowed: std::collections::HashSet<&str> = narrowed.into_iter().collect();

        for urn in declared {
            if !narrowed.contains(urn.as_str()) {
                return Err(ForrstError::new(
                    ErrorCode::ExtensionNotApplicable,
                    format!("extension '{urn}' does not apply to function '{}'", function.urn),
                )
                .with_detail("extension", urn.clone())
                .with_detail("function", function.urn.clone()));
            }
        }

        Ok(active
            .into_iter()
            .filter(|urn| narrowed.contains(urn.as_str()))
            .filter_map(|urn| self.extensions.get(&urn).map(|e| Arc::clone(&e.handler)))
            .collect())
    }

    /// Unrestricted `ExtensionParticipation` convenience, re-exported for
    /// callers building a [`FunctionDescriptor`] that opts every extension
    /// in.
    #[must_use]
    pub fn unrestricted() -> ExtensionParticipation {
        ExtensionParticipation::unrestricted()
    }
}
