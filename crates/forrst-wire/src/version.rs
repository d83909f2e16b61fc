//! Per-function semver resolution: exact lookup, default-to-highest-stable,
//! and the `deprecated` meta-attachment hook.
//!
//! The precedence and selection rules are those of the version resolver
//! component: requested versions resolve exactly or fail with
//! `VERSION_NOT_FOUND`; an absent request resolves to the highest
//! registered version with an empty prerelease tag.

use forrst_error::{ErrorCode, ForrstError};
use semver::Version;
use serde::{Deserialize, Serialize};

/// One registered version of a function, carrying whatever the registry
/// needs to know to select and annotate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredVersion {
    /// The semver itself.
    pub version: Version,
    /// Present when this version is deprecated; attached to response `meta`
    /// (non-fatal) on selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<Deprecation>,
}

/// A deprecation notice for a resolved version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deprecation {
    /// Why this version is deprecated.
    pub reason: String,
    /// RFC 3339 sunset date, if scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sunset: Option<String>,
}

/// The outcome of a successful resolution: the selected version plus any
/// deprecation notice to surface in response `meta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The concrete version selected.
    pub version: Version,
    /// Carried over from the matching [`RegisteredVersion`], if any.
    pub deprecated: Option<Deprecation>,
}

/// Resolve `(function, requested_version?)` against a function's registered
/// versions.
///
/// Rules, in order:
/// 1. A requested version selects the exact registered match, or fails with
///    `VERSION_NOT_FOUND` carrying `available_versions`.
/// 2. An absent request selects the highest registered version with an
///    empty prerelease tag, or fails with `VERSION_NOT_FOUND` if every
///    registered version is a prerelease.
///
/// # Errors
///
/// Returns `VERSION_NOT_FOUND` per the rules above.
pub fn resolve(
    function: &str,
    requested: Option<&Version>,
    registered: &[RegisteredVersion],
) -> Result<Resolution, ForrstError> {
    match requested {
        Some(requested) => registered
            .iter()
            .find(|r| &r.version == requested)
            .map(|r| Resolution {
                version: r.version.clone(),
                deprecated: r.deprecated.clone(),
            })
            .ok_or_else(|| version_not_found(function, Some(requested), registered)),
        None => registered
            .iter()
            .filter(|r| r.version.pre.is_empty())
            .max_by(|a, b| a.version.cmp(&b.version))
            .map(|r| Resolution {
                version: r.version.clone(),
                deprecated: r.deprecated.clone(),
            })
            .ok_or_else(|| version_not_found(function, None, registered)),
    }
}

fn version_not_found(
    function: &str,
    requested: Option<&Version>,
    registered: &[RegisteredVersion],
) -> ForrstError {
    let available: Vec<String> = registered.iter().map(|r| r.version.to_string()).collect();
    let mut err = ForrstError::new(
        ErrorCode::VersionNotFound,
        format!("no matching version registered for function '{function}'"),
    )
    .with_detail("function", function)
    .with_detail("available_versions", available);
    if let Some(requested) = requested {
        err = err.with_detail("requested_version", requested.to_string());
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn registered(versions: &[&str]) -> Vec<RegisteredVersion> {
        versions
            .iter()
            .map(|s| RegisteredVersion {
                version: v(s),
                deprecated: None,
            })
            .collect()
    }

    #[test]
    fn precedence_orders_prerelease_before_release() {
        let mut versions = vec![
            v("1.0.0"),
            v("1.0.0-rc.1"),
            v("1.0.0-beta.1"),
            v("1.0.0-alpha.1"),
            v("1.0.1"),
            v("1.1.0"),
            v("2.0.0"),
        ];
        versions.sort();
        assert_eq!(
            versions,
            vec![
                v("1.0.0-alpha.1"),
                v("1.0.0-beta.1"),
                v("1.0.0-rc.1"),
                v("1.0.0"),
                v("1.0.1"),
                v("1.1.0"),
                v("2.0.0"),
            ]
        );
    }

    #[test]
    fn exact_request_resolves() {
        let reg = registered(&["1.0.0", "2.0.0", "3.0.0-beta.1"]);
        let resolved = resolve("orders.create", Some(&v("2.0.0")), &reg).unwrap();
        assert_eq!(resolved.version, v("2.0.0"));
    }

    #[test]
    fn exact_request_missing_is_version_not_found_with_available_list() {
        let reg = registered(&["1.0.0", "2.0.0", "3.0.0-beta.1"]);
        let err = resolve("orders.create", Some(&v("5.0.0")), &reg).unwrap_err();
        assert_eq!(err.code, ErrorCode::VersionNotFound);
        let available = err.details.get("available_versions").unwrap();
        assert_eq!(
            available,
            &serde_json::json!(["1.0.0", "2.0.0", "3.0.0-beta.1"])
        );
        assert_eq!(
            err.details.get("requested_version").unwrap(),
            &serde_json::json!("5.0.0")
        );
    }

    #[test]
    fn default_resolution_picks_highest_stable() {
        let reg = registered(&["1.0.0", "2.0.0", "3.0.0-beta.1"]);
        let resolved = resolve("orders.create", None, &reg).unwrap();
        assert_eq!(resolved.version, v("2.0.0"));
    }

    #[test]
    fn default_resolution_fails_when_only_prereleases_registered() {
        let reg = registered(&["1.0.0-alpha.1", "1.0.0-rc.1"]);
        let err = resolve("orders.create", None, &reg).unwrap_err();
        assert_eq!(err.code, ErrorCode::VersionNotFound);
    }

    #[test]
    fn deprecated_version_carries_notice_through_resolution() {
        let reg = vec![
            RegisteredVersion {
                version: v("1.0.0"),
                deprecated: Some(Deprecation {
                    reason: "use v2".into(),
                    sunset: Some("2026-12-31T00:00:00Z".into()),
                }),
            },
            RegisteredVersion {
                version: v("2.0.0"),
                deprecated: None,
            },
        ];
        let resolved = resolve("orders.create", Some(&v("1.0.0")), &reg).unwrap();
        assert_eq!(resolved.deprecated.unwrap().reason, "use v2");
    }

    #[test]
    fn spec_scenario_default_version_resolution() {
        let reg = vec![
            RegisteredVersion {
                version: v("1.0.0"),
                deprecated: Some(Deprecation {
                    reason: "legacy".into(),
                    sunset: None,
                }),
            },
            RegisteredVersion {
                version: v("2.0.0"),
                deprecated: None,
            },
            RegisteredVersion {
                version: v("3.0.0-beta.1"),
                deprecated: None,
            },
        ];
        let resolved = resolve("orders.create", None, &reg).unwrap();
        assert_eq!(resolved.version, v("2.0.0"));
        assert!(resolved.deprecated.is_none());
    }
}
