//! URN syntax validation, the reserved `cline` vendor namespace, and
//! dotted-name-to-URN normalization.

use forrst_error::{ErrorCode, ForrstError};

/// Vendor segment reserved for core functions and extensions. Any
/// non-core registration that uses this vendor fails with a
/// reserved-namespace error.
pub const RESERVED_VENDOR: &str = "cline";

/// Kind of resource a function/extension URN names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrnKind {
    /// `urn:<vendor>:forrst:fn:<name>`
    Function,
    /// `urn:<vendor>:forrst:ext:<ext>`
    Extension,
}

/// A parsed, validated Forrst URN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Urn {
    /// Raw string this was parsed from (already normalized to the
    /// canonical `cline` spelling — see [`parse`]'s alias handling).
    raw: String,
    vendor: String,
    kind: UrnKind,
    /// Path segments after `fn`/`ext` (e.g. `["release"]` for
    /// `urn:cline:forrst:ext:atomic-lock:fn:release`, conceptually
    /// `atomic-lock` then `fn` then `release`).
    segments: Vec<String>,
}

impl Urn {
    /// Vendor segment (e.g. `"acme"`, or `"cline"` for core).
    #[must_use]
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Whether this names a function or an extension.
    #[must_use]
    pub fn kind(&self) -> UrnKind {
        self.kind
    }

    /// Path segments following the `fn`/`ext` tag.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// `true` if this URN is in the reserved `cline` core namespace.
    #[must_use]
    pub fn is_core(&self) -> bool {
        self.vendor == RESERVED_VENDOR
    }

    /// The canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for Urn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse and validate a URN against
/// `^urn:[a-z][a-z0-9-]*:forrst:(ext|fn)(:[a-z][a-z0-9-]*)+$`.
///
/// The source's `urn:forrst:ext:*` spelling (vendor segment omitted) is
/// accepted as an alias for `urn:cline:forrst:ext:*` and normalized to the
/// canonical `cline` form — see the spec's open-questions note on core
/// extension aliasing.
///
/// # Errors
///
/// Returns `INVALID_REQUEST` if the string does not match the grammar.
pub fn parse(s: &str) -> Result<Urn, ForrstError> {
    let normalized = alias_to_canonical(s);
    let rest = normalized
        .strip_prefix("urn:")
        .ok_or_else(|| malformed(s))?;

    let mut parts = rest.splitn(2, ':');
    let vendor = parts.next().ok_or_else(|| malformed(s))?;
    let remainder = parts.next().ok_or_else(|| malformed(s))?;

    validate_label(vendor).map_err(|_| malformed(s))?;

    let remainder = remainder.strip_prefix("forrst:").ok_or_else(|| malformed(s))?;
    let mut segs: Vec<&str> = remainder.split(':').collect();
    if segs.is_empty() {
        return Err(malformed(s));
    }
    let tag = segs.remove(0);
    let kind = match tag {
        "fn" => UrnKind::Function,
        "ext" => UrnKind::Extension,
        _ => return Err(malformed(s)),
    };
    if segs.is_empty() {
        return Err(malformed(s));
    }
    for seg in &segs {
        validate_label(seg).map_err(|_| malformed(s))?;
    }

    Ok(Urn {
        raw: normalized,
        vendor: vendor.to_string(),
        kind,
        segments: segs.into_iter().map(str::to_string).collect(),
    })
}

/// Normalize `urn:forrst:ext:*`/`urn:forrst:fn:*` (no vendor segment) to the
/// canonical `urn:cline:forrst:...` spelling. Any URN that already names a
/// vendor is returned unchanged.
fn alias_to_canonical(s: &str) -> String {
    if let Some(rest) = s.strip_prefix("urn:forrst:") {
        format!("urn:{RESERVED_VENDOR}:forrst:{rest}")
    } else {
        s.to_string()
    }
}

fn validate_label(s: &str) -> Result<(), ()> {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return Err(()),
    }
    if chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        Ok(())
    } else {
        Err(())
    }
}

fn malformed(s: &str) -> ForrstError {
    ForrstError::new(ErrorCode::InvalidRequest, format!("malformed URN: {s}"))
        .with_detail("urn", s)
}

/// Enforce the reserved-namespace rule at registration time: a non-core
/// registration may not claim the `cline` vendor.
///
/// # Errors
///
/// Returns `INVALID_REQUEST` if `urn` claims the `cline` vendor while
/// `is_core` is `false`.
pub fn enforce_reserved_namespace(urn: &Urn, is_core: bool) -> Result<(), ForrstError> {
    if urn.is_core() && !is_core {
        return Err(ForrstError::new(
            ErrorCode::InvalidRequest,
            format!(
                "registration of '{}' is rejected: the '{RESERVED_VENDOR}' vendor is reserved for core functions and extensions",
                urn.as_str()
            ),
        )
        .with_detail("urn", urn.as_str()));
    }
    Ok(())
}

/// Normalize a dotted compatibility name (`orders.create`) or an already
/// fully-qualified URN into a lookup key. Dotted names resolve through the
/// same registry as URNs by mapping to `urn:<vendor>:forrst:fn:<dotted>`
/// only for *display*; the registry itself indexes on the literal
/// caller-supplied string as an alias key (see
/// `forrst_runtime::registry::FunctionRegistry`), since the spec does not
/// mandate a single canonical vendor for dotted compatibility names.
#[must_use]
pub fn is_dotted_name(s: &str) -> bool {
    !s.starts_with("urn:") && s.contains('.')
}
