//! Parse/serialize the wire-level JSON envelope, enforcing the structural
//! invariants from the spec's external-interfaces section: single JSON
//! object, UTF-8, size caps, arrays-at-top-level rejected, unknown members
//! ignored.

use forrst_error::{ErrorCode, ErrorSource, ForrstError};
use serde_json::Value;

use crate::envelope::{RequestEnvelope, ResponseEnvelope};

/// Default request body cap: 1 MiB.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1_000_000;
/// Default response body cap: 10 MiB.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10_000_000;

/// Stateless codec for a configured pair of size caps.
///
/// ```
/// use forrst_wire::codec::Codec;
///
/// let codec = Codec::default();
/// let bytes = br#"{"protocol":{"name":"forrst","version":"1.0.0"},"id":"r1","call":{"function":"urn:acme:forrst:fn:ping"}}"#;
/// let envelope = codec.parse(bytes).unwrap();
/// assert_eq!(envelope.id, "r1");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    max_request_bytes: usize,
    max_response_bytes: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl Codec {
    /// Build a codec with explicit size caps (bytes).
    #[must_use]
    pub fn with_limits(max_request_bytes: usize, max_response_bytes: usize) -> Self {
        Self {
            max_request_bytes,
            max_response_bytes,
        }
    }

    /// The configured request body cap, in bytes.
    #[must_use]
    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    /// The configured response body cap, in bytes.
    #[must_use]
    pub fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }

    /// Parse a request envelope from raw bytes.
    ///
    /// # Errors
    ///
    /// - `PARSE_ERROR` (with `source.position` = byte offset) on malformed
    ///   JSON or invalid UTF-8.
    /// - `INVALID_REQUEST` when the document is valid JSON but not a single
    ///   top-level object, exceeds the configured size cap, or is missing a
    ///   member the envelope requires.
    pub fn parse(&self, bytes: &[u8]) -> Result<RequestEnvelope, ForrstError> {
        if bytes.len() > self.max_request_bytes {
            return Err(ForrstError::new(
                ErrorCode::InvalidRequest,
                format!(
                    "request body of {} bytes exceeds the {}-byte limit",
                    bytes.len(),
                    self.max_request_bytes
                ),
            )
            .with_detail("max_bytes", self.max_request_bytes)
            .with_detail("actual_bytes", bytes.len()));
        }

        if let Err(e) = std::str::from_utf8(bytes) {
            return Err(ForrstError::new(ErrorCode::ParseError, "request body is not valid UTF-8")
                .with_source(ErrorSource::Position(e.valid_up_to() as u64)));
        }

        let value: Value = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => {
                return Err(ForrstError::new(ErrorCode::ParseError, e.to_string())
                    .with_source(ErrorSource::Position(byte_offset(bytes, &e))));
            }
        };

        if !value.is_object() {
            return Err(ForrstError::new(
                ErrorCode::InvalidRequest,
                "request body must be a single top-level JSON object",
            ));
        }

        serde_json::from_value(value).map_err(|e| {
            ForrstError::new(
                ErrorCode::InvalidRequest,
                format!("request envelope is structurally invalid: {e}"),
            )
        })
    }

    /// Serialize a response envelope to UTF-8 bytes.
    ///
    /// # Errors
    ///
    /// Returns `INTERNAL_ERROR` if the serialized document would exceed the
    /// configured response size cap — this should never happen for
    /// well-formed responses but guards against a runaway `result`/`meta`
    /// payload from a misbehaving function body.
    pub fn serialize(&self, response: &ResponseEnvelope) -> Result<Vec<u8>, ForrstError> {
        let bytes = serde_json::to_vec(response)
            .map_err(|e| ForrstError::new(ErrorCode::InternalError, e.to_string()))?;
        if bytes.len() > self.max_response_bytes {
            return Err(ForrstError::new(
                ErrorCode::InternalError,
                format!(
                    "serialized response of {} bytes exceeds the {}-byte limit",
                    bytes.len(),
                    self.max_response_bytes
                ),
            ));
        }
        Ok(bytes)
    }
}

/// Convert a `serde_json::Error`'s (1-indexed line, column) into a 0-indexed
/// byte offset into the original input, so `source.position` means the same
/// thing regardless of how many lines of whitespace precede the fault.
fn byte_offset(input: &[u8], err: &serde_json::Error) -> u64 {
    let target_line = err.line().saturating_sub(1);
    let mut offset = 0usize;
    let mut line = 0usize;
    for (i, b) in input.iter().enumerate() {
        if line == target_line {
            offset = i;
            break;
        }
        if *b == b'\n' {
            line += 1;
        }
    }
    (offset + err.column().saturating_sub(1)) as u64
}
