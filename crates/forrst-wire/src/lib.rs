// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Wire-level building blocks for the Forrst RPC runtime: the envelope
//! types, the codec that parses/serializes them, URN syntax and the
//! reserved core namespace, the semver-based version resolver, and
//! function/extension descriptors.

pub mod codec;
pub mod descriptor;
pub mod envelope;
pub mod urn;
pub mod version;

pub use codec::Codec;
pub use descriptor::{
    ArgumentSpec, ErrorSpec, ExtensionDescriptor, ExtensionParticipation, FunctionDescriptor,
    ResultSpec, SideEffect, Stability, Subscription,
};
pub use envelope::{Call, ExtensionRequest, ExtensionResponse, Protocol, RequestEnvelope, ResponseEnvelope};
pub use urn::{Urn, UrnKind};
pub use version::{Deprecation, RegisteredVersion, Resolution};

/// The implementation name every `protocol.name` must match.
pub const PROTOCOL_NAME: &str = "forrst";

/// The major protocol version this implementation speaks. Requests whose
/// `protocol.version` major component does not match are rejected with
/// `INVALID_PROTOCOL_VERSION` by the pipeline.
pub const PROTOCOL_MAJOR: u64 = 1;

/// Parse and validate a request's `protocol` header against
/// [`PROTOCOL_NAME`]/[`PROTOCOL_MAJOR`].
///
/// # Errors
///
/// Returns `INVALID_PROTOCOL_VERSION` if `protocol.name` doesn't match or
/// `protocol.version`'s major component isn't supported, listing the
/// supported major in `details`.
pub fn check_protocol(protocol: &Protocol) -> Result<(), forrst_error::ForrstError> {
    use forrst_error::{ErrorCode, ForrstError};

    if protocol.name != PROTOCOL_NAME {
        return Err(ForrstError::new(
            ErrorCode::InvalidProtocolVersion,
            format!("unrecognized protocol name '{}'", protocol.name),
        )
        .with_detail("expected_name", PROTOCOL_NAME));
    }

    let parsed = semver::Version::parse(&protocol.version).map_err(|_| {
        ForrstError::new(
            ErrorCode::InvalidProtocolVersion,
            format!("malformed protocol version '{}'", protocol.version),
        )
    })?;

    if parsed.major != PROTOCOL_MAJOR {
        return Err(ForrstError::new(
            ErrorCode::InvalidProtocolVersion,
            format!(
                "protocol major version {} is unsupported; this server speaks major {PROTOCOL_MAJOR}",
                parsed.major
            ),
        )
        .with_detail("supported_major", PROTOCOL_MAJOR)
        .with_detail("requested_version", protocol.version.clone()));
    }

    Ok(())
}
