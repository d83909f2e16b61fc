//! Pluggable argument validation.
//!
//! The pipeline calls a [`Validator`] once per invocation with the
//! resolved function's [`ArgumentSpec`] list and the caller-supplied
//! arguments, and aggregates *every* failure it reports rather than
//! stopping at the first — so a caller who got three fields wrong sees
//! three errors, not one.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use forrst_error::{ErrorCode, ErrorSource, ForrstError};
use forrst_wire::ArgumentSpec;
use serde_json::{Map, Value};

/// Validates a call's arguments against a function's declared
/// [`ArgumentSpec`] list.
///
/// Implementations must aggregate all failures rather than short-circuit,
/// so the pipeline can report every bad field in a single response.
pub trait Validator: Send + Sync {
    /// Validate `arguments` against `specs`, returning one [`ForrstError`]
    /// per failure (empty if the call is valid).
    fn validate(&self, specs: &[ArgumentSpec], arguments: &Option<Map<String, Value>>) -> Vec<ForrstError>;
}

/// The default validator: checks required-field presence and a minimal set
/// of JSON-type tags (`string`, `integer`, `number`, `boolean`, `object`,
/// `array`, `any`). Anything richer (formats, ranges, enum membership) is
/// left to a function-specific [`Validator`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicValidator;

impl Validator for BasicValidator {
    fn validate(&self, specs: &[ArgumentSpec], arguments: &Option<Map<String, Value>>) -> Vec<ForrstError> {
        let empty = Map::new();
        let args = arguments.as_ref().unwrap_or(&empty);
        let mut errors = Vec::new();

        for spec in specs {
            let pointer = format!("/call/arguments/{}", escape_pointer_segment(&spec.name));
            match args.get(&spec.name) {
                None => {
                    if spec.required {
                        errors.push(
                            ForrstError::new(
                                ErrorCode::InvalidArguments,
                                format!("missing required argument '{}'", spec.name),
                            )
                            .with_source(ErrorSource::Pointer(pointer))
                            .with_detail("argument", spec.name.clone()),
                        );
                    }
                }
                Some(value) => {
                    if let Err(message) = type_matches(&spec.type_name, value) {
                        errors.push(
                            ForrstError::new(ErrorCode::InvalidArguments, message)
                                .with_source(ErrorSource::Pointer(pointer))
                                .with_detail("argument", spec.name.clone())
                                .with_detail("expected_type", spec.type_name.clone()),
                        );
                    }
                }
            }
        }

        errors
    }
}

fn type_matches(type_name: &str, value: &Value) -> Result<(), String> {
    let ok = match type_name {
        "string" => value.is_string(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "any" => true,
        other => {
            tracing::warn!(target: "forrst.validate", type_name = other, "unrecognized argument type tag; treating as unconstrained");
            true
        }
    };
    if ok {
        Ok(())
    } else {
        Err(format!("expected type '{type_name}', got {}", kind_name(value)))
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// RFC 6901 requires `~` and `/` inside a reference token to be escaped as
/// `~0`/`~1`.
fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use forrst_wire::ResultSpec;

    fn spec(name: &str, type_name: &str, required: bool) -> ArgumentSpec {
        ArgumentSpec {
            name: name.to_string(),
            type_name: type_name.to_string(),
            required,
            description: None,
        }
    }

    fn args(pairs: Vec<(&str, Value)>) -> Option<Map<String, Value>> {
        let mut map = Map::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v);
        }
        Some(map)
    }

    #[test]
    fn valid_call_produces_no_errors() {
        let specs = vec![spec("customer_id", "string", true)];
        let errors = BasicValidator.validate(&specs, &args(vec![("customer_id", Value::String("c1".into()))]));
        assert!(errors.is_empty());
    }

    #[test]
    fn missing_required_argument_is_reported() {
        let specs = vec![spec("customer_id", "string", true)];
        let errors = BasicValidator.validate(&specs, &None);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ErrorCode::InvalidArguments);
    }

    #[test]
    fn missing_optional_argument_is_not_reported() {
        let specs = vec![spec("note", "string", false)];
        let errors = BasicValidator.validate(&specs, &None);
        assert!(errors.is_empty());
    }

    #[test]
    fn wrong_type_is_reported() {
        let specs = vec![spec("count", "integer", true)];
        let errors = BasicValidator.validate(&specs, &args(vec![("count", Value::String("nope".into()))]));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn all_failures_are_aggregated_not_short_circuited() {
        let specs = vec![
            spec("customer_id", "string", true),
            spec("count", "integer", true),
            spec("active", "boolean", true),
        ];
        let errors = BasicValidator.validate(
            &specs,
            &args(vec![("count", Value::String("bad".into()))]),
        );
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn error_source_pointer_is_scoped_to_argument() {
        let specs = vec![spec("customer_id", "string", true)];
        let errors = BasicValidator.validate(&specs, &None);
        match &errors[0].source {
            Some(ErrorSource::Pointer(p)) => assert_eq!(p, "/call/arguments/customer_id"),
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[test]
    fn pointer_escapes_tilde_and_slash() {
        let specs = vec![spec("a/b~c", "string", true)];
        let errors = BasicValidator.validate(&specs, &None);
        match &errors[0].source {
            Some(ErrorSource::Pointer(p)) => assert_eq!(p, "/call/arguments/a~1b~0c"),
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[test]
    fn any_type_accepts_everything() {
        let specs = vec![spec("payload", "any", true)];
        let errors = BasicValidator.validate(&specs, &args(vec![("payload", Value::Null)]));
        assert!(errors.is_empty());
    }

    #[test]
    fn result_spec_is_unused_by_validator_but_importable() {
        let _ = ResultSpec {
            type_name: "object".into(),
            description: None,
        };
    }
}
