//! Shared validation helpers for inbound HTTP adapters.
//!
//! Query and JSON extraction failures are rewritten into the domain error
//! body so clients see one error shape everywhere.

use actix_web::{HttpRequest, web};
use serde_json::json;

use crate::domain::{DeletionRequestId, Error};

/// Default page size for admin listings.
pub const DEFAULT_LIST_LIMIT: usize = 50;
/// Largest page size for admin listings.
pub const MAX_LIST_LIMIT: usize = 200;

/// Validation error codes carried in `details.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValidationCode {
    MissingField,
    InvalidUuid,
    OutOfRange,
    MalformedBody,
    MalformedQuery,
}

impl ValidationCode {
    fn as_str(self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::InvalidUuid => "invalid_uuid",
            Self::OutOfRange => "out_of_range",
            Self::MalformedBody => "malformed_body",
            Self::MalformedQuery => "malformed_query",
        }
    }
}

fn field_error(field: &str, code: ValidationCode, message: impl Into<String>) -> Error {
    Error::invalid_request(message).with_details(json!({
        "field": field,
        "code": code.as_str(),
    }))
}

pub(crate) fn missing_field_error(field: &str) -> Error {
    field_error(
        field,
        ValidationCode::MissingField,
        format!("missing required field: {field}"),
    )
}

/// Parse a deletion request id taken from `field`.
pub(crate) fn parse_request_id(value: &str, field: &str) -> Result<DeletionRequestId, Error> {
    value.parse().map_err(|_| {
        field_error(
            field,
            ValidationCode::InvalidUuid,
            format!("{field} must be a valid UUID"),
        )
    })
}

/// Apply the listing default and bounds.
pub(crate) fn parse_limit(limit: Option<usize>) -> Result<usize, Error> {
    match limit {
        None => Ok(DEFAULT_LIST_LIMIT),
        Some(value) if (1..=MAX_LIST_LIMIT).contains(&value) => Ok(value),
        Some(_) => Err(field_error(
            "limit",
            ValidationCode::OutOfRange,
            format!("limit must be between 1 and {MAX_LIST_LIMIT}"),
        )),
    }
}

/// JSON extractor configuration answering with the domain error body.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err, _req: &HttpRequest| {
            field_error("body", ValidationCode::MalformedBody, err.to_string()).into()
        })
}

/// Query extractor configuration answering with the domain error body.
pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req: &HttpRequest| {
        field_error("query", ValidationCode::MalformedQuery, err.to_string()).into()
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::domain::ErrorCode;

    #[rstest]
    #[case::default(None, Ok(DEFAULT_LIST_LIMIT))]
    #[case::lower_bound(Some(1), Ok(1))]
    #[case::upper_bound(Some(MAX_LIST_LIMIT), Ok(MAX_LIST_LIMIT))]
    #[case::zero(Some(0), Err(()))]
    #[case::too_large(Some(MAX_LIST_LIMIT + 1), Err(()))]
    fn limits_are_bounded(#[case] limit: Option<usize>, #[case] expected: Result<usize, ()>) {
        let result = parse_limit(limit);
        match expected {
            Ok(value) => assert_eq!(result.ok(), Some(value)),
            Err(()) => {
                let error = result.expect_err("out-of-range limit");
                assert_eq!(error.code(), ErrorCode::InvalidRequest);
                assert_eq!(
                    error.details().and_then(|d| d.get("code")),
                    Some(&json!("out_of_range"))
                );
            }
        }
    }

    #[rstest]
    fn request_ids_must_be_uuids() {
        let error = parse_request_id("not-a-uuid", "id").expect_err("invalid id");
        assert_eq!(
            error.details(),
            Some(&json!({ "field": "id", "code": "invalid_uuid" }))
        );

        let id = parse_request_id(" 6f1c0c47-8a2e-4b8e-9f55-0a1b2c3d4e5f ", "id")
            .expect("padded uuid parses");
        assert_eq!(id.to_string(), "6f1c0c47-8a2e-4b8e-9f55-0a1b2c3d4e5f");
    }

    #[rstest]
    fn missing_fields_name_the_field() {
        let error = missing_field_error("token");
        assert_eq!(error.message(), "missing required field: token");
    }
}
