//! Extractors whose rejections render as the uniform error envelope.

use axum::extract::{FromRequest, FromRequestParts};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Parse a path identifier, rejecting anything that is not a UUID.
pub fn parse_id(raw: &str, what: &str) -> ApiResult<Uuid> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid {what} id")))
}

/// Trim a required text field, rejecting blanks.
pub fn required<'a>(value: Option<&'a str>, field: &str) -> ApiResult<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::bad_request(format!("{field} is required"))),
    }
}

/// Trim an optional text field. Present-but-blank is rejected.
pub fn optional<'a>(value: Option<&'a str>, field: &str) -> ApiResult<Option<&'a str>> {
    match value {
        None => Ok(None),
        Some(v) => required(Some(v), field).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_must_be_uuids() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), "video").unwrap(), id);
        assert!(matches!(parse_id("64b7f0c2e4", "video"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn blank_fields_are_rejected() {
        assert_eq!(required(Some("  hi "), "title").unwrap(), "hi");
        assert!(required(Some("   "), "title").is_err());
        assert!(required(None, "title").is_err());
        assert_eq!(optional(None, "title").unwrap(), None);
        assert!(optional(Some(""), "title").is_err());
    }
}
