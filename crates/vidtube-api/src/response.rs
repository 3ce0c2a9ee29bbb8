use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

use vidtube_types::api::ApiResponse;

pub type Envelope<T> = (StatusCode, Json<ApiResponse<T>>);

/// Wrap `data` in the success envelope with a matching HTTP status.
pub fn respond<T: Serialize>(status: StatusCode, message: &str, data: T) -> Envelope<T> {
    (status, Json(ApiResponse::new(status.as_u16(), message, data)))
}

pub fn ok<T: Serialize>(message: &str, data: T) -> Envelope<T> {
    respond(StatusCode::OK, message, data)
}

pub fn created<T: Serialize>(message: &str, data: T) -> Envelope<T> {
    respond(StatusCode::CREATED, message, data)
}
