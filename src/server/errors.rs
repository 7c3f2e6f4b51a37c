use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Client-facing errors of the query endpoint. Internal failures never reach
/// this type: a lookup always has an answer.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueryError {
    #[error("Unknown issuer: {0}")]
    UnknownIssuer(String),

    #[error("Invalid serial number: {0}")]
    InvalidSerial(String),
}

impl QueryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            QueryError::UnknownIssuer(_) => StatusCode::NOT_FOUND,
            QueryError::InvalidSerial(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
