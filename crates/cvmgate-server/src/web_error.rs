//! Error handling for the web API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cvmgate::{ErrorKind, ExecutionTrail, Object, Value};

use crate::api::{json_response, trail_value};

/// Failures rendered by the `/execute` handler
#[derive(Debug)]
pub enum AppError {
    /// The request itself was unusable
    BadRequest(String),
    /// The attestation flow ran and did not authorize
    Flow {
        trail: ExecutionTrail,
        error: cvmgate::Error,
    },
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Flow { error, .. } => match error.kind() {
                ErrorKind::Denied => StatusCode::FORBIDDEN,
                ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = Object::new();
        match self {
            AppError::BadRequest(message) => {
                body.insert("error".into(), Value::String(message));
            }
            AppError::Flow { trail, error } => {
                let message = match error.kind() {
                    ErrorKind::Denied => error.to_string(),
                    ErrorKind::Infrastructure => format!("Internal error: {error}"),
                };
                body.insert("trail".into(), trail_value(&trail));
                body.insert("error".into(), Value::String(message));
            }
        }
        json_response(status, body)
    }
}
