use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::errors::SegError;
use crate::server::Flavor;

/// Error response in the flavor's body shape (`{"detail": ..}` or `{"error": ..}`).
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    flavor: Flavor,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, flavor: Flavor) -> Self {
        Self {
            status,
            message: message.into(),
            flavor,
        }
    }

    pub fn bad_request(message: impl Into<String>, flavor: Flavor) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, flavor)
    }

    pub fn internal(message: impl Into<String>, flavor: Flavor) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, flavor)
    }

    pub fn from_seg(err: &SegError, flavor: Flavor) -> Self {
        match err {
            SegError::ModelUnavailable => Self::internal(err.to_string(), flavor),
            e if e.is_client_error() => Self::bad_request(e.to_string(), flavor),
            e => Self::internal(e.to_string(), flavor),
        }
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, "{}", self.message);
        } else {
            warn!(status = %self.status, "{}", self.message);
        }
        let mut body = Map::new();
        body.insert(self.flavor.error_key().to_string(), Value::String(self.message));
        (self.status, Json(Value::Object(body))).into_response()
    }
}
