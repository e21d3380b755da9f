use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Rejected tool parameters or codec failures.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid dimensions {width}x{height} (each side must be 1..={max})")]
    InvalidDimensions { width: u32, height: u32, max: u32 },

    #[error("invalid tile size {0}")]
    InvalidTileSize(u32),

    #[error("unsupported export format '{0}'")]
    UnsupportedFormat(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("missing multipart field '{0}'")]
    MissingField(&'static str),

    #[error("no route for {0}")]
    NotFound(String),

    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("{0}")]
    Tool(#[from] ToolError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{e:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_)
            | ApiError::MissingField(_)
            | ApiError::Decode(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Tool(ToolError::Image(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Tool(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "status": status.as_u16(),
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}
