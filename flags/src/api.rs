use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),

    #[error("Flag not found")]
    FlagNotFound,
    #[error("flag {0} is already registered")]
    DuplicateFlag(String),
    #[error("chance must be between 0 and 100, got {0}")]
    InvalidChance(u8),

    #[error("missing channel parameter")]
    MissingChannel,

    #[error("storage unavailable")]
    StorageUnavailable,
    #[error("change channel unavailable")]
    ChannelUnavailable,
}

impl IntoResponse for FlagError {
    fn into_response(self) -> Response {
        let status = match self {
            FlagError::RequestParsingError(_)
            | FlagError::DuplicateFlag(_)
            | FlagError::InvalidChance(_)
            | FlagError::MissingChannel => StatusCode::BAD_REQUEST,

            FlagError::FlagNotFound => StatusCode::NOT_FOUND,

            FlagError::StorageUnavailable | FlagError::ChannelUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}
