use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::models::PollId;

/// Failures raised by the ledger and tally backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate key in {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },

    #[error("Corrupt value in {table}: {value}")]
    Corrupt { table: &'static str, value: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
#[error("Failed to publish tally change for poll {poll_id}: {reason}")]
pub struct PublishError {
    pub poll_id: PollId,
    pub reason: String,
}

/// Why a vote-cast did not go through.
#[derive(Error, Debug)]
pub enum VoteError {
    #[error("You already voted on this option")]
    DuplicateVote,

    #[error("A vote for this session and poll was recorded concurrently")]
    ConstraintViolation,

    #[error("Vote store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
}

impl From<StoreError> for VoteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { .. } => VoteError::ConstraintViolation,
            other => VoteError::StoreUnavailable(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error(transparent)]
    Vote(#[from] VoteError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Vote(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::Vote(VoteError::DuplicateVote) => StatusCode::BAD_REQUEST,
            AppError::Vote(VoteError::ConstraintViolation) => StatusCode::CONFLICT,
            AppError::Vote(VoteError::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Secret {0} is required for the redis backend")]
    MissingSecret(&'static str),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
