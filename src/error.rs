use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("credential expired: {0}")]
    CredentialExpired(String),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("scorer unavailable: {0}")]
    ScorerUnavailable(String),
    #[error("refresh race: {0}")]
    RefreshRace(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("timed out after {0} seconds")]
    Timeout(u64),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl AppError {
    /// Credential failures invalidate the whole report; everything else in a
    /// batch is recovered per item.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::CredentialExpired(_) | Self::RefreshRace(_))
    }
}
