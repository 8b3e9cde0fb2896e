use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// No response was received.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// Refresh failed or there was nothing to refresh with. Credentials are gone.
    #[error("session expired, please log in again")]
    SessionExpired,

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("log-in response did not carry both tokens")]
    MissingToken,

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Malformed request bodies rejected by the server. Shown to the user, never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::BAD_REQUEST) | Some(StatusCode::UNPROCESSABLE_ENTITY)
        ) || matches!(self, ClientError::Validation(_))
    }
}

impl From<toml::de::Error> for ClientError {
    fn from(e: toml::de::Error) -> Self {
        ClientError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for ClientError {
    fn from(e: toml::ser::Error) -> Self {
        ClientError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
