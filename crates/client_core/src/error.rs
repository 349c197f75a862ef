use shared::error::{ApiError, ErrorKind};
use thiserror::Error;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("not authenticated: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed payload: {0}")]
    Protocol(String),
    #[error("not connected")]
    NotConnected,
    #[error("session has no resolved user")]
    NoSession,
    #[error("no peer selected")]
    NoPeerSelected,
    #[error("{0}")]
    Validation(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Auth(_) | ClientError::NoSession => ErrorKind::Auth,
            ClientError::NotFound(_) | ClientError::Rejected { status: 404, .. } => {
                ErrorKind::NotFound
            }
            ClientError::Transport(_) | ClientError::Rejected { .. } => ErrorKind::Transport,
            ClientError::Protocol(_) => ErrorKind::Protocol,
            ClientError::NotConnected => ErrorKind::NotConnected,
            ClientError::NoPeerSelected | ClientError::Validation(_) => ErrorKind::Validation,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClientError::NotFound(_) | ClientError::Rejected { status: 404, .. }
        )
    }

    /// Text shown to the user when a mutating action fails.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Rejected { message, .. } => message.clone(),
            ClientError::Transport(_) => "Network error. Please try again.".to_string(),
            ClientError::NotConnected => "Not connected to this conversation.".to_string(),
            ClientError::NotFound(what) => format!("Not found: {what}"),
            other => other.to_string(),
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError::new(self.kind(), self.user_message())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            ClientError::Protocol(value.to_string())
        } else {
            ClientError::Transport(value.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(value: serde_json::Error) -> Self {
        ClientError::Protocol(value.to_string())
    }
}
