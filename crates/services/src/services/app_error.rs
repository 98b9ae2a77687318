use db::models::team::TeamPayloadError;
use thiserror::Error;

use super::record_store::StoreError;

#[derive(Debug, Clone, Error)]
pub enum AppErrorCause {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Payload(#[from] TeamPayloadError),
}

/// Error surfaced to callers of the team services. `message` is meant for the
/// end user; `cause` keeps the original failure for debugging.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AppError {
    pub message: String,
    #[source]
    pub cause: Option<AppErrorCause>,
}

impl AppError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Normalize a store failure, keeping the store's own message when it has one.
    pub fn from_store(err: StoreError, fallback: &str) -> Self {
        let message = err
            .user_message()
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string());
        Self {
            message,
            cause: Some(AppErrorCause::Store(err)),
        }
    }

    pub fn validation(err: TeamPayloadError) -> Self {
        Self {
            message: err.to_string(),
            cause: Some(AppErrorCause::Payload(err)),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.cause, Some(AppErrorCause::Payload(_)))
    }

    pub fn store_error(&self) -> Option<&StoreError> {
        match &self.cause {
            Some(AppErrorCause::Store(err)) => Some(err),
            _ => None,
        }
    }
}
