//! Error types surfaced by the call controller and its collaborators.
//!
//! Every failure that can happen during a call is converted into one of these
//! before it reaches the caller, so the controller never has to unwind out of
//! a half-finished state.

use std::time::Duration;
use thiserror::Error;

/// A check that failed before any network or transport call was made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("you must be signed in to start a call")]
    NotAuthenticated,
    #[error("your profile has not been loaded yet")]
    ProfileNotLoaded,
    #[error("no project is loaded for this call")]
    ProjectNotLoaded,
    #[error("insufficient credits: {balance} available, at least {required} required")]
    InsufficientCredits { balance: i64, required: i64 },
    #[error("microphone access denied: {0}")]
    MicrophoneDenied(String),
}

/// Failures talking to the scoring backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("the backend rejected the credential")]
    Unauthorized,
    #[error("insufficient credits: {0}")]
    InsufficientCredits(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("request failed: {0}")]
    Http(String),
    #[error("could not decode backend response: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidInput(String),
}

impl BackendError {
    /// Maps a non-success status and the backend's `error` message to a variant.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => BackendError::Unauthorized,
            402 => BackendError::InsufficientCredits(message),
            404 => BackendError::NotFound(message),
            _ => BackendError::Status { status, message },
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Http(e.to_string())
        }
    }
}

/// Could not obtain a bearer credential for the current user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not obtain a credential: {0}")]
pub struct CredentialError(pub String);

/// Saving a finished session failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FinalizeError {
    /// The save did not answer in time. Credits may or may not have been deducted.
    #[error("saving the session timed out after {}s; credits may not have been deducted", .0.as_secs())]
    Timeout(Duration),
    #[error("the backend rejected the session: {0}")]
    Rejected(BackendError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Anything the call controller reports back to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error("a call is already in progress")]
    CallInProgress,
    #[error("there is no active call")]
    NoActiveCall,
    #[error("force close discards this session; confirmation is required")]
    ConfirmationRequired,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("voice connection error: {0}")]
    Transport(String),
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
    #[error("the call was closed before it connected")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_variants() {
        assert_eq!(
            BackendError::from_status(401, "Unauthorized".into()),
            BackendError::Unauthorized
        );
        assert!(matches!(
            BackendError::from_status(402, "Minimum 3 required.".into()),
            BackendError::InsufficientCredits(_)
        ));
        assert!(matches!(
            BackendError::from_status(500, "boom".into()),
            BackendError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn timeout_is_reported_distinctly() {
        let timeout = CallError::from(FinalizeError::Timeout(Duration::from_secs(15)));
        let rejected = CallError::from(FinalizeError::Rejected(BackendError::Http("x".into())));
        assert!(timeout.to_string().contains("timed out after 15s"));
        assert_ne!(timeout, rejected);
    }
}
