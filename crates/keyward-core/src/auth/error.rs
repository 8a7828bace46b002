use thiserror::Error;

use super::{PromptError, SessionError};
use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Fatal failure reported by the session client, passed through as-is.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Failed to impersonate '{user}': {source}")]
    Impersonation {
        user: String,
        #[source]
        source: SessionError,
    },

    /// The service accepted a request but its session state contradicts it.
    #[error("Authentication service returned an inconsistent session: {0}")]
    ProtocolInconsistency(String),

    #[error("Authentication did not converge after {0} passes")]
    NotConverged(u32),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AuthError {
    /// True for transport faults that no credential change can fix.
    pub fn is_transport(&self) -> bool {
        matches!(self, AuthError::Session(SessionError::Transport(_)))
    }

    pub fn is_bad_credentials(&self) -> bool {
        matches!(self, AuthError::Session(SessionError::BadCredentials(_)))
    }
}
