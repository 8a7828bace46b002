//! Authentication module for establishing a factor-complete session.
//!
//! This module provides:
//! - `SessionClient`: the boundary to the remote authentication service
//! - `CredentialBuilder`: assembles login credentials, prompting as needed
//! - `Authenticator`: the token/credentials/reconciliation state machine
//!
//! Cached tokens are reused until the service rejects them or the session
//! they carry no longer matches the requested identity and factors.

pub mod authenticator;
pub mod context;
pub mod credentials;
pub mod error;
pub mod prompt;
pub mod session;

pub use authenticator::{Authenticator, MAX_AUTH_PASSES, MAX_CREDENTIAL_ATTEMPTS};
pub use context::{AuthContext, DEFAULT_SESSION_VALIDITY_SECS};
pub use credentials::{CredentialBuilder, Credentials};
pub use error::AuthError;
pub use prompt::{NonInteractivePrompter, PromptError, Prompter, TerminalPrompter};
pub use session::{Factor, Session, SessionClient, SessionError};
