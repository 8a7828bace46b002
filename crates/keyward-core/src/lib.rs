//! Core library for keyward.
//!
//! Keeps a CLI's session with the keyward authentication service valid and
//! consistent with what the user asked for: cached token first, credentials
//! (with 2FA and yubikey second factors) as a fallback, and impersonation of
//! another user on request.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiError, HttpSessionClient};
pub use auth::{AuthError, Authenticator, Session, SessionClient};
pub use config::{ConfigKey, ConfigStore, Provenance};
