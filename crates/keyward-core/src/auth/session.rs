use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Credentials;

/// A named proof-of-identity contribution recorded on a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Factor {
    Password,
    TwoFactor,
    Yubikey,
    Impersonate,
    Other(String),
}

impl Factor {
    pub fn as_str(&self) -> &str {
        match self {
            Factor::Password => "password",
            Factor::TwoFactor => "2fa",
            Factor::Yubikey => "yubikey",
            Factor::Impersonate => "impersonate",
            Factor::Other(name) => name,
        }
    }
}

impl From<String> for Factor {
    fn from(name: String) -> Self {
        match name.as_str() {
            "password" => Factor::Password,
            "2fa" => Factor::TwoFactor,
            "yubikey" => Factor::Yubikey,
            "impersonate" => Factor::Impersonate,
            _ => Factor::Other(name),
        }
    }
}

impl From<&str> for Factor {
    fn from(name: &str) -> Self {
        Factor::from(name.to_string())
    }
}

impl From<Factor> for String {
    fn from(factor: Factor) -> Self {
        factor.as_str().to_string()
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The session currently held by a [`SessionClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token. Never serialized so printed sessions cannot leak it.
    #[serde(default, skip_serializing)]
    pub token: String,
    pub username: String,
    pub factors: BTreeSet<Factor>,
    pub established_at: DateTime<Utc>,
    /// Validity requested when the session was created, if known.
    pub validity_secs: Option<u64>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            token: String::new(),
            username: String::new(),
            factors: BTreeSet::new(),
            established_at: Utc::now(),
            validity_secs: None,
        }
    }
}

impl Session {
    pub fn new<I, F>(token: impl Into<String>, username: impl Into<String>, factors: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Factor>,
    {
        Self {
            token: token.into(),
            username: username.into(),
            factors: factors.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_validity(mut self, secs: u64) -> Self {
        self.validity_secs = Some(secs);
        self
    }

    pub fn has_factor(&self, factor: &Factor) -> bool {
        self.factors.contains(factor)
    }

    pub fn is_impersonating(&self) -> bool {
        self.has_factor(&Factor::Impersonate)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.validity_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| self.established_at + Duration::seconds(secs))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at().is_some_and(|expiry| Utc::now() > expiry)
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.expires_at()
            .map(|expiry| (expiry - Utc::now()).num_minutes().max(0))
    }

    /// Comma separated factor names, e.g. `password, 2fa`.
    pub fn factor_list(&self) -> String {
        self.factors
            .iter()
            .map(Factor::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Failure classes reported by a [`SessionClient`].
#[derive(Error, Debug)]
pub enum SessionError {
    /// The service could not be reached or the protocol layer faulted.
    #[error("Could not reach the authentication service: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The token is invalid or expired.
    #[error("Session rejected: {0}")]
    Rejected(String),

    /// Username and password were accepted but a 2FA code is required.
    #[error("Missing 2FA code")]
    MissingSecondFactor,

    /// Malformed or rejected username, password or one-time code.
    #[error("Bad login credentials: {0}")]
    BadCredentials(String),

    /// Any other service-side failure.
    #[error("Authentication service error (status {status}): {message}")]
    Service { status: u16, message: String },
}

impl SessionError {
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        SessionError::Transport(Box::new(err))
    }
}

/// Boundary to the remote authentication service.
///
/// Every successful call replaces the held [`Session`] wholesale.
#[allow(async_fn_in_trait)]
pub trait SessionClient {
    async fn auth_with_token(&mut self, token: &str) -> Result<(), SessionError>;

    async fn auth_with_credentials(&mut self, credentials: &Credentials)
        -> Result<(), SessionError>;

    async fn impersonate(&mut self, username: &str) -> Result<(), SessionError>;

    /// The current session; empty before the first successful call.
    fn session(&self) -> &Session;
}
