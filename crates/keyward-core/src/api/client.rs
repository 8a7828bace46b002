//! HTTP implementation of [`SessionClient`] for the keyward auth service.
//!
//! Endpoints (all JSON):
//! - `GET  /session` with a bearer token: describe the token's session
//! - `POST /session` with credentials: log in
//! - `POST /session/impersonate` with a bearer token: switch identity
//! - `DELETE /session` with a bearer token: revoke

use std::time::Duration;

use chrono::Utc;
use reqwest::{header, Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::{Credentials, Factor, Session, SessionClient, SessionError};

// ============================================================================
// Constants
// ============================================================================

/// Default base URL of the authentication service
pub const DEFAULT_BASE_URL: &str = "https://auth.keyward.dev/api";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Accept header sent with every request
const ACCEPT_JSON: &str = "application/json; version=1";

#[derive(Debug, Deserialize)]
struct SessionResponse {
    /// Omitted when describing an existing token.
    #[serde(default)]
    token: Option<String>,
    username: String,
    #[serde(default)]
    factors: Vec<Factor>,
    /// Remaining lifetime in seconds, if the service reports it.
    #[serde(default)]
    validity: Option<u64>,
}

impl SessionResponse {
    fn into_session(self, fallback_token: &str, requested_validity: Option<u64>) -> Session {
        let token = self
            .token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| fallback_token.to_string());
        Session {
            token,
            username: self.username,
            factors: self.factors.into_iter().collect(),
            established_at: Utc::now(),
            validity_secs: self.validity.or(requested_validity),
        }
    }
}

#[derive(Debug, Serialize)]
struct ImpersonateRequest<'a> {
    username: &'a str,
}

/// Session client backed by the keyward REST API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpSessionClient {
    client: Client,
    base_url: String,
    session: Session,
}

impl HttpSessionClient {
    /// Create a client for the default service URL
    pub fn new() -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: Session::default(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a session request and parse the session it returns.
    async fn fetch_session(
        request: RequestBuilder,
        fallback_token: &str,
        requested_validity: Option<u64>,
    ) -> Result<Session, ApiError> {
        let response = request.header(header::ACCEPT, ACCEPT_JSON).send().await?;
        let response = Self::check_response(response).await?;

        let text = response.text().await?;
        let parsed: SessionResponse = serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("session body: {}", e)))?;

        Ok(parsed.into_session(fallback_token, requested_validity))
    }

    /// Revoke a token on the service. Succeeds if it was already gone.
    pub async fn revoke(&self, token: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.url("/session"))
            .bearer_auth(token)
            .header(header::ACCEPT, ACCEPT_JSON)
            .send()
            .await?;

        match Self::check_response(response).await {
            Ok(_) | Err(ApiError::Unauthorized(_)) | Err(ApiError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl SessionClient for HttpSessionClient {
    async fn auth_with_token(&mut self, token: &str) -> Result<(), SessionError> {
        debug!(url = %self.base_url, "Authenticating with cached token");
        let request = self.client.get(self.url("/session")).bearer_auth(token);

        match Self::fetch_session(request, token, None).await {
            Ok(session) => {
                self.session = session;
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "Token authentication failed");
                Err(e.into_token_error())
            }
        }
    }

    async fn auth_with_credentials(
        &mut self,
        credentials: &Credentials,
    ) -> Result<(), SessionError> {
        debug!(username = %credentials.username, "Authenticating with credentials");
        let request = self.client.post(self.url("/session")).json(credentials);

        match Self::fetch_session(request, "", Some(credentials.validity)).await {
            Ok(session) if session.token.is_empty() => {
                warn!("Login response carried no token");
                Err(SessionError::transport(ApiError::InvalidResponse(
                    "login response carried no token".to_string(),
                )))
            }
            Ok(session) => {
                self.session = session;
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "Credential authentication failed");
                Err(e.into_login_error())
            }
        }
    }

    async fn impersonate(&mut self, username: &str) -> Result<(), SessionError> {
        debug!(%username, "Requesting impersonation");
        let token = self.session.token.clone();
        let request = self
            .client
            .post(self.url("/session/impersonate"))
            .bearer_auth(&token)
            .json(&ImpersonateRequest { username });

        match Self::fetch_session(request, &token, self.session.validity_secs).await {
            Ok(session) => {
                self.session = session;
                Ok(())
            }
            Err(e) => Err(e.into_session_error()),
        }
    }

    fn session(&self) -> &Session {
        &self.session
    }
}
