//! Session reconciliation: drives the session client until the session it
//! holds matches what the user asked for.
//!
//! One pass tries the cached token, falls back to credentials, then checks
//! the resulting session's factors and identity. A mismatch discards the
//! cached token and starts a new pass; passes are bounded.

use std::fmt;

use tracing::{debug, error, info, warn};

use super::{
    AuthContext, AuthError, CredentialBuilder, Credentials, Factor, Prompter, Session,
    SessionClient, SessionError,
};
use crate::config::ConfigStore;

/// Full passes (token, credentials, session check) before giving up.
pub const MAX_AUTH_PASSES: u32 = 5;

/// Username/password attempts per pass.
pub const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// Notice shown when the cached token can't be used.
const LOGIN_NOTICE: &str = "Please log in.";

/// Outcome of checking an established session against the request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reconciled {
    Ready,
    Restart(RestartReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RestartReason {
    MissingYubikey,
    WrongImpersonation { requested: String, current: String },
    StaleImpersonation { current: String },
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::MissingYubikey => {
                write!(f, "yubikey requested but the session lacks the yubikey factor")
            }
            RestartReason::WrongImpersonation { requested, current } => write!(
                f,
                "session impersonates '{}' but '{}' was requested",
                current, requested
            ),
            RestartReason::StaleImpersonation { current } => write!(
                f,
                "session impersonates '{}' but no impersonation was requested",
                current
            ),
        }
    }
}

pub struct Authenticator<'a, C, P> {
    client: &'a mut C,
    ctx: AuthContext<'a, P>,
}

impl<'a, C: SessionClient, P: Prompter> Authenticator<'a, C, P> {
    pub fn new(client: &'a mut C, config: &'a mut ConfigStore, prompter: &'a mut P) -> Self {
        Self {
            client,
            ctx: AuthContext::new(config, prompter),
        }
    }

    /// Establish a session matching the configured identity and factors.
    pub async fn authenticate(&mut self) -> Result<Session, AuthError> {
        for pass in 1..=MAX_AUTH_PASSES {
            debug!(pass, "Authentication pass");
            self.establish().await?;

            match self.check_session().await? {
                Reconciled::Ready => {
                    let session = self.client.session();
                    info!(
                        user = %session.username,
                        factors = %session.factor_list(),
                        "Authenticated"
                    );
                    return Ok(session.clone());
                }
                Reconciled::Restart(reason) => {
                    info!(pass, %reason, "Session does not match request, restarting");
                }
            }
        }

        error!(passes = MAX_AUTH_PASSES, "Authentication did not converge");
        Err(AuthError::NotConverged(MAX_AUTH_PASSES))
    }

    /// Get some valid session: the cached token, else credentials.
    async fn establish(&mut self) -> Result<(), AuthError> {
        let token = self.ctx.cached_token();

        if token.is_empty() {
            debug!("No cached session token");
        } else {
            match self.client.auth_with_token(&token).await {
                Ok(()) => {
                    debug!(user = %self.client.session().username, "Cached session token accepted");
                    return Ok(());
                }
                Err(SessionError::Rejected(reason)) => {
                    info!(%reason, "Cached session token rejected");
                }
                Err(e) => {
                    error!(error = %e, "Token authentication failed");
                    return Err(e.into());
                }
            }
        }

        self.ctx.notice(LOGIN_NOTICE);
        self.try_credentials().await
    }

    /// Up to [`MAX_CREDENTIAL_ATTEMPTS`] logins. A 2FA challenge is answered
    /// inline without using up an attempt.
    async fn try_credentials(&mut self) -> Result<(), AuthError> {
        let mut attempts = MAX_CREDENTIAL_ATTEMPTS;

        loop {
            attempts -= 1;

            let mut credentials = CredentialBuilder::build(&mut self.ctx)?;
            let mut result = self.client.auth_with_credentials(&credentials).await;

            if matches!(result, Err(SessionError::MissingSecondFactor)) {
                debug!("Service requires a 2FA code");
                let otp = CredentialBuilder::two_factor(&mut self.ctx)?;
                credentials = credentials.with_two_factor(otp);
                result = self.client.auth_with_credentials(&credentials).await;
            }

            match result {
                Ok(()) => {
                    let session = self.client.session();
                    self.ctx.persist_token(&session.token)?;
                    verify_login_factors(session, &credentials)?;
                    info!(user = %session.username, "Logged in with credentials");
                    return Ok(());
                }
                Err(SessionError::BadCredentials(reason)) => {
                    if attempts == 0 {
                        error!(%reason, "Login rejected, no attempts left");
                        return Err(SessionError::BadCredentials(reason).into());
                    }
                    // nobody can type a different password
                    if !self.ctx.prompter().is_interactive() {
                        error!(%reason, "Login rejected in non-interactive mode");
                        return Err(SessionError::BadCredentials(reason).into());
                    }
                    warn!(%reason, attempts_left = attempts, "Login rejected");
                    self.ctx
                        .notice(&format!("Login failed: {}. Please try again.", reason));
                    self.ctx.clear_login_secrets();
                }
                Err(e) => {
                    error!(error = %e, "Login failed");
                    return Err(e.into());
                }
            }
        }
    }

    /// Compare the session with the requested yubikey factor and
    /// impersonation target, impersonating if needed.
    async fn check_session(&mut self) -> Result<Reconciled, AuthError> {
        let yubikey = self.ctx.yubikey_requested()?;
        let requested = self.ctx.impersonate_target();
        // set once we have impersonated in this check
        let mut short_circuit = false;

        loop {
            let session = self.client.session();
            let current = session.username.clone();
            let impersonating = session.is_impersonating();

            if yubikey && !impersonating && !session.has_factor(&Factor::Yubikey) {
                self.ctx.discard_token()?;
                return Ok(Reconciled::Restart(RestartReason::MissingYubikey));
            }

            if requested.is_empty() {
                if impersonating {
                    self.ctx.unset_impersonation()?;
                    self.ctx.discard_token()?;
                    return Ok(Reconciled::Restart(RestartReason::StaleImpersonation {
                        current,
                    }));
                }
                return Ok(Reconciled::Ready);
            }

            if requested == current {
                if short_circuit && !impersonating {
                    return Err(AuthError::ProtocolInconsistency(format!(
                        "impersonated '{}' but the session lacks the impersonate factor",
                        requested
                    )));
                }
                return Ok(Reconciled::Ready);
            }

            if short_circuit {
                return Err(AuthError::ProtocolInconsistency(format!(
                    "impersonation of '{}' succeeded but the session belongs to '{}'",
                    requested, current
                )));
            }

            if impersonating {
                warn!(%requested, %current, "Session impersonates the wrong user");
                self.ctx.discard_token()?;
                return Ok(Reconciled::Restart(RestartReason::WrongImpersonation {
                    requested: requested.clone(),
                    current,
                }));
            }

            info!(user = %requested, as_user = %current, "Impersonating");
            self.client
                .impersonate(&requested)
                .await
                .map_err(|source| AuthError::Impersonation {
                    user: requested.clone(),
                    source,
                })?;
            short_circuit = true;
        }
    }
}

/// One-time codes the service accepted must show up as session factors.
fn verify_login_factors(session: &Session, credentials: &Credentials) -> Result<(), AuthError> {
    if credentials.two_factor.is_some() && !session.has_factor(&Factor::TwoFactor) {
        return Err(AuthError::ProtocolInconsistency(
            "2FA code accepted but the session does not record the 2fa factor".to_string(),
        ));
    }
    if credentials.yubikey.is_some() && !session.has_factor(&Factor::Yubikey) {
        return Err(AuthError::ProtocolInconsistency(
            "yubikey OTP accepted but the session does not record the yubikey factor".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
