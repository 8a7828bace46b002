use tracing::debug;

use super::{AuthError, Prompter};
use crate::config::{ConfigKey, ConfigStore, Provenance};

/// Default session validity in seconds when none is configured.
pub const DEFAULT_SESSION_VALIDITY_SECS: u64 = 3600;

/// Config and prompter shared by every stage of the authentication flow.
///
/// All reads and writes of auth settings go through here so the order of
/// mutations across retries and restarts is explicit.
pub struct AuthContext<'a, P> {
    config: &'a mut ConfigStore,
    prompter: &'a mut P,
}

impl<'a, P: Prompter> AuthContext<'a, P> {
    pub fn new(config: &'a mut ConfigStore, prompter: &'a mut P) -> Self {
        Self { config, prompter }
    }

    pub fn prompter(&mut self) -> &mut P {
        &mut *self.prompter
    }

    pub fn notice(&mut self, text: &str) {
        self.prompter.notice(text);
    }

    // ===== Reads =====

    pub fn cached_token(&self) -> String {
        self.config.get_or_empty(ConfigKey::Token)
    }

    pub fn yubikey_requested(&self) -> Result<bool, AuthError> {
        Ok(self.config.get_bool(ConfigKey::Yubikey)?)
    }

    /// Requested impersonation target, empty when none.
    pub fn impersonate_target(&self) -> String {
        self.config.get_or_empty(ConfigKey::Impersonate)
    }

    pub fn session_validity(&self) -> Result<u64, AuthError> {
        Ok(self
            .config
            .get_u64(ConfigKey::SessionValidity, DEFAULT_SESSION_VALIDITY_SECS)?)
    }

    pub fn value(&self, key: ConfigKey) -> String {
        self.config.get_or_empty(key)
    }

    pub fn provenance(&self, key: ConfigKey) -> Option<Provenance> {
        self.config.provenance(key)
    }

    // ===== Writes =====

    /// Record a value the user just typed.
    pub fn set_interactive(&mut self, key: ConfigKey, value: impl Into<String>) {
        self.config.set(key, value, Provenance::Interactive);
    }

    pub fn persist_token(&mut self, token: &str) -> Result<(), AuthError> {
        self.config
            .set_persistent(ConfigKey::Token, token, Provenance::Interactive)?;
        debug!("Session token cached");
        Ok(())
    }

    /// Drop the cached token so the next pass authenticates with credentials.
    pub fn discard_token(&mut self) -> Result<(), AuthError> {
        self.config.unset(ConfigKey::Token)?;
        debug!("Cached session token discarded");
        Ok(())
    }

    pub fn unset_impersonation(&mut self) -> Result<(), AuthError> {
        self.config.unset(ConfigKey::Impersonate)?;
        Ok(())
    }

    /// Blank every secret the user must re-enter after a rejected login.
    pub fn clear_login_secrets(&mut self) {
        for key in [ConfigKey::Pass, ConfigKey::YubikeyOtp, ConfigKey::TwoFactorOtp] {
            self.config.clear(key);
        }
    }
}
