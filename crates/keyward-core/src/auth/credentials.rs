use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use super::{AuthContext, AuthError, Prompter};
use crate::config::{ConfigKey, Provenance};

/// Login parameters for one authentication attempt.
///
/// Built fresh from the config store on every attempt and never cached.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Requested session lifetime in seconds.
    pub validity: u64,
    #[serde(rename = "2fa", skip_serializing_if = "Option::is_none")]
    pub two_factor: Option<String>,
    #[serde(rename = "yubikey", skip_serializing_if = "Option::is_none")]
    pub yubikey: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>, validity: u64) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            validity,
            two_factor: None,
            yubikey: None,
        }
    }

    pub fn with_two_factor(mut self, otp: impl Into<String>) -> Self {
        self.two_factor = Some(otp.into());
        self
    }

    pub fn with_yubikey(mut self, otp: impl Into<String>) -> Self {
        self.yubikey = Some(otp.into());
        self
    }

    /// String-keyed form: `username`, `password`, `validity`, and `2fa` /
    /// `yubikey` when present.
    pub fn to_params(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        params.insert("username", self.username.clone());
        params.insert("password", self.password.clone());
        params.insert("validity", self.validity.to_string());
        if let Some(ref otp) = self.two_factor {
            params.insert("2fa", otp.clone());
        }
        if let Some(ref otp) = self.yubikey {
            params.insert("yubikey", otp.clone());
        }
        params
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("validity", &self.validity)
            .field("two_factor", &self.two_factor.as_ref().map(|_| "<redacted>"))
            .field("yubikey", &self.yubikey.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Assembles [`Credentials`], prompting for anything missing.
pub struct CredentialBuilder;

impl CredentialBuilder {
    /// Build credentials from the current config, prompting until every
    /// required field is non-empty. Prompt I/O errors are fatal.
    pub fn build<P: Prompter>(ctx: &mut AuthContext<'_, P>) -> Result<Credentials, AuthError> {
        let username = Self::username(ctx)?;
        let password = Self::required(ctx, ConfigKey::Pass, "Password: ", true)?;
        let validity = ctx.session_validity()?;

        let mut credentials = Credentials::new(username, password, validity);
        if ctx.yubikey_requested()? {
            let otp = Self::required(ctx, ConfigKey::YubikeyOtp, "Yubikey OTP: ", false)?;
            credentials = credentials.with_yubikey(otp);
        }

        debug!(
            username = %credentials.username,
            yubikey = credentials.yubikey.is_some(),
            "Credentials built"
        );
        Ok(credentials)
    }

    /// 2FA code from config, or prompted for and kept for this process.
    pub fn two_factor<P: Prompter>(ctx: &mut AuthContext<'_, P>) -> Result<String, AuthError> {
        Self::required(ctx, ConfigKey::TwoFactorOtp, "2FA code: ", false)
    }

    /// A username typed in this process is reused as-is. One from the file,
    /// environment or a flag is offered as the default once, since the user
    /// may be logging in as someone else.
    fn username<P: Prompter>(ctx: &mut AuthContext<'_, P>) -> Result<String, AuthError> {
        let current = ctx.value(ConfigKey::User);
        let interactive = ctx.prompter().is_interactive();

        if !current.is_empty()
            && (!interactive || ctx.provenance(ConfigKey::User) == Some(Provenance::Interactive))
        {
            return Ok(current);
        }

        let username = loop {
            let input = if current.is_empty() {
                ctx.prompter().prompt("Username: ")?
            } else {
                let input = ctx.prompter().prompt(&format!("Username [{}]: ", current))?;
                if input.is_empty() {
                    current.clone()
                } else {
                    input
                }
            };
            if !input.is_empty() {
                break input;
            }
        };

        ctx.set_interactive(ConfigKey::User, username.clone());
        Ok(username)
    }

    fn required<P: Prompter>(
        ctx: &mut AuthContext<'_, P>,
        key: ConfigKey,
        text: &str,
        masked: bool,
    ) -> Result<String, AuthError> {
        let current = ctx.value(key);
        if !current.is_empty() {
            return Ok(current);
        }

        let value = loop {
            let input = if masked {
                ctx.prompter().ask(text)?
            } else {
                ctx.prompter().prompt(text)?
            };
            if !input.is_empty() {
                break input;
            }
        };

        ctx.set_interactive(key, value.clone());
        Ok(value)
    }
}
