//! Layered configuration store for auth-relevant settings.
//!
//! Values are kept in memory together with their provenance (file, env,
//! flag, interactive input). Durable writes go through a [`ConfigBackend`]:
//!
//! - [`FileBackend`]: JSON file at `~/.config/keyward/config.json`
//! - [`KeyringBackend`]: routes secrets (the cached token) to the OS keychain
//! - [`MemoryBackend`]: shared in-memory map for embedding and tests

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use keyring::Entry;
use thiserror::Error;
use tracing::{debug, warn};

/// Application name used for config directory paths
const APP_NAME: &str = "keyward";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Keychain service name for secret keys
const KEYRING_SERVICE: &str = "keyward";

/// Prefix for environment overrides (`KEYWARD_USER`, ...)
const ENV_PREFIX: &str = "KEYWARD_";

// ============================================================================
// Keys and provenance
// ============================================================================

/// Settings read or written by the authentication flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigKey {
    User,
    Pass,
    TwoFactorOtp,
    Yubikey,
    YubikeyOtp,
    Token,
    Impersonate,
    SessionValidity,
    ApiUrl,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 9] = [
        ConfigKey::User,
        ConfigKey::Pass,
        ConfigKey::TwoFactorOtp,
        ConfigKey::Yubikey,
        ConfigKey::YubikeyOtp,
        ConfigKey::Token,
        ConfigKey::Impersonate,
        ConfigKey::SessionValidity,
        ConfigKey::ApiUrl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::User => "user",
            ConfigKey::Pass => "pass",
            ConfigKey::TwoFactorOtp => "2fa-otp",
            ConfigKey::Yubikey => "yubikey",
            ConfigKey::YubikeyOtp => "yubikey-otp",
            ConfigKey::Token => "token",
            ConfigKey::Impersonate => "impersonate",
            ConfigKey::SessionValidity => "session-validity",
            ConfigKey::ApiUrl => "api-url",
        }
    }

    /// Keys that belong in the OS keychain rather than the config file.
    pub fn is_secret(&self) -> bool {
        matches!(self, ConfigKey::Token | ConfigKey::Pass)
    }

    /// Name of the environment variable that overrides this key.
    pub fn env_var(&self) -> String {
        let suffix = match self {
            ConfigKey::Pass => "PASSWORD".to_string(),
            ConfigKey::TwoFactorOtp => "2FA_OTP".to_string(),
            other => other.as_str().replace('-', "_").to_uppercase(),
        };
        format!("{}{}", ENV_PREFIX, suffix)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

/// Where a value came from. Later sources override earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Provenance {
    Default,
    File,
    Env,
    Flag,
    Interactive,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provenance::Default => "default",
            Provenance::File => "file",
            Provenance::Env => "env",
            Provenance::Flag => "flag",
            Provenance::Interactive => "interactive",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown config key: {0}")]
    UnknownKey(String),

    #[error("Config key '{0}' is not set")]
    NotSet(ConfigKey),

    #[error("Config key '{key}' is not a boolean: {value}")]
    InvalidBool { key: ConfigKey, value: String },

    #[error("Config key '{key}' is not a number: {value}")]
    InvalidNumber { key: ConfigKey, value: String },

    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),
}

// ============================================================================
// Backends
// ============================================================================

/// Durable storage for values written with `set_persistent`.
pub trait ConfigBackend {
    fn load(&self) -> Result<BTreeMap<ConfigKey, String>, ConfigError>;
    fn store(&mut self, key: ConfigKey, value: &str) -> Result<(), ConfigError>;
    fn remove(&mut self, key: ConfigKey) -> Result<(), ConfigError>;
}

/// JSON file keyed by setting name.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backend at the platform config directory.
    pub fn default_location() -> Result<Self, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::new(config_dir.join(APP_NAME).join(CONFIG_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_raw(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_raw(&self, raw: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(raw)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ConfigBackend for FileBackend {
    fn load(&self) -> Result<BTreeMap<ConfigKey, String>, ConfigError> {
        let mut values = BTreeMap::new();
        for (name, value) in self.read_raw()? {
            match name.parse::<ConfigKey>() {
                Ok(key) => {
                    values.insert(key, value);
                }
                Err(_) => warn!(key = %name, path = ?self.path, "Ignoring unknown config key"),
            }
        }
        Ok(values)
    }

    fn store(&mut self, key: ConfigKey, value: &str) -> Result<(), ConfigError> {
        let mut raw = self.read_raw()?;
        raw.insert(key.as_str().to_string(), value.to_string());
        self.write_raw(&raw)
    }

    fn remove(&mut self, key: ConfigKey) -> Result<(), ConfigError> {
        let mut raw = self.read_raw()?;
        if raw.remove(key.as_str()).is_some() {
            self.write_raw(&raw)?;
        }
        Ok(())
    }
}

/// Keeps secret keys in the OS keychain and everything else in `inner`.
pub struct KeyringBackend<B> {
    inner: B,
    account: String,
}

impl<B: ConfigBackend> KeyringBackend<B> {
    pub fn new(inner: B) -> Self {
        Self::with_account(inner, "default")
    }

    /// Use a distinct keychain account, e.g. one per API endpoint.
    pub fn with_account(inner: B, account: impl Into<String>) -> Self {
        Self {
            inner,
            account: account.into(),
        }
    }

    fn entry(&self, key: ConfigKey) -> Result<Entry, ConfigError> {
        let user = format!("{}:{}", self.account, key.as_str());
        Ok(Entry::new(KEYRING_SERVICE, &user)?)
    }
}

impl<B: ConfigBackend> ConfigBackend for KeyringBackend<B> {
    fn load(&self) -> Result<BTreeMap<ConfigKey, String>, ConfigError> {
        let mut values = self.inner.load()?;
        for key in ConfigKey::ALL.iter().filter(|k| k.is_secret()) {
            match self.entry(*key)?.get_password() {
                Ok(secret) => {
                    values.insert(*key, secret);
                }
                Err(keyring::Error::NoEntry) => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to read keychain entry"),
            }
        }
        Ok(values)
    }

    fn store(&mut self, key: ConfigKey, value: &str) -> Result<(), ConfigError> {
        if key.is_secret() {
            self.entry(key)?.set_password(value)?;
            Ok(())
        } else {
            self.inner.store(key, value)
        }
    }

    fn remove(&mut self, key: ConfigKey) -> Result<(), ConfigError> {
        if !key.is_secret() {
            return self.inner.remove(key);
        }
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory backend. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    values: Arc<Mutex<BTreeMap<ConfigKey, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (ConfigKey, V)>,
        V: Into<String>,
    {
        let backend = Self::default();
        if let Ok(mut map) = backend.values.lock() {
            map.extend(values.into_iter().map(|(k, v)| (k, v.into())));
        }
        backend
    }

    /// Current durable value for `key`.
    pub fn get(&self, key: ConfigKey) -> Option<String> {
        self.values.lock().ok().and_then(|m| m.get(&key).cloned())
    }
}

impl ConfigBackend for MemoryBackend {
    fn load(&self) -> Result<BTreeMap<ConfigKey, String>, ConfigError> {
        Ok(self.values.lock().map(|m| m.clone()).unwrap_or_default())
    }

    fn store(&mut self, key: ConfigKey, value: &str) -> Result<(), ConfigError> {
        if let Ok(mut map) = self.values.lock() {
            map.insert(key, value.to_string());
        }
        Ok(())
    }

    fn remove(&mut self, key: ConfigKey) -> Result<(), ConfigError> {
        if let Ok(mut map) = self.values.lock() {
            map.remove(&key);
        }
        Ok(())
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone)]
struct ConfigValue {
    value: String,
    provenance: Provenance,
}

/// Auth settings with provenance, backed by durable storage.
///
/// Reads always observe the latest write made through this store.
pub struct ConfigStore {
    values: HashMap<ConfigKey, ConfigValue>,
    backend: Box<dyn ConfigBackend>,
}

impl ConfigStore {
    /// Create a store seeded from the backend's persisted values.
    pub fn load(backend: impl ConfigBackend + 'static) -> Result<Self, ConfigError> {
        let persisted = backend.load()?;
        debug!(keys = persisted.len(), "Config loaded");

        let values = persisted
            .into_iter()
            .map(|(key, value)| {
                (
                    key,
                    ConfigValue {
                        value,
                        provenance: Provenance::File,
                    },
                )
            })
            .collect();

        Ok(Self {
            values,
            backend: Box::new(backend),
        })
    }

    /// Apply `KEYWARD_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in ConfigKey::ALL {
            if let Some(value) = lookup(&key.env_var()).filter(|v| !v.is_empty()) {
                debug!(key = %key, "Config override from environment");
                self.set(key, value, Provenance::Env);
            }
        }
    }

    /// Value of `key`, or an error if it was never set.
    pub fn get(&self, key: ConfigKey) -> Result<String, ConfigError> {
        self.values
            .get(&key)
            .map(|v| v.value.clone())
            .ok_or(ConfigError::NotSet(key))
    }

    /// Value of `key`, or an empty string if unset.
    pub fn get_or_empty(&self, key: ConfigKey) -> String {
        self.get(key).unwrap_or_default()
    }

    /// Boolean value of `key`; unset and empty read as `false`.
    pub fn get_bool(&self, key: ConfigKey) -> Result<bool, ConfigError> {
        let value = self.get_or_empty(key);
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            _ => Err(ConfigError::InvalidBool { key, value }),
        }
    }

    /// Numeric value of `key`, or `default` if unset or empty.
    pub fn get_u64(&self, key: ConfigKey, default: u64) -> Result<u64, ConfigError> {
        let value = self.get_or_empty(key);
        if value.trim().is_empty() {
            return Ok(default);
        }
        value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value })
    }

    pub fn provenance(&self, key: ConfigKey) -> Option<Provenance> {
        self.values.get(&key).map(|v| v.provenance)
    }

    pub fn is_set(&self, key: ConfigKey) -> bool {
        self.values.get(&key).is_some_and(|v| !v.value.is_empty())
    }

    /// Set an in-memory value for this process only.
    pub fn set(&mut self, key: ConfigKey, value: impl Into<String>, provenance: Provenance) {
        self.values.insert(
            key,
            ConfigValue {
                value: value.into(),
                provenance,
            },
        );
    }

    /// Set a value and write it to durable storage.
    pub fn set_persistent(
        &mut self,
        key: ConfigKey,
        value: impl Into<String>,
        provenance: Provenance,
    ) -> Result<(), ConfigError> {
        let value = value.into();
        self.backend.store(key, &value)?;
        self.set(key, value, provenance);
        debug!(key = %key, "Config value persisted");
        Ok(())
    }

    /// Remove a value from memory and durable storage.
    pub fn unset(&mut self, key: ConfigKey) -> Result<(), ConfigError> {
        self.backend.remove(key)?;
        self.values.remove(&key);
        debug!(key = %key, "Config value unset");
        Ok(())
    }

    /// Blank a value in memory so later reads see it empty. Durable storage
    /// is untouched.
    pub fn clear(&mut self, key: ConfigKey) {
        self.set(key, String::new(), Provenance::Interactive);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_key_round_trips_names() {
        for key in ConfigKey::ALL {
            assert_eq!(key.as_str().parse::<ConfigKey>().unwrap(), key);
        }
        assert!("nope".parse::<ConfigKey>().is_err());
    }

    #[test]
    fn test_env_var_names() {
        assert_eq!(ConfigKey::User.env_var(), "KEYWARD_USER");
        assert_eq!(ConfigKey::Pass.env_var(), "KEYWARD_PASSWORD");
        assert_eq!(ConfigKey::TwoFactorOtp.env_var(), "KEYWARD_2FA_OTP");
        assert_eq!(ConfigKey::SessionValidity.env_var(), "KEYWARD_SESSION_VALIDITY");
    }

    #[test]
    fn test_get_unset_is_error() {
        let store = ConfigStore::load(MemoryBackend::new()).unwrap();
        assert!(matches!(
            store.get(ConfigKey::User),
            Err(ConfigError::NotSet(ConfigKey::User))
        ));
        assert_eq!(store.get_or_empty(ConfigKey::User), "");
    }

    #[test]
    fn test_get_bool() {
        let mut store = ConfigStore::load(MemoryBackend::new()).unwrap();
        assert!(!store.get_bool(ConfigKey::Yubikey).unwrap());

        store.set(ConfigKey::Yubikey, "true", Provenance::Flag);
        assert!(store.get_bool(ConfigKey::Yubikey).unwrap());

        store.set(ConfigKey::Yubikey, "No", Provenance::Flag);
        assert!(!store.get_bool(ConfigKey::Yubikey).unwrap());

        store.set(ConfigKey::Yubikey, "maybe", Provenance::Flag);
        assert!(matches!(
            store.get_bool(ConfigKey::Yubikey),
            Err(ConfigError::InvalidBool { .. })
        ));
    }

    #[test]
    fn test_get_u64_default_and_invalid() {
        let mut store = ConfigStore::load(MemoryBackend::new()).unwrap();
        assert_eq!(store.get_u64(ConfigKey::SessionValidity, 3600).unwrap(), 3600);

        store.set(ConfigKey::SessionValidity, "600", Provenance::Flag);
        assert_eq!(store.get_u64(ConfigKey::SessionValidity, 3600).unwrap(), 600);

        store.set(ConfigKey::SessionValidity, "ten", Provenance::Flag);
        assert!(store.get_u64(ConfigKey::SessionValidity, 3600).is_err());
    }

    #[test]
    fn test_loaded_values_have_file_provenance() {
        let backend = MemoryBackend::with_values([(ConfigKey::User, "bob")]);
        let store = ConfigStore::load(backend).unwrap();
        assert_eq!(store.get(ConfigKey::User).unwrap(), "bob");
        assert_eq!(store.provenance(ConfigKey::User), Some(Provenance::File));
    }

    #[test]
    fn test_set_is_memory_only() {
        let backend = MemoryBackend::new();
        let mut store = ConfigStore::load(backend.clone()).unwrap();
        store.set(ConfigKey::Impersonate, "alice", Provenance::Flag);
        assert_eq!(store.get_or_empty(ConfigKey::Impersonate), "alice");
        assert_eq!(backend.get(ConfigKey::Impersonate), None);
    }

    #[test]
    fn test_set_persistent_and_unset() {
        let backend = MemoryBackend::new();
        let mut store = ConfigStore::load(backend.clone()).unwrap();

        store
            .set_persistent(ConfigKey::Token, "tok", Provenance::Interactive)
            .unwrap();
        assert_eq!(backend.get(ConfigKey::Token).as_deref(), Some("tok"));
        assert_eq!(store.get_or_empty(ConfigKey::Token), "tok");

        store.unset(ConfigKey::Token).unwrap();
        assert_eq!(backend.get(ConfigKey::Token), None);
        assert!(store.get(ConfigKey::Token).is_err());
    }

    #[test]
    fn test_clear_shadows_persisted_value() {
        let backend = MemoryBackend::with_values([(ConfigKey::Pass, "hunter2")]);
        let mut store = ConfigStore::load(backend.clone()).unwrap();

        store.clear(ConfigKey::Pass);
        assert_eq!(store.get_or_empty(ConfigKey::Pass), "");
        assert!(!store.is_set(ConfigKey::Pass));
        assert_eq!(backend.get(ConfigKey::Pass).as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_apply_env_overrides_file() {
        let backend = MemoryBackend::with_values([(ConfigKey::User, "bob")]);
        let mut store = ConfigStore::load(backend).unwrap();

        store.apply_env_with(|name| match name {
            "KEYWARD_USER" => Some("carol".to_string()),
            "KEYWARD_IMPERSONATE" => Some(String::new()),
            _ => None,
        });

        assert_eq!(store.get_or_empty(ConfigKey::User), "carol");
        assert_eq!(store.provenance(ConfigKey::User), Some(Provenance::Env));
        assert!(store.get(ConfigKey::Impersonate).is_err());
    }

    #[test]
    fn test_file_backend_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut store = ConfigStore::load(FileBackend::new(&path)).unwrap();
        store
            .set_persistent(ConfigKey::User, "bob", Provenance::Interactive)
            .unwrap();
        store
            .set_persistent(ConfigKey::Impersonate, "alice", Provenance::Flag)
            .unwrap();
        store.unset(ConfigKey::Impersonate).unwrap();

        let reloaded = ConfigStore::load(FileBackend::new(&path)).unwrap();
        assert_eq!(reloaded.get_or_empty(ConfigKey::User), "bob");
        assert!(reloaded.get(ConfigKey::Impersonate).is_err());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"user\""));
    }

    #[test]
    fn test_file_backend_ignores_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"user": "bob", "colour": "blue"}"#).unwrap();

        let values = FileBackend::new(&path).load().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values.get(&ConfigKey::User).map(String::as_str), Some("bob"));
    }
}
