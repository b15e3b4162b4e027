//! Resolved configuration for the vault engine.
//!
//! The engine never reads the environment. Front ends build a [`CoreConfig`]
//! (usually via [`CoreConfig::for_environment`]) and hand it over.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use cryptosafe_common::{Error, Result};
use cryptosafe_crypto::{CipherScheme, KdfParams};
use cryptosafe_storage::RetryConfig;

/// Default clipboard lifetime.
pub const DEFAULT_CLIPBOARD_TIMEOUT: Duration = Duration::from_secs(15);

/// Default inactivity period before auto-lock.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default minimum master passphrase length, in characters.
pub const DEFAULT_MIN_PASSPHRASE_LEN: usize = 6;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    /// Database file used when no path is configured.
    pub fn default_db_path(self) -> PathBuf {
        let file = match self {
            Environment::Development => "cryptosafe_dev.db",
            Environment::Production => "cryptosafe.db",
        };
        Path::new("data").join(file)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(Error::InvalidInput(format!("Unknown environment: {}", other))),
        }
    }
}

/// Session gate policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// How long copied secrets stay in the clipboard slot.
    pub clipboard_timeout: Duration,
    /// Idle time before the session locks itself.
    pub inactivity_timeout: Duration,
    /// Minimum master passphrase length for setup and changes.
    pub min_passphrase_len: usize,
    /// Identity reported for the unlocked session.
    pub user: String,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            clipboard_timeout: DEFAULT_CLIPBOARD_TIMEOUT,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            min_passphrase_len: DEFAULT_MIN_PASSPHRASE_LEN,
            user: "local".to_string(),
        }
    }
}

/// Display preferences carried for front ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub language: String,
    pub theme: String,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            theme: "system".to_string(),
        }
    }
}

/// Fully resolved engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub environment: Environment,
    pub db_path: PathBuf,
    /// Scheme for new ciphertexts.
    pub cipher: CipherScheme,
    /// Parameters for newly derived master keys.
    pub kdf: KdfParams,
    pub session: SessionPolicy,
    /// Chain audit records together.
    pub audit_signing: bool,
    pub retry: RetryConfig,
    pub preferences: UserPreferences,
}

impl CoreConfig {
    /// Defaults for an environment.
    ///
    /// Production derives keys with the interactive Argon2id preset;
    /// development uses the cheaper moderate preset.
    pub fn for_environment(environment: Environment, db_path: Option<PathBuf>) -> Self {
        let kdf = match environment {
            Environment::Production => KdfParams::interactive(),
            Environment::Development => KdfParams::moderate(),
        };
        Self {
            environment,
            db_path: db_path.unwrap_or_else(|| environment.default_db_path()),
            cipher: CipherScheme::default(),
            kdf,
            session: SessionPolicy::default(),
            audit_signing: true,
            retry: RetryConfig::default(),
            preferences: UserPreferences::default(),
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_cipher(mut self, cipher: CipherScheme) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_session(mut self, session: SessionPolicy) -> Self {
        self.session = session;
        self
    }

    /// Check the configuration before use.
    ///
    /// # Errors
    /// - `InvalidInput` for zero timeouts, an empty user or path, or KDF
    ///   parameters Argon2 rejects
    pub fn validate(&self) -> Result<()> {
        if self.session.clipboard_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "Clipboard timeout must be positive".to_string(),
            ));
        }
        if self.session.inactivity_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "Inactivity timeout must be positive".to_string(),
            ));
        }
        if self.session.user.trim().is_empty() {
            return Err(Error::InvalidInput("Session user must not be empty".to_string()));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(Error::InvalidInput("Database path must not be empty".to_string()));
        }
        self.kdf.validate()
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::for_environment(Environment::default(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults() {
        let dev = CoreConfig::for_environment(Environment::Development, None);
        assert_eq!(dev.db_path, Path::new("data").join("cryptosafe_dev.db"));
        assert_eq!(dev.kdf, KdfParams::moderate());

        let prod = CoreConfig::for_environment(Environment::Production, None);
        assert_eq!(prod.db_path, Path::new("data").join("cryptosafe.db"));
        assert_eq!(prod.kdf, KdfParams::interactive());
        assert_eq!(prod.cipher, CipherScheme::XChaCha20Poly1305);
        assert!(prod.audit_signing);
        assert_eq!(prod.preferences.language, "en");
        assert_eq!(prod.preferences.theme, "system");
    }

    #[test]
    fn test_explicit_path_wins() {
        let config =
            CoreConfig::for_environment(Environment::Production, Some(PathBuf::from("/tmp/v.db")));
        assert_eq!(config.db_path, PathBuf::from("/tmp/v.db"));
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PRODUCTION".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = CoreConfig::default();
        assert!(config.validate().is_ok());

        config.session.clipboard_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));

        let mut config = CoreConfig::default();
        config.session.inactivity_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_kdf() {
        let config = CoreConfig::default().with_kdf(KdfParams::argon2id(1, 0, 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = CoreConfig::for_environment(Environment::Production, None);
        let json = serde_json::to_string(&config).unwrap();
        let restored: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }
}
