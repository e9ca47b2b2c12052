//! Controller settings and account files.
//!
//! Both load from TOML. Durations are written as whole seconds, and `0` disables an
//! optional timeout:
//!
//! ```toml
//! [account]
//! user = "me@example.com"
//! password = "hunter2"
//!
//! [account.imap]
//! host = "imap.example.com"
//! port = 993
//! secure = true
//!
//! [account.smtp]
//! host = "smtp.example.com"
//! port = 587
//!
//! [session]
//! io_timeout = 60
//! default_fetch_limit = 25
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::types::Credentials;

/// Why a configuration file could not be used.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(PathBuf, io::Error),
    /// The file is not valid TOML or does not have the expected shape.
    Toml(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "cannot read {}: {}", path.display(), e),
            ConfigError::Toml(e) => write!(f, "invalid configuration: {}", e),
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Toml(e) => Some(e),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> ConfigError {
        ConfigError::Toml(err)
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
}

/// Timeouts and limits for one [`Controller`](crate::Controller).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Bound on establishing each TCP connection.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// Bound on every IMAP read and write. `None` blocks indefinitely.
    #[serde(with = "opt_secs")]
    pub io_timeout: Option<Duration>,
    /// Bound on each SMTP exchange.
    #[serde(with = "opt_secs")]
    pub smtp_timeout: Option<Duration>,
    /// Accept any certificate and host name. Only for test servers.
    pub danger_skip_tls_verify: bool,
    /// Batch size used when a fetch does not name one.
    pub default_fetch_limit: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            connect_timeout: Duration::from_secs(30),
            io_timeout: Some(Duration::from_secs(120)),
            smtp_timeout: Some(Duration::from_secs(60)),
            danger_skip_tls_verify: false,
            default_fetch_limit: 50,
        }
    }
}

impl ControllerConfig {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn smtp_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.smtp_timeout = timeout;
        self
    }

    pub fn danger_skip_tls_verify(mut self, skip: bool) -> Self {
        self.danger_skip_tls_verify = skip;
        self
    }

    pub fn default_fetch_limit(mut self, limit: u32) -> Self {
        self.default_fetch_limit = limit;
        self
    }

    /// Parse settings from TOML. Missing keys keep their defaults.
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml(&read(path.as_ref())?)
    }
}

/// Credentials and settings for one account, as kept on disk.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountFile {
    pub account: Credentials,
    #[serde(default)]
    pub session: ControllerConfig,
}

impl AccountFile {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml(&read(path.as_ref())?)
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(if secs == 0 {
            None
        } else {
            Some(Duration::from_secs(secs))
        })
    }
}
