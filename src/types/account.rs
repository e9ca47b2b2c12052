use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a server listens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Implicit TLS when true. When false, IMAP runs over plain TCP and SMTP upgrades with
    /// STARTTLS if the server offers it.
    #[serde(default)]
    pub secure: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Endpoint {
            host: host.into(),
            port,
            secure,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if self.secure {
            f.write_str(" (tls)")?;
        }
        Ok(())
    }
}

/// A password that is wiped from memory when dropped and never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Secret(secret.into())
    }

    /// The secret in the clear, for handing to a protocol exchange.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Secret::new(s)
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Secret(s)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        let mut bytes = std::mem::take(&mut self.0).into_bytes();
        bytes.fill(0);
        std::hint::black_box(&bytes);
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Everything needed to open both links for one account.
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials {
    pub user: String,
    #[serde(rename = "password")]
    pub secret: Secret,
    #[serde(rename = "imap")]
    pub retrieval: Endpoint,
    #[serde(rename = "smtp")]
    pub transmission: Endpoint,
}

impl Credentials {
    pub fn new(
        user: impl Into<String>,
        secret: impl Into<Secret>,
        retrieval: Endpoint,
        transmission: Endpoint,
    ) -> Self {
        Credentials {
            user: user.into(),
            secret: secret.into(),
            retrieval,
            transmission,
        }
    }
}
