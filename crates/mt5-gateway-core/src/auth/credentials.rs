use std::fmt;

use anyhow::{Context, Result};
use keyring::Entry;

use super::codec::{self, SecretFingerprint};

const SERVICE_NAME: &str = "mt5-gateway";

/// Manager credentials for the MT5 Web API. Immutable once built.
#[derive(Clone)]
pub struct Credentials {
    pub server: String,
    pub login: String,
    secret: String,
    pub version: u32,
    pub agent: String,
    pub account_type: String,
}

impl Credentials {
    pub fn new(
        server: impl Into<String>,
        login: impl Into<String>,
        secret: impl Into<String>,
        version: u32,
        agent: impl Into<String>,
        account_type: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            login: login.into(),
            secret: secret.into(),
            version,
            agent: agent.into(),
            account_type: account_type.into(),
        }
    }

    pub(crate) fn fingerprint(&self) -> SecretFingerprint {
        codec::derive_secret_fingerprint(&self.secret)
    }

    /// Query parameters for `/api/auth/start`
    pub(crate) fn start_params(&self) -> Vec<(String, String)> {
        vec![
            ("version".to_string(), self.version.to_string()),
            ("agent".to_string(), self.agent.clone()),
            ("login".to_string(), self.login.clone()),
            ("type".to_string(), self.account_type.clone()),
        ]
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("server", &self.server)
            .field("login", &self.login)
            .field("secret", &"<redacted>")
            .field("version", &self.version)
            .field("agent", &self.agent)
            .field("account_type", &self.account_type)
            .finish()
    }
}

/// OS keychain fallback for the manager password.
pub struct CredentialStore;

impl CredentialStore {
    /// Store the password for a manager login in the OS keychain
    pub fn store(login: &str, password: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, login).context("Failed to create keyring entry")?;
        entry
            .set_password(password)
            .context("Failed to store password in keychain")?;
        Ok(())
    }

    /// Retrieve the password for a manager login from the OS keychain
    pub fn get_password(login: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, login).context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve password from keychain")
    }
}
