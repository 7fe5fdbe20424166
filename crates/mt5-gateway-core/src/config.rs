//! Gateway configuration.
//!
//! Settings come from an optional JSON file at
//! `~/.config/mt5-gateway/config.json`, overridden by environment
//! variables (`MT5_SERVER`, `MT5_LOGIN`, ...). The result is validated once
//! at startup and never re-read.
//!
//! The manager password may be omitted everywhere, in which case it is
//! looked up in the OS keychain under the manager login.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::manager::DEFAULT_PROBE_PATH;
use crate::auth::{CredentialStore, Credentials, ServerProofPolicy, SessionOptions};

/// Application name used for the config directory path
const APP_NAME: &str = "mt5-gateway";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Oldest Web API protocol build that supports the handshake.
const MIN_PROTOCOL_VERSION: u32 = 484;

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: Option<String>,
    pub login: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub agent: String,
    pub version: u32,
    pub account_type: String,
    pub server_proof: ServerProofPolicy,
    pub ping_path: String,
    pub test_login: String,
    pub request_timeout_secs: u64,
    pub redis_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub cors_origins: Vec<String>,
    pub bind_addr: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: None,
            login: None,
            password: None,
            agent: "WebManager".to_string(),
            version: 1290,
            account_type: "manager".to_string(),
            server_proof: ServerProofPolicy::Warn,
            ping_path: DEFAULT_PROBE_PATH.to_string(),
            test_login: "46108".to_string(),
            request_timeout_secs: 30,
            redis_url: None,
            api_key: None,
            cors_origins: vec!["*".to_string()],
            bind_addr: "0.0.0.0:8000".to_string(),
            log_dir: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("agent", &self.agent)
            .field("version", &self.version)
            .field("account_type", &self.account_type)
            .field("server_proof", &self.server_proof)
            .field("ping_path", &self.ping_path)
            .field("test_login", &self.test_login)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("redis_url", &self.redis_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("cors_origins", &self.cors_origins)
            .field("bind_addr", &self.bind_addr)
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

impl Config {
    /// Load file + environment and validate
    pub fn load() -> Result<Self> {
        let config = Self::load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Load file + environment without validating, for commands that only
    /// need part of the configuration.
    pub fn load_unvalidated() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        let Some(path) = Self::config_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Override fields from environment variables; empty values are ignored
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = var("MT5_SERVER") {
            self.server = Some(v);
        }
        if let Some(v) = var("MT5_LOGIN") {
            self.login = Some(v);
        }
        if let Some(v) = var("MT5_PASSWORD") {
            self.password = Some(v);
        }
        if let Some(v) = var("MT5_AGENT") {
            self.agent = v;
        }
        if let Some(v) = var("MT5_VERSION") {
            self.version = v.parse().with_context(|| format!("MT5_VERSION is not a number: {}", v))?;
        }
        if let Some(v) = var("MT5_ACCOUNT_TYPE") {
            self.account_type = v;
        }
        if let Some(v) = var("MT5_SERVER_PROOF") {
            self.server_proof = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = var("MT5_PING_PATH") {
            self.ping_path = v;
        }
        if let Some(v) = var("MT5_TEST_LOGIN") {
            self.test_login = v;
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v
                .parse()
                .with_context(|| format!("REQUEST_TIMEOUT_SECS is not a number: {}", v))?;
        }
        if let Some(v) = var("REDIS_URL") {
            self.redis_url = Some(v);
        }
        if let Some(v) = var("API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = var("CORS_ORIGINS") {
            self.cors_origins = v
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(v) = var("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = var("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let Some(server) = self.server.as_deref() else {
            bail!("MT5_SERVER is required");
        };
        if !server.starts_with("https://") && !server.starts_with("http://") {
            bail!("MT5_SERVER must be an http(s) URL, got {}", server);
        }
        if self.login.is_none() {
            bail!("MT5_LOGIN is required");
        }
        if self.version < MIN_PROTOCOL_VERSION {
            bail!("MT5_VERSION must be >= {}, got {}", MIN_PROTOCOL_VERSION, self.version);
        }
        if self.request_timeout_secs == 0 {
            bail!("REQUEST_TIMEOUT_SECS must be positive");
        }
        if !self.ping_path.starts_with('/') {
            bail!("MT5_PING_PATH must start with '/', got {}", self.ping_path);
        }
        Ok(())
    }

    /// The manager login, the only setting keychain management needs
    pub fn manager_login(&self) -> Result<&str> {
        self.login
            .as_deref()
            .filter(|login| !login.is_empty())
            .context("MT5_LOGIN is required")
    }

    /// Build credentials, falling back to the OS keychain for the password
    pub fn credentials(&self) -> Result<Credentials> {
        let server = self.server.clone().context("MT5_SERVER is required")?;
        let login = self.login.clone().context("MT5_LOGIN is required")?;
        let password = match &self.password {
            Some(password) => password.clone(),
            None => CredentialStore::get_password(&login)
                .context("MT5_PASSWORD not set and no password in the OS keychain")?,
        };

        Ok(Credentials::new(
            server,
            login,
            password,
            self.version,
            self.agent.clone(),
            self.account_type.clone(),
        ))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            probe_path: self.ping_path.clone(),
            proof_policy: self.server_proof,
            ..SessionOptions::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Empty key means the API key check is disabled
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}
