// ABOUTME: CLI configuration: defaults, TOML file, then flag/env overrides
// ABOUTME: Also resolves the central store URL into a backend target

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::sanitize_url;

const DEFAULT_CONNECT_RETRIES: u32 = 3;
const DEFAULT_LOG: &str = "info";

/// Settings for the `revsync` binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Path to the local SQLite store.
    pub local_db: Option<PathBuf>,
    /// PostgreSQL URL, or `sqlite:<path>` for an embedded central store.
    pub central_url: Option<String>,
    pub allow_self_signed_certs: bool,
    pub connect_retries: u32,
    pub log: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_db: None,
            central_url: None,
            allow_self_signed_certs: false,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            log: DEFAULT_LOG.to_string(),
        }
    }
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub local_db: Option<PathBuf>,
    pub central_url: Option<String>,
    pub allow_self_signed_certs: bool,
    pub connect_retries: Option<u32>,
    pub log: Option<String>,
}

/// Default config location: `~/.revsync/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".revsync").join("config.toml"))
}

impl SyncConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid revsync configuration")
    }

    /// Load the config file.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used when present and defaults apply otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply command-line overrides on top of this config.
    pub fn merge(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(local_db) = overrides.local_db {
            self.local_db = Some(local_db);
        }
        if let Some(central_url) = overrides.central_url {
            self.central_url = Some(central_url);
        }
        if overrides.allow_self_signed_certs {
            self.allow_self_signed_certs = true;
        }
        if let Some(retries) = overrides.connect_retries {
            self.connect_retries = retries;
        }
        if let Some(log) = overrides.log {
            self.log = log;
        }
        self
    }

    pub fn require_local_db(&self) -> Result<&Path> {
        self.local_db
            .as_deref()
            .context("No local database given (use --local, REVSYNC_LOCAL_DB or local_db in the config file)")
    }

    pub fn require_central(&self) -> Result<CentralTarget> {
        let url = self
            .central_url
            .as_deref()
            .context("No central store given (use --central, REVSYNC_CENTRAL_URL or central_url in the config file)")?;
        CentralTarget::parse(url)
    }
}

/// Which backend serves as the central store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralTarget {
    Postgres(String),
    Sqlite(PathBuf),
}

impl CentralTarget {
    pub fn parse(url: &str) -> Result<Self> {
        if let Some(path) = url.strip_prefix("sqlite:") {
            let path = path.strip_prefix("//").unwrap_or(path);
            if path.is_empty() {
                bail!("sqlite central URL has no path: {}", url);
            }
            return Ok(CentralTarget::Sqlite(PathBuf::from(path)));
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            url::Url::parse(url)
                .with_context(|| format!("Invalid PostgreSQL URL: {}", sanitize_url(url)))?;
            return Ok(CentralTarget::Postgres(url.to_string()));
        }
        bail!(
            "Unsupported central store URL '{}'. Expected postgresql://... or sqlite:<path>",
            sanitize_url(url)
        )
    }

    /// Loggable description with credentials masked.
    pub fn describe(&self) -> String {
        match self {
            CentralTarget::Postgres(url) => sanitize_url(url),
            CentralTarget::Sqlite(path) => format!("sqlite:{}", path.display()),
        }
    }
}
