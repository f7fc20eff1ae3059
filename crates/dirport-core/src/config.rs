use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::connection::ConnectionSettings;
use crate::credentials::CredentialMethod;
use crate::error::CoreError;
use crate::export::ldif::DEFAULT_WRAP;
use crate::import::csv::Delimiter;
use crate::plugins::PluginDefinition;

/// Connection settings plus how to obtain the bind password.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(flatten)]
    pub settings: ConnectionSettings,
    #[serde(default)]
    pub credential_method: CredentialMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_command: Option<String>,
}

/// Where entries live and how passwords are hashed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub base_dn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_container: Option<String>,
    #[serde(default = "default_password_algorithm")]
    pub password_algorithm: String,
}

fn default_password_algorithm() -> String {
    "SSHA".to_string()
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_dn: String::new(),
            users_container: None,
            groups_container: None,
            password_algorithm: default_password_algorithm(),
        }
    }
}

impl DirectoryConfig {
    pub fn new(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            ..Self::default()
        }
    }

    /// `users_container`, or `ou=users,<base_dn>`.
    pub fn users_container(&self) -> String {
        self.users_container
            .clone()
            .unwrap_or_else(|| under_base("ou=users", &self.base_dn))
    }

    /// `groups_container`, or `ou=groups,<base_dn>`.
    pub fn groups_container(&self) -> String {
        self.groups_container
            .clone()
            .unwrap_or_else(|| under_base("ou=groups", &self.base_dn))
    }
}

fn under_base(rdn: &str, base: &str) -> String {
    if base.is_empty() {
        rdn.to_string()
    } else {
        format!("{},{}", rdn, base)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default)]
    pub delimiter: Delimiter,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_wrap")]
    pub ldif_wrap: usize,
    #[serde(default)]
    pub delimiter: Delimiter,
}

fn default_wrap() -> usize {
    DEFAULT_WRAP
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            ldif_wrap: DEFAULT_WRAP,
            delimiter: Delimiter::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirportConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub plugins: Vec<PluginDefinition>,
}

impl DirportConfig {
    /// `~/.config/dirport/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("dirport").join("config.toml"))
    }

    /// Load the default config file, falling back to defaults when absent or invalid.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            debug!("no config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load an explicit config file. Errors are reported, not defaulted.
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        let mut config: Self =
            toml::from_str(content).map_err(|e| CoreError::ConfigError(e.to_string()))?;
        if config.directory.base_dn.is_empty() {
            if let Some(base) = &config.connection.settings.base_dn {
                config.directory.base_dn = base.clone();
            }
        }
        Ok(config)
    }
}
