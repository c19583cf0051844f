//! Host configuration parsing and validation.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::loader::{is_valid_unit_name, ExclusionSet, SourceLayout};
use crate::{AppError, Result};

fn default_extension() -> String {
    "toml".into()
}

fn default_http_port() -> u16 {
    8080
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Host configuration parsed from `reloader.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HostConfig {
    /// Root of the watched source tree. Relative paths are resolved
    /// against the config file's directory.
    pub source_root: PathBuf,
    /// Unit the hosted application is built from.
    pub target: String,
    /// Extension of unit files, without the leading dot.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Units that are always served by the delegate resolver.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// HTTP port for the host adapter.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Interface the host adapter binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
}

impl HostConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        let mut config: Self = toml::from_str(&raw)?;
        if config.source_root.is_relative() {
            if let Some(base) = path.parent() {
                config.source_root = base.join(&config.source_root);
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string. Relative source roots are
    /// resolved against the working directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Source layout described by this configuration.
    #[must_use]
    pub fn layout(&self) -> SourceLayout {
        SourceLayout::new(self.source_root.clone(), self.extension.clone())
    }

    /// Exclusion set described by this configuration.
    #[must_use]
    pub fn exclusions(&self) -> ExclusionSet {
        self.exclude.iter().cloned().collect()
    }

    /// Socket address the host adapter listens on.
    #[must_use]
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.http_port)
    }

    fn validate(&mut self) -> Result<()> {
        if self.target.trim().is_empty() {
            return Err(AppError::Config("target must be set".into()));
        }
        if !is_valid_unit_name(&self.target) {
            return Err(AppError::Config(format!(
                "target '{}' is not a dotted unit name (e.g. site.index)",
                self.target
            )));
        }

        if self.extension.is_empty()
            || self.extension.starts_with('.')
            || self.extension.contains(['/', '\\'])
        {
            return Err(AppError::Config(format!(
                "extension '{}' must be a bare file extension such as \"toml\"",
                self.extension
            )));
        }

        if let Some(bad) = self.exclude.iter().find(|name| !is_valid_unit_name(name)) {
            return Err(AppError::Config(format!(
                "exclude entry '{bad}' is not a dotted unit name"
            )));
        }

        let canonical_root = self
            .source_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("source_root invalid: {err}")))?;
        if !canonical_root.is_dir() {
            return Err(AppError::Config(format!(
                "source_root '{}' is not a directory",
                canonical_root.display()
            )));
        }
        self.source_root = canonical_root;

        Ok(())
    }
}
