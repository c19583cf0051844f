//! Error types shared across the reload engine and its host adapter.

use std::fmt::{Display, Formatter};

/// Shared result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode of the reload engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure. Fatal at startup.
    Config(String),
    /// A unit could not be read, or the delegate resolver has no such unit.
    UnitUnavailable(String),
    /// A unit's bytes were rejected by the definer.
    UnitInvalid(String),
    /// The hosted application failed to start against a fresh loader.
    LifecycleStart(String),
    /// A change-notification subscription could not be created.
    Watch(String),
    /// The coordinator has been shut down and serves no more work.
    ShutDown(String),
    /// File-system or socket failure outside of unit loading.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::UnitUnavailable(msg) => write!(f, "unit unavailable: {msg}"),
            Self::UnitInvalid(msg) => write!(f, "unit invalid: {msg}"),
            Self::LifecycleStart(msg) => write!(f, "lifecycle start: {msg}"),
            Self::Watch(msg) => write!(f, "watch: {msg}"),
            Self::ShutDown(msg) => write!(f, "shut down: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<notify::Error> for AppError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}
