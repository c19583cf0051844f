#![forbid(unsafe_code)]

//! Live code reloading for long-running servers.
//!
//! A [`ReloadCoordinator`] hosts exactly one [`Generation`] of application
//! code at a time. Units are read from a source tree by a per-generation
//! [`ModuleLoader`] which watches the directories it loaded from. When any
//! of them changes, the next unit of work retires the stale generation and
//! builds a fresh one, while a background task pre-warms replacements so
//! requests rarely pay the rebuild cost.

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod host;
pub mod loader;
pub mod watch;

pub use config::HostConfig;
pub use coordinator::{Generation, Lifecycle, ReloadCoordinator, Work};
pub use errors::{AppError, Result};
pub use loader::{ChangeWait, LoaderContext, ModuleLoader};
