//! Loaded units and the definer seam that gives their bytes meaning.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::{AppError, Result};

/// The typed value a definer produced from a unit's bytes.
pub type Definition = Arc<dyn Any + Send + Sync>;

/// Turns raw unit bytes into a [`Definition`].
///
/// Returning `Err` rejects the unit; the loader reports it as
/// `AppError::UnitInvalid` with the returned message.
pub trait UnitDefiner: Send + Sync {
    /// Materialize the unit called `name` from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when `bytes` are not a valid unit.
    fn define(&self, name: &str, bytes: &[u8]) -> std::result::Result<Definition, String>;
}

/// Accepts any UTF-8 file; the definition is its `String` contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDefiner;

impl UnitDefiner for TextDefiner {
    fn define(&self, _name: &str, bytes: &[u8]) -> std::result::Result<Definition, String> {
        let text = std::str::from_utf8(bytes).map_err(|err| format!("not valid UTF-8: {err}"))?;
        Ok(Arc::new(text.to_owned()))
    }
}

/// Where a unit came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOrigin {
    /// Read from the watched source tree.
    Local {
        /// File the unit was read from.
        path: PathBuf,
    },
    /// Supplied by the delegate resolver. Never watched.
    Delegated,
}

/// A named, loaded piece of code plus its provenance.
pub struct Unit {
    name: String,
    origin: UnitOrigin,
    digest: String,
    loaded_at: DateTime<Utc>,
    definition: Definition,
}

impl Unit {
    /// Run `definer` over `bytes` and wrap the result with provenance.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnitInvalid` if the definer rejects the bytes.
    pub fn define(
        definer: &dyn UnitDefiner,
        name: &str,
        origin: UnitOrigin,
        bytes: &[u8],
    ) -> Result<Self> {
        let definition = definer
            .define(name, bytes)
            .map_err(|reason| AppError::UnitInvalid(format!("{name}: {reason}")))?;
        Ok(Self {
            name: name.to_owned(),
            origin,
            digest: format!("{:x}", Sha256::digest(bytes)),
            loaded_at: Utc::now(),
            definition,
        })
    }

    /// Unit name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provenance of this unit.
    #[must_use]
    pub fn origin(&self) -> &UnitOrigin {
        &self.origin
    }

    /// Backing file for local units.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            UnitOrigin::Local { path } => Some(path),
            UnitOrigin::Delegated => None,
        }
    }

    /// Whether the unit was read from the watched source tree.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.origin, UnitOrigin::Local { .. })
    }

    /// Hex SHA-256 of the bytes the unit was defined from.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// When the unit was materialized.
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// The untyped definition.
    #[must_use]
    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// The definition as a concrete type, if it is one.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.definition.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("digest", &self.digest)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}
