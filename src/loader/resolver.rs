//! Fallback resolution for names that are not loaded from the source tree.

use std::collections::HashMap;
use std::sync::Arc;

use super::unit::{Unit, UnitDefiner, UnitOrigin};
use crate::{AppError, Result};

/// The host's normal code-loading path: packaged dependencies, builtins,
/// anything that is never reloaded.
pub trait UnitResolver: Send + Sync {
    /// Resolve `name` without touching the watched tree.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnitUnavailable` if the resolver has no such unit.
    fn resolve(&self, name: &str) -> Result<Arc<Unit>>;
}

/// Resolver with nothing behind it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelegate;

impl UnitResolver for NoDelegate {
    fn resolve(&self, name: &str) -> Result<Arc<Unit>> {
        Err(AppError::UnitUnavailable(format!(
            "{name}: not found locally and no delegate resolver is configured"
        )))
    }
}

/// In-memory bundle of packaged units, defined once up front.
///
/// The same `Arc<Unit>` is returned for every request, across all
/// generations, because packaged code never changes while the process runs.
#[derive(Debug, Default)]
pub struct StaticResolver {
    units: HashMap<String, Arc<Unit>>,
}

impl StaticResolver {
    /// Define every `(name, bytes)` pair with `definer`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnitInvalid` if any packaged unit is rejected.
    pub fn from_sources<'a>(
        definer: &dyn UnitDefiner,
        sources: impl IntoIterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<Self> {
        let mut units = HashMap::new();
        for (name, bytes) in sources {
            let unit = Unit::define(definer, name, UnitOrigin::Delegated, bytes)?;
            units.insert(name.to_owned(), Arc::new(unit));
        }
        Ok(Self { units })
    }

    /// Names this resolver can serve, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.units.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl UnitResolver for StaticResolver {
    fn resolve(&self, name: &str) -> Result<Arc<Unit>> {
        self.units
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| AppError::UnitUnavailable(format!("{name}: no packaged unit")))
    }
}
