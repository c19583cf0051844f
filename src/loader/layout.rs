//! Mapping from hierarchical unit names to files, and the exclusion set.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Returns `true` if `name` is a dotted hierarchical unit name such as
/// `site.pages.index`.
///
/// Every segment must be non-empty and made of ASCII alphanumerics, `_`
/// or `-`, which keeps resolved paths inside the source root.
#[must_use]
pub fn is_valid_unit_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
}

/// Where local units live: `root/<seg1>/.../<segN>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayout {
    root: PathBuf,
    extension: String,
}

impl SourceLayout {
    /// Create a layout rooted at `root` for files ending in `.extension`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    /// Root directory of the source tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File extension of unit files, without the leading dot.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// The path a unit would occupy in the tree, or `None` if the name is
    /// not a hierarchical unit name. Does not touch the file system.
    #[must_use]
    pub fn path_for(&self, name: &str) -> Option<PathBuf> {
        if !is_valid_unit_name(name) {
            return None;
        }
        let mut path = self.root.clone();
        path.extend(name.split('.'));
        path.set_extension(&self.extension);
        Some(path)
    }
}

/// Names that are always delegated, even when a local file exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    names: BTreeSet<String>,
}

impl ExclusionSet {
    /// An empty set: nothing is excluded.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether `name` must bypass local discovery.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Number of excluded names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether nothing is excluded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ExclusionSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}
