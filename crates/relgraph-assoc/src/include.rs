//! Nested eager-loading specifications.

use crate::relation::Dataset;
use std::fmt;
use std::sync::Arc;

/// A per-call hook that reshapes an association dataset before it runs.
pub type DatasetHook = Arc<dyn Fn(Dataset) -> Dataset + Send + Sync>;

/// One association to eager load, with its own nested associations.
#[derive(Clone)]
pub struct Include {
    /// Association name on the parent model.
    pub name: String,
    /// Associations to load on the loaded records.
    pub nested: Vec<Include>,
    /// Table alias base for graph joins, overriding the association's.
    pub alias: Option<String>,
    /// Dataset hook applied before the batch query runs.
    pub filter: Option<DatasetHook>,
}

impl Include {
    /// Include a single association.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nested: Vec::new(),
            alias: None,
            filter: None,
        }
    }

    /// Parse a dotted path such as `"albums.tracks"`.
    ///
    /// Surrounding whitespace and empty segments are ignored; returns
    /// `None` when no segment remains.
    pub fn path(path: &str) -> Option<Self> {
        let parts: Vec<&str> = path.trim().split('.').filter(|p| !p.is_empty()).collect();
        if parts.is_empty() {
            return None;
        }
        Some(Self::build_nested_path(&parts))
    }

    fn build_nested_path(parts: &[&str]) -> Include {
        let mut include = Include::new(parts[0]);
        if parts.len() > 1 {
            include.nested.push(Self::build_nested_path(&parts[1..]));
        }
        include
    }

    /// Add a nested association to load.
    #[must_use]
    pub fn nest(mut self, include: Include) -> Self {
        self.nested.push(include);
        self
    }

    /// Use `alias` as the table alias base when graph joined.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Reshape the association dataset for this load only.
    #[must_use]
    pub fn with_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(Dataset) -> Dataset + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Include {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Include")
            .field("name", &self.name)
            .field("nested", &self.nested)
            .field("alias", &self.alias)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

impl From<&str> for Include {
    fn from(name: &str) -> Self {
        Include::new(name)
    }
}

/// Merge includes naming the same association so each is loaded once.
///
/// Order of first appearance is kept. The first alias and filter win.
pub fn merge_includes(includes: &[Include]) -> Vec<Include> {
    let mut merged: Vec<Include> = Vec::with_capacity(includes.len());
    for include in includes {
        match merged.iter_mut().find(|m| m.name == include.name) {
            Some(existing) => {
                existing.nested.extend(include.nested.iter().cloned());
                if existing.alias.is_none() {
                    existing.alias.clone_from(&include.alias);
                }
                if existing.filter.is_none() {
                    existing.filter.clone_from(&include.filter);
                }
            }
            None => merged.push(include.clone()),
        }
    }
    for m in &mut merged {
        m.nested = merge_includes(&m.nested);
    }
    merged
}
