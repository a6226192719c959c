//! Model (record kind) definitions.
//!
//! A [`ModelDef`] is the runtime description of a record kind: its name,
//! table, column list in declaration order, and primary key. Models are
//! registered once and shared behind an `Arc` for the life of the process.

use crate::Result;
use crate::error::ConfigurationError;
use crate::identifiers::validate_identifier;
use crate::inflect;
use crate::record::{Instance, RecordRef};
use crate::row::Row;
use std::fmt;
use std::sync::Arc;

/// Builds a record from a row. Used when a model wants its own `Record`
/// implementation instead of the default [`Instance`].
pub type Constructor = Arc<dyn Fn(&Arc<ModelDef>, Row) -> Result<RecordRef> + Send + Sync>;

/// Runtime description of a record kind.
#[derive(Clone)]
pub struct ModelDef {
    name: String,
    table: String,
    columns: Vec<String>,
    primary_key: Vec<String>,
    constructor: Option<Constructor>,
}

impl ModelDef {
    /// Create a model with the default table name (`Album` -> `albums`)
    /// and a primary key of `id`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let table = inflect::tableize(&name);
        Self {
            name,
            table,
            columns: Vec::new(),
            primary_key: vec!["id".to_string()],
            constructor: None,
        }
    }

    /// Override the table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Set the column list. Order is significant: it is the default
    /// projection order and the fallback identity order.
    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the primary key column(s). An empty list means no primary key.
    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Declare that this model has no primary key.
    #[must_use]
    pub fn without_primary_key(mut self) -> Self {
        self.primary_key.clear();
        self
    }

    /// Use a custom record constructor.
    #[must_use]
    pub fn constructor<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<ModelDef>, Row) -> Result<RecordRef> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn primary_key_columns(&self) -> &[String] {
        &self.primary_key
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Check names and that every primary key column is a declared column.
    pub fn validate(&self) -> Result<()> {
        validate_identifier("model name", &self.name)?;
        validate_identifier("table name", &self.table)?;
        if self.columns.is_empty() {
            return Err(ConfigurationError::new("model declares no columns")
                .model(&self.name)
                .into());
        }
        for column in &self.columns {
            validate_identifier("column name", column)?;
        }
        if let Some(missing) = self.primary_key.iter().find(|pk| !self.has_column(pk)) {
            return Err(ConfigurationError::new(format!(
                "primary key column '{}' is not a declared column",
                missing
            ))
            .model(&self.name)
            .into());
        }
        Ok(())
    }

    /// Build a record of this kind from a row.
    pub fn instantiate(self: &Arc<Self>, row: Row) -> Result<RecordRef> {
        match &self.constructor {
            Some(construct) => construct(self, row),
            None => Ok(Arc::new(Instance::new(Arc::clone(self), row))),
        }
    }
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("primary_key", &self.primary_key)
            .field("custom_constructor", &self.constructor.is_some())
            .finish()
    }
}
