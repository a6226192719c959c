//! Error types for association loading.

use std::fmt;

/// The primary error type for all relgraph operations.
#[derive(Debug)]
pub enum Error {
    /// Invalid association or model definition, raised at registration time.
    Configuration(ConfigurationError),
    /// Eager loading an association that is unknown or not eager-loadable.
    UndefinedAssociation(UndefinedAssociationError),
    /// A graph join could not be planned.
    JoinPlanning(JoinPlanningError),
    /// An operation needed a primary key the record or model does not have.
    MissingKey(MissingKeyError),
    /// A before-callback vetoed an association mutation.
    CallbackAbort(CallbackAbort),
    /// Errors reported by the row source (passed through unchanged)
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigurationError {
    /// Model (owner kind) the definition belongs to, if known.
    pub model: Option<String>,
    /// Association name, if the error concerns one.
    pub association: Option<String>,
    pub message: String,
}

#[derive(Debug)]
pub struct UndefinedAssociationError {
    pub model: String,
    pub association: String,
    /// True when the association exists but has `allow_eager = false`.
    pub eager_disallowed: bool,
}

#[derive(Debug)]
pub struct JoinPlanningError {
    pub alias: Option<String>,
    pub message: String,
}

#[derive(Debug)]
pub struct MissingKeyError {
    pub model: String,
    pub message: String,
}

#[derive(Debug)]
pub struct CallbackAbort {
    pub association: String,
    /// Which hook vetoed the change (`before_add`, `before_remove`, `before_set`).
    pub hook: &'static str,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Table or column not found
    NotFound,
    /// The statement uses a construct the row source cannot execute
    Unsupported,
    /// Statement timeout
    Timeout,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl ConfigurationError {
    /// Create a configuration error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            model: None,
            association: None,
            message: message.into(),
        }
    }

    /// Attach the owning model name.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach the association name.
    #[must_use]
    pub fn association(mut self, name: impl Into<String>) -> Self {
        self.association = Some(name.into());
        self
    }
}

impl Error {
    /// Shorthand for a bare configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(ConfigurationError::new(message))
    }

    /// Shorthand for a join planning error.
    pub fn join_planning(alias: Option<&str>, message: impl Into<String>) -> Self {
        Error::JoinPlanning(JoinPlanningError {
            alias: alias.map(str::to_string),
            message: message.into(),
        })
    }

    /// Shorthand for a missing key error.
    pub fn missing_key(model: impl Into<String>, message: impl Into<String>) -> Self {
        Error::MissingKey(MissingKeyError {
            model: model.into(),
            message: message.into(),
        })
    }

    /// Shorthand for an unsupported-construct query error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind: QueryErrorKind::Unsupported,
            sql: None,
            message: message.into(),
            source: None,
        })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    pub fn is_undefined_association(&self) -> bool {
        matches!(self, Error::UndefinedAssociation(_))
    }

    pub fn is_join_planning(&self) -> bool {
        matches!(self, Error::JoinPlanning(_))
    }

    pub fn is_missing_key(&self) -> bool {
        matches!(self, Error::MissingKey(_))
    }

    pub fn is_callback_abort(&self) -> bool {
        matches!(self, Error::CallbackAbort(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(e) => write!(f, "Configuration error: {}", e),
            Error::UndefinedAssociation(e) => write!(f, "Undefined association: {}", e),
            Error::JoinPlanning(e) => write!(f, "Join planning error: {}", e),
            Error::MissingKey(e) => write!(f, "Missing key: {}", e),
            Error::CallbackAbort(e) => write!(f, "Callback aborted: {}", e),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.model, &self.association) {
            (Some(model), Some(assoc)) => write!(f, "{}.{}: {}", model, assoc, self.message),
            (Some(model), None) => write!(f, "{}: {}", model, self.message),
            (None, Some(assoc)) => write!(f, "{}: {}", assoc, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for UndefinedAssociationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.eager_disallowed {
            write!(
                f,
                "{}.{} does not allow eager loading",
                self.model, self.association
            )
        } else {
            write!(
                f,
                "{} has no association named '{}'",
                self.model, self.association
            )
        }
    }
}

impl fmt::Display for JoinPlanningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(alias) = &self.alias {
            write!(f, "{} (alias '{}')", self.message, alias)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for MissingKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.model, self.message)
    }
}

impl fmt::Display for CallbackAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hook vetoed change to '{}'", self.hook, self.association)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<ConfigurationError> for Error {
    fn from(err: ConfigurationError) -> Self {
        Error::Configuration(err)
    }
}

impl From<UndefinedAssociationError> for Error {
    fn from(err: UndefinedAssociationError) -> Self {
        Error::UndefinedAssociation(err)
    }
}

impl From<JoinPlanningError> for Error {
    fn from(err: JoinPlanningError) -> Self {
        Error::JoinPlanning(err)
    }
}

impl From<MissingKeyError> for Error {
    fn from(err: MissingKeyError) -> Self {
        Error::MissingKey(err)
    }
}

impl From<CallbackAbort> for Error {
    fn from(err: CallbackAbort) -> Self {
        Error::CallbackAbort(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for relgraph operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_display_includes_context() {
        let err = Error::from(
            ConfigurationError::new("key arity mismatch")
                .model("Album")
                .association("tracks"),
        );
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "Configuration error: Album.tracks: key arity mismatch"
        );
    }

    #[test]
    fn undefined_association_messages() {
        let missing = Error::UndefinedAssociation(UndefinedAssociationError {
            model: "Album".to_string(),
            association: "nope".to_string(),
            eager_disallowed: false,
        });
        assert!(missing.to_string().contains("no association named 'nope'"));

        let disallowed = Error::UndefinedAssociation(UndefinedAssociationError {
            model: "Album".to_string(),
            association: "tracks".to_string(),
            eager_disallowed: true,
        });
        assert!(disallowed.to_string().contains("does not allow eager loading"));
    }

    #[test]
    fn query_error_exposes_sql_and_source() {
        let io = std::io::Error::other("socket closed");
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Database,
            sql: Some("SELECT 1".to_string()),
            message: "connection lost".to_string(),
            source: Some(Box::new(io)),
        });
        assert_eq!(err.sql(), Some("SELECT 1"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn callback_abort_display() {
        let err = Error::CallbackAbort(CallbackAbort {
            association: "tracks".to_string(),
            hook: "before_add",
        });
        assert!(err.is_callback_abort());
        assert_eq!(
            err.to_string(),
            "Callback aborted: before_add hook vetoed change to 'tracks'"
        );
    }
}
