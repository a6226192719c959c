//! SQL identifier quoting and validation.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{ConfigurationError, Result};

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// # Examples
///
/// ```
/// use relgraph_core::quote_ident;
///
/// assert_eq!(quote_ident("albums"), "\"albums\"");
/// assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL identifier using MySQL backtick quoting.
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
}

/// Check that `name` is a plain identifier: a letter or underscore followed
/// by letters, digits or underscores.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_some_and(|re| re.is_match(name))
}

/// Like [`is_valid_identifier`], but returns a configuration error naming
/// `what` (e.g. "association name") on failure.
pub fn validate_identifier(what: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(ConfigurationError::new(format!("invalid {} '{}'", what, name)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_simple() {
        assert_eq!(quote_ident("tracks"), "\"tracks\"");
        assert_eq!(quote_ident_mysql("tracks"), "`tracks`");
    }

    #[test]
    fn test_quote_ident_embedded_quotes() {
        assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
        assert_eq!(quote_ident_mysql("user`name"), "`user``name`");
    }

    #[test]
    fn test_valid_identifiers() {
        assert!(is_valid_identifier("tracks"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("album_id2"));
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier("drop;--"));
        assert!(!is_valid_identifier("albums.tracks"));
    }

    #[test]
    fn test_validate_identifier_error() {
        let err = validate_identifier("association name", "bad name").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("invalid association name 'bad name'"));
    }
}
