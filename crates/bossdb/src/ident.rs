//! SQL identifier validation.
//!
//! Table and column names are the only things ever interpolated into SQL
//! text, and only after passing [`validate`]: `^[a-zA-Z0-9_]+$`.

use crate::error::{DbError, DbResult};
use regex::Regex;
use std::sync::LazyLock;

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("static identifier pattern"));

/// Check that `name` is a bare identifier.
///
/// `kind` names the identifier in the error message ("table", "field", ...).
pub fn validate(kind: &str, name: &str) -> DbResult<()> {
    if name.is_empty() {
        return Err(DbError::validation(format!("{kind} name cannot be empty")));
    }
    if !IDENT_RE.is_match(name) {
        return Err(DbError::validation(format!(
            "{kind} name contains illegal characters: {name:?}"
        )));
    }
    Ok(())
}

/// Returns `true` when `name` matches the identifier pattern.
pub fn is_valid(name: &str) -> bool {
    IDENT_RE.is_match(name)
}
