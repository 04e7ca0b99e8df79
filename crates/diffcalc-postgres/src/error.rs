//! Error types for the PostgreSQL-backed diff metric store.

use thiserror::Error;

/// Errors this adapter can produce before converting into [`diffcalc_core::Error`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A query or connection failure reported by the driver.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A configured table or column name failed identifier validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// All retry attempts for a transient failure were exhausted.
    #[error("exhausted {attempts} retries: {reason}")]
    RetriesExhausted {
        /// Number of attempts made, including the first.
        attempts: u32,
        /// The last underlying failure's message.
        reason: String,
    },
}

/// Result type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Converts an adapter-local error into the shared core error type, the
/// same shape `dashflow-postgres-checkpointer::Error` uses to become
/// `dashflow::Error`.
impl From<Error> for diffcalc_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidIdentifier(msg) => diffcalc_core::Error::InvariantViolation(msg),
            other => diffcalc_core::Error::Storage(other.to_string()),
        }
    }
}

/// Validates a PostgreSQL identifier (table name): must start with a letter
/// or underscore, contain only alphanumerics and underscores, and be at
/// most 63 bytes, PostgreSQL's unquoted-identifier limit.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidIdentifier("identifier cannot be empty".to_string()));
    }
    if name.len() > 63 {
        return Err(Error::InvalidIdentifier(format!(
            "identifier '{name}' exceeds maximum length of 63 characters"
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().ok_or_else(|| Error::InvalidIdentifier("identifier cannot be empty".to_string()))?;
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(Error::InvalidIdentifier(format!("identifier '{name}' must start with a letter or underscore")));
    }
    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::InvalidIdentifier(format!("identifier '{name}' contains invalid character '{c}'")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_identifier() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn rejects_identifier_starting_with_digit() {
        assert!(validate_identifier("1metrics").is_err());
    }

    #[test]
    fn rejects_identifier_with_special_chars() {
        assert!(validate_identifier("diff_metrics; DROP TABLE").is_err());
    }

    #[test]
    fn accepts_normal_table_name() {
        assert!(validate_identifier("diff_metrics").is_ok());
        assert!(validate_identifier("_diff_metrics_v2").is_ok());
    }

    #[test]
    fn invalid_identifier_converts_to_invariant_violation() {
        let err = Error::InvalidIdentifier("bad".to_string());
        let core_err: diffcalc_core::Error = err.into();
        assert!(matches!(core_err, diffcalc_core::Error::InvariantViolation(_)));
    }

    #[test]
    fn retries_exhausted_converts_to_storage_error() {
        let err = Error::RetriesExhausted { attempts: 3, reason: "connection refused".to_string() };
        let core_err: diffcalc_core::Error = err.into();
        assert!(matches!(core_err, diffcalc_core::Error::Storage(_)));
    }
}
