//! Common error types for the curation ledger

use thiserror::Error;

/// Common result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every ledger component
#[derive(Error, Debug)]
pub enum Error {
    /// Identity resolution failed, the variant is no longer in storage
    #[error("Not found: {0}")]
    NotFound(String),

    /// PermissionGate denied the action
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Duplicate insert race on record creation
    ///
    /// Consumed by the record store (re-read once), never shown to a user.
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    /// Connection or driver failure (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map an insert failure, turning unique-constraint violations into
    /// [`Error::StorageConflict`]
    pub fn from_insert(err: sqlx::Error, what: &str) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::StorageConflict(format!("{} already exists", what))
            }
            _ => Error::Storage(err),
        }
    }

    /// Message rendered to the curator
    ///
    /// Storage failures get a generic text; driver details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::NotFound(_) => "Variant not found in the database".to_string(),
            Error::Unauthorized(_) => "You are not authorized to change this flag.".to_string(),
            Error::Storage(_) | Error::StorageConflict(_) | Error::Internal(_) => {
                "Cannot update database".to_string()
            }
            Error::Io(_) | Error::Config(_) => format!("Configuration problem: {}", self),
            Error::InvalidInput(msg) => msg.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_failure_message_is_generic() {
        let err = Error::Storage(sqlx::Error::PoolTimedOut);
        assert_eq!(err.user_message(), "Cannot update database");
    }

    #[test]
    fn test_non_unique_insert_failure_stays_storage() {
        let err = Error::from_insert(sqlx::Error::RowNotFound, "record");
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_unauthorized_message() {
        let err = Error::Unauthorized("bob".to_string());
        assert_eq!(err.user_message(), "You are not authorized to change this flag.");
    }
}
