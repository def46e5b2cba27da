use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;

/// Coarse failure category shown to callers; the raw message travels alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A foreign-key, unique, check or trigger constraint rejected the statement.
    Constraint,
    /// The database could not be opened, is locked, or is otherwise unreachable.
    Unavailable,
    /// Bad SQL text, wrong parameter count, or a column of the wrong type.
    Malformed,
    /// A value failed validation before reaching the database.
    Invalid,
    NotFound,
    Unauthorized,
    Forbidden,
    Other,
}

impl ErrorKind {
    #[must_use]
    pub fn of_sqlite(err: &rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ErrorCode::ConstraintViolation => Self::Constraint,
                ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::SystemIoFailure
                | ErrorCode::PermissionDenied
                | ErrorCode::ReadOnly
                | ErrorCode::DiskFull => Self::Unavailable,
                ErrorCode::TypeMismatch | ErrorCode::ParameterOutOfRange | ErrorCode::Unknown => {
                    Self::Malformed
                }
                _ => Self::Other,
            },
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound,
            rusqlite::Error::InvalidParameterCount(..)
            | rusqlite::Error::InvalidParameterName(_)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::InvalidColumnName(_)
            | rusqlite::Error::InvalidColumnIndex(_)
            | rusqlite::Error::ExecuteReturnedResults
            | rusqlite::Error::MultipleStatement
            | rusqlite::Error::InvalidQuery => Self::Malformed,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("Unknown table '{name}'. Must be one of: {allowed}")]
    UnknownTable { name: String, allowed: String },

    #[error("{0} not found")]
    NotFound(String),
}

impl DbError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Sqlite(e) => ErrorKind::of_sqlite(e),
            Self::Invalid(_) | Self::UnknownTable { .. } => ErrorKind::Invalid,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Walk an error chain and report the first recognised category.
#[must_use]
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<DbError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<rusqlite::Error>() {
            return ErrorKind::of_sqlite(e);
        }
        if let Some(e) = cause.downcast_ref::<AuthError>() {
            return e.kind();
        }
    }
    ErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_classify_through_context() {
        let err: anyhow::Error = DbError::invalid("rating must be between 1 and 5").into();
        let err = err.context("failed to add feedback");
        assert_eq!(classify(&err), ErrorKind::Invalid);
    }

    #[test]
    fn test_classify_raw_sqlite_error() {
        let err = Err::<(), _>(rusqlite::Error::QueryReturnedNoRows)
            .context("User not found")
            .unwrap_err();
        assert_eq!(classify(&err), ErrorKind::NotFound);
    }

    #[test]
    fn test_classify_unknown_error() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(classify(&err), ErrorKind::Other);
    }
}
