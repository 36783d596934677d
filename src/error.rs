use rusqlite::ErrorCode;
use rusqlite::ffi;
use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

/// Errors surfaced by the data-access layer.
///
/// Constraint violations and missing rows are "known" request failures the
/// caller may recover from; anything else from SQLite is `Unknown`.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("unique constraint failed on {target}")]
    UniqueViolation { target: String },

    #[error("foreign key constraint failed: {message}")]
    ForeignKeyViolation { message: String },

    #[error("check constraint failed: {message}")]
    CheckViolation { message: String },

    #[error("required field missing: {message}")]
    MissingField { message: String },

    #[error("{model} not found")]
    NotFound { model: &'static str },

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Unknown(#[source] rusqlite::Error),
}

impl DbError {
    pub fn not_found(model: &'static str) -> Self {
        DbError::NotFound { model }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DbError::Unknown(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound { .. })
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation { .. })
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        let rusqlite::Error::SqliteFailure(code, message) = &err else {
            return DbError::Unknown(err);
        };
        if code.code != ErrorCode::ConstraintViolation {
            return DbError::Unknown(err);
        }

        let message = message.clone().unwrap_or_default();
        match code.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                DbError::UniqueViolation {
                    target: unique_target(&message),
                }
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => DbError::ForeignKeyViolation { message },
            ffi::SQLITE_CONSTRAINT_CHECK => DbError::CheckViolation { message },
            ffi::SQLITE_CONSTRAINT_NOTNULL => DbError::MissingField { message },
            _ => DbError::Unknown(err),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::InvalidData(err.to_string())
    }
}

// SQLite reports "UNIQUE constraint failed: saved_jobs.user_id, saved_jobs.job_id"
fn unique_target(message: &str) -> String {
    message
        .split_once(": ")
        .map(|(_, cols)| cols.to_string())
        .unwrap_or_else(|| message.to_string())
}
