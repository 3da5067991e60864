// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use sigil_storage::{RepositoryError, RepositoryErrorKind};
use sqlx::sqlite::SqliteQueryResult;
use thiserror::Error;

/// Generic error when interacting with the database
#[derive(Debug, Error)]
#[error(transparent)]
pub enum DatabaseError {
    /// An error which came from the database itself
    Driver {
        /// The underlying error from the database driver
        #[from]
        source: sqlx::Error,
    },

    /// An error which occured while converting the data from the database
    Inconsistency(#[from] DatabaseInconsistencyError),

    /// A row with the same primary key already exists
    #[error("A row with key {key:?} already exists in table {table}")]
    Conflict {
        /// The table in which the insert failed
        table: &'static str,

        /// The conflicting key
        key: String,
    },

    /// The row addressed by an update does not exist (anymore)
    #[error("No row with key {key:?} in table {table}")]
    NotFound {
        /// The table in which the row was looked up
        table: &'static str,

        /// The missing key
        key: String,
    },

    /// An error which happened because the requested database operation is
    /// invalid
    #[error("Invalid database operation")]
    InvalidOperation {
        /// The source of the error, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// An error which happens when an operation affects not enough or too many
    /// rows
    #[error("Expected {expected} rows to be affected, but {actual} rows were affected")]
    RowsAffected {
        /// How many rows were expected to be affected
        expected: u64,

        /// How many rows were actually affected
        actual: u64,
    },
}

impl DatabaseError {
    pub(crate) fn ensure_affected_rows(
        result: &SqliteQueryResult,
        expected: u64,
    ) -> Result<(), DatabaseError> {
        let actual = result.rows_affected();
        if actual == expected {
            Ok(())
        } else {
            Err(DatabaseError::RowsAffected { expected, actual })
        }
    }

    pub(crate) fn to_invalid_operation<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Self::InvalidOperation {
            source: Some(Box::new(e)),
        }
    }

    pub(crate) const fn invalid_operation() -> Self {
        Self::InvalidOperation { source: None }
    }

    /// Whether retrying the same operation later could succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        let Self::Driver { source } = self else {
            return false;
        };

        match source {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(e) => {
                // SQLITE_BUSY and SQLITE_LOCKED, including their extended codes
                e.code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .is_some_and(|code| matches!(code & 0xff, 5 | 6))
            }
            _ => false,
        }
    }

    fn is_unique_violation(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Driver {
                source: sqlx::Error::Database(e),
            } => e.is_unique_violation(),
            _ => false,
        }
    }

    /// Classify this error into the backend-agnostic error taxonomy
    #[must_use]
    pub fn kind(&self) -> RepositoryErrorKind {
        if self.is_transient() {
            RepositoryErrorKind::Unavailable
        } else if self.is_unique_violation() {
            RepositoryErrorKind::Conflict
        } else {
            match self {
                Self::NotFound { .. } | Self::RowsAffected { actual: 0, .. } => {
                    RepositoryErrorKind::NotFound
                }
                Self::InvalidOperation { .. } => RepositoryErrorKind::InvalidOperation,
                _ => RepositoryErrorKind::Other,
            }
        }
    }
}

impl From<DatabaseError> for RepositoryError {
    fn from(value: DatabaseError) -> Self {
        RepositoryError::new(value.kind(), value)
    }
}

/// An error which happens when the data in the database is not consistent
/// with what the domain model expects
#[derive(Debug, Error)]
pub struct DatabaseInconsistencyError {
    table: &'static str,
    column: Option<&'static str>,
    row: Option<String>,

    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl std::fmt::Display for DatabaseInconsistencyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Database inconsistency on table {}", self.table)?;
        if let Some(column) = self.column {
            write!(f, " column {column}")?;
        }
        if let Some(row) = &self.row {
            write!(f, " row {row}")?;
        }

        Ok(())
    }
}

impl DatabaseInconsistencyError {
    /// Create a new [`DatabaseInconsistencyError`] for the given table
    #[must_use]
    pub(crate) const fn on(table: &'static str) -> Self {
        Self {
            table,
            column: None,
            row: None,
            source: None,
        }
    }

    /// Set the column of the [`DatabaseInconsistencyError`]
    #[must_use]
    pub(crate) const fn column(mut self, column: &'static str) -> Self {
        self.column = Some(column);
        self
    }

    /// Set the row of the [`DatabaseInconsistencyError`]
    #[must_use]
    pub(crate) fn row(mut self, row: impl Into<String>) -> Self {
        self.row = Some(row.into());
        self
    }

    /// Give the source of the [`DatabaseInconsistencyError`]
    #[must_use]
    pub(crate) fn source<E: std::error::Error + Send + Sync + 'static>(
        mut self,
        source: E,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}
