//! Errors from the Postgres backends.
//!
//! Ledger, topology and reservation errors all wrap [`DbError`], so a
//! storage failure carries the same shape whichever component hit it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("no migrations directory found (looked in {0})")]
    MigrationsMissing(String),

    /// A stored value that does not decode into its typed form, e.g. a
    /// `host_id` without the `host_` prefix.
    #[error("corrupt {table}.{column} value '{value}': {reason}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        value: String,
        reason: String,
    },
}

impl DbError {
    pub(crate) fn corrupt(
        table: &'static str,
        column: &'static str,
        value: &str,
        reason: impl ToString,
    ) -> Self {
        Self::CorruptRow {
            table,
            column,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_row_names_the_column() {
        let err = DbError::corrupt("host_capacity", "host_id", "node_1", "missing prefix");
        assert_eq!(
            err.to_string(),
            "corrupt host_capacity.host_id value 'node_1': missing prefix"
        );
    }
}
