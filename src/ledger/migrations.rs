//! The `schema_migrations` version table.

use crate::errors::LedgerError;
use sqlx::PgPool;
use std::collections::BTreeSet;

pub const LEDGER_TABLE: &str = "schema_migrations";

pub const CREATE_LEDGER_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version VARCHAR(255) PRIMARY KEY,
    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

pub const SELECT_VERSIONS_SQL: &str = "SELECT version FROM schema_migrations";

/// Duplicate inserts are a no-op.
pub const RECORD_VERSION_SQL: &str =
    "INSERT INTO schema_migrations (version) VALUES ($1) ON CONFLICT (version) DO NOTHING";

pub struct MigrationLedger;

impl MigrationLedger {
    pub async fn ensure(pool: &PgPool) -> Result<(), LedgerError> {
        sqlx::query(CREATE_LEDGER_SQL).execute(pool).await?;
        Ok(())
    }

    pub async fn applied_versions(pool: &PgPool) -> Result<BTreeSet<String>, LedgerError> {
        let versions: Vec<String> = sqlx::query_scalar(SELECT_VERSIONS_SQL)
            .fetch_all(pool)
            .await?;
        Ok(versions.into_iter().collect())
    }

    pub async fn record(pool: &PgPool, version: &str) -> Result<(), LedgerError> {
        sqlx::query(RECORD_VERSION_SQL)
            .bind(version)
            .execute(pool)
            .await?;
        Ok(())
    }
}
