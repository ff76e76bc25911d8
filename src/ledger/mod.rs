//! Deployment ledger: target records, the migration version table, and the
//! Postgres pool they share.

pub mod migrations;
pub mod models;
pub mod schema;
pub mod targets;

use crate::errors::LedgerError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

pub use migrations::MigrationLedger;
pub use models::{HostDescriptor, Target, TargetRow};
pub use schema::SchemaCapabilities;
pub use targets::TargetRepo;

/// Open a small pool. Each pipeline run needs only a couple of connections.
pub async fn create_pool(database_url: &str) -> Result<PgPool, LedgerError> {
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Validate a schema name and return it quoted for interpolation.
pub fn quote_schema(schema: &str) -> Result<String, LedgerError> {
    let valid = !schema.is_empty()
        && schema.len() <= 63
        && schema
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && schema
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("\"{}\"", schema))
    } else {
        Err(LedgerError::InvalidSchema(schema.to_string()))
    }
}
