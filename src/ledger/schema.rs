//! One-time probe of optional ledger columns.
//!
//! Older ledgers lack `deploy_configs.database_url`. The probe runs once per
//! process and fixes the row shape for the whole run.

use super::quote_schema;
use crate::errors::LedgerError;
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaCapabilities {
    pub has_database_url: bool,
}

impl SchemaCapabilities {
    pub async fn probe(pool: &PgPool, schema: &str) -> Result<Self, LedgerError> {
        quote_schema(schema)?;
        let columns: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = 'deploy_configs'
               AND column_name = 'database_url'",
        )
        .bind(schema)
        .fetch_all(pool)
        .await?;
        let caps = Self::from_columns(columns.iter().map(String::as_str));
        tracing::debug!(?caps, schema, "Probed ledger schema");
        Ok(caps)
    }

    pub fn from_columns<'a>(columns: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            has_database_url: columns.into_iter().any(|c| c == "database_url"),
        }
    }

    /// Select expression for the optional `database_url` column.
    pub fn database_url_expr(&self) -> &'static str {
        if self.has_database_url {
            "dc.database_url::text AS database_url"
        } else {
            "NULL::text AS database_url"
        }
    }
}
