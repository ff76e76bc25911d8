use super::{ExistingObject, SqlExecutor, UnitExecError};
use crate::errors::LedgerError;
use crate::ledger::MigrationLedger;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::BTreeSet;

/// SQLSTATE for `duplicate_table`.
const DUPLICATE_TABLE: &str = "42P07";
/// SQLSTATE for `duplicate_object`.
const DUPLICATE_OBJECT: &str = "42710";

/// Runs migrations against Postgres. Every statement batch is sent on its
/// own, so each unit commits independently.
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn ensure_ledger(&self) -> Result<(), LedgerError> {
        MigrationLedger::ensure(&self.pool).await
    }

    async fn applied_versions(&self) -> Result<BTreeSet<String>, LedgerError> {
        MigrationLedger::applied_versions(&self.pool).await
    }

    async fn execute_unit(&self, sql: &str) -> Result<(), UnitExecError> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn record_version(&self, version: &str) -> Result<(), LedgerError> {
        MigrationLedger::record(&self.pool, version).await
    }
}

fn classify(err: &sqlx::Error) -> UnitExecError {
    let code = match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    };
    classify_code(code.as_deref(), &err.to_string())
}

fn classify_code(code: Option<&str>, message: &str) -> UnitExecError {
    match code {
        Some(DUPLICATE_TABLE) => UnitExecError::AlreadyExists(ExistingObject::Table),
        Some(DUPLICATE_OBJECT) => UnitExecError::AlreadyExists(ExistingObject::Object),
        _ => UnitExecError::Failed(message.to_string()),
    }
}
