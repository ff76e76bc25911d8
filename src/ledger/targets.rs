//! Repository for `deploy_configs` joined with `vm_instances`.

use super::models::{Target, TargetRow};
use super::quote_schema;
use super::schema::SchemaCapabilities;
use crate::errors::LedgerError;
use sqlx::PgPool;

/// Column list for target queries; ids are read as text so both serial and
/// uuid keys decode.
const TARGET_COLUMNS: &str = "dc.id::text AS id, dc.name, dc.domain, dc.github_repo, \
    dc.vm_instance_id::text AS vm_instance_id, vm.ip_address::text AS ip_address, \
    vm.ssh_user, vm.ssh_private_key, vm.name AS vm_name";

pub struct TargetRepo;

impl TargetRepo {
    pub fn select_sql(schema: &str, caps: &SchemaCapabilities) -> Result<String, LedgerError> {
        let schema = quote_schema(schema)?;
        Ok(format!(
            "SELECT {TARGET_COLUMNS}, {db_url}
             FROM {schema}.deploy_configs dc
             LEFT JOIN {schema}.vm_instances vm ON dc.vm_instance_id = vm.id
             WHERE dc.name = $1",
            db_url = caps.database_url_expr(),
        ))
    }

    /// Load a target by configuration name. `Ok(None)` when no row matches.
    pub async fn find_by_name(
        pool: &PgPool,
        schema: &str,
        caps: &SchemaCapabilities,
        name: &str,
        default_user: &str,
    ) -> Result<Option<Target>, LedgerError> {
        let query = Self::select_sql(schema, caps)?;
        let row = sqlx::query_as::<_, TargetRow>(&query)
            .bind(name)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|r| r.into_target(default_user)))
    }
}
