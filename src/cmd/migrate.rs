//! `shipyard migrate`: apply db_migrations/*.sql from a repository.

use anyhow::Result;
use shipyard::config::ShipyardConfig;
use shipyard::errors::{LedgerError, MigrationError};
use shipyard::github::{GithubClient, normalize_repository};
use shipyard::ledger::create_pool;
use shipyard::migrate::{GithubMigrationSource, MigrationReport, PgExecutor, run_migrations};
use shipyard::report::{Outcome, RunLog};

use super::{load_target, print_outcome};

/// Where the migrations come from and which database they go to.
#[derive(Debug)]
pub enum MigrationTarget<'a> {
    Repository(&'a str),
    Target(&'a str),
}

pub async fn execute_migrate(
    config: &ShipyardConfig,
    selector: MigrationTarget<'_>,
) -> Outcome<MigrationReport> {
    let mut log = RunLog::new();

    let (raw_repository, database_url) = match selector {
        MigrationTarget::Repository(repo) => (repo.to_string(), config.database.url.clone()),
        MigrationTarget::Target(name) => match load_target(config, name).await {
            Ok(target) => {
                log.info(format!("Target: {}", target.name));
                let url = target.database_url.clone().or_else(|| config.database.url.clone());
                (target.repository, url)
            }
            Err(e) => return Outcome::failed(log, e, None),
        },
    };

    let Some(repository) = normalize_repository(&raw_repository) else {
        return Outcome::failed(
            log,
            format!("Cannot parse repository reference '{}'", raw_repository),
            None,
        );
    };
    let Some(database_url) = database_url else {
        return Outcome::failed(log, LedgerError::NotConfigured, None);
    };

    log.info("Connecting to GitHub...");
    log.info(format!("Repository: {}", repository));
    let client = GithubClient::new(config.github.api_base.clone(), config.github.token.clone());
    let mut source = GithubMigrationSource::new(client, repository);

    let pool = match create_pool(&database_url).await {
        Ok(pool) => pool,
        Err(e) => return Outcome::failed(log, MigrationError::from(e), None),
    };
    let executor = PgExecutor::new(pool.clone());

    let outcome = run_migrations(&mut source, &executor, log).await;
    pool.close().await;
    outcome
}

pub async fn cmd_migrate(
    config: &ShipyardConfig,
    repo: Option<&str>,
    target: Option<&str>,
    json: bool,
) -> Result<bool> {
    let selector = match (repo, target) {
        (Some(repo), _) => MigrationTarget::Repository(repo),
        (None, Some(target)) => MigrationTarget::Target(target),
        (None, None) => anyhow::bail!("Either --repo or --target is required"),
    };
    let outcome = execute_migrate(config, selector).await;
    print_outcome(&outcome, json)
}
