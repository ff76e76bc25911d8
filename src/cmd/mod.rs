//! CLI command implementations.
//!
//! | Module      | Commands handled            |
//! |-------------|-----------------------------|
//! | `deploy`    | `Deploy`, `Ssl`, `Status`   |
//! | `migrate`   | `Migrate`                   |
//! | `functions` | `Functions`                 |
//! | `invoke`    | `Invoke`                    |
//! | `config`    | `Config`                    |

pub mod config;
pub mod deploy;
pub mod functions;
pub mod invoke;
pub mod migrate;

pub use config::cmd_config;
pub use deploy::{cmd_deploy, cmd_ssl, cmd_status};
pub use functions::{FunctionsOptions, cmd_functions};
pub use invoke::cmd_invoke;
pub use migrate::cmd_migrate;

use anyhow::{Context, Result};
use serde::Serialize;
use shipyard::config::ShipyardConfig;
use shipyard::errors::{LedgerError, PipelineError};
use shipyard::ledger::{SchemaCapabilities, Target, TargetRepo, create_pool};
use shipyard::report::{LogLevel, Outcome};

/// Print an outcome as its log or as JSON. Returns its success flag.
pub fn print_outcome<T: Serialize>(outcome: &Outcome<T>, json: bool) -> Result<bool> {
    if json {
        let rendered =
            serde_json::to_string_pretty(outcome).context("Failed to render outcome as JSON")?;
        println!("{}", rendered);
        return Ok(outcome.success);
    }

    for event in outcome.log.events() {
        let line = event.render();
        match event.level {
            LogLevel::Info => println!("{}", line),
            LogLevel::Success => println!("{}", console::style(line).green()),
            LogLevel::Warn => println!("{}", console::style(line).yellow()),
            LogLevel::Error => println!("{}", console::style(line).red()),
        }
    }
    if let Some(error) = &outcome.error {
        println!();
        println!("{} {}", console::style("Error:").red().bold(), error);
    }
    Ok(outcome.success)
}

/// Load a target from the ledger, probing the schema once.
pub async fn load_target(config: &ShipyardConfig, name: &str) -> Result<Target, PipelineError> {
    let url = config
        .database
        .url
        .as_deref()
        .ok_or(LedgerError::NotConfigured)?;
    let pool = create_pool(url).await?;
    let caps = SchemaCapabilities::probe(&pool, &config.database.schema).await?;

    let target = TargetRepo::find_by_name(
        &pool,
        &config.database.schema,
        &caps,
        name,
        &config.ssh.default_user,
    )
    .await?;
    pool.close().await;

    target.ok_or_else(|| PipelineError::TargetNotFound {
        name: name.to_string(),
    })
}
