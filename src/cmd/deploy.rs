//! Host provisioning commands: `shipyard deploy`, `ssl` and `status`.

use anyhow::Result;
use shipyard::config::ShipyardConfig;
use shipyard::provision::{Action, ProvisionSettings, ProvisionSummary, Provisioner, StatusReport};
use shipyard::remote::SshConnector;
use shipyard::report::{Outcome, RunLog};

use super::{load_target, print_outcome};

/// Load `target_name` and run `action` against it.
pub async fn execute_provision(
    config: &ShipyardConfig,
    target_name: &str,
    action: Action,
    upstream_port: Option<u16>,
) -> Outcome<ProvisionSummary> {
    let target = match load_target(config, target_name).await {
        Ok(target) => target,
        Err(e) => return Outcome::failed(RunLog::new(), e, None),
    };
    let connector = SshConnector::new(config.ssh.ssh_bin.clone());
    Provisioner::new(&connector, ProvisionSettings::from(config))
        .run(&target, action, upstream_port)
        .await
}

pub async fn execute_status(config: &ShipyardConfig, target_name: &str) -> Outcome<StatusReport> {
    let target = match load_target(config, target_name).await {
        Ok(target) => target,
        Err(e) => return Outcome::failed(RunLog::new(), e, None),
    };
    let connector = SshConnector::new(config.ssh.ssh_bin.clone());
    Provisioner::new(&connector, ProvisionSettings::from(config))
        .status(&target)
        .await
}

pub async fn cmd_deploy(
    config: &ShipyardConfig,
    target: &str,
    upstream_port: Option<u16>,
    json: bool,
) -> Result<bool> {
    let outcome = execute_provision(config, target, Action::Deploy, upstream_port).await;
    print_outcome(&outcome, json)
}

pub async fn cmd_ssl(config: &ShipyardConfig, target: &str, json: bool) -> Result<bool> {
    let outcome = execute_provision(config, target, Action::SetupSsl, None).await;
    print_outcome(&outcome, json)
}

pub async fn cmd_status(config: &ShipyardConfig, target: &str, json: bool) -> Result<bool> {
    let outcome = execute_status(config, target).await;
    print_outcome(&outcome, json)
}
