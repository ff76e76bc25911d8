//! Single-project provisioning pipeline.
//!
//! A deploy walks `Connected → ToolingVerified → Cloned → BuildLaunched →
//! ProxyConfigured → CertAttempted → Done`. Every step runs only after the
//! previous one's exit status is known, a failed step aborts the rest, and the
//! session is closed on every path. `setup_ssl` jumps from `Connected`
//! straight to the certificate step.

pub mod build;
pub mod status;

use crate::config::ShipyardConfig;
use crate::errors::{ChannelError, PipelineError};
use crate::github::{clone_url, normalize_repository, redact};
use crate::ledger::Target;
use crate::proxy::{
    self, ActivationOutcome, CertificateOutcome, ProxyLayout, contact_email, ensure_certbot,
    issue_certificate, log_certificate_outcome, render_site_config, validate_domain,
};
use crate::remote::{Connector, RemoteShell, run_checked, shell_quote};
use crate::report::{Outcome, RunLog};
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;

pub use build::BuildPlan;
pub use status::{StatusReport, probe_status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionState {
    Connected,
    ToolingVerified,
    Cloned,
    BuildLaunched,
    ProxyConfigured,
    CertAttempted,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Deploy,
    SetupSsl,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "deploy" => Ok(Self::Deploy),
            "setup_ssl" | "setup-ssl" | "ssl" => Ok(Self::SetupSsl),
            other => Err(format!(
                "Unknown action '{}'. Valid actions: deploy, setup_ssl",
                other
            )),
        }
    }
}

/// Timeouts, paths and credentials for one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub install_timeout: Duration,
    pub certificate_timeout: Duration,
    pub web_root: String,
    pub layout: ProxyLayout,
    pub github_token: Option<String>,
}

impl From<&ShipyardConfig> for ProvisionSettings {
    fn from(config: &ShipyardConfig) -> Self {
        Self {
            connect_timeout: config.ssh.connect_timeout(),
            command_timeout: config.ssh.command_timeout(),
            install_timeout: config.ssh.install_timeout(),
            certificate_timeout: Duration::from_secs(config.certificate.timeout_secs),
            web_root: config.proxy.web_root.clone(),
            layout: ProxyLayout::from(&config.proxy),
            github_token: config.github.token.clone(),
        }
    }
}

/// What a provisioning run reached and produced.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionSummary {
    pub action: Action,
    pub domain: String,
    /// Last state reached; `None` when the run stopped before connecting.
    pub state: Option<ProvisionState>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ActivationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub active_sites: Vec<String>,
}

impl ProvisionSummary {
    fn new(action: Action, domain: &str) -> Self {
        Self {
            action,
            domain: domain.to_string(),
            state: None,
            url: format!("http://{}", domain),
            ip_url: None,
            build_log: None,
            proxy: None,
            certificate: None,
            active_sites: Vec::new(),
        }
    }
}

pub struct Provisioner<'a> {
    connector: &'a dyn Connector,
    settings: ProvisionSettings,
}

impl<'a> Provisioner<'a> {
    pub fn new(connector: &'a dyn Connector, settings: ProvisionSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    /// Run `action` against `target`. Errors are reported inside the outcome.
    pub async fn run(
        &self,
        target: &Target,
        action: Action,
        upstream_port: Option<u16>,
    ) -> Outcome<ProvisionSummary> {
        let mut log = RunLog::new();
        let mut summary = ProvisionSummary::new(action, &target.domain);
        let token = self.settings.github_token.as_deref();

        match self
            .run_inner(target, action, upstream_port, &mut summary, &mut log)
            .await
        {
            Ok(()) => Outcome::ok(log, summary),
            Err(e) => {
                tracing::warn!(name = %target.name, error = %redact(&e.to_string(), token), "Provisioning failed");
                Outcome::failed(log, redact(&e.to_string(), token), Some(summary))
            }
        }
    }

    async fn run_inner(
        &self,
        target: &Target,
        action: Action,
        upstream_port: Option<u16>,
        summary: &mut ProvisionSummary,
        log: &mut RunLog,
    ) -> Result<(), PipelineError> {
        match action {
            Action::Deploy => log.info(format!("Deploy: {}", target.domain)),
            Action::SetupSsl => log.info(format!("SSL setup: {}", target.domain)),
        }

        // Everything that can fail without touching the host fails here.
        let host = target.require_host()?;
        validate_domain(&target.domain)?;
        let repository = match action {
            Action::Deploy => {
                log.info(format!("Repository: {}", target.repository));
                Some(normalize_repository(&target.repository).ok_or_else(|| {
                    PipelineError::Other(anyhow::anyhow!(
                        "Cannot parse repository reference '{}'",
                        target.repository
                    ))
                })?)
            }
            Action::SetupSsl => None,
        };

        log.info(format!("Host: {}", host.address));
        log.info(format!("User: {}", host.user));
        log.blank();
        log.info("Connecting over SSH...");

        let shell = self
            .connector
            .open(host, self.settings.connect_timeout)
            .await?;
        summary.state = Some(ProvisionState::Connected);
        summary.ip_url = Some(format!("http://{}", host.address));
        log.success("SSH connection established");
        log.blank();

        let result = match (action, repository) {
            (Action::Deploy, Some(repository)) => {
                self.deploy_steps(
                    shell.as_ref(),
                    target,
                    &repository,
                    upstream_port,
                    summary,
                    log,
                )
                .await
            }
            _ => self.ssl_steps(shell.as_ref(), target, summary, log).await,
        };

        if let Err(e) = shell.close().await {
            tracing::warn!(error = %e, "Failed to close session");
        }
        result
    }

    /// Collect read-only diagnostics for a deployed target.
    pub async fn status(&self, target: &Target) -> Outcome<StatusReport> {
        let mut log = RunLog::new();
        log.info(format!("Status: {}", target.domain));

        let host = match target.require_host() {
            Ok(host) => host,
            Err(e) => return Outcome::failed(log, e, None),
        };
        if let Err(e) = validate_domain(&target.domain) {
            return Outcome::failed(log, e, None);
        }
        let shell = match self
            .connector
            .open(host, self.settings.connect_timeout)
            .await
        {
            Ok(shell) => shell,
            Err(e) => return Outcome::failed(log, PipelineError::from(e), None),
        };

        let s = &self.settings;
        let result = probe_status(
            shell.as_ref(),
            &target.domain,
            &s.web_root,
            &s.layout,
            s.command_timeout,
        )
        .await;
        if let Err(e) = shell.close().await {
            tracing::warn!(error = %e, "Failed to close session");
        }

        match result {
            Ok(report) => {
                for section in &report.sections {
                    log.info(format!("== {} ==", section.title));
                    for line in section.output.lines() {
                        log.info(format!("   {}", line));
                    }
                }
                Outcome::ok(log, report)
            }
            Err(e) => Outcome::failed(log, e, None),
        }
    }

    async fn deploy_steps(
        &self,
        shell: &dyn RemoteShell,
        target: &Target,
        repository: &str,
        upstream_port: Option<u16>,
        summary: &mut ProvisionSummary,
        log: &mut RunLog,
    ) -> Result<(), PipelineError> {
        let s = &self.settings;
        let domain = target.domain.as_str();
        let user = target
            .host
            .as_ref()
            .map(|h| h.user.as_str())
            .unwrap_or("ubuntu");
        let plan = BuildPlan::new(&s.web_root, domain, upstream_port);

        // ToolingVerified
        self.ensure_git(shell, log).await?;
        summary.state = Some(ProvisionState::ToolingVerified);
        log.blank();

        // Cloned: always a full replace
        log.info("Cloning repository...");
        log.info(format!("   Repository: {}", repository));
        let project = shell_quote(&plan.project_dir);
        let owner = shell_quote(&format!("{}:{}", user, user));
        let url = clone_url(repository, s.github_token.as_deref());
        for (command, limit) in [
            (format!("sudo rm -rf {}", project), s.command_timeout),
            (format!("sudo mkdir -p {}", project), s.command_timeout),
            (format!("sudo chown -R {} {}", owner, project), s.command_timeout),
            (
                format!("git clone {} {}", shell_quote(&url), project),
                s.install_timeout,
            ),
        ] {
            if let Err(e) = run_checked(shell, &command, limit).await {
                log.error(format!(
                    "Failed: {}",
                    redact(&command, s.github_token.as_deref())
                ));
                return Err(e);
            }
        }
        summary.state = Some(ProvisionState::Cloned);
        log.success("Repository cloned");
        log.blank();

        // BuildLaunched: detached, not awaited
        shell
            .upload_text(&plan.script_path, &plan.render_script())
            .await?;
        run_checked(
            shell,
            &format!("chmod +x {}", shell_quote(&plan.script_path)),
            s.command_timeout,
        )
        .await?;
        log.info("Starting npm install + build in the background...");
        shell
            .run_background(&format!("bash {}", shell_quote(&plan.script_path)))
            .await?;
        summary.state = Some(ProvisionState::BuildLaunched);
        summary.build_log = Some(plan.log_path.clone());
        log.success("Build launched");
        log.info(format!("Build log: tail -f {}", plan.log_path));
        log.blank();

        // ProxyConfigured: validation failure is reported, not raised
        log.info("Configuring nginx for the domain...");
        let config_text = render_site_config(domain, &plan.backend, &s.layout);
        let activation =
            proxy::activate(shell, &s.layout, domain, &config_text, s.command_timeout).await?;
        match &activation {
            ActivationOutcome::Reloaded => {
                log.success(format!("nginx configured for {}", domain));
                log.info(format!("   Config: {}", s.layout.available_path(domain)));
            }
            ActivationOutcome::ReloadFailed { detail } => {
                log.warn(format!("nginx config written but reload failed: {}", detail));
            }
            ActivationOutcome::ValidationFailed { detail } => {
                log.error(format!("nginx config invalid: {}", detail));
                log.warn("Continuing without reloading nginx");
            }
        }
        summary.proxy = Some(activation);
        summary.state = Some(ProvisionState::ProxyConfigured);
        log.blank();

        // CertAttempted: best effort
        let certificate = self.attempt_certificate(shell, domain, log).await?;
        if certificate.is_issued() {
            summary.url = format!("https://{}", domain);
        }
        summary.certificate = Some(certificate);
        summary.state = Some(ProvisionState::CertAttempted);
        log.blank();

        match proxy::list_active_sites(shell, &s.layout, s.command_timeout).await {
            Ok(sites) => {
                log.info(format!("Active sites on this host: {}", sites.len()));
                for site in &sites {
                    log.info(format!("   {}", site));
                }
                summary.active_sites = sites;
            }
            Err(e) => log.warn(format!("Could not list active sites: {}", e)),
        }
        log.blank();

        summary.state = Some(ProvisionState::Done);
        let address = target
            .host
            .as_ref()
            .map(|h| h.address.as_str())
            .unwrap_or_default();
        log.success("Deploy started");
        log.info("The build takes a few minutes in the background");
        log.blank();
        log.info("DNS records for the domain:");
        log.info(format!("   A  {}  ->  {}", domain, address));
        log.info(format!("   A  www.{}  ->  {}", domain, address));
        log.info("Once DNS propagates, re-run SSL setup to enable HTTPS");
        log.blank();
        log.info(format!("Site: {}", summary.url));
        log.info(format!("By IP: http://{}", address));
        log.info(format!("Build log: {}", plan.log_path));
        Ok(())
    }

    async fn ssl_steps(
        &self,
        shell: &dyn RemoteShell,
        target: &Target,
        summary: &mut ProvisionSummary,
        log: &mut RunLog,
    ) -> Result<(), PipelineError> {
        log.info("Mode: SSL only");
        let certificate = self.attempt_certificate(shell, &target.domain, log).await?;
        if certificate.is_issued() {
            summary.url = format!("https://{}", target.domain);
        }
        if let CertificateOutcome::Deferred { .. } = certificate {
            if let Some(host) = &target.host {
                log.info(format!(
                    "Add a DNS A record: {} -> {}",
                    target.domain, host.address
                ));
            }
        }
        summary.certificate = Some(certificate);
        summary.state = Some(ProvisionState::Done);
        Ok(())
    }

    async fn ensure_git(&self, shell: &dyn RemoteShell, log: &mut RunLog) -> Result<(), PipelineError> {
        let s = &self.settings;
        log.info("Checking git...");
        let probe = shell.run("which git", s.command_timeout).await?;
        let path = probe.stdout.trim();
        if probe.success() && !path.is_empty() {
            log.success(format!("git found: {}", path));
            return Ok(());
        }

        log.info("Installing git...");
        let install = shell
            .run(
                "sudo apt-get update && sudo apt-get install -y git",
                s.install_timeout,
            )
            .await;
        match install {
            Ok(output) if output.success() => {
                log.success("git installed");
                Ok(())
            }
            Ok(output) => Err(PipelineError::Tooling {
                tool: "git".into(),
                stderr: output.diagnostic().to_string(),
            }),
            Err(ChannelError::Timeout { secs, .. }) => Err(PipelineError::Tooling {
                tool: "git".into(),
                stderr: format!("install timed out after {}s", secs),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn attempt_certificate(
        &self,
        shell: &dyn RemoteShell,
        domain: &str,
        log: &mut RunLog,
    ) -> Result<CertificateOutcome, PipelineError> {
        let s = &self.settings;
        log.info("Requesting SSL certificate (requires DNS)...");
        let available = ensure_certbot(shell, s.command_timeout, s.install_timeout, log).await?;
        let outcome = if available {
            issue_certificate(shell, domain, &contact_email(domain), s.certificate_timeout).await?
        } else {
            CertificateOutcome::Failed {
                tail: vec!["certbot is not available on the host".to_string()],
            }
        };
        log_certificate_outcome(&outcome, domain, log);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::HostDescriptor;
    use crate::remote::testing::{ScriptedConnector, ScriptedShell};

    fn settings() -> ProvisionSettings {
        ProvisionSettings {
            connect_timeout: Duration::from_secs(1),
            command_timeout: Duration::from_secs(1),
            install_timeout: Duration::from_secs(2),
            certificate_timeout: Duration::from_secs(2),
            web_root: "/var/www".into(),
            layout: ProxyLayout::default(),
            github_token: Some("ghp_secret".into()),
        }
    }

    fn target() -> Target {
        Target {
            id: "1".into(),
            name: "landing".into(),
            domain: "a.dev".into(),
            repository: "https://github.com/acme/site.git".into(),
            host: Some(HostDescriptor {
                address: "10.0.0.5".into(),
                user: "ubuntu".into(),
                private_key: "key".into(),
            }),
            vm_name: Some("web-1".into()),
            database_url: None,
        }
    }

    fn healthy_shell() -> ScriptedShell {
        ScriptedShell::new()
            .on("which git", 0, "/usr/bin/git\n", "")
            .on("which certbot", 0, "/usr/bin/certbot\n", "")
            .on("certbot --nginx", 0, "Successfully received certificate.", "")
            .on("ls -1", 0, "default\na_dev\n", "")
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("deploy".parse::<Action>().unwrap(), Action::Deploy);
        assert_eq!("setup_ssl".parse::<Action>().unwrap(), Action::SetupSsl);
        assert_eq!("setup-ssl".parse::<Action>().unwrap(), Action::SetupSsl);
        assert!("rollback".parse::<Action>().is_err());
    }

    #[tokio::test]
    async fn test_full_deploy_runs_steps_in_order() {
        let shell = healthy_shell();
        let connector = ScriptedConnector::new(shell.clone());
        let provisioner = Provisioner::new(&connector, settings());

        let outcome = provisioner.run(&target(), Action::Deploy, None).await;

        assert!(outcome.success, "{:?}", outcome.error);
        let summary = outcome.details.as_ref().unwrap();
        assert_eq!(summary.state, Some(ProvisionState::Done));
        assert_eq!(summary.url, "https://a.dev");
        assert_eq!(summary.proxy, Some(ActivationOutcome::Reloaded));
        assert_eq!(summary.active_sites, vec!["a_dev"]);
        assert_eq!(summary.build_log.as_deref(), Some("/tmp/deploy_a.dev.log"));

        let commands = shell.commands();
        let position = |needle: &str| {
            commands
                .iter()
                .position(|c| c.contains(needle))
                .unwrap_or_else(|| panic!("{needle} not run"))
        };
        assert!(position("which git") < position("rm -rf /var/www/a.dev"));
        assert!(position("rm -rf") < position("mkdir -p /var/www/a.dev"));
        assert!(position("mkdir -p") < position("chown -R ubuntu:ubuntu"));
        assert!(position("chown -R") < position("git clone"));
        assert!(position("git clone") < position("bash /tmp/deploy_a_dev.sh"));
        assert!(position("bash /tmp/deploy_a_dev.sh") < position("nginx -t"));
        assert!(position("nginx -t") < position("certbot --nginx"));
        assert!(shell.ran("git clone https://ghp_secret@github.com/acme/site.git /var/www/a.dev"));
        assert!(shell.calls().contains(&crate::remote::testing::Call::Background(
            "bash /tmp/deploy_a_dev.sh".into()
        )));
        assert_eq!(shell.close_count(), 1);
    }

    #[tokio::test]
    async fn test_unbound_target_fails_before_connecting() {
        let connector = ScriptedConnector::new(ScriptedShell::new());
        let provisioner = Provisioner::new(&connector, settings());
        let mut t = target();
        t.host = None;

        let outcome = provisioner.run(&t, Action::Deploy, None).await;

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("not bound"));
        assert_eq!(connector.open_count(), 0);
        assert!(connector.shell.commands().is_empty());
        assert_eq!(outcome.details.unwrap().state, None);
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_connecting() {
        let connector = ScriptedConnector::new(ScriptedShell::new());
        let provisioner = Provisioner::new(&connector, settings());
        let mut t = target();
        t.host.as_mut().unwrap().private_key = String::new();

        let outcome = provisioner.run(&t, Action::Deploy, None).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("SSH key missing"));
        assert_eq!(connector.open_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_is_connectivity_error() {
        let connector = ScriptedConnector::failing(ChannelError::KeyParse("missing PEM header".into()));
        let provisioner = Provisioner::new(&connector, settings());

        let outcome = provisioner.run(&target(), Action::Deploy, None).await;
        assert!(!outcome.success);
        let error = outcome.error.as_deref().unwrap();
        assert!(error.contains("SSH connection failed"));
        assert!(error.contains("Invalid SSH private key"));
    }

    #[tokio::test]
    async fn test_failed_clone_aborts_and_redacts_token() {
        let shell = healthy_shell().on("git clone", 128, "", "fatal: Authentication failed");
        let connector = ScriptedConnector::new(shell.clone());
        let provisioner = Provisioner::new(&connector, settings());

        let outcome = provisioner.run(&target(), Action::Deploy, None).await;

        assert!(!outcome.success);
        let error = outcome.error.as_deref().unwrap();
        assert!(error.contains("Authentication failed"));
        assert!(!error.contains("ghp_secret"));
        assert!(outcome.logs.iter().all(|l| !l.contains("ghp_secret")));
        assert_eq!(outcome.details.unwrap().state, Some(ProvisionState::ToolingVerified));
        assert!(!shell.ran("nginx"));
        assert_eq!(shell.close_count(), 1);
    }

    #[tokio::test]
    async fn test_git_install_failure_is_tooling_error() {
        let shell = ScriptedShell::new()
            .on("which git", 1, "", "")
            .on("apt-get install -y git", 100, "", "E: dpkg was interrupted");
        let connector = ScriptedConnector::new(shell.clone());
        let provisioner = Provisioner::new(&connector, settings());

        let outcome = provisioner.run(&target(), Action::Deploy, None).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("git"));
        assert!(!shell.ran("rm -rf"));
        assert_eq!(shell.close_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_proxy_config_does_not_abort() {
        let shell = healthy_shell().on("nginx -t", 1, "", "nginx: [emerg] invalid");
        let connector = ScriptedConnector::new(shell.clone());
        let provisioner = Provisioner::new(&connector, settings());

        let outcome = provisioner.run(&target(), Action::Deploy, None).await;
        assert!(outcome.success);
        let summary = outcome.details.as_ref().unwrap();
        assert!(matches!(summary.proxy, Some(ActivationOutcome::ValidationFailed { .. })));
        assert_eq!(summary.state, Some(ProvisionState::Done));
        assert!(!shell.ran("systemctl reload"));
        assert!(shell.ran("certbot --nginx"));
    }

    #[tokio::test]
    async fn test_certificate_before_dns_is_deferred_but_run_succeeds() {
        let shell = ScriptedShell::new()
            .on("which git", 0, "/usr/bin/git", "")
            .on("which certbot", 0, "/usr/bin/certbot", "")
            .on(
                "certbot --nginx",
                1,
                "Detail: DNS problem: NXDOMAIN looking up A for a.dev",
                "",
            );
        let connector = ScriptedConnector::new(shell);
        let provisioner = Provisioner::new(&connector, settings());

        let outcome = provisioner.run(&target(), Action::Deploy, None).await;
        assert!(outcome.success);
        let summary = outcome.details.as_ref().unwrap();
        assert!(matches!(
            summary.certificate,
            Some(CertificateOutcome::Deferred { .. })
        ));
        assert_eq!(summary.url, "http://a.dev");
        assert!(outcome.log.contains("Configure DNS"));
        assert!(outcome.log.contains("www.a.dev"));
    }

    #[tokio::test]
    async fn test_setup_ssl_skips_deploy_steps() {
        let shell = ScriptedShell::new()
            .on("which certbot", 0, "", "")
            .on("certbot --nginx", 0, "Certificate not yet due for renewal", "");
        let connector = ScriptedConnector::new(shell.clone());
        let provisioner = Provisioner::new(&connector, settings());

        let outcome = provisioner.run(&target(), Action::SetupSsl, None).await;

        assert!(outcome.success);
        assert!(shell.ran("apt-get install -y certbot python3-certbot-nginx"));
        assert!(!shell.ran("git"));
        assert!(!shell.ran("nginx -t"));
        assert!(shell.uploads().is_empty());
        let summary = outcome.details.unwrap();
        assert!(summary.certificate.unwrap().is_issued());
        assert_eq!(summary.url, "https://a.dev");
    }

    #[tokio::test]
    async fn test_setup_ssl_deferred_keeps_plain_url() {
        let shell = ScriptedShell::new()
            .on("which certbot", 0, "/usr/bin/certbot", "")
            .on(
                "certbot --nginx",
                1,
                "Detail: DNS problem: NXDOMAIN looking up A for a.dev",
                "",
            );
        let connector = ScriptedConnector::new(shell);
        let provisioner = Provisioner::new(&connector, settings());

        let outcome = provisioner.run(&target(), Action::SetupSsl, None).await;

        assert!(outcome.success);
        assert!(outcome.log.contains("Add a DNS A record: a.dev -> 10.0.0.5"));
        let summary = outcome.details.unwrap();
        assert!(matches!(
            summary.certificate,
            Some(CertificateOutcome::Deferred { .. })
        ));
        assert_eq!(summary.url, "http://a.dev");
    }

    #[tokio::test]
    async fn test_build_script_upload_failure_aborts_before_proxy() {
        let shell = healthy_shell().failing_uploads();
        let connector = ScriptedConnector::new(shell.clone());
        let provisioner = Provisioner::new(&connector, settings());

        let outcome = provisioner.run(&target(), Action::Deploy, None).await;

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("/tmp/deploy_a_dev.sh"));
        assert_eq!(outcome.details.unwrap().state, Some(ProvisionState::Cloned));
        assert!(!shell.ran("bash /tmp/deploy_a_dev.sh"));
        assert!(!shell.ran("nginx -t"));
        assert_eq!(shell.close_count(), 1);
    }

    #[tokio::test]
    async fn test_upstream_port_renders_reverse_proxy() {
        let shell = healthy_shell();
        let connector = ScriptedConnector::new(shell.clone());
        let provisioner = Provisioner::new(&connector, settings());

        let outcome = provisioner.run(&target(), Action::Deploy, Some(4173)).await;
        assert!(outcome.success);
        let (_, site) = shell
            .uploads()
            .into_iter()
            .find(|(path, _)| path.starts_with("/tmp/shipyard_site_"))
            .unwrap();
        assert!(site.contains("proxy_pass http://localhost:4173;"));
    }

    #[tokio::test]
    async fn test_status_closes_session_and_reports_sections() {
        let shell = ScriptedShell::new().on("tail -20 /tmp/deploy_a.dev.log", 0, "Deploy finished\n", "");
        let connector = ScriptedConnector::new(shell.clone());
        let provisioner = Provisioner::new(&connector, settings());

        let outcome = provisioner.status(&target()).await;
        assert!(outcome.success);
        assert!(outcome.log.contains("== Build log =="));
        assert!(outcome.log.contains("Deploy finished"));
        assert_eq!(shell.close_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_domain_fails_fast() {
        let connector = ScriptedConnector::new(ScriptedShell::new());
        let provisioner = Provisioner::new(&connector, settings());
        let mut t = target();
        t.domain = "a.dev; reboot".into();

        let outcome = provisioner.run(&t, Action::Deploy, None).await;
        assert!(!outcome.success);
        assert_eq!(connector.open_count(), 0);
    }
}
