use crate::errors::ChannelError;
use crate::remote::RemoteShell;
use crate::report::RunLog;
use serde::Serialize;
use std::time::Duration;

/// Lines of certbot output kept for diagnosis.
const TAIL_LINES: usize = 15;

const SUCCESS_MARKERS: &[&str] = &[
    "Successfully received certificate",
    "Certificate not yet due for renewal",
];

const DNS_MARKERS: &[&str] = &["dns", "resolution", "could not resolve"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CertificateOutcome {
    Issued,
    /// DNS does not point at the host yet; retry once it does.
    Deferred { reason: String },
    Failed { tail: Vec<String> },
}

impl CertificateOutcome {
    pub fn is_issued(&self) -> bool {
        matches!(self, Self::Issued)
    }
}

pub fn contact_email(domain: &str) -> String {
    format!("admin@{}", domain)
}

pub fn certbot_command(domain: &str, email: &str) -> String {
    format!(
        "sudo certbot --nginx -d {} --non-interactive --agree-tos --email {} 2>&1",
        domain, email
    )
}

pub fn classify_certbot_output(output: &str) -> CertificateOutcome {
    if SUCCESS_MARKERS.iter().any(|m| output.contains(m)) {
        return CertificateOutcome::Issued;
    }
    let lower = output.to_lowercase();
    if DNS_MARKERS.iter().any(|m| lower.contains(m)) {
        return CertificateOutcome::Deferred {
            reason: "DNS for the domain does not resolve to this host yet".to_string(),
        };
    }
    let lines: Vec<&str> = output.trim().lines().collect();
    let start = lines.len().saturating_sub(TAIL_LINES);
    CertificateOutcome::Failed {
        tail: lines[start..].iter().map(|l| l.to_string()).collect(),
    }
}

/// Install certbot and its nginx plugin if missing. Returns whether certbot is
/// available afterwards; installation problems are logged, never raised.
pub async fn ensure_certbot(
    shell: &dyn RemoteShell,
    probe_timeout: Duration,
    install_timeout: Duration,
    log: &mut RunLog,
) -> Result<bool, ChannelError> {
    let probe = shell
        .run("which certbot 2>/dev/null || echo ''", probe_timeout)
        .await?;
    if !probe.stdout.trim().is_empty() {
        return Ok(true);
    }

    log.info("Installing certbot...");
    let install = shell
        .run(
            "sudo apt-get update && sudo apt-get install -y certbot python3-certbot-nginx",
            install_timeout,
        )
        .await;
    match install {
        Ok(output) if output.success() => {
            log.success("certbot installed");
            Ok(true)
        }
        Ok(output) => {
            log.warn(format!("certbot install failed: {}", output.diagnostic()));
            Ok(false)
        }
        Err(ChannelError::Timeout { secs, .. }) => {
            log.warn(format!("certbot install timed out after {}s", secs));
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Run certbot for `domain`. A timeout is reported as a failed attempt; only
/// loss of the channel itself is an error.
pub async fn issue_certificate(
    shell: &dyn RemoteShell,
    domain: &str,
    contact_email: &str,
    timeout: Duration,
) -> Result<CertificateOutcome, ChannelError> {
    let command = certbot_command(domain, contact_email);
    match shell.run(&command, timeout).await {
        Ok(output) => {
            // certbot writes everything to stdout with 2>&1
            let combined = format!("{}{}", output.stdout, output.stderr);
            Ok(classify_certbot_output(&combined))
        }
        Err(ChannelError::Timeout { secs, .. }) => Ok(CertificateOutcome::Failed {
            tail: vec![format!("certbot did not finish within {}s", secs)],
        }),
        Err(e) => Err(e),
    }
}

/// Append the outcome and, when relevant, the operator's next step.
pub fn log_certificate_outcome(outcome: &CertificateOutcome, domain: &str, log: &mut RunLog) {
    match outcome {
        CertificateOutcome::Issued => {
            log.success(format!("SSL certificate active: https://{}", domain));
        }
        CertificateOutcome::Deferred { reason } => {
            log.warn(format!("SSL deferred: {}", reason));
            log.info("Configure DNS for the domain, then re-run SSL setup");
        }
        CertificateOutcome::Failed { tail } => {
            log.warn("SSL certificate was not issued. certbot output:");
            for line in tail {
                log.info(format!("   {}", line));
            }
        }
    }
}
