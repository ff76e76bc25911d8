//! Per-domain nginx site configuration and certificate issuance.
//!
//! Each domain owns exactly one site file, keyed by `site_key(domain)`.
//! Activation overwrites that file and its link, so repeating it never adds a
//! second entry for the same domain.

pub mod cert;

use crate::config::ProxyConfig;
use crate::errors::PipelineError;
use crate::remote::{RemoteShell, run_checked, shell_quote};
use serde::Serialize;
use std::time::Duration;

pub use cert::{
    CertificateOutcome, contact_email, ensure_certbot, issue_certificate, log_certificate_outcome,
};

/// Asset extensions served with long-lived cache headers.
const STATIC_ASSET_EXTENSIONS: &str = "css|js|jpg|jpeg|gif|png|ico|svg|woff|woff2|ttf|eot";

/// Where a site's traffic goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SiteBackend {
    /// Serve built files from `root`.
    Static { root: String },
    /// Reverse proxy to a process listening on localhost.
    Upstream { port: u16 },
}

/// Filesystem-safe name for a domain's site file.
pub fn site_key(domain: &str) -> String {
    domain.replace(['.', '*'], "_")
}

/// Reject domains that would break out of the config file or a shell word.
pub fn validate_domain(domain: &str) -> Result<(), PipelineError> {
    let valid = !domain.is_empty()
        && domain.len() <= 253
        && !domain.starts_with(['.', '-'])
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '*' | '_'));
    if valid {
        Ok(())
    } else {
        Err(PipelineError::Other(anyhow::anyhow!(
            "Invalid domain '{}'",
            domain
        )))
    }
}

/// nginx paths on the host.
#[derive(Debug, Clone)]
pub struct ProxyLayout {
    pub sites_available: String,
    pub sites_enabled: String,
    pub log_dir: String,
}

impl From<&ProxyConfig> for ProxyLayout {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            sites_available: config.sites_available.trim_end_matches('/').to_string(),
            sites_enabled: config.sites_enabled.trim_end_matches('/').to_string(),
            log_dir: config.log_dir.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for ProxyLayout {
    fn default() -> Self {
        Self::from(&ProxyConfig::default())
    }
}

impl ProxyLayout {
    pub fn available_path(&self, domain: &str) -> String {
        format!("{}/{}", self.sites_available, site_key(domain))
    }

    pub fn enabled_path(&self, domain: &str) -> String {
        format!("{}/{}", self.sites_enabled, site_key(domain))
    }

    pub fn access_log(&self, domain: &str) -> String {
        format!("{}/{}_access.log", self.log_dir, site_key(domain))
    }

    pub fn error_log(&self, domain: &str) -> String {
        format!("{}/{}_error.log", self.log_dir, site_key(domain))
    }
}

pub fn render_site_config(domain: &str, backend: &SiteBackend, layout: &ProxyLayout) -> String {
    let mut out = String::new();
    out.push_str("server {\n");
    out.push_str("    listen 80;\n");
    out.push_str(&format!("    server_name {};\n", domain));

    match backend {
        SiteBackend::Static { root } => {
            out.push_str(&format!("    root {};\n", root));
            out.push_str("    index index.html;\n\n");
            out.push_str(&format!("    access_log {};\n", layout.access_log(domain)));
            out.push_str(&format!("    error_log {};\n\n", layout.error_log(domain)));
            out.push_str("    location / {\n");
            out.push_str("        try_files $uri $uri/ /index.html =404;\n");
            out.push_str("    }\n\n");
            out.push_str(&format!(
                "    location ~* \\.(?:{})$ {{\n",
                STATIC_ASSET_EXTENSIONS
            ));
            out.push_str("        expires 1y;\n");
            out.push_str("        access_log off;\n");
            out.push_str("        add_header Cache-Control \"public, immutable\";\n");
            out.push_str("    }\n");
        }
        SiteBackend::Upstream { port } => {
            out.push('\n');
            out.push_str(&format!("    access_log {};\n", layout.access_log(domain)));
            out.push_str(&format!("    error_log {};\n\n", layout.error_log(domain)));
            out.push_str("    location / {\n");
            out.push_str(&format!("        proxy_pass http://localhost:{};\n", port));
            out.push_str("        proxy_http_version 1.1;\n");
            out.push_str("        proxy_set_header Upgrade $http_upgrade;\n");
            out.push_str("        proxy_set_header Connection 'upgrade';\n");
            out.push_str("        proxy_set_header Host $host;\n");
            out.push_str("        proxy_set_header X-Real-IP $remote_addr;\n");
            out.push_str("        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n");
            out.push_str("        proxy_cache_bypass $http_upgrade;\n");
            out.push_str("    }\n\n");
            out.push_str(&format!(
                "    location ~* \\.(?:{})$ {{\n",
                STATIC_ASSET_EXTENSIONS
            ));
            out.push_str(&format!("        proxy_pass http://localhost:{};\n", port));
            out.push_str("        expires 1y;\n");
            out.push_str("        access_log off;\n");
            out.push_str("        add_header Cache-Control \"public, immutable\";\n");
            out.push_str("    }\n");
        }
    }

    out.push_str("}\n");
    out
}

/// Result of activating a site file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActivationOutcome {
    /// Syntax check passed and the running proxy picked up the change.
    Reloaded,
    /// Syntax check passed but the reload command failed.
    ReloadFailed { detail: String },
    /// Syntax check failed; the file is written and linked but not loaded.
    ValidationFailed { detail: String },
}

impl ActivationOutcome {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::ValidationFailed { .. })
    }
}

/// Write, link, validate and reload. Only write and link failures are errors.
pub async fn activate(
    shell: &dyn RemoteShell,
    layout: &ProxyLayout,
    domain: &str,
    config_text: &str,
    timeout: Duration,
) -> Result<ActivationOutcome, PipelineError> {
    let available = layout.available_path(domain);
    let enabled = layout.enabled_path(domain);
    let staging = format!("/tmp/shipyard_site_{}", site_key(domain));

    shell.upload_text(&staging, config_text).await?;
    run_checked(
        shell,
        &format!(
            "sudo install -m 644 {} {} && rm -f {}",
            shell_quote(&staging),
            shell_quote(&available),
            shell_quote(&staging)
        ),
        timeout,
    )
    .await?;
    run_checked(
        shell,
        &format!(
            "sudo ln -sf {} {}",
            shell_quote(&available),
            shell_quote(&enabled)
        ),
        timeout,
    )
    .await?;

    let check = shell.run("sudo nginx -t", timeout).await?;
    if !check.success() {
        return Ok(ActivationOutcome::ValidationFailed {
            detail: check.diagnostic().to_string(),
        });
    }

    let reload = shell.run("sudo systemctl reload nginx", timeout).await?;
    if reload.success() {
        Ok(ActivationOutcome::Reloaded)
    } else {
        Ok(ActivationOutcome::ReloadFailed {
            detail: reload.diagnostic().to_string(),
        })
    }
}

/// Active site names on the host, excluding `default`.
pub async fn list_active_sites(
    shell: &dyn RemoteShell,
    layout: &ProxyLayout,
    timeout: Duration,
) -> Result<Vec<String>, PipelineError> {
    let output = shell
        .run(
            &format!("ls -1 {} 2>/dev/null", shell_quote(&layout.sites_enabled)),
            timeout,
        )
        .await?;
    Ok(output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "default")
        .map(String::from)
        .collect())
}
