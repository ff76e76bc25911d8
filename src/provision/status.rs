//! Read-only diagnostics for a deployed target.
//!
//! The build runs detached, so this probe is how an operator sees whether it
//! finished. Every check falls back to placeholder text instead of failing.

use super::build::build_log_path;
use crate::errors::PipelineError;
use crate::proxy::ProxyLayout;
use crate::remote::{RemoteShell, shell_quote};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSection {
    pub title: String,
    pub command: String,
    pub output: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub domain: String,
    pub sections: Vec<StatusSection>,
}

impl StatusReport {
    pub fn section(&self, title: &str) -> Option<&StatusSection> {
        self.sections.iter().find(|s| s.title == title)
    }
}

/// (title, command) pairs for a domain.
pub fn status_checks(domain: &str, web_root: &str, layout: &ProxyLayout) -> Vec<(String, String)> {
    let project_dir = format!("{}/{}", web_root.trim_end_matches('/'), domain);
    let quoted_project = shell_quote(&project_dir);
    let with_fallback = |command: String, placeholder: &str| {
        format!("{} 2>/dev/null || echo '{}'", command, placeholder)
    };
    vec![
        (
            "Build log".to_string(),
            with_fallback(
                format!("tail -20 {}", shell_quote(&build_log_path(domain))),
                "Build log not found",
            ),
        ),
        (
            "Project directory".to_string(),
            with_fallback(format!("ls -la {}", quoted_project), "Directory not found"),
        ),
        (
            "Build output".to_string(),
            with_fallback(
                format!("ls -la {}", shell_quote(&format!("{}/dist", project_dir))),
                "dist not found",
            ),
        ),
        (
            "Serving root".to_string(),
            with_fallback(
                format!("ls -la {}", shell_quote(&format!("{}/html", project_dir))),
                "html not found",
            ),
        ),
        (
            "Site config".to_string(),
            with_fallback(
                format!("cat {}", shell_quote(&layout.enabled_path(domain))),
                "Site config not found",
            ),
        ),
        (
            "Build processes".to_string(),
            "ps aux | grep npm | grep -v grep || echo 'No npm processes'".to_string(),
        ),
        (
            "Proxy error log".to_string(),
            with_fallback(
                format!("sudo tail -50 {}/error.log", layout.log_dir),
                "Error log not readable",
            ),
        ),
        (
            "Proxy access log".to_string(),
            with_fallback(
                format!("sudo tail -20 {}/access.log", layout.log_dir),
                "Access log not readable",
            ),
        ),
        ("Proxy syntax check".to_string(), "sudo nginx -t 2>&1".to_string()),
    ]
}

/// Run every check in order. Only a broken channel is an error.
pub async fn probe_status(
    shell: &dyn RemoteShell,
    domain: &str,
    web_root: &str,
    layout: &ProxyLayout,
    timeout: Duration,
) -> Result<StatusReport, PipelineError> {
    let mut report = StatusReport {
        domain: domain.to_string(),
        sections: Vec::new(),
    };
    for (title, command) in status_checks(domain, web_root, layout) {
        let output = shell.run(&command, timeout).await?;
        let text = if output.stdout.trim().is_empty() {
            output.stderr.trim().to_string()
        } else {
            output.stdout.trim_end().to_string()
        };
        report.sections.push(StatusSection {
            title,
            command,
            output: text,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::ScriptedShell;

    #[test]
    fn test_checks_have_fallbacks() {
        let checks = status_checks("a.dev", "/var/www", &ProxyLayout::default());
        assert_eq!(checks.len(), 9);
        assert!(checks[0].1.starts_with("tail -20 /tmp/deploy_a.dev.log"));
        assert!(checks[4].1.contains("cat /etc/nginx/sites-enabled/a_dev"));
        for (title, command) in &checks[..5] {
            assert!(command.contains("|| echo"), "{title} has no fallback");
        }
    }

    #[tokio::test]
    async fn test_probe_collects_sections_in_order() {
        let shell = ScriptedShell::new()
            .on("tail -20 /tmp/deploy_a.dev.log", 0, "Deploy finished Mon\n", "")
            .on("ls -la /var/www/a.dev/dist", 0, "Build output not found\n", "")
            .on("nginx -t", 0, "nginx: configuration file /etc/nginx/nginx.conf test is successful\n", "");

        let report = probe_status(
            &shell,
            "a.dev",
            "/var/www",
            &ProxyLayout::default(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(report.sections.len(), 9);
        assert_eq!(
            report.section("Build log").unwrap().output,
            "Deploy finished Mon"
        );
        assert!(
            report
                .section("Proxy syntax check")
                .unwrap()
                .output
                .contains("successful")
        );
        assert_eq!(shell.commands().len(), 9);
        assert!(shell.uploads().is_empty());
    }
}
