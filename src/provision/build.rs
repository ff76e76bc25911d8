//! The detached build script.

use crate::proxy::SiteBackend;

pub fn build_log_path(domain: &str) -> String {
    format!("/tmp/deploy_{}.log", domain)
}

pub fn build_script_path(domain: &str) -> String {
    format!("/tmp/deploy_{}.sh", domain.replace('.', "_"))
}

/// Paths for one project's build on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub project_dir: String,
    pub serving_root: String,
    pub log_path: String,
    pub script_path: String,
    pub backend: SiteBackend,
}

impl BuildPlan {
    /// Static plans serve from `<web_root>/<domain>/html`; upstream plans run
    /// the project's preview server on `port`.
    pub fn new(web_root: &str, domain: &str, upstream_port: Option<u16>) -> Self {
        let web_root = web_root.trim_end_matches('/');
        let project_dir = format!("{}/{}", web_root, domain);
        let serving_root = format!("{}/html", project_dir);
        let backend = match upstream_port {
            Some(port) => SiteBackend::Upstream { port },
            None => SiteBackend::Static {
                root: serving_root.clone(),
            },
        };
        Self {
            project_dir,
            serving_root,
            log_path: build_log_path(domain),
            script_path: build_script_path(domain),
            backend,
        }
    }

    pub fn render_script(&self) -> String {
        let log = &self.log_path;
        let mut script = String::new();
        script.push_str("#!/bin/bash\n");
        script.push_str("set -e\n");
        script.push_str(&format!("cd {}\n", self.project_dir));
        script.push_str(&format!("echo \"npm install...\" >> {log}\n"));
        script.push_str(&format!("npm install >> {log} 2>&1\n"));
        script.push_str(&format!("echo \"Dependencies installed\" >> {log}\n"));
        script.push_str(&format!("echo \"npm run build...\" >> {log}\n"));
        script.push_str(&format!("npm run build >> {log} 2>&1\n"));
        script.push_str(&format!("echo \"Build finished\" >> {log}\n"));

        match &self.backend {
            SiteBackend::Static { root } => {
                script.push_str(&format!("echo \"Copying files to {root}\" >> {log}\n"));
                script.push_str(&format!("sudo mkdir -p {root}\n"));
                script.push_str(&format!("sudo cp -r {}/dist/* {root}/\n", self.project_dir));
                script.push_str(&format!("sudo chown -R www-data:www-data {root}\n"));
                script.push_str(&format!("echo \"Files copied\" >> {log}\n"));
            }
            SiteBackend::Upstream { port } => {
                script.push_str(&format!(
                    "echo \"Starting preview server on port {port}\" >> {log}\n"
                ));
                script.push_str(&format!(
                    "pkill -f \"vite preview --port {port}\" || true\n"
                ));
                script.push_str(&format!(
                    "nohup npm run preview -- --port {port} --host 127.0.0.1 >> {log} 2>&1 &\n"
                ));
            }
        }

        script.push_str(&format!("echo \"Deploy finished $(date)\" >> {log}\n"));
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(build_log_path("a.dev"), "/tmp/deploy_a.dev.log");
        assert_eq!(build_script_path("shop.a.dev"), "/tmp/deploy_shop_a_dev.sh");
    }

    #[test]
    fn test_static_plan_script() {
        let plan = BuildPlan::new("/var/www/", "a.dev", None);
        assert_eq!(plan.project_dir, "/var/www/a.dev");
        assert_eq!(
            plan.backend,
            SiteBackend::Static {
                root: "/var/www/a.dev/html".into()
            }
        );

        let script = plan.render_script();
        assert!(script.starts_with("#!/bin/bash\nset -e\ncd /var/www/a.dev\n"));
        assert!(script.contains("npm install >> /tmp/deploy_a.dev.log 2>&1"));
        assert!(script.contains("npm run build >> /tmp/deploy_a.dev.log 2>&1"));
        assert!(script.contains("sudo cp -r /var/www/a.dev/dist/* /var/www/a.dev/html/"));
        assert!(script.contains("sudo chown -R www-data:www-data /var/www/a.dev/html"));
        // install must precede build, build must precede copy
        let install = script.find("npm install >>").unwrap();
        let build = script.find("npm run build >>").unwrap();
        let copy = script.find("sudo cp -r").unwrap();
        assert!(install < build && build < copy);
    }

    #[test]
    fn test_upstream_plan_starts_preview_instead_of_copying() {
        let plan = BuildPlan::new("/var/www", "api.a.dev", Some(3000));
        let script = plan.render_script();
        assert!(script.contains("npm run preview -- --port 3000"));
        assert!(!script.contains("sudo cp -r"));
        assert_eq!(plan.backend, SiteBackend::Upstream { port: 3000 });
    }
}
