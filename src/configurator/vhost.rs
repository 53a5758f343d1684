//! nginx virtual host rendering.

use super::plan::ConfigurationPlan;

/// Renders the HTTP virtual host proxying the plan's domain to the workload.
///
/// The certificate tool later rewrites this file to add the TLS listener and
/// the HTTP redirect.
pub(super) fn render_vhost(plan: &ConfigurationPlan) -> String {
    let mut lines = vec![
        String::from("server {"),
        String::from("    listen 80;"),
        format!("    server_name {};", plan.domain),
        String::new(),
        String::from("    location / {"),
        format!("        proxy_pass http://127.0.0.1:{};", plan.app_port),
        String::from("        proxy_http_version 1.1;"),
        String::from("        proxy_set_header Upgrade $http_upgrade;"),
        String::from("        proxy_set_header Connection \"upgrade\";"),
        String::from("        proxy_set_header Host $host;"),
        String::from("        proxy_set_header X-Real-IP $remote_addr;"),
        String::from("        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;"),
        String::from("        proxy_set_header X-Forwarded-Proto $scheme;"),
        String::from("        proxy_read_timeout 300s;"),
    ];
    if plan.credentials.is_some() {
        lines.push(String::from("        auth_basic \"Restricted\";"));
        lines.push(format!(
            "        auth_basic_user_file {};",
            plan.htpasswd_path
        ));
    }
    lines.push(String::from("    }"));
    lines.push(String::from("}"));
    lines.join("\n")
}
