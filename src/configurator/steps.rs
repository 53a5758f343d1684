//! Translation of setup steps into remote commands.
//!
//! Scripts are constants; every configured value reaches them as a positional
//! parameter, never as script text.

use super::plan::{ConfigurationPlan, SetupStep};
use super::vhost::render_vhost;
use crate::remote::RemoteCommand;

const PACKAGES: [&str; 5] = [
    "nginx",
    "certbot",
    "python3-certbot-nginx",
    "apache2-utils",
    "docker.io",
];

const INSTALL_SCRIPT: &str = "apt-get update -q && apt-get install -y -q \"$@\"";

// $1 vhost text, $2 available path, $3 enabled path, $4 htpasswd path,
// $5 username (empty when authentication is disabled). The password is read
// from standard input by `htpasswd -i`.
const WRITE_PROXY_SCRIPT: &str = concat!(
    "set -e; ",
    "printf '%s\\n' \"$1\" > \"$2\"; ",
    "ln -sf \"$2\" \"$3\"; ",
    "if [ -n \"$5\" ]; then htpasswd -i -c \"$4\" \"$5\"; fi"
);

const RESTART_SCRIPT: &str =
    "nginx -t && { systemctl restart nginx 2>/dev/null || service nginx restart; }";

const RELOAD_SCRIPT: &str = "systemctl reload nginx 2>/dev/null || service nginx reload";

/// Builds the remote command for `step`.
pub(super) fn command_for(step: SetupStep, plan: &ConfigurationPlan) -> RemoteCommand {
    match step {
        SetupStep::InstallPackages => {
            let mut args = vec![
                String::from("DEBIAN_FRONTEND=noninteractive"),
                String::from("sh"),
                String::from("-c"),
                INSTALL_SCRIPT.to_owned(),
                String::from("sh"),
            ];
            args.extend(PACKAGES.iter().map(|pkg| (*pkg).to_owned()));
            privileged(plan, "env", args)
        }
        SetupStep::StartContainer => {
            let publish = format!("127.0.0.1:{port}:{port}", port = plan.app_port);
            let mut args = vec![
                String::from("run"),
                String::from("-d"),
                String::from("--restart"),
                String::from("unless-stopped"),
                String::from("--name"),
                plan.container_name.clone(),
                String::from("-p"),
                publish,
            ];
            if plan.gpus {
                args.push(String::from("--gpus"));
                args.push(String::from("all"));
            }
            args.push(plan.image.clone());
            privileged(plan, "docker", args)
        }
        SetupStep::WriteProxyConfig => {
            let username = plan
                .credentials
                .as_ref()
                .map(|creds| creds.username.clone())
                .unwrap_or_default();
            let args = vec![
                String::from("-c"),
                WRITE_PROXY_SCRIPT.to_owned(),
                String::from("sh"),
                render_vhost(plan),
                format!("/etc/nginx/sites-available/{}", plan.site_name),
                format!("/etc/nginx/sites-enabled/{}", plan.site_name),
                plan.htpasswd_path.clone(),
                username,
            ];
            let mut command = privileged(plan, "sh", args);
            command.stdin = plan
                .credentials
                .as_ref()
                .map(|creds| format!("{}\n", creds.password));
            command
        }
        SetupStep::RestartProxy => script(plan, RESTART_SCRIPT),
        SetupStep::IssueCertificate => privileged(
            plan,
            "certbot",
            vec![
                String::from("--nginx"),
                String::from("-d"),
                plan.domain.clone(),
                String::from("-m"),
                plan.email.clone(),
                String::from("--non-interactive"),
                String::from("--agree-tos"),
                String::from("--redirect"),
            ],
        ),
        SetupStep::ReloadProxy => script(plan, RELOAD_SCRIPT),
    }
}

fn script(plan: &ConfigurationPlan, body: &str) -> RemoteCommand {
    privileged(plan, "sh", vec![String::from("-c"), body.to_owned()])
}

fn privileged(plan: &ConfigurationPlan, program: &str, args: Vec<String>) -> RemoteCommand {
    if plan.elevate {
        let mut elevated = Vec::with_capacity(args.len() + 2);
        elevated.push(String::from("-n"));
        elevated.push(program.to_owned());
        elevated.extend(args);
        RemoteCommand::new("sudo", elevated)
    } else {
        RemoteCommand::new(program, args)
    }
}
