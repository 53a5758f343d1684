//! Tests for SSH argument construction and remote command rendering.

use std::net::{IpAddr, Ipv4Addr};

use rstest::{fixture, rstest};

use super::*;
use crate::test_support::{CallLog, ScriptedRunner};

#[fixture]
fn ssh_config() -> SshConfig {
    SshConfig {
        bin: String::from("ssh"),
        user: String::from("root"),
        port: 2222,
        identity_file: Some(String::from("/keys/id_ed25519")),
        allow_prompts: false,
        strict_host_key_checking: false,
        known_hosts_file: String::from("/dev/null"),
    }
}

fn address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))
}

#[rstest]
fn render_escapes_each_argument() {
    let command = RemoteCommand::new("certbot", ["-d", "example.com; rm -rf /", "it's"]);

    assert_eq!(
        command.render(),
        "certbot -d 'example.com; rm -rf /' 'it'\\''s'"
    );
}

#[rstest]
fn ssh_spec_places_options_before_destination(ssh_config: SshConfig) {
    let shell = RemoteShell::new(ssh_config, ScriptedRunner::new(CallLog::new()))
        .unwrap_or_else(|err| panic!("config should validate: {err}"));

    let spec = shell.ssh_spec(address(), &RemoteCommand::new("true", Vec::<String>::new()));

    assert_eq!(
        spec.command_line(),
        concat!(
            "ssh -p 2222 -i /keys/id_ed25519 -o BatchMode=yes ",
            "-o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null root@1.2.3.4 true"
        )
    );
    assert_eq!(spec.stdin, None);
}

#[rstest]
fn allowing_prompts_drops_batch_mode(mut ssh_config: SshConfig) {
    ssh_config.allow_prompts = true;
    let shell = RemoteShell::new(ssh_config, ScriptedRunner::new(CallLog::new()))
        .unwrap_or_else(|err| panic!("config should validate: {err}"));

    let spec = shell.ssh_spec(address(), &RemoteCommand::new("true", Vec::<String>::new()));

    assert!(
        !spec.command_line().contains("BatchMode"),
        "line: {}",
        spec.command_line()
    );
}

#[rstest]
fn ssh_spec_forwards_stdin_payload(ssh_config: SshConfig) {
    let shell = RemoteShell::new(ssh_config, ScriptedRunner::new(CallLog::new()))
        .unwrap_or_else(|err| panic!("config should validate: {err}"));

    let spec = shell.ssh_spec(
        address(),
        &RemoteCommand::new("cat", Vec::<String>::new()).with_stdin("s3cret\n"),
    );

    assert_eq!(spec.stdin.as_deref(), Some("s3cret\n"));
    assert!(
        !spec.command_line().contains("s3cret"),
        "stdin must not leak into arguments"
    );
    assert!(
        !format!("{spec:?}").contains("s3cret"),
        "debug output must redact stdin"
    );
}

#[rstest]
fn tunnel_spec_forwards_every_port(ssh_config: SshConfig) {
    let shell = RemoteShell::new(ssh_config, ScriptedRunner::new(CallLog::new()))
        .unwrap_or_else(|err| panic!("config should validate: {err}"));

    let line = shell.tunnel_spec(address(), &[3000, 11434]).command_line();

    assert!(
        line.starts_with("ssh -N -L 3000:localhost:3000 -L 11434:localhost:11434"),
        "unexpected tunnel command: {line}"
    );
    assert!(line.ends_with("root@1.2.3.4"), "unexpected tunnel command: {line}");
}

#[rstest]
#[case::blank_bin(SshConfig { bin: String::from(" "), ..ssh_config() }, "bin")]
#[case::blank_user(SshConfig { user: String::new(), ..ssh_config() }, "user")]
#[case::blank_identity(SshConfig { identity_file: Some(String::from("  ")), ..ssh_config() }, "identity_file")]
#[case::zero_port(SshConfig { port: 0, ..ssh_config() }, "port")]
fn validation_names_the_offending_field(#[case] config: SshConfig, #[case] field: &str) {
    let err = config.validate().expect_err("validation should fail");

    assert_eq!(
        err,
        RemoteError::InvalidConfig {
            field: field.to_owned()
        }
    );
    assert!(
        err.to_string().contains("GPULEASE_SSH_"),
        "error should mention env var: {err}"
    );
}

#[tokio::test]
async fn run_returns_non_zero_exit_as_output() {
    let runner = ScriptedRunner::new(CallLog::new());
    runner.push_failure(3, "boom");
    let shell = RemoteShell::new(ssh_config(), runner.clone())
        .unwrap_or_else(|err| panic!("config should validate: {err}"));

    let output = shell
        .run(address(), &RemoteCommand::new("false", Vec::<String>::new()))
        .await
        .unwrap_or_else(|err| panic!("runner should not error: {err}"));

    assert_eq!(output.code, Some(3));
    assert_eq!(output.stderr, "boom");
    assert_eq!(runner.invocations().len(), 1);
}

#[tokio::test]
async fn process_runner_feeds_stdin_and_captures_output() {
    let spec = CommandSpec {
        program: String::from("cat"),
        args: Vec::new(),
        stdin: Some(String::from("hello")),
    };

    let output = ProcessCommandRunner
        .run(&spec)
        .await
        .unwrap_or_else(|err| panic!("cat should run: {err}"));

    assert!(output.is_success());
    assert_eq!(output.stdout, "hello");
}

#[tokio::test]
async fn process_runner_reports_missing_program() {
    let spec = CommandSpec::new("gpulease-definitely-missing-binary", Vec::new());

    let err = ProcessCommandRunner
        .run(&spec)
        .await
        .expect_err("missing binary should fail to spawn");

    assert!(matches!(err, RemoteError::Spawn { .. }), "unexpected: {err}");
}
