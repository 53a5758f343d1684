//! Unit tests for the `gpulease` CLI binary implementation.

use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::cli::ProfileArg;

#[fixture]
fn control_plane_config() -> ControlPlaneConfig {
    ControlPlaneConfig {
        api_key: Some(String::from("key")),
        api_url: String::from("https://api.example.test/graphql"),
        gpu_type: String::from("NVIDIA-RTX4090"),
        image: String::from("ghcr.io/acme/webui:ollama"),
        volume_id: None,
        env: None,
    }
}

#[fixture]
fn deploy_config() -> DeployConfig {
    DeployConfig {
        profile: String::from("public-https"),
        domain: Some(String::from("gpu.example.com")),
        email: Some(String::from("ops@example.com")),
        admin_user: None,
        admin_password: None,
        container_name: String::from("open-webui"),
        app_port: 3000,
        cpu_only: false,
        tunnel_ports: String::from("3000,11434"),
        idle_threshold_secs: 900,
        idle_sample_secs: 60,
        poll_interval_secs: 5,
        max_wait_secs: 900,
        access_log_path: String::from("/var/log/nginx/access.log"),
    }
}

fn no_overrides() -> UpCommand {
    UpCommand {
        gpu_type: None,
        image: None,
        profile: None,
        domain: None,
        email: None,
        admin_user: None,
        tunnel_ports: None,
        idle_threshold: None,
        max_wait: None,
    }
}

#[rstest]
fn overrides_replace_loaded_values(
    mut control_plane_config: ControlPlaneConfig,
    mut deploy_config: DeployConfig,
) {
    let args = UpCommand {
        gpu_type: Some(String::from("NVIDIA-A100")),
        profile: Some(ProfileArg::Tunnel),
        tunnel_ports: Some(String::from("8080")),
        idle_threshold: Some(60),
        max_wait: Some(0),
        ..no_overrides()
    };

    apply_overrides(args, &mut control_plane_config, &mut deploy_config);

    assert_eq!(control_plane_config.gpu_type, "NVIDIA-A100");
    assert_eq!(control_plane_config.image, "ghcr.io/acme/webui:ollama");
    assert_eq!(deploy_config.profile, "tunnel");
    assert_eq!(deploy_config.tunnel_ports, "8080");
    assert_eq!(deploy_config.idle_threshold_secs, 60);
    assert_eq!(deploy_config.max_wait(), None);
}

#[rstest]
fn absent_overrides_keep_loaded_values(
    mut control_plane_config: ControlPlaneConfig,
    mut deploy_config: DeployConfig,
) {
    let before = (control_plane_config.clone(), deploy_config.clone());

    apply_overrides(no_overrides(), &mut control_plane_config, &mut deploy_config);

    assert_eq!((control_plane_config, deploy_config), before);
}

#[rstest]
#[case::public("public-https", ActivityFeed::AccessLog(String::from("/var/log/nginx/access.log")))]
#[case::tunnel("tunnel", ActivityFeed::IdleSinceConfigured)]
fn activity_feed_follows_profile(
    mut deploy_config: DeployConfig,
    #[case] profile: &str,
    #[case] expected: ActivityFeed,
) {
    deploy_config.profile = profile.to_owned();

    let feed = activity_feed(&deploy_config)
        .unwrap_or_else(|err| panic!("profile should parse: {err}"));

    assert_eq!(feed, expected);
}

#[rstest]
fn settings_mirror_deploy_config(mut deploy_config: DeployConfig) {
    deploy_config.poll_interval_secs = 2;

    let settings = lifecycle_settings(&deploy_config);

    assert_eq!(settings.poll_interval, Duration::from_secs(2));
    assert_eq!(settings.max_wait, Some(Duration::from_secs(900)));
    assert_eq!(settings.idle_threshold, Duration::from_secs(900));
    assert_eq!(settings.sample_interval, Duration::from_secs(60));
}

#[test]
fn failed_teardown_turns_outcome_into_error() {
    let outcome = LifecycleOutcome {
        instance_id: String::from("i-1"),
        reason: ShutdownReason::Cancelled,
        teardown: TeardownReport::Failed(ApiError::transport("timeout")),
    };

    let err = finish(outcome).err();

    assert!(
        matches!(err, Some(CliError::Teardown { ref instance_id, .. }) if instance_id == "i-1"),
        "unexpected result: {err:?}"
    );
}

#[rstest]
#[case::stopped(TeardownReport::Stopped)]
#[case::already(TeardownReport::AlreadyTornDown)]
fn successful_teardown_exits_cleanly(#[case] teardown: TeardownReport) {
    let outcome = LifecycleOutcome {
        instance_id: String::from("i-1"),
        reason: ShutdownReason::IdleShutdown {
            idle_for: Duration::from_secs(900),
        },
        teardown,
    };

    assert!(finish(outcome).is_ok());
}

#[test]
fn write_error_writes_cli_error() {
    let mut buf = Vec::new();
    let err = CliError::Config(ConfigError::MissingField(String::from("api key")));
    write_error(&mut buf, &err);
    let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
    assert_eq!(
        rendered,
        "configuration error: missing configuration field: api key\n"
    );
}
