//! End-to-end installation runs against a simulated host and release source.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]


use netswitch_installer::{Channel, Error, Reconciler};
use std::cell::RefCell;
use std::time::Duration;
use support::{config_in, SimGithub, SimHost};

fn position(calls: &[String], prefix: &str) -> usize {
    calls
        .iter()
        .position(|c| c.starts_with(prefix))
        .unwrap_or_else(|| panic!("no call starting with {prefix}: {calls:?}"))
}

#[tokio::test]
async fn test_fresh_install_prefers_exact_architecture() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost::default();
    let github = SimGithub::default()
        .publish("v1.3.0-rc.1", true, &["arm64"])
        .publish("v1.2.0", false, &["all", "arm64"]);

    let report = Reconciler::new(&config, &host, &github).run().await.unwrap();

    assert_eq!(report.release_tag, "v1.2.0");
    assert_eq!(report.asset_name, "netswitch_1.2.0_arm64.deb");
    assert_eq!(report.previous_version, None);
    assert_eq!(report.installed_version.as_deref(), Some("1.2.0"));
    assert!(report.unit_created);
    assert!(report.active);
    assert_eq!(
        github.downloads(),
        ["GET https://downloads.example.invalid/v1.2.0/netswitch_1.2.0_arm64.deb"]
    );

    let calls = host.calls();
    assert!(position(&calls, "systemctl stop") < position(&calls, "dpkg -i"));
    assert!(position(&calls, "dpkg -i") < position(&calls, "systemctl daemon-reload"));
    assert_eq!(host.count("apt-get update"), 0);

    let defaults = std::fs::read_to_string(config.defaults_file()).unwrap();
    assert!(defaults.contains("NETSWITCH_GPIO_CHIP=/dev/gpiochip0"));
    assert!(config.paths.unit_dir.join("netswitch.service").exists());
    assert!(config
        .paths
        .unit_dir
        .join("netswitch.service.d")
        .join("override.conf")
        .exists());
}

#[tokio::test]
async fn test_falls_back_to_architecture_independent_asset() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost::default();
    let github = SimGithub::default().publish("v1.2.0", false, &["armhf", "all"]);

    let report = Reconciler::new(&config, &host, &github).run().await.unwrap();
    assert_eq!(report.asset_name, "netswitch_1.2.0_all.deb");
    assert_eq!(host.version_of("netswitch").as_deref(), Some("1.2.0"));
}

#[tokio::test]
async fn test_architecture_mismatch_stops_before_network() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost {
        arch: "armhf".to_string(),
        ..SimHost::default()
    };
    let github = SimGithub::default().publish("v1.2.0", false, &["arm64"]);

    let err = Reconciler::new(&config, &host, &github).run().await.unwrap_err();
    assert!(matches!(
        err,
        Error::ArchitectureMismatch { ref host, ref required } if host == "armhf" && required == "arm64"
    ));
    assert!(github.requests.borrow().is_empty());
    assert_eq!(host.count("dpkg -i"), 0);
}

#[tokio::test]
async fn test_unprivileged_run_does_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost {
        privileged: false,
        ..SimHost::default()
    };
    let github = SimGithub::default().publish("v1.2.0", false, &["arm64"]);

    let err = Reconciler::new(&config, &host, &github).run().await.unwrap_err();
    assert!(matches!(err, Error::PrivilegeRequired));
    assert!(host.calls().is_empty());
    assert!(github.requests.borrow().is_empty());
}

#[tokio::test]
async fn test_missing_host_tools_are_installed() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost {
        missing_tools: vec!["journalctl".to_string()],
        ..SimHost::default()
    };
    let github = SimGithub::default().publish("v1.2.0", false, &["arm64"]);

    Reconciler::new(&config, &host, &github).run().await.unwrap();
    assert!(host
        .calls()
        .contains(&"apt-get install -y --no-install-recommends systemd".to_string()));
    assert_eq!(host.count("apt-get update"), 1);
}

#[tokio::test]
async fn test_no_stable_release_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    let host = SimHost::default();
    let github = SimGithub::default().publish("v2.0.0-beta.1", true, &["arm64"]);

    let err = Reconciler::new(&config, &host, &github).run().await.unwrap_err();
    assert!(matches!(err, Error::ReleaseNotFound(_)));
    assert!(github.downloads().is_empty());

    config.channel = Channel::Pre;
    let report = Reconciler::new(&config, &host, &github).run().await.unwrap();
    assert_eq!(report.release_tag, "v2.0.0-beta.1");
}

#[tokio::test]
async fn test_explicit_tag_overrides_channel() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.channel = Channel::Pre;
    config.tag = Some("v1.0.0".to_string());
    let host = SimHost::default();
    let github = SimGithub::default()
        .publish("v1.1.0-rc.1", true, &["arm64"])
        .publish("v1.0.0", false, &["arm64"]);

    let report = Reconciler::new(&config, &host, &github).run().await.unwrap();
    assert_eq!(report.release_tag, "v1.0.0");
    let requests = github.requests.borrow();
    assert!(requests.contains(&"TAG netswitch/netswitch v1.0.0".to_string()));
    assert!(requests.iter().all(|r| !r.starts_with("LIST")));
}

#[tokio::test]
async fn test_unknown_tag_is_release_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.tag = Some("v9.9.9".to_string());
    let host = SimHost::default();
    let github = SimGithub::default().publish("v1.0.0", false, &["arm64"]);

    let err = Reconciler::new(&config, &host, &github).run().await.unwrap_err();
    assert!(matches!(err, Error::ReleaseNotFound(_)));
}

#[tokio::test]
async fn test_release_without_matching_asset() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost::default();
    let github = SimGithub::default().publish("v1.2.0", false, &["amd64", "armhf"]);

    let err = Reconciler::new(&config, &host, &github).run().await.unwrap_err();
    assert!(matches!(err, Error::NoMatchingAsset { .. }));
    assert!(github.downloads().is_empty());
}

#[tokio::test]
async fn test_install_repaired_once_then_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost::default();
    host.dpkg_failures.set(1);
    let github = SimGithub::default().publish("v1.2.0", false, &["arm64"]);

    let report = Reconciler::new(&config, &host, &github).run().await.unwrap();
    assert_eq!(report.installed_version.as_deref(), Some("1.2.0"));
    assert_eq!(host.count("dpkg -i"), 2);
    assert_eq!(host.count("apt-get -f install -y"), 1);
    assert_eq!(host.count("apt-get update"), 1);
}

#[tokio::test]
async fn test_install_fails_after_one_repair() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost::default();
    host.dpkg_failures.set(2);
    let github = SimGithub::default().publish("v1.2.0", false, &["arm64"]);

    let err = Reconciler::new(&config, &host, &github).run().await.unwrap_err();
    assert!(matches!(err, Error::InstallFailed(ref msg) if msg.contains("dependency problems")));
    assert_eq!(host.count("dpkg -i"), 2);
    assert_eq!(host.count("apt-get -f install -y"), 1);
    assert_eq!(host.count("systemctl daemon-reload"), 0);
    assert_eq!(host.version_of("netswitch"), None);
}

#[tokio::test]
async fn test_dependency_installed_under_fallback_name() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost {
        candidates: ["python3-gpiod".to_string()].into_iter().collect(),
        ..SimHost::default()
    };
    host.installed.borrow_mut().remove("python3-libgpiod");
    let github = SimGithub::default().publish("v1.2.0", false, &["arm64"]);

    Reconciler::new(&config, &host, &github).run().await.unwrap();
    let calls = host.calls();
    assert!(calls.contains(&"apt-get install -y --no-install-recommends python3-gpiod".to_string()));
    assert!(position(&calls, "apt-get install") < position(&calls, "dpkg -i"));
}

#[tokio::test]
async fn test_unavailable_dependency_stops_before_download() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost::default();
    host.installed.borrow_mut().remove("python3-libgpiod");
    let github = SimGithub::default().publish("v1.2.0", false, &["arm64"]);

    let err = Reconciler::new(&config, &host, &github).run().await.unwrap_err();
    assert!(matches!(err, Error::MissingDependency(_)));
    assert!(github.requests.borrow().is_empty());
}

#[tokio::test]
async fn test_activation_timeout_dumps_journal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.activation.timeout_secs = 0;
    let host = SimHost {
        service_starts: false,
        ..SimHost::default()
    };
    let github = SimGithub::default().publish("v1.2.0", false, &["arm64"]);

    let err = Reconciler::new(&config, &host, &github).run().await.unwrap_err();
    assert!(matches!(err, Error::ActivationTimeout { ref unit, .. } if unit == "netswitch.service"));
    assert!(host
        .calls()
        .contains(&"journalctl -u netswitch.service -n 50 --no-pager".to_string()));
    // The package itself stays installed.
    assert_eq!(host.version_of("netswitch").as_deref(), Some("1.2.0"));
}

#[tokio::test]
async fn test_rerun_keeps_operator_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let github = SimGithub::default().publish("v1.2.0", false, &["arm64"]);

    let first = SimHost::default();
    Reconciler::new(&config, &first, &github).run().await.unwrap();

    let unit_path = config.paths.unit_dir.join("netswitch.service");
    let override_path = config
        .paths
        .unit_dir
        .join("netswitch.service.d")
        .join("override.conf");
    let rendered_override = std::fs::read_to_string(&override_path).unwrap();
    let edited_defaults = "NETSWITCH_LED_LINE=22\nNETSWITCH_HARD_SWITCH=1\n";
    std::fs::write(config.defaults_file(), edited_defaults).unwrap();
    std::fs::write(&unit_path, "# shipped by the package\n").unwrap();
    std::fs::write(&override_path, "stale\n").unwrap();

    let second = SimHost {
        unit_registered: true,
        installed: RefCell::new(first.installed.borrow().clone()),
        ..SimHost::default()
    };
    let report = Reconciler::new(&config, &second, &github).run().await.unwrap();

    assert!(!report.unit_created);
    assert_eq!(report.previous_version.as_deref(), Some("1.2.0"));
    assert_eq!(std::fs::read_to_string(config.defaults_file()).unwrap(), edited_defaults);
    assert_eq!(std::fs::read_to_string(&unit_path).unwrap(), "# shipped by the package\n");
    assert_eq!(std::fs::read_to_string(&override_path).unwrap(), rendered_override);
    assert_eq!(second.count("systemctl restart netswitch.service"), 1);
}

#[tokio::test]
async fn test_explicit_downgrade_is_installed() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.tag = Some("v1.0.0".to_string());
    let host = SimHost::default();
    host.installed
        .borrow_mut()
        .insert("netswitch".to_string(), "1.2.0".to_string());
    let github = SimGithub::default()
        .publish("v1.2.0", false, &["arm64"])
        .publish("v1.0.0", false, &["arm64"]);

    let report = Reconciler::new(&config, &host, &github).run().await.unwrap();
    assert_eq!(report.previous_version.as_deref(), Some("1.2.0"));
    assert_eq!(report.installed_version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn test_download_directory_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost::default();
    let github = SimGithub::default().publish("v1.2.0", false, &["arm64"]);

    Reconciler::new(&config, &host, &github).run().await.unwrap();
    let installed_from = host
        .calls()
        .into_iter()
        .find_map(|c| c.strip_prefix("dpkg -i ").map(str::to_string))
        .unwrap();
    assert!(!std::path::Path::new(&installed_from).exists());
}

#[tokio::test]
async fn test_download_directory_is_removed_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost::default();
    host.dpkg_failures.set(2);
    let github = SimGithub::default().publish("v1.2.0", false, &["arm64"]);

    let err = Reconciler::new(&config, &host, &github).run().await.unwrap_err();
    assert!(matches!(err, Error::InstallFailed(_)));

    let downloaded = github.last_dest.borrow().clone().unwrap();
    assert!(!downloaded.exists());
    assert!(!downloaded.parent().unwrap().exists());
}

#[tokio::test]
async fn test_download_directory_is_removed_when_run_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let host = SimHost::default();
    let github = SimGithub {
        stall_downloads: true,
        ..SimGithub::default()
    }
    .publish("v1.2.0", false, &["arm64"]);

    let reconciler = Reconciler::new(&config, &host, &github);
    let outcome = tokio::time::timeout(Duration::from_millis(200), reconciler.run()).await;
    assert!(outcome.is_err(), "run should still be downloading");

    let partial = github.last_dest.borrow().clone().unwrap();
    assert!(!partial.exists());
    assert!(!partial.parent().unwrap().exists());
    assert_eq!(host.count("dpkg -i"), 0);
}
