//! Integration tests for container lifecycle and configuration through the
//! host (create, start, stop, clone, destroy, config and cgroup items).

use std::time::Duration;

use nsattach::{
    CloneOptions, ConfigValue, ContainerState, GetOptions, Host, NsattachError, ProcessOptions,
};
use nsattach_test_utils::{TestLxcPath, run_local};

fn lookup() -> GetOptions {
    GetOptions {
        defined: false,
        ..Default::default()
    }
}

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// LOOKUP
// ============================================================================

#[test]
fn get_container_requires_definition_by_default() {
    let lxc = TestLxcPath::new();

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();

        let err = host
            .get_container("ghost", GetOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NsattachError::NotFound(ref name) if name == "ghost"));

        let c = host.get_container("ghost", lookup()).await.unwrap();
        assert_eq!(c.name(), "ghost");
        assert_eq!(c.lxcpath(), lxc.path());
        assert!(!c.is_defined());
        assert_eq!(c.state(), ContainerState::Stopped);
    });
}

#[test]
fn get_container_rejects_invalid_names() {
    let lxc = TestLxcPath::new();

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let err = host.get_container("a/b", lookup()).await.unwrap_err();
        assert!(err.to_string().starts_with("Failed to create container"));
    });
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
fn create_start_stop_destroy() {
    let lxc = TestLxcPath::new();

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = host.get_container("c1", lookup()).await.unwrap();

        let err = c.start(&[]).await.unwrap_err();
        assert!(matches!(err, NsattachError::NotDefined));

        c.create(None, None, &[]).await.unwrap();
        assert!(c.is_defined());
        assert!(c.create(None, None, &[]).await.is_err());

        c.start(&argv(&["sleep", "3600"])).await.unwrap();
        assert!(c.is_running());
        assert_eq!(c.state(), ContainerState::Running);
        assert!(c.init_pid().is_some());

        // A running container can be neither destroyed nor cloned
        assert!(c.destroy().await.is_err());
        let err = c.clone_to("c2", CloneOptions::default()).await.unwrap_err();
        assert!(matches!(err, NsattachError::Running));

        assert_eq!(c.get_running_config_item("lxc.uts.name").unwrap(), "c1");

        c.stop().await.unwrap();
        assert!(!c.is_running());
        assert!(c.stop().await.is_err());

        c.destroy().await.unwrap();
        assert!(!c.is_defined());
        assert!(!lxc.path().join("c1").exists());
    });
}

#[test]
fn start_failure_reports_missing_program() {
    let lxc = TestLxcPath::new();

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = host.get_container("c1", lookup()).await.unwrap();
        c.create(None, None, &[]).await.unwrap();

        let err = c.start(&argv(&["/nonexistent/init"])).await.unwrap_err();
        assert!(err.to_string().starts_with("Failed to start container"));
        assert!(!c.is_running());
    });
}

#[test]
fn clone_copies_configuration() {
    let lxc = TestLxcPath::new();

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = host.get_container("src", lookup()).await.unwrap();
        c.create(None, None, &[]).await.unwrap();
        c.set_config_item("environment", vec!["A=1".to_string()]).unwrap();
        c.save_config(None).await.unwrap();

        let copy = c.clone_to("dst", CloneOptions::default()).await.unwrap();
        assert_eq!(copy.name(), "dst");
        assert!(copy.is_defined());
        assert_eq!(
            copy.get_config_item("uts.name").unwrap(),
            ConfigValue::from("dst")
        );
        assert_eq!(
            copy.get_config_item("lxc.environment").unwrap(),
            ConfigValue::List(vec!["A=1".to_string()])
        );

        let reopened = host.get_container("dst", GetOptions::default()).await.unwrap();
        assert!(reopened.is_defined());
    });
}

#[test]
fn operations_after_destroy_require_definition() {
    let lxc = TestLxcPath::new();

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = host.get_container("c1", lookup()).await.unwrap();
        c.create(None, None, &[]).await.unwrap();
        c.destroy().await.unwrap();

        assert!(matches!(c.stop().await, Err(NsattachError::NotDefined)));
        assert!(matches!(c.destroy().await, Err(NsattachError::NotDefined)));
    });
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[test]
fn config_items_round_trip_through_files() {
    let lxc = TestLxcPath::new();
    let saved = lxc.path().join("saved.conf");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = host.get_container("c1", lookup()).await.unwrap();
        c.create(None, None, &[]).await.unwrap();

        assert!(c.config_keys().iter().any(|k| k == "lxc.uts.name"));

        c.set_config_item("lxc.environment", vec!["A=1".to_string(), "B=2".to_string()])
            .unwrap();
        assert_eq!(
            c.get_config_item("environment").unwrap(),
            ConfigValue::List(vec!["A=1".to_string(), "B=2".to_string()])
        );

        c.append_config_item("environment", "C=3").unwrap();
        assert_eq!(
            c.get_config_item("environment").unwrap(),
            ConfigValue::List(vec!["A=1".into(), "B=2".into(), "C=3".into()])
        );

        // Rejected keys leave the old value in place
        assert!(c.set_config_item("lxc.bogus", "1").is_err());

        c.set_config_item("init.cmd", "/bin/sh -c true").unwrap();
        c.save_config(Some(&saved)).await.unwrap();

        c.clear_config_item("environment").unwrap();
        assert_eq!(
            c.get_config_item("environment").unwrap(),
            ConfigValue::Scalar(String::new())
        );

        c.load_config(Some(&saved)).await.unwrap();
        assert_eq!(
            c.get_config_item("init.cmd").unwrap(),
            ConfigValue::from("/bin/sh -c true")
        );
        assert_eq!(
            c.get_config_item("environment").unwrap(),
            ConfigValue::List(vec!["A=1".into(), "B=2".into(), "C=3".into()])
        );

        let missing = lxc.path().join("missing.conf");
        let err = c.load_config(Some(&missing)).await.unwrap_err();
        assert!(err.to_string().starts_with("Failed to load config file"));
    });
}

#[test]
fn started_container_sees_configured_environment() {
    let lxc = TestLxcPath::new();

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = host.get_container("c1", lookup()).await.unwrap();
        c.create(None, None, &[]).await.unwrap();
        c.start(&argv(&["sleep", "3600"])).await.unwrap();

        let process = c
            .attach("sh", &["-c".into(), "exit 3".into()], ProcessOptions::default())
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(10), process.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.exit_code, Some(3));

        c.stop().await.unwrap();
    });
}

// ============================================================================
// CGROUPS
// ============================================================================

#[test]
fn cgroup_items_need_a_running_container() {
    let lxc = TestLxcPath::new();

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = host.get_container("c1", lookup()).await.unwrap();
        c.create(None, None, &[]).await.unwrap();

        let err = c.get_cgroup_item("pids.max").unwrap_err();
        assert_eq!(err.to_string(), "Invalid cgroup key or container not running");
        assert!(c.set_cgroup_item("pids.max", "10").is_err());
    });
}
