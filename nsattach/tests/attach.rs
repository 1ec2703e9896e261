//! Integration tests for attaching processes to running containers.
//!
//! Containers run on the host filesystem without namespaces of their own,
//! so these tests run unprivileged.

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;
use std::time::Duration;

use nix::sys::signal::Signal;
use nsattach::{
    Container, ExitEvent, GetOptions, Host, NsattachError, OpenOptions, ProcessOptions,
    ProcessState, TerminalSize,
};
use nsattach_test_utils::{TestLxcPath, define_container, run_local, started_container};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// ============================================================================
// TEST FIXTURES
// ============================================================================

fn sh(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

async fn container(host: &Host, name: &str) -> Container {
    host.get_container(name, GetOptions::default())
        .await
        .expect("Failed to get container")
}

async fn read_all(process: &nsattach::AttachedProcess, slot: usize) -> String {
    let mut stream = process
        .take_stdio(slot)
        .expect("slot already taken")
        .expect("Failed to wrap stream");
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}

// ============================================================================
// EXIT STATUS
// ============================================================================

#[test]
fn attach_reports_exit_code() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let process = c.attach("sh", &sh("exit 7"), ProcessOptions::default()).unwrap();
        assert!(matches!(process.state(), ProcessState::Pending));

        let pid = within(process.wait_attached()).await.unwrap();
        assert!(pid > 0);
        assert_eq!(process.pid(), Some(pid));

        let event = within(process.wait()).await.unwrap();
        assert_eq!(event, ExitEvent::exited(7));
        assert!(!host.is_tracked(pid));
    });
}

#[test]
fn attach_reports_signal_name() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let process = c
            .attach("sleep", &["30".to_string()], ProcessOptions::default())
            .unwrap();
        within(process.wait_attached()).await.unwrap();
        assert!(process.kill(Signal::SIGKILL).unwrap());

        let event = within(process.wait()).await.unwrap();
        assert_eq!(event.exit_code, None);
        assert_eq!(event.signal.as_deref(), Some("SIGKILL"));

        // Already reaped
        assert!(!process.kill(Signal::SIGTERM).unwrap());
    });
}

#[test]
fn exec_failure_is_reported_as_negative_errno() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let seen = events.clone();
        host.set_exit_callback(move |process, event| {
            seen.borrow_mut()
                .push((process.spawnfile().to_string(), event.clone()));
        });

        let c = container(&host, "c1").await;
        let process = c
            .attach("/nonexistent/program", &[], ProcessOptions::default())
            .unwrap();

        match within(process.wait_attached()).await {
            Err(NsattachError::Spawn { program, errno }) => {
                assert_eq!(program, "/nonexistent/program");
                assert_eq!(errno, libc::ENOENT);
            }
            other => panic!("expected spawn error, got {:?}", other),
        }

        let event = within(process.wait()).await.unwrap();
        assert_eq!(event.exit_code, Some(-libc::ENOENT));
        assert_eq!(event.exec_errno(), Some(libc::ENOENT));

        let events = events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "/nonexistent/program");
        assert_eq!(events[0].1, ExitEvent::exec_failed(libc::ENOENT));
    });
}

// ============================================================================
// PRECONDITIONS
// ============================================================================

#[test]
fn attach_to_stopped_container_fails() {
    let lxc = TestLxcPath::new();
    define_container(lxc.path(), "c1");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let process = c.attach("true", &[], ProcessOptions::default()).unwrap();
        let err = within(process.wait_attached()).await.unwrap_err();
        assert!(matches!(err, NsattachError::NotRunning));
        assert_eq!(err.to_string(), "Container is not running");
        assert!(matches!(process.state(), ProcessState::Failed(_)));
        assert!(process.pid().is_none());
    });
}

#[test]
fn attach_to_undefined_container_fails() {
    let lxc = TestLxcPath::new();

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let options = GetOptions {
            defined: false,
            ..Default::default()
        };
        let c = host.get_container("ghost", options).await.unwrap();

        let process = c.attach("true", &[], ProcessOptions::default()).unwrap();
        let err = within(process.wait()).await.unwrap_err();
        assert!(matches!(err, NsattachError::NotDefined));
    });
}

// ============================================================================
// STDIO
// ============================================================================

#[test]
fn stdin_and_stdout_are_connected() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let process = c.attach("cat", &[], ProcessOptions::default()).unwrap();
        let mut stdin = process.stdin().unwrap().unwrap();
        stdin.write_all(b"hello from the host\n").await.unwrap();
        stdin.shutdown().await.unwrap();
        drop(stdin);

        let out = within(read_all(&process, 1)).await;
        assert_eq!(out, "hello from the host\n");
        assert!(within(process.wait()).await.unwrap().success());
    });
}

#[test]
fn concurrent_attaches_have_independent_stdio() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let processes: Vec<_> = (0..4)
            .map(|i| {
                c.attach("sh", &sh(&format!("echo out-{i}; echo err-{i} >&2")), ProcessOptions::default())
                    .unwrap()
            })
            .collect();

        for (i, process) in processes.iter().enumerate() {
            assert_eq!(within(read_all(process, 1)).await, format!("out-{i}\n"));
            assert_eq!(within(read_all(process, 2)).await, format!("err-{i}\n"));
            assert!(within(process.wait()).await.unwrap().success());
        }

        let pids: std::collections::HashSet<_> =
            processes.iter().map(|p| p.pid().unwrap()).collect();
        assert_eq!(pids.len(), 4);
    });
}

#[test]
fn environment_and_working_directory_are_applied() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");
    let workdir = tempfile::TempDir::new().unwrap();

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let options = ProcessOptions::default()
            .cwd(workdir.path())
            .env("GREETING", "hi");
        let process = c.attach("sh", &sh("echo $GREETING; pwd"), options).unwrap();

        let out = within(read_all(&process, 1)).await;
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("hi"));
        assert_eq!(
            std::fs::canonicalize(lines.next().unwrap()).unwrap(),
            std::fs::canonicalize(workdir.path()).unwrap()
        );
        within(process.wait()).await.unwrap();
    });
}

#[test]
fn extra_streams_are_installed_after_stdio() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let options = ProcessOptions::default().streams(2);
        let process = c
            .attach("sh", &sh("echo three >&3; echo four >&4"), options)
            .unwrap();
        assert_eq!(process.stream_count(), 5);

        assert_eq!(within(read_all(&process, 3)).await, "three\n");
        assert_eq!(within(read_all(&process, 4)).await, "four\n");
        assert!(within(process.wait()).await.unwrap().success());
    });
}

// ============================================================================
// TERMINAL
// ============================================================================

#[test]
fn terminal_stdio_is_a_tty() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let options = ProcessOptions::default().terminal(TerminalSize::new(100, 30));
        let process = c
            .attach("sh", &sh("test -t 0 && test -t 1 && test -t 2"), options)
            .unwrap();
        assert!(process.is_terminal());

        let event = within(process.wait()).await.unwrap();
        assert_eq!(event, ExitEvent::exited(0));
    });
}

#[test]
fn terminal_resize() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let options = ProcessOptions::default().terminal(TerminalSize::new(100, 30));
        let process = c
            .attach("sleep", &["30".to_string()], options)
            .unwrap();
        within(process.wait_attached()).await.unwrap();
        assert_eq!(process.window_size().unwrap(), TerminalSize::new(100, 30));

        process.resize(80, 24).unwrap();
        assert_eq!(process.window_size().unwrap(), TerminalSize::new(80, 24));

        process.kill(Signal::SIGKILL).unwrap();
        within(process.wait()).await.unwrap();
    });
}

#[test]
fn resize_without_terminal_fails() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let process = c.attach("true", &[], ProcessOptions::default()).unwrap();
        assert!(matches!(
            process.resize(80, 24),
            Err(NsattachError::InvalidArgument(_))
        ));
        within(process.wait()).await.unwrap();
    });
}

// ============================================================================
// KEEP-ALIVE
// ============================================================================

#[test]
fn run_waits_for_referenced_processes() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let process = c
            .attach("sleep", &["0.2".to_string()], ProcessOptions::default())
            .unwrap();
        assert!(host.is_busy());

        within(host.run()).await;
        assert!(process.exit_event().is_some());
        assert!(!host.is_busy());
    });
}

#[test]
fn unref_lets_the_host_finish() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let process = c
            .attach("sleep", &["30".to_string()], ProcessOptions::default())
            .unwrap();
        let pid = within(process.wait_attached()).await.unwrap();

        process.unref();
        within(host.run()).await;
        assert!(host.is_tracked(pid));
        assert!(process.exit_event().is_none());

        // Referencing again keeps the host busy until the process is gone
        assert!(host.ref_pid(pid));
        assert!(host.is_busy());

        process.kill(Signal::SIGKILL).unwrap();
        within(host.run()).await;
        assert_eq!(process.exit_event().unwrap().signal.as_deref(), Some("SIGKILL"));
        assert!(!host.unref_pid(pid));
    });
}

// ============================================================================
// OPEN FILE
// ============================================================================

#[test]
fn open_file_reads_through_the_container() {
    let lxc = TestLxcPath::new();
    let _init = started_container(lxc.path(), "c1");
    let data = tempfile::TempDir::new().unwrap();
    let file = data.path().join("motd");
    std::fs::write(&file, "welcome\n").unwrap();

    run_local(async {
        let host = Host::new(lxc.options()).unwrap();
        let c = container(&host, "c1").await;

        let options = OpenOptions {
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            ..OpenOptions::from_flags("r").unwrap()
        };
        let mut opened = within(c.open_file(&file, options)).await.unwrap();
        let mut content = String::new();
        opened.read_to_string(&mut content).unwrap();
        assert_eq!(content, "welcome\n");

        let missing = data.path().join("missing");
        match within(c.open_file(&missing, options)).await {
            Err(NsattachError::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::NotFound),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    });
}
