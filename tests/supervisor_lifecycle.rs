#![cfg(unix)]

use pretty_assertions::assert_eq;
use serial_test::serial;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use studydesk::platform;
use studydesk::supervisor::backend_executable;
use studydesk::{
    BackendSupervisor, LifecycleState, ReadinessFallback, StartOutcome, StopReport,
    SupervisorConfig, SupervisorError,
};
use tempfile::TempDir;

/// Write a fake backend at `<root>/backend/app` running `body` under sh.
fn make_backend(root: &TempDir, body: &str) -> PathBuf {
    let path = backend_executable(root.path());
    fs::create_dir_all(path.parent().expect("backend dir")).expect("create backend dir");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write backend stub");

    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("set permissions");
    path
}

fn supervisor(path: PathBuf) -> BackendSupervisor {
    BackendSupervisor::new(SupervisorConfig::executable(path))
}

const FLASK_LIKE: &str = r#"
trap 'exit 0' TERM
sleep 0.05
echo " * Serving Flask app 'app'"
echo " * Debug mode: on"
echo " * Running on http://127.0.0.1:5000" >&2
while true; do sleep 0.1; done
"#;

#[tokio::test]
#[serial]
async fn ready_marker_resolves_start_and_stop_is_graceful() {
    let root = TempDir::new().expect("temp dir");
    let backend = supervisor(make_backend(&root, FLASK_LIKE));

    let outcome = backend.start().await.expect("backend starts");
    let StartOutcome::Ready { pid, elapsed } = outcome else {
        panic!("expected Ready, got {outcome:?}");
    };
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    assert_eq!(backend.state(), LifecycleState::Ready);
    assert_eq!(backend.pid().await, Some(pid));
    assert!(platform::process_alive(pid));

    let snapshot = backend.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.pid, pid);
    assert_eq!(snapshot.exit, None);

    let started = Instant::now();
    let report = backend.stop().await;
    assert_eq!(report, StopReport::Graceful { pid, code: Some(0) });
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(backend.state(), LifecycleState::Terminated);
    assert_eq!(backend.pid().await, None);
}

#[tokio::test]
#[serial]
async fn port_conflict_on_stderr_fails_start() {
    let root = TempDir::new().expect("temp dir");
    let backend = supervisor(make_backend(
        &root,
        r#"echo "OSError: [Errno 98] Address already in use" >&2
sleep 30"#,
    ));

    let err = backend.start().await.unwrap_err();
    match err {
        SupervisorError::PortConflict { detail } => {
            assert!(detail.contains("Address already in use"), "{detail}")
        }
        other => panic!("expected PortConflict, got {other:?}"),
    }
    assert_eq!(backend.state(), LifecycleState::Failed);
    // the half-started child was cleaned up
    assert_eq!(backend.pid().await, None);
    assert_eq!(backend.stop().await, StopReport::NotRunning);
}

#[tokio::test]
#[serial]
async fn exit_before_ready_reports_code() {
    let root = TempDir::new().expect("temp dir");
    let backend = supervisor(make_backend(&root, "exit 3"));

    let started = Instant::now();
    let err = backend.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::PrematureExit { code: Some(3) }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(backend.state(), LifecycleState::Failed);
}

#[tokio::test]
#[serial]
async fn missing_executable_is_a_spawn_failure() {
    let root = TempDir::new().expect("temp dir");
    let backend = supervisor(backend_executable(root.path()));

    let err = backend.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::ExecutableNotFound { .. }), "{err:?}");
    assert_eq!(backend.stop().await, StopReport::NotRunning);
}

#[tokio::test]
#[serial]
async fn second_start_is_rejected() {
    let root = TempDir::new().expect("temp dir");
    let backend = supervisor(make_backend(&root, FLASK_LIKE));

    let pid = backend
        .start()
        .await
        .expect("first start")
        .pid()
        .expect("pid");
    let err = backend.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning { pid: running } if running == pid));

    backend.stop().await;
    let err = backend.start().await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::AlreadyStarted {
            state: LifecycleState::Terminated
        }
    ));
}

#[tokio::test]
#[serial]
async fn stop_is_idempotent() {
    let root = TempDir::new().expect("temp dir");
    let backend = supervisor(make_backend(&root, FLASK_LIKE));
    assert_eq!(backend.stop().await, StopReport::NotRunning);

    backend.start().await.expect("start");
    assert!(matches!(backend.stop().await, StopReport::Graceful { .. }));
    assert_eq!(backend.stop().await, StopReport::NotRunning);
    assert_eq!(backend.state(), LifecycleState::Terminated);
}

#[tokio::test]
#[serial]
async fn backend_ignoring_sigterm_is_killed_after_grace() {
    let root = TempDir::new().expect("temp dir");
    let path = make_backend(
        &root,
        r#"trap '' TERM
echo " * Running on http://127.0.0.1:5000"
while true; do sleep 0.1; done"#,
    );
    let backend = BackendSupervisor::new(
        SupervisorConfig::executable(path).with_grace(Duration::from_millis(300)),
    );

    let pid = backend.start().await.expect("start").pid().expect("pid");
    let started = Instant::now();
    assert_eq!(backend.stop().await, StopReport::Forced { pid });
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
    assert!(!platform::process_alive(pid));
}

#[tokio::test]
#[serial]
async fn silent_backend_is_assumed_ready_after_timeout() {
    let root = TempDir::new().expect("temp dir");
    let path = make_backend(&root, "exec sleep 30");
    let backend = BackendSupervisor::new(
        SupervisorConfig::executable(path).with_readiness_timeout(Duration::from_millis(300)),
    );

    let started = Instant::now();
    let outcome = backend.start().await.expect("optimistic start");
    assert!(matches!(outcome, StartOutcome::AssumedReady { .. }), "{outcome:?}");
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(backend.state(), LifecycleState::Ready);
    assert!(matches!(backend.stop().await, StopReport::Graceful { .. }));
}

#[tokio::test]
#[serial]
async fn probe_fallback_fails_when_nothing_answers() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let root = TempDir::new().expect("temp dir");
    let path = make_backend(&root, "exec sleep 30");
    let backend = BackendSupervisor::new(
        SupervisorConfig::executable(path)
            .with_readiness_timeout(Duration::from_millis(300))
            .with_fallback(ReadinessFallback::Probe, format!("http://127.0.0.1:{port}")),
    );

    let err = backend.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::ReadinessTimeout { timeout_ms: 300 }), "{err:?}");
    assert_eq!(backend.state(), LifecycleState::Failed);
    assert_eq!(backend.pid().await, None);
}

#[tokio::test]
#[serial]
async fn backend_dying_after_ready_is_reported_by_stop() {
    let root = TempDir::new().expect("temp dir");
    let backend = supervisor(make_backend(
        &root,
        r#"echo " * Running on http://127.0.0.1:5000"
sleep 0.2
exit 4"#,
    ));

    let pid = backend.start().await.expect("start").pid().expect("pid");
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(
        backend.stop().await,
        StopReport::AlreadyExited { pid, code: Some(4) }
    );
}

#[tokio::test]
#[serial]
async fn chatty_backend_keeps_running_after_ready() {
    let root = TempDir::new().expect("temp dir");
    // far more output than a pipe buffer holds
    let backend = supervisor(make_backend(
        &root,
        r#"trap 'exit 0' TERM
echo " * Running on http://127.0.0.1:5000"
i=0
while [ $i -lt 4000 ]; do
  echo "127.0.0.1 - - \"GET /api/tasks HTTP/1.1\" 200 - request number $i" >&2
  i=$((i+1))
done
while true; do sleep 0.1; done"#,
    ));

    let pid = backend.start().await.expect("start").pid().expect("pid");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(platform::process_alive(pid));
    assert_eq!(
        backend.snapshot().await.expect("snapshot").exit,
        None
    );
    assert!(matches!(backend.stop().await, StopReport::Graceful { .. }));
}

// Output and exit are read by different tasks; on a multi-thread runtime the
// exit must still be classified after everything the backend printed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn port_conflict_then_immediate_exit_is_a_port_conflict() {
    for attempt in 0..100 {
        let root = TempDir::new().expect("temp dir");
        let backend = supervisor(make_backend(
            &root,
            r#"echo "OSError: [Errno 98] Address already in use" >&2
exit 1"#,
        ));

        let err = backend.start().await.unwrap_err();
        assert!(
            matches!(err, SupervisorError::PortConflict { .. }),
            "attempt {attempt}: {err:?}"
        );
        assert_eq!(backend.state(), LifecycleState::Failed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn ready_marker_then_immediate_exit_still_counts_as_ready() {
    for attempt in 0..50 {
        let root = TempDir::new().expect("temp dir");
        let backend = supervisor(make_backend(
            &root,
            r#"echo " * Running on http://127.0.0.1:5000"
exit 0"#,
        ));

        let outcome = backend.start().await;
        assert!(
            matches!(outcome, Ok(StartOutcome::Ready { .. })),
            "attempt {attempt}: {outcome:?}"
        );
        backend.stop().await;
    }
}

#[tokio::test]
#[serial]
async fn exited_resolves_when_the_backend_dies() {
    let root = TempDir::new().expect("temp dir");
    let backend = supervisor(make_backend(
        &root,
        r#"echo " * Running on http://127.0.0.1:5000"
sleep 0.2
exit 4"#,
    ));

    backend.start().await.expect("start");
    let exit = tokio::time::timeout(Duration::from_secs(5), backend.exited())
        .await
        .expect("backend exit observed");
    assert_eq!(exit.code, Some(4));
}

#[tokio::test]
#[serial]
async fn exited_never_resolves_without_a_process() {
    let root = TempDir::new().expect("temp dir");
    let backend = supervisor(backend_executable(root.path()));

    let waited = tokio::time::timeout(Duration::from_millis(200), backend.exited()).await;
    assert!(waited.is_err());
}
