//! AgentConnection against an in-process fake helper
//!
//! Covers the handshake and initial container listing, container change
//! notifications, spawn/wait exit routing, and the closed-forever behaviour
//! after the helper goes away.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeHelper, default_containers, description, eventually};
use ptyhost::connection::{AgentConnection, LeaderKind, RemoteProcess, SpawnRequest};
use ptyhost::Error;

async fn spawn_shell(connection: &Arc<AgentConnection>) -> RemoteProcess {
    let container = connection.registry().lookup("session").unwrap();
    let pty = connection.create_pty().await.unwrap();
    let producer = connection.create_pty_producer(&pty).await.unwrap();
    connection
        .spawn(SpawnRequest {
            container,
            cwd: None,
            argv: vec!["bash".to_string()],
            env: vec!["TERM=xterm-256color".to_string()],
            stdio: vec![(0, 0), (1, 0), (2, 0)],
            fds: vec![producer],
        })
        .await
        .unwrap()
}

// ============================================================================
// Containers
// ============================================================================

#[tokio::test]
async fn test_connect_populates_registry() {
    let (connection, _helper) = FakeHelper::start(default_containers()).await;
    let registry = connection.registry();

    assert_eq!(registry.len(), 2);
    let fedora = registry.lookup("fedora").unwrap();
    assert_eq!(fedora.provider, "toolbox");
    assert_eq!(fedora.path, "/containers/fedora");

    let visible: Vec<String> = registry
        .user_visible()
        .iter()
        .map(|c| c.id.clone())
        .collect();
    assert_eq!(visible, vec!["fedora".to_string()]);
}

#[tokio::test]
async fn test_container_changes_are_applied_in_order() {
    let (connection, helper) = FakeHelper::start(default_containers()).await;
    let registry = Arc::clone(connection.registry());

    helper
        .containers_changed(2, 0, vec![description("debian", "distrobox", "debian")])
        .await;
    assert!(eventually(|| registry.lookup("debian").is_some()).await);
    assert_eq!(registry.list()[2].id, "debian");

    helper.containers_changed(1, 1, Vec::new()).await;
    assert!(eventually(|| registry.lookup("fedora").is_none()).await);
    let ids: Vec<String> = registry.list().iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids, vec!["session".to_string(), "debian".to_string()]);
}

// ============================================================================
// Spawn and wait
// ============================================================================

#[tokio::test]
async fn test_spawn_passes_request_through() {
    let (connection, helper) = FakeHelper::start(default_containers()).await;
    let process = spawn_shell(&connection).await;

    assert_eq!(process.path, "/processes/1");
    let spawns = helper.spawns();
    assert_eq!(spawns.len(), 1);
    assert_eq!(spawns[0].target, "/containers/session");
    assert_eq!(spawns[0].argv, vec!["bash".to_string()]);
    assert_eq!(spawns[0].cwd, "");
    let dests: Vec<i32> = spawns[0].fds.iter().map(|m| m.dest).collect();
    assert_eq!(dests, vec![0, 1, 2]);
    assert!(spawns[0].fds.iter().all(|m| m.handle.0 == 0));
}

#[tokio::test]
async fn test_spawn_rejection_is_spawn_failed() {
    let (connection, helper) = FakeHelper::start(default_containers()).await;
    helper.state.lock().spawn_error = Some("exec failed: No such file".to_string());

    let container = connection.registry().lookup("session").unwrap();
    let err = connection
        .spawn(SpawnRequest {
            container,
            cwd: None,
            argv: vec!["missing".to_string()],
            env: Vec::new(),
            stdio: Vec::new(),
            fds: Vec::new(),
        })
        .await
        .unwrap_err();
    match err {
        Error::SpawnFailed(message) => assert!(message.contains("exec failed")),
        other => panic!("expected SpawnFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stdio_without_descriptor_is_rejected() {
    let (connection, helper) = FakeHelper::start(default_containers()).await;
    let container = connection.registry().lookup("session").unwrap();
    let err = connection
        .spawn(SpawnRequest {
            container,
            cwd: None,
            argv: vec!["bash".to_string()],
            env: Vec::new(),
            stdio: vec![(0, 3)],
            fds: Vec::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SpawnFailed(_)));
    assert!(helper.spawns().is_empty());
}

#[tokio::test]
async fn test_wait_reports_exit_code() {
    let (connection, helper) = FakeHelper::start(default_containers()).await;
    let process = spawn_shell(&connection).await;

    let waiter = {
        let connection = Arc::clone(&connection);
        let process = process.clone();
        tokio::spawn(async move { connection.wait(&process).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    helper.exit(&process.path, 3).await;

    let status = waiter.await.unwrap().unwrap();
    assert!(status.exited());
    assert_eq!(status.exit_code(), 3);
}

#[tokio::test]
async fn test_exit_before_wait_is_not_lost() {
    let (connection, helper) = FakeHelper::start(default_containers()).await;
    let process = spawn_shell(&connection).await;

    helper.exit(&process.path, 7).await;
    let status = connection.wait(&process).await.unwrap();
    assert_eq!(status.exit_code(), 7);
}

#[tokio::test]
async fn test_wait_reports_signal() {
    let (connection, helper) = FakeHelper::start(default_containers()).await;
    let process = spawn_shell(&connection).await;

    helper.kill(&process.path, libc::SIGKILL).await;
    let status = connection.wait(&process).await.unwrap();
    assert!(status.signaled());
    assert_eq!(status.term_sig(), libc::SIGKILL);
}

#[tokio::test]
async fn test_vanished_process_is_a_clean_exit() {
    let (connection, helper) = FakeHelper::start(default_containers()).await;
    let process = spawn_shell(&connection).await;

    helper.vanish(&process.path);
    let status = tokio::time::timeout(Duration::from_secs(2), connection.wait(&process))
        .await
        .expect("wait should give up after the grace period")
        .unwrap();
    assert!(status.success());
}

// ============================================================================
// Foreground and signals
// ============================================================================

#[tokio::test]
async fn test_foreground_query() {
    let (connection, helper) = FakeHelper::start(default_containers()).await;
    let process = spawn_shell(&connection).await;
    {
        let mut state = helper.state.lock();
        state.foreground.has_foreground_process = true;
        state.foreground.pid = 4242;
        state.foreground.command_line = "sudo vim /etc/hosts".to_string();
        state.foreground.leader_kind = "superuser".to_string();
    }

    let pty = connection.create_pty().await.unwrap();
    let info = connection
        .has_foreground_process(&process, Some(&pty))
        .await
        .unwrap();
    assert!(info.has_foreground_process);
    assert_eq!(info.pid, 4242);
    assert_eq!(info.command_line, "sudo vim /etc/hosts");
    assert_eq!(info.leader_kind, LeaderKind::Superuser);
}

#[tokio::test]
async fn test_send_signal() {
    let (connection, helper) = FakeHelper::start(default_containers()).await;
    let process = spawn_shell(&connection).await;

    connection.send_signal(&process, libc::SIGHUP).await.unwrap();
    assert_eq!(helper.signals(), vec![(process.path.clone(), libc::SIGHUP)]);
}

#[tokio::test]
async fn test_discover_current_container() {
    let (connection, helper) = FakeHelper::start(default_containers()).await;
    let pty = connection.create_pty().await.unwrap();

    assert!(connection.discover_current_container(&pty).await.unwrap().is_none());

    helper.state.lock().current_container = Some("fedora".to_string());
    let found = connection.discover_current_container(&pty).await.unwrap();
    assert_eq!(found.map(|c| c.id.clone()), Some("fedora".to_string()));
}

// ============================================================================
// Closed channel
// ============================================================================

#[tokio::test]
async fn test_helper_crash_closes_connection_for_good() {
    let (connection, helper) = FakeHelper::start(default_containers()).await;
    let process = spawn_shell(&connection).await;

    let waiter = {
        let connection = Arc::clone(&connection);
        let process = process.clone();
        tokio::spawn(async move { connection.wait(&process).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    helper.crash();
    tokio::time::timeout(Duration::from_secs(2), connection.closed())
        .await
        .expect("connection should notice the hangup");
    assert!(connection.is_closed());

    assert!(matches!(waiter.await.unwrap(), Err(Error::ConnectionClosed)));
    assert!(matches!(connection.ping().await, Err(Error::ConnectionClosed)));
    assert!(matches!(
        connection.create_pty().await,
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        connection.send_signal(&process, libc::SIGHUP).await,
        Err(Error::ConnectionClosed)
    ));
}
