//! Drives a helper served in-process over a real socket pair.

use std::time::Duration;

use ptyhost_ipc::protocol::{
    ContainerDescription, CreatePtyProducerParams, CreatePtyProducerResult, CreatePtyResult,
    Empty, FdMapping, ForegroundProcessParams, InitializeParams, InitializeResult,
    ListContainersResult, ProcessExited, SpawnParams, SpawnResult, Target, container_path,
    methods,
};
use ptyhost_ipc::{Connection, FdList, Handle, IncomingMessage, IpcError, RpcError, socket_pair};
use tokio::sync::mpsc::UnboundedReceiver;

async fn connect() -> (Connection, UnboundedReceiver<IncomingMessage>) {
    let (ours, theirs) = socket_pair().unwrap();
    tokio::spawn(ptyhost_agent::serve(theirs));
    Connection::new(ours).unwrap()
}

async fn producer_for(rpc: &Connection) -> (FdList, std::os::fd::OwnedFd) {
    let (created, fds): (CreatePtyResult, FdList) = rpc
        .call_as(methods::CREATE_PTY, &Empty {}, FdList::new())
        .await
        .unwrap();
    let consumer = fds.get(created.pty).unwrap();

    let mut outgoing = FdList::new();
    let pty = outgoing.push(consumer.try_clone().unwrap());
    let (produced, fds): (CreatePtyProducerResult, FdList) = rpc
        .call_as(
            methods::CREATE_PTY_PRODUCER,
            &CreatePtyProducerParams { pty },
            outgoing,
        )
        .await
        .unwrap();
    let producer = fds.get(produced.producer).unwrap();
    let mut attached = FdList::new();
    attached.push(producer);
    (attached, consumer)
}

#[tokio::test]
async fn test_handshake_echoes_guid() {
    let (rpc, _incoming) = connect().await;
    let (result, _): (InitializeResult, FdList) = rpc
        .call_as(
            methods::INITIALIZE,
            &InitializeParams {
                guid: "0b4c7f1e".to_string(),
                protocol_version: ptyhost_ipc::protocol::PROTOCOL_VERSION,
            },
            FdList::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.guid, "0b4c7f1e");
}

#[tokio::test]
async fn test_handshake_rejects_other_versions() {
    let (rpc, _incoming) = connect().await;
    let err = rpc
        .call(
            methods::INITIALIZE,
            &InitializeParams {
                guid: "x".to_string(),
                protocol_version: 99,
            },
            FdList::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IpcError::Remote { code, .. } if code == RpcError::FAILED));
}

#[tokio::test]
async fn test_session_container_is_listed_first() {
    let (rpc, _incoming) = connect().await;
    let (listed, _): (ListContainersResult, FdList) = rpc
        .call_as(methods::LIST_CONTAINERS, &Empty {}, FdList::new())
        .await
        .unwrap();
    assert_eq!(listed.containers[0], container_path("session"));

    let (desc, _): (ContainerDescription, FdList) = rpc
        .call_as(
            methods::CONTAINER_DESCRIBE,
            &Target {
                target: listed.containers[0].clone(),
            },
            FdList::new(),
        )
        .await
        .unwrap();
    assert_eq!(desc.id, "session");
    assert_eq!(desc.display_name, "My Computer");
}

#[tokio::test]
async fn test_unknown_method_is_reported() {
    let (rpc, _incoming) = connect().await;
    let err = rpc
        .call("agent.doesNotExist", &Empty {}, FdList::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IpcError::Remote { code, .. } if code == RpcError::METHOD_NOT_FOUND));
}

#[tokio::test]
async fn test_spawn_then_exit_notification() {
    let (rpc, mut incoming) = connect().await;
    let (fds, _consumer) = producer_for(&rpc).await;

    let params = SpawnParams {
        target: container_path("session"),
        cwd: String::new(),
        argv: vec!["sh".into(), "-c".into(), "exit 7".into()],
        fds: (0..3)
            .map(|dest| FdMapping {
                dest,
                handle: Handle(0),
            })
            .collect(),
        env: vec!["TERM=xterm-256color".into()],
    };
    let (spawned, _): (SpawnResult, FdList) = rpc
        .call_as(methods::CONTAINER_SPAWN, &params, fds)
        .await
        .unwrap();
    assert!(spawned.process.starts_with("/processes/"));

    let msg = tokio::time::timeout(Duration::from_secs(10), incoming.recv())
        .await
        .expect("no exit notification")
        .unwrap();
    assert_eq!(msg.method, methods::PROCESS_EXITED);
    let exited: ProcessExited = msg.params().unwrap();
    assert_eq!(exited.process, spawned.process);
    assert_eq!(exited.exit_code, 7);

    // The process object is dropped right after its exit was reported.
    let mut last = None;
    for _ in 0..50 {
        let probe = rpc
            .call(
                methods::PROCESS_HAS_FOREGROUND,
                &ForegroundProcessParams {
                    target: spawned.process.clone(),
                    pty: Handle::NONE,
                },
                FdList::new(),
            )
            .await;
        match probe {
            Ok(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            Err(e) => {
                last = Some(e);
                break;
            }
        }
    }
    assert!(
        matches!(last, Some(IpcError::Remote { code, .. }) if code == RpcError::UNKNOWN_OBJECT)
    );
}

#[tokio::test]
async fn test_spawn_into_unknown_container_fails() {
    let (rpc, _incoming) = connect().await;
    let params = SpawnParams {
        target: container_path("missing"),
        cwd: String::new(),
        argv: vec!["true".into()],
        fds: Vec::new(),
        env: Vec::new(),
    };
    let err = rpc
        .call(methods::CONTAINER_SPAWN, &params, FdList::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IpcError::Remote { code, .. } if code == RpcError::UNKNOWN_OBJECT));
}
