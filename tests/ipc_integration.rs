//! Integration tests for IPC: socket server/client round-trip, malformed
//! input, endpoint ownership and concurrency.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use stopkran::decision::Outcome;
use stopkran::error::StopkranError;
use stopkran::ipc::socket_client::IpcClient;
use stopkran::ipc::socket_server::{HandlerFuture, IpcServer};
use stopkran::ipc::{IpcRequest, IpcResponse};

fn request(tool: &str) -> IpcRequest {
    IpcRequest {
        request_id: Some("hint-1".into()),
        session_id: "test-session".into(),
        tool_name: tool.into(),
        tool_input: serde_json::json!({"command": "echo hello"}),
        cwd: "/tmp".into(),
        permission_suggestions: Vec::new(),
    }
}

fn approve_all(req: IpcRequest) -> HandlerFuture {
    Box::pin(async move {
        Ok(IpcResponse::from(Outcome::Approved {
            updated_input: Some(serde_json::json!({"tool": req.tool_name})),
        }))
    })
}

async fn start_server<F>(socket_path: PathBuf, handler: F) -> Arc<IpcServer>
where
    F: Fn(IpcRequest) -> HandlerFuture + Send + Sync + 'static,
{
    let server = Arc::new(IpcServer::new(socket_path).with_read_timeout(Duration::from_secs(2)));
    let srv = server.clone();
    tokio::spawn(async move {
        let _ = srv.serve(handler).await;
    });
    // Wait for server to start
    tokio::time::sleep(Duration::from_millis(200)).await;
    server
}

// ---------------------------------------------------------------------------
// Message serialization
// ---------------------------------------------------------------------------

#[test]
fn ipc_request_defaults_optional_fields() {
    let req = IpcRequest::parse(r#"{"tool_name": "Bash"}"#).unwrap();
    assert_eq!(req.tool_name, "Bash");
    assert!(req.request_id.is_none());
    assert!(req.tool_input.is_null());
    assert!(req.permission_suggestions.is_empty());
}

#[test]
fn ipc_request_rejects_bad_shapes() {
    for line in [
        "not json",
        "{}",
        r#"{"tool_name": ""}"#,
        r#"{"tool_name": "Bash", "tool_input": "rm -rf /"}"#,
    ] {
        let err = IpcRequest::parse(line).unwrap_err();
        assert!(
            matches!(err, StopkranError::MalformedRequest { .. }),
            "{line} should be malformed"
        );
    }
}

#[test]
fn ipc_response_wire_format() {
    let json = serde_json::to_string(&IpcResponse::from(Outcome::Deferred)).unwrap();
    assert_eq!(json, r#"{"outcome":"deferred","note":"mediation paused"}"#);

    let json = serde_json::to_string(&IpcResponse::from(Outcome::errored("down"))).unwrap();
    assert_eq!(json, r#"{"outcome":"error","reason":"down"}"#);

    let parsed: IpcResponse = serde_json::from_str(r#"{"outcome":"timed_out"}"#).unwrap();
    assert_eq!(parsed.outcome, Outcome::TimedOut);
    assert!(parsed.note.is_none());
}

// ---------------------------------------------------------------------------
// Socket server/client round-trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ipc_server_client_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("test.sock");
    let server = start_server(socket_path.clone(), approve_all).await;

    let client = IpcClient::new(socket_path.clone(), 5);
    let response = client.request(&request("Bash")).await.unwrap();
    assert_eq!(
        response.outcome,
        Outcome::Approved {
            updated_input: Some(serde_json::json!({"tool": "Bash"}))
        }
    );

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn ipc_socket_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("perm.sock");
    let server = start_server(socket_path.clone(), approve_all).await;

    let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn ipc_multiple_sequential_requests() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("multi.sock");
    let server = start_server(socket_path.clone(), approve_all).await;

    let client = IpcClient::new(socket_path.clone(), 5);
    for tool in &["Bash", "Write", "Read", "Edit"] {
        let response = client.request(&request(tool)).await.unwrap();
        assert_eq!(
            response.outcome,
            Outcome::Approved {
                updated_input: Some(serde_json::json!({"tool": tool}))
            }
        );
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn ipc_slow_requests_do_not_block_each_other() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("slow.sock");

    let handler = |req: IpcRequest| -> HandlerFuture {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            approve_all(req).await
        })
    };
    let server = start_server(socket_path.clone(), handler).await;

    let started = std::time::Instant::now();
    let mut tasks = Vec::new();
    for i in 0..20 {
        let path = socket_path.clone();
        tasks.push(tokio::spawn(async move {
            let client = IpcClient::new(path, 5);
            client.request(&request(&format!("Tool{i}"))).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    // Serial handling would take 20 * 300ms.
    assert!(started.elapsed() < Duration::from_secs(3));

    server.shutdown().await.unwrap();
}

// ---------------------------------------------------------------------------
// Malformed input
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ipc_malformed_request_gets_error_and_skips_handler() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("bad.sock");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = move |req: IpcRequest| -> HandlerFuture {
        counter.fetch_add(1, Ordering::SeqCst);
        approve_all(req)
    };
    let server = start_server(socket_path.clone(), handler).await;

    let client = IpcClient::new(socket_path.clone(), 5);
    let response = client.request_raw("{this is not json").await.unwrap();
    match response.outcome {
        Outcome::Errored { reason } => assert!(reason.contains("malformed request")),
        other => panic!("expected error, got {other:?}"),
    }

    let response = client.request_raw(r#"{"tool_name": ""}"#).await.unwrap();
    assert!(matches!(response.outcome, Outcome::Errored { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // The server is still healthy afterwards.
    let response = client.request(&request("Bash")).await.unwrap();
    assert!(matches!(response.outcome, Outcome::Approved { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn ipc_client_disconnect_does_not_break_server() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("gone.sock");

    let handler = |req: IpcRequest| -> HandlerFuture {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            approve_all(req).await
        })
    };
    let server = start_server(socket_path.clone(), handler).await;

    {
        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let line = serde_json::to_string(&request("Bash")).unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        // Dropped before the response is written.
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    let client = IpcClient::new(socket_path.clone(), 5);
    assert!(client.request(&request("Bash")).await.is_ok());

    server.shutdown().await.unwrap();
}

// ---------------------------------------------------------------------------
// Endpoint ownership
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ipc_second_server_on_live_socket_fails_to_bind() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("live.sock");
    let server = start_server(socket_path.clone(), approve_all).await;

    let second = IpcServer::new(socket_path.clone());
    match second.bind().await {
        Err(StopkranError::Bind { reason, .. }) => assert!(reason.contains("already running")),
        other => panic!("expected bind error, got {:?}", other.map(|_| ())),
    }

    // The first instance keeps working.
    let client = IpcClient::new(socket_path.clone(), 5);
    assert!(client.request(&request("Bash")).await.is_ok());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn ipc_stale_socket_file_is_replaced() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("stale.sock");

    // A listener that is dropped leaves its socket file behind.
    drop(std::os::unix::net::UnixListener::bind(&socket_path).unwrap());
    assert!(socket_path.exists());

    let server = start_server(socket_path.clone(), approve_all).await;
    let client = IpcClient::new(socket_path.clone(), 5);
    assert!(client.request(&request("Bash")).await.is_ok());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn ipc_shutdown_removes_socket_file() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("bye.sock");
    let server = start_server(socket_path.clone(), approve_all).await;
    assert!(socket_path.exists());

    server.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!socket_path.exists());
}

#[tokio::test]
async fn ipc_force_close_after_grace_answers_timed_out() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("grace.sock");

    let handler = |_req: IpcRequest| -> HandlerFuture {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(IpcResponse::from(Outcome::Denied))
        })
    };
    let server = Arc::new(
        IpcServer::new(socket_path.clone()).with_grace_period(Duration::from_millis(200)),
    );
    let srv = server.clone();
    let serve = tokio::spawn(async move { srv.serve(handler).await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = IpcClient::new(socket_path.clone(), 5);
    let pending = tokio::spawn(async move { client.request(&request("Bash")).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.shutdown().await.unwrap();
    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.outcome, Outcome::TimedOut);
    assert!(serve.await.unwrap().is_ok());
}

// ---------------------------------------------------------------------------
// Client error cases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ipc_client_nonexistent_socket_errors() {
    let client = IpcClient::new(PathBuf::from("/tmp/nonexistent-stopkran-test.sock"), 1);
    let result = client.request(&request("Bash")).await;
    assert!(matches!(result, Err(StopkranError::SocketNotFound { .. })));
}

#[tokio::test]
async fn ipc_client_times_out_on_silent_server() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("silent.sock");

    let handler = |_req: IpcRequest| -> HandlerFuture {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(IpcResponse::from(Outcome::Denied))
        })
    };
    let server = start_server(socket_path.clone(), handler).await;

    let client = IpcClient::new(socket_path.clone(), 1);
    let result = client.request(&request("Bash")).await;
    assert!(matches!(result, Err(StopkranError::DaemonTimeout { timeout_secs: 1 })));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn ipc_client_reports_connection_closed_without_answer() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("mute.sock");

    let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let client = IpcClient::new(socket_path.clone(), 5);
    match client.request(&request("Bash")).await {
        Err(StopkranError::Ipc { reason }) => assert!(reason.contains("without answering")),
        other => panic!("expected ipc error, got {:?}", other.map(|r| r.outcome)),
    }
}
