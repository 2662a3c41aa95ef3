use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use byteme_core::{ExecutionOutcome, FrameStatus, StatusFrame};
use byteme_gateway::app::{AppServices, build_app, build_services};
use byteme_gateway::session::SessionConfig;
use byteme_infra::config::{Backend, PollSettings, Settings};
use byteme_infra::queue::InMemoryJobQueue;
use byteme_infra::result_store::{InMemoryResultStore, ResultStore, StoreError};
use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use tokio::net::TcpStream;
use tokio::sync::mpsc::unbounded_channel;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    base_url: String,
    ws_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(services: AppServices) -> Self {
        byteme_observability::tracing::init_for_tests();

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);
        let ws_url = format!("ws://{}/ws", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            ws_url,
            handle,
        }
    }

    async fn connect(&self) -> Client {
        let (client, _) = tokio_tungstenite::connect_async(self.ws_url.as_str())
            .await
            .expect("websocket handshake failed");
        client
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn in_memory_services() -> AppServices {
    AppServices::new(
        Arc::new(InMemoryJobQueue::default()),
        Arc::new(InMemoryResultStore::new()),
        SessionConfig::default(),
    )
}

/// Memory backend whose embedded workers run submissions with `sh`.
fn shell_settings() -> Settings {
    Settings {
        backend: Backend::Memory,
        interpreter: "sh".to_string(),
        poll: PollSettings {
            interval: Duration::from_millis(50),
            attempts: 100,
        },
        workers: 2,
        ..Settings::default()
    }
}

#[tokio::test]
async fn health_is_ok() {
    let server = TestServer::spawn(in_memory_services()).await;

    let res = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn ws_endpoint_requires_upgrade() {
    let server = TestServer::spawn(in_memory_services()).await;

    let res = reqwest::get(format!("{}/ws", server.base_url)).await.unwrap();
    assert!(res.status().is_client_error());
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let server = TestServer::spawn(in_memory_services()).await;

    let res = reqwest::get(format!("{}/nope", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[cfg(unix)]
#[tokio::test]
async fn memory_backend_runs_submissions_end_to_end() {
    let (services, workers) = build_services(&shell_settings()).unwrap();
    let (tx, mut rx) = unbounded_channel::<StatusFrame>();
    let session = services.session(tx);

    session.open().await.unwrap();
    session
        .handle_text(r#"{"code":"echo hi","timestamp":"e2e-1"}"#)
        .await
        .unwrap();
    session
        .handle_text(r#"{"code":"echo boom >&2; exit 4","timestamp":"e2e-2"}"#)
        .await
        .unwrap();

    let mut completed = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if frame.status == FrameStatus::Completed {
            completed.push(frame.result.unwrap_or_default());
        }
    }
    assert_eq!(completed, vec!["hi\n".to_string(), "boom\n".to_string()]);

    for worker in workers {
        worker.shutdown().await;
    }
}

/// Next server message, decoded as a status frame.
async fn next_frame(client: &mut Client) -> StatusFrame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no message within 5s")
            .expect("connection ended")
            .expect("websocket error");
        match message {
            Message::Text(text) => return serde_json::from_str(&text).expect("undecodable frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

async fn submit(client: &mut Client, code: &str, timestamp: &str) {
    let text = format!(r#"{{"code":"{code}","timestamp":"{timestamp}"}}"#);
    client.send(Message::Text(text)).await.unwrap();
}

/// Services whose store already holds an outcome for job `ts-done`.
async fn services_with_stored_result() -> AppServices {
    let store = Arc::new(InMemoryResultStore::new());
    let outcome = ExecutionOutcome::new("hi\n", "", 0).to_json().unwrap();
    store
        .set("result:ts-done", &outcome, Duration::from_secs(60))
        .await
        .unwrap();
    AppServices::new(Arc::new(InMemoryJobQueue::default()), store, SessionConfig::default())
}

#[tokio::test]
async fn store_down_at_connect_sends_error_and_closes() {
    let store = Arc::new(InMemoryResultStore::new());
    store.set_offline(true);
    let services = AppServices::new(Arc::new(InMemoryJobQueue::default()), store, SessionConfig::default());
    let server = TestServer::spawn(services).await;
    let mut client = server.connect().await;

    let frame = next_frame(&mut client).await;
    assert_eq!(frame.status, FrameStatus::Error);

    let after = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("connection left open");
    assert!(
        matches!(after, None | Some(Ok(Message::Close(_))) | Some(Err(_))),
        "expected close, got {after:?}"
    );
}

#[tokio::test]
async fn non_utf8_binary_frame_is_reported_and_connection_survives() {
    let server = TestServer::spawn(services_with_stored_result().await).await;
    let mut client = server.connect().await;

    client.send(Message::Binary(vec![0xff, 0xfe, 0xfd])).await.unwrap();
    let frame = next_frame(&mut client).await;
    assert_eq!(frame.status, FrameStatus::Error);

    submit(&mut client, "print(1)", "ts-done").await;
    assert_eq!(next_frame(&mut client).await.status, FrameStatus::Received);
    let done = next_frame(&mut client).await;
    assert_eq!(done.status, FrameStatus::Completed);
    assert_eq!(done.result.as_deref(), Some("hi\n"));
}

#[tokio::test]
async fn utf8_binary_frame_is_treated_as_text() {
    let server = TestServer::spawn(services_with_stored_result().await).await;
    let mut client = server.connect().await;

    let text = r#"{"code":"print(1)","timestamp":"ts-done"}"#;
    client.send(Message::Binary(text.as_bytes().to_vec())).await.unwrap();
    assert_eq!(next_frame(&mut client).await.status, FrameStatus::Received);
    assert_eq!(next_frame(&mut client).await.status, FrameStatus::Completed);
}

#[tokio::test]
async fn malformed_json_gets_one_error_then_next_message_is_served() {
    let server = TestServer::spawn(services_with_stored_result().await).await;
    let mut client = server.connect().await;

    client.send(Message::Text("{not json".to_string())).await.unwrap();
    submit(&mut client, "print(1)", "ts-done").await;

    let error = next_frame(&mut client).await;
    assert_eq!(error.status, FrameStatus::Error);
    assert!(error.message.starts_with("Invalid JSON"), "{}", error.message);

    // Exactly one error: the very next frame belongs to the submission.
    let received = next_frame(&mut client).await;
    assert_eq!(received.status, FrameStatus::Received);
    assert_eq!(received.job_id.as_ref().map(|id| id.as_str()), Some("ts-done"));
    assert_eq!(next_frame(&mut client).await.status, FrameStatus::Completed);
}

#[tokio::test]
async fn back_to_back_submissions_are_served_in_order() {
    let server = TestServer::spawn(services_with_stored_result().await).await;
    let mut client = server.connect().await;

    submit(&mut client, "print(1)", "ts-done").await;
    submit(&mut client, "print(2)", "ts-done").await;

    let statuses: Vec<FrameStatus> = {
        let mut out = Vec::new();
        for _ in 0..4 {
            out.push(next_frame(&mut client).await.status);
        }
        out
    };
    assert_eq!(
        statuses,
        vec![
            FrameStatus::Received,
            FrameStatus::Completed,
            FrameStatus::Received,
            FrameStatus::Completed,
        ]
    );
}

/// In-memory store that counts reads.
#[derive(Default)]
struct CountingStore {
    inner: InMemoryResultStore,
    reads: AtomicUsize,
}

#[async_trait]
impl ResultStore for CountingStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn wait_for_update(&self, key: &str, max_wait: Duration) {
        self.inner.wait_for_update(key, max_wait).await
    }
}

#[tokio::test]
async fn polling_stops_when_client_disconnects() {
    let store = Arc::new(CountingStore::default());
    let session = SessionConfig {
        poll: PollSettings {
            interval: Duration::from_millis(20),
            attempts: 1_000,
        },
        ..SessionConfig::default()
    };
    // No workers: the job never completes, so only a disconnect ends the poll.
    let services = AppServices::new(Arc::new(InMemoryJobQueue::default()), store.clone(), session);
    let server = TestServer::spawn(services).await;
    let mut client = server.connect().await;

    submit(&mut client, "print(1)", "ts-gone").await;
    assert_eq!(next_frame(&mut client).await.status, FrameStatus::Received);
    assert_eq!(next_frame(&mut client).await.status, FrameStatus::Running);
    drop(client);

    // A few ticks for the failed writes to surface.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let settled = store.reads.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.reads.load(Ordering::SeqCst), settled, "store still polled after disconnect");
}
