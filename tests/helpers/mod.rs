//! In-process control plane used by the integration tests.
//!
//! Serves the job list envelope on `GET /api/jobs`, job commands, the device
//! registry on `GET /api/remotes`, and a telemetry WebSocket on `/ws`. Tests
//! push frames to connected clients and read back whatever the client sends.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use migrate_telemetry::app_state::AppState;
use migrate_telemetry::routes;
use migrate_telemetry::services::channel::ChannelState;
use migrate_telemetry::services::control::ControlClient;
use migrate_telemetry::services::reconciler::{Reconciler, ReconcilerConfig, ReconcilerHandle};
use migrate_telemetry::services::store::StoreSnapshot;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Something the mock pushes to every connected telemetry client.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Text(String),
    Close,
}

#[derive(Clone)]
struct MockState {
    jobs_body: Arc<Mutex<Value>>,
    command_reply: Arc<Mutex<Value>>,
    devices: Arc<Mutex<Value>>,
    calls: Arc<Mutex<Vec<String>>>,
    job_pulls: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
    frames: broadcast::Sender<ServerFrame>,
    received: mpsc::UnboundedSender<String>,
}

pub struct MockControlPlane {
    pub addr: SocketAddr,
    state: MockState,
    received: mpsc::UnboundedReceiver<String>,
    server: JoinHandle<()>,
}

impl MockControlPlane {
    /// Start a mock answering `GET /api/jobs` with `jobs_body`.
    pub async fn start(jobs_body: Value) -> Self {
        let (frames, _) = broadcast::channel(64);
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let state = MockState {
            jobs_body: Arc::new(Mutex::new(jobs_body)),
            command_reply: Arc::new(Mutex::new(envelope(200, "ok", None))),
            devices: Arc::new(Mutex::new(json!([]))),
            calls: Arc::new(Mutex::new(Vec::new())),
            job_pulls: Arc::new(AtomicUsize::new(0)),
            connections: Arc::new(AtomicUsize::new(0)),
            frames,
            received: received_tx,
        };

        let app = Router::new()
            .route("/api/jobs", get(list_jobs).post(create_job))
            .route("/api/jobs/{id}", put(update_job).delete(delete_job))
            .route("/api/jobs/{id}/start", post(start_job))
            .route("/api/jobs/{id}/stop", post(stop_job))
            .route("/api/remotes", get(list_remotes))
            .route("/ws", get(ws_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock control plane");
        let addr = listener.local_addr().expect("Mock has no local address");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Mock server error");
        });

        Self {
            addr,
            state,
            received: received_rx,
            server,
        }
    }

    pub fn api_base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn telemetry_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Replace the body served for the next job list pulls.
    pub fn set_jobs_body(&self, body: Value) {
        *self.state.jobs_body.lock().expect("jobs body lock poisoned") = body;
    }

    /// Envelope returned by update/start/stop/delete commands.
    pub fn set_command_reply(&self, body: Value) {
        *self.state.command_reply.lock().expect("command reply lock poisoned") = body;
    }

    /// Registered devices; each entry carries its own `type`.
    pub fn set_devices(&self, devices: Value) {
        *self.state.devices.lock().expect("devices lock poisoned") = devices;
    }

    /// Every request seen so far, as `METHOD /path` relative to `/api`.
    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().expect("calls lock poisoned").clone()
    }

    pub fn job_pulls(&self) -> usize {
        self.state.job_pulls.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Push a JSON frame to every connected client.
    pub fn push(&self, frame: Value) {
        let _ = self.state.frames.send(ServerFrame::Text(frame.to_string()));
    }

    /// Close every open telemetry connection from the server side.
    pub fn close_connections(&self) {
        let _ = self.state.frames.send(ServerFrame::Close);
    }

    /// Next text frame sent by a client, if one arrives within `timeout`.
    pub async fn next_received(&mut self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, self.received.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for MockControlPlane {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl MockState {
    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock poisoned").push(call);
    }

    fn command_reply(&self) -> Json<Value> {
        Json(self.command_reply.lock().expect("command reply lock poisoned").clone())
    }
}

/// Id handed out for every created job.
pub const CREATED_JOB_ID: i64 = 42;

#[derive(Deserialize)]
struct RemoteQuery {
    #[serde(rename = "type")]
    kind: String,
}

async fn list_jobs(State(state): State<MockState>) -> Json<Value> {
    state.record("GET /jobs".to_string());
    state.job_pulls.fetch_add(1, Ordering::SeqCst);
    let body = state.jobs_body.lock().expect("jobs body lock poisoned").clone();
    Json(body)
}

async fn create_job(State(state): State<MockState>, Json(_params): Json<Value>) -> Json<Value> {
    state.record("POST /jobs".to_string());
    Json(envelope(200, "created", Some(json!({ "id": CREATED_JOB_ID }))))
}

async fn update_job(
    State(state): State<MockState>,
    Path(id): Path<i64>,
    Json(_params): Json<Value>,
) -> Json<Value> {
    state.record(format!("PUT /jobs/{id}"));
    state.command_reply()
}

async fn delete_job(State(state): State<MockState>, Path(id): Path<i64>) -> Json<Value> {
    state.record(format!("DELETE /jobs/{id}"));
    state.command_reply()
}

async fn start_job(State(state): State<MockState>, Path(id): Path<i64>) -> Json<Value> {
    state.record(format!("POST /jobs/{id}/start"));
    state.command_reply()
}

async fn stop_job(State(state): State<MockState>, Path(id): Path<i64>) -> Json<Value> {
    state.record(format!("POST /jobs/{id}/stop"));
    state.command_reply()
}

async fn list_remotes(
    State(state): State<MockState>,
    Query(query): Query<RemoteQuery>,
) -> Json<Value> {
    state.record(format!("GET /remotes?type={}", query.kind));
    let devices = state.devices.lock().expect("devices lock poisoned").clone();
    let matching: Vec<Value> = devices
        .as_array()
        .map(|all| {
            all.iter()
                .filter(|d| d["type"] == query.kind.as_str())
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Json(envelope(200, "ok", Some(Value::Array(matching))))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<MockState>) -> Response {
    // Subscribe before the upgrade completes so no pushed frame is missed.
    let frames = state.frames.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| handle_socket(socket, frames, state))
}

async fn handle_socket(
    mut socket: WebSocket,
    mut frames: broadcast::Receiver<ServerFrame>,
    state: MockState,
) {
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(ServerFrame::Text(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(ServerFrame::Close) | Err(_) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = state.received.send(text.as_str().to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
        }
    }
}

/// Envelope as the control plane returns it.
pub fn envelope(code: i32, message: &str, data: Option<Value>) -> Value {
    match data {
        Some(data) => json!({ "code": code, "message": message, "data": data }),
        None => json!({ "code": code, "message": message }),
    }
}

fn control_client(mock: &MockControlPlane) -> Arc<ControlClient> {
    let control = ControlClient::new(&mock.api_base_url(), Duration::from_secs(2))
        .expect("Failed to build control client");
    Arc::new(control)
}

fn spawn_with(control: Arc<ControlClient>, telemetry_url: String) -> (ReconcilerHandle, JoinHandle<()>) {
    let config = ReconcilerConfig {
        telemetry_url,
        snapshot_interval: None,
        reconnect_initial: Duration::from_millis(50),
        reconnect_max: Duration::from_millis(200),
    };
    let (reconciler, handle) = Reconciler::new(config, control);
    let task = tokio::spawn(reconciler.run());
    (handle, task)
}

/// Spawn a reconciler against the mock with no periodic pulls and fast reconnects.
pub fn spawn_reconciler(mock: &MockControlPlane) -> (ReconcilerHandle, JoinHandle<()>) {
    spawn_with(control_client(mock), mock.telemetry_url())
}

/// Like [`spawn_reconciler`], with the telemetry channel pointed elsewhere.
pub fn spawn_reconciler_with_channel(
    mock: &MockControlPlane,
    telemetry_url: String,
) -> (ReconcilerHandle, JoinHandle<()>) {
    spawn_with(control_client(mock), telemetry_url)
}

/// A TCP endpoint that accepts connections but never answers the WebSocket
/// handshake. Dropping the handle stops it.
pub async fn stalled_telemetry_endpoint() -> (String, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stalled endpoint");
    let addr = listener.local_addr().expect("Stalled endpoint has no address");
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (format!("ws://{addr}/ws"), task)
}

/// An address nothing listens on, so connecting is refused.
pub async fn refused_telemetry_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind a free port");
    let addr = listener.local_addr().expect("Listener has no address");
    drop(listener);
    format!("ws://{addr}/ws")
}

/// The HTTP API served in-process on top of a reconciler fed by the mock.
pub struct TestServer {
    pub url: String,
    pub handle: ReconcilerHandle,
    reconciler: JoinHandle<()>,
    server: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(mock: &MockControlPlane, telemetry_url: String) -> Self {
        let control = control_client(mock);
        let (handle, reconciler) = spawn_with(Arc::clone(&control), telemetry_url);
        let app = routes::api_router(AppState::new(handle.clone(), control));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().expect("Test server has no address");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Test server error");
        });

        Self {
            url: format!("http://{addr}"),
            handle,
            reconciler,
            server,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        self.reconciler.abort();
        self.server.abort();
    }
}

/// Valid body for create and update commands.
pub fn job_params(name: &str) -> Value {
    json!({
        "name": name,
        "source_remote_id": 1,
        "target_remote_id": 2,
        "source_bucket_name": "photos",
        "source_url": "2024",
        "target_bucket_name": "archive",
        "target_url": "photos",
        "concurrent": 4,
    })
}

/// Wait until the store publishes a snapshot satisfying `predicate`.
pub async fn wait_for_store<F>(handle: &ReconcilerHandle, predicate: F) -> Arc<StoreSnapshot>
where
    F: Fn(&StoreSnapshot) -> bool,
{
    let mut rx = handle.store().subscribe();
    let wait = async {
        loop {
            {
                let current = rx.borrow_and_update().clone();
                if predicate(current.as_ref()) {
                    return current;
                }
            }
            rx.changed().await.expect("Store publisher dropped");
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("Store never reached the expected state")
}

/// Wait until the reconciler reports the channel open with at least `reconnects`.
pub async fn wait_for_open(handle: &ReconcilerHandle, reconnects: u64) {
    let mut rx = handle.subscribe_sync();
    let wait = async {
        loop {
            {
                let sync = rx.borrow_and_update();
                if sync.channel == ChannelState::Open && sync.reconnects >= reconnects {
                    return;
                }
            }
            rx.changed().await.expect("Sync publisher dropped");
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("Telemetry channel never opened");
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
