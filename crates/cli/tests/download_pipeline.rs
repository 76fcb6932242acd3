//! End-to-end runs of the download pipeline against a fake ComfyUI server.
//!
//! The fake serves `/prompt`, `/queue`, `/history/{prompt_id}`, `/view`
//! and `/ws` from canned data. Its websocket handler waits until a prompt
//! has been submitted, then replays a scripted event sequence.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use comfydl_cli::cli::MediaType;
use comfydl_cli::config::DownloadConfig;
use comfydl_cli::pipeline::{run, DownloadReport, PipelineError};
use comfydl_comfyui::job::JobError;
use comfydl_comfyui::tracker::{TrackError, SAVE_NODE_ID};

const PROMPT_ID: &str = "prompt-123";

// ---------------------------------------------------------------------------
// Fake server
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeComfy {
    /// Inline frames streamed while the save-node is active.
    inline_frames: Vec<Vec<u8>>,
    /// Body served from `/history/{prompt_id}`.
    history: Value,
    /// Files served from `/view`, keyed by filename.
    files: HashMap<String, Vec<u8>>,
    /// Never send the completion event.
    silent: bool,
    /// Never answer `/history/{prompt_id}`.
    stall_history: bool,
    submitted: Notify,
    prompt_client_id: Mutex<Option<String>>,
    ws_client_id: Mutex<Option<String>>,
    deleted: Mutex<Vec<String>>,
}

async fn submit(State(fake): State<Arc<FakeComfy>>, Json(body): Json<Value>) -> Json<Value> {
    *fake.prompt_client_id.lock().unwrap() = body["client_id"].as_str().map(String::from);
    fake.submitted.notify_one();
    Json(json!({ "prompt_id": PROMPT_ID, "number": 7, "node_errors": {} }))
}

async fn queue(State(fake): State<Arc<FakeComfy>>, Json(body): Json<Value>) -> StatusCode {
    if let Some(ids) = body["delete"].as_array() {
        let mut deleted = fake.deleted.lock().unwrap();
        deleted.extend(ids.iter().filter_map(|v| v.as_str().map(String::from)));
    }
    StatusCode::OK
}

async fn history(
    State(fake): State<Arc<FakeComfy>>,
    UrlPath(prompt_id): UrlPath<String>,
) -> Json<Value> {
    assert_eq!(prompt_id, PROMPT_ID);
    if fake.stall_history {
        std::future::pending::<()>().await;
    }
    Json(fake.history.clone())
}

async fn view(
    State(fake): State<Arc<FakeComfy>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let name = params.get("filename").cloned().unwrap_or_default();
    match fake.files.get(&name) {
        Some(bytes) => bytes.clone().into_response(),
        None => (StatusCode::NOT_FOUND, name).into_response(),
    }
}

async fn events(
    ws: WebSocketUpgrade,
    State(fake): State<Arc<FakeComfy>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    *fake.ws_client_id.lock().unwrap() = params.get("clientId").cloned();
    ws.on_upgrade(move |socket| replay(socket, fake))
}

fn executing(prompt_id: &str, node: Option<&str>) -> Message {
    let body = json!({
        "type": "executing",
        "data": { "node": node, "prompt_id": prompt_id },
    });
    Message::Text(body.to_string().into())
}

async fn replay(mut socket: WebSocket, fake: Arc<FakeComfy>) {
    let status = json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": 1}}}});
    if socket.send(Message::Text(status.to_string().into())).await.is_err() {
        return;
    }

    fake.submitted.notified().await;

    let mut script = vec![
        executing("someone-else", Some("4")),
        executing(PROMPT_ID, Some("4")),
        // Not the save-node: must be dropped.
        Message::Binary(framed(&png(1, 1)).into()),
        executing(PROMPT_ID, Some(SAVE_NODE_ID)),
    ];
    script.extend(
        fake.inline_frames
            .iter()
            .map(|frame| Message::Binary(framed(frame).into())),
    );
    script.push(executing("someone-else", None));
    if !fake.silent {
        script.push(executing(PROMPT_ID, None));
    }

    for msg in script {
        if socket.send(msg).await.is_err() {
            return;
        }
    }

    // Hold the connection open until the client goes away.
    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}

async fn spawn_server(fake: FakeComfy) -> (String, Arc<FakeComfy>) {
    let fake = Arc::new(fake);
    let app = Router::new()
        .route("/prompt", post(submit))
        .route("/queue", post(queue))
        .route("/history/{prompt_id}", get(history))
        .route("/view", get(view))
        .route("/ws", get(events))
        .with_state(Arc::clone(&fake));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake server");
    });
    (addr.to_string(), fake)
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([90, 160, 30]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

/// Prepend the 8-byte preview header (event type, image format).
fn framed(image: &[u8]) -> Vec<u8> {
    let mut frame = vec![0, 0, 0, 1, 0, 0, 0, 2];
    frame.extend_from_slice(image);
    frame
}

fn history_listing(nodes: &[(&str, &[&str])]) -> Value {
    let outputs: serde_json::Map<String, Value> = nodes
        .iter()
        .map(|(node, files)| {
            let images: Vec<Value> = files
                .iter()
                .map(|f| json!({ "filename": f, "subfolder": "", "type": "output" }))
                .collect();
            (node.to_string(), json!({ "images": images }))
        })
        .collect();
    json!({ PROMPT_ID: { "outputs": outputs } })
}

fn config(server: &str, root: &Path, media_type: MediaType) -> DownloadConfig {
    let workflow_path = root.join("workflow.json");
    std::fs::write(
        &workflow_path,
        r#"{"4": {"class_type": "KSampler", "inputs": {}}}"#,
    )
    .expect("write workflow");

    DownloadConfig {
        server_address: server.to_string(),
        media_path: root.join("media"),
        media_type,
        workflow_path,
        frame_rate: 4,
        filename_prefix: "output".into(),
        staging_dir: root.join("staging"),
        timeout: None,
        ffmpeg_bin: "ffmpeg".into(),
    }
}

fn dimensions(path: &Path) -> (u32, u32) {
    image::image_dimensions(path).expect("saved file is an image")
}

fn saved(report: DownloadReport) -> Vec<PathBuf> {
    match report {
        DownloadReport::Images(paths) => paths,
        other => panic!("expected images, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn image_mode_saves_inline_then_history_outputs() {
    let (addr, fake) = spawn_server(FakeComfy {
        inline_frames: vec![png(2, 2)],
        history: history_listing(&[("9", &["a.png", "b.png"][..])]),
        files: HashMap::from([
            ("a.png".to_string(), png(3, 3)),
            ("b.png".to_string(), png(4, 4)),
        ]),
        ..Default::default()
    })
    .await;
    let root = tempfile::tempdir().unwrap();
    let config = config(&addr, root.path(), MediaType::Image);

    let paths = saved(run(&config, &CancellationToken::new()).await.unwrap());

    let media = root.path().join("media");
    assert_eq!(
        paths,
        vec![
            media.join("output_0.png"),
            media.join("output_1.png"),
            media.join("output_2.png"),
        ]
    );
    assert_eq!(dimensions(&paths[0]), (2, 2));
    assert_eq!(dimensions(&paths[1]), (3, 3));
    assert_eq!(dimensions(&paths[2]), (4, 4));

    let prompt_client = fake.prompt_client_id.lock().unwrap().clone();
    assert!(prompt_client.is_some());
    assert_eq!(prompt_client, *fake.ws_client_id.lock().unwrap());
}

#[tokio::test]
async fn history_replaces_inline_frames_for_same_node() {
    let (addr, _fake) = spawn_server(FakeComfy {
        inline_frames: vec![png(2, 2), png(2, 2)],
        history: history_listing(&[(SAVE_NODE_ID, &["final.png"][..])]),
        files: HashMap::from([("final.png".to_string(), png(5, 5))]),
        ..Default::default()
    })
    .await;
    let root = tempfile::tempdir().unwrap();
    let config = config(&addr, root.path(), MediaType::Image);

    let paths = saved(run(&config, &CancellationToken::new()).await.unwrap());

    assert_eq!(paths.len(), 1);
    assert_eq!(dimensions(&paths[0]), (5, 5));
    assert!(!root.path().join("media").join("output_1.png").exists());
}

#[tokio::test]
async fn missing_artifact_fails_the_run() {
    let (addr, _fake) = spawn_server(FakeComfy {
        history: history_listing(&[("9", &["gone.png"][..])]),
        ..Default::default()
    })
    .await;
    let root = tempfile::tempdir().unwrap();
    let config = config(&addr, root.path(), MediaType::Image);

    let err = run(&config, &CancellationToken::new()).await.unwrap_err();

    assert_matches!(err, PipelineError::Job(JobError::Collect(_)));
}

#[tokio::test]
async fn cancelled_run_removes_prompt_from_queue() {
    let (addr, fake) = spawn_server(FakeComfy {
        silent: true,
        history: history_listing(&[]),
        ..Default::default()
    })
    .await;
    let root = tempfile::tempdir().unwrap();
    let config = config(&addr, root.path(), MediaType::Image);

    let cancel = CancellationToken::new();
    let trip = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trip.cancel();
    });

    let err = run(&config, &cancel).await.unwrap_err();

    assert_matches!(
        err,
        PipelineError::Job(JobError::Track(TrackError::Cancelled { prompt_id })) if prompt_id == PROMPT_ID
    );
    assert_eq!(*fake.deleted.lock().unwrap(), vec![PROMPT_ID.to_string()]);
    assert!(!root.path().join("media").exists());
}

#[tokio::test]
async fn cancel_while_collecting_stops_the_run() {
    let (addr, _fake) = spawn_server(FakeComfy {
        inline_frames: vec![png(2, 2)],
        stall_history: true,
        ..Default::default()
    })
    .await;
    let root = tempfile::tempdir().unwrap();
    let config = config(&addr, root.path(), MediaType::Image);

    let cancel = CancellationToken::new();
    let trip = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trip.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), run(&config, &cancel))
        .await
        .expect("run ignored cancellation")
        .unwrap_err();

    assert_matches!(
        err,
        PipelineError::Job(JobError::Cancelled(stage)) if stage == "collecting outputs"
    );
    assert!(!root.path().join("media").exists());
}

#[tokio::test]
async fn cancelled_before_start_submits_nothing() {
    let (addr, fake) = spawn_server(FakeComfy::default()).await;
    let root = tempfile::tempdir().unwrap();
    let config = config(&addr, root.path(), MediaType::Video);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run(&config, &cancel).await.unwrap_err();

    assert_matches!(err, PipelineError::Job(JobError::Cancelled("connecting")));
    assert!(fake.prompt_client_id.lock().unwrap().is_none());
    assert!(!config.staging_dir.exists());
}

#[tokio::test]
async fn invalid_workflow_fails_before_connecting() {
    let root = tempfile::tempdir().unwrap();
    // Nothing listens on port 9; a network attempt would fail differently.
    let config = config("127.0.0.1:9", root.path(), MediaType::Image);
    std::fs::write(&config.workflow_path, r#""just a string""#).unwrap();

    let err = run(&config, &CancellationToken::new()).await.unwrap_err();

    assert_matches!(err, PipelineError::InvalidWorkflow { .. });
}

#[tokio::test]
async fn unreachable_server_is_a_connect_error() {
    let root = tempfile::tempdir().unwrap();
    let config = config("127.0.0.1:9", root.path(), MediaType::Image);

    let err = run(&config, &CancellationToken::new()).await.unwrap_err();

    assert_matches!(err, PipelineError::Job(JobError::Connect(_)));
}

#[tokio::test]
#[ignore = "needs ffmpeg on PATH; run with --ignored"]
async fn video_mode_encodes_frames_and_clears_staging() {
    let (addr, _fake) = spawn_server(FakeComfy {
        inline_frames: vec![png(16, 16), png(16, 16), png(16, 16)],
        history: history_listing(&[("9", &["last.png"][..])]),
        files: HashMap::from([("last.png".to_string(), png(16, 16))]),
        ..Default::default()
    })
    .await;
    let root = tempfile::tempdir().unwrap();
    let config = config(&addr, root.path(), MediaType::Video);

    let report = run(&config, &CancellationToken::new()).await.unwrap();

    let summary = match report {
        DownloadReport::Video(summary) => summary,
        other => panic!("expected video, got {other:?}"),
    };
    assert_eq!(summary.path, root.path().join("media").join("output.mp4"));
    assert_eq!(summary.frame_count, 4);
    assert_eq!(summary.frame_rate, 4);
    assert_eq!((summary.width, summary.height), (16, 16));
    assert!(summary.path.is_file());
    assert!(!config.staging_dir.exists());
}

#[tokio::test]
async fn video_mode_clears_staging_when_encoding_fails() {
    let (addr, _fake) = spawn_server(FakeComfy {
        history: history_listing(&[("9", &["a.png", "b.png"][..])]),
        files: HashMap::from([
            ("a.png".to_string(), png(16, 16)),
            ("b.png".to_string(), png(8, 8)),
        ]),
        ..Default::default()
    })
    .await;
    let root = tempfile::tempdir().unwrap();
    let config = config(&addr, root.path(), MediaType::Video);

    let err = run(&config, &CancellationToken::new()).await.unwrap_err();

    assert_matches!(
        err,
        PipelineError::Video(comfydl_core::ffmpeg::FfmpegError::FrameSizeMismatch { .. })
    );
    assert!(!config.staging_dir.exists());
    assert!(!root.path().join("media").join("output.mp4").exists());
}
