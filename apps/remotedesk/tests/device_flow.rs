use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use remotedesk_core::auth::{AuthConfig, AuthError, DeviceAuthClient, DevicePoll};

#[derive(Clone)]
struct ApiState {
    /// Poll outcome once the pending polls are used up.
    outcome: &'static str,
    pending_polls: usize,
    polls: Arc<AtomicUsize>,
    codes: Arc<std::sync::Mutex<Vec<String>>>,
}

async fn start() -> impl IntoResponse {
    Json(json!({
        "device_code": "dev-code-1",
        "user_code": "WXYZ-1234",
        "verification_uri": "https://desk.example.com/device",
        "interval": 1,
        "expires_in": 30,
    }))
}

async fn poll(State(state): State<ApiState>, Json(body): Json<Value>) -> impl IntoResponse {
    if let Some(code) = body.get("device_code").and_then(Value::as_str) {
        state.codes.lock().unwrap().push(code.to_string());
    }
    let count = state.polls.fetch_add(1, Ordering::SeqCst);
    if count < state.pending_polls {
        return Json(json!({ "status": "pending" }));
    }
    match state.outcome {
        "approved" => Json(json!({
            "status": "approved",
            "app_token": "app-token-xyz",
            "user": { "id": 7 },
        })),
        other => Json(json!({ "status": other })),
    }
}

async fn broken() -> impl IntoResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "device flow unavailable" })),
    )
}

async fn serve(router: Router) -> DeviceAuthClient {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    DeviceAuthClient::new(AuthConfig::new(&format!("http://{addr}")).expect("auth config"))
        .expect("auth client")
}

fn api(state: ApiState) -> Router {
    Router::new()
        .route("/api/device/start", post(start))
        .route("/api/device/poll", post(poll))
        .with_state(state)
}

fn state(outcome: &'static str, pending_polls: usize) -> ApiState {
    ApiState {
        outcome,
        pending_polls,
        polls: Arc::new(AtomicUsize::new(0)),
        codes: Arc::new(std::sync::Mutex::new(Vec::new())),
    }
}

#[tokio::test]
async fn approval_after_pending_poll() {
    let state = state("approved", 1);
    let client = serve(api(state.clone())).await;

    let start = client.start_device_flow().await.expect("start");
    assert_eq!(start.user_code, "WXYZ-1234");
    assert_eq!(start.interval, 1);

    let approval = client.wait_for_approval(&start).await.expect("approval");
    assert_eq!(approval.app_token, "app-token-xyz");
    assert_eq!(approval.user_id.as_deref(), Some("7"));
    assert_eq!(state.polls.load(Ordering::SeqCst), 2);
    assert!(state.codes.lock().unwrap().iter().all(|code| code == "dev-code-1"));
}

#[tokio::test]
async fn pending_poll_is_not_an_error() {
    let client = serve(api(state("approved", 5))).await;
    assert_eq!(
        client.poll_device_code("dev-code-1").await.expect("poll"),
        DevicePoll::Pending
    );
}

#[tokio::test]
async fn denied_poll_stops_the_flow() {
    let client = serve(api(state("denied", 0))).await;
    let start = client.start_device_flow().await.expect("start");
    assert!(matches!(
        client.wait_for_approval(&start).await,
        Err(AuthError::AuthorizationDenied)
    ));
}

#[tokio::test]
async fn expired_poll_stops_the_flow() {
    let client = serve(api(state("expired", 0))).await;
    assert!(matches!(
        client.poll_device_code("dev-code-1").await,
        Err(AuthError::Expired)
    ));
}

#[tokio::test]
async fn gateway_errors_carry_the_server_message() {
    let router = Router::new().route("/api/device/start", post(broken));
    let client = serve(router).await;

    match client.start_device_flow().await {
        Err(AuthError::Gateway { context, message }) => {
            assert_eq!(context, "device/start");
            assert!(message.contains("device flow unavailable"), "{message}");
            assert!(message.contains("500"), "{message}");
        }
        other => panic!("expected gateway error, got {other:?}"),
    }
}
