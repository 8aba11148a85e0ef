use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::BodyExt as _;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use santra_chat::chat::{ChatOrchestrator, HttpRelay, RelayConfig, TurnOutcome};
use santra_chat::config::Config;
use santra_chat::db::models::HealthProfile;
use santra_chat::db::Database;
use santra_chat::relay::prompt::SUGGESTIONS_DIRECTIVE;
use santra_chat::relay::{build_router, RelayState};

const SSE_BODY: &str = ": keep-alive\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"Stay \"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"hydrated.\"}}]}\n\n\
data: [DONE]\n\n";

#[derive(Clone)]
enum Reply {
    Stream(&'static str),
    Status(u16, Value),
}

#[derive(Clone)]
struct Upstream {
    reply: Reply,
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn completions(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    upstream.seen.lock().unwrap().push((auth, body));
    match upstream.reply {
        Reply::Stream(text) => {
            ([(header::CONTENT_TYPE, "text/event-stream")], text).into_response()
        }
        Reply::Status(code, body) => {
            (StatusCode::from_u16(code).unwrap(), Json(body)).into_response()
        }
    }
}

/// Starts a fake gateway; returns its base URL and the captured requests.
async fn spawn_upstream(reply: Reply) -> (String, Arc<Mutex<Vec<(Option<String>, Value)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/chat/completions", post(completions))
        .with_state(Upstream {
            reply,
            seen: seen.clone(),
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), seen)
}

fn relay_config(gateway_url: &str) -> Config {
    Config {
        gateway_url: gateway_url.to_string(),
        gateway_key: "gw-key".to_string(),
        ..Config::default()
    }
}

fn relay_app(config: Config) -> (Router, Arc<Database>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    (build_router(RelayState::new(config, db.clone())), db)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn body_json(resp: Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn user_turn(text: &str) -> Value {
    json!({ "messages": [{ "role": "user", "content": text }] })
}

#[tokio::test]
async fn stream_is_relayed_byte_for_byte() {
    let (url, seen) = spawn_upstream(Reply::Stream(SSE_BODY)).await;
    let (app, _db) = relay_app(relay_config(&url));

    let body = json!({
        "messages": [{ "role": "user", "content": "I feel dizzy" }],
        "conversationHistory": [
            { "role": "user", "content": "Hi" },
            { "role": "assistant", "content": "Hello!" }
        ]
    });
    let resp = app.oneshot(post_json("/chat", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], SSE_BODY.as_bytes());

    let seen = seen.lock().unwrap();
    let (auth, sent) = &seen[0];
    assert_eq!(auth.as_deref(), Some("Bearer gw-key"));
    assert_eq!(sent["stream"], json!(true));
    assert_eq!(sent["model"], json!(Config::default().model));
    let messages = sent["messages"].as_array().unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
    assert_eq!(roles, ["system", "user", "assistant", "user"]);
    assert_eq!(messages[3]["content"], "I feel dizzy");
    let system = messages[0]["content"].as_str().unwrap();
    assert!(system.starts_with("You are Santra"));
    assert!(system.ends_with(SUGGESTIONS_DIRECTIVE));
}

#[tokio::test]
async fn upstream_rate_limit_is_429() {
    let (url, _) = spawn_upstream(Reply::Status(429, json!({}))).await;
    let (app, _db) = relay_app(relay_config(&url));

    let resp = app.oneshot(post_json("/chat", user_turn("hi"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        body_json(resp).await,
        json!({ "error": "Rate limit exceeded. Please try again in a moment." })
    );
}

#[tokio::test]
async fn upstream_payment_required_is_402() {
    let (url, _) = spawn_upstream(Reply::Status(402, json!({}))).await;
    let (app, _db) = relay_app(relay_config(&url));

    let resp = app.oneshot(post_json("/chat", user_turn("hi"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(
        body_json(resp).await["error"],
        "Service temporarily unavailable. Please try again later."
    );
}

#[tokio::test]
async fn other_upstream_failures_are_500_with_message() {
    let (url, _) = spawn_upstream(Reply::Status(
        503,
        json!({ "error": { "message": "model overloaded" } }),
    ))
    .await;
    let (app, _db) = relay_app(relay_config(&url));

    let resp = app.oneshot(post_json("/chat", user_turn("hi"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(resp).await, json!({ "error": "model overloaded" }));
}

#[tokio::test]
async fn missing_gateway_key_is_500() {
    let (app, _db) = relay_app(Config::default());
    let resp = app.oneshot(post_json("/chat", user_turn("hi"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(resp).await["error"], "gateway key is not configured");
}

#[tokio::test]
async fn malformed_body_is_500_with_error_json() {
    let (app, _db) = relay_app(relay_config("http://127.0.0.1:9"));
    let req = Request::builder()
        .method(Method::POST)
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_json(resp).await["error"].is_string());
}

#[tokio::test]
async fn health_profile_is_injected_into_system_prompt() {
    let (url, seen) = spawn_upstream(Reply::Stream(SSE_BODY)).await;
    let (app, db) = relay_app(relay_config(&url));
    db.upsert_health_profile(&HealthProfile {
        user_id: "u-42".into(),
        allergies: vec!["penicillin".into()],
        medications: vec!["metformin".into()],
        height_cm: Some(180.0),
        ..Default::default()
    })
    .unwrap();

    let mut body = user_turn("Can I take amoxicillin?");
    body["userId"] = json!("u-42");
    let resp = app.oneshot(post_json("/chat", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let seen = seen.lock().unwrap();
    let system = seen[0].1["messages"][0]["content"].as_str().unwrap().to_string();
    assert!(system.contains("--- Known user health context ---"));
    assert!(system.contains("Allergies: penicillin"));
    assert!(system.contains("Current medications: metformin"));
    assert!(system.contains("Height: 180 cm"));
    assert!(!system.contains("Blood type"));
}

#[tokio::test]
async fn unreadable_health_profile_is_skipped() {
    let (url, seen) = spawn_upstream(Reply::Stream(SSE_BODY)).await;
    let (app, db) = relay_app(relay_config(&url));
    db.upsert_health_profile(&HealthProfile {
        user_id: "u-7".into(),
        allergies: vec!["latex".into()],
        ..Default::default()
    })
    .unwrap();
    db.conn
        .lock()
        .unwrap()
        .execute(
            "UPDATE health_profiles SET allergies = 'not json' WHERE user_id = 'u-7'",
            [],
        )
        .unwrap();

    let mut body = user_turn("hi");
    body["userId"] = json!("u-7");
    let resp = app.oneshot(post_json("/chat", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let seen = seen.lock().unwrap();
    let system = seen[0].1["messages"][0]["content"].as_str().unwrap();
    assert!(!system.contains("health context"));
}

#[tokio::test]
async fn unknown_user_gets_no_health_context() {
    let (url, seen) = spawn_upstream(Reply::Stream(SSE_BODY)).await;
    let (app, _db) = relay_app(relay_config(&url));

    let mut body = user_turn("hi");
    body["userId"] = json!("nobody");
    let resp = app.oneshot(post_json("/chat", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let seen = seen.lock().unwrap();
    let system = seen[0].1["messages"][0]["content"].as_str().unwrap();
    assert!(!system.contains("health context"));
}

#[tokio::test]
async fn library_chat_locks_the_prompt_but_keeps_suggestions() {
    let (url, seen) = spawn_upstream(Reply::Stream(SSE_BODY)).await;
    let (app, _db) = relay_app(relay_config(&url));

    let mut body = user_turn("What do ACE inhibitors do?");
    body["libraryId"] = json!("pharmacology");
    let resp = app.oneshot(post_json("/library-chat", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let seen = seen.lock().unwrap();
    let system = seen[0].1["messages"][0]["content"].as_str().unwrap();
    assert!(system.starts_with("You are Santra inside the Pharmacology Library."));
    assert!(!system.contains("Core principles"));
    assert!(system.ends_with(SUGGESTIONS_DIRECTIVE));
}

#[tokio::test]
async fn explicit_system_prompt_wins_over_library() {
    let (url, seen) = spawn_upstream(Reply::Stream(SSE_BODY)).await;
    let (app, _db) = relay_app(relay_config(&url));

    let mut body = user_turn("hi");
    body["libraryId"] = json!("pharmacology");
    body["systemPrompt"] = json!("Custom scope only.");
    app.oneshot(post_json("/library-chat", body)).await.unwrap();

    let seen = seen.lock().unwrap();
    let system = seen[0].1["messages"][0]["content"].as_str().unwrap();
    assert!(system.starts_with("Custom scope only."));
}

#[tokio::test]
async fn client_key_is_enforced_when_configured() {
    let (url, seen) = spawn_upstream(Reply::Stream(SSE_BODY)).await;
    let config = Config {
        client_key: Some("publishable".into()),
        ..relay_config(&url)
    };
    let (app, _db) = relay_app(config);

    let resp = app
        .clone()
        .oneshot(post_json("/chat", user_turn("hi")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(body_json(resp).await["error"].is_string());
    assert!(seen.lock().unwrap().is_empty());

    let mut req = post_json("/chat", user_turn("hi"));
    req.headers_mut().insert(
        header::AUTHORIZATION,
        "Bearer publishable".parse().unwrap(),
    );
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn cors_preflight_allows_browser_headers() {
    let (app, _db) = relay_app(Config::default());
    for uri in ["/chat", "/library-chat"] {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri(uri)
            .header(header::ORIGIN, "https://app.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(
                header::ACCESS_CONTROL_REQUEST_HEADERS,
                "authorization,x-client-info,apikey,content-type",
            )
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert!(resp.status().is_success());
        let allow_origin = resp
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        assert_eq!(allow_origin, "*");
        let allow_headers = resp
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        for h in ["authorization", "x-client-info", "apikey", "content-type"] {
            assert!(allow_headers.contains(h), "missing {h} in {allow_headers}");
        }
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _db) = relay_app(Config::default());
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn orchestrator_over_http_relay_end_to_end() {
    let (url, _) = spawn_upstream(Reply::Stream(SSE_BODY)).await;
    let (app, _relay_db) = relay_app(relay_config(&url));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let relay = Arc::new(HttpRelay::new(RelayConfig {
        url: format!("http://{addr}/chat"),
        client_key: None,
    }));
    let store = Arc::new(Database::open_in_memory().unwrap());
    let (chat, _events) = ChatOrchestrator::new(relay, store, None);

    let TurnOutcome::Completed { message, emergency } =
        chat.send_message("Any tips for the heat?").await.unwrap()
    else {
        panic!("expected completion");
    };
    assert_eq!(message.content, "Stay hydrated.");
    assert!(!emergency);
}

#[tokio::test]
async fn http_relay_maps_rate_limit() {
    let (url, _) = spawn_upstream(Reply::Status(429, json!({}))).await;
    let (app, _relay_db) = relay_app(relay_config(&url));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let relay = Arc::new(HttpRelay::new(RelayConfig {
        url: format!("http://{addr}/chat"),
        client_key: None,
    }));
    let store = Arc::new(Database::open_in_memory().unwrap());
    let (chat, _events) = ChatOrchestrator::new(relay, store, None);

    let err = chat.send_message("hi").await.unwrap_err();
    assert!(matches!(err, santra_chat::chat::ChatError::RateLimited));
}
