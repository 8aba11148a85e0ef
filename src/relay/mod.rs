pub mod error;
pub mod prompt;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::chat::library;
use crate::config::Config;
use crate::db::models::HealthProfile;
use crate::db::Database;
use crate::llm::{openai, ChatRequest, ChatTurn};

pub use error::RelayError;

pub struct RelayState {
    pub config: Config,
    pub db: Arc<Database>,
    pub http: reqwest::Client,
}

impl RelayState {
    pub fn new(config: Config, db: Arc<Database>) -> Arc<Self> {
        Arc::new(Self {
            config,
            db,
            http: reqwest::Client::new(),
        })
    }
}

/// Body accepted by `/chat` and `/library-chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_id: Option<String>,
}

pub fn build_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/library-chat", post(chat))
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ])
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn chat(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    payload: Result<Json<RelayRequest>, JsonRejection>,
) -> Result<Response, RelayError> {
    authorize(&state.config, &headers)?;
    let Json(req) = payload.map_err(|e| RelayError::Failed(e.body_text()))?;

    let profile = match req.user_id.as_deref().filter(|id| !id.is_empty()) {
        Some(user_id) => load_profile(&state.db, user_id).await,
        None => None,
    };

    let instructions = req
        .system_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .or_else(|| {
            req.library_id
                .as_deref()
                .and_then(library::find)
                .map(|lib| lib.system_prompt)
        });
    let system = prompt::system_prompt(instructions, profile.as_ref());

    info!(
        messages = req.messages.len(),
        history = req.conversation_history.len(),
        library = req.library_id.as_deref().unwrap_or("-"),
        health_context = profile.is_some(),
        "relaying chat request"
    );

    let request = ChatRequest {
        messages: prompt::assemble(system, req.conversation_history, req.messages),
        model: state.config.model.clone(),
        stream: true,
    };
    let upstream = openai::open_stream(&state.http, &state.config.gateway(), &request).await?;

    Ok((
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(upstream.bytes_stream()),
    )
        .into_response())
}

fn authorize(config: &Config, headers: &HeaderMap) -> Result<(), RelayError> {
    let Some(expected) = config.client_key.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected) {
        Ok(())
    } else {
        Err(RelayError::Unauthorized)
    }
}

/// Profile lookup is best-effort: any failure just means no health context.
async fn load_profile(db: &Arc<Database>, user_id: &str) -> Option<HealthProfile> {
    let db = Arc::clone(db);
    let user_id = user_id.to_owned();
    let lookup = tokio::task::spawn_blocking(move || db.get_health_profile(&user_id)).await;
    match lookup {
        Ok(Ok(profile)) => profile,
        Ok(Err(e)) => {
            warn!(error = %e, "health profile lookup failed");
            None
        }
        Err(e) => {
            warn!(error = %e, "health profile lookup task failed");
            None
        }
    }
}
