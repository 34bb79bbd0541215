//! Campus Agent Web 服务
//!
//! 启动: cargo run --bin campus-web --features web
//! 对话接口 POST /api/chat，流式接口 POST /api/chat/stream（SSE）。

#![cfg(feature = "web")]

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};

use campus_agent::config::load_config_or_default;
use campus_agent::session::{HistoryEntry, SessionInfo};
use campus_agent::store::{Analytics, Student};
use campus_agent::{observability, Orchestrator, TurnResult, DEFAULT_USER};

struct AppState {
    orchestrator: Arc<Orchestrator>,
}

type ApiError = (StatusCode, String);

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UserQuery {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct MessagesResponse {
    session_id: String,
    messages: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    session_id: String,
    deleted: bool,
}

#[derive(Debug, Serialize)]
struct TokenUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    token_usage: TokenUsage,
}

fn user_or_default(user_id: Option<String>) -> String {
    user_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_USER.to_string())
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut cfg = load_config_or_default(std::env::args().nth(1).map(PathBuf::from));
    // Web 端回放按词间隔推送，终端默认不延迟
    cfg.agent.replay_delay_ms = cfg.web.replay_delay_ms;

    let orchestrator = Arc::new(Orchestrator::from_config(&cfg).await?);
    let _sweeper =
        orchestrator.spawn_session_sweeper(Duration::from_secs(cfg.session.sweep_interval_secs));
    let state = Arc::new(AppState { orchestrator });

    let app = Router::new()
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", post(api_chat_stream))
        .route("/api/sessions", post(api_sessions_create))
        .route(
            "/api/sessions/:id",
            get(api_session_get).delete(api_session_delete),
        )
        .route("/api/sessions/:id/messages", get(api_session_messages))
        .route("/api/students", get(api_students_list))
        .route("/api/students/:id", get(api_student_get))
        .route("/api/analytics", get(api_analytics))
        .route("/api/health", get(api_health))
        .with_state(state);

    let port = std::env::var("CAMPUS_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(cfg.web.port);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("{}: http://{}", cfg.app.name, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /api/health：存活检查，附带进程累计 token 用量
async fn api_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (prompt_tokens, completion_tokens, total_tokens) = state.orchestrator.token_usage();
    Json(HealthResponse {
        status: "OK",
        token_usage: TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        },
    })
}

/// POST /api/chat：完整回复
async fn api_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<TurnResult>, ApiError> {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }
    let user_id = user_or_default(req.user_id);
    let session_id = req.session_id.filter(|s| !s.is_empty());
    let turn = state
        .orchestrator
        .process_message(&message, session_id.as_deref(), &user_id)
        .await;
    Ok(Json(turn))
}

/// POST /api/chat/stream：SSE，event 名为事件类型，data 为快照 JSON；complete 之后结束
async fn api_chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }
    let user_id = user_or_default(req.user_id);
    let session_id = req.session_id.filter(|s| !s.is_empty());
    let handle = state
        .orchestrator
        .process_message_stream(&message, session_id.as_deref(), &user_id)
        .await;

    // 客户端断开时 SSE 流被丢弃，接收端随之关闭，生产方据此停止
    let event_stream = stream::unfold((handle.events, false), |(mut rx, done)| async move {
        if done {
            return None;
        }
        let ev = rx.recv().await?;
        let terminal = ev.is_terminal();
        let event = match Event::default()
            .event(ev.kind.as_str())
            .json_data(&ev.data)
        {
            Ok(event) => event,
            Err(e) => Event::default().event("error").data(e.to_string()),
        };
        Some((Ok(event), (rx, terminal)))
    });

    Ok(Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// POST /api/sessions：在第一条消息之前创建会话
async fn api_sessions_create(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateSessionRequest>>,
) -> Json<SessionInfo> {
    let user_id = user_or_default(body.and_then(|Json(b)| b.user_id));
    Json(state.orchestrator.create_session(&user_id).await)
}

async fn api_session_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    state
        .orchestrator
        .session_info(&id)
        .await
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "session not found".to_string()))
}

async fn api_session_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<UserQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let user_id = user_or_default(q.user_id);
    let messages = state
        .orchestrator
        .session_history(&id, &user_id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, "session not found".to_string()))?;
    Ok(Json(MessagesResponse {
        session_id: id,
        messages,
    }))
}

async fn api_session_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<UserQuery>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let user_id = user_or_default(q.user_id);
    if !state.orchestrator.delete_session(&id, &user_id).await {
        return Err((StatusCode::NOT_FOUND, "session not found".to_string()));
    }
    Ok(Json(DeleteResponse {
        session_id: id,
        deleted: true,
    }))
}

async fn api_students_list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Student>>, ApiError> {
    let students = state
        .orchestrator
        .students()
        .list_students()
        .await
        .map_err(internal)?;
    Ok(Json(students))
}

async fn api_student_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Student>, ApiError> {
    state
        .orchestrator
        .students()
        .get_student(&id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("student {} not found", id)))
}

async fn api_analytics(State(state): State<Arc<AppState>>) -> Result<Json<Analytics>, ApiError> {
    let analytics = state
        .orchestrator
        .students()
        .analytics()
        .await
        .map_err(internal)?;
    Ok(Json(analytics))
}
