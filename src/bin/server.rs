use anyhow::Context;
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json as ResponseJson},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use taskwarden::{
    config::EnvSnapshot, logging, Config, OperationMode, Platform, ServiceEndpoint, SubmitOptions,
    TaskPriority, TaskStatus, TaskType, TaskwardenError,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    platform: Arc<Platform>,
}

#[derive(Debug, Deserialize)]
struct SubmitTaskRequest {
    #[serde(rename = "type")]
    task_type: TaskType,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    priority: TaskPriority,
    max_retries: Option<u32>,
    #[serde(default)]
    required_tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TaskQuery {
    status: Option<TaskStatus>,
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ModeRequest {
    mode: OperationMode,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::load().context("failed to load config")?;
    config
        .apply_env_overrides(&EnvSnapshot::from_process())
        .context("invalid TASKWARDEN_* override")?;
    logging::init(&config.logging.level, config.logging.format)?;

    let bind = config.server.bind.clone();
    let platform = Arc::new(Platform::builder(config).build()?);
    platform.start().await?;

    let app = create_app(AppState {
        platform: Arc::clone(&platform),
    });

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("Server listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for Ctrl-C: {}", e);
            }
        })
        .await?;

    platform.stop().await;
    Ok(())
}

/// Create the main application with all routes
fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/dashboard", get(dashboard))
        .route("/api/tasks", post(submit_task).get(list_tasks))
        .route("/api/tasks/:id", get(get_task).delete(cancel_task))
        .route("/api/decisions", get(list_decisions))
        .route("/api/mode", get(get_mode).put(set_mode))
        .route("/api/services", get(list_services).post(register_service))
        .route("/api/services/check", post(check_services))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn status_for(e: &TaskwardenError) -> StatusCode {
    match e {
        TaskwardenError::Validation(_) | TaskwardenError::Config(_) | TaskwardenError::Filter(_) => {
            StatusCode::BAD_REQUEST
        }
        TaskwardenError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> (StatusCode, ResponseJson<Value>) {
    let checks = state.platform.hub().run_health_checks().await;
    let healthy = checks.iter().all(|c| c.healthy);
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        ResponseJson(json!({
            "service": "taskwarden",
            "version": env!("CARGO_PKG_VERSION"),
            "status": if healthy { "healthy" } else { "unhealthy" },
            "checks": checks,
            "controller": state.platform.controller().status().await,
            "registry": state.platform.registry().status().await,
        })),
    )
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.platform.hub().export_prometheus().await,
    )
}

async fn dashboard(State(state): State<AppState>) -> ResponseJson<Value> {
    ResponseJson(json!(state.platform.hub().dashboard().await))
}

/// Submit a task endpoint
async fn submit_task(
    State(state): State<AppState>,
    Json(request): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, ResponseJson<Value>), StatusCode> {
    let options = SubmitOptions {
        priority: request.priority,
        max_retries: request.max_retries,
        required_tags: request.required_tags,
    };

    match state
        .platform
        .controller()
        .submit_task(request.task_type, request.input, options)
        .await
    {
        Ok(task) => {
            info!("Task submitted: {} ({})", task.id, task.status);
            Ok((StatusCode::ACCEPTED, ResponseJson(json!(task))))
        }
        Err(e) => {
            error!("Failed to submit task: {}", e);
            Err(status_for(&e))
        }
    }
}

async fn list_tasks(State(state): State<AppState>, Query(query): Query<TaskQuery>) -> ResponseJson<Value> {
    let tasks = state.platform.controller().tasks(query.status).await;
    ResponseJson(json!({
        "total": tasks.len(),
        "tasks": tasks,
    }))
}

/// Get task status endpoint
async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<ResponseJson<Value>, StatusCode> {
    match state.platform.controller().get_task(&task_id).await {
        Some(task) => Ok(ResponseJson(json!(task))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<ResponseJson<Value>, StatusCode> {
    let controller = state.platform.controller();
    if controller.cancel_task(&task_id).await {
        Ok(ResponseJson(json!({ "task_id": task_id, "cancelled": true })))
    } else if controller.get_task(&task_id).await.is_some() {
        Err(StatusCode::CONFLICT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn list_decisions(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> ResponseJson<Value> {
    let limit = query.limit.unwrap_or(50);
    ResponseJson(json!({
        "controller": state.platform.controller().decisions(limit).await,
        "registry": state.platform.registry().decisions(limit).await,
    }))
}

async fn get_mode(State(state): State<AppState>) -> ResponseJson<Value> {
    ResponseJson(json!({ "mode": state.platform.controller().mode().await }))
}

async fn set_mode(State(state): State<AppState>, Json(request): Json<ModeRequest>) -> ResponseJson<Value> {
    let decision = state.platform.controller().set_mode(request.mode).await;
    info!("Operation mode set to {}", request.mode);
    ResponseJson(json!({ "mode": request.mode, "decision": decision }))
}

async fn list_services(State(state): State<AppState>) -> ResponseJson<Value> {
    let registry = state.platform.registry();
    ResponseJson(json!({
        "status": registry.status().await,
        "services": registry.services().await,
        "credentials": registry.credential_flags(),
    }))
}

async fn register_service(
    State(state): State<AppState>,
    Json(endpoint): Json<ServiceEndpoint>,
) -> Result<(StatusCode, ResponseJson<Value>), StatusCode> {
    if url::Url::parse(&endpoint.url).is_err() {
        warn!("Rejected service {} with invalid url {}", endpoint.id, endpoint.url);
        return Err(StatusCode::BAD_REQUEST);
    }
    let stored = state.platform.registry().register_service(endpoint).await;
    Ok((StatusCode::CREATED, ResponseJson(json!(stored))))
}

async fn check_services(State(state): State<AppState>) -> ResponseJson<Value> {
    let checks = state.platform.registry().check_all().await;
    ResponseJson(json!({ "checks": checks }))
}
