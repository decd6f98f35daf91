//! HTTP API: CSV aggregation, trigger dispatch, job status and the auth
//! routes.

mod error;

pub use error::ApiError;

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::HeaderValue,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tracing::{info, warn};

use crate::aggregate::{aggregate_volume, VolumeReport};
use crate::auth::{self, AuthState};
use crate::config::AppConfig;
use crate::jobs::{JobEntry, JobQueue};
use crate::trigger::{TriggerRecord, TriggerStore, CLICK_SOURCE};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub triggers: Arc<TriggerStore>,
    pub jobs: JobQueue,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState, auth_state: AuthState) -> anyhow::Result<Router> {
    let origin: HeaderValue = state.config.server.cors_origin.parse()?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/upload-and-process", post(upload_and_process))
        .route("/trigger-tradingview", post(trigger_tradingview))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/:id", get(get_job))
        .with_state(state)
        .nest("/api/auth", auth::router(auth_state))
        .layer(cors);
    Ok(app)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Default)]
struct UploadForm {
    file: Option<Vec<u8>>,
    script: Option<String>,
    timeframe: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::Unprocessable(format!("Missing form field '{}'", name)))
}

async fn upload_and_process(mut multipart: Multipart) -> Result<Json<VolumeReport>, ApiError> {
    let bad_form = |e: axum::extract::multipart::MultipartError| ApiError::BadRequest(e.to_string());

    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "file" => form.file = Some(field.bytes().await.map_err(bad_form)?.to_vec()),
            "script" => form.script = Some(field.text().await.map_err(bad_form)?),
            "timeframe" => form.timeframe = Some(field.text().await.map_err(bad_form)?),
            "start_time" => form.start_time = Some(field.text().await.map_err(bad_form)?),
            "end_time" => form.end_time = Some(field.text().await.map_err(bad_form)?),
            _ => {}
        }
    }

    let file = required(form.file, "file")?;
    let script = required(form.script, "script")?;
    let timeframe = required(form.timeframe, "timeframe")?;
    let start_time = required(form.start_time, "start_time")?;
    let end_time = required(form.end_time, "end_time")?;

    info!(
        symbol = %script,
        timeframe = %timeframe,
        start_time = %start_time,
        end_time = %end_time,
        bytes = file.len(),
        "CSV received"
    );

    let report = aggregate_volume(&file, &script, &timeframe, &start_time, &end_time)?;
    Ok(Json(report))
}

/// Persist the trigger body and queue an automation run for it.
async fn trigger_tradingview(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Value> {
    let record: TriggerRecord = match serde_json::from_value(body.clone()) {
        Ok(record) => record,
        Err(_) if body.get("source").and_then(Value::as_str) != Some(CLICK_SOURCE) => {
            TriggerRecord::default()
        }
        Err(e) => {
            warn!("Trigger body has unexpected field types: {}", e);
            return Json(json!({"status": "error", "message": format!("Invalid trigger data: {}", e)}));
        }
    };

    if !record.is_click() {
        info!(source = ?body.get("source"), "Blocked non-click trigger");
        return Json(json!({"status": "ignored", "message": "Blocked non-click trigger"}));
    }

    if let Err(e) = state.triggers.write_raw(&body).await {
        warn!("Failed to save trigger data: {}", e);
        return Json(json!({"status": "error", "message": e.to_string()}));
    }

    let symbol = record.effective_symbol(&state.config.trigger).to_string();
    match state.jobs.submit(record, &symbol).await {
        Ok(job_id) => Json(json!({
            "status": "success",
            "message": "TradingView script triggered",
            "job_id": job_id,
        })),
        Err(e) => Json(json!({"status": "error", "message": e.to_string()})),
    }
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobEntry>> {
    Json(state.jobs.registry().list().await)
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<JobEntry>, ApiError> {
    state
        .jobs
        .registry()
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))
}

// ---------------------------------------------------------------------------
// Server entry point
// ---------------------------------------------------------------------------

/// Serve until `shutdown` resolves.
pub async fn serve(
    app: Router,
    bind_addr: &str,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let ip: std::net::IpAddr = bind_addr
        .parse()
        .unwrap_or_else(|_| std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    let addr = std::net::SocketAddr::new(ip, port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
