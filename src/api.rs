use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::models::AnalysisReport;
use crate::{analyze, parser, AnalyzeOptions};

/// Upload cap. The engine itself has no size limit; the transport boundary
/// enforces one before invoking it.
const MAX_LOG_BYTES: usize = 150 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub log: String,
    #[serde(default)]
    pub target_player: Option<String>,
    #[serde(default)]
    pub anonymize: bool,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    success: bool,
    data: AnalysisReport,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub log: String,
}

#[derive(Debug, Serialize)]
struct ValidateResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn create_router() -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/validate", post(validate_log))
        .route("/api/analyze", post(analyze_log))
        .layer(DefaultBodyLimit::max(MAX_LOG_BYTES))
        .layer(CorsLayer::permissive())
}

async fn health() -> &'static str {
    "ok"
}

async fn validate_log(Json(req): Json<ValidateRequest>) -> Json<ValidateResponse> {
    match parser::validate(&req.log) {
        Ok(()) => Json(ValidateResponse {
            valid: true,
            error: None,
        }),
        Err(e) => Json(ValidateResponse {
            valid: false,
            error: Some(e.to_string()),
        }),
    }
}

async fn analyze_log(
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, (StatusCode, String)> {
    let options = AnalyzeOptions {
        anonymize: req.anonymize,
        target_player: req.target_player,
        ..AnalyzeOptions::default()
    };

    // Parsing a multi-hundred-MB log is CPU-bound; keep it off the runtime.
    let report = tokio::task::spawn_blocking(move || {
        let start = std::time::Instant::now();
        let result = analyze(&req.log, &options);
        if let Ok(report) = &result {
            tracing::info!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                events = report.events_processed,
                dropped = report.diagnostics.dropped(),
                "analyzed combat log"
            );
        }
        result
    })
    .await
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Task failed: {e}"),
        )
    })?
    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok(Json(AnalyzeResponse {
        success: true,
        data: report,
    }))
}
