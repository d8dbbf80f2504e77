use crate::AppState;
use crate::coordinator::ClaimOutcome;
use crate::store::CodeStats;
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Serialize, Deserialize)]
pub struct ClaimRequest {
    pub user_id: String,
}

#[derive(Serialize, Deserialize)]
pub struct ClaimResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl ClaimResponse {
    fn message_only(status: &str, message: &str) -> Self {
        Self {
            status: status.into(),
            code: None,
            message: message.into(),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct DetailedStatsResponse {
    pub total_codes: i64,
    pub available: i64,
    pub claimed: i64,
    pub claimed_percent: f64,
    pub distinct_claimants: i64,
    pub generated_at: String,
}

#[axum::debug_handler]
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// One claim request, invoked by the chat-side collaborator per button press.
#[axum::debug_handler]
pub async fn claim_code(
    Extension(state): Extension<AppState>,
    Json(request): Json<ClaimRequest>,
) -> impl IntoResponse {
    let user_id = request.user_id.trim();
    if user_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ClaimResponse::message_only(
                "invalid_request",
                "user_id must not be empty",
            )),
        );
    }

    match state.coordinator.request_claim(user_id).await {
        ClaimOutcome::Granted(code) => (
            StatusCode::OK,
            Json(ClaimResponse {
                status: "granted".into(),
                code: Some(code),
                message: "Save this code somewhere safe. It is only shown once!".into(),
            }),
        ),
        ClaimOutcome::QuotaExceeded => (
            StatusCode::CONFLICT,
            Json(ClaimResponse::message_only(
                "quota_exceeded",
                "You have already claimed the maximum number of codes allowed.",
            )),
        ),
        ClaimOutcome::Exhausted => (
            StatusCode::GONE,
            Json(ClaimResponse::message_only(
                "exhausted",
                "Sorry, no codes are currently available.",
            )),
        ),
        // Diagnostic was already logged by the coordinator; only the generic
        // message leaves the server.
        ClaimOutcome::Fault(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ClaimResponse::message_only(
                "error",
                "An error occurred while claiming your code. Please try again later.",
            )),
        ),
    }
}

#[axum::debug_handler]
pub async fn stats(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match state.store.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(error) => {
            error!(%error, "Failed to read code stats");
            internal_error()
        }
    }
}

#[axum::debug_handler]
pub async fn detailed_stats(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let stats = match state.store.stats().await {
        Ok(stats) => stats,
        Err(error) => {
            error!(%error, "Failed to read code stats");
            return internal_error();
        }
    };
    let distinct_claimants = match state.store.count_distinct_claimants().await {
        Ok(count) => count,
        Err(error) => {
            error!(%error, "Failed to count distinct claimants");
            return internal_error();
        }
    };

    let CodeStats { available, claimed } = stats;
    (
        StatusCode::OK,
        Json(DetailedStatsResponse {
            total_codes: available + claimed,
            available,
            claimed,
            claimed_percent: claimed_percent(available, claimed),
            distinct_claimants,
            generated_at: chrono::Utc::now().to_rfc3339(),
        }),
    )
        .into_response()
}

fn internal_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal error" })),
    )
        .into_response()
}

/// Share of eligible codes already claimed, rounded to one decimal.
/// 0 when nothing has been claimed yet.
fn claimed_percent(available: i64, claimed: i64) -> f64 {
    if claimed > 0 {
        let ratio = claimed as f64 / (available + claimed) as f64;
        (ratio * 1000.0).round() / 10.0
    } else {
        0.0
    }
}
