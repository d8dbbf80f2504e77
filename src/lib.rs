pub mod api;
pub mod app_state;
pub mod codes;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod store;

use axum::Router;
use axum::extract::Extension;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tracing::info;

//
// Re-export
//
pub use api::{
    AdminAuth, ClaimRequest, ClaimResponse, DetailedStatsResponse, claim_code, detailed_stats,
    health, log_request_errors, stats,
};
pub use app_state::AppState;
pub use codes::{is_claimable, is_importable};
pub use config::Config;
pub use coordinator::{ClaimCoordinator, ClaimOutcome};
pub use error::StoreError;
pub use store::{ClaimAttempt, CodeStats, CodeStore};

pub async fn run(config: Config) {
    // Ensure we're in a proper async context by yielding once
    tokio::task::yield_now().await;

    let listen_on_port = config.listen_on_port;
    let internal_port = config.internal_port;
    let admin_auth = AdminAuth {
        token: config.admin_token.clone(),
    };

    let state = AppState::new(&config)
        .await
        .expect("Failed to create app state");

    // CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Claim API: what the chat-side collaborator calls on each button press
    let claim_app = Router::new()
        .route("/claim", post(claim_code))
        .layer(axum::middleware::from_fn(log_request_errors))
        .layer(cors.clone())
        .layer(Extension(state.clone()));

    // Internal admin API: statistics and readiness
    let internal_app = Router::new()
        .route("/stats", get(stats))
        .route("/stats/detailed", get(detailed_stats))
        .route_layer(axum::middleware::from_fn_with_state(
            admin_auth,
            api::admin_auth_middleware,
        ))
        .route("/health", get(health))
        .layer(axum::middleware::from_fn(log_request_errors))
        .layer(cors)
        .layer(Extension(state));

    // Start claim API server
    let claim_addr = format!("0.0.0.0:{listen_on_port}");
    info!("Claim API listening on {claim_addr}");
    let claim_listener = TcpListener::bind(&claim_addr)
        .await
        .expect("Failed to bind claim API");

    // Start internal API server
    let internal_addr = format!("0.0.0.0:{internal_port}");
    info!("Internal API listening on {internal_addr}");
    let internal_listener = TcpListener::bind(&internal_addr)
        .await
        .expect("Failed to bind internal API");

    // Run both servers concurrently
    tokio::select! {
        result = axum::serve(claim_listener, claim_app) => {
            result.expect("Claim API server error");
        }
        result = axum::serve(internal_listener, internal_app) => {
            result.expect("Internal API server error");
        }
    }
}
