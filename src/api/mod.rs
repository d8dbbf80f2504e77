pub mod middleware;
pub mod routes;

// Re-export public types and functions
pub use middleware::{AdminAuth, admin_auth_middleware, log_request_errors};
pub use routes::{
    ClaimRequest, ClaimResponse, DetailedStatsResponse, claim_code, detailed_stats, health, stats,
};
