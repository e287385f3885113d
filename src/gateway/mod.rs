pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::GatewayConfig;
use state::AppState;

/// All routes plus Swagger UI at `/docs`
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        // Recipient validation
        .route("/api/v1/validations", post(handlers::create_validation))
        .route("/api/v1/validations/{id}", get(handlers::get_validation))
        .route(
            "/api/v1/validations/{id}/history",
            get(handlers::get_validation_history),
        )
        // Disbursements
        .route("/api/v1/disbursements", post(handlers::submit_disbursement))
        .route("/api/v1/disbursements/{id}", get(handlers::get_disbursement))
        .route(
            "/api/v1/disbursements/{id}/history",
            get(handlers::get_disbursement_history),
        )
        .route(
            "/api/v1/disbursements/{id}/override",
            post(handlers::override_disbursement),
        )
        .route(
            "/api/v1/disbursements/{id}/cancel",
            post(handlers::cancel_disbursement),
        )
        // Vendor webhooks
        .route(
            "/api/v1/callbacks/{vendor}/disbursement",
            post(handlers::disbursement_callback),
        )
        .route(
            "/api/v1/callbacks/{vendor}/validation",
            post(handlers::validation_callback),
        )
        .with_state(state)
        // Stateless, added after with_state
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Bind and serve until the listener fails
pub async fn run_server(config: &GatewayConfig, state: Arc<AppState>) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(addr = %addr, "Gateway listening");
    tracing::info!(docs = %format!("http://{}/docs", addr), "API docs available");

    axum::serve(listener, app).await
}
