//! Application served behind the guards by the bundled binary.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::config::AppConfig;
use crate::limits::AdmissionController;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub in_flight: usize,
}

/// `/health` reports the admission counter; everything else is read from `config.root`.
pub fn router(config: &AppConfig, controller: AdmissionController) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .fallback_service(ServeDir::new(&config.root))
        .with_state(controller);

    if config.trace_requests {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

async fn health(State(controller): State<AdmissionController>) -> Json<HealthStatus> {
    Json(HealthStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        in_flight: controller.in_flight(),
    })
}
