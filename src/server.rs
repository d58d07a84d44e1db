use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use tracing::info;
use uuid::Uuid;

use crate::disburse::reconciler::{DisbursementOutcome, DisbursementRequest, Reconciler};
use crate::error::AppResult;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/v1/merchants/:uid/disbursements",
            post(create_disbursement),
        )
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn create_disbursement(
    State(state): State<AppState>,
    Path(merchant_uid): Path<Uuid>,
    Json(request): Json<DisbursementRequest>,
) -> AppResult<Json<DisbursementOutcome>> {
    let outcome = state.reconciler.initiate(merchant_uid, request).await?;
    Ok(Json(outcome))
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("server listening on {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
