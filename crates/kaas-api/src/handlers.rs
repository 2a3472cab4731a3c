//! Route handlers
//!
//! Orchestrator failures keep the status each route has always answered
//! with: 500 for app deploys, 400 for app lookups, listings and database
//! deploys.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::{info, instrument, warn};

use kaas_engine::DeployReceipt;
use kaas_workload::{AllStatus, AppIntent, DatabaseIntent, StatusRecord};

use crate::error::{Error, Result};
use crate::server::AppState;

/// Body of a successful deploy; never carries credentials
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    /// App or database name
    pub name: String,
    /// Objects created, as "Kind/name"
    pub created: Vec<String>,
}

impl From<DeployReceipt> for DeployResponse {
    fn from(receipt: DeployReceipt) -> Self {
        Self {
            name: receipt.name,
            created: receipt.created,
        }
    }
}

fn decode<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "rejected request body");
            Err(Error::InvalidBody(rejection.body_text()))
        }
    }
}

/// `POST /api/apps/`
#[instrument(skip_all)]
pub async fn deploy_app(
    State(state): State<AppState>,
    body: std::result::Result<Json<AppIntent>, JsonRejection>,
) -> Result<(StatusCode, Json<DeployResponse>)> {
    let intent = decode(body)?;
    info!(app = %intent.name, "deploy app requested");
    let receipt = state
        .engine
        .deploy_app(&intent)
        .await
        .map_err(|e| Error::engine(e, StatusCode::INTERNAL_SERVER_ERROR))?;
    Ok((StatusCode::CREATED, Json(receipt.into())))
}

/// `GET /api/apps/{name}`
#[instrument(skip_all, fields(app = %name))]
pub async fn app_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StatusRecord>> {
    state
        .engine
        .app_status(&name)
        .await
        .map(Json)
        .map_err(|e| Error::engine(e, StatusCode::BAD_REQUEST))
}

/// `GET /api/apps/`
#[instrument(skip_all)]
pub async fn list_apps(State(state): State<AppState>) -> Result<Json<AllStatus>> {
    state
        .engine
        .all_status()
        .await
        .map(Json)
        .map_err(|e| Error::engine(e, StatusCode::BAD_REQUEST))
}

/// `POST /api/dbs/`
#[instrument(skip_all)]
pub async fn deploy_database(
    State(state): State<AppState>,
    body: std::result::Result<Json<DatabaseIntent>, JsonRejection>,
) -> Result<(StatusCode, Json<DeployResponse>)> {
    let intent = decode(body)?;
    info!(database = %intent.name, "deploy database requested");
    let receipt = state
        .engine
        .deploy_database(&intent)
        .await
        .map_err(|e| Error::engine(e, StatusCode::BAD_REQUEST))?;
    Ok((StatusCode::CREATED, Json(receipt.into())))
}
