use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shuttle_catalog::TierReport;
use shuttle_core::payment::PurchaseNotice;
use shuttle_core::{CreditTransaction, Destination, Identity, PricingTier, Trip};
use shuttle_order::{LedgerAudit, TripCancellation, TripManifest};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateDestinationRequest {
    pub name: String,
    pub default_duration_minutes: u32,
    pub default_capacity: u32,
    pub calendar_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TierInput {
    pub passenger_count: u32,
    pub cost_per_passenger: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetTiersRequest {
    pub tiers: Vec<TierInput>,
}

#[derive(Debug, Serialize)]
pub struct TiersResponse {
    pub tiers: Vec<PricingTier>,
    pub report: TierReport,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleTripRequest {
    pub destination_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub capacity: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    pub user_id: Uuid,
    pub amount: i64,
    pub reason: String,
    #[serde(default)]
    pub allow_negative: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/credits/purchases", post(record_purchase))
        .route("/v1/admin/destinations", post(create_destination))
        .route("/v1/admin/destinations/{id}/tiers", put(set_tiers))
        .route("/v1/admin/trips", post(schedule_trip))
        .route("/v1/admin/trips/{id}", get(trip_manifest))
        .route("/v1/admin/trips/{id}/cancel", post(cancel_trip))
        .route("/v1/admin/credits/adjustments", post(adjust_credits))
        .route("/v1/admin/credits/{user_id}/audit", get(audit))
}

// ============================================================================
// Catalog
// ============================================================================

async fn create_destination(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateDestinationRequest>,
) -> Result<(StatusCode, Json<Destination>), AppError> {
    let mut destination = Destination::new(req.name, req.default_duration_minutes, req.default_capacity)?;
    if let Some(calendar_id) = req.calendar_id {
        destination = destination.with_calendar(calendar_id);
    }

    let created = state
        .orchestrator
        .create_destination(&identity, destination)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn set_tiers(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetTiersRequest>,
) -> Result<Json<TiersResponse>, AppError> {
    let (tiers, report) = state
        .orchestrator
        .set_pricing_tiers(
            &identity,
            id,
            req.tiers
                .into_iter()
                .map(|t| (t.passenger_count, t.cost_per_passenger)),
        )
        .await?;
    Ok(Json(TiersResponse { tiers, report }))
}

// ============================================================================
// Trips
// ============================================================================

async fn schedule_trip(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ScheduleTripRequest>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let trip = state
        .orchestrator
        .schedule_trip(&identity, req.destination_id, req.start_time, req.capacity)
        .await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn trip_manifest(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<TripManifest>, AppError> {
    Ok(Json(state.orchestrator.trip_manifest(&identity, id).await?))
}

async fn cancel_trip(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<TripCancellation>, AppError> {
    Ok(Json(state.orchestrator.cancel_trip(&identity, id).await?))
}

// ============================================================================
// Credits
// ============================================================================

async fn record_purchase(
    State(state): State<AppState>,
    Json(notice): Json<PurchaseNotice>,
) -> Result<(StatusCode, Json<CreditTransaction>), AppError> {
    let transaction = state.ledger.record_purchase(&notice).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

async fn adjust_credits(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<AdjustmentRequest>,
) -> Result<(StatusCode, Json<CreditTransaction>), AppError> {
    let transaction = state
        .ledger
        .adjust(&identity, req.user_id, req.amount, &req.reason, req.allow_negative)
        .await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

async fn audit(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<LedgerAudit>, AppError> {
    Ok(Json(state.ledger.audit(user_id).await?))
}
