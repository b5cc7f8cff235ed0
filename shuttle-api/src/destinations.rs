use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use shuttle_core::{Destination, PricingTier};
use shuttle_order::DayAvailability;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    /// Service-local date, `YYYY-MM-DD`.
    pub date: NaiveDate,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/destinations", get(list_destinations))
        .route("/v1/destinations/{id}/slots", get(destination_slots))
        .route("/v1/destinations/{id}/tiers", get(destination_tiers))
}

async fn list_destinations(
    State(state): State<AppState>,
) -> Result<Json<Vec<Destination>>, AppError> {
    Ok(Json(state.orchestrator.list_destinations().await?))
}

async fn destination_slots(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<DayAvailability>, AppError> {
    Ok(Json(state.orchestrator.slot_availability(id, query.date).await?))
}

async fn destination_tiers(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PricingTier>>, AppError> {
    Ok(Json(state.orchestrator.pricing_tiers(id).await?))
}
