use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use shuttle_core::{Booking, BookingRequest, Identity};
use shuttle_order::{BookingReceipt, CancellationReceipt, SlotReservation};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking).get(list_bookings))
        .route("/v1/bookings/reserve", post(reserve_slot))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<BookingRequest>,
) -> Result<(StatusCode, Json<BookingReceipt>), AppError> {
    let receipt = state.orchestrator.create_booking(&identity, req).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn reserve_slot(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SlotReservation>,
) -> Result<(StatusCode, Json<BookingReceipt>), AppError> {
    let receipt = state.orchestrator.reserve_slot(&identity, req).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn list_bookings(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.orchestrator.user_bookings(&identity).await?))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancellationReceipt>, AppError> {
    Ok(Json(state.orchestrator.cancel_booking(&identity, id).await?))
}
