use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use shuttle_core::{CreditTransaction, Identity, Page, PageRequest};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub credits: i64,
    /// Display value only; credits are the unit of account.
    pub rand_equivalent: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/credits/balance", get(balance))
        .route("/v1/credits/transactions", get(transactions))
}

async fn balance(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<BalanceResponse>, AppError> {
    let credits = state.ledger.balance(identity.user_id).await?;
    Ok(Json(BalanceResponse {
        user_id: identity.user_id,
        credits,
        rand_equivalent: credits * state.rand_per_credit,
    }))
}

async fn transactions(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Page<CreditTransaction>>, AppError> {
    let page = PageRequest::new(query.page, query.per_page);
    Ok(Json(state.ledger.history(identity.user_id, page).await?))
}
