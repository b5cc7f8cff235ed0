use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shuttle_core::EngineError;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    Anyhow(anyhow::Error),
}

/// Status code for each engine failure.
pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::CapacityExceeded { .. }
        | EngineError::SlotUnavailable(_)
        | EngineError::TripCancelled(_)
        | EngineError::AlreadyCancelled(_) => StatusCode::CONFLICT,
        EngineError::SlotNotReservable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn internal(err: impl std::fmt::Display) -> (StatusCode, &'static str, String) {
    tracing::error!("Internal Server Error: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL",
        "Internal Server Error".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            AppError::Anyhow(err) => match err.downcast_ref::<EngineError>() {
                Some(EngineError::Storage(msg)) => internal(msg),
                Some(engine) => (status_for(engine), engine.code(), engine.to_string()),
                None => internal(&err),
            },
        };

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}
