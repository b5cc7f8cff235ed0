use shuttle_core::{EngineResult, UnitOfWork};

/// Commit on success, roll back on failure. The original error wins over a
/// rollback error, which is only logged.
pub(crate) async fn complete<T>(
    uow: Box<dyn UnitOfWork>,
    result: EngineResult<T>,
) -> EngineResult<T> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed after {}", err);
            }
            Err(err)
        }
    }
}
