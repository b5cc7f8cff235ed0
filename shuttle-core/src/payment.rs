use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, EngineResult};

/// Completed credit purchase reported by the payment collaborator.
/// The gateway flow itself happens elsewhere; only the outcome reaches the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseNotice {
    pub user_id: Uuid,
    pub credits: i64,
    /// Gateway reference, kept in the transaction description for audit.
    pub reference: String,
}

impl PurchaseNotice {
    pub fn validate(&self) -> EngineResult<()> {
        if self.credits <= 0 {
            return Err(EngineError::Validation(
                "Purchased credits must be positive".to_string(),
            ));
        }
        if self.reference.trim().is_empty() {
            return Err(EngineError::Validation(
                "Purchase reference is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn description(&self) -> String {
        format!("Credit purchase ({})", self.reference)
    }
}
