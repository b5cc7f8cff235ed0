use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::EngineError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Purchase,
    Usage,
    Refund,
    AdminAdjustment,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionType::Purchase => "PURCHASE",
            TransactionType::Usage => "USAGE",
            TransactionType::Refund => "REFUND",
            TransactionType::AdminAdjustment => "ADMIN_ADJUSTMENT",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TransactionType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PURCHASE" => Ok(TransactionType::Purchase),
            "USAGE" => Ok(TransactionType::Usage),
            "REFUND" => Ok(TransactionType::Refund),
            "ADMIN_ADJUSTMENT" => Ok(TransactionType::AdminAdjustment),
            other => Err(EngineError::Storage(format!("Unknown transaction type: {}", other))),
        }
    }
}

/// Append-only ledger entry. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Signed: positive credits the user, negative debits.
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub description: String,
    pub booking_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn new(
        user_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        description: impl Into<String>,
        booking_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            transaction_type,
            description: description.into(),
            booking_id,
            created_at: Utc::now(),
        }
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// 1-based page selector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    /// Clamps out-of-range input instead of failing; page 0 reads as page 1.
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.per_page as u64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_clamps() {
        let req = PageRequest::new(Some(0), Some(1_000));
        assert_eq!(req.page, 1);
        assert_eq!(req.per_page, MAX_PAGE_SIZE);
        assert_eq!(req.offset(), 0);

        let req = PageRequest::new(Some(3), Some(10));
        assert_eq!(req.offset(), 20);
    }

    #[test]
    fn test_transaction_type_strings() {
        assert_eq!(TransactionType::AdminAdjustment.to_string(), "ADMIN_ADJUSTMENT");
        assert_eq!("REFUND".parse::<TransactionType>().unwrap(), TransactionType::Refund);
    }
}
