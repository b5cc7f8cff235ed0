use serde::Serialize;
use shuttle_core::payment::PurchaseNotice;
use shuttle_core::{
    CreditTransaction, EngineError, EngineResult, Identity, Page, PageRequest, Store,
    TransactionType, UnitOfWork,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::unit_of_work::complete;

/// Whether a debit may take the balance below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPolicy {
    RequireFunds,
    /// Only honoured for admin adjustments.
    AllowNegative,
}

/// A single signed movement of credits, before it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub user_id: Uuid,
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub description: String,
    pub booking_id: Option<Uuid>,
}

impl Posting {
    pub fn purchase(user_id: Uuid, credits: i64, description: impl Into<String>) -> Self {
        Self {
            user_id,
            amount: credits,
            transaction_type: TransactionType::Purchase,
            description: description.into(),
            booking_id: None,
        }
    }

    /// Charge `credits` (a positive number) for a booking.
    pub fn usage(user_id: Uuid, booking_id: Uuid, credits: i64, description: impl Into<String>) -> Self {
        Self {
            user_id,
            amount: -credits,
            transaction_type: TransactionType::Usage,
            description: description.into(),
            booking_id: Some(booking_id),
        }
    }

    /// Return `credits` (a positive number) for a booking.
    pub fn refund(user_id: Uuid, booking_id: Uuid, credits: i64, description: impl Into<String>) -> Self {
        Self {
            user_id,
            amount: credits,
            transaction_type: TransactionType::Refund,
            description: description.into(),
            booking_id: Some(booking_id),
        }
    }

    pub fn adjustment(user_id: Uuid, amount: i64, description: impl Into<String>) -> Self {
        Self {
            user_id,
            amount,
            transaction_type: TransactionType::AdminAdjustment,
            description: description.into(),
            booking_id: None,
        }
    }

    fn validate(&self, policy: ApplyPolicy) -> EngineResult<()> {
        if self.amount == 0 {
            return Err(EngineError::Validation(
                "Ledger postings must move a non-zero amount".to_string(),
            ));
        }

        let sign_ok = match self.transaction_type {
            TransactionType::Purchase | TransactionType::Refund => self.amount > 0,
            TransactionType::Usage => self.amount < 0,
            TransactionType::AdminAdjustment => true,
        };
        if !sign_ok {
            return Err(EngineError::Validation(format!(
                "{} postings cannot carry amount {}",
                self.transaction_type, self.amount
            )));
        }

        if policy == ApplyPolicy::AllowNegative
            && self.transaction_type != TransactionType::AdminAdjustment
        {
            return Err(EngineError::Validation(
                "Only admin adjustments may overdraw a balance".to_string(),
            ));
        }

        Ok(())
    }
}

/// Balance versus transaction log for one user.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LedgerAudit {
    pub user_id: Uuid,
    pub balance: i64,
    pub transaction_sum: i64,
    pub consistent: bool,
}

/// Sole writer of credit balances and the transaction log.
///
/// Every posting appends a transaction and moves the balance by the same
/// amount in one unit of work, so a balance always equals the sum of its
/// user's transactions.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Apply one posting in its own unit of work.
    pub async fn apply(&self, posting: Posting, policy: ApplyPolicy) -> EngineResult<CreditTransaction> {
        let mut uow = self.store.begin().await?;
        let result = Self::apply_in(uow.as_mut(), posting, policy).await;
        complete(uow, result).await
    }

    /// Apply one posting inside a caller-owned unit of work.
    ///
    /// The balance row is locked before the funds check, so check and write
    /// cannot interleave with another posting for the same user. On
    /// `InsufficientCredits` nothing has been written.
    pub async fn apply_in(
        uow: &mut dyn UnitOfWork,
        posting: Posting,
        policy: ApplyPolicy,
    ) -> EngineResult<CreditTransaction> {
        posting.validate(policy)?;

        let balance = uow.lock_balance(posting.user_id).await?;
        let new_balance = balance + posting.amount;

        if posting.amount < 0 && new_balance < 0 && policy == ApplyPolicy::RequireFunds {
            return Err(EngineError::InsufficientCredits {
                user_id: posting.user_id,
                balance,
                required: -posting.amount,
            });
        }

        let transaction = CreditTransaction::new(
            posting.user_id,
            posting.amount,
            posting.transaction_type,
            posting.description,
            posting.booking_id,
        );
        uow.append_transaction(&transaction).await?;
        uow.store_balance(posting.user_id, new_balance).await?;

        tracing::debug!(
            user_id = %transaction.user_id,
            amount = transaction.amount,
            kind = %transaction.transaction_type,
            balance = new_balance,
            "Ledger posting applied"
        );

        Ok(transaction)
    }

    /// Lock the balance rows of `users` in ascending id order.
    ///
    /// Fan-outs touch several balances; taking every lock up front in one
    /// global order means two fan-outs can never wait on each other in a cycle.
    pub async fn lock_accounts(
        uow: &mut dyn UnitOfWork,
        users: impl IntoIterator<Item = Uuid>,
    ) -> EngineResult<()> {
        let ordered: BTreeSet<Uuid> = users.into_iter().collect();
        for user_id in ordered {
            uow.lock_balance(user_id).await?;
        }
        Ok(())
    }

    /// Payment collaborator entry point: credits were bought.
    pub async fn record_purchase(&self, notice: &PurchaseNotice) -> EngineResult<CreditTransaction> {
        notice.validate()?;
        let transaction = self
            .apply(
                Posting::purchase(notice.user_id, notice.credits, notice.description()),
                ApplyPolicy::RequireFunds,
            )
            .await?;

        info!(user_id = %notice.user_id, credits = notice.credits, "Credit purchase recorded");
        Ok(transaction)
    }

    /// Manual correction by an administrator.
    pub async fn adjust(
        &self,
        identity: &Identity,
        user_id: Uuid,
        amount: i64,
        reason: &str,
        allow_negative: bool,
    ) -> EngineResult<CreditTransaction> {
        identity.ensure_admin()?;
        if reason.trim().is_empty() {
            return Err(EngineError::Validation(
                "Adjustments require a reason".to_string(),
            ));
        }

        let policy = if allow_negative {
            ApplyPolicy::AllowNegative
        } else {
            ApplyPolicy::RequireFunds
        };
        let description = format!("Admin adjustment by {}: {}", identity.user_id, reason);
        let transaction = self
            .apply(Posting::adjustment(user_id, amount, description), policy)
            .await?;

        info!(user_id = %user_id, amount, admin = %identity.user_id, "Admin adjustment applied");
        Ok(transaction)
    }

    /// Current balance; users without a balance row have zero.
    pub async fn balance(&self, user_id: Uuid) -> EngineResult<i64> {
        let mut uow = self.store.begin().await?;
        let result = uow.balance(user_id).await.map(|b| b.unwrap_or(0));
        complete(uow, result).await
    }

    pub async fn history(&self, user_id: Uuid, page: PageRequest) -> EngineResult<Page<CreditTransaction>> {
        let mut uow = self.store.begin().await?;
        let result = uow.transactions(user_id, page).await;
        complete(uow, result).await
    }

    pub async fn audit(&self, user_id: Uuid) -> EngineResult<LedgerAudit> {
        let mut uow = self.store.begin().await?;
        let result = async {
            let balance = uow.balance(user_id).await?.unwrap_or(0);
            let transaction_sum = uow.transaction_sum(user_id).await?;
            Ok::<_, EngineError>(LedgerAudit {
                user_id,
                balance,
                transaction_sum,
                consistent: balance == transaction_sum,
            })
        }
        .await;
        complete(uow, result).await
    }
}
