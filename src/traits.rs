//! Collaborator traits for storage abstraction and extensibility

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::reconciliation::{ExpenseConfirmation, IncomeConfirmation, SuppressionConfirmation};
use crate::types::*;
use crate::utils::validation::{validate_positive_amount, validate_required_date, validate_transaction_id};

/// Access to imported bank ledger lines
///
/// Implementations may sit on top of any backing store (spreadsheet API,
/// SQL, document store). `batch_update_status` must report success or
/// failure per item and must only accept an update whose line is still
/// `pending` at the moment of the write.
#[async_trait]
pub trait BankTransactionStore: Send + Sync {
    /// List every line whose status is still `pending`, in import order
    async fn list_pending(&self) -> ReconcileResult<Vec<BankTransaction>>;

    /// Read the live status of the given lines; unknown ids are absent
    async fn get_status_map(
        &self,
        ids: &[String],
    ) -> ReconcileResult<HashMap<String, MatchedStatus>>;

    /// Apply status updates, reporting the outcome of each item
    async fn batch_update_status(
        &self,
        updates: &[StatusUpdate],
    ) -> ReconcileResult<BatchUpdateOutcome>;
}

/// Append-only access to the income and expense ledgers
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append_income(&self, records: &[IncomeRecord]) -> ReconcileResult<()>;

    async fn append_expense(&self, records: &[ExpenseRecord]) -> ReconcileResult<()>;
}

/// Persisted matching rules
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// List rules of one family in their stored order
    async fn list_rules(&self, rule_type: RuleType) -> ReconcileResult<Vec<MatchingRule>>;

    /// Increase a rule's usage count by one
    async fn increment_usage(&self, rule_id: &str) -> ReconcileResult<()>;

    async fn add_rule(&self, rule: &MatchingRule) -> ReconcileResult<()>;
}

/// Individually attributed cash offerings entered by the counting team
#[async_trait]
pub trait CashOfferingSource: Send + Sync {
    /// List offerings dated within `start..=end`
    async fn list_offerings(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ReconcileResult<Vec<CashOffering>>;
}

/// A single handle implementing every collaborator interface
pub trait ReconciliationStore:
    BankTransactionStore + LedgerStore + RuleStore + CashOfferingSource
{
}

impl<T> ReconciliationStore for T where
    T: BankTransactionStore + LedgerStore + RuleStore + CashOfferingSource
{
}

/// Trait for implementing custom confirmation validation rules
pub trait ConfirmationValidator: Send + Sync {
    /// Validate an income confirmation before it is committed
    fn validate_income(&self, item: &IncomeConfirmation) -> ReconcileResult<()>;

    /// Validate an expense confirmation before it is committed
    fn validate_expense(&self, item: &ExpenseConfirmation) -> ReconcileResult<()>;

    /// Validate a suppression before it is committed
    fn validate_suppression(&self, item: &SuppressionConfirmation) -> ReconcileResult<()>;
}

/// Default validator checking only the fields a record cannot exist without
pub struct DefaultConfirmationValidator;

impl ConfirmationValidator for DefaultConfirmationValidator {
    fn validate_income(&self, item: &IncomeConfirmation) -> ReconcileResult<()> {
        validate_transaction_id(&item.transaction_id)?;
        validate_required_date(item.date, &item.transaction_id)?;
        validate_positive_amount(item.amount.as_ref(), &item.transaction_id)
    }

    fn validate_expense(&self, item: &ExpenseConfirmation) -> ReconcileResult<()> {
        validate_transaction_id(&item.transaction_id)?;
        validate_required_date(item.date, &item.transaction_id)?;
        validate_positive_amount(item.amount.as_ref(), &item.transaction_id)
    }

    fn validate_suppression(&self, item: &SuppressionConfirmation) -> ReconcileResult<()> {
        validate_transaction_id(&item.transaction_id)
    }
}
