//! Validation utilities

use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::reconciliation::{ExpenseConfirmation, IncomeConfirmation, SuppressionConfirmation};
use crate::traits::*;
use crate::types::*;

/// Validate that a bank transaction id is present
pub fn validate_transaction_id(id: &str) -> ReconcileResult<()> {
    if id.trim().is_empty() {
        return Err(ReconcileError::Validation(
            "Transaction ID cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validate that a record date was supplied
pub fn validate_required_date(date: Option<NaiveDate>, id: &str) -> ReconcileResult<()> {
    match date {
        Some(_) => Ok(()),
        None => Err(ReconcileError::Validation(format!(
            "Transaction '{}' is missing a date",
            id
        ))),
    }
}

/// Validate that an amount was supplied and is positive
pub fn validate_positive_amount(amount: Option<&BigDecimal>, id: &str) -> ReconcileResult<()> {
    match amount {
        None => Err(ReconcileError::Validation(format!(
            "Transaction '{}' is missing an amount",
            id
        ))),
        Some(amount) if *amount <= BigDecimal::from(0) => Err(ReconcileError::Validation(
            format!("Transaction '{}' amount must be positive", id),
        )),
        Some(_) => Ok(()),
    }
}

/// Validate that a ledger code is present and well formed
pub fn validate_ledger_code(code: &str, id: &str) -> ReconcileResult<()> {
    if code.trim().is_empty() {
        return Err(ReconcileError::Validation(format!(
            "Transaction '{}' has no ledger code",
            id
        )));
    }

    if code.len() > 20 {
        return Err(ReconcileError::Validation(format!(
            "Ledger code '{}' cannot exceed 20 characters",
            code
        )));
    }

    Ok(())
}

/// Validate a free-form note
pub fn validate_note(note: &str) -> ReconcileResult<()> {
    if note.chars().count() > 500 {
        return Err(ReconcileError::Validation(
            "Note cannot exceed 500 characters".to_string(),
        ));
    }
    Ok(())
}

/// Validate a matching rule before it is stored
pub fn validate_rule(rule: &MatchingRule) -> ReconcileResult<()> {
    if rule.pattern.trim().is_empty() {
        return Err(ReconcileError::Validation(
            "Rule pattern cannot be empty".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&rule.confidence) {
        return Err(ReconcileError::Validation(format!(
            "Rule confidence {} is outside [0, 1]",
            rule.confidence
        )));
    }

    if rule.target_code.trim().is_empty() {
        return Err(ReconcileError::Validation(
            "Rule target code cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Strict validator that also requires ledger codes and bounded notes
pub struct StrictConfirmationValidator;

impl ConfirmationValidator for StrictConfirmationValidator {
    fn validate_income(&self, item: &IncomeConfirmation) -> ReconcileResult<()> {
        DefaultConfirmationValidator.validate_income(item)?;
        validate_ledger_code(&item.code, &item.transaction_id)?;
        validate_note(&item.note)
    }

    fn validate_expense(&self, item: &ExpenseConfirmation) -> ReconcileResult<()> {
        DefaultConfirmationValidator.validate_expense(item)?;
        validate_ledger_code(&item.code, &item.transaction_id)?;
        validate_note(&item.note)
    }

    fn validate_suppression(&self, item: &SuppressionConfirmation) -> ReconcileResult<()> {
        DefaultConfirmationValidator.validate_suppression(item)?;
        validate_note(&item.reason)
    }
}
