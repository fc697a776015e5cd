//! Reconciliation of individually attributed cash offerings against the
//! lump-sum bank deposit they were banked as

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::MatchingConfig;
use crate::reconciliation::gate::DuplicateGate;
use crate::traits::*;
use crate::types::*;
use crate::utils::format_won;
use crate::utils::validation::validate_positive_amount;

/// Cash offerings of one counting window
#[derive(Debug, Clone, PartialEq)]
pub struct CashOfferingBatch {
    pub range: DateRange,
    pub offerings: Vec<CashOffering>,
}

impl CashOfferingBatch {
    /// Build a batch, dropping offerings dated outside `range`
    pub fn new(range: DateRange, offerings: Vec<CashOffering>) -> Self {
        let (inside, outside): (Vec<_>, Vec<_>) = offerings
            .into_iter()
            .partition(|offering| range.contains(offering.date));
        for offering in &outside {
            tracing::warn!(
                offering_id = %offering.id,
                date = %offering.date,
                range = %range,
                "cash offering outside reconciliation range ignored"
            );
        }
        Self {
            range,
            offerings: inside,
        }
    }

    pub fn total(&self) -> BigDecimal {
        self.offerings.iter().map(|o| &o.amount).sum()
    }

    pub fn len(&self) -> usize {
        self.offerings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offerings.is_empty()
    }

    /// Reason recorded on the suppressed deposit
    pub fn suppression_reason(&self) -> String {
        format!(
            "cash offering lump sum: {} offerings totalling {} ({})",
            self.len(),
            format_won(&self.total()),
            self.range
        )
    }
}

/// Outcome of looking for the deposit that banks a cash batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositMatch {
    /// Exactly one cash deposit lies within tolerance of the batch total
    Unique {
        transaction_id: String,
        difference: BigDecimal,
    },
    /// Several cash deposits lie within tolerance
    Ambiguous { transaction_ids: Vec<String> },
    /// No cash deposit lies within tolerance; `candidates` counts the cash
    /// deposits that were considered
    NoMatch { candidates: usize },
}

/// Find the single pending cash deposit banking `batch`
pub fn match_deposit(
    batch: &CashOfferingBatch,
    pending: &[BankTransaction],
    config: &MatchingConfig,
) -> DepositMatch {
    let total = batch.total();
    let tokens: Vec<String> = config.indicator_tokens().collect();

    let candidates: Vec<&BankTransaction> = pending
        .iter()
        .filter(|txn| txn.is_pending() && txn.is_deposit())
        .filter(|txn| batch.range.contains(txn.transaction_date))
        .filter(|txn| {
            let text = txn.search_text();
            tokens.iter().any(|token| text.contains(token.as_str()))
        })
        .collect();

    let within: Vec<(&BankTransaction, BigDecimal)> = candidates
        .iter()
        .map(|txn| (*txn, (&txn.deposit - &total).abs()))
        .filter(|(_, difference)| *difference < config.cash_tolerance)
        .collect();

    match within.as_slice() {
        [] => DepositMatch::NoMatch {
            candidates: candidates.len(),
        },
        [(txn, difference)] => DepositMatch::Unique {
            transaction_id: txn.id.clone(),
            difference: difference.clone(),
        },
        many => DepositMatch::Ambiguous {
            transaction_ids: many.iter().map(|(txn, _)| txn.id.clone()).collect(),
        },
    }
}

/// Result of reconciling one cash batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashReconciliation {
    pub range: DateRange,
    pub batch_size: usize,
    pub total: BigDecimal,
    /// Income records posted for the individual offerings
    pub posted_income_ids: Vec<String>,
    /// Deposit marked as suppressed, if one matched
    pub suppressed_transaction_id: Option<String>,
    /// Non-fatal warning for manual reconciliation
    pub warning: Option<String>,
    /// Store failure after the offerings were posted
    pub error: Option<String>,
}

/// Posts cash offerings and suppresses the deposit that banked them
pub struct CashOfferingReconciler<B: BankTransactionStore, L: LedgerStore> {
    gate: DuplicateGate<B>,
    bank: Arc<B>,
    ledger: Arc<L>,
    config: MatchingConfig,
}

impl<B: BankTransactionStore, L: LedgerStore> CashOfferingReconciler<B, L> {
    pub fn new(bank: Arc<B>, ledger: Arc<L>, config: MatchingConfig) -> Self {
        Self {
            gate: DuplicateGate::new(Arc::clone(&bank)),
            bank,
            ledger,
            config,
        }
    }

    /// Post every offering in `range` and suppress the matching deposit
    ///
    /// Offerings are posted as income whether or not a deposit matches. A
    /// missing or ambiguous deposit only produces a warning, and only when the
    /// batch total reaches the materiality threshold. Once the offerings are
    /// posted the call always returns their ids; later store failures land in
    /// `error` and a concurrently claimed deposit in `warning`.
    pub async fn reconcile(
        &self,
        range: DateRange,
        offerings: Vec<CashOffering>,
        created_by: &str,
    ) -> ReconcileResult<CashReconciliation> {
        let valid: Vec<CashOffering> = offerings
            .into_iter()
            .filter(|offering| {
                match validate_positive_amount(Some(&offering.amount), &offering.id) {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::warn!(offering_id = %offering.id, error = %err, "skipping cash offering");
                        false
                    }
                }
            })
            .collect();
        let batch = CashOfferingBatch::new(range, valid);

        let records: Vec<IncomeRecord> = batch
            .offerings
            .iter()
            .map(|offering| cash_income_record(offering, created_by))
            .collect();
        if !records.is_empty() {
            self.ledger.append_income(&records).await?;
        }

        let mut result = CashReconciliation {
            range,
            batch_size: batch.len(),
            total: batch.total(),
            posted_income_ids: records.into_iter().map(|r| r.id).collect(),
            suppressed_transaction_id: None,
            warning: None,
            error: None,
        };

        if batch.is_empty() {
            return Ok(result);
        }

        // the offerings are posted; from here on failures are reported, not returned
        let pending = match self.bank.list_pending().await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::warn!(range = %batch.range, error = %err, "could not list pending lines after posting cash offerings");
                result.error = Some(format!(
                    "cash offerings posted but pending lines could not be read: {}",
                    err
                ));
                return Ok(result);
            }
        };

        match match_deposit(&batch, &pending, &self.config) {
            DepositMatch::Unique {
                transaction_id,
                difference,
            } => match self.suppress_deposit(&batch, &transaction_id).await {
                Ok(true) => {
                    tracing::info!(
                        transaction_id = %transaction_id,
                        batch_size = batch.len(),
                        total = %batch.total(),
                        difference = %difference,
                        "suppressed cash offering deposit"
                    );
                    result.suppressed_transaction_id = Some(transaction_id);
                }
                Ok(false) => {
                    tracing::warn!(transaction_id = %transaction_id, "cash deposit reconciled concurrently");
                    result.warning = Some(format!(
                        "deposit {} matching {} was reconciled concurrently; check it manually",
                        transaction_id,
                        batch.suppression_reason()
                    ));
                }
                Err(err) => {
                    tracing::warn!(transaction_id = %transaction_id, error = %err, "cash deposit suppression failed");
                    result.error = Some(format!(
                        "cash offerings posted but deposit {} could not be suppressed: {}",
                        transaction_id, err
                    ));
                }
            },
            DepositMatch::Ambiguous { transaction_ids } => {
                result.warning = self.mismatch_warning(
                    &batch,
                    &format!("several deposits match: {}", transaction_ids.join(", ")),
                );
            }
            DepositMatch::NoMatch { candidates } => {
                result.warning = self.mismatch_warning(
                    &batch,
                    &format!("{} cash deposits checked", candidates),
                );
            }
        }

        Ok(result)
    }

    async fn suppress_deposit(
        &self,
        batch: &CashOfferingBatch,
        transaction_id: &str,
    ) -> ReconcileResult<bool> {
        let decision = self.gate.admit(&[transaction_id.to_string()]).await?;
        if decision.admitted.is_empty() {
            return Ok(false);
        }

        let update = StatusUpdate::suppressed(transaction_id.to_string(), batch.suppression_reason());
        let outcome = self.bank.batch_update_status(&[update]).await?;
        Ok(outcome.success.iter().any(|id| id == transaction_id))
    }

    fn mismatch_warning(&self, batch: &CashOfferingBatch, detail: &str) -> Option<String> {
        let total = batch.total();
        if total < self.config.materiality_threshold {
            tracing::debug!(total = %total, "cash total below materiality threshold, no warning");
            return None;
        }

        let mismatch = ReconcileError::ReconciliationMismatch {
            batch_size: batch.len(),
            total: total.clone(),
        };
        let warning = format!(
            "{} in {}: {}; reconcile {} manually",
            mismatch,
            batch.range,
            detail,
            format_won(&total)
        );
        tracing::warn!(range = %batch.range, total = %total, detail = %detail, "cash offerings not reconciled");
        Some(warning)
    }
}

fn cash_income_record(offering: &CashOffering, created_by: &str) -> IncomeRecord {
    IncomeRecord {
        id: uuid::Uuid::new_v4().to_string(),
        date: offering.date,
        source: IncomeSource::Cash,
        code: offering.code.clone(),
        donor_name: offering.attribution.clone(),
        amount: offering.amount.clone(),
        note: format!("cash offering {}", offering.id),
        created_by: created_by.to_string(),
        transaction_id: None,
        created_at: chrono::Utc::now().naive_utc(),
    }
}
