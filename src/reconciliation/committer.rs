//! Batch confirmation of operator-reviewed matches
//!
//! A confirmation request carries three sub-batches (income, expense and
//! suppression). Each one is validated, passed through the
//! [`DuplicateGate`], written with a single `batch_update_status` call and,
//! for lines the store accepted, appended to the ledger. Sub-batches run
//! concurrently and a failure in one never blocks or rolls back another.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::matching::rules::RuleBook;
use crate::reconciliation::gate::DuplicateGate;
use crate::traits::*;
use crate::types::*;

/// Operator-confirmed income match for one bank line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeConfirmation {
    pub transaction_id: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub donor_name: String,
    #[serde(default)]
    pub note: String,
    /// Rule that suggested the match
    #[serde(default)]
    pub rule_id: Option<String>,
    /// Pattern to remember when no rule suggested the match
    #[serde(default)]
    pub learn_pattern: Option<String>,
    /// Status the caller last saw; informational only
    #[serde(default)]
    pub observed_status: Option<MatchedStatus>,
}

/// Operator-confirmed expense match for one bank line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseConfirmation {
    pub transaction_id: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub learn_pattern: Option<String>,
    #[serde(default)]
    pub observed_status: Option<MatchedStatus>,
}

/// Operator-confirmed suppression of one bank line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressionConfirmation {
    pub transaction_id: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub observed_status: Option<MatchedStatus>,
}

/// One confirmation request as submitted by an operator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub created_by: String,
    #[serde(default)]
    pub income: Vec<IncomeConfirmation>,
    #[serde(default)]
    pub expense: Vec<ExpenseConfirmation>,
    #[serde(default)]
    pub suppress: Vec<SuppressionConfirmation>,
}

impl ConfirmationRequest {
    pub fn new(created_by: &str) -> Self {
        Self {
            created_by: created_by.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.income.is_empty() && self.expense.is_empty() && self.suppress.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubBatchKind {
    Income,
    Expense,
    Suppression,
}

impl fmt::Display for SubBatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubBatchKind::Income => f.write_str("income"),
            SubBatchKind::Expense => f.write_str("expense"),
            SubBatchKind::Suppression => f.write_str("suppression"),
        }
    }
}

/// What happened to each line of one sub-batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubBatchReport {
    pub kind: SubBatchKind,
    pub requested: usize,
    /// Lines whose status changed and whose records were written
    pub committed: Vec<String>,
    /// Lines dropped by validation
    pub skipped: Vec<String>,
    /// Lines already processed by someone else
    pub conflicts: Vec<String>,
    /// Lines the store refused or could not write
    pub failed: Vec<String>,
    pub error: Option<String>,
}

impl SubBatchReport {
    fn new(kind: SubBatchKind, requested: usize) -> Self {
        Self {
            kind,
            requested,
            committed: Vec::new(),
            skipped: Vec::new(),
            conflicts: Vec::new(),
            failed: Vec::new(),
            error: None,
        }
    }

    /// A sub-batch succeeds when at least one line was committed
    pub fn success(&self) -> bool {
        !self.committed.is_empty()
    }

    pub fn count(&self) -> usize {
        self.committed.len()
    }

    fn summary(&self) -> String {
        if self.requested == 0 {
            return format!("{}: nothing to confirm", self.kind);
        }
        let mut line = format!("{}: {} of {} committed", self.kind, self.count(), self.requested);
        if !self.conflicts.is_empty() {
            line.push_str(&format!(", {} already processed", self.conflicts.len()));
        }
        if !self.skipped.is_empty() {
            line.push_str(&format!(", {} invalid", self.skipped.len()));
        }
        if !self.failed.is_empty() {
            line.push_str(&format!(", {} failed", self.failed.len()));
        }
        if let Some(error) = &self.error {
            line.push_str(&format!(" ({})", error));
        }
        line
    }
}

/// Best-effort summary of a confirmation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationSummary {
    pub income_count: usize,
    pub expense_count: usize,
    pub suppressed_count: usize,
    pub income_success: bool,
    pub expense_success: bool,
    pub suppressed_success: bool,
    /// True when any sub-batch succeeded
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
    pub income: SubBatchReport,
    pub expense: SubBatchReport,
    pub suppression: SubBatchReport,
}

impl ConfirmationSummary {
    fn from_reports(
        income: SubBatchReport,
        expense: SubBatchReport,
        suppression: SubBatchReport,
    ) -> Self {
        let reports = [&income, &expense, &suppression];
        let success = reports.iter().any(|r| r.success());
        let errors: Vec<String> = reports
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {}", r.kind, e)))
            .collect();
        let message = reports
            .iter()
            .map(|r| r.summary())
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            income_count: income.count(),
            expense_count: expense.count(),
            suppressed_count: suppression.count(),
            income_success: income.success(),
            expense_success: expense.success(),
            suppressed_success: suppression.success(),
            success,
            message,
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
            income,
            expense,
            suppression,
        }
    }

    /// At least one sub-batch succeeded while another reported a problem
    pub fn is_partial(&self) -> bool {
        self.success
            && [&self.income, &self.expense, &self.suppression]
                .iter()
                .any(|r| r.requested > 0 && (!r.success() || !r.failed.is_empty()))
    }
}

/// Pattern to learn once a manual match is committed
#[derive(Debug, Clone)]
struct LearnRequest {
    pattern: String,
    target_code: String,
    target_name: String,
}

/// A validated item ready for the gate
#[derive(Debug, Clone)]
struct Prepared<T> {
    transaction_id: String,
    payload: T,
    rule_id: Option<String>,
    learn: Option<LearnRequest>,
}

/// Commits confirmation requests against the collaborator stores
pub struct BatchCommitter<B: BankTransactionStore, L: LedgerStore, R: RuleStore> {
    gate: DuplicateGate<B>,
    bank: Arc<B>,
    ledger: Arc<L>,
    rules: RuleBook<R>,
    validator: Box<dyn ConfirmationValidator>,
}

impl<B, L, R> BatchCommitter<B, L, R>
where
    B: BankTransactionStore,
    L: LedgerStore,
    R: RuleStore + 'static,
{
    pub fn new(bank: Arc<B>, ledger: Arc<L>, rules: RuleBook<R>) -> Self {
        Self::with_validator(bank, ledger, rules, Box::new(DefaultConfirmationValidator))
    }

    pub fn with_validator(
        bank: Arc<B>,
        ledger: Arc<L>,
        rules: RuleBook<R>,
        validator: Box<dyn ConfirmationValidator>,
    ) -> Self {
        Self {
            gate: DuplicateGate::new(Arc::clone(&bank)),
            bank,
            ledger,
            rules,
            validator,
        }
    }

    /// Commit all three sub-batches and summarize the outcome
    pub async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationSummary {
        let (income, expense, suppression) = tokio::join!(
            self.commit_income(&request.income, &request.created_by),
            self.commit_expense(&request.expense, &request.created_by),
            self.commit_suppressions(&request.suppress),
        );

        let summary = ConfirmationSummary::from_reports(income, expense, suppression);
        tracing::info!(
            created_by = %request.created_by,
            income = summary.income_count,
            expense = summary.expense_count,
            suppressed = summary.suppressed_count,
            success = summary.success,
            "confirmation committed"
        );
        summary
    }

    async fn commit_income(
        &self,
        items: &[IncomeConfirmation],
        created_by: &str,
    ) -> SubBatchReport {
        let mut report = SubBatchReport::new(SubBatchKind::Income, items.len());
        let prepared = self.prepare(&mut report, items, |item| {
            self.validator.validate_income(item)?;
            income_record(item, created_by).map(|record| Prepared {
                transaction_id: item.transaction_id.clone(),
                payload: record,
                rule_id: item.rule_id.clone(),
                learn: learn_request(&item.learn_pattern, &item.rule_id, &item.code, &item.donor_name),
            })
        });

        let committed = self
            .write_status(&mut report, prepared, |p| {
                StatusUpdate::matched(
                    p.transaction_id.clone(),
                    LedgerKind::Income,
                    vec![p.payload.id.clone()],
                )
            })
            .await;
        if committed.is_empty() {
            return report;
        }

        let records: Vec<IncomeRecord> = committed.iter().map(|p| p.payload.clone()).collect();
        match self.ledger.append_income(&records).await {
            Ok(()) => self.finish(&mut report, &committed, RuleType::BankIncome),
            Err(err) => unrecorded(&mut report, &committed, err),
        }
        report
    }

    async fn commit_expense(
        &self,
        items: &[ExpenseConfirmation],
        created_by: &str,
    ) -> SubBatchReport {
        let mut report = SubBatchReport::new(SubBatchKind::Expense, items.len());
        let prepared = self.prepare(&mut report, items, |item| {
            self.validator.validate_expense(item)?;
            expense_record(item, created_by).map(|record| Prepared {
                transaction_id: item.transaction_id.clone(),
                payload: record,
                rule_id: item.rule_id.clone(),
                learn: learn_request(&item.learn_pattern, &item.rule_id, &item.code, &item.description),
            })
        });

        let committed = self
            .write_status(&mut report, prepared, |p| {
                StatusUpdate::matched(
                    p.transaction_id.clone(),
                    LedgerKind::Expense,
                    vec![p.payload.id.clone()],
                )
            })
            .await;
        if committed.is_empty() {
            return report;
        }

        let records: Vec<ExpenseRecord> = committed.iter().map(|p| p.payload.clone()).collect();
        match self.ledger.append_expense(&records).await {
            Ok(()) => self.finish(&mut report, &committed, RuleType::BankExpense),
            Err(err) => unrecorded(&mut report, &committed, err),
        }
        report
    }

    async fn commit_suppressions(&self, items: &[SuppressionConfirmation]) -> SubBatchReport {
        let mut report = SubBatchReport::new(SubBatchKind::Suppression, items.len());
        let prepared = self.prepare(&mut report, items, |item| {
            self.validator.validate_suppression(item)?;
            let reason = if item.reason.trim().is_empty() {
                "suppressed by operator".to_string()
            } else {
                item.reason.trim().to_string()
            };
            Ok(Prepared {
                transaction_id: item.transaction_id.clone(),
                payload: reason,
                rule_id: None,
                learn: None,
            })
        });

        let committed = self
            .write_status(&mut report, prepared, |p| {
                StatusUpdate::suppressed(p.transaction_id.clone(), p.payload.clone())
            })
            .await;
        report.committed = committed.into_iter().map(|p| p.transaction_id).collect();
        report
    }

    /// Validate items, recording the ones that cannot be committed
    fn prepare<T, P>(
        &self,
        report: &mut SubBatchReport,
        items: &[T],
        prepare: impl Fn(&T) -> ReconcileResult<Prepared<P>>,
    ) -> Vec<Prepared<P>>
    where
        T: HasTransactionId,
    {
        let mut prepared = Vec::with_capacity(items.len());
        for item in items {
            match prepare(item) {
                Ok(p) => prepared.push(p),
                Err(err) => {
                    tracing::warn!(
                        sub_batch = %report.kind,
                        transaction_id = %item.transaction_id(),
                        error = %err,
                        "skipping invalid confirmation"
                    );
                    report.skipped.push(item.transaction_id().to_string());
                }
            }
        }
        prepared
    }

    /// Gate the prepared items and apply their status updates
    ///
    /// Returns the items whose status the store accepted; only those may be
    /// appended to the ledger.
    async fn write_status<P>(
        &self,
        report: &mut SubBatchReport,
        prepared: Vec<Prepared<P>>,
        to_update: impl Fn(&Prepared<P>) -> StatusUpdate,
    ) -> Vec<Prepared<P>> {
        if prepared.is_empty() {
            return Vec::new();
        }

        let ids: Vec<String> = prepared.iter().map(|p| p.transaction_id.clone()).collect();
        let decision = match self.gate.admit(&ids).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(sub_batch = %report.kind, error = %err, "status re-check failed, rejecting sub-batch");
                report.failed.extend(ids);
                report.error = Some(format!("status re-check failed: {}", err));
                return Vec::new();
            }
        };

        report
            .conflicts
            .extend(decision.conflicts.iter().map(|c| c.id.clone()));
        report.conflicts.extend(decision.repeated.iter().cloned());
        report.failed.extend(decision.missing.iter().cloned());

        let mut taken: HashSet<String> = HashSet::new();
        let admitted: Vec<Prepared<P>> = prepared
            .into_iter()
            .filter(|p| decision.is_admitted(&p.transaction_id) && taken.insert(p.transaction_id.clone()))
            .collect();
        if admitted.is_empty() {
            return admitted;
        }

        let updates: Vec<StatusUpdate> = admitted.iter().map(&to_update).collect();
        let outcome = match self.bank.batch_update_status(&updates).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(sub_batch = %report.kind, error = %err, "batch status update failed");
                report
                    .failed
                    .extend(admitted.into_iter().map(|p| p.transaction_id));
                report.error = Some(err.to_string());
                return Vec::new();
            }
        };

        if !outcome.failed.is_empty() {
            self.sort_rejections(report, &outcome.failed).await;
        }
        if outcome.is_total_failure() && !report.failed.is_empty() && report.error.is_none() {
            report.error = Some(
                ReconcileError::StoreWrite(format!(
                    "store rejected all {} status updates",
                    outcome.failed.len()
                ))
                .to_string(),
            );
        }

        let accepted: HashSet<&String> = outcome.success.iter().collect();
        admitted
            .into_iter()
            .filter(|p| accepted.contains(&p.transaction_id))
            .collect()
    }

    /// Tell lines lost to a concurrent commit apart from genuine store failures
    async fn sort_rejections(&self, report: &mut SubBatchReport, rejected: &[String]) {
        match self.bank.get_status_map(rejected).await {
            Ok(live) => {
                for id in rejected {
                    match live.get(id) {
                        Some(status) if status.is_terminal() => {
                            tracing::debug!(transaction_id = %id, status = %status, "line committed concurrently");
                            report.conflicts.push(id.clone());
                        }
                        _ => report.failed.push(id.clone()),
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not re-read rejected lines");
                report.failed.extend(rejected.iter().cloned());
            }
        }
    }

    /// Record committed lines and start the detached rule bookkeeping
    fn finish<P>(&self, report: &mut SubBatchReport, committed: &[Prepared<P>], rule_type: RuleType) {
        for item in committed {
            report.committed.push(item.transaction_id.clone());
            if let Some(rule_id) = &item.rule_id {
                self.rules.spawn_usage_increment(rule_id.clone());
            } else if let Some(learn) = &item.learn {
                self.rules.spawn_learn(
                    rule_type,
                    learn.pattern.clone(),
                    learn.target_code.clone(),
                    learn.target_name.clone(),
                );
            }
        }
    }
}

/// Items that name the bank line they confirm
trait HasTransactionId {
    fn transaction_id(&self) -> &str;
}

impl HasTransactionId for IncomeConfirmation {
    fn transaction_id(&self) -> &str {
        &self.transaction_id
    }
}

impl HasTransactionId for ExpenseConfirmation {
    fn transaction_id(&self) -> &str {
        &self.transaction_id
    }
}

impl HasTransactionId for SuppressionConfirmation {
    fn transaction_id(&self) -> &str {
        &self.transaction_id
    }
}

fn income_record(item: &IncomeConfirmation, created_by: &str) -> ReconcileResult<IncomeRecord> {
    let (date, amount) = required_fields(&item.transaction_id, item.date, item.amount.as_ref())?;
    Ok(IncomeRecord {
        id: uuid::Uuid::new_v4().to_string(),
        date,
        source: IncomeSource::Bank,
        code: item.code.clone(),
        donor_name: item.donor_name.clone(),
        amount,
        note: item.note.clone(),
        created_by: created_by.to_string(),
        transaction_id: Some(item.transaction_id.clone()),
        created_at: chrono::Utc::now().naive_utc(),
    })
}

fn expense_record(item: &ExpenseConfirmation, created_by: &str) -> ReconcileResult<ExpenseRecord> {
    let (date, amount) = required_fields(&item.transaction_id, item.date, item.amount.as_ref())?;
    Ok(ExpenseRecord {
        id: uuid::Uuid::new_v4().to_string(),
        date,
        code: item.code.clone(),
        vendor: item.vendor.clone(),
        description: item.description.clone(),
        amount,
        note: item.note.clone(),
        created_by: created_by.to_string(),
        transaction_id: Some(item.transaction_id.clone()),
        created_at: chrono::Utc::now().naive_utc(),
    })
}

fn required_fields(
    id: &str,
    date: Option<NaiveDate>,
    amount: Option<&BigDecimal>,
) -> ReconcileResult<(NaiveDate, BigDecimal)> {
    let date =
        date.ok_or_else(|| ReconcileError::Validation(format!("Transaction '{}' is missing a date", id)))?;
    let amount = amount
        .cloned()
        .ok_or_else(|| ReconcileError::Validation(format!("Transaction '{}' is missing an amount", id)))?;
    Ok((date, amount))
}

fn learn_request(
    pattern: &Option<String>,
    rule_id: &Option<String>,
    code: &str,
    name: &str,
) -> Option<LearnRequest> {
    if rule_id.is_some() {
        return None;
    }
    let pattern = pattern.as_ref()?.trim();
    if pattern.is_empty() || code.trim().is_empty() {
        return None;
    }
    Some(LearnRequest {
        pattern: pattern.to_string(),
        target_code: code.to_string(),
        target_name: name.to_string(),
    })
}

/// The status changed but the ledger append failed; the status cannot be
/// rolled back, so the lines are reported for manual repair
fn unrecorded<P>(report: &mut SubBatchReport, committed: &[Prepared<P>], err: ReconcileError) {
    let ids: Vec<String> = committed.iter().map(|p| p.transaction_id.clone()).collect();
    tracing::error!(
        sub_batch = %report.kind,
        transaction_ids = ?ids,
        error = %err,
        "ledger append failed after status update; lines need manual repair"
    );
    report.failed.extend(ids);
    report.error = Some(format!("ledger append failed after status update: {}", err));
}
