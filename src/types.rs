//! Core types and data structures for the reconciliation engine

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reconciliation state of an imported bank line
///
/// The status only moves forward: `Pending` may become `Matched` or
/// `Suppressed`, and a terminal status is never replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchedStatus {
    /// Not yet reconciled to a ledger record
    Pending,
    /// Linked to an income or expense record
    Matched,
    /// Already accounted for through another channel
    Suppressed,
}

impl MatchedStatus {
    /// Whether the status can no longer change
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MatchedStatus::Pending)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: MatchedStatus) -> bool {
        matches!(
            (self, next),
            (MatchedStatus::Pending, MatchedStatus::Matched)
                | (MatchedStatus::Pending, MatchedStatus::Suppressed)
        )
    }
}

impl fmt::Display for MatchedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MatchedStatus::Pending => "pending",
            MatchedStatus::Matched => "matched",
            MatchedStatus::Suppressed => "suppressed",
        };
        f.write_str(label)
    }
}

/// Which ledger a matched bank line was posted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Income,
    Expense,
}

impl LedgerKind {
    /// Rule type used to match bank lines destined for this ledger
    pub fn rule_type(&self) -> RuleType {
        match self {
            LedgerKind::Income => RuleType::BankIncome,
            LedgerKind::Expense => RuleType::BankExpense,
        }
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerKind::Income => f.write_str("income"),
            LedgerKind::Expense => f.write_str("expense"),
        }
    }
}

/// Rule families, one per direction of money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Deposits classified into income codes
    BankIncome,
    /// Withdrawals classified into expense codes
    BankExpense,
}

impl RuleType {
    /// Ledger the rule's target code belongs to
    pub fn ledger_kind(&self) -> LedgerKind {
        match self {
            RuleType::BankIncome => LedgerKind::Income,
            RuleType::BankExpense => LedgerKind::Expense,
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::BankIncome => f.write_str("bank_income"),
            RuleType::BankExpense => f.write_str("bank_expense"),
        }
    }
}

/// Key identifying a bank line that was imported more than once
pub type DuplicateKey = (NaiveDate, BigDecimal, BigDecimal, BigDecimal);

/// Raw line imported from the bank ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    /// Unique identifier assigned on import
    pub id: String,
    /// Booking date
    pub transaction_date: NaiveDate,
    /// Booking time, when the bank export carries one
    pub time: Option<NaiveTime>,
    /// Primary description column (usually the counterparty)
    pub description: String,
    /// Secondary detail column
    pub detail: String,
    /// Free-form memo
    pub memo: String,
    /// Amount leaving the account
    pub withdrawal: BigDecimal,
    /// Amount entering the account
    pub deposit: BigDecimal,
    /// Running balance after the line
    pub balance: BigDecimal,
    /// Reconciliation state
    pub matched_status: MatchedStatus,
    /// Ledger the line was matched into
    pub matched_type: Option<LedgerKind>,
    /// Ids of the ledger records created from this line
    pub matched_ids: Vec<String>,
    /// Whether the line was suppressed
    pub suppressed: bool,
    /// Why the line was suppressed
    pub suppressed_reason: Option<String>,
}

impl BankTransaction {
    /// Create a new pending bank line
    pub fn new(
        id: String,
        transaction_date: NaiveDate,
        description: String,
        withdrawal: BigDecimal,
        deposit: BigDecimal,
        balance: BigDecimal,
    ) -> Self {
        Self {
            id,
            transaction_date,
            time: None,
            description,
            detail: String::new(),
            memo: String::new(),
            withdrawal,
            deposit,
            balance,
            matched_status: MatchedStatus::Pending,
            matched_type: None,
            matched_ids: Vec::new(),
            suppressed: false,
            suppressed_reason: None,
        }
    }

    /// Set the detail column
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Set the memo column
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    /// Set the booking time
    pub fn with_time(mut self, time: NaiveTime) -> Self {
        self.time = Some(time);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.matched_status == MatchedStatus::Pending
    }

    pub fn is_deposit(&self) -> bool {
        self.deposit > BigDecimal::from(0)
    }

    pub fn is_withdrawal(&self) -> bool {
        self.withdrawal > BigDecimal::from(0)
    }

    /// Lower-cased text the pattern matcher searches
    pub fn search_text(&self) -> String {
        [&self.description, &self.detail, &self.memo]
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Rule family applicable to this line, `None` for zero-amount lines
    pub fn rule_type(&self) -> Option<RuleType> {
        if self.is_deposit() {
            Some(RuleType::BankIncome)
        } else if self.is_withdrawal() {
            Some(RuleType::BankExpense)
        } else {
            None
        }
    }

    /// Absolute amount moved by the line
    pub fn amount(&self) -> BigDecimal {
        if self.is_deposit() {
            self.deposit.clone()
        } else {
            self.withdrawal.clone()
        }
    }

    pub fn duplicate_key(&self) -> DuplicateKey {
        (
            self.transaction_date,
            self.deposit.clone(),
            self.withdrawal.clone(),
            self.balance.clone(),
        )
    }
}

/// Learned or seeded pattern rule mapping bank text to a ledger code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingRule {
    pub id: String,
    pub rule_type: RuleType,
    /// Substring (or whitespace separated tokens) searched in bank text
    pub pattern: String,
    /// Kind of target, e.g. `income_code` or `expense_code`
    pub target_type: String,
    pub target_code: String,
    pub target_name: String,
    /// Static trust score in `[0, 1]`
    pub confidence: f64,
    /// Number of confirmed matches; never decreases
    pub usage_count: u64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl MatchingRule {
    /// Create a new rule with a fresh id
    pub fn new(
        rule_type: RuleType,
        pattern: String,
        target_code: String,
        target_name: String,
        confidence: f64,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        let target_type = match rule_type {
            RuleType::BankIncome => "income_code",
            RuleType::BankExpense => "expense_code",
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_type,
            pattern,
            target_type: target_type.to_string(),
            target_code,
            target_name,
            confidence,
            usage_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the generated id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Record one more confirmed use of the rule
    pub fn record_usage(&mut self) {
        self.usage_count = self.usage_count.saturating_add(1);
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

/// Where an income record's money arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomeSource {
    Bank,
    Cash,
}

/// Income ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeRecord {
    pub id: String,
    pub date: NaiveDate,
    pub source: IncomeSource,
    /// Offering code (tithe, thanksgiving, building fund, ...)
    pub code: String,
    pub donor_name: String,
    pub amount: BigDecimal,
    pub note: String,
    pub created_by: String,
    /// Bank line the record was created from
    pub transaction_id: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Expense ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub id: String,
    pub date: NaiveDate,
    /// Account code the expense is booked under
    pub code: String,
    pub vendor: String,
    pub description: String,
    pub amount: BigDecimal,
    pub note: String,
    pub created_by: String,
    /// Bank line the record was created from
    pub transaction_id: Option<String>,
    pub created_at: NaiveDateTime,
}

/// One individually attributed cash amount from the offering form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashOffering {
    pub id: String,
    pub date: NaiveDate,
    pub amount: BigDecimal,
    /// Donor the amount is attributed to
    pub attribution: String,
    /// Offering code the amount is booked under
    pub code: String,
}

/// Inclusive date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> ReconcileResult<Self> {
        if end < start {
            return Err(ReconcileError::Validation(format!(
                "Date range ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Range covering a single day
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

/// Requested status change for one bank line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub id: String,
    /// Target status; always a terminal one
    pub status: MatchedStatus,
    pub matched_type: Option<LedgerKind>,
    pub matched_ids: Vec<String>,
    pub suppressed_reason: Option<String>,
}

impl StatusUpdate {
    /// Mark a line as matched to the given ledger records
    pub fn matched(id: String, kind: LedgerKind, record_ids: Vec<String>) -> Self {
        Self {
            id,
            status: MatchedStatus::Matched,
            matched_type: Some(kind),
            matched_ids: record_ids,
            suppressed_reason: None,
        }
    }

    /// Mark a line as suppressed
    pub fn suppressed(id: String, reason: String) -> Self {
        Self {
            id,
            status: MatchedStatus::Suppressed,
            matched_type: None,
            matched_ids: Vec::new(),
            suppressed_reason: Some(reason),
        }
    }
}

/// Per-item result of a batch status update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUpdateOutcome {
    pub success: Vec<String>,
    pub failed: Vec<String>,
}

impl BatchUpdateOutcome {
    pub fn is_total_failure(&self) -> bool {
        self.success.is_empty() && !self.failed.is_empty()
    }
}

/// Errors that can occur in the reconciliation engine
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Store write error: {0}")]
    StoreWrite(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("State conflict: transaction {id} is already {status}")]
    StateConflict { id: String, status: MatchedStatus },
    #[error("Reconciliation mismatch: no bank deposit matches {batch_size} cash offerings totalling {total}")]
    ReconciliationMismatch { batch_size: usize, total: BigDecimal },
    #[error("Rule not found: {0}")]
    RuleNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for reconciliation operations
pub type ReconcileResult<T> = Result<T, ReconcileError>;
