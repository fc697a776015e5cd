//! In-memory storage implementation for testing

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::traits::*;
use crate::types::*;

/// Switches for simulating backing store outages
#[derive(Debug, Default)]
struct Faults {
    status_reads: AtomicBool,
    status_writes: AtomicBool,
    ledger_writes: AtomicBool,
    rule_writes: AtomicBool,
    poisoned: RwLock<HashSet<String>>,
}

/// In-memory store implementing every collaborator interface
///
/// Bank lines and rules are kept in insertion order, which is the order
/// `list_pending` and `list_rules` return them in.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    transactions: Arc<RwLock<Vec<BankTransaction>>>,
    rules: Arc<RwLock<Vec<MatchingRule>>>,
    income: Arc<RwLock<Vec<IncomeRecord>>>,
    expense: Arc<RwLock<Vec<ExpenseRecord>>>,
    offerings: Arc<RwLock<Vec<CashOffering>>>,
    faults: Arc<Faults>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Import a bank line
    pub fn insert_transaction(&self, transaction: BankTransaction) {
        write(&self.transactions).push(transaction);
    }

    pub fn insert_rule(&self, rule: MatchingRule) {
        write(&self.rules).push(rule);
    }

    pub fn insert_offering(&self, offering: CashOffering) {
        write(&self.offerings).push(offering);
    }

    /// Current state of a bank line
    pub fn transaction(&self, id: &str) -> Option<BankTransaction> {
        read(&self.transactions).iter().find(|t| t.id == id).cloned()
    }

    pub fn rule(&self, id: &str) -> Option<MatchingRule> {
        read(&self.rules).iter().find(|r| r.id == id).cloned()
    }

    pub fn income_records(&self) -> Vec<IncomeRecord> {
        read(&self.income).clone()
    }

    pub fn expense_records(&self) -> Vec<ExpenseRecord> {
        read(&self.expense).clone()
    }

    /// Make `get_status_map` fail
    pub fn fail_status_reads(&self, fail: bool) {
        self.faults.status_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `batch_update_status` call fail
    pub fn fail_status_updates(&self, fail: bool) {
        self.faults.status_writes.store(fail, Ordering::SeqCst);
    }

    /// Make ledger appends fail
    pub fn fail_ledger_writes(&self, fail: bool) {
        self.faults.ledger_writes.store(fail, Ordering::SeqCst);
    }

    /// Make rule usage increments and additions fail
    pub fn fail_rule_writes(&self, fail: bool) {
        self.faults.rule_writes.store(fail, Ordering::SeqCst);
    }

    /// Make any `batch_update_status` call touching `id` fail as a whole
    pub fn poison_transaction(&self, id: &str) {
        write(&self.faults.poisoned).insert(id.to_string());
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        write(&self.transactions).clear();
        write(&self.rules).clear();
        write(&self.income).clear();
        write(&self.expense).clear();
        write(&self.offerings).clear();
    }

    fn failing(flag: &AtomicBool) -> bool {
        flag.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BankTransactionStore for MemoryStore {
    async fn list_pending(&self) -> ReconcileResult<Vec<BankTransaction>> {
        Ok(read(&self.transactions)
            .iter()
            .filter(|t| t.is_pending())
            .cloned()
            .collect())
    }

    async fn get_status_map(
        &self,
        ids: &[String],
    ) -> ReconcileResult<HashMap<String, MatchedStatus>> {
        if Self::failing(&self.faults.status_reads) {
            return Err(ReconcileError::Storage(
                "status read unavailable".to_string(),
            ));
        }
        let wanted: HashSet<&String> = ids.iter().collect();
        Ok(read(&self.transactions)
            .iter()
            .filter(|t| wanted.contains(&t.id))
            .map(|t| (t.id.clone(), t.matched_status))
            .collect())
    }

    async fn batch_update_status(
        &self,
        updates: &[StatusUpdate],
    ) -> ReconcileResult<BatchUpdateOutcome> {
        if Self::failing(&self.faults.status_writes) {
            return Err(ReconcileError::StoreWrite(
                "status update unavailable".to_string(),
            ));
        }
        {
            let poisoned = read(&self.faults.poisoned);
            if let Some(update) = updates.iter().find(|u| poisoned.contains(&u.id)) {
                return Err(ReconcileError::StoreWrite(format!(
                    "status update rejected for batch containing {}",
                    update.id
                )));
            }
        }

        let mut transactions = write(&self.transactions);
        let mut outcome = BatchUpdateOutcome::default();
        for update in updates {
            let Some(txn) = transactions.iter_mut().find(|t| t.id == update.id) else {
                outcome.failed.push(update.id.clone());
                continue;
            };
            // compare-and-set: only a pending line accepts a terminal status
            if !txn.matched_status.can_transition_to(update.status) {
                outcome.failed.push(update.id.clone());
                continue;
            }
            txn.matched_status = update.status;
            txn.matched_type = update.matched_type;
            txn.matched_ids = update.matched_ids.clone();
            txn.suppressed = update.status == MatchedStatus::Suppressed;
            txn.suppressed_reason = update.suppressed_reason.clone();
            outcome.success.push(update.id.clone());
        }
        Ok(outcome)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append_income(&self, records: &[IncomeRecord]) -> ReconcileResult<()> {
        if Self::failing(&self.faults.ledger_writes) {
            return Err(ReconcileError::Storage("income ledger unavailable".to_string()));
        }
        write(&self.income).extend_from_slice(records);
        Ok(())
    }

    async fn append_expense(&self, records: &[ExpenseRecord]) -> ReconcileResult<()> {
        if Self::failing(&self.faults.ledger_writes) {
            return Err(ReconcileError::Storage("expense ledger unavailable".to_string()));
        }
        write(&self.expense).extend_from_slice(records);
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn list_rules(&self, rule_type: RuleType) -> ReconcileResult<Vec<MatchingRule>> {
        Ok(read(&self.rules)
            .iter()
            .filter(|r| r.rule_type == rule_type)
            .cloned()
            .collect())
    }

    async fn increment_usage(&self, rule_id: &str) -> ReconcileResult<()> {
        if Self::failing(&self.faults.rule_writes) {
            return Err(ReconcileError::Storage("rule store unavailable".to_string()));
        }
        let mut rules = write(&self.rules);
        match rules.iter_mut().find(|r| r.id == rule_id) {
            Some(rule) => {
                rule.record_usage();
                Ok(())
            }
            None => Err(ReconcileError::RuleNotFound(rule_id.to_string())),
        }
    }

    async fn add_rule(&self, rule: &MatchingRule) -> ReconcileResult<()> {
        if Self::failing(&self.faults.rule_writes) {
            return Err(ReconcileError::Storage("rule store unavailable".to_string()));
        }
        let mut rules = write(&self.rules);
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(ReconcileError::Validation(format!(
                "Rule with ID '{}' already exists",
                rule.id
            )));
        }
        rules.push(rule.clone());
        Ok(())
    }
}

#[async_trait]
impl CashOfferingSource for MemoryStore {
    async fn list_offerings(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ReconcileResult<Vec<CashOffering>> {
        Ok(read(&self.offerings)
            .iter()
            .filter(|o| start <= o.date && o.date <= end)
            .cloned()
            .collect())
    }
}
