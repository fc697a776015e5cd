//! Classification of pending bank lines into auto-matched, suppressed and
//! needs-review buckets

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::MatchingConfig;
use crate::matching::matcher::{PatternMatcher, RuleCandidate};
use crate::reconciliation::cash_offering::{match_deposit, CashOfferingBatch, DepositMatch};
use crate::reconciliation::{
    ConfirmationRequest, ExpenseConfirmation, IncomeConfirmation, SuppressionConfirmation,
};
use crate::types::*;
use crate::utils::format_won;

/// Slack for comparing confidence scores
const SCORE_EPSILON: f64 = 1e-9;

/// A line whose top rule is trusted enough to apply without review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoMatched {
    pub transaction: BankTransaction,
    pub kind: LedgerKind,
    pub rule: MatchingRule,
    /// Every ranked candidate, the applied rule first
    pub candidates: Vec<RuleCandidate>,
}

/// Why a line is considered already accounted for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SuppressionReason {
    /// The deposit is the lump sum of individually posted cash offerings
    CashOffering {
        range: DateRange,
        batch_size: usize,
        total: bigdecimal::BigDecimal,
    },
    /// The same bank line was imported earlier
    DuplicateLine { original_id: String },
}

impl SuppressionReason {
    pub fn describe(&self) -> String {
        match self {
            SuppressionReason::CashOffering {
                range,
                batch_size,
                total,
            } => format!(
                "cash offering lump sum: {} offerings totalling {} ({})",
                batch_size,
                format_won(total),
                range
            ),
            SuppressionReason::DuplicateLine { original_id } => {
                format!("duplicate bank line of {}", original_id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suppressed {
    pub transaction: BankTransaction,
    pub reason: SuppressionReason,
}

/// Why a line needs an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewReason {
    /// No rule pattern appears in the text
    NoCandidate,
    /// The best rule is below the auto-match threshold
    LowConfidence,
    /// A runner-up scores too close to the best rule
    Ambiguous,
    /// The line has neither a deposit nor a withdrawal
    NoAmount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedsReview {
    pub transaction: BankTransaction,
    pub reason: ReviewReason,
    /// Suggestions shown to the operator
    pub candidates: Vec<RuleCandidate>,
}

/// Classification of a pending set, each bucket in input order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub auto_matched: Vec<AutoMatched>,
    pub suppressed: Vec<Suppressed>,
    pub needs_review: Vec<NeedsReview>,
}

impl Classification {
    pub fn total(&self) -> usize {
        self.auto_matched.len() + self.suppressed.len() + self.needs_review.len()
    }

    /// Confirmation request applying every auto-match and suppression
    pub fn auto_confirmations(&self, created_by: &str) -> ConfirmationRequest {
        let mut request = ConfirmationRequest::new(created_by);

        for item in &self.auto_matched {
            let txn = &item.transaction;
            let note = format!("auto-matched by rule '{}'", item.rule.pattern);
            match item.kind {
                LedgerKind::Income => request.income.push(IncomeConfirmation {
                    transaction_id: txn.id.clone(),
                    date: Some(txn.transaction_date),
                    amount: Some(txn.deposit.clone()),
                    code: item.rule.target_code.clone(),
                    donor_name: txn.description.trim().to_string(),
                    note,
                    rule_id: Some(item.rule.id.clone()),
                    learn_pattern: None,
                    observed_status: Some(txn.matched_status),
                }),
                LedgerKind::Expense => request.expense.push(ExpenseConfirmation {
                    transaction_id: txn.id.clone(),
                    date: Some(txn.transaction_date),
                    amount: Some(txn.withdrawal.clone()),
                    code: item.rule.target_code.clone(),
                    vendor: txn.description.trim().to_string(),
                    description: item.rule.target_name.clone(),
                    note,
                    rule_id: Some(item.rule.id.clone()),
                    learn_pattern: None,
                    observed_status: Some(txn.matched_status),
                }),
            }
        }

        for item in &self.suppressed {
            request.suppress.push(SuppressionConfirmation {
                transaction_id: item.transaction.id.clone(),
                reason: item.reason.describe(),
                observed_status: Some(item.transaction.matched_status),
            });
        }

        request
    }
}

/// Pure classifier of pending bank lines
#[derive(Debug, Clone)]
pub struct AutoMatcher {
    matcher: PatternMatcher,
    config: MatchingConfig,
}

impl AutoMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self {
            matcher: PatternMatcher::new(config.max_candidates),
            config,
        }
    }

    /// Classify every pending line
    ///
    /// The result depends only on the arguments: running it twice over the
    /// same lines, rules and cash batches gives the same classification.
    /// Lines that are no longer pending are left out entirely.
    pub fn classify(
        &self,
        transactions: &[BankTransaction],
        income_rules: &[MatchingRule],
        expense_rules: &[MatchingRule],
        cash_batches: &[CashOfferingBatch],
    ) -> Classification {
        let pending: Vec<BankTransaction> = transactions
            .iter()
            .filter(|txn| txn.is_pending())
            .cloned()
            .collect();

        let cash_suppressions = self.cash_suppressions(&pending, cash_batches);
        let mut first_seen: HashMap<DuplicateKey, String> = HashMap::new();
        let mut classification = Classification::default();

        for txn in pending {
            if let Some(reason) = cash_suppressions.get(&txn.id) {
                classification.suppressed.push(Suppressed {
                    reason: reason.clone(),
                    transaction: txn,
                });
                continue;
            }

            if let Some(original_id) = first_seen.get(&txn.duplicate_key()) {
                classification.suppressed.push(Suppressed {
                    reason: SuppressionReason::DuplicateLine {
                        original_id: original_id.clone(),
                    },
                    transaction: txn,
                });
                continue;
            }
            first_seen.insert(txn.duplicate_key(), txn.id.clone());

            let rule_type = match txn.rule_type() {
                Some(rule_type) => rule_type,
                None => {
                    classification.needs_review.push(NeedsReview {
                        transaction: txn,
                        reason: ReviewReason::NoAmount,
                        candidates: Vec::new(),
                    });
                    continue;
                }
            };

            let rules = match rule_type {
                RuleType::BankIncome => income_rules,
                RuleType::BankExpense => expense_rules,
            };
            let candidates = self.matcher.rank_transaction(&txn, rules);

            match self.decide(&candidates) {
                Ok(()) => {
                    let rule = candidates[0].rule.clone();
                    classification.auto_matched.push(AutoMatched {
                        kind: rule_type.ledger_kind(),
                        rule,
                        candidates,
                        transaction: txn,
                    });
                }
                Err(reason) => classification.needs_review.push(NeedsReview {
                    transaction: txn,
                    reason,
                    candidates,
                }),
            }
        }

        tracing::info!(
            auto_matched = classification.auto_matched.len(),
            suppressed = classification.suppressed.len(),
            needs_review = classification.needs_review.len(),
            "classified pending bank transactions"
        );
        classification
    }

    fn decide(&self, candidates: &[RuleCandidate]) -> Result<(), ReviewReason> {
        let top = candidates.first().ok_or(ReviewReason::NoCandidate)?;
        if top.confidence() + SCORE_EPSILON < self.config.auto_match_threshold {
            return Err(ReviewReason::LowConfidence);
        }
        if let Some(second) = candidates.get(1) {
            let gap = top.confidence() - second.confidence();
            if gap <= self.config.ambiguity_margin + SCORE_EPSILON {
                return Err(ReviewReason::Ambiguous);
            }
        }
        Ok(())
    }

    fn cash_suppressions(
        &self,
        pending: &[BankTransaction],
        batches: &[CashOfferingBatch],
    ) -> HashMap<String, SuppressionReason> {
        let mut claimed: HashSet<String> = HashSet::new();
        let mut suppressions = HashMap::new();

        for batch in batches.iter().filter(|b| !b.is_empty()) {
            let unclaimed: Vec<BankTransaction> = pending
                .iter()
                .filter(|txn| !claimed.contains(&txn.id))
                .cloned()
                .collect();

            if let DepositMatch::Unique { transaction_id, .. } =
                match_deposit(batch, &unclaimed, &self.config)
            {
                claimed.insert(transaction_id.clone());
                suppressions.insert(
                    transaction_id,
                    SuppressionReason::CashOffering {
                        range: batch.range,
                        batch_size: batch.len(),
                        total: batch.total(),
                    },
                );
            }
        }

        suppressions
    }
}
