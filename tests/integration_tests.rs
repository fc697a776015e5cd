//! Integration tests for churchbook-core

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use churchbook_core::utils::MemoryStore;
use churchbook_core::{
    BankTransaction, BankTransactionStore, BatchCommitter, BatchUpdateOutcome, CashOffering,
    ConfirmationRequest, DateRange, ExpenseConfirmation, IncomeConfirmation, IncomeSource,
    MatchedStatus, MatchingConfig, MatchingRule, ReconcileResult, ReconciliationEngine,
    ReviewReason, RuleBook, RuleStore, RuleType, StatusUpdate, SuppressionConfirmation,
};

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

fn deposit(id: &str, day: u32, text: &str, amount: i64, balance: i64) -> BankTransaction {
    BankTransaction::new(
        id.to_string(),
        date(day),
        text.to_string(),
        BigDecimal::from(0),
        BigDecimal::from(amount),
        BigDecimal::from(balance),
    )
}

fn withdrawal(id: &str, day: u32, text: &str, amount: i64, balance: i64) -> BankTransaction {
    BankTransaction::new(
        id.to_string(),
        date(day),
        text.to_string(),
        BigDecimal::from(amount),
        BigDecimal::from(0),
        BigDecimal::from(balance),
    )
}

fn rule(id: &str, rule_type: RuleType, pattern: &str, code: &str, confidence: f64) -> MatchingRule {
    MatchingRule::new(
        rule_type,
        pattern.to_string(),
        code.to_string(),
        pattern.to_string(),
        confidence,
    )
    .with_id(id)
}

fn offering(id: &str, day: u32, amount: i64, donor: &str) -> CashOffering {
    CashOffering {
        id: id.to_string(),
        date: date(day),
        amount: BigDecimal::from(amount),
        attribution: donor.to_string(),
        code: "101".to_string(),
    }
}

fn income(id: &str, day: u32, amount: i64) -> IncomeConfirmation {
    IncomeConfirmation {
        transaction_id: id.to_string(),
        date: Some(date(day)),
        amount: Some(BigDecimal::from(amount)),
        code: "101".to_string(),
        donor_name: "홍길동".to_string(),
        note: String::new(),
        rule_id: None,
        learn_pattern: None,
        observed_status: Some(MatchedStatus::Pending),
    }
}

fn expense(id: &str, day: u32, amount: i64) -> ExpenseConfirmation {
    ExpenseConfirmation {
        transaction_id: id.to_string(),
        date: Some(date(day)),
        amount: Some(BigDecimal::from(amount)),
        code: "501".to_string(),
        vendor: "한국전력".to_string(),
        description: "전기요금".to_string(),
        note: String::new(),
        rule_id: None,
        learn_pattern: None,
        observed_status: Some(MatchedStatus::Pending),
    }
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_rule(rule("r-tithe", RuleType::BankIncome, "십일", "101", 0.95));
    store.insert_rule(rule("r-build", RuleType::BankIncome, "건축", "103", 0.95));
    store.insert_rule(rule("r-thanks", RuleType::BankIncome, "감사", "102", 0.9));
    store.insert_rule(rule("r-power", RuleType::BankExpense, "한국전력", "501", 0.95));

    store.insert_transaction(deposit("t1", 3, "홍길동 십일조", 100000, 1100000));
    store.insert_transaction(deposit("t2", 3, "김영희 감사 건축", 50000, 1150000));
    store.insert_transaction(withdrawal("t3", 4, "한국전력 자동이체", 82000, 1068000));
    store.insert_transaction(deposit("t4", 4, "이자", 120, 1068120));
    store
}

fn engine(store: &Arc<MemoryStore>) -> ReconciliationEngine<MemoryStore> {
    ReconciliationEngine::new(Arc::clone(store), MatchingConfig::default()).unwrap()
}

/// Let detached rule bookkeeping tasks run on the test runtime
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_complete_reconciliation_workflow() {
    let store = seeded_store();
    let engine = engine(&store);

    let classification = engine.classify(None).await.unwrap();
    let auto: Vec<&str> = classification
        .auto_matched
        .iter()
        .map(|a| a.transaction.id.as_str())
        .collect();
    assert_eq!(auto, vec!["t1", "t3"]);
    let review: Vec<(&str, ReviewReason)> = classification
        .needs_review
        .iter()
        .map(|r| (r.transaction.id.as_str(), r.reason))
        .collect();
    assert_eq!(
        review,
        vec![("t2", ReviewReason::Ambiguous), ("t4", ReviewReason::NoCandidate)]
    );

    let summary = engine
        .confirm(&classification.auto_confirmations("treasurer"))
        .await;
    assert!(summary.success);
    assert_eq!(summary.income_count, 1);
    assert_eq!(summary.expense_count, 1);
    assert!(summary.error.is_none());

    let income = store.income_records();
    assert_eq!(income.len(), 1);
    assert_eq!(income[0].code, "101");
    assert_eq!(income[0].amount, BigDecimal::from(100000));
    assert_eq!(income[0].source, IncomeSource::Bank);
    assert_eq!(store.expense_records()[0].code, "501");

    settle().await;
    assert_eq!(store.rule("r-tithe").unwrap().usage_count, 1);
    assert_eq!(store.rule("r-power").unwrap().usage_count, 1);
    assert_eq!(store.rule("r-thanks").unwrap().usage_count, 0);

    let next = engine.classify(None).await.unwrap();
    let remaining: Vec<&str> = next
        .needs_review
        .iter()
        .map(|r| r.transaction.id.as_str())
        .collect();
    assert!(next.auto_matched.is_empty());
    assert_eq!(remaining, vec!["t2", "t4"]);
}

#[tokio::test]
async fn test_classification_is_idempotent() {
    let store = seeded_store();
    store.insert_transaction(deposit("t5", 5, "홍길동 십일조", 100000, 1100000));
    store.insert_transaction(deposit("t6", 5, "홍길동 십일조", 100000, 1100000));
    let engine = engine(&store);

    let first = engine.classify(None).await.unwrap();
    let second = engine.classify(None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.suppressed.len(), 1);
    assert_eq!(first.suppressed[0].transaction.id, "t6");
}

#[tokio::test]
async fn test_matcher_ranking_through_rule_store() {
    let store = seeded_store();
    let rules = RuleBook::new(Arc::clone(&store), 0.8);
    let income_rules = rules.rules_for(RuleType::BankIncome).await.unwrap();

    let matcher = churchbook_core::PatternMatcher::default();
    let ranked = matcher.rank("성도 십일조 입금", &income_rules);
    assert_eq!(ranked[0].rule.pattern, "십일");
    assert!(ranked.iter().all(|c| c.rule.pattern != "감사"));

    let ranked = matcher.rank("십일조 감사", &income_rules);
    let patterns: Vec<&str> = ranked.iter().map(|c| c.rule.pattern.as_str()).collect();
    assert_eq!(patterns, vec!["십일", "감사"]);
}

#[tokio::test]
async fn test_concurrent_confirmations_commit_once() {
    let store = seeded_store();
    let engine = engine(&store);

    let mut first = ConfirmationRequest::new("treasurer");
    first.income.push(income("t1", 3, 100000));
    let mut second = ConfirmationRequest::new("deacon");
    second.income.push(income("t1", 3, 100000));

    let (a, b) = tokio::join!(engine.confirm(&first), engine.confirm(&second));

    assert_eq!(a.income_count + b.income_count, 1);
    assert_eq!(store.income_records().len(), 1);
    let excluded: Vec<Vec<String>> = [&a, &b]
        .iter()
        .map(|s| s.income.conflicts.clone())
        .filter(|c| !c.is_empty())
        .collect();
    assert_eq!(excluded, vec![vec!["t1".to_string()]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_confirmations_commit_once() {
    let store = seeded_store();
    let engine = Arc::new(engine(&store));

    let mut handles = Vec::new();
    for operator in ["treasurer", "deacon", "elder"] {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let mut request = ConfirmationRequest::new(operator);
            request.expense.push(expense("t3", 4, 82000));
            engine.confirm(&request).await
        }));
    }

    let mut committed = 0;
    let mut excluded = 0;
    for handle in handles {
        let summary = handle.await.unwrap();
        committed += summary.expense_count;
        excluded += summary.expense.conflicts.len();
    }
    assert_eq!(committed, 1);
    assert_eq!(excluded, 2);
    assert_eq!(store.expense_records().len(), 1);
}

/// Bank store whose first status reads return a stale all-pending snapshot,
/// as if another commit landed right after the gate looked
struct RacingStore {
    inner: Arc<MemoryStore>,
    stale_reads: AtomicUsize,
}

#[async_trait]
impl BankTransactionStore for RacingStore {
    async fn list_pending(&self) -> ReconcileResult<Vec<BankTransaction>> {
        self.inner.list_pending().await
    }

    async fn get_status_map(
        &self,
        ids: &[String],
    ) -> ReconcileResult<HashMap<String, MatchedStatus>> {
        let stale = self
            .stale_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stale {
            return Ok(ids
                .iter()
                .map(|id| (id.clone(), MatchedStatus::Pending))
                .collect());
        }
        self.inner.get_status_map(ids).await
    }

    async fn batch_update_status(
        &self,
        updates: &[StatusUpdate],
    ) -> ReconcileResult<BatchUpdateOutcome> {
        self.inner.batch_update_status(updates).await
    }
}

#[tokio::test]
async fn test_race_past_gate_is_excluded_from_ledger() {
    let store = seeded_store();
    let engine = engine(&store);
    let racing = Arc::new(RacingStore {
        inner: Arc::clone(&store),
        stale_reads: AtomicUsize::new(1),
    });
    let committer = BatchCommitter::new(
        racing,
        Arc::clone(&store),
        RuleBook::new(Arc::clone(&store), 0.8),
    );

    let mut winner = ConfirmationRequest::new("treasurer");
    winner.income.push(income("t1", 3, 100000));
    assert!(engine.confirm(&winner).await.income_success);

    let mut loser = ConfirmationRequest::new("deacon");
    loser.income.push(income("t1", 3, 100000));
    let summary = committer.confirm(&loser).await;

    assert!(!summary.income_success);
    assert_eq!(summary.income.conflicts, vec!["t1".to_string()]);
    assert!(summary.income.error.is_none());
    assert_eq!(store.income_records().len(), 1);
}

#[tokio::test]
async fn test_partial_success_reporting() {
    let store = seeded_store();
    store.poison_transaction("t1");
    let engine = engine(&store);

    let mut request = ConfirmationRequest::new("treasurer");
    request.income.push(income("t1", 3, 100000));
    request.expense.push(expense("t3", 4, 82000));

    let summary = engine.confirm(&request).await;
    assert!(!summary.income_success);
    assert!(summary.expense_success);
    assert!(!summary.suppressed_success);
    assert!(summary.success);
    assert!(summary.is_partial());
    assert_eq!(summary.income.failed, vec!["t1".to_string()]);
    assert!(summary.error.as_deref().unwrap().starts_with("income:"));
    assert!(summary.message.contains("expense: 1 of 1 committed"));

    assert!(store.income_records().is_empty());
    assert_eq!(store.expense_records().len(), 1);
    assert!(store.transaction("t1").unwrap().is_pending());
}

#[tokio::test]
async fn test_status_reread_outage_fails_closed() {
    let store = seeded_store();
    store.fail_status_reads(true);
    let engine = engine(&store);

    let mut request = ConfirmationRequest::new("treasurer");
    request.income.push(income("t1", 3, 100000));
    request.suppress.push(SuppressionConfirmation {
        transaction_id: "t4".to_string(),
        reason: "interest".to_string(),
        observed_status: Some(MatchedStatus::Pending),
    });

    let summary = engine.confirm(&request).await;
    assert!(!summary.success);
    assert!(summary.error.is_some());
    assert!(store.income_records().is_empty());
    assert_eq!(store.list_pending().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_cash_deposit_within_tolerance_is_suppressed() {
    let store = seeded_store();
    store.insert_transaction(deposit("cash", 3, "주일 헌금함 현금입금", 500800, 1600920));
    let engine = engine(&store);

    let result = engine
        .reconcile_cash(
            DateRange::new(date(3), date(4)).unwrap(),
            vec![
                offering("o1", 3, 300000, "홍길동"),
                offering("o2", 3, 200000, "김영희"),
            ],
            "counter",
        )
        .await
        .unwrap();

    assert_eq!(result.batch_size, 2);
    assert_eq!(result.total, BigDecimal::from(500000));
    assert_eq!(result.suppressed_transaction_id.as_deref(), Some("cash"));
    assert!(result.warning.is_none());

    let cash = store.transaction("cash").unwrap();
    assert_eq!(cash.matched_status, MatchedStatus::Suppressed);
    assert!(cash
        .suppressed_reason
        .as_deref()
        .unwrap()
        .contains("2 offerings totalling ₩500,000"));

    let income = store.income_records();
    assert_eq!(income.len(), 2);
    assert!(income.iter().all(|r| r.source == IncomeSource::Cash));
    assert_eq!(income[0].donor_name, "홍길동");
}

#[tokio::test]
async fn test_cash_deposit_outside_tolerance_warns() {
    let store = seeded_store();
    store.insert_transaction(deposit("cash", 3, "헌금함 현금", 502000, 1602120));
    let engine = engine(&store);

    let result = engine
        .reconcile_cash(
            DateRange::day(date(3)),
            vec![offering("o1", 3, 500000, "홍길동")],
            "counter",
        )
        .await
        .unwrap();

    assert!(result.suppressed_transaction_id.is_none());
    let warning = result.warning.unwrap();
    assert!(warning.contains("Reconciliation mismatch"));
    assert!(warning.contains("₩500,000"));
    assert_eq!(result.posted_income_ids.len(), 1);
    assert_eq!(store.income_records().len(), 1);
    assert!(store.transaction("cash").unwrap().is_pending());
}

#[tokio::test]
async fn test_immaterial_cash_total_has_no_warning() {
    let store = seeded_store();
    let engine = engine(&store);

    let result = engine
        .reconcile_cash(
            DateRange::day(date(3)),
            vec![offering("o1", 3, 3000, "무명")],
            "counter",
        )
        .await
        .unwrap();

    assert!(result.suppressed_transaction_id.is_none());
    assert!(result.warning.is_none());
    assert_eq!(store.income_records().len(), 1);
}

#[tokio::test]
async fn test_cash_window_classification_and_auto_confirm() {
    let store = seeded_store();
    store.insert_transaction(deposit("cash", 4, "헌금함 현금입금", 499500, 1567620));
    store.insert_offering(offering("o1", 3, 250000, "홍길동"));
    store.insert_offering(offering("o2", 3, 250000, "김영희"));
    let engine = engine(&store);
    let window = DateRange::new(date(3), date(4)).unwrap();

    let classification = engine.classify(Some(window)).await.unwrap();
    assert_eq!(classification.suppressed.len(), 1);
    assert_eq!(classification.suppressed[0].transaction.id, "cash");

    let summary = engine.auto_confirm("treasurer", Some(window)).await.unwrap();
    assert!(summary.suppressed_success);
    assert_eq!(summary.suppressed_count, 1);
    assert!(store.transaction("cash").unwrap().suppressed);
}

#[tokio::test]
async fn test_terminal_status_never_reverts() {
    let store = seeded_store();
    let engine = engine(&store);

    let mut request = ConfirmationRequest::new("treasurer");
    request.suppress.push(SuppressionConfirmation {
        transaction_id: "t4".to_string(),
        reason: "bank interest".to_string(),
        observed_status: Some(MatchedStatus::Pending),
    });
    assert!(engine.confirm(&request).await.suppressed_success);

    // a stale page tries to match the suppressed line as income
    let mut stale = ConfirmationRequest::new("deacon");
    stale.income.push(income("t4", 4, 120));
    let summary = engine.confirm(&stale).await;
    assert!(!summary.success);
    assert_eq!(summary.income.conflicts, vec!["t4".to_string()]);

    let t4 = store.transaction("t4").unwrap();
    assert_eq!(t4.matched_status, MatchedStatus::Suppressed);
    assert!(store
        .list_pending()
        .await
        .unwrap()
        .iter()
        .all(|t| t.id != "t4"));
    let classification = engine.classify(None).await.unwrap();
    let ids: Vec<&str> = classification
        .needs_review
        .iter()
        .map(|r| r.transaction.id.as_str())
        .collect();
    assert!(!ids.contains(&"t4"));
}

#[tokio::test]
async fn test_rule_usage_failure_does_not_fail_commit() {
    let store = seeded_store();
    store.fail_rule_writes(true);
    let engine = engine(&store);

    let mut item = income("t1", 3, 100000);
    item.rule_id = Some("r-tithe".to_string());
    let mut request = ConfirmationRequest::new("treasurer");
    request.income.push(item);

    let summary = engine.confirm(&request).await;
    settle().await;

    assert!(summary.income_success);
    assert!(summary.error.is_none());
    assert_eq!(store.rule("r-tithe").unwrap().usage_count, 0);
}

#[tokio::test]
async fn test_manual_classification_learns_rule() {
    let store = seeded_store();
    let engine = engine(&store);

    let mut item = income("t4", 4, 120);
    item.code = "190".to_string();
    item.donor_name = "예금이자".to_string();
    item.learn_pattern = Some("이자".to_string());
    let mut request = ConfirmationRequest::new("treasurer");
    request.income.push(item);

    assert!(engine.confirm(&request).await.income_success);
    settle().await;

    let learned = store
        .list_rules(RuleType::BankIncome)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.pattern == "이자")
        .unwrap();
    assert_eq!(learned.target_code, "190");
    assert_eq!(learned.confidence, 0.8);

    // the learned rule is a suggestion only: below the auto-match threshold
    store.insert_transaction(deposit("t9", 31, "이자", 130, 1068250));
    let classification = engine.classify(None).await.unwrap();
    let next = classification
        .needs_review
        .iter()
        .find(|r| r.transaction.id == "t9")
        .unwrap();
    assert_eq!(next.reason, ReviewReason::LowConfidence);
    assert_eq!(next.candidates[0].rule.id, learned.id);
}
