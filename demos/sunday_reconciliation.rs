//! Reconciling one week of bank lines and Sunday cash offerings

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::sync::Arc;

use churchbook_core::utils::MemoryStore;
use churchbook_core::{
    init_tracing, BankTransaction, CashOffering, ConfirmationRequest, DateRange,
    IncomeConfirmation, MatchingConfig, MatchingRule, ReconciliationEngine, RuleType,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let sunday = NaiveDate::from_ymd_opt(2024, 3, 3).ok_or("invalid date")?;
    let monday = NaiveDate::from_ymd_opt(2024, 3, 4).ok_or("invalid date")?;

    let store = Arc::new(MemoryStore::new());
    let config = MatchingConfig::from_path("matching.json")?;
    let engine = ReconciliationEngine::new(Arc::clone(&store), config)?;

    // Seed rules
    for (rule_type, pattern, code, name, confidence) in [
        (RuleType::BankIncome, "십일", "101", "십일조", 0.95),
        (RuleType::BankIncome, "감사", "102", "감사헌금", 0.9),
        (RuleType::BankIncome, "건축", "103", "건축헌금", 0.95),
        (RuleType::BankExpense, "한국전력", "501", "전기요금", 0.95),
    ] {
        engine
            .rules()
            .add_rule(MatchingRule::new(
                rule_type,
                pattern.to_string(),
                code.to_string(),
                name.to_string(),
                confidence,
            ))
            .await?;
    }

    // Import the week's bank ledger
    let lines = [
        ("b1", sunday, "홍길동 십일조", 0, 100000, 1100000),
        ("b2", sunday, "김영희 감사 건축", 0, 50000, 1150000),
        ("b3", monday, "주일 헌금함 현금입금", 0, 500800, 1650800),
        ("b4", monday, "한국전력 자동이체", 82000, 0, 1568800),
        ("b5", monday, "예금이자", 0, 120, 1568920),
    ];
    for (id, date, text, withdrawal, deposit, balance) in lines {
        store.insert_transaction(BankTransaction::new(
            id.to_string(),
            date,
            text.to_string(),
            BigDecimal::from(withdrawal),
            BigDecimal::from(deposit),
            BigDecimal::from(balance),
        ));
    }

    // 1. Post the counted cash and suppress its lump-sum deposit
    println!("💵 Reconciling Sunday cash offerings...");
    let offerings = vec![
        CashOffering {
            id: "c1".to_string(),
            date: sunday,
            amount: BigDecimal::from(300000),
            attribution: "박철수".to_string(),
            code: "101".to_string(),
        },
        CashOffering {
            id: "c2".to_string(),
            date: sunday,
            amount: BigDecimal::from(200000),
            attribution: "이순자".to_string(),
            code: "102".to_string(),
        },
    ];
    let cash = engine
        .reconcile_cash(DateRange::new(sunday, monday)?, offerings, "counting-team")
        .await?;
    println!(
        "  ✓ Posted {} offerings, suppressed deposit: {:?}",
        cash.posted_income_ids.len(),
        cash.suppressed_transaction_id
    );
    if let Some(warning) = &cash.warning {
        println!("  ⚠ {}", warning);
    }
    if let Some(error) = &cash.error {
        println!("  ❌ {}", error);
    }

    // 2. Apply confident matches automatically
    println!("\n🔎 Auto-matching pending bank lines...");
    let summary = engine.auto_confirm("treasurer", None).await?;
    println!("  ✓ {}", summary.message);

    // 3. Review what is left
    let classification = engine.classify(None).await?;
    println!("\n📋 Needs review:");
    for item in &classification.needs_review {
        let suggestions: Vec<&str> = item
            .candidates
            .iter()
            .map(|c| c.rule.target_name.as_str())
            .collect();
        println!(
            "  • {} {} ({:?}) suggestions: {:?}",
            item.transaction.id, item.transaction.description, item.reason, suggestions
        );
    }

    // 4. The treasurer settles the ambiguous line and teaches a new rule
    let mut request = ConfirmationRequest::new("treasurer");
    request.income.push(IncomeConfirmation {
        transaction_id: "b2".to_string(),
        date: Some(sunday),
        amount: Some(BigDecimal::from(50000)),
        code: "103".to_string(),
        donor_name: "김영희".to_string(),
        note: "building fund with thanks".to_string(),
        rule_id: None,
        learn_pattern: None,
        observed_status: None,
    });
    request.income.push(IncomeConfirmation {
        transaction_id: "b5".to_string(),
        date: Some(monday),
        amount: Some(BigDecimal::from(120)),
        code: "190".to_string(),
        donor_name: "예금이자".to_string(),
        note: String::new(),
        rule_id: None,
        learn_pattern: Some("이자".to_string()),
        observed_status: None,
    });
    let summary = engine.confirm(&request).await;
    println!("\n✅ {}", summary.message);

    println!(
        "\nIncome records: {}, expense records: {}",
        store.income_records().len(),
        store.expense_records().len()
    );

    Ok(())
}
