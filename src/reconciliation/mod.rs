//! Reconciliation of bank lines against the income and expense ledgers

pub mod cash_offering;
pub mod committer;
pub mod gate;

pub use cash_offering::*;
pub use committer::*;
pub use gate::*;

use std::sync::Arc;

use crate::config::MatchingConfig;
use crate::matching::orchestrator::{AutoMatcher, Classification};
use crate::matching::rules::RuleBook;
use crate::traits::*;
use crate::types::*;

/// Entry point wiring the matcher, gate, committer and cash reconciler over
/// one store
pub struct ReconciliationEngine<S: ReconciliationStore + 'static> {
    store: Arc<S>,
    config: MatchingConfig,
    auto_matcher: AutoMatcher,
    rules: RuleBook<S>,
    committer: BatchCommitter<S, S, S>,
    cash: CashOfferingReconciler<S, S>,
}

impl<S: ReconciliationStore + 'static> ReconciliationEngine<S> {
    /// Create an engine after validating `config`
    pub fn new(store: Arc<S>, config: MatchingConfig) -> ReconcileResult<Self> {
        Self::with_validator(store, config, Box::new(DefaultConfirmationValidator))
    }

    /// Create an engine with a custom confirmation validator
    pub fn with_validator(
        store: Arc<S>,
        config: MatchingConfig,
        validator: Box<dyn ConfirmationValidator>,
    ) -> ReconcileResult<Self> {
        config.validate()?;
        let rules = RuleBook::new(Arc::clone(&store), config.learned_rule_confidence);
        Ok(Self {
            auto_matcher: AutoMatcher::new(config.clone()),
            committer: BatchCommitter::with_validator(
                Arc::clone(&store),
                Arc::clone(&store),
                rules.clone(),
                validator,
            ),
            cash: CashOfferingReconciler::new(Arc::clone(&store), Arc::clone(&store), config.clone()),
            rules,
            store,
            config,
        })
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleBook<S> {
        &self.rules
    }

    /// Classify the current pending set
    ///
    /// When `cash_window` is given, the cash offerings recorded in it are
    /// grouped into one batch and its lump-sum deposit is classified as
    /// suppressed.
    pub async fn classify(&self, cash_window: Option<DateRange>) -> ReconcileResult<Classification> {
        let pending = self.store.list_pending().await?;
        let income_rules = self.rules.rules_for(RuleType::BankIncome).await?;
        let expense_rules = self.rules.rules_for(RuleType::BankExpense).await?;

        let mut batches = Vec::new();
        if let Some(range) = cash_window {
            let offerings = self.store.list_offerings(range.start, range.end).await?;
            batches.push(CashOfferingBatch::new(range, offerings));
        }

        Ok(self
            .auto_matcher
            .classify(&pending, &income_rules, &expense_rules, &batches))
    }

    /// Commit an operator-reviewed confirmation request
    pub async fn confirm(&self, request: &ConfirmationRequest) -> ConfirmationSummary {
        self.committer.confirm(request).await
    }

    /// Classify and immediately commit every auto-match and suppression
    pub async fn auto_confirm(
        &self,
        created_by: &str,
        cash_window: Option<DateRange>,
    ) -> ReconcileResult<ConfirmationSummary> {
        let classification = self.classify(cash_window).await?;
        let request = classification.auto_confirmations(created_by);
        Ok(self.confirm(&request).await)
    }

    /// Post a counting window's cash offerings and suppress their deposit
    pub async fn reconcile_cash(
        &self,
        range: DateRange,
        offerings: Vec<CashOffering>,
        created_by: &str,
    ) -> ReconcileResult<CashReconciliation> {
        self.cash.reconcile(range, offerings, created_by).await
    }
}
