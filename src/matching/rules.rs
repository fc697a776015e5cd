//! Typed access to persisted matching rules

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::traits::RuleStore;
use crate::types::*;
use crate::utils::validation::validate_rule;

/// Result of learning from an operator classification
#[derive(Debug, Clone, PartialEq)]
pub enum LearnOutcome {
    /// A new rule was stored
    Created(MatchingRule),
    /// An equivalent rule already existed and its usage was counted
    Reinforced(String),
}

/// Rule store accessor shared by the matcher and the committer
pub struct RuleBook<R: RuleStore> {
    store: Arc<R>,
    learned_confidence: f64,
}

impl<R: RuleStore> Clone for RuleBook<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            learned_confidence: self.learned_confidence,
        }
    }
}

impl<R: RuleStore + 'static> RuleBook<R> {
    pub fn new(store: Arc<R>, learned_confidence: f64) -> Self {
        Self {
            store,
            learned_confidence,
        }
    }

    /// Rules of one family in stored order
    pub async fn rules_for(&self, rule_type: RuleType) -> ReconcileResult<Vec<MatchingRule>> {
        self.store.list_rules(rule_type).await
    }

    /// Validate and store a seeded rule
    pub async fn add_rule(&self, rule: MatchingRule) -> ReconcileResult<MatchingRule> {
        validate_rule(&rule)?;
        self.store.add_rule(&rule).await?;
        tracing::info!(
            rule_id = %rule.id,
            rule_type = %rule.rule_type,
            pattern = %rule.pattern,
            "matching rule added"
        );
        Ok(rule)
    }

    pub async fn increment_usage(&self, rule_id: &str) -> ReconcileResult<()> {
        self.store.increment_usage(rule_id).await
    }

    /// Remember an operator's classification of an unmatched line
    ///
    /// A rule with the same pattern and target code is reinforced instead of
    /// duplicated.
    pub async fn learn(
        &self,
        rule_type: RuleType,
        pattern: &str,
        target_code: &str,
        target_name: &str,
    ) -> ReconcileResult<LearnOutcome> {
        let normalized = pattern.trim().to_lowercase();
        let existing = self.store.list_rules(rule_type).await?;
        if let Some(rule) = existing
            .iter()
            .find(|r| r.pattern.trim().to_lowercase() == normalized && r.target_code == target_code)
        {
            self.store.increment_usage(&rule.id).await?;
            return Ok(LearnOutcome::Reinforced(rule.id.clone()));
        }

        let rule = MatchingRule::new(
            rule_type,
            normalized,
            target_code.to_string(),
            target_name.to_string(),
            self.learned_confidence,
        );
        let rule = self.add_rule(rule).await?;
        Ok(LearnOutcome::Created(rule))
    }

    /// Count a confirmed use of a rule without waiting for the store
    ///
    /// The task's outcome is only logged. Returns `None` when called outside
    /// a tokio runtime, in which case the increment is skipped.
    pub fn spawn_usage_increment(&self, rule_id: String) -> Option<JoinHandle<()>> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(rule_id = %rule_id, "no async runtime, skipping rule usage increment");
                return None;
            }
        };
        let store = Arc::clone(&self.store);
        Some(handle.spawn(async move {
            match store.increment_usage(&rule_id).await {
                Ok(()) => tracing::debug!(rule_id = %rule_id, "rule usage incremented"),
                Err(err) => {
                    tracing::warn!(rule_id = %rule_id, error = %err, "rule usage increment failed")
                }
            }
        }))
    }

    /// Learn from a classification without waiting for the store
    pub fn spawn_learn(
        &self,
        rule_type: RuleType,
        pattern: String,
        target_code: String,
        target_name: String,
    ) -> Option<JoinHandle<()>> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(pattern = %pattern, "no async runtime, skipping rule learning");
                return None;
            }
        };
        let book = self.clone();
        Some(handle.spawn(async move {
            match book
                .learn(rule_type, &pattern, &target_code, &target_name)
                .await
            {
                Ok(LearnOutcome::Created(rule)) => {
                    tracing::debug!(rule_id = %rule.id, "learned matching rule")
                }
                Ok(LearnOutcome::Reinforced(rule_id)) => {
                    tracing::debug!(rule_id = %rule_id, "reinforced matching rule")
                }
                Err(err) => tracing::warn!(pattern = %pattern, error = %err, "rule learning failed"),
            }
        }))
    }
}
