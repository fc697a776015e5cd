//! Tunable thresholds for matching and cash reconciliation

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::types::{ReconcileError, ReconcileResult};

/// Matching and reconciliation settings
///
/// Every field has a default, so a partial JSON document only needs the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum confidence a top rule needs to be applied without review
    pub auto_match_threshold: f64,
    /// A runner-up scoring within this distance of the top rule makes the
    /// match ambiguous
    pub ambiguity_margin: f64,
    /// Number of ranked candidates the matcher returns
    pub max_candidates: usize,
    /// Largest difference (exclusive) between a cash total and the deposit
    /// it is reconciled against
    pub cash_tolerance: BigDecimal,
    /// Cash totals below this amount never raise a mismatch warning
    pub materiality_threshold: BigDecimal,
    /// Tokens marking a deposit as a cash or offering-box lump sum
    pub cash_indicator_tokens: Vec<String>,
    /// Confidence given to rules learned from operator classifications
    pub learned_rule_confidence: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            auto_match_threshold: 0.9,
            ambiguity_margin: 0.05,
            max_candidates: 3,
            cash_tolerance: BigDecimal::from(1000),
            materiality_threshold: BigDecimal::from(10000),
            cash_indicator_tokens: vec![
                "현금".to_string(),
                "헌금함".to_string(),
                "cash".to_string(),
                "offering".to_string(),
            ],
            learned_rule_confidence: 0.8,
        }
    }
}

impl MatchingConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(data: &str) -> ReconcileResult<Self> {
        let config: MatchingConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file, falling back to defaults when it does not exist
    pub fn from_path(path: impl AsRef<Path>) -> ReconcileResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> ReconcileResult<()> {
        if !(0.0..=1.0).contains(&self.auto_match_threshold) {
            return Err(ReconcileError::Config(format!(
                "auto_match_threshold {} is outside [0, 1]",
                self.auto_match_threshold
            )));
        }

        if !(0.0..=1.0).contains(&self.learned_rule_confidence) {
            return Err(ReconcileError::Config(format!(
                "learned_rule_confidence {} is outside [0, 1]",
                self.learned_rule_confidence
            )));
        }

        if self.ambiguity_margin < 0.0 || self.ambiguity_margin.is_nan() {
            return Err(ReconcileError::Config(
                "ambiguity_margin cannot be negative".to_string(),
            ));
        }

        if self.max_candidates == 0 {
            return Err(ReconcileError::Config(
                "max_candidates must be at least 1".to_string(),
            ));
        }

        if self.cash_tolerance < BigDecimal::from(0) {
            return Err(ReconcileError::Config(
                "cash_tolerance cannot be negative".to_string(),
            ));
        }

        if self.materiality_threshold < BigDecimal::from(0) {
            return Err(ReconcileError::Config(
                "materiality_threshold cannot be negative".to_string(),
            ));
        }

        Ok(())
    }

    /// Indicator tokens, lower-cased for matching against search text
    pub(crate) fn indicator_tokens(&self) -> impl Iterator<Item = String> + '_ {
        self.cash_indicator_tokens
            .iter()
            .map(|token| token.trim().to_lowercase())
            .filter(|token| !token.is_empty())
    }
}
