//! Substring and token ranking of matching rules

use serde::{Deserialize, Serialize};

use crate::types::*;

/// How a rule's pattern was found in the transaction text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    /// The whole pattern appears in the text
    Full,
    /// Only this whitespace-delimited token of the pattern appears
    Token(String),
}

/// A rule that matched, together with how it matched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCandidate {
    pub rule: MatchingRule,
    pub kind: MatchKind,
}

impl RuleCandidate {
    pub fn confidence(&self) -> f64 {
        self.rule.confidence
    }
}

/// Deterministic, explainable ranker of matching rules
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    max_candidates: usize,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new(3)
    }
}

impl PatternMatcher {
    pub fn new(max_candidates: usize) -> Self {
        Self {
            max_candidates: max_candidates.max(1),
        }
    }

    /// Rank the rules that match `text`
    ///
    /// `text` is expected to be lower-cased already (see
    /// [`BankTransaction::search_text`]). Candidates are ordered by confidence,
    /// highest first; equal confidences keep the order of `rules`. Rules with
    /// a non-finite confidence never match.
    pub fn rank(&self, text: &str, rules: &[MatchingRule]) -> Vec<RuleCandidate> {
        let text = text.to_lowercase();
        let mut candidates: Vec<RuleCandidate> = rules
            .iter()
            .filter(|rule| rule.confidence.is_finite())
            .filter_map(|rule| {
                match_pattern(&text, &rule.pattern).map(|kind| RuleCandidate {
                    rule: rule.clone(),
                    kind,
                })
            })
            .collect();

        // `sort_by` is stable, which keeps ties in input order
        candidates.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
        candidates.truncate(self.max_candidates);
        candidates
    }

    /// Rank rules against a bank line's search text
    pub fn rank_transaction(
        &self,
        transaction: &BankTransaction,
        rules: &[MatchingRule],
    ) -> Vec<RuleCandidate> {
        self.rank(&transaction.search_text(), rules)
    }
}

fn match_pattern(text: &str, pattern: &str) -> Option<MatchKind> {
    let pattern = pattern.trim().to_lowercase();
    if pattern.is_empty() {
        return None;
    }

    if text.contains(&pattern) {
        return Some(MatchKind::Full);
    }

    pattern
        .split_whitespace()
        .find(|token| text.contains(token))
        .map(|token| MatchKind::Token(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, pattern: &str, confidence: f64) -> MatchingRule {
        MatchingRule::new(
            RuleType::BankIncome,
            pattern.to_string(),
            format!("code-{}", id),
            pattern.to_string(),
            confidence,
        )
        .with_id(id)
    }

    fn seeded_rules() -> Vec<MatchingRule> {
        vec![
            rule("r1", "십일", 0.95),
            rule("r2", "건축", 0.95),
            rule("r3", "감사", 0.9),
        ]
    }

    #[test]
    fn test_substring_match() {
        let matcher = PatternMatcher::default();
        let ranked = matcher.rank("성도 십일조 입금", &seeded_rules());

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].rule.pattern, "십일");
        assert_eq!(ranked[0].kind, MatchKind::Full);
    }

    #[test]
    fn test_ranking_by_confidence() {
        let matcher = PatternMatcher::default();
        let ranked = matcher.rank("십일조 및 감사헌금", &seeded_rules());

        let patterns: Vec<&str> = ranked.iter().map(|c| c.rule.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["십일", "감사"]);
    }

    #[test]
    fn test_ties_preserve_input_order() {
        let matcher = PatternMatcher::default();
        let ranked = matcher.rank("건축헌금 십일조", &seeded_rules());

        let ids: Vec<&str> = ranked.iter().map(|c| c.rule.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);

        let mut reversed = seeded_rules();
        reversed.swap(0, 1);
        let ranked = matcher.rank("건축헌금 십일조", &reversed);
        let ids: Vec<&str> = ranked.iter().map(|c| c.rule.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r1"]);
    }

    #[test]
    fn test_token_match() {
        let matcher = PatternMatcher::default();
        let rules = vec![rule("r1", "한국전력 전기요금", 0.8)];
        let ranked = matcher.rank("kepco 전기요금 자동이체", &rules);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].kind, MatchKind::Token("전기요금".to_string()));
    }

    #[test]
    fn test_case_insensitive_and_empty_patterns() {
        let matcher = PatternMatcher::default();
        let rules = vec![rule("r1", "  ", 1.0), rule("r2", "KEPCO", 0.7)];
        let ranked = matcher.rank("kepco auto debit", &rules);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].rule.id, "r2");
    }

    #[test]
    fn test_non_finite_confidence_is_ignored() {
        let matcher = PatternMatcher::default();
        let rules = vec![
            rule("r1", "헌금", 0.5),
            rule("r2", "헌금", f64::NAN),
            rule("r3", "헌금", 0.9),
            rule("r4", "헌금", f64::INFINITY),
        ];
        let ranked = matcher.rank("주일 헌금", &rules);

        let ids: Vec<&str> = ranked.iter().map(|c| c.rule.id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r1"]);
    }

    #[test]
    fn test_capped_to_max_candidates() {
        let matcher = PatternMatcher::default();
        let rules: Vec<MatchingRule> = (0..5)
            .map(|i| rule(&format!("r{}", i), "헌금", 0.5 + i as f64 / 10.0))
            .collect();
        let ranked = matcher.rank("주일 헌금", &rules);

        let ids: Vec<&str> = ranked.iter().map(|c| c.rule.id.as_str()).collect();
        assert_eq!(ids, vec!["r4", "r3", "r2"]);
    }

    #[test]
    fn test_deterministic() {
        let matcher = PatternMatcher::default();
        let rules = seeded_rules();
        let first = matcher.rank("십일조 건축 감사", &rules);
        let second = matcher.rank("십일조 건축 감사", &rules);
        assert_eq!(first, second);
    }
}
