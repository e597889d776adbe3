//! Edge conditions and the string-match evaluator.
//!
//! Routing is limited to a closed set of operators over the producing node's
//! output: `contains`, `not_contains`, `fuzzy`, and `regex`. There is no
//! general expression language.

use regex::RegexBuilder;
use thiserror::Error;

use treeflow_types::workflow::{ConditionConfig, MatchTarget, MatchType};

/// Minimum share of the match value's tokens that must appear in the text
/// for a fuzzy condition to match.
pub const FUZZY_THRESHOLD: f64 = 0.8;

/// A validated edge condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub match_target: MatchTarget,
    pub match_type: MatchType,
    pub match_value: String,
    pub case_sensitive: bool,
}

impl Condition {
    /// Validate a wire-format condition against the closed enums.
    pub fn from_config(config: &ConditionConfig) -> Result<Self, String> {
        Ok(Self {
            match_target: config.match_target.parse()?,
            match_type: config.match_type.parse()?,
            match_value: config.match_value.clone(),
            case_sensitive: config.case_sensitive,
        })
    }

    /// Convert back to the wire format.
    pub fn to_config(&self) -> ConditionConfig {
        ConditionConfig {
            match_target: self.match_target.to_string(),
            match_type: self.match_type.to_string(),
            match_value: self.match_value.clone(),
            case_sensitive: self.case_sensitive,
        }
    }

    /// Check that a regex condition compiles. Other match types always pass.
    pub fn check_pattern(&self) -> Result<(), ConditionError> {
        if self.match_type == MatchType::Regex {
            build_regex(&self.match_value, self.case_sensitive)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:?}", self.match_type, self.match_value)?;
        if !self.case_sensitive {
            write!(f, " (case-insensitive)")?;
        }
        Ok(())
    }
}

/// Non-fatal condition evaluation failure. The edge is treated as inactive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
}

/// Decides whether a condition holds for a node's output.
pub trait ConditionMatcher: Send + Sync {
    fn matches(&self, condition: &Condition, text: &str) -> Result<bool, ConditionError>;
}

/// The default matcher, backed by [`evaluate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMatcher;

impl ConditionMatcher for StandardMatcher {
    fn matches(&self, condition: &Condition, text: &str) -> Result<bool, ConditionError> {
        evaluate(condition, text)
    }
}

/// Evaluate a condition against candidate text.
pub fn evaluate(condition: &Condition, text: &str) -> Result<bool, ConditionError> {
    let value = condition.match_value.as_str();
    let cs = condition.case_sensitive;
    match condition.match_type {
        MatchType::Contains => Ok(contains(text, value, cs)),
        MatchType::NotContains => Ok(!contains(text, value, cs)),
        MatchType::Fuzzy => Ok(fuzzy_match(text, value, cs)),
        MatchType::Regex => Ok(build_regex(value, cs)?.is_match(text)),
    }
}

fn contains(text: &str, value: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        text.contains(value)
    } else {
        text.to_lowercase().contains(&value.to_lowercase())
    }
}

fn build_regex(pattern: &str, case_sensitive: bool) -> Result<regex::Regex, ConditionError> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| ConditionError::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn fold(s: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}

/// Whitespace-insensitive containment, falling back to token-set overlap.
fn fuzzy_match(text: &str, value: &str, case_sensitive: bool) -> bool {
    let text = fold(text, case_sensitive);
    let value = fold(value, case_sensitive);

    let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    if squash(&text).contains(&squash(&value)) {
        return true;
    }

    let wanted: std::collections::HashSet<&str> = value.split_whitespace().collect();
    if wanted.is_empty() {
        return false;
    }
    let present: std::collections::HashSet<&str> = text.split_whitespace().collect();
    let found = wanted.iter().filter(|t| present.contains(*t)).count();
    found as f64 / wanted.len() as f64 >= FUZZY_THRESHOLD
}
