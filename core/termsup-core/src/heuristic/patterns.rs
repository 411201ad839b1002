//! Compiled text classifiers for the content heuristic.

use regex::{Regex, RegexBuilder};

use crate::config::HeuristicConfig;
use crate::error::{Result, TermsupError};

pub(crate) fn compile(name: &str, pattern: &str, ignore_case: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .build()
        .map_err(|source| TermsupError::InvalidPattern {
            name: name.to_string(),
            pattern: pattern.to_string(),
            source,
        })
}

fn compile_all(name: &str, patterns: &[String], ignore_case: bool) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| compile(name, pattern, ignore_case))
        .collect()
}

/// Classifier regexes, built once from config.
#[derive(Debug, Clone)]
pub struct Classifiers {
    prompt_anchor: Regex,
    interactivity: Regex,
    spinners: Vec<Regex>,
    negatives: Vec<Regex>,
    completion_tokens: Vec<String>,
    interrupts: Vec<Regex>,
    approvals: Vec<Regex>,
}

impl Classifiers {
    pub fn from_config(config: &HeuristicConfig) -> Result<Self> {
        Ok(Self {
            prompt_anchor: compile("prompt_anchor", &config.prompt_anchor_regex, false)?,
            interactivity: compile("interactivity", &config.interactivity_regex, false)?,
            spinners: compile_all("spinner", &config.spinner_patterns, false)?,
            negatives: compile_all("negative", &config.negative_patterns, false)?,
            completion_tokens: config
                .completion_tokens
                .iter()
                .map(|token| token.to_lowercase())
                .filter(|token| !token.is_empty())
                .collect(),
            interrupts: compile_all("interrupt", &config.interrupt_patterns, true)?,
            approvals: compile_all("approval", &config.approval_patterns, true)?,
        })
    }

    pub fn is_prompt_anchor(&self, line: &str) -> bool {
        self.prompt_anchor.is_match(line)
    }

    pub fn is_interactive(&self, line: &str) -> bool {
        self.interactivity.is_match(line)
    }

    pub fn is_spinner(&self, line: &str) -> bool {
        self.spinners.iter().any(|re| re.is_match(line))
    }

    pub fn is_negative(&self, line: &str) -> bool {
        self.negatives.iter().any(|re| re.is_match(line))
    }

    pub fn has_completion_token(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.completion_tokens
            .iter()
            .any(|token| lower.contains(token.as_str()))
    }

    /// Prompt anchor or completion token.
    pub fn is_finished_line(&self, line: &str) -> bool {
        self.is_prompt_anchor(line) || self.has_completion_token(line)
    }

    pub fn has_interrupt(&self, content: &str) -> bool {
        self.interrupts.iter().any(|re| re.is_match(content))
    }

    pub fn has_approval(&self, content: &str) -> bool {
        self.approvals.iter().any(|re| re.is_match(content))
    }
}
