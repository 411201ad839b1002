//! Config-driven pattern detectors.
//!
//! Each `[[heuristic.detectors]]` record compiles into a [`Detector`] at
//! startup. Detectors scan the recent lines of a pane whenever its content
//! hash changes; the first detector matching a line wins that line. A hit is
//! rate-limited per `(detector, target)` pair by the detector's cooldown.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;

use crate::clock::seconds_between;
use crate::config::DetectorConfig;
use crate::error::Result;

use super::patterns::compile;

#[derive(Debug, Clone)]
pub enum TargetRule {
    Group { index: usize, fallback: Option<String> },
    Fixed(String),
    None,
}

#[derive(Debug, Clone)]
pub struct Detector {
    pub name: String,
    pub signal: String,
    regex: Regex,
    guards: Vec<Regex>,
    target: TargetRule,
    target_strip: Vec<char>,
    cooldown_secs: f64,
}

impl Detector {
    pub fn compile(config: &DetectorConfig, default_cooldown_secs: f64) -> Result<Self> {
        let regex = compile(&config.name, &config.regex, config.ignore_case)?;
        let guards = config
            .guards
            .iter()
            .map(|guard| compile(&config.name, guard, true))
            .collect::<Result<Vec<_>>>()?;
        let target = match (config.target_group, config.target.as_ref()) {
            (Some(index), fallback) => TargetRule::Group {
                index,
                fallback: fallback.cloned(),
            },
            (None, Some(fixed)) => TargetRule::Fixed(fixed.clone()),
            (None, None) => TargetRule::None,
        };
        Ok(Self {
            name: config.name.clone(),
            signal: config
                .signal
                .clone()
                .unwrap_or_else(|| format!("heuristic_{}", config.name)),
            regex,
            guards,
            target,
            target_strip: config.target_strip.chars().collect(),
            cooldown_secs: config.cooldown_secs.unwrap_or(default_cooldown_secs),
        })
    }

    fn is_guarded(&self, line: &str) -> bool {
        self.guards.iter().any(|guard| guard.is_match(line))
    }

    /// Extracted target when the line matches and no guard blocks it.
    pub fn match_line(&self, line: &str) -> Option<String> {
        if self.is_guarded(line) {
            return None;
        }
        let caps = self.regex.captures(line)?;
        let target = match &self.target {
            TargetRule::Group { index, fallback } => match caps.get(*index) {
                Some(group) => group
                    .as_str()
                    .trim_end_matches(|c| self.target_strip.contains(&c))
                    .to_string(),
                None => fallback.clone().unwrap_or_default(),
            },
            TargetRule::Fixed(fixed) => fixed.clone(),
            TargetRule::None => String::new(),
        };
        Some(target)
    }

    pub fn cooldown_secs(&self) -> f64 {
        self.cooldown_secs
    }
}

/// Cooldown key for a detector and target: `detector:<first 8 hex of md5>`.
pub fn cooldown_key(detector: &str, target: &str) -> String {
    let digest = format!("{:x}", md5::compute(target.as_bytes()));
    format!("{}:{}", detector, &digest[..8])
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorHit {
    pub detector: String,
    pub signal: String,
    pub target: String,
}

#[derive(Debug, Clone, Default)]
pub struct DetectorTable {
    detectors: Vec<Detector>,
    max_scan_lines: usize,
}

impl DetectorTable {
    pub fn compile(configs: &[DetectorConfig], default_cooldown_secs: f64, max_scan_lines: usize) -> Result<Self> {
        let detectors = configs
            .iter()
            .map(|config| Detector::compile(config, default_cooldown_secs))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            detectors,
            max_scan_lines: max_scan_lines.max(1),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    /// Scans the last lines of `content`. `last_emissions` is the pane's
    /// cooldown map and is updated for every hit returned.
    pub fn scan(
        &self,
        content: &str,
        last_emissions: &mut HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<DetectorHit> {
        if self.detectors.is_empty() {
            return Vec::new();
        }
        let lines: Vec<&str> = content.split('\n').collect();
        let skip = lines.len().saturating_sub(self.max_scan_lines);

        let mut hits = Vec::new();
        for line in &lines[skip..] {
            let Some((detector, target)) = self
                .detectors
                .iter()
                .find_map(|detector| detector.match_line(line).map(|target| (detector, target)))
            else {
                continue;
            };

            let key = cooldown_key(&detector.name, &target);
            if let Some(last) = last_emissions.get(&key) {
                if seconds_between(*last, now) < detector.cooldown_secs {
                    tracing::trace!(detector = %detector.name, target = %target, "Detector in cooldown");
                    continue;
                }
            }
            last_emissions.insert(key, now);
            hits.push(DetectorHit {
                detector: detector.name.clone(),
                signal: detector.signal.clone(),
                target,
            });
        }
        hits
    }
}
