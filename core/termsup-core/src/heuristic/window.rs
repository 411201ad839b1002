//! Per-pane content change window.
//!
//! Keeps a short list of content records for one pane. The last record (the
//! tail) is overwritten on every submit; the one before it (the base) only
//! moves when the tail has drifted far enough from it. Newline and character
//! deltas between base and tail measure output bursts, and a separate
//! last-change timestamp measures quiet periods.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, VecDeque};

use crate::clock::seconds_between;

const MAX_RECORDS: usize = 10;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Cleaning
// ═══════════════════════════════════════════════════════════════════════════════

fn is_text_char(c: char) -> bool {
    let code = c as u32;
    c.is_ascii_alphanumeric()
        || (0x00C0..=0x024F).contains(&code)
        || (0x4E00..=0x9FFF).contains(&code)
        || (0x3400..=0x4DBF).contains(&code)
        || (0x3040..=0x30FF).contains(&code)
        || (0xAC00..=0xD7AF).contains(&code)
        || (0x1100..=0x11FF).contains(&code)
}

/// Strips escape sequences and keeps only letters and digits, dropping lines
/// that end up empty. Spinners, progress bars and punctuation vanish, so
/// cosmetic redraws do not count as changes.
pub fn clean_content(raw: &str) -> String {
    raw.split('\n')
        .map(|line| {
            ANSI_ESCAPE
                .replace_all(line, "")
                .chars()
                .filter(|c| is_text_char(*c))
                .collect::<String>()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// md5 of the cleaned content, hex encoded.
pub fn content_hash(raw: &str) -> String {
    format!("{:x}", md5::compute(clean_content(raw).as_bytes()))
}

/// Lines added plus lines removed between two cleaned snapshots, ignoring
/// order.
pub fn changed_line_count(old: &str, new: &str) -> usize {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for line in old.split('\n').filter(|line| !line.is_empty()) {
        *counts.entry(line).or_insert(0) += 1;
    }
    for line in new.split('\n').filter(|line| !line.is_empty()) {
        *counts.entry(line).or_insert(0) -= 1;
    }
    counts.values().map(|count| count.unsigned_abs() as usize).sum()
}

fn line_count(cleaned: &str) -> i64 {
    if cleaned.is_empty() {
        0
    } else {
        cleaned.matches('\n').count() as i64 + 1
    }
}

fn last_lines(raw: &str, n: usize) -> String {
    let lines: Vec<&str> = raw.split('\n').collect();
    let skip = lines.len().saturating_sub(n);
    lines[skip..].join("\n")
}

// ═══════════════════════════════════════════════════════════════════════════════
// Window
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
struct ContentRecord {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    content_hash: String,
    snapshot: String,
    newline_count: i64,
    char_count: i64,
    raw_tail: String,
    changed_lines: usize,
}

impl ContentRecord {
    fn new(now: DateTime<Utc>, hash: &str, cleaned: &str, raw_tail: String, changed_lines: usize) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            content_hash: hash.to_string(),
            snapshot: cleaned.to_string(),
            newline_count: line_count(cleaned),
            char_count: cleaned.chars().count() as i64,
            raw_tail,
            changed_lines,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentWindow {
    records: VecDeque<ContentRecord>,
    new_record_lines: usize,
    raw_tail_lines: usize,
    last_change_at: Option<DateTime<Utc>>,
    last_hash: String,
    last_submit_changed: bool,
}

impl ContentWindow {
    pub fn new(new_record_lines: usize, raw_tail_lines: usize) -> Self {
        Self {
            records: VecDeque::new(),
            new_record_lines: new_record_lines.max(1),
            raw_tail_lines: raw_tail_lines.max(1),
            last_change_at: None,
            last_hash: String::new(),
            last_submit_changed: false,
        }
    }

    /// Records a new capture. `hash` is computed from the content when the
    /// caller does not supply one. Returns whether the hash changed.
    pub fn submit(&mut self, raw: &str, hash: Option<&str>, now: DateTime<Utc>) -> bool {
        let cleaned = clean_content(raw);
        let hash = match hash {
            Some(hash) if !hash.is_empty() => hash.to_string(),
            _ => format!("{:x}", md5::compute(cleaned.as_bytes())),
        };
        let raw_tail = last_lines(raw, self.raw_tail_lines);

        if self.records.is_empty() {
            let record = ContentRecord::new(now, &hash, &cleaned, raw_tail, 0);
            self.records.push_back(record.clone());
            self.records.push_back(record);
            self.last_change_at = Some(now);
            self.last_hash = hash;
            self.last_submit_changed = true;
            return true;
        }

        let changed = hash != self.last_hash;
        if let Some(tail) = self.records.back_mut() {
            tail.updated_at = now;
            tail.content_hash = hash.clone();
            tail.snapshot = cleaned.clone();
            tail.newline_count = line_count(&cleaned);
            tail.char_count = cleaned.chars().count() as i64;
            tail.raw_tail = raw_tail.clone();
        }
        if changed {
            self.last_change_at = Some(now);
            self.last_hash = hash.clone();
        }
        self.last_submit_changed = changed;

        let drift = match (self.base(), self.tail()) {
            (Some(base), Some(tail)) => changed_line_count(&base.snapshot, &tail.snapshot),
            _ => 0,
        };
        if drift >= self.new_record_lines {
            self.records
                .push_back(ContentRecord::new(now, &hash, &cleaned, raw_tail, drift));
            while self.records.len() > MAX_RECORDS {
                self.records.pop_front();
            }
        }
        changed
    }

    fn tail(&self) -> Option<&ContentRecord> {
        self.records.back()
    }

    fn base(&self) -> Option<&ContentRecord> {
        let len = self.records.len();
        if len < 2 {
            None
        } else {
            self.records.get(len - 2)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn current_hash(&self) -> &str {
        &self.last_hash
    }

    /// Line-count growth from base to tail.
    pub fn newline_delta(&self) -> i64 {
        match (self.base(), self.tail()) {
            (Some(base), Some(tail)) => tail.newline_count - base.newline_count,
            _ => 0,
        }
    }

    /// Character growth from base to tail, never negative.
    pub fn burst_length(&self) -> i64 {
        match (self.base(), self.tail()) {
            (Some(base), Some(tail)) => (tail.char_count - base.char_count).max(0),
            _ => 0,
        }
    }

    /// Last `n` raw lines of the tail record.
    pub fn tail_lines(&self, n: usize) -> Vec<String> {
        let Some(tail) = self.tail() else {
            return Vec::new();
        };
        if tail.raw_tail.is_empty() {
            return Vec::new();
        }
        let lines: Vec<&str> = tail.raw_tail.split('\n').collect();
        let skip = lines.len().saturating_sub(n);
        lines[skip..].iter().map(|line| line.to_string()).collect()
    }

    /// Seconds since the content hash last changed.
    pub fn quiet_duration(&self, now: DateTime<Utc>) -> f64 {
        self.last_change_at
            .map(|changed| seconds_between(changed, now).max(0.0))
            .unwrap_or(0.0)
    }

    /// The most recent submit left the hash unchanged.
    pub fn is_hash_stable(&self) -> bool {
        !self.records.is_empty() && !self.last_submit_changed
    }
}
