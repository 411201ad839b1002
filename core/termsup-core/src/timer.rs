//! Named delay and interval tasks driven by an external `tick(now)`.
//!
//! Tasks carry a payload instead of a callback; the owner decides what a
//! fired payload means. Registering a delay under an existing name replaces
//! the pending one, which is how supersession is expressed.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct DelayTask<T> {
    fire_at: DateTime<Utc>,
    seq: u64,
    payload: T,
}

#[derive(Debug, Clone)]
struct IntervalTask {
    every: Duration,
    next_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DelayScheduler<T> {
    delays: HashMap<String, DelayTask<T>>,
    intervals: HashMap<String, IntervalTask>,
    seq: u64,
}

impl<T> DelayScheduler<T> {
    pub fn new() -> Self {
        Self {
            delays: HashMap::new(),
            intervals: HashMap::new(),
            seq: 0,
        }
    }

    pub fn register_delay(&mut self, name: impl Into<String>, fire_at: DateTime<Utc>, payload: T) {
        self.seq = self.seq.saturating_add(1);
        let name = name.into();
        if self.delays.contains_key(&name) {
            tracing::trace!(task = %name, "Replacing pending delay task");
        }
        self.delays.insert(
            name,
            DelayTask {
                fire_at,
                seq: self.seq,
                payload,
            },
        );
    }

    pub fn cancel_delay(&mut self, name: &str) -> bool {
        self.delays.remove(name).is_some()
    }

    pub fn has_delay(&self, name: &str) -> bool {
        self.delays.contains_key(name)
    }

    pub fn delay_fire_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.delays.get(name).map(|task| task.fire_at)
    }

    /// Cancels every delay whose name starts with `prefix`.
    pub fn cancel_prefix(&mut self, prefix: &str) -> usize {
        let before = self.delays.len();
        self.delays.retain(|name, _| !name.starts_with(prefix));
        before - self.delays.len()
    }

    pub fn pending_delays(&self) -> usize {
        self.delays.len()
    }

    /// Removes and returns every delay due at `now`, in firing order.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<(String, T)> {
        let due_names: Vec<String> = self
            .delays
            .iter()
            .filter(|(_, task)| task.fire_at <= now)
            .map(|(name, _)| name.clone())
            .collect();

        let mut due: Vec<(String, DelayTask<T>)> = due_names
            .into_iter()
            .filter_map(|name| self.delays.remove(&name).map(|task| (name, task)))
            .collect();
        due.sort_by(|a, b| a.1.fire_at.cmp(&b.1.fire_at).then(a.1.seq.cmp(&b.1.seq)));
        due.into_iter()
            .map(|(name, task)| (name, task.payload))
            .collect()
    }

    /// Earliest pending delay, if any.
    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.delays.values().map(|task| task.fire_at).min()
    }

    pub fn register_interval(&mut self, name: impl Into<String>, every: Duration, now: DateTime<Utc>) {
        self.intervals.insert(
            name.into(),
            IntervalTask {
                every,
                next_at: now + every,
            },
        );
    }

    pub fn cancel_interval(&mut self, name: &str) -> bool {
        self.intervals.remove(name).is_some()
    }

    /// Names of intervals due at `now`. A late tick fires each interval once
    /// and reschedules it from `now`.
    pub fn take_due_intervals(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut fired = Vec::new();
        for (name, task) in self.intervals.iter_mut() {
            if task.next_at <= now {
                fired.push(name.clone());
                task.next_at = now + task.every;
            }
        }
        fired.sort();
        fired
    }
}

impl<T> Default for DelayScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
