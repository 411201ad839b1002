//! User-facing display projection and its deferred-visibility policies.
//!
//! A [`PaneDisplay`] turns state-machine changes into [`DisplayState`]
//! updates. Three policies sit between the two:
//!
//! - **Delayed display**: DONE/FAILED → IDLE is held back so the finished
//!   state stays visible for a moment.
//! - **Auto-dismiss**: DONE/FAILED reverts to IDLE on its own after a dwell,
//!   leaving a short `recently_finished` hint that is cleared later.
//! - **Quiet completion**: a finish below a duration threshold is flagged so
//!   the UI need not draw attention to it.
//!
//! Each pending task remembers the `state_id` it was scheduled for and
//! re-validates it when it fires. Any new change for the pane cancels them.

use chrono::{DateTime, Utc};

use crate::clock::duration_from_secs_f64;
use crate::config::TimingConfig;
use crate::timer::DelayScheduler;
use crate::types::{DisplayNotification, DisplayState, StateChange, TaskStatus};

/// Payload of a delayed display task.
#[derive(Debug, Clone, PartialEq)]
pub enum DelayedAction {
    RevealDisplay { pane_id: String, change: StateChange },
    AutoDismiss { pane_id: String, state_id: u64 },
    ClearRecentlyFinished { pane_id: String, state_id: u64 },
}

impl DelayedAction {
    pub fn pane_id(&self) -> &str {
        match self {
            DelayedAction::RevealDisplay { pane_id, .. }
            | DelayedAction::AutoDismiss { pane_id, .. }
            | DelayedAction::ClearRecentlyFinished { pane_id, .. } => pane_id,
        }
    }
}

pub fn reveal_task_name(pane_id: &str) -> String {
    format!("display:{}", pane_id)
}

pub fn dismiss_task_name(pane_id: &str) -> String {
    format!("dismiss:{}", pane_id)
}

pub fn hint_task_name(pane_id: &str) -> String {
    format!("hint:{}", pane_id)
}

/// Cancels every pending display task for a pane.
pub fn cancel_pane_tasks(scheduler: &mut DelayScheduler<DelayedAction>, pane_id: &str) {
    scheduler.cancel_delay(&reveal_task_name(pane_id));
    scheduler.cancel_delay(&dismiss_task_name(pane_id));
    scheduler.cancel_delay(&hint_task_name(pane_id));
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayPolicy {
    pub display_delay_secs: f64,
    pub notification_min_duration_secs: f64,
    pub quiet_completion_threshold_secs: f64,
    pub auto_dismiss_dwell_secs: f64,
    pub recently_finished_hint_secs: f64,
}

impl DisplayPolicy {
    pub fn from_config(config: &TimingConfig) -> Self {
        Self {
            display_delay_secs: config.display_delay_secs,
            notification_min_duration_secs: config.notification_min_duration_secs,
            quiet_completion_threshold_secs: config.quiet_completion_threshold_secs,
            auto_dismiss_dwell_secs: config.auto_dismiss_dwell_secs,
            recently_finished_hint_secs: config.recently_finished_hint_secs,
        }
    }

    /// Whether a visible change should stay silent, and why.
    pub fn suppression(&self, status: TaskStatus, running_duration: f64, focused: bool) -> (bool, String) {
        if !status.is_finished() {
            return (false, String::new());
        }
        if running_duration < self.notification_min_duration_secs {
            return (true, format!("duration={:.1}s", running_duration));
        }
        if focused {
            return (true, "focused".to_string());
        }
        (false, String::new())
    }
}

impl Default for DisplayPolicy {
    fn default() -> Self {
        Self::from_config(&TimingConfig::default())
    }
}

/// What applying a change did to the display.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayUpdate {
    Shown(DisplayNotification),
    /// Held back behind a delayed reveal.
    Deferred,
    /// Older than what is already displayed.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaneDisplay {
    pane_id: String,
    state: DisplayState,
}

impl PaneDisplay {
    pub fn new(pane_id: impl Into<String>) -> Self {
        Self {
            pane_id: pane_id.into(),
            state: DisplayState::default(),
        }
    }

    pub fn from_state(pane_id: impl Into<String>, state: DisplayState) -> Self {
        Self {
            pane_id: pane_id.into(),
            state,
        }
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    pub fn set_content_hash(&mut self, content_hash: &str) {
        self.state.content_hash = content_hash.to_string();
    }

    pub fn apply_change(
        &mut self,
        change: &StateChange,
        focused: bool,
        now: DateTime<Utc>,
        policy: &DisplayPolicy,
        scheduler: &mut DelayScheduler<DelayedAction>,
    ) -> DisplayUpdate {
        if change.state_id <= self.state.state_id {
            tracing::debug!(
                pane_id = %self.pane_id,
                state_id = change.state_id,
                displayed_state_id = self.state.state_id,
                "Ignored out-of-order display update"
            );
            return DisplayUpdate::Stale;
        }

        cancel_pane_tasks(scheduler, &self.pane_id);

        if change.old_status.is_finished()
            && change.new_status == TaskStatus::Idle
            && self.state.status.is_finished()
        {
            let fire_at = now + duration_from_secs_f64(policy.display_delay_secs);
            scheduler.register_delay(
                reveal_task_name(&self.pane_id),
                fire_at,
                DelayedAction::RevealDisplay {
                    pane_id: self.pane_id.clone(),
                    change: change.clone(),
                },
            );
            tracing::debug!(
                pane_id = %self.pane_id,
                state_id = change.state_id,
                delay_secs = policy.display_delay_secs,
                "Deferred finished to idle display"
            );
            return DisplayUpdate::Deferred;
        }

        DisplayUpdate::Shown(self.show(change, focused, now, policy, scheduler))
    }

    /// Fires a deferred reveal. Skipped when something newer is displayed.
    pub fn reveal(
        &mut self,
        change: &StateChange,
        focused: bool,
        now: DateTime<Utc>,
        policy: &DisplayPolicy,
        scheduler: &mut DelayScheduler<DelayedAction>,
    ) -> Option<DisplayNotification> {
        if self.state.state_id >= change.state_id {
            return None;
        }
        Some(self.show(change, focused, now, policy, scheduler))
    }

    /// Reverts a finished display to IDLE if it is still showing `state_id`.
    pub fn auto_dismiss(
        &mut self,
        state_id: u64,
        now: DateTime<Utc>,
        policy: &DisplayPolicy,
        scheduler: &mut DelayScheduler<DelayedAction>,
    ) -> Option<DisplayNotification> {
        if self.state.state_id != state_id || !self.state.status.is_finished() {
            return None;
        }
        self.state.status = TaskStatus::Idle;
        self.state.description = String::new();
        self.state.recently_finished = true;
        self.state.quiet_completion = false;

        scheduler.register_delay(
            hint_task_name(&self.pane_id),
            now + duration_from_secs_f64(policy.recently_finished_hint_secs),
            DelayedAction::ClearRecentlyFinished {
                pane_id: self.pane_id.clone(),
                state_id,
            },
        );
        tracing::debug!(pane_id = %self.pane_id, state_id, "Auto-dismissed finished display");
        Some(self.notification(true, "auto_dismiss"))
    }

    pub fn clear_recently_finished(&mut self, state_id: u64) -> Option<DisplayNotification> {
        if self.state.state_id != state_id || !self.state.recently_finished {
            return None;
        }
        self.state.recently_finished = false;
        Some(self.notification(true, "hint_cleared"))
    }

    fn show(
        &mut self,
        change: &StateChange,
        focused: bool,
        now: DateTime<Utc>,
        policy: &DisplayPolicy,
        scheduler: &mut DelayScheduler<DelayedAction>,
    ) -> DisplayNotification {
        let finished = change.new_status.is_finished();
        self.state = DisplayState {
            status: change.new_status,
            source: change.new_source.clone(),
            description: change.description.clone(),
            state_id: change.state_id,
            started_at: change.started_at,
            running_duration: change.running_duration,
            content_hash: std::mem::take(&mut self.state.content_hash),
            recently_finished: false,
            quiet_completion: finished
                && change.running_duration < policy.quiet_completion_threshold_secs,
        };

        if finished {
            scheduler.register_delay(
                dismiss_task_name(&self.pane_id),
                now + duration_from_secs_f64(policy.auto_dismiss_dwell_secs),
                DelayedAction::AutoDismiss {
                    pane_id: self.pane_id.clone(),
                    state_id: change.state_id,
                },
            );
        }

        let (suppressed, reason) = policy.suppression(change.new_status, change.running_duration, focused);
        tracing::debug!(
            pane_id = %self.pane_id,
            status = %self.state.status,
            state_id = self.state.state_id,
            suppressed,
            reason = %reason,
            quiet = self.state.quiet_completion,
            "Display updated"
        );
        self.notification(suppressed, &reason)
    }

    fn notification(&self, suppressed: bool, reason: &str) -> DisplayNotification {
        DisplayNotification {
            pane_id: self.pane_id.clone(),
            state: self.state.clone(),
            suppressed,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-01T09:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn change(old: TaskStatus, new: TaskStatus, state_id: u64, duration: f64) -> StateChange {
        StateChange {
            pane_id: "%1".to_string(),
            signal: "test.signal".to_string(),
            old_status: old,
            new_status: new,
            old_source: "shell".to_string(),
            new_source: "shell".to_string(),
            description: String::new(),
            state_id,
            started_at: Some(t0()),
            running_duration: duration,
            timestamp: t0(),
        }
    }

    fn shown(update: DisplayUpdate) -> DisplayNotification {
        match update {
            DisplayUpdate::Shown(notification) => notification,
            other => panic!("expected shown update, got {:?}", other),
        }
    }

    #[test]
    fn short_finish_is_suppressed_by_duration() {
        let mut display = PaneDisplay::new("%1");
        let mut scheduler = DelayScheduler::new();
        let policy = DisplayPolicy::default();
        let note = shown(display.apply_change(
            &change(TaskStatus::Running, TaskStatus::Done, 5, 1.0),
            false,
            t0(),
            &policy,
            &mut scheduler,
        ));
        assert!(note.suppressed);
        assert!(note.reason.contains("duration"));
        assert!(note.state.quiet_completion);
    }

    #[test]
    fn long_finish_is_suppressed_only_when_focused() {
        let policy = DisplayPolicy::default();

        let mut focused = PaneDisplay::new("%1");
        let note = shown(focused.apply_change(
            &change(TaskStatus::Running, TaskStatus::Done, 5, 10.0),
            true,
            t0(),
            &policy,
            &mut DelayScheduler::new(),
        ));
        assert!(note.suppressed);
        assert_eq!(note.reason, "focused");

        let mut unfocused = PaneDisplay::new("%1");
        let note = shown(unfocused.apply_change(
            &change(TaskStatus::Running, TaskStatus::Done, 5, 10.0),
            false,
            t0(),
            &policy,
            &mut DelayScheduler::new(),
        ));
        assert!(!note.suppressed);
        assert!(!note.state.quiet_completion);
    }

    #[test]
    fn older_state_id_is_rejected() {
        let policy = DisplayPolicy::default();
        let mut scheduler = DelayScheduler::new();
        let mut display = PaneDisplay::new("%1");
        display.apply_change(
            &change(TaskStatus::Idle, TaskStatus::Running, 7, 0.0),
            false,
            t0(),
            &policy,
            &mut scheduler,
        );
        let update = display.apply_change(
            &change(TaskStatus::Idle, TaskStatus::Done, 6, 0.0),
            false,
            t0(),
            &policy,
            &mut scheduler,
        );
        assert_eq!(update, DisplayUpdate::Stale);
        assert_eq!(display.state().status, TaskStatus::Running);
    }

    #[test]
    fn finished_to_idle_is_deferred_then_revealed() {
        let policy = DisplayPolicy::default();
        let mut scheduler = DelayScheduler::new();
        let mut display = PaneDisplay::new("%1");
        display.apply_change(
            &change(TaskStatus::Running, TaskStatus::Done, 5, 10.0),
            false,
            t0(),
            &policy,
            &mut scheduler,
        );

        let idle = change(TaskStatus::Done, TaskStatus::Idle, 6, 0.0);
        assert_eq!(
            display.apply_change(&idle, false, t0(), &policy, &mut scheduler),
            DisplayUpdate::Deferred
        );
        assert_eq!(display.state().status, TaskStatus::Done);
        assert!(!scheduler.has_delay(&dismiss_task_name("%1")));

        let due = scheduler.take_due(t0() + Duration::seconds(5));
        assert_eq!(due.len(), 1);
        match &due[0].1 {
            DelayedAction::RevealDisplay { change, .. } => {
                let note = display
                    .reveal(change, false, t0(), &policy, &mut scheduler)
                    .expect("reveal");
                assert_eq!(note.state.status, TaskStatus::Idle);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn newer_change_cancels_deferred_reveal() {
        let policy = DisplayPolicy::default();
        let mut scheduler = DelayScheduler::new();
        let mut display = PaneDisplay::new("%1");
        display.apply_change(
            &change(TaskStatus::Running, TaskStatus::Done, 5, 10.0),
            false,
            t0(),
            &policy,
            &mut scheduler,
        );
        display.apply_change(
            &change(TaskStatus::Done, TaskStatus::Idle, 6, 0.0),
            false,
            t0(),
            &policy,
            &mut scheduler,
        );
        shown(display.apply_change(
            &change(TaskStatus::Idle, TaskStatus::Running, 7, 0.0),
            false,
            t0(),
            &policy,
            &mut scheduler,
        ));
        assert!(!scheduler.has_delay(&reveal_task_name("%1")));
        assert_eq!(display.state().state_id, 7);
    }

    #[test]
    fn auto_dismiss_sets_hint_then_clears_it() {
        let policy = DisplayPolicy::default();
        let mut scheduler = DelayScheduler::new();
        let mut display = PaneDisplay::new("%1");
        display.apply_change(
            &change(TaskStatus::Running, TaskStatus::Failed, 5, 10.0),
            false,
            t0(),
            &policy,
            &mut scheduler,
        );
        assert_eq!(
            scheduler.delay_fire_at(&dismiss_task_name("%1")),
            Some(t0() + Duration::seconds(60))
        );

        let note = display
            .auto_dismiss(5, t0() + Duration::seconds(60), &policy, &mut scheduler)
            .expect("dismissed");
        assert_eq!(note.state.status, TaskStatus::Idle);
        assert!(note.state.recently_finished);
        assert!(scheduler.has_delay(&hint_task_name("%1")));

        assert!(display.auto_dismiss(5, t0(), &policy, &mut scheduler).is_none());
        let cleared = display.clear_recently_finished(5).expect("cleared");
        assert!(!cleared.state.recently_finished);
    }

    #[test]
    fn auto_dismiss_ignores_superseded_state() {
        let policy = DisplayPolicy::default();
        let mut scheduler = DelayScheduler::new();
        let mut display = PaneDisplay::new("%1");
        display.apply_change(
            &change(TaskStatus::Running, TaskStatus::Done, 5, 10.0),
            false,
            t0(),
            &policy,
            &mut scheduler,
        );
        display.apply_change(
            &change(TaskStatus::Done, TaskStatus::Running, 8, 0.0),
            false,
            t0(),
            &policy,
            &mut scheduler,
        );
        assert!(display.auto_dismiss(5, t0(), &policy, &mut scheduler).is_none());
        assert_eq!(display.state().status, TaskStatus::Running);
    }
}
