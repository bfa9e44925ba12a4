//! Cooperative task scheduler
//!
//! Timers are data, not threads. The tracker registers periodic and one-shot
//! tasks here and asks which of them are due whenever the host calls
//! `tick`. Nothing runs after `cancel`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::context::Visibility;

/// Work the tracker performs when a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Flush the page, refresh features, classify and emit
    ClassifyEmit,
    /// Refresh behavior features only
    BehaviorRefresh,
    /// Track a page view after an SPA navigation settles
    PageView,
    /// Re-apply content variants once scrolling stops
    ApplyVariants,
}

#[derive(Debug, Clone)]
struct Entry {
    task: Task,
    due: DateTime<Utc>,
    period: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
    hidden: bool,
    cancelled: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` every `period_ms`, first at `now + period`. Replaces an
    /// existing periodic registration of the same task.
    pub fn every(&mut self, task: Task, period_ms: u64, now: DateTime<Utc>) {
        if self.cancelled {
            return;
        }
        let period = millis(period_ms.max(1));
        self.entries
            .retain(|e| !(e.task == task && e.period.is_some()));
        self.entries.push(Entry {
            task,
            due: now + period,
            period: Some(period),
        });
    }

    /// Run `task` once after `delay_ms`. Pending one-shots of the same task are
    /// kept.
    pub fn once(&mut self, task: Task, delay_ms: u64, now: DateTime<Utc>) {
        if self.cancelled {
            return;
        }
        self.entries.push(Entry {
            task,
            due: now + millis(delay_ms),
            period: None,
        });
    }

    /// Run `task` once after `delay_ms`, replacing any pending one-shot of the
    /// same task
    pub fn debounce(&mut self, task: Task, delay_ms: u64, now: DateTime<Utc>) {
        if self.cancelled {
            return;
        }
        self.entries
            .retain(|e| !(e.task == task && e.period.is_none()));
        self.once(task, delay_ms, now);
    }

    /// Tasks due at `now`, earliest first (registration order on ties).
    ///
    /// One-shots are removed. A periodic task fires at most once per call and
    /// is rescheduled to its next deadline after `now`.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<Task> {
        if self.cancelled {
            return Vec::new();
        }

        let mut fired: Vec<(DateTime<Utc>, usize, Task)> = Vec::new();
        for (order, entry) in self.entries.iter_mut().enumerate() {
            if entry.due > now {
                continue;
            }
            fired.push((entry.due, order, entry.task));
            if let Some(period) = entry.period {
                while entry.due <= now {
                    entry.due += period;
                }
            }
        }

        self.entries.retain(|e| e.period.is_some() || e.due > now);
        fired.sort_by_key(|(due, order, _)| (*due, *order));
        fired.into_iter().map(|(_, _, task)| task).collect()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        if self.cancelled {
            return None;
        }
        self.entries.iter().map(|e| e.due).min()
    }

    /// Pending registrations of `task`
    pub fn pending(&self, task: Task) -> usize {
        self.entries.iter().filter(|e| e.task == task).count()
    }

    /// Record a visibility change. Returns `true` exactly once per
    /// visible-to-hidden transition.
    pub fn visibility_changed(&mut self, visibility: Visibility) -> bool {
        let was_hidden = self.hidden;
        self.hidden = visibility == Visibility::Hidden;
        !self.cancelled && self.hidden && !was_hidden
    }

    /// Drop every timer; later registrations are ignored
    pub fn cancel(&mut self) {
        self.entries.clear();
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(ms.min(u64::from(u32::MAX)) as i64)
}
