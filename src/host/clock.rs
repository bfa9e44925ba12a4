//! Clock implementations

use chrono::{DateTime, Duration, FixedOffset, Local, Offset, Utc};
use std::cell::Cell;
use std::rc::Rc;

use super::Clock;

/// Wall clock with the machine's local offset
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_offset(&self) -> FixedOffset {
        Local::now().offset().fix()
    }
}

/// Manually advanced clock. Clones share the same instant, so a replay driver
/// can keep one handle while the tracker owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<DateTime<Utc>>>,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
            offset: Utc.fix(),
        }
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn local_offset(&self) -> FixedOffset {
        self.offset
    }
}
