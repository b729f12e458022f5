use chrono::{DateTime, Duration, Utc};

/// Tracks when a periodic task last ran. An interval that never ran is due.
#[derive(Clone, Debug)]
pub struct Interval {
    period: Duration,
    last: Option<DateTime<Utc>>,
}

impl Interval {
    pub fn new(period: Duration) -> Self {
        Interval { period, last: None }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.last.map_or(true, |last| last + self.period <= now)
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.last
    }

    pub fn mark(&mut self, at: DateTime<Utc>) {
        self.last = Some(at);
    }
}
