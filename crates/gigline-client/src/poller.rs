use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior, interval_at, Instant};

/// History poll timer that only runs while a room socket is degraded.
///
/// [`tick`](Self::tick) pends forever while inactive, so it can sit in a
/// `select!` arm unconditionally.
#[derive(Debug)]
pub struct FallbackPoller {
    period: Duration,
    interval: Option<Interval>,
}

impl FallbackPoller {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Start polling. A poller that is already running keeps its schedule.
    pub fn activate(&mut self) {
        if self.interval.is_some() {
            return;
        }
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    pub fn deactivate(&mut self) {
        self.interval = None;
    }

    pub fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}
