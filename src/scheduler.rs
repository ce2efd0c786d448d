use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

use crate::aggregator::Aggregator;

/// Repeating refresh timer. At most one timer task exists at a time.
pub struct RefreshScheduler {
    period: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            timer: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run `job` every period, first one period from now. Replaces any
    /// timer that is already running. Each run is its own task, so stopping
    /// the timer never cancels a run in progress.
    pub fn enable<F, Fut>(&self, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = self.period;
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                info!("Starting scheduled feed refresh");
                tokio::spawn(job());
            }
        }));
        info!("Auto-refresh enabled every {}s", period.as_secs());
    }

    /// Schedule `aggregator.refresh_news()`.
    pub fn enable_for(&self, aggregator: Arc<Aggregator>) {
        self.enable(move || {
            let aggregator = aggregator.clone();
            async move {
                aggregator.refresh_news().await;
            }
        });
    }

    pub fn disable(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timer.take() {
            previous.abort();
            info!("Auto-refresh disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.disable();
    }
}
