// Fixed-rate tick abstraction
//
// The throttler, the simulator and each consumer's display drain all run on
// their own independent periodic tick. None of them depend on a render loop.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Periodic tick source. The first tick fires one period after creation,
/// and ticks missed while the owner was busy are skipped rather than
/// replayed in a burst.
pub struct Ticker {
    interval: Interval,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

/// Run `on_tick` every `period` until `cancel` fires.
pub fn spawn_periodic<F>(period: Duration, cancel: CancellationToken, mut on_tick: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = Ticker::new(period);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = ticker.tick() => on_tick(),
            }
        }
    })
}
