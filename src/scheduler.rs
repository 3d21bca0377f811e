// =============================================================================
// Trade Scheduler (C6)
// =============================================================================
//
// Fires every `cycle_interval` with optional uniform jitter. First cycle runs
// immediately. At most one cycle runs at a time: a cycle overrunning its
// interval delays the next tick rather than queueing a second one. Matches
// the reconnect/retry timer idiom already used by the inherited market-data
// streams (`tokio::select!` between a sleep and a stop signal).
// =============================================================================

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info};

pub struct Scheduler {
    cycle_interval: Duration,
    jitter: Duration,
}

impl Scheduler {
    pub fn new(cycle_interval: Duration, jitter: Duration) -> Self {
        Self {
            cycle_interval,
            jitter,
        }
    }

    fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.cycle_interval;
        }
        let jitter_secs = self.jitter.as_secs_f64();
        let offset = rand::thread_rng().gen_range(-jitter_secs..=jitter_secs);
        let total = (self.cycle_interval.as_secs_f64() + offset).max(0.0);
        Duration::from_secs_f64(total)
    }

    /// Run `cycle` on each tick until `stop` is set. The first cycle fires
    /// immediately; a slow `cycle` delays (never overlaps) the next one.
    pub async fn run<F, Fut>(&self, mut stop: watch::Receiver<bool>, mut cycle: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        info!(interval = ?self.cycle_interval, jitter = ?self.jitter, "scheduler starting");

        if *stop.borrow() {
            return;
        }

        cycle().await;

        loop {
            let delay = self.next_delay();
            debug!(?delay, "scheduler sleeping until next cycle");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => {
                    if *stop.borrow() {
                        info!("scheduler received stop signal, exiting");
                        return;
                    }
                }
            }

            if *stop.borrow() {
                return;
            }

            cycle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_immediately_then_stops_cleanly() {
        let scheduler = Scheduler::new(Duration::from_millis(20), Duration::ZERO);
        let (tx, rx) = watch::channel(false);
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        let handle = tokio::spawn(async move {
            scheduler
                .run(rx, || {
                    let count = count_clone.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await;
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("scheduler did not stop in time")
            .unwrap();
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let scheduler = Scheduler::new(Duration::from_secs(900), Duration::from_secs(180));
        for _ in 0..100 {
            let delay = scheduler.next_delay();
            assert!(delay.as_secs_f64() >= 900.0 - 180.0 - 1.0);
            assert!(delay.as_secs_f64() <= 900.0 + 180.0 + 1.0);
        }
    }

    #[test]
    fn zero_jitter_is_exact_interval() {
        let scheduler = Scheduler::new(Duration::from_secs(60), Duration::ZERO);
        assert_eq!(scheduler.next_delay(), Duration::from_secs(60));
    }
}
