//! Periodic scheduling.
//!
//! A [`PeriodicTask`] runs a job once per [`Ticker`] tick until stopped.
//! Production uses [`IntervalTicker`]; tests drive ticks by hand through
//! [`manual`], where [`ManualTrigger::fire`] resolves once the job it
//! triggered has finished.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// One scheduling event.
#[derive(Debug, Default)]
pub struct Tick {
    ack: Option<oneshot::Sender<()>>,
}

impl Tick {
    /// Signal that the job run for this tick has finished.
    pub fn complete(self) {
        if let Some(ack) = self.ack {
            let _ = ack.send(());
        }
    }
}

#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick. `None` ends the task.
    async fn tick(&mut self) -> Option<Tick>;
}

/// Fixed-period ticker. The first tick is one period after creation.
#[derive(Debug)]
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        // A long cycle should not cause a burst of catch-up cycles.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> Option<Tick> {
        self.interval.tick().await;
        Some(Tick::default())
    }
}

/// A ticker that only ticks when its [`ManualTrigger`] fires.
#[derive(Debug)]
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
}

#[derive(Debug, Clone)]
pub struct ManualTrigger {
    tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

/// Create a connected manual ticker and trigger.
pub fn manual() -> (ManualTicker, ManualTrigger) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ManualTicker { rx }, ManualTrigger { tx })
}

impl ManualTrigger {
    /// Fire one tick and wait for its job to finish.
    ///
    /// Returns `false` if the task is no longer running.
    pub async fn fire(&self) -> bool {
        let (ack, done) = oneshot::channel();
        if self.tx.send(ack).is_err() {
            return false;
        }
        done.await.is_ok()
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> Option<Tick> {
        self.rx.recv().await.map(|ack| Tick { ack: Some(ack) })
    }
}

/// A background job run once per tick.
///
/// Stopping is only observed between jobs, so a running job always
/// finishes. Dropping the task without calling [`stop`](Self::stop) also
/// ends it after the current job.
#[derive(Debug)]
pub struct PeriodicTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<T, F, Fut>(mut ticker: T, run_immediately: bool, mut job: F) -> Self
    where
        T: Ticker + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, mut stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            if run_immediately {
                job().await;
            }

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    tick = ticker.tick() => match tick {
                        Some(tick) => {
                            job().await;
                            tick.complete();
                        }
                        None => break,
                    },
                }
            }
        });

        Self { stop, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop ticking and wait for an in-flight job to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(err) = self.handle.await {
            tracing::error!(error = %err, "Periodic task ended abnormally");
        }
    }
}
