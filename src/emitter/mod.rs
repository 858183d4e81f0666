//! Background telemetry emission.
//!
//! # Data Flow
//! ```text
//! interval tick
//!     → SampleSource::next_sample (may produce nothing)
//!     → MetricsSink::record (fire-and-forget)
//! cancellation token
//!     → loop exits at the next scheduling point
//! ```
//!
//! # Design Decisions
//! - Cancellation is checked before every emission, never after
//! - A tick that fails to produce a sample is dropped, not retried
//! - Missed ticks are delayed, not bursted

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::EmitterConfig;
use crate::observability::metrics::{MetricSample, MetricsSink, ACTIVE_USERS};

/// Producer of one sample per tick.
pub trait SampleSource: Send + 'static {
    /// `None` means this tick produced nothing.
    fn next_sample(&mut self) -> Option<MetricSample>;
}

impl<F> SampleSource for F
where
    F: FnMut() -> Option<MetricSample> + Send + 'static,
{
    fn next_sample(&mut self) -> Option<MetricSample> {
        self()
    }
}

/// Simulated active users: adds a random increment to a labelled gauge.
#[derive(Debug, Clone)]
pub struct ActiveUsersSource {
    country_id: String,
    city_id: String,
    max_increment: u32,
}

impl ActiveUsersSource {
    pub fn from_config(config: &EmitterConfig) -> Self {
        Self {
            country_id: config.country_id.clone(),
            city_id: config.city_id.clone(),
            max_increment: config.max_increment,
        }
    }
}

impl SampleSource for ActiveUsersSource {
    fn next_sample(&mut self) -> Option<MetricSample> {
        if self.max_increment == 0 {
            return None;
        }
        let increment = rand::thread_rng().gen_range(0..self.max_increment);
        Some(
            MetricSample::gauge_add(ACTIVE_USERS, f64::from(increment))
                .with_label("country_id", self.country_id.clone())
                .with_label("city_id", self.city_id.clone()),
        )
    }
}

/// Periodic, cancellable sample producer.
pub struct TelemetryEmitter<S> {
    interval: Duration,
    source: S,
    sink: Arc<dyn MetricsSink>,
}

impl<S: SampleSource> TelemetryEmitter<S> {
    pub fn new(interval: Duration, source: S, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            interval,
            source,
            sink,
        }
    }

    /// Spawn the emission loop. It runs until `token` is cancelled.
    pub fn start(self, token: CancellationToken) -> EmitterHandle {
        let emitted = Arc::new(AtomicU64::new(0));
        let join = tokio::spawn(self.run(token, Arc::clone(&emitted)));
        EmitterHandle { join, emitted }
    }

    async fn run(mut self, token: CancellationToken, emitted: Arc<AtomicU64>) {
        tracing::info!(interval = ?self.interval, "Telemetry emitter starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if token.is_cancelled() {
                        break;
                    }
                    match self.source.next_sample() {
                        Some(sample) => {
                            self.sink.record(&sample);
                            emitted.fetch_add(1, Ordering::Relaxed);
                        }
                        None => tracing::trace!("Emitter tick produced no sample"),
                    }
                }
            }
        }

        tracing::info!(
            emitted = emitted.load(Ordering::Relaxed),
            "Telemetry emitter stopped"
        );
    }
}

/// Handle to a running emitter.
#[derive(Debug)]
pub struct EmitterHandle {
    join: JoinHandle<()>,
    emitted: Arc<AtomicU64>,
}

impl EmitterHandle {
    /// Samples emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to exit and return the total emitted.
    pub async fn join(self) -> u64 {
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "Telemetry emitter task failed");
        }
        self.emitted.load(Ordering::Relaxed)
    }
}
