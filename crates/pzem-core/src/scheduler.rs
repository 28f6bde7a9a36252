use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::link::{BrokerSession, ConnectionManager, TransportLink};
use crate::report::{Report, ReportContext};
use crate::sample::{Sample, SampleSource};
use crate::stats::{AggregationWindow, Quantity};

pub trait Clock: Send {
    /// Monotonic milliseconds since start.
    fn now_ms(&self) -> u64;
}

pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    interval_ms: u64,
    last_fire_ms: u64,
    forced: bool,
}

impl Timer {
    pub fn new(interval: Duration, armed_at_ms: u64) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_fire_ms: armed_at_ms,
            forced: false,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.forced || now_ms.saturating_sub(self.last_fire_ms) >= self.interval_ms
    }

    pub fn fire(&mut self, now_ms: u64) {
        self.last_fire_ms = now_ms;
        self.forced = false;
    }

    /// Makes the timer due on the next check regardless of elapsed time.
    pub fn force_due(&mut self) {
        self.forced = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent { bytes: usize, reduced: bool },
    Failed,
    EncodeFailed,
}

/// What one pass of the loop did. `None` means the step was not due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Iteration {
    pub reassociated: bool,
    pub sampled: Option<bool>,
    pub published: Option<PublishOutcome>,
    pub reconnected: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopCounters {
    pub samples_ok: u64,
    pub samples_failed: u64,
    pub reports_sent: u64,
    pub reports_failed: u64,
}

pub struct Scheduler<S, T, B, C>
where
    S: SampleSource,
    T: TransportLink,
    B: BrokerSession,
    C: Clock,
{
    source: S,
    links: ConnectionManager<T, B>,
    clock: C,
    config: SchedulerConfig,
    window: AggregationWindow,
    last_sample: Option<Sample>,
    sample_timer: Timer,
    publish_timer: Timer,
    reconnect_timer: Timer,
    counters: LoopCounters,
}

impl<S, T, B, C> Scheduler<S, T, B, C>
where
    S: SampleSource,
    T: TransportLink,
    B: BrokerSession,
    C: Clock,
{
    pub fn new(source: S, links: ConnectionManager<T, B>, clock: C, config: SchedulerConfig) -> Self {
        let now = clock.now_ms();
        Self {
            source,
            links,
            clock,
            sample_timer: Timer::new(config.sample_interval, now),
            publish_timer: Timer::new(config.publish_interval, now),
            reconnect_timer: Timer::new(config.reconnect_interval, now),
            config,
            window: AggregationWindow::new(),
            last_sample: None,
            counters: LoopCounters::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn window(&self) -> &AggregationWindow {
        &self.window
    }

    pub fn last_sample(&self) -> Option<&Sample> {
        self.last_sample.as_ref()
    }

    pub fn counters(&self) -> LoopCounters {
        self.counters
    }

    pub fn links(&self) -> &ConnectionManager<T, B> {
        &self.links
    }

    /// Brings both links up once and arms every timer at the current time.
    pub async fn start(&mut self) {
        self.links.ensure_connected().await;
        self.links.try_connect().await;

        let now = self.clock.now_ms();
        self.sample_timer.fire(now);
        self.publish_timer.fire(now);
        self.reconnect_timer.fire(now);
        info!(
            sample_ms = self.config.sample_interval.as_millis() as u64,
            publish_ms = self.config.publish_interval.as_millis() as u64,
            reconnect_ms = self.config.reconnect_interval.as_millis() as u64,
            "scheduler started"
        );
    }

    pub async fn iterate(&mut self) -> Iteration {
        let mut iteration = Iteration::default();

        if !self.links.transport_up() {
            iteration.reassociated = true;
            self.links.ensure_connected().await;
        }

        self.links.pump().await;

        let now = self.clock.now_ms();
        iteration.sampled = self.sample_step(now).await;
        iteration.published = self.publish_step(now);
        iteration.reconnected = self.reconnect_step(now).await;
        iteration
    }

    async fn sample_step(&mut self, now: u64) -> Option<bool> {
        if !self.sample_timer.is_due(now) {
            return None;
        }
        self.sample_timer.fire(now);

        match self.source.read().await {
            Ok(reading) => {
                let sample = Sample::new(reading, now);
                self.window.add_sample(&sample);
                self.last_sample = Some(sample);
                self.counters.samples_ok += 1;
                debug!(
                    address = reading.address,
                    voltage = reading.voltage,
                    current = reading.current,
                    power = reading.active_power,
                    samples = self.window.sample_count(),
                    expected = self.expected_samples(),
                    "sample"
                );
                Some(true)
            }
            Err(err) => {
                self.counters.samples_failed += 1;
                warn!(error = %err, "failed to read meter");
                Some(false)
            }
        }
    }

    fn publish_step(&mut self, now: u64) -> Option<PublishOutcome> {
        if !self.publish_timer.is_due(now) || self.window.is_empty() {
            return None;
        }

        let outcome = self.publish_window(now);
        if matches!(outcome, PublishOutcome::Failed) && !self.links.session_up() {
            self.reconnect_timer.force_due();
        }

        self.window.reset();
        self.publish_timer.fire(now);
        debug!("window reset");
        Some(outcome)
    }

    fn publish_window(&mut self, now: u64) -> PublishOutcome {
        let ctx = ReportContext {
            address: self.source.address(),
            now_ms: now,
            link_signal_strength: self.links.signal_strength(),
            interval_minutes: self.config.interval_minutes(),
        };
        let Some(report) = Report::build(&self.window, self.last_sample.as_ref(), &ctx) else {
            return PublishOutcome::EncodeFailed;
        };

        let encoded = match report.encode(self.config.max_report_bytes) {
            Ok(encoded) => encoded,
            Err(err) => {
                self.counters.reports_failed += 1;
                error!(error = %err, "failed to encode report");
                return PublishOutcome::EncodeFailed;
            }
        };
        if encoded.reduced {
            warn!(limit = self.config.max_report_bytes, "report too large, sending reduced record");
        }

        let bytes = encoded.payload.len();
        let topic = self.config.report_topic.clone();
        if !self.links.publish(&topic, encoded.payload) {
            self.counters.reports_failed += 1;
            warn!(
                samples = report.sample_count,
                state = ?self.links.state(),
                "failed to publish window summary, dropping window"
            );
            return PublishOutcome::Failed;
        }

        self.counters.reports_sent += 1;
        info!(
            topic = %topic,
            samples = report.sample_count,
            avg_power = self.window.mean(Quantity::Power).unwrap_or_default(),
            bytes,
            reduced = encoded.reduced,
            counters = ?self.counters,
            links = ?self.links.counters(),
            "window summary published"
        );
        PublishOutcome::Sent {
            bytes,
            reduced: encoded.reduced,
        }
    }

    async fn reconnect_step(&mut self, now: u64) -> Option<bool> {
        if self.links.session_up() || !self.reconnect_timer.is_due(now) {
            return None;
        }
        self.reconnect_timer.fire(now);
        Some(self.links.try_connect().await)
    }

    fn expected_samples(&self) -> u128 {
        let sample_ms = self.config.sample_interval.as_millis().max(1);
        self.config.publish_interval.as_millis() / sample_ms
    }
}
