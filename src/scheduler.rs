//! Sampling loops, aggregation cadence and shutdown.
//!
//! Blocking sensor I/O runs on two dedicated threads (inertial, GPS). The
//! inertial thread runs collision detection inline and hands every tick to
//! the async control loop over a bounded channel with `try_send`, so a slow
//! consumer costs dropped messages, never a late poll. The control loop owns
//! the aggregation window, counts ticks for the summary and position
//! cadences, and fires publishes as detached tasks.

use crossbeam::channel::{self as cb, RecvTimeoutError};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use crate::aggregator::SampleAggregator;
use crate::collision::{CollisionDetector, CrashEvent};
use crate::config::TelemetryConfig;
use crate::error::PublishError;
use crate::health::{StreamHealth, Transition};
use crate::position::{Ingest, PositionProvider};
use crate::publisher::Publisher;
use crate::reader::SampleReader;
use crate::sample::Sample;
use crate::sensors::{InertialSource, NmeaSource, SwitchInput};
use crate::status::TelemetryCounters;
use crate::travel::{IdentityResolver, TravelGate};

/// The hardware (or simulated) sources the scheduler takes ownership of
pub struct SensorSet {
    pub inertial: Box<dyn InertialSource>,
    pub vibration: Box<dyn SwitchInput>,
    pub shock: Box<dyn SwitchInput>,
    pub gps: Box<dyn NmeaSource>,
}

#[derive(Debug)]
enum SamplerMessage {
    /// One inertial poll tick; `None` when the poll failed
    Tick(Option<Sample>),
    Crash(CrashEvent),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that did not stop within the timeout and were detached
    pub abandoned_workers: Vec<&'static str>,
    /// False if the control loop had to be aborted
    pub control_loop_completed: bool,
}

pub struct TelemetryScheduler {
    config: TelemetryConfig,
    publisher: Arc<dyn Publisher>,
    gate: Arc<dyn TravelGate>,
    identity: Arc<dyn IdentityResolver>,
}

impl TelemetryScheduler {
    pub fn new(
        config: TelemetryConfig,
        publisher: Arc<dyn Publisher>,
        gate: Arc<dyn TravelGate>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            config,
            publisher,
            gate,
            identity,
        }
    }

    /// Spawn the sampling threads and the control loop. Must be called from
    /// within a Tokio runtime.
    pub fn start(self, sensors: SensorSet) -> std::io::Result<SchedulerHandle> {
        let config = self.config;
        let counters = Arc::new(TelemetryCounters::new());
        let position = PositionProvider::new(config.fix_loss_policy);
        let (tx, rx) = mpsc::channel(config.channel_capacity);

        let reader = SampleReader::new(sensors.inertial, sensors.vibration, sensors.shock, &config);
        let detector = CollisionDetector::new(&config);
        let inertial = Worker::spawn("inertial", {
            let position = position.clone();
            let counters = counters.clone();
            let interval = config.inertial_interval();
            move |stop| inertial_loop(reader, detector, position, tx, stop, interval, counters)
        })?;

        let gps = Worker::spawn("gps", {
            let position = position.clone();
            let counters = counters.clone();
            let source = sensors.gps;
            let interval = config.gps_interval();
            let silence = config.gps_silence_timeout();
            move |stop| gps_loop(source, position, stop, interval, silence, counters)
        })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let control = ControlLoop {
            aggregator: SampleAggregator::new(config.vibration_mode),
            publisher: self.publisher,
            gate: self.gate.clone(),
            identity: self.identity,
            position: position.clone(),
            counters: counters.clone(),
            summary_every: config.summary_every_ticks.max(1),
            position_every: config.position_every_ticks.max(1),
            shutdown_timeout: config.shutdown_timeout(),
            status_path: config.status_path.clone(),
            ticks: 0,
            trip_active: false,
        };
        let control = tokio::spawn(control.run(rx, stop_rx));

        log::info!(
            "[scheduler] started (inertial every {:?}, gps every {:?}, summary every {} ticks)",
            config.inertial_interval(),
            config.gps_interval(),
            config.summary_every_ticks
        );

        Ok(SchedulerHandle {
            workers: vec![inertial, gps],
            control: Some((stop_tx, control)),
            gate: self.gate,
            counters,
            position,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }
}

/// A running scheduler. Dropping it stops the loops without waiting.
pub struct SchedulerHandle {
    workers: Vec<Worker>,
    control: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
    gate: Arc<dyn TravelGate>,
    counters: Arc<TelemetryCounters>,
    position: PositionProvider,
    shutdown_timeout: Duration,
}

impl SchedulerHandle {
    pub fn position(&self) -> &PositionProvider {
        &self.position
    }

    pub fn counters(&self) -> &TelemetryCounters {
        &self.counters
    }

    pub fn status(&self) -> crate::status::LiveStatus {
        self.counters
            .snapshot(&self.position.get_current_position(), self.gate.is_trip_active())
    }

    pub fn is_running(&self) -> bool {
        self.control.is_some()
    }

    /// Stop the workers, flush the partial window and close the publisher.
    ///
    /// Every wait is bounded by the shutdown timeout; a worker stuck in a
    /// blocking read is detached and left behind. Returns `None` if the
    /// scheduler was already stopped.
    pub async fn shutdown(&mut self) -> Option<ShutdownReport> {
        let (stop_control, mut control) = self.control.take()?;
        log::info!("[scheduler] shutting down");

        let mut report = ShutdownReport::default();
        for worker in std::mem::take(&mut self.workers) {
            let name = worker.name;
            if !worker.stop(self.shutdown_timeout).await {
                log::warn!(
                    "[scheduler] {} worker did not stop within {:?}, abandoning it",
                    name,
                    self.shutdown_timeout
                );
                report.abandoned_workers.push(name);
            }
        }

        // Workers are gone; the control loop drains what they queued,
        // flushes, waits for in-flight publishes and closes the transport.
        let _ = stop_control.send(());
        let budget = self.shutdown_timeout * 2;
        match tokio::time::timeout(budget, &mut control).await {
            Ok(Ok(())) => report.control_loop_completed = true,
            Ok(Err(e)) => log::error!("[scheduler] control loop failed: {}", e),
            Err(_) => {
                log::warn!("[scheduler] control loop did not finish within {:?}, aborting", budget);
                control.abort();
            }
        }

        log::info!("[scheduler] stopped");
        Some(report)
    }
}

// ─── Worker threads ──────────────────────────────────────────────────────────

struct Worker {
    name: &'static str,
    /// Dropping the sender disconnects the worker's stop channel
    stop: Option<cb::Sender<()>>,
    done: oneshot::Receiver<()>,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn spawn<F>(name: &'static str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(cb::Receiver<()>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = cb::bounded(1);
        let (done_tx, done_rx) = oneshot::channel();
        let thread = thread::Builder::new()
            .name(format!("{}-sampler", name))
            .spawn(move || {
                body(stop_rx);
                let _ = done_tx.send(());
            })?;
        Ok(Self {
            name,
            stop: Some(stop_tx),
            done: done_rx,
            thread,
        })
    }

    /// True if the worker exited within `timeout`.
    async fn stop(mut self, timeout: Duration) -> bool {
        drop(self.stop.take());
        // A panicked worker drops its sender, which also ends the wait
        if tokio::time::timeout(timeout, &mut self.done).await.is_err() {
            return false;
        }
        let thread = self.thread;
        let name = self.name;
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            _ => log::error!("[scheduler] {} worker panicked", name),
        }
        true
    }
}

/// Sleep until the next tick. False once the stop channel fires or disconnects.
fn wait_for_next_tick(stop: &cb::Receiver<()>, started: Instant, interval: Duration) -> bool {
    let wait = interval.saturating_sub(started.elapsed());
    matches!(stop.recv_timeout(wait), Err(RecvTimeoutError::Timeout))
}

fn inertial_loop(
    mut reader: SampleReader,
    mut detector: CollisionDetector,
    position: PositionProvider,
    tx: mpsc::Sender<SamplerMessage>,
    stop: cb::Receiver<()>,
    interval: Duration,
    counters: Arc<TelemetryCounters>,
) {
    reader.initialize();
    let mut health = StreamHealth::new("inertial");

    loop {
        let started = Instant::now();

        let sample = match reader.poll() {
            Ok(sample) => {
                if let Some(Transition::Recovered { .. }) = health.record_success() {
                    counters.inertial_healthy.store(true, std::sync::atomic::Ordering::Relaxed);
                }
                TelemetryCounters::incr(&counters.samples);
                Some(sample)
            }
            Err(e) => {
                TelemetryCounters::incr(&counters.failed_polls);
                if let Some(Transition::BecameUnavailable) = health.record_failure(&e) {
                    counters.inertial_healthy.store(false, std::sync::atomic::Ordering::Relaxed);
                }
                None
            }
        };

        // Detection sees the sample before the aggregator does
        if let Some(sample) = &sample {
            if let Some(event) = detector.inspect(sample, &position.get_current_position()) {
                log::info!(
                    "[inertial] crash detected: {:.2} g ({:?}) at {}",
                    event.impact_force,
                    event.source,
                    event.coordinates
                );
                TelemetryCounters::incr(&counters.crashes_detected);
                if !forward(&tx, SamplerMessage::Crash(event), &counters) {
                    break;
                }
            }
        }

        if !forward(&tx, SamplerMessage::Tick(sample), &counters) {
            break;
        }

        if !wait_for_next_tick(&stop, started, interval) {
            break;
        }
    }
    log::debug!("[inertial] sampler exiting");
}

/// Non-blocking handoff. False once the control loop has gone away.
fn forward(
    tx: &mpsc::Sender<SamplerMessage>,
    message: SamplerMessage,
    counters: &TelemetryCounters,
) -> bool {
    match tx.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            log::warn!("[inertial] control loop behind, dropping message");
            TelemetryCounters::incr(&counters.dropped_messages);
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

fn gps_loop(
    mut source: Box<dyn NmeaSource>,
    position: PositionProvider,
    stop: cb::Receiver<()>,
    interval: Duration,
    silence: Duration,
    counters: Arc<TelemetryCounters>,
) {
    let mut health = StreamHealth::new("gps");

    loop {
        let started = Instant::now();
        // Keep reading while the receiver has lines queued
        let mut pause = interval;

        match source.read_line() {
            Ok(Some(line)) => {
                pause = Duration::ZERO;
                if let Some(Transition::Recovered { .. }) = health.record_success() {
                    counters.gps_healthy.store(true, std::sync::atomic::Ordering::Relaxed);
                }
                match position.ingest(&line) {
                    Ingest::Accepted => TelemetryCounters::incr(&counters.gps_accepted),
                    Ingest::Rejected(_) => TelemetryCounters::incr(&counters.gps_rejected),
                    Ingest::NoFix | Ingest::Ignored => {}
                }
            }
            Ok(None) => {
                if let Some(Transition::BecameUnavailable) = health.check_silence(silence) {
                    counters.gps_healthy.store(false, std::sync::atomic::Ordering::Relaxed);
                }
            }
            Err(e) => {
                if let Some(Transition::BecameUnavailable) = health.record_failure(&e) {
                    counters.gps_healthy.store(false, std::sync::atomic::Ordering::Relaxed);
                }
            }
        }

        if !wait_for_next_tick(&stop, started, pause) {
            break;
        }
    }
    log::debug!("[gps] reader exiting");
}

// ─── Control loop ────────────────────────────────────────────────────────────

struct ControlLoop {
    aggregator: SampleAggregator,
    publisher: Arc<dyn Publisher>,
    gate: Arc<dyn TravelGate>,
    identity: Arc<dyn IdentityResolver>,
    position: PositionProvider,
    counters: Arc<TelemetryCounters>,
    summary_every: u64,
    position_every: u64,
    shutdown_timeout: Duration,
    status_path: Option<PathBuf>,
    ticks: u64,
    trip_active: bool,
}

impl ControlLoop {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<SamplerMessage>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => self.handle(message, &mut in_flight),
                    None => break,
                },
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = result {
                        log::error!("[publish] task failed: {}", e);
                    }
                }
                _ = &mut stop => break,
            }
        }

        // Whatever the workers queued before stopping still belongs to this window
        rx.close();
        while let Ok(message) = rx.try_recv() {
            self.handle(message, &mut in_flight);
        }
        if !self.aggregator.is_empty() {
            log::info!("[scheduler] final flush of {} samples", self.aggregator.len());
            self.flush(&mut in_flight);
        }

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(result) = in_flight.join_next().await {
                if let Err(e) = result {
                    log::error!("[publish] task failed: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            log::warn!(
                "[scheduler] {} publish(es) still in flight after {:?}, abandoning",
                in_flight.len(),
                self.shutdown_timeout
            );
            in_flight.abort_all();
        }

        match tokio::time::timeout(self.shutdown_timeout, self.publisher.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("[publish] close failed: {}", e),
            Err(_) => log::warn!("[publish] close timed out"),
        }
        self.save_status();
    }

    fn handle(&mut self, message: SamplerMessage, in_flight: &mut JoinSet<()>) {
        self.observe_gate();
        match message {
            SamplerMessage::Crash(event) => {
                if !self.trip_active {
                    log::debug!("[scheduler] no active trip, crash not published");
                    return;
                }
                let publisher = self.publisher.clone();
                let identity = self.identity.current_identity();
                self.spawn_publish(in_flight, "crash", async move {
                    publisher.publish_crash(&identity, &event).await
                });
            }
            SamplerMessage::Tick(sample) => {
                self.ticks += 1;
                TelemetryCounters::incr(&self.counters.ticks);
                if let Some(sample) = sample {
                    self.aggregator.accumulate(sample);
                }
                if self.ticks % self.position_every == 0 {
                    self.forward_position(in_flight);
                }
                if self.ticks % self.summary_every == 0 {
                    self.flush(in_flight);
                }
            }
        }
    }

    /// Log Idle/Sampling transitions driven by the trip lifecycle
    fn observe_gate(&mut self) {
        let active = self.gate.is_trip_active();
        if active != self.trip_active {
            if active {
                log::info!("[scheduler] trip active, publishing driving and crash events");
            } else {
                log::info!("[scheduler] no active trip, suppressing driving and crash events");
            }
            self.trip_active = active;
        }
    }

    fn flush(&mut self, in_flight: &mut JoinSet<()>) {
        let position = self.position.get_current_position();
        // The window is cleared whether or not the summary goes anywhere
        let summary = self.aggregator.flush(position.coordinates());

        if self.trip_active {
            TelemetryCounters::incr(&self.counters.summaries_flushed);
            let publisher = self.publisher.clone();
            let identity = self.identity.current_identity();
            self.spawn_publish(in_flight, "driving summary", async move {
                publisher.publish_driving(&identity, &summary).await
            });
        } else {
            TelemetryCounters::incr(&self.counters.summaries_suppressed);
            log::debug!(
                "[scheduler] no active trip, summary of {} samples not published",
                summary.sample_count
            );
        }
        self.save_status();
    }

    fn forward_position(&mut self, in_flight: &mut JoinSet<()>) {
        let position = self.position.get_current_position();
        if !position.valid {
            log::debug!("[gps] no fix yet, position not forwarded");
            return;
        }
        let publisher = self.publisher.clone();
        let identity = self.identity.last_known_identity();
        self.spawn_publish(in_flight, "position", async move {
            publisher.publish_position(&position, &identity).await
        });
    }

    fn spawn_publish<F>(&self, in_flight: &mut JoinSet<()>, what: &'static str, publish: F)
    where
        F: Future<Output = Result<(), PublishError>> + Send + 'static,
    {
        let counters = self.counters.clone();
        in_flight.spawn(async move {
            if let Err(e) = publish.await {
                log::warn!("[publish] {} failed: {}", what, e);
                TelemetryCounters::incr(&counters.publish_failures);
            }
        });
    }

    fn save_status(&self) {
        let Some(path) = self.status_path.clone() else {
            return;
        };
        let status = self
            .counters
            .snapshot(&self.position.get_current_position(), self.trip_active);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = status.save(&path) {
                log::warn!("[scheduler] failed to write status to {}: {}", path.display(), e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorResult;
    use crate::publisher::testing::{Published, RecordingPublisher};
    use crate::reader::fakes::{FixedSwitch, ScriptedInertial};
    use crate::sample::RawInertial;
    use crate::sim::SimulatedNmea;
    use crate::travel::TravelContext;
    use std::sync::atomic::Ordering;
    use tokio::time::sleep;

    /// Two axes near full scale: about 2.68 g
    const JOLT: RawInertial = RawInertial {
        accel: [31000, 31000, 0],
        gyro: [0, 0, 0],
    };

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            g_force_threshold: 2.5,
            inertial_interval_ms: 10,
            gps_interval_ms: 5,
            bus_retry_delay_ms: 0,
            summary_every_ticks: 5,
            position_every_ticks: 2,
            shutdown_timeout_ms: 500,
            ..TelemetryConfig::default()
        }
    }

    fn sensors(inertial: impl InertialSource + 'static) -> SensorSet {
        SensorSet {
            inertial: Box::new(inertial),
            vibration: Box::new(FixedSwitch(true)),
            shock: Box::new(FixedSwitch(false)),
            gps: Box::new(SimulatedNmea::new(16.73, -93.08, 0)),
        }
    }

    fn start(
        config: TelemetryConfig,
        inertial: impl InertialSource + 'static,
        travel: &Arc<TravelContext>,
        publisher: &Arc<RecordingPublisher>,
    ) -> SchedulerHandle {
        TelemetryScheduler::new(config, publisher.clone(), travel.clone(), travel.clone())
            .start(sensors(inertial))
            .unwrap()
    }

    fn on_trip() -> Arc<TravelContext> {
        let travel = Arc::new(TravelContext::new("kit-1"));
        travel.start_trip("kit-1", "driver-1");
        travel
    }

    fn jolting(reads: usize) -> ScriptedInertial {
        let mut inertial = ScriptedInertial::default();
        for _ in 0..reads {
            inertial.read_results.push_back(Ok(JOLT));
        }
        inertial
    }

    #[tokio::test]
    async fn test_sustained_overload_debounced_to_one_crash() {
        let config = TelemetryConfig {
            inertial_interval_ms: 50,
            crash_debounce_ms: 100,
            ..config()
        };
        let travel = on_trip();
        let publisher = Arc::new(RecordingPublisher::default());
        let mut handle = start(config, jolting(2), &travel, &publisher);

        sleep(Duration::from_millis(250)).await;
        handle.shutdown().await.unwrap();

        let crashes = publisher.crashes();
        assert_eq!(crashes.len(), 1);
        assert!(crashes[0].impact_force > 2.5);
        assert_eq!(handle.counters().crashes_detected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_sample_lands_in_exactly_one_summary() {
        let travel = on_trip();
        let publisher = Arc::new(RecordingPublisher::default());
        let mut handle = start(config(), ScriptedInertial::default(), &travel, &publisher);

        sleep(Duration::from_millis(200)).await;
        let report = handle.shutdown().await.unwrap();
        assert!(report.control_loop_completed);

        let summaries = publisher.summaries();
        assert!(summaries.len() >= 2);
        assert!(summaries.iter().all(|s| s.sample_count <= 5));
        let summarized: usize = summaries.iter().map(|s| s.sample_count).sum();
        assert_eq!(summarized as u64, handle.status().samples);
        assert_eq!(handle.status().dropped_messages, 0);
    }

    #[tokio::test]
    async fn test_no_trip_suppresses_driving_and_crash_output() {
        let travel = Arc::new(TravelContext::new("kit-1"));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut handle = start(config(), jolting(3), &travel, &publisher);

        sleep(Duration::from_millis(200)).await;
        handle.shutdown().await.unwrap();

        assert!(publisher.crashes().is_empty());
        assert!(publisher.summaries().is_empty());
        let status = handle.status();
        assert!(status.crashes_detected >= 1);
        assert!(status.summaries_suppressed >= 1);

        // Position keeps flowing outside trips
        let positions = publisher.positions();
        assert!(!positions.is_empty());
        assert_eq!(positions[0].0.kit_id, "kit-1");
        assert_eq!(positions[0].0.driver_id, None);
    }

    #[tokio::test]
    async fn test_trip_started_mid_run_switches_at_next_flush() {
        let travel = Arc::new(TravelContext::new("kit-1"));
        let publisher = Arc::new(RecordingPublisher::default());
        let mut handle = start(config(), ScriptedInertial::default(), &travel, &publisher);

        sleep(Duration::from_millis(150)).await;
        let suppressed = handle.status().summaries_suppressed;
        assert!(suppressed >= 1);
        assert!(publisher.summaries().is_empty());

        travel.start_trip("kit-1", "driver-9");
        sleep(Duration::from_millis(150)).await;
        handle.shutdown().await.unwrap();

        let drivers: Vec<Option<String>> = publisher
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Published::Driving(identity, _) => Some(identity.driver_id),
                _ => None,
            })
            .collect();
        assert!(!drivers.is_empty());
        assert!(drivers.iter().all(|d| d.as_deref() == Some("driver-9")));
        // Windows flushed before the trip stay suppressed and are not replayed
        let status = handle.status();
        assert_eq!(status.summaries_flushed as usize, drivers.len());
        assert!(status.summaries_suppressed >= suppressed);
    }

    #[tokio::test]
    async fn test_trip_ended_mid_run_suppresses_next_flush() {
        let travel = on_trip();
        let publisher = Arc::new(RecordingPublisher::default());
        let mut handle = start(config(), ScriptedInertial::default(), &travel, &publisher);

        sleep(Duration::from_millis(150)).await;
        assert!(!publisher.summaries().is_empty());
        travel.end_trip();
        // Let any window flushed around the flip settle
        sleep(Duration::from_millis(30)).await;
        let published = publisher.summaries().len();

        sleep(Duration::from_millis(150)).await;
        handle.shutdown().await.unwrap();

        assert_eq!(publisher.summaries().len(), published);
        assert!(handle.status().summaries_suppressed >= 1);
    }

    struct SilentGps;

    impl NmeaSource for SilentGps {
        fn read_line(&mut self) -> SensorResult<Option<String>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_silent_receiver_reported_unavailable() {
        let config = TelemetryConfig {
            gps_read_timeout_ms: 10,
            gps_silence_timeout_ms: 50,
            ..config()
        };
        let travel = on_trip();
        let publisher = Arc::new(RecordingPublisher::default());
        let sensors = SensorSet {
            gps: Box::new(SilentGps),
            ..sensors(ScriptedInertial::default())
        };
        let mut handle = TelemetryScheduler::new(config, publisher.clone(), travel.clone(), travel)
            .start(sensors)
            .unwrap();

        sleep(Duration::from_millis(20)).await;
        assert!(handle.status().gps_healthy);
        sleep(Duration::from_millis(150)).await;
        let status = handle.status();
        handle.shutdown().await.unwrap();

        assert!(!status.gps_healthy);
        assert!(status.inertial_healthy);
        assert!(publisher.positions().is_empty());
    }

    #[tokio::test]
    async fn test_position_carries_last_driver_after_trip() {
        let travel = on_trip();
        travel.end_trip();
        let publisher = Arc::new(RecordingPublisher::default());
        let mut handle = start(config(), ScriptedInertial::default(), &travel, &publisher);

        sleep(Duration::from_millis(150)).await;
        handle.shutdown().await.unwrap();

        let positions = publisher.positions();
        assert!(!positions.is_empty());
        assert!(positions
            .iter()
            .all(|(identity, _)| identity.driver_id.as_deref() == Some("driver-1")));
        assert!(positions.iter().all(|(_, position)| position.valid));
    }

    #[tokio::test]
    async fn test_dead_bus_does_not_stop_the_rest() {
        let inertial = ScriptedInertial {
            always_fail_init: true,
            ..ScriptedInertial::default()
        };
        let travel = on_trip();
        let publisher = Arc::new(RecordingPublisher::default());
        let mut handle = start(config(), inertial, &travel, &publisher);

        sleep(Duration::from_millis(200)).await;
        let status = handle.status();
        handle.shutdown().await.unwrap();

        assert!(!status.inertial_healthy);
        assert_eq!(status.samples, 0);
        assert!(status.failed_polls > 0);
        assert!(status.gps_accepted > 0);
        assert!(!publisher.positions().is_empty());
        let summaries = publisher.summaries();
        assert!(!summaries.is_empty());
        assert!(summaries.iter().all(|s| s.sample_count == 0));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_closes_publisher() {
        let travel = on_trip();
        let publisher = Arc::new(RecordingPublisher::default());
        let mut handle = start(config(), ScriptedInertial::default(), &travel, &publisher);
        assert!(handle.is_running());

        sleep(Duration::from_millis(30)).await;
        let report = handle.shutdown().await.unwrap();
        assert!(report.abandoned_workers.is_empty());
        assert!(publisher.is_closed());
        assert!(!handle.is_running());
        assert!(handle.shutdown().await.is_none());
    }

    struct StuckInertial;

    impl InertialSource for StuckInertial {
        fn initialize(&mut self) -> SensorResult<()> {
            Ok(())
        }

        fn read_raw(&mut self) -> SensorResult<RawInertial> {
            std::thread::sleep(Duration::from_secs(3));
            Ok(RawInertial::default())
        }
    }

    #[tokio::test]
    async fn test_hung_bus_read_is_abandoned() {
        let config = TelemetryConfig {
            shutdown_timeout_ms: 100,
            ..config()
        };
        let travel = on_trip();
        let publisher = Arc::new(RecordingPublisher::default());
        let mut handle = start(config, StuckInertial, &travel, &publisher);

        sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        let report = handle.shutdown().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.abandoned_workers, vec!["inertial"]);
        assert!(report.control_loop_completed);
        assert!(publisher.is_closed());
    }

    #[tokio::test]
    async fn test_slow_publish_bounded_by_timeout() {
        let config = TelemetryConfig {
            shutdown_timeout_ms: 100,
            summary_every_ticks: 1000,
            position_every_ticks: 1000,
            ..config()
        };
        let travel = on_trip();
        let publisher = Arc::new(RecordingPublisher {
            delay: Some(Duration::from_secs(5)),
            ..RecordingPublisher::default()
        });
        let mut handle = start(config, ScriptedInertial::default(), &travel, &publisher);

        sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        let report = handle.shutdown().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(report.control_loop_completed);
        // The final summary was abandoned mid-publish
        assert!(publisher.summaries().is_empty());
        assert!(publisher.is_closed());
    }

    #[tokio::test]
    async fn test_publish_failures_counted_not_fatal() {
        let travel = on_trip();
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..RecordingPublisher::default()
        });
        let mut handle = start(config(), ScriptedInertial::default(), &travel, &publisher);

        sleep(Duration::from_millis(150)).await;
        let ticks_before = handle.status().ticks;
        sleep(Duration::from_millis(50)).await;
        assert!(handle.status().ticks > ticks_before);
        handle.shutdown().await.unwrap();

        assert!(handle.status().publish_failures > 0);
    }
}
