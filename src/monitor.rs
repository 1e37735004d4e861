//! The control loop: sample, decide, maybe report, sleep.

use crate::config::{Config, ConfigError};
use crate::filter::MedianFilter;
use crate::occupancy::OccupancyTracker;
use crate::sensor::current::derived_power_w;
use crate::sensor::rangefinder::ECHO_TIMEOUT;
use crate::sensor::{Clock, CurrentSensor, DistanceSensor};
use crate::state::{AppState, ReportOutcome, TickSnapshot};
use crate::telemetry::scheduler::ReportScheduler;
use crate::telemetry::{Report, Reporter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Longest gap between two published ticks: the inter-tick sleep, a distance
/// window where every sample times out on both edges, a current window, and a
/// report send that runs into its transport timeout.
pub fn worst_case_tick_gap(
    filter: &MedianFilter,
    transport_timeout: Duration,
    tick_period: Duration,
) -> Duration {
    let samples = u32::try_from(filter.samples()).unwrap_or(u32::MAX);
    let distance_sample = filter.spacing() + ECHO_TIMEOUT * 2;
    tick_period
        .saturating_add(distance_sample.saturating_mul(samples))
        .saturating_add(filter.spacing().saturating_mul(samples))
        .saturating_add(transport_timeout)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub snapshot: TickSnapshot,
    pub report: Option<ReportOutcome>,
}

pub struct ControlLoop<D, I, C, R> {
    distance: D,
    current: I,
    clock: C,
    reporter: R,
    filter: MedianFilter,
    occupancy: OccupancyTracker,
    scheduler: ReportScheduler,
    reference_voltage: f64,
    tick_period: Duration,
}

impl<D, I, C, R> ControlLoop<D, I, C, R>
where
    D: DistanceSensor,
    I: CurrentSensor,
    C: Clock,
    R: Reporter,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        distance: D,
        current: I,
        clock: C,
        reporter: R,
        filter: MedianFilter,
        occupancy: OccupancyTracker,
        scheduler: ReportScheduler,
        reference_voltage: f64,
    ) -> Self {
        Self {
            distance,
            current,
            clock,
            reporter,
            filter,
            occupancy,
            scheduler,
            reference_voltage,
            tick_period: DEFAULT_TICK_PERIOD,
        }
    }

    /// Wire the loop from configuration around already-opened devices.
    pub fn from_config(
        config: &Config,
        distance: D,
        current: I,
        clock: C,
        reporter: R,
    ) -> Result<Self, ConfigError> {
        let occupancy =
            OccupancyTracker::new(config.hysteresis()?, config.sensor_failure_policy());
        Ok(Self::new(
            distance,
            current,
            clock,
            reporter,
            config.median_filter(),
            occupancy,
            ReportScheduler::new(config.report_interval()),
            config.reference_voltage(),
        ))
    }

    pub fn with_tick_period(mut self, tick_period: Duration) -> Self {
        self.tick_period = tick_period;
        self
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    pub fn occupancy(&self) -> &OccupancyTracker {
        &self.occupancy
    }

    pub fn scheduler(&self) -> &ReportScheduler {
        &self.scheduler
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Run one tick. `elapsed` is the time since the previous tick and feeds
    /// the report scheduler.
    pub fn tick(&mut self, elapsed: Duration) -> TickOutcome {
        let distance = self.filter.distance(&self.clock, || self.distance.measure());
        let current_a = self.filter.current(&self.clock, || self.current.measure());
        let occupancy = self.occupancy.update(&distance);
        let power_w = derived_power_w(current_a, self.reference_voltage);
        let now = SystemTime::now();

        info!(
            distance_cm = distance.distance_cm,
            state = occupancy.label(),
            current_a,
            power_w,
            "Tick"
        );

        let report = if self.scheduler.tick(elapsed) {
            let report = Report::new(
                occupancy,
                current_a,
                self.reference_voltage,
                distance.distance_cm,
                now,
            );
            let outcome = self.dispatch(&report);
            self.scheduler.reset();
            Some(outcome)
        } else {
            None
        };

        TickOutcome {
            snapshot: TickSnapshot {
                distance_cm: distance.distance_cm,
                valid_distance_samples: distance.valid_samples,
                occupancy,
                current_a,
                power_w,
                timestamp: now,
            },
            report,
        }
    }

    fn dispatch(&mut self, report: &Report) -> ReportOutcome {
        info!(
            status = report.status_label,
            current_a = report.current_a,
            power_w = report.power_w,
            "Sending report"
        );
        match self.reporter.send(report) {
            Ok(status_code) => {
                info!(status_code, "Report delivered");
                ReportOutcome::Delivered {
                    status_code,
                    timestamp: report.created_at,
                }
            }
            Err(err) => {
                warn!(error = %err, "Report failed; retrying next interval");
                ReportOutcome::Failed {
                    reason: err.to_string(),
                    timestamp: report.created_at,
                }
            }
        }
    }

    /// Tick until `stop` is set, publishing every outcome into `state`.
    pub fn run(&mut self, state: &Arc<RwLock<AppState>>, stop: &AtomicBool) {
        let mut elapsed = Duration::ZERO;
        while !stop.load(Ordering::Relaxed) {
            let outcome = self.tick(elapsed);
            if let Err(err) = publish_outcome(state, outcome) {
                warn!(error = %err, "Failed to publish tick");
            }
            self.clock.sleep(self.tick_period);
            elapsed = self.tick_period;
        }
        info!("Control loop stopped");
    }
}

pub fn publish_outcome(
    state: &Arc<RwLock<AppState>>,
    outcome: TickOutcome,
) -> Result<(), crate::error::AppError> {
    let mut guard = state
        .write()
        .map_err(|_| crate::error::AppError::StateLock)?;
    guard.set_tick(outcome.snapshot);
    if let Some(report) = outcome.report {
        guard.set_report(report);
    }
    Ok(())
}

/// Run the control loop on a dedicated thread; sensor I/O is blocking.
pub fn spawn_control_thread<D, I, C, R>(
    mut control_loop: ControlLoop<D, I, C, R>,
    state: Arc<RwLock<AppState>>,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()>
where
    D: DistanceSensor + Send + 'static,
    I: CurrentSensor + Send + 'static,
    C: Clock + Send + 'static,
    R: Reporter + Send + 'static,
{
    std::thread::spawn(move || control_loop.run(&state, &stop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::{Hysteresis, Occupancy, SensorFailurePolicy};
    use crate::sensor::rangefinder::RangeError;
    use crate::sensor::mock::{FakeClock, ScriptedCurrent, ScriptedDistance};
    use crate::telemetry::TransportError;
    use crate::telemetry::mock::RecordingReporter;

    type TestLoop = ControlLoop<ScriptedDistance, ScriptedCurrent, FakeClock, RecordingReporter>;

    fn control_loop(
        distances: Vec<Option<f64>>,
        currents: Vec<f64>,
        reporter: RecordingReporter,
        clock: &FakeClock,
    ) -> TestLoop {
        let thresholds = Hysteresis::new(30.0, 40.0).expect("valid thresholds");
        ControlLoop::new(
            ScriptedDistance::new(distances),
            ScriptedCurrent::new(currents),
            clock.clone(),
            reporter,
            MedianFilter::new(5, Duration::from_millis(50)),
            OccupancyTracker::new(thresholds, SensorFailurePolicy::Occupied),
            ReportScheduler::new(Duration::from_secs(30)),
            225.0,
        )
    }

    fn window(distance: f64) -> Vec<Option<f64>> {
        vec![Some(distance); 5]
    }

    #[test]
    fn tick_samples_distance_then_current_with_spacing() {
        let clock = FakeClock::new();
        let mut control = control_loop(window(25.0), vec![0.05], RecordingReporter::new(), &clock);

        let outcome = control.tick(Duration::ZERO);

        assert_eq!(outcome.snapshot.distance_cm, 25.0);
        assert_eq!(outcome.snapshot.occupancy, Occupancy::Occupied);
        assert_eq!(outcome.snapshot.current_a, 0.05);
        assert_eq!(outcome.snapshot.power_w, 11.25);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(50); 10]);
        assert!(outcome.report.is_none());
    }

    #[test]
    fn report_due_after_thirty_one_second_ticks() {
        let clock = FakeClock::new();
        let distances = std::iter::repeat_n(Some(25.0), 5 * 32).collect();
        let mut control = control_loop(distances, vec![0.05], RecordingReporter::new(), &clock);

        assert!(control.tick(Duration::ZERO).report.is_none());
        for _ in 1..30 {
            assert!(control.tick(Duration::from_secs(1)).report.is_none());
        }
        let outcome = control.tick(Duration::from_secs(1));

        assert!(matches!(
            outcome.report,
            Some(ReportOutcome::Delivered {
                status_code: 200,
                ..
            })
        ));
        assert_eq!(control.scheduler().elapsed(), Duration::ZERO);
        let sent = control.reporter().sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].occupied);
        assert_eq!(sent[0].power_w, 11.25);
        assert_eq!(sent[0].status_label, "Occupied");
    }

    #[test]
    fn failed_send_still_resets_cadence() {
        let clock = FakeClock::new();
        let reporter = RecordingReporter::with_outcomes(vec![Err(TransportError::Request(
            "connection refused".to_string(),
        ))]);
        let mut control = control_loop(window(60.0), vec![0.0], reporter, &clock);

        let outcome = control.tick(Duration::from_secs(30));

        assert!(matches!(outcome.report, Some(ReportOutcome::Failed { .. })));
        assert_eq!(control.scheduler().elapsed(), Duration::ZERO);
        assert!(control.tick(Duration::from_secs(1)).report.is_none());
    }

    #[test]
    fn all_timeouts_fall_back_and_follow_policy() {
        let clock = FakeClock::new();
        let mut control = control_loop(vec![None; 5], vec![0.0], RecordingReporter::new(), &clock);

        let outcome = control.tick(Duration::ZERO);

        assert_eq!(outcome.snapshot.distance_cm, 0.0);
        assert_eq!(outcome.snapshot.valid_distance_samples, 0);
        assert_eq!(outcome.snapshot.occupancy, Occupancy::Occupied);
    }

    #[test]
    fn occupancy_persists_across_ticks() {
        let clock = FakeClock::new();
        let distances = [25.0, 35.0, 45.0]
            .into_iter()
            .flat_map(window)
            .collect();
        let mut control = control_loop(distances, vec![0.0], RecordingReporter::new(), &clock);

        let states: Vec<Occupancy> = (0..3)
            .map(|_| control.tick(Duration::from_secs(1)).snapshot.occupancy)
            .collect();

        assert_eq!(
            states,
            vec![Occupancy::Occupied, Occupancy::Occupied, Occupancy::Available]
        );
    }

    #[test]
    fn run_returns_at_once_when_already_stopped() -> Result<(), crate::error::AppError> {
        let clock = FakeClock::new();
        let mut control = control_loop(window(25.0), vec![0.05], RecordingReporter::new(), &clock);
        let state = Arc::new(RwLock::new(AppState::new()));
        let stop = AtomicBool::new(false);

        let outcome = control.tick(Duration::ZERO);
        publish_outcome(&state, outcome)?;
        stop.store(true, Ordering::Relaxed);
        control.run(&state, &stop);

        let guard = state.read().map_err(|_| crate::error::AppError::StateLock)?;
        assert_eq!(
            guard.latest_tick().map(|tick| tick.occupancy),
            Some(Occupancy::Occupied)
        );
        assert!(guard.last_report().is_none());
        assert!(clock.sleeps().iter().all(|sleep| *sleep < Duration::from_secs(1)));
        Ok(())
    }

    /// Raises `stop` while sampling the last window so `run` exits after
    /// finishing that tick.
    struct StopAfterSamples {
        inner: ScriptedDistance,
        remaining: usize,
        stop: Arc<AtomicBool>,
    }

    impl DistanceSensor for StopAfterSamples {
        fn measure(&mut self) -> Result<f64, RangeError> {
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                self.stop.store(true, Ordering::Relaxed);
            }
            self.inner.measure()
        }
    }

    #[test]
    fn run_sleeps_between_ticks_and_reports_every_interval() -> Result<(), crate::error::AppError> {
        const TICKS: usize = 62;
        let clock = FakeClock::new();
        let stop = Arc::new(AtomicBool::new(false));
        // Tick n reads (10 + n) cm, so each report names the tick that sent it.
        let distances = (1..=TICKS).flat_map(|tick| window(10.0 + tick as f64)).collect();
        let distance = StopAfterSamples {
            inner: ScriptedDistance::new(distances),
            remaining: TICKS * 5,
            stop: Arc::clone(&stop),
        };
        let thresholds = Hysteresis::new(30.0, 40.0).expect("valid thresholds");
        let mut control = ControlLoop::new(
            distance,
            ScriptedCurrent::new(vec![0.05]),
            clock.clone(),
            RecordingReporter::new(),
            MedianFilter::new(5, Duration::from_millis(50)),
            OccupancyTracker::new(thresholds, SensorFailurePolicy::Occupied),
            ReportScheduler::new(Duration::from_secs(30)),
            225.0,
        );
        let state = Arc::new(RwLock::new(AppState::new()));

        control.run(&state, &stop);

        let tick_sleeps = clock
            .sleeps()
            .into_iter()
            .filter(|sleep| *sleep == DEFAULT_TICK_PERIOD)
            .count();
        assert_eq!(tick_sleeps, TICKS);

        // First tick contributes no elapsed time, then one period per tick.
        let reporting_ticks: Vec<f64> = control
            .reporter()
            .sent()
            .iter()
            .map(|report| report.distance_cm - 10.0)
            .collect();
        assert_eq!(reporting_ticks, vec![31.0, 61.0]);
        assert_eq!(control.scheduler().elapsed(), Duration::from_secs(1));

        let guard = state.read().map_err(|_| crate::error::AppError::StateLock)?;
        assert_eq!(
            guard.latest_tick().map(|tick| tick.distance_cm),
            Some(10.0 + TICKS as f64)
        );
        assert!(guard.last_report().is_some_and(ReportOutcome::is_delivered));
        Ok(())
    }
}
