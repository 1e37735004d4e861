use crate::occupancy::Occupancy;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

/// Covers the default tick, both sampling windows and a full transport timeout.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(20);

/// Readings and decision from one control-loop tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSnapshot {
    pub distance_cm: f64,
    pub valid_distance_samples: usize,
    pub occupancy: Occupancy,
    pub current_a: f64,
    pub power_w: f64,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Delivered { status_code: u16, timestamp: SystemTime },
    Failed { reason: String, timestamp: SystemTime },
}

impl ReportOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn timestamp(&self) -> SystemTime {
        match self {
            Self::Delivered { timestamp, .. } | Self::Failed { timestamp, .. } => *timestamp,
        }
    }
}

/// Read model published by the control loop for the status API.
///
/// The loop is the only writer; the occupancy decision itself stays inside
/// the loop and is only copied out here.
#[derive(Debug)]
pub struct AppState {
    latest_tick: Option<TickSnapshot>,
    tick_tx: watch::Sender<Option<TickSnapshot>>,
    last_report: Option<ReportOutcome>,
    report_tx: watch::Sender<Option<ReportOutcome>>,
    stale_after: Duration,
}

impl AppState {
    pub fn new() -> Self {
        let (tick_tx, _tick_rx) = watch::channel(None);
        let (report_tx, _report_rx) = watch::channel(None);
        Self {
            latest_tick: None,
            tick_tx,
            last_report: None,
            report_tx,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Age past which the latest tick means the control loop has stalled.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn latest_tick(&self) -> Option<&TickSnapshot> {
        self.latest_tick.as_ref()
    }

    pub fn subscribe_ticks(&self) -> watch::Receiver<Option<TickSnapshot>> {
        self.tick_tx.subscribe()
    }

    pub fn set_tick(&mut self, snapshot: TickSnapshot) {
        self.latest_tick = Some(snapshot.clone());
        self.tick_tx.send_replace(Some(snapshot));
    }

    pub fn last_report(&self) -> Option<&ReportOutcome> {
        self.last_report.as_ref()
    }

    pub fn subscribe_reports(&self) -> watch::Receiver<Option<ReportOutcome>> {
        self.report_tx.subscribe()
    }

    pub fn set_report(&mut self, outcome: ReportOutcome) {
        self.last_report = Some(outcome.clone());
        self.report_tx.send_replace(Some(outcome));
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
