use crate::telemetry::{Report, Reporter, TransportError};
use std::collections::VecDeque;

/// Reporter that records every report and answers from a script (200 once
/// the script runs out).
#[derive(Debug, Default)]
pub struct RecordingReporter {
    sent: Vec<Report>,
    outcomes: VecDeque<Result<u16, TransportError>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<Result<u16, TransportError>>) -> Self {
        Self {
            sent: Vec::new(),
            outcomes: outcomes.into(),
        }
    }

    pub fn sent(&self) -> &[Report] {
        &self.sent
    }
}

impl Reporter for RecordingReporter {
    fn send(&mut self, report: &Report) -> Result<u16, TransportError> {
        self.sent.push(report.clone());
        self.outcomes.pop_front().unwrap_or(Ok(200))
    }
}
