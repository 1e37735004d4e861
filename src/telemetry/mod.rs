//! Report assembly and the outbound transport boundary.

use crate::occupancy::Occupancy;
use crate::sensor::current::derived_power_w;
use std::time::SystemTime;
use thiserror::Error;

pub mod mock;
pub mod scheduler;
pub mod thingspeak;

/// Snapshot handed to the transport once per reporting interval.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub occupied: bool,
    pub current_a: f64,
    pub power_w: f64,
    pub status_label: &'static str,
    pub distance_cm: f64,
    pub created_at: SystemTime,
}

impl Report {
    pub fn new(
        occupancy: Occupancy,
        current_a: f64,
        reference_voltage: f64,
        distance_cm: f64,
        created_at: SystemTime,
    ) -> Self {
        Self {
            occupied: occupancy.is_occupied(),
            current_a,
            power_w: derived_power_w(current_a, reference_voltage),
            status_label: occupancy.label(),
            distance_cm,
            created_at,
        }
    }

    /// 1 when occupied, 0 when available.
    pub fn proximity(&self) -> u8 {
        u8::from(self.occupied)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("collector returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("collector rejected the update")]
    Rejected,
}

/// Outbound collector. Implementations encode the report however their
/// endpoint expects and return the HTTP status on success.
pub trait Reporter {
    fn send(&mut self, report: &Report) -> Result<u16, TransportError>;
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn send(&mut self, report: &Report) -> Result<u16, TransportError> {
        (**self).send(report)
    }
}
