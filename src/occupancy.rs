//! Two-threshold hysteresis turning a filtered distance into a stable
//! occupied/available flag.
//!
//! Distances strictly below `enter_cm` mark the spot occupied, distances
//! strictly above `exit_cm` mark it available, and anything inside the band
//! (bounds included) keeps the previous state.

use crate::config::ConfigError;
use crate::filter::FilteredDistance;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Occupancy {
    #[default]
    Available,
    Occupied,
}

impl Occupancy {
    pub fn is_occupied(self) -> bool {
        matches!(self, Self::Occupied)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Occupied => "Occupied",
        }
    }
}

/// What to do when a sampling window produced no valid distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorFailurePolicy {
    /// Feed the 0 cm fallback through the thresholds, which reads as occupied.
    #[default]
    Occupied,
    Available,
    /// Keep whatever state the last valid window produced.
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hysteresis {
    enter_cm: f64,
    exit_cm: f64,
}

impl Hysteresis {
    pub fn new(enter_cm: f64, exit_cm: f64) -> Result<Self, ConfigError> {
        if !enter_cm.is_finite() || !exit_cm.is_finite() || enter_cm >= exit_cm {
            return Err(ConfigError::Invalid(format!(
                "occupancy thresholds must satisfy enter_cm < exit_cm, got {enter_cm} and {exit_cm}"
            )));
        }
        Ok(Self { enter_cm, exit_cm })
    }

    pub fn enter_cm(&self) -> f64 {
        self.enter_cm
    }

    pub fn exit_cm(&self) -> f64 {
        self.exit_cm
    }

    pub fn transition(&self, previous: Occupancy, distance_cm: f64) -> Occupancy {
        if distance_cm < self.enter_cm {
            Occupancy::Occupied
        } else if distance_cm > self.exit_cm {
            Occupancy::Available
        } else {
            previous
        }
    }
}

#[derive(Debug, Clone)]
pub struct OccupancyTracker {
    state: Occupancy,
    thresholds: Hysteresis,
    policy: SensorFailurePolicy,
}

impl OccupancyTracker {
    pub fn new(thresholds: Hysteresis, policy: SensorFailurePolicy) -> Self {
        Self {
            state: Occupancy::Available,
            thresholds,
            policy,
        }
    }

    pub fn state(&self) -> Occupancy {
        self.state
    }

    pub fn thresholds(&self) -> Hysteresis {
        self.thresholds
    }

    /// Apply the hysteresis rule to one distance.
    pub fn apply(&mut self, distance_cm: f64) -> Occupancy {
        let next = self.thresholds.transition(self.state, distance_cm);
        self.set(next, distance_cm)
    }

    fn set(&mut self, next: Occupancy, distance_cm: f64) -> Occupancy {
        if next != self.state {
            info!(
                from = self.state.label(),
                to = next.label(),
                distance_cm,
                "Occupancy changed"
            );
        }
        self.state = next;
        next
    }

    /// Advance once per tick, honoring the sensor-failure policy for empty windows.
    pub fn update(&mut self, reading: &FilteredDistance) -> Occupancy {
        if reading.has_echo() {
            return self.apply(reading.distance_cm);
        }

        warn!(
            policy = ?self.policy,
            state = self.state.label(),
            "Applying sensor failure policy"
        );
        match self.policy {
            SensorFailurePolicy::Occupied => self.apply(reading.distance_cm),
            SensorFailurePolicy::Available => self.set(Occupancy::Available, reading.distance_cm),
            SensorFailurePolicy::Hold => self.state,
        }
    }
}
