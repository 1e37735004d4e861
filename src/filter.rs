//! Median filtering over a short burst of samples.
//!
//! Ultrasonic sensors fail bimodally: most readings are close to the truth and
//! a few are wildly off (multipath, near-timeout echoes). The median of a small
//! window ignores those outliers where a mean would not.

use crate::sensor::rangefinder::RangeError;
use crate::sensor::Clock;
use std::time::Duration;
use tracing::{debug, warn};

/// Distance reported when no sample in a window was valid.
pub const NO_ECHO_FALLBACK_CM: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilteredDistance {
    pub distance_cm: f64,
    pub valid_samples: usize,
}

impl FilteredDistance {
    pub fn has_echo(&self) -> bool {
        self.valid_samples > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MedianFilter {
    samples: usize,
    spacing: Duration,
}

impl MedianFilter {
    pub fn new(samples: usize, spacing: Duration) -> Self {
        Self { samples, spacing }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Take `samples` readings, sleeping `spacing` after each, and return the
    /// median of those that produced a value.
    pub fn collect<C, F>(&self, clock: &C, mut sample: F) -> Option<f64>
    where
        C: Clock + ?Sized,
        F: FnMut() -> Option<f64>,
    {
        let mut values = Vec::with_capacity(self.samples);
        for _ in 0..self.samples {
            if let Some(value) = sample() {
                values.push(value);
            }
            clock.sleep(self.spacing);
        }
        median(&mut values)
    }

    /// Filtered distance; invalid readings are dropped and an empty window
    /// falls back to [`NO_ECHO_FALLBACK_CM`].
    pub fn distance<C, F>(&self, clock: &C, mut measure: F) -> FilteredDistance
    where
        C: Clock + ?Sized,
        F: FnMut() -> Result<f64, RangeError>,
    {
        let mut valid_samples = 0;
        let median = self.collect(clock, || match measure() {
            Ok(distance_cm) if distance_cm > 0.0 => {
                valid_samples += 1;
                Some(distance_cm)
            }
            Ok(distance_cm) => {
                debug!(distance_cm, "Discarding non-positive distance");
                None
            }
            Err(err) => {
                debug!(error = %err, "Discarding invalid distance reading");
                None
            }
        });

        match median {
            Some(distance_cm) => FilteredDistance {
                distance_cm,
                valid_samples,
            },
            None => {
                warn!(
                    samples = self.samples,
                    fallback_cm = NO_ECHO_FALLBACK_CM,
                    "No valid distance in sampling window"
                );
                FilteredDistance {
                    distance_cm: NO_ECHO_FALLBACK_CM,
                    valid_samples: 0,
                }
            }
        }
    }

    /// Filtered current in amperes. Every reading participates.
    pub fn current<C, F>(&self, clock: &C, mut measure: F) -> f64
    where
        C: Clock + ?Sized,
        F: FnMut() -> f64,
    {
        self.collect(clock, || Some(measure())).unwrap_or(0.0)
    }
}

/// Sort in place and return the element at `len / 2` (upper of the two
/// middle elements for even counts, no interpolation).
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(values[values.len() / 2])
}
