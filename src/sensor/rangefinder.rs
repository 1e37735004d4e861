//! Trigger/echo ultrasonic ranging (HC-SR04 style).
//!
//! A 10 µs trigger pulse starts a ranging cycle; the sensor answers with an
//! echo pulse whose width is the round-trip time of flight. Both echo edges
//! are waited for with a bounded busy-poll, so a stuck echo line costs at most
//! two timeouts.

use crate::error::AppError;
use crate::sensor::{Clock, DistanceSensor, EchoPin, PollError, TriggerPin, poll_until};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const ECHO_TIMEOUT: Duration = Duration::from_millis(30);
/// Half the speed of sound (343.3 m/s) in cm per second.
pub const HALF_SPEED_OF_SOUND_CM_PER_S: f64 = 17_165.0;
pub const MIN_RANGE_CM: f64 = 2.0;
pub const MAX_RANGE_CM: f64 = 400.0;

const SETTLE_US: u64 = 5;
const TRIGGER_PULSE_US: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoPhase {
    Rising,
    Falling,
}

impl fmt::Display for EchoPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EchoPhase::Rising => write!(f, "rising"),
            EchoPhase::Falling => write!(f, "falling"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RangeError {
    #[error("echo line already high after trigger")]
    StaleEcho,
    #[error("timed out waiting for {phase} echo edge")]
    EchoTimeout { phase: EchoPhase },
    #[error("distance out of range: {distance_cm:.1}cm")]
    OutOfRange { distance_cm: f64 },
    #[error("pin error: {0}")]
    Pin(#[from] AppError),
}

/// Convert an echo pulse width to a one-way distance in centimeters.
pub fn pulse_to_cm(pulse_us: u64) -> f64 {
    pulse_us as f64 * HALF_SPEED_OF_SOUND_CM_PER_S / 1_000_000.0
}

/// Accept a distance strictly inside the sensor's usable window, rounded to whole cm.
pub fn validate_distance(distance_cm: f64) -> Result<f64, RangeError> {
    if distance_cm > MIN_RANGE_CM && distance_cm < MAX_RANGE_CM {
        Ok(distance_cm.round())
    } else {
        Err(RangeError::OutOfRange { distance_cm })
    }
}

pub struct Rangefinder<T, E, C> {
    trigger: T,
    echo: E,
    clock: C,
    timeout: Duration,
}

impl<T, E, C> Rangefinder<T, E, C>
where
    T: TriggerPin,
    E: EchoPin,
    C: Clock,
{
    pub fn new(trigger: T, echo: E, clock: C) -> Self {
        Self {
            trigger,
            echo,
            clock,
            timeout: ECHO_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one ranging cycle and return the distance in whole centimeters.
    pub fn measure(&mut self) -> Result<f64, RangeError> {
        self.fire()?;

        // A line still high here belongs to a previous cycle.
        if self.echo.is_high()? {
            return Err(RangeError::StaleEcho);
        }

        let echo = &mut self.echo;
        let rise = poll_until(&self.clock, self.timeout, || echo.is_high())
            .map_err(|err| timeout_or_pin(err, EchoPhase::Rising))?;
        let fall = poll_until(&self.clock, self.timeout, || echo.is_high().map(|high| !high))
            .map_err(|err| timeout_or_pin(err, EchoPhase::Falling))?;

        validate_distance(pulse_to_cm(fall.saturating_sub(rise)))
    }

    fn fire(&mut self) -> Result<(), AppError> {
        self.trigger.set_low()?;
        self.clock.delay_us(SETTLE_US);
        self.trigger.set_high()?;
        self.clock.delay_us(TRIGGER_PULSE_US);
        self.trigger.set_low()
    }
}

impl<T, E, C> DistanceSensor for Rangefinder<T, E, C>
where
    T: TriggerPin,
    E: EchoPin,
    C: Clock,
{
    fn measure(&mut self) -> Result<f64, RangeError> {
        Rangefinder::measure(self)
    }
}

fn timeout_or_pin(err: PollError, phase: EchoPhase) -> RangeError {
    match err {
        PollError::Timeout(_) => RangeError::EchoTimeout { phase },
        PollError::Pin(err) => RangeError::Pin(err),
    }
}
