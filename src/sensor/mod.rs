use crate::error::AppError;
use crate::sensor::rangefinder::RangeError;
use std::time::{Duration, Instant};
use thiserror::Error;

pub mod current;
pub mod mock;
pub mod pi;
pub mod rangefinder;

/// Digital output driving the ultrasonic trigger.
pub trait TriggerPin {
    fn set_high(&mut self) -> Result<(), AppError>;
    fn set_low(&mut self) -> Result<(), AppError>;
}

/// Digital input sampled in a busy-poll loop.
pub trait EchoPin {
    fn is_high(&mut self) -> Result<bool, AppError>;
}

/// Fixed-resolution analog input scaled to 16-bit full scale.
pub trait AnalogInput {
    fn read_u16(&mut self) -> Result<u16, AppError>;
}

/// One ranging attempt; `Err` stands in for the "no reading" sentinel.
pub trait DistanceSensor {
    fn measure(&mut self) -> Result<f64, RangeError>;
}

/// One current reading in amperes. Always produces a value.
pub trait CurrentSensor {
    fn measure(&mut self) -> f64;
}

/// Monotonic time source with microsecond resolution.
pub trait Clock {
    fn now_micros(&self) -> u64;
    /// Short, precise delay used inside the trigger sequence.
    fn delay_us(&self, micros: u64);
    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_micros(&self) -> u64 {
        (**self).now_micros()
    }
    fn delay_us(&self, micros: u64) {
        (**self).delay_us(micros)
    }
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    fn delay_us(&self, micros: u64) {
        // thread::sleep overshoots by tens of microseconds on Linux; spin instead.
        let deadline = Instant::now() + Duration::from_micros(micros);
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("condition not met within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Pin(#[from] AppError),
}

/// Poll `condition` as fast as possible until it holds or `timeout` elapses.
///
/// Returns the clock reading taken just before the successful check.
pub fn poll_until<C, F>(clock: &C, timeout: Duration, mut condition: F) -> Result<u64, PollError>
where
    C: Clock + ?Sized,
    F: FnMut() -> Result<bool, AppError>,
{
    let limit = u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX);
    let start = clock.now_micros();
    loop {
        let now = clock.now_micros();
        if condition()? {
            return Ok(now);
        }
        if now.saturating_sub(start) > limit {
            return Err(PollError::Timeout(timeout));
        }
    }
}

/// GPIO and ADC wiring for the Raspberry Pi build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareConfig {
    pub trigger_pin: u8,
    pub echo_pin: u8,
    pub adc_bus: u8,
    pub adc_chip_select: u8,
    pub adc_channel: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            trigger_pin: 17,
            echo_pin: 16,
            adc_bus: 0,
            adc_chip_select: 0,
            adc_channel: 0,
        }
    }
}
