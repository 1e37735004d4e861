use crate::error::AppError;
use crate::sensor::rangefinder::{EchoPhase, HALF_SPEED_OF_SOUND_CM_PER_S, RangeError};
use crate::sensor::{AnalogInput, Clock, CurrentSensor, DistanceSensor, EchoPin, TriggerPin};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// Deterministic clock. Every `now_micros` call advances time by one
/// microsecond so busy-poll loops make progress.
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    inner: Rc<FakeClockInner>,
}

#[derive(Debug, Default)]
struct FakeClockInner {
    now_us: Cell<u64>,
    sleeps: RefCell<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time without advancing.
    pub fn peek(&self) -> u64 {
        self.inner.now_us.get()
    }

    pub fn advance(&self, micros: u64) {
        self.inner.now_us.set(self.peek().saturating_add(micros));
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.sleeps.borrow().clone()
    }
}

impl Clock for FakeClock {
    fn now_micros(&self) -> u64 {
        let now = self.peek();
        self.advance(1);
        now
    }

    fn delay_us(&self, micros: u64) {
        self.advance(micros);
    }

    fn sleep(&self, duration: Duration) {
        self.inner.sleeps.borrow_mut().push(duration);
        self.advance(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX));
    }
}

/// How the simulated sensor answers one trigger pulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EchoResponse {
    Pulse { delay_us: u64, width_us: u64 },
    Silent,
    StuckHigh,
    Fault,
}

impl EchoResponse {
    pub fn for_distance(distance_cm: f64) -> Self {
        let width_us = (distance_cm * 1_000_000.0 / HALF_SPEED_OF_SOUND_CM_PER_S).round() as u64;
        Self::Pulse {
            delay_us: 200,
            width_us,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEdge {
    Low(u64),
    High(u64),
}

#[derive(Debug)]
struct BenchState {
    clock: FakeClock,
    responses: RefCell<VecDeque<EchoResponse>>,
    active: Cell<Option<(u64, EchoResponse)>>,
    trigger_high: Cell<bool>,
    edges: RefCell<Vec<TriggerEdge>>,
}

/// Simulated trigger/echo pair sharing one fake clock.
#[derive(Debug, Clone)]
pub struct UltrasonicBench {
    state: Rc<BenchState>,
}

impl UltrasonicBench {
    pub fn new(clock: &FakeClock, responses: Vec<EchoResponse>) -> Self {
        Self {
            state: Rc::new(BenchState {
                clock: clock.clone(),
                responses: RefCell::new(responses.into()),
                active: Cell::new(None),
                trigger_high: Cell::new(false),
                edges: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn trigger(&self) -> MockTrigger {
        MockTrigger {
            state: Rc::clone(&self.state),
        }
    }

    pub fn echo(&self) -> MockEcho {
        MockEcho {
            state: Rc::clone(&self.state),
        }
    }

    pub fn trigger_edges(&self) -> Vec<TriggerEdge> {
        self.state.edges.borrow().clone()
    }
}

pub struct MockTrigger {
    state: Rc<BenchState>,
}

impl TriggerPin for MockTrigger {
    fn set_high(&mut self) -> Result<(), AppError> {
        let now = self.state.clock.peek();
        self.state.edges.borrow_mut().push(TriggerEdge::High(now));
        self.state.trigger_high.set(true);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), AppError> {
        let now = self.state.clock.peek();
        self.state.edges.borrow_mut().push(TriggerEdge::Low(now));
        if self.state.trigger_high.replace(false) {
            let response = self
                .state
                .responses
                .borrow_mut()
                .pop_front()
                .unwrap_or(EchoResponse::Silent);
            self.state.active.set(Some((now, response)));
        }
        Ok(())
    }
}

pub struct MockEcho {
    state: Rc<BenchState>,
}

impl EchoPin for MockEcho {
    fn is_high(&mut self) -> Result<bool, AppError> {
        let Some((fired_at, response)) = self.state.active.get() else {
            return Ok(false);
        };
        let elapsed = self.state.clock.peek().saturating_sub(fired_at);
        match response {
            EchoResponse::Pulse { delay_us, width_us } => {
                Ok(elapsed >= delay_us && elapsed < delay_us + width_us)
            }
            EchoResponse::Silent => Ok(false),
            EchoResponse::StuckHigh => Ok(true),
            EchoResponse::Fault => Err(AppError::Gpio("mock echo read failed".to_string())),
        }
    }
}

/// ADC returning queued codes, then repeating the last one.
#[derive(Debug, Clone)]
pub struct ScriptedAnalog {
    codes: VecDeque<u16>,
    last: u16,
    fail: bool,
}

impl ScriptedAnalog {
    pub fn new(codes: Vec<u16>) -> Self {
        Self {
            codes: codes.into(),
            last: 0,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            codes: VecDeque::new(),
            last: 0,
            fail: true,
        }
    }
}

impl AnalogInput for ScriptedAnalog {
    fn read_u16(&mut self) -> Result<u16, AppError> {
        if self.fail {
            return Err(AppError::Spi("mock adc transfer failed".to_string()));
        }
        if let Some(code) = self.codes.pop_front() {
            self.last = code;
        }
        Ok(self.last)
    }
}

/// Distance source replaying a script; `None` entries behave like an echo timeout.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDistance {
    readings: VecDeque<Option<f64>>,
    calls: usize,
}

impl ScriptedDistance {
    pub fn new(readings: Vec<Option<f64>>) -> Self {
        Self {
            readings: readings.into(),
            calls: 0,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl DistanceSensor for ScriptedDistance {
    fn measure(&mut self) -> Result<f64, RangeError> {
        self.calls += 1;
        self.readings
            .pop_front()
            .flatten()
            .ok_or(RangeError::EchoTimeout {
                phase: EchoPhase::Rising,
            })
    }
}

/// Current source replaying a script, then repeating the last value.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCurrent {
    readings: VecDeque<f64>,
    last: f64,
}

impl ScriptedCurrent {
    pub fn new(readings: Vec<f64>) -> Self {
        Self {
            readings: readings.into(),
            last: 0.0,
        }
    }
}

impl CurrentSensor for ScriptedCurrent {
    fn measure(&mut self) -> f64 {
        if let Some(value) = self.readings.pop_front() {
            self.last = value;
        }
        self.last
    }
}
