use crate::sensor::{AnalogInput, CurrentSensor};
use tracing::warn;

pub const ADC_FULL_SCALE: f64 = 65_535.0;
pub const ADC_REFERENCE_VOLTS: f64 = 3.3;
pub const READING_DECIMALS: u32 = 3;

/// Drop digits past `digits` decimals, biasing toward zero.
pub fn truncate_decimals(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).trunc() / factor
}

/// Convert a 16-bit ADC code to amperes through the burden resistor.
pub fn code_to_amps(code: u16, burden_resistor_ohms: f64) -> f64 {
    let volts = f64::from(code) * (ADC_REFERENCE_VOLTS / ADC_FULL_SCALE);
    volts / burden_resistor_ohms
}

/// Power derived from current and the configured reference voltage.
pub fn derived_power_w(current_a: f64, reference_voltage: f64) -> f64 {
    truncate_decimals(current_a * reference_voltage, READING_DECIMALS)
}

pub struct CurrentSampler<A> {
    input: A,
    burden_resistor_ohms: f64,
}

impl<A: AnalogInput> CurrentSampler<A> {
    pub fn new(input: A, burden_resistor_ohms: f64) -> Self {
        Self {
            input,
            burden_resistor_ohms,
        }
    }

    /// One reading in amperes, truncated to three decimals. A failed ADC
    /// transfer reads as zero.
    pub fn measure(&mut self) -> f64 {
        let code = match self.input.read_u16() {
            Ok(code) => code,
            Err(err) => {
                warn!(error = %err, "Failed to read current ADC");
                0
            }
        };
        truncate_decimals(
            code_to_amps(code, self.burden_resistor_ohms),
            READING_DECIMALS,
        )
    }
}

impl<A: AnalogInput> CurrentSensor for CurrentSampler<A> {
    fn measure(&mut self) -> f64 {
        CurrentSampler::measure(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::mock::ScriptedAnalog;

    #[test]
    fn truncation_does_not_round_up() {
        assert_eq!(truncate_decimals(0.12349, 3), 0.123);
        assert_eq!(truncate_decimals(0.1239, 3), 0.123);
        assert_eq!(truncate_decimals(2.0, 3), 2.0);
    }

    #[test]
    fn full_scale_code_maps_to_reference_over_burden() {
        let amps = code_to_amps(u16::MAX, 31.8);
        assert!((amps - 3.3 / 31.8).abs() < 1e-12);
    }

    #[test]
    fn sampler_converts_and_truncates() {
        // 32768 * 3.3 / 65535 / 31.8 = 0.05189...
        let mut sampler = CurrentSampler::new(ScriptedAnalog::new(vec![32_768]), 31.8);

        assert_eq!(sampler.measure(), 0.051);
    }

    #[test]
    fn zero_code_reads_zero_amps() {
        let mut sampler = CurrentSampler::new(ScriptedAnalog::new(vec![0]), 31.8);

        assert_eq!(sampler.measure(), 0.0);
    }

    #[test]
    fn adc_failure_reads_zero_amps() {
        let mut sampler = CurrentSampler::new(ScriptedAnalog::failing(), 31.8);

        assert_eq!(sampler.measure(), 0.0);
    }

    #[test]
    fn derived_power_is_truncated() {
        assert_eq!(derived_power_w(0.050, 225.0), 11.25);
        assert_eq!(derived_power_w(0.1, 225.0), 22.5);
    }
}
