//! Raspberry Pi bindings: GPIO trigger/echo and an MCP3008 ADC on SPI.

use crate::error::AppError;
use crate::sensor::HardwareConfig;

#[cfg(target_os = "linux")]
use crate::sensor::{AnalogInput, EchoPin, TriggerPin};
#[cfg(target_os = "linux")]
use rppal::gpio::{Gpio, InputPin, OutputPin};
#[cfg(target_os = "linux")]
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

pub const MCP3008_CHANNELS: u8 = 8;
pub const MCP3008_CLOCK_HZ: u32 = 1_000_000;

/// Single-ended read request for one MCP3008 channel.
pub fn mcp3008_request(channel: u8) -> Result<[u8; 3], AppError> {
    if channel >= MCP3008_CHANNELS {
        return Err(AppError::InvalidAdcChannel(channel));
    }
    Ok([0x01, (0x08 | channel) << 4, 0x00])
}

/// Extract the 10-bit conversion result from the response frame.
pub fn mcp3008_decode(frame: [u8; 3]) -> u16 {
    (u16::from(frame[1] & 0x03) << 8) | u16::from(frame[2])
}

/// Stretch a 10-bit code to 16-bit full scale, replicating the high bits so
/// 1023 maps to 65535.
pub fn scale_10bit_to_u16(code: u16) -> u16 {
    let code = code & 0x03ff;
    (code << 6) | (code >> 4)
}

#[cfg(target_os = "linux")]
pub struct GpioTrigger {
    pin: OutputPin,
}

#[cfg(target_os = "linux")]
impl TriggerPin for GpioTrigger {
    fn set_high(&mut self) -> Result<(), AppError> {
        self.pin.set_high();
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), AppError> {
        self.pin.set_low();
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub struct GpioEcho {
    pin: InputPin,
}

#[cfg(target_os = "linux")]
impl EchoPin for GpioEcho {
    fn is_high(&mut self) -> Result<bool, AppError> {
        Ok(self.pin.is_high())
    }
}

#[cfg(target_os = "linux")]
pub struct Mcp3008 {
    spi: Spi,
    request: [u8; 3],
}

#[cfg(target_os = "linux")]
impl Mcp3008 {
    pub fn new(bus: u8, chip_select: u8, channel: u8) -> Result<Self, AppError> {
        let request = mcp3008_request(channel)?;
        let spi = Spi::new(
            spi_bus(bus)?,
            slave_select(chip_select)?,
            MCP3008_CLOCK_HZ,
            Mode::Mode0,
        )
        .map_err(|err| AppError::Spi(err.to_string()))?;
        Ok(Self { spi, request })
    }
}

#[cfg(target_os = "linux")]
impl AnalogInput for Mcp3008 {
    fn read_u16(&mut self) -> Result<u16, AppError> {
        let mut response = [0u8; 3];
        self.spi
            .transfer(&mut response, &self.request)
            .map_err(|err| AppError::Spi(err.to_string()))?;
        Ok(scale_10bit_to_u16(mcp3008_decode(response)))
    }
}

#[cfg(target_os = "linux")]
fn spi_bus(bus: u8) -> Result<Bus, AppError> {
    match bus {
        0 => Ok(Bus::Spi0),
        1 => Ok(Bus::Spi1),
        2 => Ok(Bus::Spi2),
        other => Err(AppError::Spi(format!("unsupported SPI bus {other}"))),
    }
}

#[cfg(target_os = "linux")]
fn slave_select(chip_select: u8) -> Result<SlaveSelect, AppError> {
    match chip_select {
        0 => Ok(SlaveSelect::Ss0),
        1 => Ok(SlaveSelect::Ss1),
        2 => Ok(SlaveSelect::Ss2),
        other => Err(AppError::Spi(format!("unsupported chip select {other}"))),
    }
}

#[cfg(target_os = "linux")]
pub struct PiHardware {
    pub trigger: GpioTrigger,
    pub echo: GpioEcho,
    pub adc: Mcp3008,
}

/// Claim the trigger/echo pins and open the ADC.
#[cfg(target_os = "linux")]
pub fn open_hardware(config: &HardwareConfig) -> Result<PiHardware, AppError> {
    let gpio = Gpio::new().map_err(|err| AppError::Gpio(err.to_string()))?;
    let mut trigger = gpio
        .get(config.trigger_pin)
        .map_err(|err| AppError::Gpio(err.to_string()))?
        .into_output();
    trigger.set_low();
    let echo = gpio
        .get(config.echo_pin)
        .map_err(|err| AppError::Gpio(err.to_string()))?
        .into_input_pulldown();
    let adc = Mcp3008::new(
        config.adc_bus,
        config.adc_chip_select,
        config.adc_channel,
    )?;
    Ok(PiHardware {
        trigger: GpioTrigger { pin: trigger },
        echo: GpioEcho { pin: echo },
        adc,
    })
}

#[cfg(not(target_os = "linux"))]
pub struct PiHardware;

#[cfg(not(target_os = "linux"))]
pub fn open_hardware(_config: &HardwareConfig) -> Result<PiHardware, AppError> {
    Err(AppError::HardwareUnavailable(
        "GPIO and SPI access requires Linux/Raspberry Pi".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_encodes_single_ended_channel() -> Result<(), AppError> {
        assert_eq!(mcp3008_request(0)?, [0x01, 0x80, 0x00]);
        assert_eq!(mcp3008_request(7)?, [0x01, 0xf0, 0x00]);
        Ok(())
    }

    #[test]
    fn request_rejects_missing_channel() {
        assert!(matches!(
            mcp3008_request(8),
            Err(AppError::InvalidAdcChannel(8))
        ));
    }

    #[test]
    fn decode_ignores_bits_outside_result() {
        assert_eq!(mcp3008_decode([0xff, 0xff, 0xff]), 1023);
        assert_eq!(mcp3008_decode([0x00, 0x02, 0x01]), 513);
    }

    #[test]
    fn scaling_covers_full_16_bit_range() {
        assert_eq!(scale_10bit_to_u16(0), 0);
        assert_eq!(scale_10bit_to_u16(1023), u16::MAX);
        assert_eq!(scale_10bit_to_u16(512), 32_800);
    }
}
