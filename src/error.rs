use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("spi error: {0}")]
    Spi(String),
    #[error("invalid adc channel: {0}")]
    InvalidAdcChannel(u8),
    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),
    #[error("network unreachable: {0}")]
    Connectivity(String),
    #[error("state lock poisoned")]
    StateLock,
}
