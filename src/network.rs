//! Startup connectivity check against the collector host.

use crate::error::AppError;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{error, info, warn};

pub trait Connectivity {
    /// Block until the network is usable or the attempt budget runs out.
    fn connect(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub attempts: u32,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            attempts: 15,
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Extract host and port from an `http://` or `https://` URL.
pub fn parse_endpoint(url: &str) -> Result<Endpoint, AppError> {
    let (rest, default_port) = if let Some(rest) = url.strip_prefix("https://") {
        (rest, 443)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (rest, 80)
    } else {
        return Err(AppError::Connectivity(format!(
            "unsupported endpoint scheme: {url}"
        )));
    };

    let authority = rest
        .split(['/', '?'])
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Connectivity("missing host".to_string()))?;

    let mut host_parts = authority.splitn(2, ':');
    let host = host_parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Connectivity("missing host".to_string()))?;
    let port = match host_parts.next() {
        Some(port) if !port.is_empty() => port
            .parse::<u16>()
            .map_err(|_| AppError::Connectivity(format!("invalid port: {port}")))?,
        _ => default_port,
    };

    Ok(Endpoint {
        host: host.to_string(),
        port,
    })
}

/// Resolves and TCP-connects to the collector, retrying with a fixed delay.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    endpoint: Endpoint,
    settings: ProbeSettings,
}

impl ReachabilityProbe {
    pub fn new(endpoint: Endpoint, settings: ProbeSettings) -> Self {
        Self { endpoint, settings }
    }

    pub fn for_url(url: &str, settings: ProbeSettings) -> Result<Self, AppError> {
        Ok(Self::new(parse_endpoint(url)?, settings))
    }

    fn try_once(&self) -> Result<SocketAddr, AppError> {
        let addr = (self.endpoint.host.as_str(), self.endpoint.port)
            .to_socket_addrs()
            .map_err(|err| AppError::Connectivity(format!("dns: {err}")))?
            .next()
            .ok_or_else(|| AppError::Connectivity("no addresses resolved".to_string()))?;
        TcpStream::connect_timeout(&addr, self.settings.connect_timeout)
            .map_err(|err| AppError::Connectivity(format!("connect {addr}: {err}")))?;
        Ok(addr)
    }
}

impl Connectivity for ReachabilityProbe {
    fn connect(&mut self) -> bool {
        info!(
            host = %self.endpoint.host,
            port = self.endpoint.port,
            attempts = self.settings.attempts,
            "Checking network connectivity"
        );
        for attempt in 1..=self.settings.attempts {
            match self.try_once() {
                Ok(addr) => {
                    info!(%addr, attempt, "Network reachable");
                    return true;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "Collector not reachable yet");
                    if attempt < self.settings.attempts {
                        std::thread::sleep(self.settings.retry_delay);
                    }
                }
            }
        }
        error!(
            host = %self.endpoint.host,
            "Network connection failed"
        );
        false
    }
}
