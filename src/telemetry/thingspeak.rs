//! ThingSpeak-style update transport: one GET per report with the readings
//! carried as query parameters.

use crate::telemetry::{Report, Reporter, TransportError};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNames {
    pub proximity: String,
    pub current: String,
    pub power: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            proximity: "field1".to_string(),
            current: "field2".to_string(),
            power: "field3".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ThingSpeakSettings {
    pub endpoint: String,
    pub api_key: String,
    pub fields: FieldNames,
    pub timeout: Duration,
}

impl fmt::Debug for ThingSpeakSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThingSpeakSettings")
            .field("endpoint", &self.endpoint)
            .field("has_api_key", &!self.api_key.is_empty())
            .field("fields", &self.fields)
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub struct ThingSpeakReporter {
    settings: ThingSpeakSettings,
    agent: ureq::Agent,
}

impl ThingSpeakReporter {
    pub fn new(settings: ThingSpeakSettings) -> Result<Self, TransportError> {
        if !settings.endpoint.starts_with("http://") && !settings.endpoint.starts_with("https://")
        {
            return Err(TransportError::InvalidEndpoint(format!(
                "endpoint must start with http:// or https://, got {}",
                settings.endpoint
            )));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.timeout)
            .user_agent(concat!("occupancy-monitor/", env!("CARGO_PKG_VERSION")))
            .build();
        Ok(Self { settings, agent })
    }

    /// Query parameters carrying one report.
    pub fn query(&self, report: &Report) -> Vec<(String, String)> {
        let fields = &self.settings.fields;
        vec![
            ("api_key".to_string(), self.settings.api_key.clone()),
            (fields.proximity.clone(), report.proximity().to_string()),
            (fields.current.clone(), report.current_a.to_string()),
            (fields.power.clone(), report.power_w.to_string()),
        ]
    }
}

impl fmt::Debug for ThingSpeakReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThingSpeakReporter")
            .field("settings", &self.settings)
            .finish()
    }
}

impl Reporter for ThingSpeakReporter {
    fn send(&mut self, report: &Report) -> Result<u16, TransportError> {
        let mut request = self.agent.get(&self.settings.endpoint);
        for (key, value) in self.query(report) {
            request = request.query(&key, &value);
        }

        match request.call() {
            Ok(response) => {
                let status = response.status();
                let body = read_body(response, status);
                // The update API answers 200 with entry id 0 when it drops an update.
                if body.trim() == "0" {
                    return Err(TransportError::Rejected);
                }
                debug!(status, entry = body.trim(), "Collector accepted update");
                Ok(status)
            }
            Err(ureq::Error::Status(status, response)) => Err(TransportError::Status {
                status,
                body: read_body(response, status),
            }),
            Err(ureq::Error::Transport(err)) => Err(TransportError::Request(err.to_string())),
        }
    }
}

/// Response body as text. A failed read is logged and treated as empty; the
/// status line already decided delivery.
fn read_body(response: ureq::Response, status: u16) -> String {
    response.into_string().unwrap_or_else(|err| {
        warn!(status, error = %err, "Failed to read collector response body");
        String::new()
    })
}
