use crate::occupancy::Occupancy;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatusSuccessResponse {
    pub occupancy: Occupancy,
    pub distance_cm: f64,
    pub valid_distance_samples: usize,
    pub current_a: f64,
    pub power_w: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<LastReportResponse>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LastReportResponse {
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatusErrorResponse {
    pub error_code: StatusErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Ko,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthErrorResponse {
    pub error_code: HealthErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthErrorCode {
    InternalError,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusErrorCode {
    NoData,
    InternalError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_response_omits_last_report_when_none() {
        let response = StatusSuccessResponse {
            occupancy: Occupancy::Occupied,
            distance_cm: 14.0,
            valid_distance_samples: 5,
            current_a: 0.05,
            power_w: 11.25,
            last_report: None,
            timestamp: "2026-01-11T12:30:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize status response");
        assert_eq!(
            value,
            json!({
                "occupancy": "occupied",
                "distance_cm": 14.0,
                "valid_distance_samples": 5,
                "current_a": 0.05,
                "power_w": 11.25,
                "timestamp": "2026-01-11T12:30:00Z"
            })
        );
    }

    #[test]
    fn failed_report_carries_error_without_status_code() {
        let response = LastReportResponse {
            delivered: false,
            status_code: None,
            error: Some("collector rejected the update".to_string()),
            timestamp: "2026-01-11T12:31:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize last report");
        assert_eq!(
            value,
            json!({
                "delivered": false,
                "error": "collector rejected the update",
                "timestamp": "2026-01-11T12:31:00Z"
            })
        );
    }

    #[test]
    fn error_response_uses_screaming_snake_case_code() {
        let response = StatusErrorResponse {
            error_code: StatusErrorCode::NoData,
            error_message: "no tick yet".to_string(),
            timestamp: "2026-01-11T12:32:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize error response");
        assert_eq!(
            value,
            json!({
                "error_code": "NO_DATA",
                "error_message": "no tick yet",
                "timestamp": "2026-01-11T12:32:00Z"
            })
        );
    }

    #[test]
    fn health_success_response_serializes_status() {
        let response = HealthSuccessResponse {
            status: HealthStatus::Degraded,
            timestamp: "2026-01-11T12:33:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize health success response");
        assert_eq!(
            value,
            json!({
                "status": "degraded",
                "timestamp": "2026-01-11T12:33:00Z"
            })
        );
    }

    #[test]
    fn health_error_response_uses_screaming_snake_case_code() {
        let response = HealthErrorResponse {
            error_code: HealthErrorCode::InternalError,
            error_message: "boom".to_string(),
            timestamp: "2026-01-11T12:34:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize health error response");
        assert_eq!(
            value,
            json!({
                "error_code": "INTERNAL_ERROR",
                "error_message": "boom",
                "timestamp": "2026-01-11T12:34:00Z"
            })
        );
    }
}
