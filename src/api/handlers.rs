use crate::api::responses::{
    HealthErrorCode, HealthErrorResponse, HealthStatus, HealthSuccessResponse,
    LastReportResponse, StatusErrorCode, StatusErrorResponse, StatusSuccessResponse,
};
use crate::state::{AppState, ReportOutcome, TickSnapshot};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::error;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

pub enum StatusResponse {
    Success(StatusSuccessResponse),
    Error {
        status: StatusCode,
        body: StatusErrorResponse,
    },
}

impl IntoResponse for StatusResponse {
    fn into_response(self) -> Response {
        match self {
            StatusResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            StatusResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_status(State(state): State<Arc<RwLock<AppState>>>) -> impl IntoResponse {
    build_status_response(state)
}

pub enum HealthResponse {
    Success {
        status: StatusCode,
        body: HealthSuccessResponse,
    },
    Error {
        status: StatusCode,
        body: HealthErrorResponse,
    },
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        match self {
            HealthResponse::Success { status, body } => (status, Json(body)).into_response(),
            HealthResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_health(State(state): State<Arc<RwLock<AppState>>>) -> impl IntoResponse {
    build_health_response(state, SystemTime::now())
}

fn build_status_response(state: Arc<RwLock<AppState>>) -> StatusResponse {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return status_internal_error("state lock poisoned while reading latest tick");
        }
    };
    let tick = guard.latest_tick().cloned();
    let report = guard.last_report().cloned();
    drop(guard);

    let Some(tick) = tick else {
        return no_data_response(SystemTime::now());
    };

    let last_report = match report.map(map_report_outcome).transpose() {
        Ok(last_report) => last_report,
        Err(_) => return status_internal_error("timestamp formatting failure"),
    };

    match format_timestamp(tick.timestamp) {
        Ok(timestamp) => StatusResponse::Success(StatusSuccessResponse {
            occupancy: tick.occupancy,
            distance_cm: tick.distance_cm,
            valid_distance_samples: tick.valid_distance_samples,
            current_a: tick.current_a,
            power_w: tick.power_w,
            last_report,
            timestamp,
        }),
        Err(_) => status_internal_error("timestamp formatting failure"),
    }
}

fn map_report_outcome(outcome: ReportOutcome) -> Result<LastReportResponse, TimestampError> {
    let timestamp = format_timestamp(outcome.timestamp())?;
    Ok(match outcome {
        ReportOutcome::Delivered { status_code, .. } => LastReportResponse {
            delivered: true,
            status_code: Some(status_code),
            error: None,
            timestamp,
        },
        ReportOutcome::Failed { reason, .. } => LastReportResponse {
            delivered: false,
            status_code: None,
            error: Some(reason),
            timestamp,
        },
    })
}

fn no_data_response(timestamp: SystemTime) -> StatusResponse {
    match format_timestamp(timestamp) {
        Ok(formatted) => StatusResponse::Error {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: StatusErrorResponse {
                error_code: StatusErrorCode::NoData,
                error_message: "No reading available yet".to_string(),
                timestamp: formatted,
            },
        },
        Err(_err) => status_internal_error("timestamp formatting failure"),
    }
}

fn status_internal_error(message: &str) -> StatusResponse {
    error!(
        message = message,
        "Internal error while handling /api/status"
    );
    StatusResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: StatusErrorResponse {
            error_code: StatusErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: fallback_timestamp(),
        },
    }
}

fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

fn fallback_timestamp() -> String {
    format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format error timestamp");
        "1970-01-01T00:00:00Z".to_string()
    })
}

fn build_health_response(state: Arc<RwLock<AppState>>, now: SystemTime) -> HealthResponse {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return health_internal_error("state lock poisoned while reading latest tick");
        }
    };

    let status = derive_health_status(
        guard.latest_tick(),
        guard.last_report(),
        now,
        guard.stale_after(),
    );
    drop(guard);

    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => {
            return health_internal_error("timestamp formatting failure");
        }
    };

    let status_code = match status {
        HealthStatus::Ko => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
    };

    HealthResponse::Success {
        status: status_code,
        body: HealthSuccessResponse { status, timestamp },
    }
}

fn derive_health_status(
    tick: Option<&TickSnapshot>,
    report: Option<&ReportOutcome>,
    now: SystemTime,
    stale_after: Duration,
) -> HealthStatus {
    let Some(tick) = tick else {
        return HealthStatus::Ko;
    };

    // A timestamp ahead of `now` counts as fresh.
    let age = now.duration_since(tick.timestamp).unwrap_or_default();
    if age > stale_after {
        return HealthStatus::Ko;
    }

    let report_failed = report.is_some_and(|outcome| !outcome.is_delivered());
    if tick.valid_distance_samples == 0 || report_failed {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    }
}

fn health_internal_error(message: &str) -> HealthResponse {
    error!(
        message = message,
        "Internal error while handling /api/health"
    );
    HealthResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: HealthErrorResponse {
            error_code: HealthErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: fallback_timestamp(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_default;
    use crate::occupancy::Occupancy;
    use crate::state::DEFAULT_STALE_AFTER;
    use std::time::UNIX_EPOCH;

    fn tick_at(secs: u64, valid_distance_samples: usize) -> TickSnapshot {
        TickSnapshot {
            distance_cm: 14.0,
            valid_distance_samples,
            occupancy: Occupancy::Occupied,
            current_a: 0.05,
            power_w: 11.25,
            timestamp: UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    fn state_with(tick: Option<TickSnapshot>, report: Option<ReportOutcome>) -> Arc<RwLock<AppState>> {
        state_from(AppState::new(), tick, report)
    }

    fn state_from(
        mut app_state: AppState,
        tick: Option<TickSnapshot>,
        report: Option<ReportOutcome>,
    ) -> Arc<RwLock<AppState>> {
        if let Some(tick) = tick {
            app_state.set_tick(tick);
        }
        if let Some(report) = report {
            app_state.set_report(report);
        }
        Arc::new(RwLock::new(app_state))
    }

    fn poisoned_state() -> Arc<RwLock<AppState>> {
        let state = Arc::new(RwLock::new(AppState::new()));
        let state_for_thread = Arc::clone(&state);
        let _ = std::thread::spawn(move || {
            let _guard = state_for_thread.write().expect("lock for poison");
            panic!("poison lock");
        })
        .join();
        state
    }

    #[test]
    fn status_handler_returns_latest_tick() {
        let state = state_with(
            Some(tick_at(1, 5)),
            Some(ReportOutcome::Delivered {
                status_code: 200,
                timestamp: UNIX_EPOCH + Duration::from_secs(1),
            }),
        );

        let response = build_status_response(state);

        match response {
            StatusResponse::Success(body) => {
                assert_eq!(body.occupancy, Occupancy::Occupied);
                assert_eq!(body.distance_cm, 14.0);
                assert_eq!(body.power_w, 11.25);
                assert_eq!(body.timestamp, "1970-01-01T00:00:01Z");
                assert_eq!(
                    body.last_report,
                    Some(LastReportResponse {
                        delivered: true,
                        status_code: Some(200),
                        error: None,
                        timestamp: "1970-01-01T00:00:01Z".to_string(),
                    })
                );
            }
            StatusResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[test]
    fn status_handler_returns_no_data_before_first_tick() {
        let state = state_with(None, None);

        let response = build_status_response(state);

        match response {
            StatusResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body.error_code, StatusErrorCode::NoData);
            }
            StatusResponse::Success(_) => {
                panic!("expected no data error response");
            }
        }
    }

    #[test]
    fn status_handler_returns_internal_error_when_lock_poisoned() {
        let response = build_status_response(poisoned_state());

        match response {
            StatusResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body.error_code, StatusErrorCode::InternalError);
                assert_eq!(body.error_message, "Internal server error");
            }
            StatusResponse::Success(_) => {
                panic!("expected internal error response");
            }
        }
    }

    fn expect_health(response: HealthResponse) -> (StatusCode, HealthSuccessResponse) {
        match response {
            HealthResponse::Success { status, body } => (status, body),
            HealthResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[test]
    fn health_handler_returns_ok_for_fresh_tick() {
        let state = state_with(Some(tick_at(2, 5)), None);

        let (status, body) = expect_health(build_health_response(
            state,
            UNIX_EPOCH + Duration::from_secs(3),
        ));

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, HealthStatus::Ok);
        assert_eq!(body.timestamp, "1970-01-01T00:00:03Z");
    }

    #[test]
    fn health_handler_returns_degraded_when_window_empty() {
        let state = state_with(Some(tick_at(2, 0)), None);

        let (status, body) = expect_health(build_health_response(
            state,
            UNIX_EPOCH + Duration::from_secs(3),
        ));

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, HealthStatus::Degraded);
    }

    #[test]
    fn health_handler_returns_degraded_when_last_report_failed() {
        let state = state_with(
            Some(tick_at(2, 5)),
            Some(ReportOutcome::Failed {
                reason: "request failed: timeout".to_string(),
                timestamp: UNIX_EPOCH,
            }),
        );

        let (_, body) = expect_health(build_health_response(
            state,
            UNIX_EPOCH + Duration::from_secs(3),
        ));

        assert_eq!(body.status, HealthStatus::Degraded);
    }

    #[test]
    fn health_handler_returns_ko_when_stale() {
        let state = state_with(Some(tick_at(2, 5)), None);

        let (status, body) = expect_health(build_health_response(
            state,
            UNIX_EPOCH + Duration::from_secs(2) + DEFAULT_STALE_AFTER + Duration::from_millis(1),
        ));

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, HealthStatus::Ko);
    }

    #[test]
    fn health_handler_tolerates_report_timeout_between_ticks() -> Result<(), Box<dyn std::error::Error>> {
        let config = load_default()?;
        let timeout = config.thingspeak().timeout;
        let sampling = Duration::from_millis(500);
        let state = state_from(
            AppState::new().with_stale_after(config.stale_after()),
            Some(tick_at(2, 5)),
            Some(ReportOutcome::Failed {
                reason: "request failed: timed out".to_string(),
                timestamp: UNIX_EPOCH + Duration::from_secs(2),
            }),
        );
        let now = UNIX_EPOCH + Duration::from_secs(2) + timeout + Duration::from_secs(1) + sampling;

        let (status, body) = expect_health(build_health_response(state, now));

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, HealthStatus::Degraded);
        Ok(())
    }

    #[test]
    fn health_handler_returns_ko_before_first_tick() {
        let state = state_with(None, None);

        let (status, body) = expect_health(build_health_response(
            state,
            UNIX_EPOCH + Duration::from_secs(6),
        ));

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, HealthStatus::Ko);
        assert_eq!(body.timestamp, "1970-01-01T00:00:06Z");
    }

    #[test]
    fn health_handler_returns_internal_error_when_lock_poisoned() {
        let response = build_health_response(
            poisoned_state(),
            UNIX_EPOCH + Duration::from_secs(5),
        );

        match response {
            HealthResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body.error_code, HealthErrorCode::InternalError);
                assert_eq!(body.error_message, "Internal server error");
            }
            HealthResponse::Success { .. } => {
                panic!("expected internal error response");
            }
        }
    }
}
