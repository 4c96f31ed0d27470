use crate::{
    error::{ApplyError, ProbeError},
    hotspot::StatusReport,
    services::{
        apply::ApplyOutcome,
        devices::DeviceListing,
        journal::ApplyRecord,
    },
};
use actix_web::{HttpResponse, http::StatusCode};
use anyhow::Result;
use log::error;
use serde::Serialize;
use serde_json::json;

/// Trait for converting service results into HTTP responses
pub trait ServiceResultResponse {
    fn into_response(self) -> HttpResponse;
}

impl ServiceResultResponse for DeviceListing {
    fn into_response(self) -> HttpResponse {
        json_response(StatusCode::OK, &self)
    }
}

impl ServiceResultResponse for Vec<ApplyRecord> {
    fn into_response(self) -> HttpResponse {
        json_response(StatusCode::OK, &self)
    }
}

impl ServiceResultResponse for Result<StatusReport, ProbeError> {
    fn into_response(self) -> HttpResponse {
        match self {
            Ok(report) => json_response(StatusCode::OK, &report),
            Err(e) => json_response(
                StatusCode::GATEWAY_TIMEOUT,
                &json!({ "error": e.to_string() }),
            ),
        }
    }
}

/// Outcome of a settings submission
///
/// * `Applied` - 200
/// * `Rejected` - 422 with the offending fields
/// * `ConfirmationRequired` - 409, resubmit with `confirmed`
/// * `Failed` - 502 with the last known status
impl ServiceResultResponse for ApplyOutcome {
    fn into_response(self) -> HttpResponse {
        let state = self.state();

        match self {
            ApplyOutcome::Rejected { report } => json_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                &json!({ "state": state, "errors": report.errors, "warnings": report.warnings }),
            ),
            ApplyOutcome::ConfirmationRequired { change } => json_response(
                StatusCode::CONFLICT,
                &json!({
                    "state": state,
                    "change": change,
                    "message": "this change interrupts the hotspot carrying this session, resubmit with confirmation",
                }),
            ),
            ApplyOutcome::Applied {
                change,
                status,
                warnings,
            } => json_response(
                StatusCode::OK,
                &json!({ "state": state, "change": change, "status": status, "warnings": warnings }),
            ),
            ApplyOutcome::Failed { error, last_status } => json_response(
                failure_status(&error),
                &json!({ "state": state, "error": error.to_string(), "lastStatus": last_status }),
            ),
        }
    }
}

fn failure_status(error: &ApplyError) -> StatusCode {
    match error {
        ApplyError::Load(_) | ApplyError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ApplyError::Applier(_) | ApplyError::ProbeTimeout { .. } | ApplyError::Persist(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

fn json_response(status: StatusCode, body: &impl Serialize) -> HttpResponse {
    match serde_json::to_string(body) {
        Ok(json) => HttpResponse::build(status)
            .content_type("application/json")
            .body(json),
        Err(e) => {
            error!("failed to serialize response: {e:#}");
            HttpResponse::InternalServerError().body("failed to serialize response")
        }
    }
}

/// Handle Result and convert the data to a Response
///
/// # Arguments
/// * `result` - The Result to handle
/// * `operation` - Context message describing the operation
///
/// # Returns
/// * `HttpResponse` - The ServiceResultResponse or HttpResponse::InternalServerError
pub fn handle_service_result<T>(result: Result<T>, operation: &str) -> HttpResponse
where
    T: ServiceResultResponse,
{
    match result {
        Ok(data) => data.into_response(),
        Err(e) => {
            error!("{operation} failed: {e:#}");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}
