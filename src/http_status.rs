//! Error-to-HTTP-status mapping for hosts that surface these responses
//! directly to an inbound caller (spec.md §6).
//!
//! Ground truth: `endpoints_management/control/quota_request.py`'s
//! `_QUOTA_ERROR_CONVERSION` table and `convert_response`, extended to
//! cover check errors the same way. Quota's backend-unavailable family
//! fails open to `200 OK` rather than surfacing a 5xx -- "fail open for
//! internal server errors" in the original's comment above that table --
//! and this crate does the same for check transport failures, per spec.md
//! §7's fail-open philosophy.

use crate::model::{CheckErrorCode, QuotaErrorCode};

/// `(status, message)`, mirroring `convert_response`'s return shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpStatus {
    pub code: u16,
    pub message: String,
}

fn template_for_check(code: CheckErrorCode) -> (u16, &'static str) {
    match code {
        CheckErrorCode::Unspecified => (200, ""),
        CheckErrorCode::ApiKeyInvalid => (400, "API key not valid. Please pass a valid API key."),
        CheckErrorCode::ApiKeyExpired => (400, "API key expired. Please renew the API key."),
        CheckErrorCode::ApiKeyNotFound => (400, "API key not found."),
        CheckErrorCode::ProjectDeleted => (403, "Project {project_id} has been deleted"),
        CheckErrorCode::BillingDisabled => (403, "Project {project_id} has billing disabled. Please enable it"),
        CheckErrorCode::ProjectInvalid => (403, "Project {project_id} is not valid"),
        CheckErrorCode::ServiceNotActivated => (403, "Service not activated for project {project_id}"),
    }
}

fn template_for_quota(code: QuotaErrorCode) -> (u16, &'static str) {
    match code {
        QuotaErrorCode::ResourceExhausted => (429, "Quota allocation failed"),
        QuotaErrorCode::BillingNotActive => (403, "Project {project_id} has billing disabled. Please enable it"),
        QuotaErrorCode::ProjectDeleted => (403, "Project {project_id} has been deleted"),
        QuotaErrorCode::ApiKeyInvalid => (400, "API not valid. Please pass a valid API key"),
        QuotaErrorCode::ApiKeyExpired => (400, "API key expired. Please renew the API key"),
        // fail open for internal server errors
        QuotaErrorCode::Unspecified
        | QuotaErrorCode::ProjectStatusUnavailable
        | QuotaErrorCode::ServiceStatusUnavailable
        | QuotaErrorCode::BillingStatusUnavailable
        | QuotaErrorCode::QuotaSystemUnavailable => (200, ""),
    }
}

fn render(template: &str, project_id: &str, detail: &str) -> String {
    if !template.contains('{') {
        return template.to_string();
    }
    template.replace("{project_id}", project_id).replace("{detail}", detail)
}

/// Maps a single check error to an HTTP status, substituting `project_id`
/// into the message template when present.
pub fn check_error_status(code: CheckErrorCode, project_id: &str, detail: &str) -> HttpStatus {
    let (status, template) = template_for_check(code);
    HttpStatus {
        code: status,
        message: render(template, project_id, detail),
    }
}

/// Maps a single quota error to an HTTP status. Only the first error in an
/// `AllocateQuotaResponse` is ever converted, matching the original's "only
/// allocate_quota the first error for now, as per ESP" comment -- ESP
/// itself only ever has one error to report back to a caller.
pub fn quota_error_status(code: QuotaErrorCode, project_id: &str, detail: &str) -> HttpStatus {
    let (status, template) = template_for_quota(code);
    HttpStatus {
        code: status,
        message: render(template, project_id, detail),
    }
}

/// `200 OK` with an empty message, the value every conversion function
/// returns when there is nothing to report.
pub fn ok() -> HttpStatus {
    HttpStatus { code: 200, message: String::new() }
}

/// A transport failure always fails open: log it, never surface a 5xx to
/// the caller (spec.md §7).
pub fn transport_failure() -> HttpStatus {
    ok()
}
