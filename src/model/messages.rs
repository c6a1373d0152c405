//! Plain Rust request/response shapes held by the caches.
//!
//! The wire codec is out of scope (spec.md §1 "Out of scope") but the core
//! still needs typed values to cache and merge. These mirror the field
//! names spec.md §6 guarantees on outbound requests
//! (`serviceName`, `operationId`/`operationName`/`consumerId`,
//! `startTime`/`endTime`, `quotaMode`) without committing to any wire
//! format; hosts that want to log or snapshot them get `serde` derives for
//! free, but this crate never produces wire bytes itself.

use super::operation::Operation;
use serde::{Deserialize, Serialize};

/// Optional quota context carried on a `CheckRequest`'s operation. Its
/// canonical textual representation feeds into the check fingerprint
/// (spec.md §4.1 step 5).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaProperties {
    pub quota_mode: Option<String>,
    pub limit_by_ids: Vec<(String, String)>,
}

impl QuotaProperties {
    /// A stable, order-independent textual form used only for fingerprint
    /// input -- not a wire format.
    pub fn canonical_text(&self) -> String {
        let mut ids = self.limit_by_ids.clone();
        ids.sort();
        let ids_text = ids
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("mode={}|ids={}", self.quota_mode.as_deref().unwrap_or(""), ids_text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub service_name: String,
    pub operation: Operation,
    pub quota_properties: Option<QuotaProperties>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckErrorCode {
    Unspecified,
    ApiKeyInvalid,
    ApiKeyExpired,
    ApiKeyNotFound,
    ProjectDeleted,
    BillingDisabled,
    ProjectInvalid,
    ServiceNotActivated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckError {
    pub code: CheckErrorCode,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckResponse {
    pub check_errors: Vec<CheckError>,
}

impl CheckResponse {
    pub fn is_ok(&self) -> bool {
        self.check_errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaMode {
    BestEffort,
    Normal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaOperation {
    pub operation_id: String,
    pub method_name: String,
    pub consumer_id: String,
    pub quota_mode: QuotaMode,
    pub labels: std::collections::BTreeMap<String, String>,
    pub quota_metrics: Vec<super::operation::MetricValueSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateQuotaRequest {
    pub service_name: String,
    pub allocate_operation: QuotaOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaErrorCode {
    Unspecified,
    ResourceExhausted,
    BillingNotActive,
    ProjectDeleted,
    ApiKeyInvalid,
    ApiKeyExpired,
    ProjectStatusUnavailable,
    ServiceStatusUnavailable,
    BillingStatusUnavailable,
    QuotaSystemUnavailable,
}

impl QuotaErrorCode {
    /// The "fail open" family: backend/system unavailability that should
    /// never be treated as a hard denial (spec.md §4.3, §6 HTTP mapping).
    pub fn is_fail_open(self) -> bool {
        matches!(
            self,
            QuotaErrorCode::Unspecified
                | QuotaErrorCode::ProjectStatusUnavailable
                | QuotaErrorCode::ServiceStatusUnavailable
                | QuotaErrorCode::BillingStatusUnavailable
                | QuotaErrorCode::QuotaSystemUnavailable
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaError {
    pub code: QuotaErrorCode,
    pub subject: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocateQuotaResponse {
    pub operation_id: String,
    pub allocate_errors: Vec<QuotaError>,
}

impl AllocateQuotaResponse {
    pub fn is_positive(&self) -> bool {
        self.allocate_errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub service_name: String,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportResponse {
    pub report_infos: Vec<String>,
}
