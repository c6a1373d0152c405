//! `Info`: the input record external collaborators (the HTTP adapter) hand
//! to this crate for a single API call.
//!
//! `consumer_id` derivation is a pure function of `Info`, grounded in
//! `google/scc/aggregators/operation.py Info.as_operation`: `api_key:<K>`
//! when an API key is present *and* marked valid, else `project:<P>`.

use super::messages::{AllocateQuotaRequest, CheckRequest, QuotaMode, QuotaOperation, ReportRequest};
use super::metric_value::{MetricValue, MetricValueKind};
use super::operation::{Importance, LogEntry, MetricValueSet, Operation};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel for "not set" on size fields, matching
/// `endpoints_management/control/report_request.py`'s `_UNSET_SIZE`.
pub const UNSET_SIZE: i64 = -1;

/// System label keys the original attaches automatically when building a
/// quota request from `Info` (`label_descriptor.py KnownLabels.SCC_CALLER_IP`
/// / `SCC_REFERER`).
const LABEL_CALLER_IP: &str = "servicecontrol.googleapis.com/caller_ip";
const LABEL_REFERER: &str = "servicecontrol.googleapis.com/referer";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    pub service_name: String,
    pub operation_id: String,
    pub operation_name: String,
    pub consumer_project_number: Option<String>,
    pub api_key: Option<String>,
    pub api_key_valid: bool,
    pub referer: String,
    pub client_ip: String,
    pub platform: String,
    pub protocol: String,
    pub http_method: String,
    pub url: String,
    pub request_size: i64,
    pub response_size: i64,
    pub request_time: Option<DateTime<Utc>>,
    pub backend_time: Option<chrono::Duration>,
    pub overhead_time: Option<chrono::Duration>,
    pub response_code: u32,
    pub auth_issuer: String,
    pub auth_audience: String,
    pub quota_info: BTreeMap<String, i64>,
    pub importance: Importance,
    pub labels: BTreeMap<String, String>,
}

impl Default for Info {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            operation_id: String::new(),
            operation_name: String::new(),
            consumer_project_number: None,
            api_key: None,
            api_key_valid: false,
            referer: String::new(),
            client_ip: String::new(),
            platform: String::new(),
            protocol: String::new(),
            http_method: String::new(),
            url: String::new(),
            request_size: UNSET_SIZE,
            response_size: UNSET_SIZE,
            request_time: None,
            backend_time: None,
            overhead_time: None,
            response_code: 200,
            auth_issuer: String::new(),
            auth_audience: String::new(),
            quota_info: BTreeMap::new(),
            importance: Importance::Low,
            labels: BTreeMap::new(),
        }
    }
}

impl Info {
    /// `api_key:<K>` if an API key is present and valid, else
    /// `project:<P>` from `consumer_project_number`, else empty.
    pub fn consumer_id(&self) -> String {
        match (&self.api_key, self.api_key_valid) {
            (Some(key), true) if !key.is_empty() => format!("api_key:{key}"),
            _ => match &self.consumer_project_number {
                Some(project) if !project.is_empty() => format!("project:{project}"),
                _ => String::new(),
            },
        }
    }

    /// Builds an `Operation` from this `Info`, stamping both timestamps at
    /// `now` (the original's `Info.as_operation(timer=datetime.now)`
    /// stamps `startTime == endTime` at construction; callers that have a
    /// distinct backend/overhead timing window adjust `end_time`
    /// afterward).
    pub fn as_operation(&self, now: DateTime<Utc>) -> Operation {
        Operation {
            operation_id: self.operation_id.clone(),
            operation_name: self.operation_name.clone(),
            consumer_id: self.consumer_id(),
            start_time: Some(now),
            end_time: Some(now),
            importance: self.importance,
            labels: self.labels.clone(),
            metric_value_sets: Vec::new(),
            log_entries: Vec::new(),
        }
    }

    /// `Operation` carrying this `Info`'s `quota_info` as one `int64`
    /// `MetricValueSet` per metric name, for `AllocateQuota` requests
    /// (`endpoints_management/control/quota_request.py
    /// Info.as_allocate_quota_request`).
    pub fn as_quota_operation(&self, now: DateTime<Utc>) -> Operation {
        let mut op = self.as_operation(now);
        op.metric_value_sets = self
            .quota_info
            .iter()
            .map(|(name, cost)| MetricValueSet {
                metric_name: name.clone(),
                values: vec![super::metric_value::MetricValue::new(
                    super::metric_value::MetricValueKind::Int64(*cost),
                )],
            })
            .collect();
        op
    }

    pub fn log_entry(&self, message: impl Into<String>, severity: impl Into<String>, now: DateTime<Utc>) -> LogEntry {
        LogEntry {
            name: self.operation_name.clone(),
            timestamp: now,
            severity: severity.into(),
            message: message.into(),
        }
    }

    fn require_identifying_fields(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(Error::Precondition("Info.service_name must be set".into()));
        }
        if self.operation_id.is_empty() {
            return Err(Error::Precondition("Info.operation_id must be set".into()));
        }
        if self.operation_name.is_empty() {
            return Err(Error::Precondition("Info.operation_name must be set".into()));
        }
        Ok(())
    }

    /// Builds the `CheckRequest` a host sends for this call. `check_request.py`
    /// has no `Info` subclass of its own -- it reuses `operation.Info.as_operation`
    /// directly, so there's no method to mirror beyond this wrapping.
    pub fn as_check_request(&self, now: DateTime<Utc>) -> Result<CheckRequest> {
        self.require_identifying_fields()?;
        Ok(CheckRequest {
            service_name: self.service_name.clone(),
            operation: self.as_operation(now),
            quota_properties: None,
        })
    }

    /// Builds an `AllocateQuotaRequest` from this `Info`, grounded in
    /// `quota_request.py Info.as_allocate_quota_request`: `client_ip`/
    /// `referer` fold into the operation's labels as the well-known
    /// `SCC_CALLER_IP`/`SCC_REFERER` system label keys, `quota_info` becomes
    /// one `int64` `MetricValueSet` per metric name, and the mode always
    /// starts at `BestEffort` (a refresh after a cached negative response is
    /// the only thing that ever promotes it to `Normal`, handled downstream
    /// in `QuotaAggregator`).
    pub fn as_allocate_quota_request(&self, now: DateTime<Utc>) -> Result<AllocateQuotaRequest> {
        self.require_identifying_fields()?;
        let op = self.as_operation(now);
        let mut labels = op.labels;
        if !self.client_ip.is_empty() {
            labels.insert(LABEL_CALLER_IP.to_string(), self.client_ip.clone());
        }
        if !self.referer.is_empty() {
            labels.insert(LABEL_REFERER.to_string(), self.referer.clone());
        }
        let quota_metrics = self
            .quota_info
            .iter()
            .map(|(name, cost)| MetricValueSet {
                metric_name: name.clone(),
                values: vec![MetricValue::new(MetricValueKind::Int64(*cost))],
            })
            .collect();

        Ok(AllocateQuotaRequest {
            service_name: self.service_name.clone(),
            allocate_operation: QuotaOperation {
                operation_id: op.operation_id,
                method_name: op.operation_name,
                consumer_id: op.consumer_id,
                quota_mode: QuotaMode::BestEffort,
                labels,
                quota_metrics,
            },
        })
    }

    /// Builds a single-operation `ReportRequest` carrying this call's
    /// accounting (`report_request.py Info.as_operation`, wrapped the way
    /// `Aggregator.report` expects its argument).
    pub fn as_report_request(&self, now: DateTime<Utc>) -> Result<ReportRequest> {
        self.require_identifying_fields()?;
        Ok(ReportRequest {
            service_name: self.service_name.clone(),
            operations: vec![self.as_operation(now)],
        })
    }
}
