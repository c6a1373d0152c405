//! Data model: `Info`, `Operation`, `MetricValue`, `Distribution`, `Money`,
//! and the plain request/response shapes the caches hold (spec.md §3).

pub mod distribution;
pub mod info;
pub mod messages;
pub mod metric_value;
pub mod money;
pub mod operation;

pub use distribution::Distribution;
pub use info::{Info, UNSET_SIZE};
pub use messages::{
    AllocateQuotaRequest, AllocateQuotaResponse, CheckError, CheckErrorCode, CheckRequest,
    CheckResponse, QuotaError, QuotaErrorCode, QuotaMode, QuotaOperation, QuotaProperties,
    ReportRequest, ReportResponse,
};
pub use metric_value::{MetricKind, MetricValue, MetricValueKind};
pub use money::Money;
pub use operation::{Importance, KindsMap, LogEntry, MetricValueSet, Operation};
