//! C11: the RPC boundary to the remote Service Control backend.
//!
//! The wire codec and transport (HTTP/gRPC) are explicitly out of scope
//! (spec.md §1); this crate only needs a seam to call through. Grounded in
//! the shape of `endpoints_management/control/client.py`'s `Client.check`/
//! `allocate_quota`/`report` methods (synchronous calls taking and
//! returning the plain request/response types), adapted to a `Send + Sync`
//! trait object so the scheduler thread can hold one behind an `Arc`
//! without committing this crate to any particular RPC stack.

use crate::error::TransportError;
use crate::model::{
    AllocateQuotaRequest, AllocateQuotaResponse, CheckRequest, CheckResponse, ReportRequest, ReportResponse,
};

/// Sends requests the aggregators could not satisfy from cache to the
/// remote Service Control backend.
///
/// Implementations run on the scheduler's background thread; they may
/// block, but `report` in particular should not block indefinitely, since
/// an unbounded report queue grows until [`ReportBatcher::flush`] is called
/// again.
///
/// [`ReportBatcher::flush`]: crate::aggregator::ReportBatcher::flush
pub trait Transport: Send + Sync {
    fn check(&self, req: &CheckRequest) -> Result<CheckResponse, TransportError>;
    fn allocate_quota(&self, req: &AllocateQuotaRequest) -> Result<AllocateQuotaResponse, TransportError>;
    fn report(&self, req: &ReportRequest) -> Result<ReportResponse, TransportError>;
}
