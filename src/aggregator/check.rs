//! C1: `CheckAggregator` (spec.md §4.2).
//!
//! Ground truth: `google/scc/aggregators/check_request.py`. The cache is a
//! TTL cache keyed by [`crate::fingerprint::sign_operation`]; entries that
//! expire are salvaged into an outbound queue rather than dropped
//! (`DequeOutTTLCache.out_deque` in `google/scc/caches.py`), drained by
//! [`CheckAggregator::flush`]. `_handle_cached_response`'s three-way
//! branch (errors-and-fresh / errors-and-stale / ok-and-fresh-or-stale) is
//! `handle_cached_response` below.

use crate::clock::Clock;
use crate::config::CheckAggregatorConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{sign_operation, Signature};
use crate::model::{CheckRequest, CheckResponse, KindsMap};
use parking_lot::Mutex;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use super::operation_aggregator::OperationAggregator;

#[derive(Clone)]
struct CachedItem {
    response: CheckResponse,
    last_check_time: DateTime<Utc>,
    is_flushing: bool,
    op_aggregator: Option<OperationAggregator>,
}

impl CachedItem {
    fn update_request(&mut self, op: &crate::model::Operation, kinds: &KindsMap) -> Result<()> {
        match &mut self.op_aggregator {
            Some(agg) => agg.add(op).map_err(|e| Error::Precondition(e.to_string())),
            None => {
                let agg = OperationAggregator::new(op.clone(), kinds.clone())
                    .map_err(|e| Error::Precondition(e.to_string()))?;
                self.op_aggregator = Some(agg);
                Ok(())
            }
        }
    }

    fn extract_request(&mut self, service_name: &str) -> Option<CheckRequest> {
        let agg = self.op_aggregator.take()?;
        Some(CheckRequest {
            service_name: service_name.to_string(),
            operation: agg.as_operation(),
            quota_properties: None,
        })
    }
}

struct State {
    cache: Option<crate::cache::Cache<Signature, CachedItem>>,
    out: Vec<CheckRequest>,
}

/// Caches and aggregates `CheckRequest`s ahead of a remote Check backend.
///
/// Thread safe: every public method locks the same internal mutex briefly
/// and does no I/O while holding it, matching the original's `LockedObject`
/// contract ("no i/o operations are performed, so any waiting threads see
/// minimal delays", `report_request.py Aggregator.report`).
pub struct CheckAggregator {
    service_name: String,
    config: CheckAggregatorConfig,
    kinds: KindsMap,
    clock: Clock,
    state: Mutex<State>,
}

impl CheckAggregator {
    pub fn new(service_name: impl Into<String>, config: CheckAggregatorConfig, kinds: KindsMap, clock: Clock) -> Self {
        let cache = if config.cache_entries > 0 {
            Some(crate::cache::Cache::new(config.cache_entries as usize))
        } else {
            None
        };
        Self {
            service_name: service_name.into(),
            config,
            kinds,
            clock,
            state: Mutex::new(State { cache, out: Vec::new() }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn validate(&self, req: &CheckRequest) -> Result<()> {
        if req.service_name != self.service_name {
            return Err(Error::Precondition(format!(
                "service_name {} does not match {}",
                req.service_name, self.service_name
            )));
        }
        Ok(())
    }

    /// Returns `Some(response)` if an applicable cached response exists, or
    /// `None` to signal the caller to send `req` to the remote backend
    /// itself. `importance == High` always signals a direct send (spec.md
    /// §4.2 importance bypass).
    pub fn check(&self, req: &CheckRequest) -> Result<Option<CheckResponse>> {
        self.validate(req)?;
        if !req.operation.is_low_importance() {
            return Ok(None);
        }

        let mut state = self.state.lock();
        let Some(cache) = state.cache.as_mut() else {
            return Ok(None);
        };

        let signature = sign_operation(&req.operation, req.quota_properties.as_ref());
        let now = (self.clock)();
        let kinds = self.kinds.clone();
        let config = self.config;
        let Some(item) = cache.get_mut(&signature) else {
            return Ok(None);
        };

        if !item.response.is_ok() {
            if is_current_with(&item, now, config.flush_interval_ms) {
                return Ok(Some(item.response.clone()));
            }
            item.last_check_time = now;
            return Ok(None);
        }

        item.update_request(&req.operation, &kinds)?;
        if is_current_with(&item, now, config.flush_interval_ms) {
            return Ok(Some(item.response.clone()));
        }
        if item.is_flushing {
            warn!(service = %self.service_name, "last check refresh did not complete before expiration");
        }
        item.is_flushing = true;
        item.last_check_time = now;
        Ok(None)
    }

    /// Records the response to `req` as sent by the remote backend.
    pub fn add_response(&self, req: &CheckRequest, resp: CheckResponse) -> Result<()> {
        self.validate(req)?;
        let mut state = self.state.lock();
        if state.cache.is_none() {
            return Ok(());
        }
        let signature = sign_operation(&req.operation, req.quota_properties.as_ref());
        let now = (self.clock)();
        let service_name = self.service_name.clone();

        let cache = state.cache.as_mut().unwrap();
        if let Some(item) = cache.get_mut(&signature) {
            item.last_check_time = now;
            item.response = resp;
            item.is_flushing = false;
        } else {
            let evicted = cache.insert(
                signature,
                CachedItem {
                    response: resp,
                    last_check_time: now,
                    is_flushing: false,
                    op_aggregator: None,
                },
            );
            if let Some((_, mut victim)) = evicted {
                if let Some(req) = victim.extract_request(&service_name) {
                    state.out.push(req);
                }
            }
        }
        Ok(())
    }

    /// Drains pending refresh requests: entries whose response has gone
    /// stale past `response_expiration_ms` and that accumulated further
    /// checks since their last send (spec.md §4.2, §5).
    pub fn flush(&self) -> Vec<CheckRequest> {
        let mut state = self.state.lock();
        let Some(cache) = state.cache.as_mut() else {
            return Vec::new();
        };
        let now = (self.clock)();
        let expiration = Duration::milliseconds(self.config.response_expiration_ms);
        let expired = cache.evict_expired(|item| now - item.last_check_time >= expiration);
        let service_name = self.service_name.clone();
        for (_, mut item) in expired {
            if let Some(req) = item.extract_request(&service_name) {
                state.out.push(req);
            }
        }
        std::mem::take(&mut state.out)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        if let Some(cache) = state.cache.as_mut() {
            cache.clear();
        }
        state.out.clear();
    }
}

fn is_current_with(item: &CachedItem, now: DateTime<Utc>, flush_interval_ms: i64) -> bool {
    now - item.last_check_time < Duration::milliseconds(flush_interval_ms)
}
