//! C2: `QuotaAggregator` (spec.md §4.3).
//!
//! Ground truth: `endpoints_management/control/quota_request.py`. A cache
//! miss inserts a temporary positive response and stages the real request
//! for the scheduler to send, so concurrent callers racing on the same
//! operation all see an immediate (optimistic) allow rather than piling up
//! behind the in-flight RPC -- "to avoid sending concurrent allocate_quota
//! from concurrent requests, insert a temporary positive response in the
//! cache" (`Aggregator.allocate_quota`). A refresh against a cached
//! *negative* response switches the refresh operation to `NORMAL` mode
//! instead of `BEST_EFFORT`, since best-effort would just replay the same
//! failure; the original tracks this via a second, inconsistently-updated
//! timestamp field alongside `last_check_time` -- collapsed here into the
//! one field both `should_refresh`/`should_expire` read, since nothing in
//! spec.md calls for the original's split.

use crate::clock::Clock;
use crate::config::QuotaAggregatorConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{sign_operation, Signature};
use crate::model::{
    AllocateQuotaRequest, AllocateQuotaResponse, KindsMap, MetricValueSet, QuotaMode, QuotaOperation,
};
use parking_lot::Mutex;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Merges repeated `QuotaOperation`s for the same cached signature,
/// DELTA-summing their metric values (`quota_request.py
/// QuotaOperationAggregator`).
#[derive(Clone)]
struct QuotaOperationAggregator {
    template: QuotaOperation,
    metric_values: HashMap<String, crate::model::MetricValue>,
}

impl QuotaOperationAggregator {
    fn new(op: QuotaOperation) -> Self {
        let mut agg = Self {
            template: QuotaOperation {
                quota_metrics: Vec::new(),
                ..op.clone()
            },
            metric_values: HashMap::new(),
        };
        agg.merge_operation(&op);
        agg
    }

    fn merge_operation(&mut self, op: &QuotaOperation) {
        for set in &op.quota_metrics {
            let Some(first) = set.values.first() else { continue };
            match self.metric_values.get(&set.metric_name) {
                Some(prior) => {
                    if let Ok(merged) = crate::model::metric_value::merge(
                        crate::model::MetricKind::Delta,
                        prior,
                        first,
                    ) {
                        self.metric_values.insert(set.metric_name.clone(), merged);
                    }
                }
                None => {
                    self.metric_values.insert(set.metric_name.clone(), first.clone());
                }
            }
        }
    }

    fn as_quota_operation(&self) -> QuotaOperation {
        let mut op = self.template.clone();
        op.quota_metrics = self
            .metric_values
            .iter()
            .map(|(name, value)| MetricValueSet {
                metric_name: name.clone(),
                values: vec![value.clone()],
            })
            .collect();
        op
    }
}

#[derive(Clone)]
struct CachedItem {
    response: AllocateQuotaResponse,
    last_request: AllocateQuotaRequest,
    last_check_time: DateTime<Utc>,
    is_in_flight: bool,
    op_aggregator: Option<QuotaOperationAggregator>,
}

impl CachedItem {
    fn is_positive(&self) -> bool {
        self.response.is_positive()
    }

    fn extract_request(&mut self, service_name: &str) -> AllocateQuotaRequest {
        match self.op_aggregator.take() {
            Some(agg) => AllocateQuotaRequest {
                service_name: service_name.to_string(),
                allocate_operation: agg.as_quota_operation(),
            },
            None => self.last_request.clone(),
        }
    }
}

struct State {
    cache: Option<crate::cache::Cache<Signature, CachedItem>>,
    out: Vec<AllocateQuotaRequest>,
}

/// Caches and aggregates `AllocateQuotaRequest`s ahead of a remote quota
/// backend, with optimistic positive responses on first contact.
pub struct QuotaAggregator {
    service_name: String,
    config: QuotaAggregatorConfig,
    clock: Clock,
    state: Mutex<State>,
}

impl QuotaAggregator {
    pub fn new(service_name: impl Into<String>, config: QuotaAggregatorConfig, clock: Clock) -> Self {
        let cache = if config.cache_entries > 0 {
            Some(crate::cache::Cache::new(config.cache_entries as usize))
        } else {
            None
        };
        Self {
            service_name: service_name.into(),
            config,
            clock,
            state: Mutex::new(State { cache, out: Vec::new() }),
        }
    }

    fn validate(&self, req: &AllocateQuotaRequest) -> Result<()> {
        if req.service_name != self.service_name {
            return Err(Error::Precondition(format!(
                "service_name {} does not match {}",
                req.service_name, self.service_name
            )));
        }
        Ok(())
    }

    fn should_refresh(&self, item: &CachedItem, now: DateTime<Utc>) -> bool {
        now - item.last_check_time >= Duration::milliseconds(self.config.flush_interval_ms)
    }

    fn should_expire(&self, item: &CachedItem, now: DateTime<Utc>) -> bool {
        now - item.last_check_time >= Duration::milliseconds(self.config.expiration_ms)
    }

    /// Returns the response to use immediately: a fresh optimistic positive
    /// on first contact, the cached response otherwise (merging the
    /// incoming operation into it when positive). `None` only when caching
    /// is disabled, signaling the caller to send `req` itself.
    pub fn allocate_quota(&self, req: &AllocateQuotaRequest) -> Result<Option<AllocateQuotaResponse>> {
        self.validate(req)?;
        let mut state = self.state.lock();
        let Some(cache) = state.cache.as_mut() else {
            return Ok(None);
        };

        let signature = sign_operation(
            &operation_view(&req.allocate_operation),
            None,
        );
        let now = (self.clock)();

        if cache.get(&signature).is_none() {
            let temp_response = AllocateQuotaResponse {
                operation_id: req.allocate_operation.operation_id.clone(),
                allocate_errors: Vec::new(),
            };
            cache.insert(
                signature,
                CachedItem {
                    response: temp_response.clone(),
                    last_request: req.clone(),
                    last_check_time: now,
                    is_in_flight: true,
                    op_aggregator: None,
                },
            );
            state.out.push(req.clone());
            return Ok(Some(temp_response));
        }

        let service_name = self.service_name.clone();
        let item = cache.get_mut(&signature).unwrap();

        if !item.is_in_flight && self.should_refresh(&item, now) {
            item.is_in_flight = true;
            item.last_check_time = now;
            let mut refresh_request = item.extract_request(&service_name);
            if !item.is_positive() {
                refresh_request.allocate_operation.quota_mode = QuotaMode::Normal;
            }
            state.out.push(refresh_request);
        }

        if item.is_positive() {
            match &mut item.op_aggregator {
                Some(agg) => agg.merge_operation(&req.allocate_operation),
                None => item.op_aggregator = Some(QuotaOperationAggregator::new(req.allocate_operation.clone())),
            }
        }

        Ok(Some(item.response.clone()))
    }

    /// Records the response to `req` as sent by the remote backend.
    pub fn add_response(&self, req: &AllocateQuotaRequest, resp: AllocateQuotaResponse) -> Result<()> {
        self.validate(req)?;
        let mut state = self.state.lock();
        let Some(cache) = state.cache.as_mut() else {
            return Ok(());
        };
        let signature = sign_operation(&operation_view(&req.allocate_operation), None);
        let now = (self.clock)();

        if let Some(item) = cache.get_mut(&signature) {
            item.last_check_time = now;
            item.response = resp;
            item.is_in_flight = false;
            item.last_request = req.clone();
        } else {
            cache.insert(
                signature,
                CachedItem {
                    response: resp,
                    last_request: req.clone(),
                    last_check_time: now,
                    is_in_flight: false,
                    op_aggregator: None,
                },
            );
        }
        Ok(())
    }

    /// Drains requests staged by [`QuotaAggregator::allocate_quota`] (both
    /// first-contact admissions and periodic refreshes), and purges cache
    /// entries that have gone fully stale (`_should_expire`; these are
    /// discarded, not salvaged -- an expired quota response carries no
    /// pending aggregated cost worth resending on its own).
    pub fn flush(&self) -> Vec<AllocateQuotaRequest> {
        let mut state = self.state.lock();
        let Some(cache) = state.cache.as_mut() else {
            return Vec::new();
        };
        let now = (self.clock)();
        let expiration_ms = self.config.expiration_ms;
        cache.evict_expired(|item| now - item.last_check_time >= Duration::milliseconds(expiration_ms));
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

/// Builds the `Operation`-shaped view that [`sign_operation`] expects from
/// a `QuotaOperation`, since quota signing hashes the same fields (method
/// name, consumer, labels, metric value sets) under different field names
/// (`quota_request.py sign`).
fn operation_view(op: &QuotaOperation) -> crate::model::Operation {
    crate::model::Operation {
        operation_id: op.operation_id.clone(),
        operation_name: op.method_name.clone(),
        consumer_id: op.consumer_id.clone(),
        start_time: None,
        end_time: None,
        importance: crate::model::Importance::Low,
        labels: op.labels.clone(),
        metric_value_sets: op.quota_metrics.clone(),
        log_entries: Vec::new(),
    }
}
