//! C3: `ReportBatcher` (spec.md §4.4).
//!
//! Ground truth: `google/scc/aggregators/report_request.py`. Reports are
//! grouped by [`crate::fingerprint::sign_report_operation`] (method +
//! consumer + labels only -- metric readings are not part of the cache
//! key, so repeated calls to the same method/consumer merge their costs)
//! and batched on flush in groups of [`MAX_OPERATIONS_PER_REQUEST`]
//! (`Aggregator.MAX_OPERATION_COUNT`). `report()` passes every operation
//! straight through, uncached, only when *all* operations in the request
//! are `importance = HIGH` -- `_has_high_important_operation`'s
//! `functools.reduce(AND, ...)` despite its name requires unanimity, not
//! "any", and this reproduces that literally (spec.md §4.4).

use crate::clock::Clock;
use crate::config::ReportAggregatorConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{sign_report_operation, Signature};
use crate::model::{KindsMap, Operation, ReportRequest};
use parking_lot::Mutex;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// The maximum number of operations batched into a single outbound
/// `ReportRequest` (`report_request.py Aggregator.MAX_OPERATION_COUNT`).
pub const MAX_OPERATIONS_PER_REQUEST: usize = 1000;

#[derive(Clone)]
struct Entry {
    aggregator: super::operation_aggregator::OperationAggregator,
    last_written: DateTime<Utc>,
}

struct State {
    cache: Option<crate::cache::Cache<Signature, Entry>>,
    /// Operations salvaged from capacity-driven cache evictions, pending
    /// the next flush alongside whatever expires by TTL.
    pending: Vec<Operation>,
}

/// Aggregates `Report` calls into periodic batched `ReportRequest`s.
pub struct ReportBatcher {
    service_name: String,
    config: ReportAggregatorConfig,
    kinds: KindsMap,
    clock: Clock,
    state: Mutex<State>,
}

impl ReportBatcher {
    pub fn new(service_name: impl Into<String>, config: ReportAggregatorConfig, kinds: KindsMap, clock: Clock) -> Self {
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
            state: Mutex::new(State { cache, pending: Vec::new() }),
        }
    }

    fn validate(&self, req: &ReportRequest) -> Result<()> {
        if req.service_name != self.service_name {
            return Err(Error::Precondition(format!(
                "service_name {} does not match {}",
                req.service_name, self.service_name
            )));
        }
        Ok(())
    }

    /// Stages `req`'s operations for the next flush. Returns `true` if the
    /// request was absorbed; `false` means the caller must send `req`
    /// itself immediately (cache disabled, or every operation in it is
    /// `importance = HIGH`).
    pub fn report(&self, req: &ReportRequest) -> Result<bool> {
        self.validate(req)?;
        let mut state = self.state.lock();
        let Some(cache) = state.cache.as_mut() else {
            return Ok(false);
        };
        if has_only_high_importance_operations(&req.operations) {
            return Ok(false);
        }

        let now = (self.clock)();
        let mut by_signature: HashMap<Signature, &Operation> = HashMap::new();
        for op in &req.operations {
            by_signature.insert(sign_report_operation(op), op);
        }

        for (signature, op) in by_signature {
            if let Some(entry) = cache.get_mut(&signature) {
                entry
                    .aggregator
                    .add(op)
                    .map_err(|e| Error::Precondition(e.to_string()))?;
                entry.last_written = now;
            } else {
                let aggregator = super::operation_aggregator::OperationAggregator::new(op.clone(), self.kinds.clone())
                    .map_err(|e| Error::Precondition(e.to_string()))?;
                let evicted = cache.insert(signature, Entry { aggregator, last_written: now });
                if let Some((_, victim)) = evicted {
                    state.pending.push(victim.aggregator.as_operation());
                }
            }
        }
        Ok(true)
    }

    /// Drains every operation whose batch window has elapsed, batched into
    /// `ReportRequest`s of at most [`MAX_OPERATIONS_PER_REQUEST`] operations
    /// each.
    pub fn flush(&self) -> Vec<ReportRequest> {
        self.drain(false)
    }

    /// Drains every operation regardless of how long it's been batched,
    /// for use at shutdown: a batch window that hasn't elapsed yet is still
    /// real billable usage, and `stop()` must not let `clear()` discard it
    /// out from under a TTL check that hasn't fired (spec.md §5, §8 scenario
    /// 6, "no aggregated data is silently lost").
    pub fn flush_all(&self) -> Vec<ReportRequest> {
        self.drain(true)
    }

    fn drain(&self, force: bool) -> Vec<ReportRequest> {
        let mut state = self.state.lock();
        let Some(cache) = state.cache.as_mut() else {
            return Vec::new();
        };
        let now = (self.clock)();
        let window = Duration::milliseconds(self.config.flush_interval_ms);
        let expired = cache.evict_expired(|entry| force || now - entry.last_written >= window);

        let mut ops: Vec<Operation> = std::mem::take(&mut state.pending);
        ops.extend(expired.into_iter().map(|(_, entry)| entry.aggregator.as_operation()));

        ops.chunks(MAX_OPERATIONS_PER_REQUEST)
            .map(|chunk| ReportRequest {
                service_name: self.service_name.clone(),
                operations: chunk.to_vec(),
            })
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        if let Some(cache) = state.cache.as_mut() {
            cache.clear();
        }
        state.pending.clear();
    }
}

fn has_only_high_importance_operations(ops: &[Operation]) -> bool {
    ops.iter().all(|op| !op.is_low_importance())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Importance, MetricValue, MetricValueKind, MetricValueSet};
    use std::collections::BTreeMap;

    fn op(name: &str, importance: Importance) -> Operation {
        Operation {
            operation_id: "op1".into(),
            operation_name: name.into(),
            consumer_id: "project:p".into(),
            start_time: Some(Utc::now()),
            end_time: Some(Utc::now()),
            importance,
            labels: BTreeMap::new(),
            metric_value_sets: vec![MetricValueSet {
                metric_name: "cost".into(),
                values: vec![MetricValue::new(MetricValueKind::Int64(1))],
            }],
            log_entries: vec![],
        }
    }

    fn batcher(clock: crate::clock::FixedClock) -> ReportBatcher {
        ReportBatcher::new(
            "svc",
            ReportAggregatorConfig {
                cache_entries: 1000,
                flush_interval_ms: 1_000,
            },
            KindsMap::new(),
            clock.as_clock(),
        )
    }

    #[test]
    fn all_high_importance_operations_bypass_the_cache() {
        let clock = crate::clock::FixedClock::new(Utc::now());
        let b = batcher(clock);
        let req = ReportRequest {
            service_name: "svc".into(),
            operations: vec![op("A", Importance::High), op("B", Importance::High)],
        };
        assert!(!b.report(&req).unwrap());
    }

    #[test]
    fn mixed_importance_request_is_absorbed() {
        let clock = crate::clock::FixedClock::new(Utc::now());
        let b = batcher(clock.clone());
        let req = ReportRequest {
            service_name: "svc".into(),
            operations: vec![op("A", Importance::High), op("B", Importance::Low)],
        };
        assert!(b.report(&req).unwrap());
        clock.advance(Duration::milliseconds(1_100));
        let flushed = b.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].operations.len(), 2);
    }

    #[test]
    fn repeated_same_operation_merges_costs_before_flush() {
        let clock = crate::clock::FixedClock::new(Utc::now());
        let b = batcher(clock.clone());
        let req = ReportRequest {
            service_name: "svc".into(),
            operations: vec![op("A", Importance::Low)],
        };
        b.report(&req).unwrap();
        b.report(&req).unwrap();
        b.report(&req).unwrap();

        clock.advance(Duration::milliseconds(1_100));
        let flushed = b.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].operations.len(), 1);
        assert_eq!(
            flushed[0].operations[0].metric_value_sets[0].values[0].value,
            MetricValueKind::Int64(3)
        );
    }

    #[test]
    fn flush_all_drains_entries_whose_window_has_not_elapsed() {
        let clock = crate::clock::FixedClock::new(Utc::now());
        let b = batcher(clock.clone());
        let req = ReportRequest {
            service_name: "svc".into(),
            operations: vec![op("A", Importance::Low)],
        };
        b.report(&req).unwrap();

        // the ordinary flush_interval_ms hasn't elapsed, so flush() finds nothing
        assert!(b.flush().is_empty());
        // but flush_all() must still surface it, e.g. on facade shutdown
        let flushed = b.flush_all();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].operations.len(), 1);
    }

    #[test]
    fn batches_split_at_max_operations_per_request() {
        let clock = crate::clock::FixedClock::new(Utc::now());
        let b = batcher(clock.clone());
        for i in 0..(MAX_OPERATIONS_PER_REQUEST + 5) {
            let mut o = op(&format!("M{i}"), Importance::Low);
            o.operation_id = format!("op{i}");
            let req = ReportRequest {
                service_name: "svc".into(),
                operations: vec![o],
            };
            b.report(&req).unwrap();
        }
        clock.advance(Duration::milliseconds(1_100));
        let flushed = b.flush();
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].operations.len(), MAX_OPERATIONS_PER_REQUEST);
        assert_eq!(flushed[1].operations.len(), 5);
    }
}
