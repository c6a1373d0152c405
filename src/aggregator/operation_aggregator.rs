//! C4: merges two `Operation` values into one (spec.md §4.5).
//!
//! Ground truth: `google/scc/aggregators/operation.py Aggregator`. The
//! original keys merged metric values by a `(name, value-signature)` pair
//! so that, e.g., two `MetricValue`s for the same metric name but different
//! label sets stay distinct entries; this is `_metric_values_by_name_then_sign`.

use crate::fingerprint::{sign_metric_value, Signature};
use crate::model::{metric_value, KindsMap, LogEntry, MetricValue, MetricValueSet, Operation};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Merge(#[from] metric_value::MergeError),
}

/// Accumulates repeated observations of "the same" operation (same
/// fingerprint) into a single merged `Operation`.
#[derive(Clone)]
pub struct OperationAggregator {
    kinds: KindsMap,
    operation_id: String,
    operation_name: String,
    consumer_id: String,
    importance: crate::model::Importance,
    labels: std::collections::BTreeMap<String, String>,
    start_time: Option<chrono::DateTime<chrono::Utc>>,
    end_time: Option<chrono::DateTime<chrono::Utc>>,
    log_entries: Vec<LogEntry>,
    values_by_name_then_sig: HashMap<String, HashMap<Signature, MetricValue>>,
}

impl OperationAggregator {
    pub fn new(initial_op: Operation, kinds: KindsMap) -> Result<Self, AggregateError> {
        let mut agg = Self {
            kinds,
            operation_id: initial_op.operation_id.clone(),
            operation_name: initial_op.operation_name.clone(),
            consumer_id: initial_op.consumer_id.clone(),
            importance: initial_op.importance,
            labels: initial_op.labels.clone(),
            start_time: initial_op.start_time,
            end_time: initial_op.end_time,
            log_entries: Vec::new(),
            values_by_name_then_sig: HashMap::new(),
        };
        agg.merge_metric_values(&initial_op)?;
        agg.log_entries.extend(initial_op.log_entries);
        Ok(agg)
    }

    /// Merges `other` into the accumulated state: log entries append,
    /// timestamps widen to `[min(start), max(end)]`, and metric values
    /// combine per-metric-name by their kind.
    pub fn add(&mut self, other: &Operation) -> Result<(), AggregateError> {
        self.log_entries.extend(other.log_entries.iter().cloned());
        self.start_time = metric_value::earlier(self.start_time, other.start_time);
        self.end_time = metric_value::later(self.end_time, other.end_time);
        self.merge_metric_values(other)
    }

    fn merge_metric_values(&mut self, op: &Operation) -> Result<(), AggregateError> {
        for set in &op.metric_value_sets {
            let kind = crate::model::operation::kind_of(&self.kinds, &set.metric_name);
            let by_sig = self.values_by_name_then_sig.entry(set.metric_name.clone()).or_default();
            for mv in &set.values {
                let sig = sign_metric_value(mv);
                match by_sig.get(&sig) {
                    Some(prior) => {
                        let merged = metric_value::merge(kind, prior, mv)?;
                        by_sig.insert(sig, merged);
                    }
                    None => {
                        by_sig.insert(sig, mv.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Materializes the accumulated state into a single `Operation`,
    /// metric-value sets ordered by metric name for determinism.
    pub fn as_operation(&self) -> Operation {
        let mut names: Vec<&String> = self.values_by_name_then_sig.keys().collect();
        names.sort();
        let metric_value_sets = names
            .into_iter()
            .map(|name| MetricValueSet {
                metric_name: name.clone(),
                values: self.values_by_name_then_sig[name].values().cloned().collect(),
            })
            .collect();

        Operation {
            operation_id: self.operation_id.clone(),
            operation_name: self.operation_name.clone(),
            consumer_id: self.consumer_id.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            importance: self.importance,
            labels: self.labels.clone(),
            metric_value_sets,
            log_entries: self.log_entries.clone(),
        }
    }
}
