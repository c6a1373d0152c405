//! Stable fingerprinting of operations for cache keying (spec.md §4.1).
//!
//! Ground truth: `google/scc/aggregators/check_request.py sign`,
//! `endpoints_management/control/quota_request.py sign`,
//! `google/scc/aggregators/report_request.py _sign_operation`, and
//! `google/scc/aggregators/metric_value.py sign`/`update_hash` -- all of
//! which hash with `hashlib.md5`. This crate uses `sha2::Sha256` truncated
//! to 128 bits instead (`proxy.rs::generate_cache_key` and
//! `cco/src/cache.rs::MokaCache::generate_key` already reach for `sha2` for
//! the same purpose): the spec only needs collision resistance, not
//! preimage secrecy, and nothing else in the stack still reaches for MD5.

use crate::model::{MetricValue, Operation, QuotaProperties};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 128-bit digest identifying an operation's cache identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 16]);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

fn finish(hasher: Sha256) -> Signature {
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Signature(bytes)
}

fn feed_labels(hasher: &mut Sha256, labels: &std::collections::BTreeMap<String, String>) {
    // BTreeMap already iterates in sorted key order (spec.md §4.1 step 3).
    for (k, v) in labels {
        hasher.update(k.as_bytes());
        hasher.update([0u8]);
        hasher.update(v.as_bytes());
        hasher.update([0u8]);
    }
}

fn feed_metric_value(hasher: &mut Sha256, mv: &MetricValue) {
    feed_labels(hasher, &mv.labels);
    if let Some(currency) = mv.money_currency() {
        hasher.update([0u8]);
        hasher.update(currency.as_bytes());
    }
}

/// Fingerprints an operation for the check/quota aggregators: method name,
/// consumer id, labels, metric-value-set names and their values' labels,
/// and (for check requests) the quota properties' canonical text.
///
/// Per spec.md §4.1's contract: two operations differing only in metric
/// *numeric values* or timestamps hash identically (P1); any change to
/// method, consumer, label set, metric names, metric-value label sets, or
/// money currency codes changes the hash (P2).
pub fn sign_operation(op: &Operation, quota_properties: Option<&QuotaProperties>) -> Signature {
    let mut hasher = Sha256::new();
    hasher.update(op.operation_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(op.consumer_id.as_bytes());
    hasher.update([0u8]);
    feed_labels(&mut hasher, &op.labels);

    for set in &op.metric_value_sets {
        hasher.update(set.metric_name.as_bytes());
        hasher.update([0u8]);
        for mv in &set.values {
            feed_metric_value(&mut hasher, mv);
        }
    }

    if let Some(qp) = quota_properties {
        hasher.update(qp.canonical_text().as_bytes());
    }
    hasher.update([0u8]);

    finish(hasher)
}

/// Fingerprints an operation for the report batcher: method, consumer, and
/// labels only (`report_request.py _sign_operation` does not hash metric
/// value sets -- distinct metric readings for the same call still merge
/// into one cached operation).
pub fn sign_report_operation(op: &Operation) -> Signature {
    let mut hasher = Sha256::new();
    hasher.update(op.operation_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(op.consumer_id.as_bytes());
    hasher.update([0u8]);
    feed_labels(&mut hasher, &op.labels);
    finish(hasher)
}

/// Identity of a single `MetricValue` within a metric-value set: its labels
/// plus (for money) its currency code. Used by the operation aggregator to
/// key the by-signature map it merges same-named metrics into
/// (`operation.py Aggregator._merge_metric_values`).
pub fn sign_metric_value(mv: &MetricValue) -> Signature {
    let mut hasher = Sha256::new();
    feed_metric_value(&mut hasher, mv);
    finish(hasher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Importance, MetricValueKind, MetricValueSet};
    use std::collections::BTreeMap;

    fn base_op() -> Operation {
        Operation {
            operation_id: "op-1".into(),
            operation_name: "Method.Call".into(),
            consumer_id: "project:p1".into(),
            start_time: None,
            end_time: None,
            importance: Importance::Low,
            labels: BTreeMap::new(),
            metric_value_sets: vec![],
            log_entries: vec![],
        }
    }

    #[test]
    fn p1_numeric_values_and_op_id_dont_affect_signature() {
        let mut a = base_op();
        a.metric_value_sets.push(MetricValueSet {
            metric_name: "m".into(),
            values: vec![MetricValue::new(MetricValueKind::Int64(2))],
        });
        let mut b = a.clone();
        b.operation_id = "op-2".into();
        b.metric_value_sets[0].values[0] = MetricValue::new(MetricValueKind::Int64(999));
        b.start_time = Some(chrono::Utc::now());

        assert_eq!(sign_operation(&a, None), sign_operation(&b, None));
    }

    #[test]
    fn p2_method_name_change_changes_signature() {
        let a = base_op();
        let mut b = a.clone();
        b.operation_name = "Other.Call".into();
        assert_ne!(sign_operation(&a, None), sign_operation(&b, None));
    }

    #[test]
    fn p2_consumer_change_changes_signature() {
        let a = base_op();
        let mut b = a.clone();
        b.consumer_id = "project:p2".into();
        assert_ne!(sign_operation(&a, None), sign_operation(&b, None));
    }

    #[test]
    fn p2_label_change_changes_signature() {
        let a = base_op();
        let mut b = a.clone();
        b.labels.insert("k".into(), "v".into());
        assert_ne!(sign_operation(&a, None), sign_operation(&b, None));
    }

    #[test]
    fn p2_money_currency_changes_signature() {
        let mut a = base_op();
        a.metric_value_sets.push(MetricValueSet {
            metric_name: "cost".into(),
            values: vec![MetricValue::new(MetricValueKind::Money(crate::model::Money::new(
                "USD", 1, 0,
            )))],
        });
        let mut b = a.clone();
        b.metric_value_sets[0].values[0] =
            MetricValue::new(MetricValueKind::Money(crate::model::Money::new("EUR", 1, 0)));
        assert_ne!(sign_operation(&a, None), sign_operation(&b, None));
    }

    #[test]
    fn report_signature_ignores_metric_sets() {
        let mut a = base_op();
        a.metric_value_sets.push(MetricValueSet {
            metric_name: "m".into(),
            values: vec![MetricValue::new(MetricValueKind::Int64(1))],
        });
        let mut b = a.clone();
        b.metric_value_sets.clear();
        assert_eq!(sign_report_operation(&a), sign_report_operation(&b));
    }
}
