//! `MetricValue` merge rules.
//!
//! Ground truth: `google/scc/aggregators/metric_value.py`. `merge` dispatches
//! on `MetricKind`: `DELTA` sums/accumulates, `GAUGE`/`CUMULATIVE` keep the
//! later of the two by `end_time` (ties keep the prior, matching
//! `_merge_cumulative_or_gauge_metrics`'s strict `<` comparison). `bool` and
//! `string` values are not aggregatable under `DELTA` and are a merge error,
//! same as the original's `raise ValueError('Could not merge unmergeable
//! metric type')`.

use super::distribution::{self, Distribution};
use super::money::{self, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Determines whether two values of a metric add, replace-by-latest, or
/// accumulate. Defaults to `Delta` when a metric name has no configured
/// kind (spec.md §3 "Kinds map").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MetricKind {
    #[default]
    Delta,
    Gauge,
    Cumulative,
}

/// The tagged-union value carried by a `MetricValue`. Exactly one variant
/// is ever populated per spec.md §3 -- this is enforced by Rust's enum
/// representation rather than by a runtime "exactly one field set" check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValueKind {
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    Money(Money),
    Distribution(Distribution),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub labels: BTreeMap<String, String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub value: MetricValueKind,
}

impl MetricValue {
    pub fn new(value: MetricValueKind) -> Self {
        Self {
            labels: BTreeMap::new(),
            start_time: None,
            end_time: None,
            value,
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_times(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// The currency code iff this is a `Money` value, used by fingerprinting
    /// (spec.md §4.1 step 4: money values contribute their currency to the
    /// signature; no other variant contributes its numeric payload).
    pub fn money_currency(&self) -> Option<String> {
        match &self.value {
            MetricValueKind::Money(m) => Some(m.currency_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("metric values have incompatible types: {0:?} vs {1:?}")]
    TypeMismatch(&'static str, &'static str),
    #[error("metric type {0} is not aggregatable under DELTA")]
    NotAggregatable(&'static str),
    #[error(transparent)]
    Money(#[from] money::MoneyError),
    #[error(transparent)]
    Distribution(#[from] distribution::DistributionError),
}

fn type_name(v: &MetricValueKind) -> &'static str {
    match v {
        MetricValueKind::Bool(_) => "bool",
        MetricValueKind::Int64(_) => "int64",
        MetricValueKind::Double(_) => "double",
        MetricValueKind::String(_) => "string",
        MetricValueKind::Money(_) => "money",
        MetricValueKind::Distribution(_) => "distribution",
    }
}

/// Merges `prior` and `latest` according to `kind`. Returns the merged
/// value; timestamps on the result span `[min(start), max(end)]` of both
/// inputs for `DELTA` metrics (`_merge_delta_timestamps`).
pub fn merge(kind: MetricKind, prior: &MetricValue, latest: &MetricValue) -> Result<MetricValue, MergeError> {
    let prior_ty = type_name(&prior.value);
    let latest_ty = type_name(&latest.value);
    if prior_ty != latest_ty {
        return Err(MergeError::TypeMismatch(prior_ty, latest_ty));
    }

    match kind {
        MetricKind::Delta => merge_delta(prior, latest),
        MetricKind::Gauge | MetricKind::Cumulative => Ok(merge_cumulative_or_gauge(prior, latest)),
    }
}

fn merge_delta(prior: &MetricValue, latest: &MetricValue) -> Result<MetricValue, MergeError> {
    let value = match (&prior.value, &latest.value) {
        (MetricValueKind::Int64(a), MetricValueKind::Int64(b)) => MetricValueKind::Int64(a + b),
        (MetricValueKind::Double(a), MetricValueKind::Double(b)) => MetricValueKind::Double(a + b),
        (MetricValueKind::Money(a), MetricValueKind::Money(b)) => {
            MetricValueKind::Money(money::add(*a, *b, true)?)
        }
        (MetricValueKind::Distribution(a), MetricValueKind::Distribution(b)) => {
            MetricValueKind::Distribution(distribution::merge(a, b)?)
        }
        (MetricValueKind::Bool(_), MetricValueKind::Bool(_)) => {
            return Err(MergeError::NotAggregatable("bool"))
        }
        (MetricValueKind::String(_), MetricValueKind::String(_)) => {
            return Err(MergeError::NotAggregatable("string"))
        }
        _ => unreachable!("type equality checked above"),
    };

    let start = earlier(prior.start_time, latest.start_time);
    let end = later(prior.end_time, latest.end_time);

    Ok(MetricValue {
        labels: latest.labels.clone(),
        start_time: start,
        end_time: end,
        value,
    })
}

fn merge_cumulative_or_gauge(prior: &MetricValue, latest: &MetricValue) -> MetricValue {
    match (prior.end_time, latest.end_time) {
        (Some(p), Some(l)) if l > p => latest.clone(),
        (None, Some(_)) => latest.clone(),
        _ => prior.clone(),
    }
}

/// `None` treated as `+inf` -- the earlier of two optional instants is
/// whichever is `Some`, or the smaller when both are.
pub(crate) fn earlier(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

/// `None` treated as `-inf` -- the later of two optional instants is
/// whichever is `Some`, or the larger when both are.
pub(crate) fn later(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> MetricValue {
        MetricValue::new(MetricValueKind::Int64(v))
    }

    #[test]
    fn delta_sums_int64() {
        let merged = merge(MetricKind::Delta, &int(2), &int(3)).unwrap();
        assert_eq!(merged.value, MetricValueKind::Int64(5));
    }

    #[test]
    fn delta_rejects_bool() {
        let a = MetricValue::new(MetricValueKind::Bool(true));
        let b = MetricValue::new(MetricValueKind::Bool(false));
        assert!(matches!(merge(MetricKind::Delta, &a, &b), Err(MergeError::NotAggregatable("bool"))));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let a = int(1);
        let b = MetricValue::new(MetricValueKind::Double(1.0));
        assert!(matches!(merge(MetricKind::Delta, &a, &b), Err(MergeError::TypeMismatch(_, _))));
    }

    #[test]
    fn gauge_keeps_later_by_end_time() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);
        let older = int(1).with_times(Some(t0), Some(t0));
        let newer = int(2).with_times(Some(t1), Some(t1));
        let merged = merge(MetricKind::Gauge, &older, &newer).unwrap();
        assert_eq!(merged.value, MetricValueKind::Int64(2));
    }

    #[test]
    fn gauge_tie_keeps_prior() {
        let t0 = Utc::now();
        let a = int(1).with_times(Some(t0), Some(t0));
        let b = int(2).with_times(Some(t0), Some(t0));
        let merged = merge(MetricKind::Gauge, &a, &b).unwrap();
        assert_eq!(merged.value, MetricValueKind::Int64(1));
    }
}
