//! The `Operation` value and the kinds map that governs merge semantics.

use super::metric_value::{MetricKind, MetricValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// `importance=HIGH` disables caching for the operation it tags (spec.md
/// §3 invariants, §4.2/§4.4 importance bypass).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Importance {
    #[default]
    Low,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub severity: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricValueSet {
    pub metric_name: String,
    pub values: Vec<MetricValue>,
}

/// `Operation`, as spec.md §3. Invariants: `start_time <= end_time`;
/// `operation_id` is stable across calls for the same logical request;
/// `importance == High` disables caching wherever this operation is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: String,
    pub operation_name: String,
    pub consumer_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub importance: Importance,
    pub labels: BTreeMap<String, String>,
    pub metric_value_sets: Vec<MetricValueSet>,
    pub log_entries: Vec<LogEntry>,
}

impl Operation {
    pub fn is_low_importance(&self) -> bool {
        self.importance == Importance::Low
    }
}

/// `metric_name -> MetricKind`, defaulting to `Delta` when a name is absent
/// (spec.md §3 "Kinds map").
pub type KindsMap = HashMap<String, MetricKind>;

pub fn kind_of(kinds: &KindsMap, metric_name: &str) -> MetricKind {
    kinds.get(metric_name).copied().unwrap_or_default()
}
