//! # Subscription Descriptors
//!
//! Structural identity of "what to watch": a resource plus an optional row
//! filter. Descriptors are normalized on construction so that two spellings
//! of the same filter dedup onto a single channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::ChangeEvent;

/// Filter operator for row filters (`column=op.value`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl FilterOp {
    /// Wire spelling of the operator
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
        }
    }

    /// Parse an operator, case-insensitively
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "eq" => Some(FilterOp::Eq),
            "neq" => Some(FilterOp::Neq),
            "gt" => Some(FilterOp::Gt),
            "gte" => Some(FilterOp::Gte),
            "lt" => Some(FilterOp::Lt),
            "lte" => Some(FilterOp::Lte),
            "in" => Some(FilterOp::In),
            _ => None,
        }
    }
}

/// A single-column row filter, e.g. `business_id=eq.B1`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnFilter {
    /// Column to filter on
    pub column: String,
    /// Operator
    pub op: FilterOp,
    /// Value to compare, as written in the filter
    pub value: String,
}

impl ColumnFilter {
    /// Create a filter from its parts
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<String>) -> Self {
        Self {
            column: column.into().trim().to_string(),
            op,
            value: value.into().trim().to_string(),
        }
    }

    /// Parse `column=op.value`. Returns `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let (column, rest) = raw.split_once('=')?;
        let (op, value) = rest.split_once('.')?;

        let column = column.trim();
        let value = value.trim();
        if column.is_empty() || value.is_empty() {
            return None;
        }

        Some(Self::new(column, FilterOp::parse(op)?, value))
    }

    /// Check a record against this filter
    pub fn matches(&self, record: &Value) -> bool {
        let Some(field) = record.get(&self.column) else {
            return false;
        };

        match self.op {
            FilterOp::Eq => value_eq(field, &self.value),
            FilterOp::Neq => !value_eq(field, &self.value),
            FilterOp::Gt => compare(field, &self.value).map_or(false, |o| o.is_gt()),
            FilterOp::Gte => compare(field, &self.value).map_or(false, |o| o.is_ge()),
            FilterOp::Lt => compare(field, &self.value).map_or(false, |o| o.is_lt()),
            FilterOp::Lte => compare(field, &self.value).map_or(false, |o| o.is_le()),
            FilterOp::In => self
                .value
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split(',')
                .any(|candidate| value_eq(field, candidate.trim())),
        }
    }
}

impl fmt::Display for ColumnFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}.{}", self.column, self.op.as_str(), self.value)
    }
}

fn value_eq(field: &Value, expected: &str) -> bool {
    match field {
        Value::String(s) => s == expected,
        Value::Number(n) => expected
            .parse::<f64>()
            .ok()
            .zip(n.as_f64())
            .map_or(false, |(a, b)| a == b),
        Value::Bool(b) => expected.parse::<bool>().map_or(false, |e| e == *b),
        Value::Null => expected == "null",
        _ => false,
    }
}

fn compare(field: &Value, expected: &str) -> Option<std::cmp::Ordering> {
    match field {
        Value::Number(n) => n.as_f64()?.partial_cmp(&expected.parse::<f64>().ok()?),
        Value::String(s) => Some(s.as_str().cmp(expected)),
        _ => None,
    }
}

/// Identifies what to watch: a resource (table) and an optional filter.
///
/// Two descriptors are equal iff their normalized resource and filter are
/// identical; that equality is the channel dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "DescriptorParts")]
pub struct SubscriptionDescriptor {
    resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
}

#[derive(Deserialize)]
struct DescriptorParts {
    resource: String,
    #[serde(default)]
    filter: Option<String>,
}

impl From<DescriptorParts> for SubscriptionDescriptor {
    fn from(parts: DescriptorParts) -> Self {
        match parts.filter {
            Some(filter) => Self::filtered(parts.resource, filter),
            None => Self::new(parts.resource),
        }
    }
}

impl SubscriptionDescriptor {
    /// Watch every change on a resource
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into().trim().to_string(),
            filter: None,
        }
    }

    /// Watch a resource with a raw filter string
    pub fn filtered(resource: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            resource: resource.into().trim().to_string(),
            filter: normalize_filter(&filter.into()),
        }
    }

    /// Watch rows where `column` equals `value`
    pub fn where_eq(
        resource: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::with_filter(resource, ColumnFilter::new(column, FilterOp::Eq, value))
    }

    /// Watch a resource with a structured filter
    pub fn with_filter(resource: impl Into<String>, filter: ColumnFilter) -> Self {
        Self {
            resource: resource.into().trim().to_string(),
            filter: Some(filter.to_string()),
        }
    }

    /// Resource (table) name
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Normalized filter, if any
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Structured view of the filter when it uses `column=op.value` syntax
    pub fn column_filter(&self) -> Option<ColumnFilter> {
        self.filter.as_deref().and_then(ColumnFilter::parse)
    }

    /// Channel topic for transports that address channels by name
    pub fn channel_topic(&self) -> String {
        match &self.filter {
            Some(filter) => format!("realtime:{}:{}", self.resource, filter),
            None => format!("realtime:{}", self.resource),
        }
    }

    /// Check if a change event falls under this descriptor.
    ///
    /// Filters that do not use `column=op.value` syntax are opaque to the
    /// core and always match; the transport is responsible for them.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.resource != self.resource {
            return false;
        }

        let Some(filter) = self.column_filter() else {
            return true;
        };

        event.record().map_or(false, |record| filter.matches(record))
    }
}

impl fmt::Display for SubscriptionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{}[{}]", self.resource, filter),
            None => write!(f, "{}", self.resource),
        }
    }
}

fn normalize_filter(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    match ColumnFilter::parse(trimmed) {
        Some(parsed) => Some(parsed.to_string()),
        None => Some(trimmed.to_string()),
    }
}
