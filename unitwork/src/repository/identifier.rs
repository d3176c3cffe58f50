//! Immutable fluent builder for filter criteria
//!
//! Every method on [`Identifier`] returns a new builder; the receiver is never
//! mutated, so a single identifier can be shared across tasks and threads and
//! derived from concurrently.
//!
//! ```rust
//! use unitwork::repository::{Identifier, LogicalOperator};
//!
//! let active = Identifier::new().equal("status", "active");
//! let adults = Identifier::new().greater_or_equal("age", 18);
//!
//! let both = active.and(&adults);
//! let criteria = both.to_filter_criteria();
//! assert_eq!(criteria.len(), 2);
//! assert_eq!(criteria[0].logical_op, Some(LogicalOperator::And));
//! assert_eq!(criteria[1].logical_op, None);
//!
//! // the receiver is untouched
//! assert_eq!(active.len(), 1);
//! ```
//!
//! `and`/`or` flatten the other builder's criteria onto the end of this one,
//! so `(a OR b) AND c` cannot be written with them alone. Use
//! [`FilterCriterion::group`] with [`Identifier::push`] for nested precedence.

use std::fmt;
use std::sync::Arc;

use super::criteria::{fmt_sequence, FilterCriterion, FilterOperator, FilterValue, LogicalOperator};

/// Copy-on-write accumulator of [`FilterCriterion`]s
#[derive(Debug, Clone, Default)]
pub struct Identifier {
    criteria: Arc<Vec<FilterCriterion>>,
}

impl Identifier {
    /// An empty identifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing criteria sequence
    pub fn from_criteria(criteria: Vec<FilterCriterion>) -> Self {
        Self {
            criteria: Arc::new(criteria),
        }
    }

    /// Append an arbitrary criterion, typically a [`FilterCriterion::group`]
    #[must_use]
    pub fn push(&self, criterion: FilterCriterion) -> Self {
        let mut next = Vec::with_capacity(self.criteria.len() + 1);
        next.extend(self.criteria.iter().cloned());
        next.push(criterion);
        Self::from_criteria(next)
    }

    fn leaf(&self, field: impl Into<String>, operator: FilterOperator, value: FilterValue) -> Self {
        self.push(FilterCriterion::leaf(field, operator, Some(value)))
    }

    fn listed(&self, field: impl Into<String>, operator: FilterOperator, values: Vec<FilterValue>) -> Self {
        self.push(FilterCriterion::with_values(field, operator, values))
    }

    #[must_use]
    pub fn equal(&self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.leaf(field, FilterOperator::Equal, value.into())
    }

    #[must_use]
    pub fn not_equal(&self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.leaf(field, FilterOperator::NotEqual, value.into())
    }

    #[must_use]
    pub fn greater_than(&self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.leaf(field, FilterOperator::GreaterThan, value.into())
    }

    #[must_use]
    pub fn greater_or_equal(&self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.leaf(field, FilterOperator::GreaterOrEqual, value.into())
    }

    #[must_use]
    pub fn less_than(&self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.leaf(field, FilterOperator::LessThan, value.into())
    }

    #[must_use]
    pub fn less_or_equal(&self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.leaf(field, FilterOperator::LessOrEqual, value.into())
    }

    /// SQL-style pattern: `%` matches any run, `_` a single character
    #[must_use]
    pub fn like(&self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.leaf(field, FilterOperator::Like, FilterValue::String(pattern.into()))
    }

    /// Set membership; an empty set matches nothing
    #[must_use]
    pub fn in_values<I, V>(&self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        self.listed(field, FilterOperator::In, values.into_iter().map(Into::into).collect())
    }

    /// Set exclusion; an empty set matches everything
    #[must_use]
    pub fn not_in<I, V>(&self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        self.listed(field, FilterOperator::NotIn, values.into_iter().map(Into::into).collect())
    }

    /// Inclusive range packed as `values = [start, end]`; `start <= end` is not checked
    #[must_use]
    pub fn between(
        &self,
        field: impl Into<String>,
        start: impl Into<FilterValue>,
        end: impl Into<FilterValue>,
    ) -> Self {
        self.listed(field, FilterOperator::Between, vec![start.into(), end.into()])
    }

    #[must_use]
    pub fn is_null(&self, field: impl Into<String>) -> Self {
        self.push(FilterCriterion::leaf(field, FilterOperator::IsNull, None))
    }

    #[must_use]
    pub fn is_not_null(&self, field: impl Into<String>) -> Self {
        self.push(FilterCriterion::leaf(field, FilterOperator::IsNotNull, None))
    }

    /// Array containment: the field holds `value` as one of its elements
    #[must_use]
    pub fn contains(&self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.leaf(field, FilterOperator::Contains, value.into())
    }

    /// Field presence
    #[must_use]
    pub fn has(&self, field: impl Into<String>) -> Self {
        self.push(FilterCriterion::leaf(field, FilterOperator::Has, None))
    }

    /// Key presence inside a structured field (`jsonb ? key` on PostgreSQL)
    #[must_use]
    pub fn has_key(&self, field: impl Into<String>, key: impl Into<String>) -> Self {
        self.leaf(field, FilterOperator::Has, FilterValue::String(key.into()))
    }

    /// Join `other` with AND
    ///
    /// When `other` is empty the result shares this identifier's buffer
    /// (see [`Identifier::shares_buffer_with`]) instead of copying it.
    #[must_use]
    pub fn and(&self, other: &Identifier) -> Self {
        self.combine(other, LogicalOperator::And)
    }

    /// Join `other` with OR; same empty-`other` behavior as [`Identifier::and`]
    #[must_use]
    pub fn or(&self, other: &Identifier) -> Self {
        self.combine(other, LogicalOperator::Or)
    }

    fn combine(&self, other: &Identifier, op: LogicalOperator) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        let mut next = Vec::with_capacity(self.criteria.len() + other.criteria.len());
        next.extend(self.criteria.iter().cloned());
        if let Some(last) = next.last_mut() {
            last.logical_op = Some(op);
        }
        next.extend(other.criteria.iter().cloned());
        Self::from_criteria(next)
    }

    /// Defensive copy of the accumulated criteria
    pub fn to_filter_criteria(&self) -> Vec<FilterCriterion> {
        self.criteria.as_ref().clone()
    }

    /// Borrow the accumulated criteria without copying
    pub fn criteria(&self) -> &[FilterCriterion] {
        &self.criteria
    }

    /// A fresh empty identifier; the receiver is unchanged
    #[must_use]
    pub fn reset(&self) -> Self {
        Self::new()
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// `true` when both handles point at the same criteria buffer
    pub fn shares_buffer_with(&self, other: &Identifier) -> bool {
        Arc::ptr_eq(&self.criteria, &other.criteria)
    }
}

impl From<Vec<FilterCriterion>> for Identifier {
    fn from(criteria: Vec<FilterCriterion>) -> Self {
        Self::from_criteria(criteria)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<all>");
        }
        fmt_sequence(&self.criteria, f)
    }
}
