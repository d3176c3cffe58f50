//! Backend filter translation
//!
//! A [`FilterTranslator`] supplies the backend-specific pieces (how one leaf
//! criterion, a search term and a visibility mode look natively, and how to
//! join two predicates). The combination algorithm itself lives in the
//! provided methods and is shared by every backend:
//!
//! - the running predicate starts empty; the first criterion that translates
//!   to something becomes it
//! - criterion *i* joins the running predicate with the `logical_op` stored on
//!   criterion *i - 1* (AND when unset)
//! - a criterion that translates to nothing (unrecognized operator, `between`
//!   with fewer than two values, empty group) leaves the predicate unchanged
//! - a group is translated recursively into an isolated sub-predicate and then
//!   joined like a leaf
//! - search is ANDed after the filters, soft-delete visibility last

pub mod document;
#[cfg(feature = "database")]
pub mod sql;

use std::cmp::Ordering;
use std::fmt;

use crate::repository::{
    DeletedVisibility, FilterCriterion, FilterOperator, LogicalOperator, QuerySpec,
};

pub use document::{DocumentFilter, DocumentTranslator};
#[cfg(feature = "database")]
pub use sql::{SqlPredicate, SqlTranslator};

/// Ordering comparisons shared by both backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    /// The comparison for an operator, if it is one
    pub fn from_operator(operator: &FilterOperator) -> Option<Self> {
        match operator {
            FilterOperator::Equal => Some(Self::Eq),
            FilterOperator::NotEqual => Some(Self::Ne),
            FilterOperator::GreaterThan => Some(Self::Gt),
            FilterOperator::GreaterOrEqual => Some(Self::Gte),
            FilterOperator::LessThan => Some(Self::Lt),
            FilterOperator::LessOrEqual => Some(Self::Lte),
            _ => None,
        }
    }

    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    pub const fn as_document(&self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
        }
    }

    /// Whether `actual.cmp(expected) == ordering` satisfies this comparison
    pub fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

/// Turns backend-agnostic criteria into a native predicate
pub trait FilterTranslator: Send + Sync {
    /// Native predicate type
    type Predicate: Clone + fmt::Debug + Send + Sync;

    /// Predicate matching every record
    fn match_all(&self) -> Self::Predicate;

    /// Predicate matching no record
    fn match_none(&self) -> Self::Predicate;

    fn conjoin(&self, left: Self::Predicate, right: Self::Predicate) -> Self::Predicate;

    fn disjoin(&self, left: Self::Predicate, right: Self::Predicate) -> Self::Predicate;

    /// Translate one leaf; `None` means "skip this criterion"
    fn leaf(&self, criterion: &FilterCriterion) -> Option<Self::Predicate>;

    /// Free-text search predicate
    fn search(&self, term: &str) -> Option<Self::Predicate>;

    /// Soft-delete visibility predicate; `None` for [`DeletedVisibility::Include`]
    fn visibility(&self, visibility: DeletedVisibility) -> Option<Self::Predicate>;

    /// Translate one criterion, recursing into groups
    fn criterion(&self, criterion: &FilterCriterion) -> Option<Self::Predicate> {
        if criterion.is_group() {
            self.apply_filters(&criterion.group)
        } else {
            self.leaf(criterion)
        }
    }

    /// Fold a criteria sequence into one predicate; `None` when nothing translated
    fn apply_filters(&self, criteria: &[FilterCriterion]) -> Option<Self::Predicate> {
        let mut running: Option<Self::Predicate> = None;
        let mut join = LogicalOperator::And;
        for criterion in criteria {
            let current_join = join;
            join = criterion.logical_op.unwrap_or(LogicalOperator::And);

            let Some(next) = self.criterion(criterion) else {
                tracing::warn!(criterion = %criterion, "filter criterion skipped");
                continue;
            };
            running = Some(match running {
                None => next,
                Some(acc) => match current_join {
                    LogicalOperator::And => self.conjoin(acc, next),
                    LogicalOperator::Or => self.disjoin(acc, next),
                },
            });
        }
        running
    }

    /// Criteria plus visibility, without search
    fn scoped(&self, criteria: &[FilterCriterion], visibility: DeletedVisibility) -> Self::Predicate {
        let predicate = self.apply_filters(criteria);
        let predicate = and_maybe(self, predicate, self.visibility(visibility));
        predicate.unwrap_or_else(|| self.match_all())
    }

    /// Full translation of a query: filters, then search, then visibility
    fn translate<Q: QuerySpec + ?Sized>(&self, query: &Q) -> Self::Predicate {
        let predicate = self.apply_filters(query.filters());
        let predicate = match query.search() {
            Some(term) => and_maybe(self, predicate, self.search(term)),
            None => predicate,
        };
        let predicate = and_maybe(self, predicate, self.visibility(query.visibility()));
        predicate.unwrap_or_else(|| self.match_all())
    }
}

fn and_maybe<T: FilterTranslator + ?Sized>(
    translator: &T,
    left: Option<T::Predicate>,
    right: Option<T::Predicate>,
) -> Option<T::Predicate> {
    match (left, right) {
        (Some(left), Some(right)) => Some(translator.conjoin(left, right)),
        (left, None) => left,
        (None, right) => right,
    }
}
