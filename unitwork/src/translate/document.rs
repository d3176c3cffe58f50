//! Document-store translation
//!
//! Criteria become a [`DocumentFilter`] tree. The tree renders to the
//! Mongo-style filter document a document database expects
//! ([`DocumentFilter::to_document`]) and can also be evaluated in process
//! against a JSON document ([`DocumentFilter::matches`]), which is what the
//! in-memory store does.
//!
//! ```rust
//! use serde_json::json;
//! use unitwork::repository::{DeletedVisibility, Identifier};
//! use unitwork::translate::{DocumentTranslator, FilterTranslator};
//!
//! let id = Identifier::new().like("name", "ad_%");
//! let filter = DocumentTranslator.scoped(id.criteria(), DeletedVisibility::Include);
//!
//! assert_eq!(
//!     filter.to_document(),
//!     json!({"name": {"$regex": "^ad..*$", "$options": "i"}})
//! );
//! assert!(filter.matches(&json!({"name": "ADA LOVELACE"})));
//! ```

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{Comparison, FilterTranslator};
use crate::repository::{
    DeletedVisibility, FilterCriterion, FilterOperator, FilterValue, SortField, DELETED_AT_FIELD,
    ID_FIELD,
};

/// Native predicate of the document-store backend
#[derive(Debug, Clone)]
pub enum DocumentFilter {
    /// Matches every document
    All,
    /// Matches no document
    None,
    Compare {
        field: String,
        op: Comparison,
        value: FilterValue,
    },
    Regex {
        field: String,
        regex: Regex,
        case_insensitive: bool,
    },
    In {
        field: String,
        values: Vec<FilterValue>,
    },
    NotIn {
        field: String,
        values: Vec<FilterValue>,
    },
    /// Inclusive on both ends
    Range {
        field: String,
        start: FilterValue,
        end: FilterValue,
    },
    /// Field absent or `null`
    Missing { field: String },
    /// Field present and not `null`
    Present { field: String },
    /// Array field holding `value` as an element
    ElemMatch { field: String, value: FilterValue },
    And(Vec<DocumentFilter>),
    Or(Vec<DocumentFilter>),
}

impl DocumentFilter {
    /// Render as a Mongo-style filter document
    pub fn to_document(&self) -> Value {
        match self {
            Self::All => Value::Object(Map::new()),
            Self::None => object("$nor", Value::Array(vec![Value::Object(Map::new())])),
            Self::Compare { field, op, value } => {
                object(field, object(op.as_document(), value.clone().into()))
            }
            Self::Regex {
                field,
                regex,
                case_insensitive,
            } => {
                let mut condition = Map::new();
                condition.insert("$regex".to_string(), Value::from(regex.as_str()));
                if *case_insensitive {
                    condition.insert("$options".to_string(), Value::from("i"));
                }
                object(field, Value::Object(condition))
            }
            Self::In { field, values } => object(field, object("$in", list(values))),
            Self::NotIn { field, values } => object(field, object("$nin", list(values))),
            Self::Range { field, start, end } => {
                let mut condition = Map::new();
                condition.insert("$gte".to_string(), start.clone().into());
                condition.insert("$lte".to_string(), end.clone().into());
                object(field, Value::Object(condition))
            }
            Self::Missing { field } => object(field, Value::Null),
            Self::Present { field } => {
                let mut condition = Map::new();
                condition.insert("$exists".to_string(), Value::Bool(true));
                condition.insert("$ne".to_string(), Value::Null);
                object(field, Value::Object(condition))
            }
            Self::ElemMatch { field, value } => object(
                field,
                object("$elemMatch", object("$eq", value.clone().into())),
            ),
            Self::And(filters) => object(
                "$and",
                Value::Array(filters.iter().map(Self::to_document).collect()),
            ),
            Self::Or(filters) => object(
                "$or",
                Value::Array(filters.iter().map(Self::to_document).collect()),
            ),
        }
    }

    /// Evaluate against a JSON document; dotted fields walk nested objects
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Self::All => true,
            Self::None => false,
            Self::Compare { field, op, value } => {
                let actual = lookup(document, field);
                match op {
                    Comparison::Eq => equals(actual, value),
                    Comparison::Ne => !equals(actual, value),
                    _ => compare(actual, value).is_some_and(|ordering| op.holds(ordering)),
                }
            }
            Self::Regex { field, regex, .. } => lookup(document, field)
                .and_then(Value::as_str)
                .is_some_and(|text| regex.is_match(text)),
            Self::In { field, values } => {
                let actual = lookup(document, field);
                values.iter().any(|value| equals(actual, value))
            }
            Self::NotIn { field, values } => {
                let actual = lookup(document, field);
                !values.iter().any(|value| equals(actual, value))
            }
            Self::Range { field, start, end } => {
                let actual = lookup(document, field);
                compare(actual, start).is_some_and(|o| o != Ordering::Less)
                    && compare(actual, end).is_some_and(|o| o != Ordering::Greater)
            }
            Self::Missing { field } => lookup(document, field).map_or(true, Value::is_null),
            Self::Present { field } => lookup(document, field).is_some_and(|v| !v.is_null()),
            Self::ElemMatch { field, value } => lookup(document, field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.iter().any(|item| equals(Some(item), value))),
            Self::And(filters) => filters.iter().all(|f| f.matches(document)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(document)),
        }
    }
}

fn object(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn list(values: &[FilterValue]) -> Value {
    Value::Array(values.iter().cloned().map(Value::from).collect())
}

/// Resolve a dotted path; numeric segments index into arrays
pub(crate) fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Equality with document-store semantics: `null` matches missing fields and
/// a scalar matches an array holding it
fn equals(actual: Option<&Value>, expected: &FilterValue) -> bool {
    match (actual, expected) {
        (None, FilterValue::Null) => true,
        (Some(Value::Array(items)), expected) if !matches!(expected, FilterValue::List(_)) => {
            items.iter().any(|item| equals(Some(item), expected))
        }
        (actual, expected) => compare(actual, expected) == Some(Ordering::Equal),
    }
}

/// Order a stored JSON value against a filter operand; `None` when incomparable
fn compare(actual: Option<&Value>, expected: &FilterValue) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Null, FilterValue::Null) => Some(Ordering::Equal),
        (Value::Bool(a), FilterValue::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), FilterValue::Integer(b)) => match a.as_i64() {
            Some(a) => Some(a.cmp(b)),
            None => a.as_f64()?.partial_cmp(&(*b as f64)),
        },
        (Value::Number(a), FilterValue::Float(b)) => a.as_f64()?.partial_cmp(b),
        (Value::String(a), FilterValue::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (Value::String(a), FilterValue::Timestamp(b)) => {
            let a = DateTime::parse_from_rfc3339(a).ok()?.with_timezone(&Utc);
            Some(a.cmp(b))
        }
        (Value::String(a), FilterValue::Uuid(b)) => Uuid::parse_str(a).ok().map(|a| a.cmp(b)),
        (Value::Array(items), FilterValue::List(expected)) => {
            let same = items.len() == expected.len()
                && items
                    .iter()
                    .zip(expected)
                    .all(|(item, value)| compare(Some(item), value) == Some(Ordering::Equal));
            same.then_some(Ordering::Equal)
        }
        _ => None,
    }
}

/// Order two stored values for sorting: missing/null, bool, number, string, other
pub(crate) fn compare_stored(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Convert a SQL `LIKE` pattern into an anchored regular expression
///
/// Regex metacharacters are escaped first, then `%` becomes `.*` and `_`
/// becomes `.`.
pub fn like_to_regex(pattern: &str) -> String {
    format!(
        "^{}$",
        regex::escape(pattern).replace('%', ".*").replace('_', ".")
    )
}

/// Ordered `(field, direction)` pairs; `id` ascending when `sort` is empty
pub fn sort_document(sort: &[SortField]) -> Vec<(String, i32)> {
    if sort.is_empty() {
        return vec![(ID_FIELD.to_string(), 1)];
    }
    sort.iter()
        .map(|s| (s.field.clone(), s.order.as_direction()))
        .collect()
}

/// Translator producing [`DocumentFilter`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentTranslator;

impl DocumentTranslator {
    fn regex(&self, field: &str, source: &str, case_insensitive: bool) -> Option<DocumentFilter> {
        match RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .build()
        {
            Ok(regex) => Some(DocumentFilter::Regex {
                field: field.to_string(),
                regex,
                case_insensitive,
            }),
            Err(e) => {
                tracing::warn!(field, error = %e, "pattern could not be compiled; criterion skipped");
                None
            }
        }
    }
}

impl FilterTranslator for DocumentTranslator {
    type Predicate = DocumentFilter;

    fn match_all(&self) -> DocumentFilter {
        DocumentFilter::All
    }

    fn match_none(&self) -> DocumentFilter {
        DocumentFilter::None
    }

    fn conjoin(&self, left: DocumentFilter, right: DocumentFilter) -> DocumentFilter {
        match (left, right) {
            (DocumentFilter::And(mut items), DocumentFilter::And(more)) => {
                items.extend(more);
                DocumentFilter::And(items)
            }
            (DocumentFilter::And(mut items), right) => {
                items.push(right);
                DocumentFilter::And(items)
            }
            (left, right) => DocumentFilter::And(vec![left, right]),
        }
    }

    fn disjoin(&self, left: DocumentFilter, right: DocumentFilter) -> DocumentFilter {
        match (left, right) {
            (DocumentFilter::Or(mut items), DocumentFilter::Or(more)) => {
                items.extend(more);
                DocumentFilter::Or(items)
            }
            (DocumentFilter::Or(mut items), right) => {
                items.push(right);
                DocumentFilter::Or(items)
            }
            (left, right) => DocumentFilter::Or(vec![left, right]),
        }
    }

    fn leaf(&self, criterion: &FilterCriterion) -> Option<DocumentFilter> {
        let operator = criterion.operator.as_ref()?;
        let field = criterion.field.clone();

        if let Some(op) = Comparison::from_operator(operator) {
            let value = criterion.value.clone().unwrap_or(FilterValue::Null);
            return Some(match (op, value) {
                (Comparison::Eq, FilterValue::Null) => DocumentFilter::Missing { field },
                (Comparison::Ne, FilterValue::Null) => DocumentFilter::Present { field },
                (op, value) => DocumentFilter::Compare { field, op, value },
            });
        }

        match operator {
            FilterOperator::Like => {
                let pattern = criterion.value.as_ref()?.as_text()?;
                self.regex(&field, &like_to_regex(&pattern), true)
            }
            FilterOperator::In => {
                let values: Vec<FilterValue> = criterion.operands().into_iter().cloned().collect();
                if values.is_empty() {
                    return Some(self.match_none());
                }
                Some(DocumentFilter::In { field, values })
            }
            FilterOperator::NotIn => {
                let values: Vec<FilterValue> = criterion.operands().into_iter().cloned().collect();
                if values.is_empty() {
                    return Some(self.match_all());
                }
                Some(DocumentFilter::NotIn { field, values })
            }
            FilterOperator::Between => match criterion.operands().as_slice() {
                [start, end, ..] => Some(DocumentFilter::Range {
                    field,
                    start: (*start).clone(),
                    end: (*end).clone(),
                }),
                _ => None,
            },
            FilterOperator::IsNull => Some(DocumentFilter::Missing { field }),
            FilterOperator::IsNotNull => Some(DocumentFilter::Present { field }),
            FilterOperator::Contains => Some(DocumentFilter::ElemMatch {
                field,
                value: criterion.value.clone()?,
            }),
            FilterOperator::Has => match criterion.value.as_ref().and_then(FilterValue::as_text) {
                Some(key) => Some(DocumentFilter::Present {
                    field: format!("{}.{}", field, key),
                }),
                None => Some(DocumentFilter::Present { field }),
            },
            FilterOperator::Unrecognized(_) => None,
            FilterOperator::Equal
            | FilterOperator::NotEqual
            | FilterOperator::GreaterThan
            | FilterOperator::GreaterOrEqual
            | FilterOperator::LessThan
            | FilterOperator::LessOrEqual => None,
        }
    }

    fn search(&self, term: &str) -> Option<DocumentFilter> {
        self.regex(ID_FIELD, &regex::escape(term), false)
    }

    fn visibility(&self, visibility: DeletedVisibility) -> Option<DocumentFilter> {
        let field = DELETED_AT_FIELD.to_string();
        match visibility {
            DeletedVisibility::Exclude => Some(DocumentFilter::Missing { field }),
            DeletedVisibility::Include => None,
            DeletedVisibility::Only => Some(DocumentFilter::Present { field }),
        }
    }
}
