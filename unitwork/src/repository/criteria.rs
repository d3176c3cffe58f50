//! Backend-agnostic filter criteria
//!
//! A [`FilterCriterion`] is either a *leaf* (`field`, `operator`, `value`/`values`)
//! or a *group* holding a nested sequence that is translated as one isolated
//! sub-predicate. The optional `logical_op` on a criterion decides how the
//! **next** criterion in the same sequence joins the accumulated predicate; the
//! one on the last element is never consulted.
//!
//! Wire shape:
//!
//! ```json
//! {"field": "age", "operator": "gte", "value": 18, "logicalOp": "or"}
//! {"group": [{"field": "a", "operator": "eq", "value": 1}]}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::RepositoryError;

/// Comparison operators understood by every backend translator
///
/// Tokens outside the fixed vocabulary deserialize into
/// [`FilterOperator::Unrecognized`], which translators skip without error.
///
/// ```rust
/// use unitwork::repository::FilterOperator;
///
/// assert_eq!(FilterOperator::from("not_in"), FilterOperator::NotIn);
/// assert_eq!(FilterOperator::GreaterOrEqual.as_str(), "gte");
/// assert!(!FilterOperator::from("regex").is_recognized());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterOperator {
    /// `eq`
    Equal,
    /// `neq`
    NotEqual,
    /// `gt`
    GreaterThan,
    /// `gte`
    GreaterOrEqual,
    /// `lt`
    LessThan,
    /// `lte`
    LessOrEqual,
    /// `like`, `%` matches any run and `_` any single character
    Like,
    /// `in`
    In,
    /// `not_in`
    NotIn,
    /// `is_null`
    IsNull,
    /// `is_not_null`
    IsNotNull,
    /// `between`, inclusive on both ends
    Between,
    /// `contains`, array/document containment
    Contains,
    /// `has`, key or field presence
    Has,
    /// Any other token; ignored by translators
    Unrecognized(String),
}

impl FilterOperator {
    /// The fourteen recognized operators, in wire order
    pub const RECOGNIZED: [FilterOperator; 14] = [
        Self::Equal,
        Self::NotEqual,
        Self::GreaterThan,
        Self::GreaterOrEqual,
        Self::LessThan,
        Self::LessOrEqual,
        Self::Like,
        Self::In,
        Self::NotIn,
        Self::IsNull,
        Self::IsNotNull,
        Self::Between,
        Self::Contains,
        Self::Has,
    ];

    /// Wire token for this operator
    pub fn as_str(&self) -> &str {
        match self {
            Self::Equal => "eq",
            Self::NotEqual => "neq",
            Self::GreaterThan => "gt",
            Self::GreaterOrEqual => "gte",
            Self::LessThan => "lt",
            Self::LessOrEqual => "lte",
            Self::Like => "like",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::Between => "between",
            Self::Contains => "contains",
            Self::Has => "has",
            Self::Unrecognized(token) => token,
        }
    }

    /// `false` only for [`FilterOperator::Unrecognized`]
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl From<&str> for FilterOperator {
    fn from(token: &str) -> Self {
        match token {
            "eq" => Self::Equal,
            "neq" => Self::NotEqual,
            "gt" => Self::GreaterThan,
            "gte" => Self::GreaterOrEqual,
            "lt" => Self::LessThan,
            "lte" => Self::LessOrEqual,
            "like" => Self::Like,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "is_null" => Self::IsNull,
            "is_not_null" => Self::IsNotNull,
            "between" => Self::Between,
            "contains" => Self::Contains,
            "has" => Self::Has,
            other => Self::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for FilterOperator {
    fn from(token: String) -> Self {
        Self::from(token.as_str())
    }
}

impl From<FilterOperator> for String {
    fn from(operator: FilterOperator) -> Self {
        match operator {
            FilterOperator::Unrecognized(token) => token,
            recognized => recognized.as_str().to_string(),
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the next criterion joins the accumulated predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "and"),
            Self::Or => write!(f, "or"),
        }
    }
}

/// A scalar or homogeneous list usable as a filter operand
///
/// On the wire a value is plain JSON. Objects are rejected when deserializing;
/// nested or mixed-type lists are rejected by [`FilterValue::validate`].
///
/// ```rust
/// use unitwork::repository::FilterValue;
///
/// let value: FilterValue = serde_json::from_str("[1, 2, 3]").unwrap();
/// assert!(value.validate().is_ok());
///
/// assert!(serde_json::from_str::<FilterValue>(r#"{"a": 1}"#).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum FilterValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    List(Vec<FilterValue>),
}

impl FilterValue {
    /// Short type name used in validation messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Uuid(_) => "uuid",
            Self::List(_) => "list",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text form for string-like values (strings, uuids, timestamps)
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Uuid(u) => Some(u.to_string()),
            Self::Timestamp(t) => Some(t.to_rfc3339()),
            _ => None,
        }
    }

    /// Accept scalars and homogeneous lists of scalars
    ///
    /// Integers and floats count as the same kind; `null` may appear in any list.
    pub fn validate(&self) -> Result<(), RepositoryError> {
        let Self::List(items) = self else {
            return Ok(());
        };
        let mut family: Option<&'static str> = None;
        for item in items {
            let item_family = match item {
                Self::List(_) => {
                    return Err(RepositoryError::validation_failed(
                        "nested lists are not supported as filter values",
                    ))
                }
                Self::Null => continue,
                Self::Integer(_) | Self::Float(_) => "number",
                other => other.kind(),
            };
            match family {
                None => family = Some(item_family),
                Some(expected) if expected != item_family => {
                    return Err(RepositoryError::validation_failed(format!(
                        "filter list mixes {} and {} values",
                        expected, item_family
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => write!(f, "{:?}", s),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Uuid(u) => write!(f, "{}", u),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl TryFrom<serde_json::Value> for FilterValue {
    type Error = RepositoryError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Self::Integer(i)),
                None => n.as_f64().map(Self::Float).ok_or_else(|| {
                    RepositoryError::validation_failed(format!("unrepresentable number {}", n))
                }),
            },
            Value::String(s) => Ok(Self::String(s)),
            Value::Array(items) => items
                .into_iter()
                .map(Self::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            Value::Object(_) => Err(RepositoryError::validation_failed(
                "maps and structs are not supported as filter values",
            )),
        }
    }
}

impl From<FilterValue> for serde_json::Value {
    fn from(value: FilterValue) -> Self {
        match value {
            FilterValue::Null => Self::Null,
            FilterValue::Bool(b) => Self::Bool(b),
            FilterValue::Integer(i) => Self::from(i),
            FilterValue::Float(x) => Self::from(x),
            FilterValue::String(s) => Self::String(s),
            FilterValue::Timestamp(t) => Self::String(t.to_rfc3339()),
            FilterValue::Uuid(u) => Self::String(u.to_string()),
            FilterValue::List(items) => Self::Array(items.into_iter().map(Self::from).collect()),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for FilterValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A single leaf condition or a nested group of conditions
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCriterion {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<FilterOperator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FilterValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<FilterValue>,
    /// Joins the *next* criterion in the sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_op: Option<LogicalOperator>,
    /// When non-empty, `field`/`operator`/`value` are ignored
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<FilterCriterion>,
}

impl FilterCriterion {
    /// Leaf with a single operand
    pub fn leaf(
        field: impl Into<String>,
        operator: FilterOperator,
        value: Option<FilterValue>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: Some(operator),
            value,
            ..Self::default()
        }
    }

    /// Leaf with a list operand (`in`, `not_in`, `between`)
    pub fn with_values(
        field: impl Into<String>,
        operator: FilterOperator,
        values: Vec<FilterValue>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: Some(operator),
            values,
            ..Self::default()
        }
    }

    /// Nested sequence translated as one parenthesized sub-predicate
    ///
    /// This is the only way to express `(a OR b) AND c`.
    pub fn group(criteria: Vec<FilterCriterion>) -> Self {
        Self {
            group: criteria,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_logical_op(mut self, op: LogicalOperator) -> Self {
        self.logical_op = Some(op);
        self
    }

    pub fn is_group(&self) -> bool {
        !self.group.is_empty()
    }

    /// `value`, then `values` when `value` is absent
    pub fn operands(&self) -> Vec<&FilterValue> {
        match &self.value {
            Some(FilterValue::List(items)) if self.values.is_empty() => items.iter().collect(),
            Some(value) if self.values.is_empty() => vec![value],
            _ => self.values.iter().collect(),
        }
    }

    /// Validate every value in this criterion and its group
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if let Some(value) = &self.value {
            value.validate().map_err(|e| self.annotate(e))?;
        }
        FilterValue::List(self.values.clone())
            .validate()
            .map_err(|e| self.annotate(e))?;
        validate_criteria(&self.group)
    }

    fn annotate(&self, err: RepositoryError) -> RepositoryError {
        RepositoryError::validation_failed(format!("field `{}`: {}", self.field, err.message))
    }
}

impl fmt::Display for FilterCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_group() {
            write!(f, "(")?;
            fmt_sequence(&self.group, f)?;
            return write!(f, ")");
        }
        let operator = self.operator.as_ref().map_or("?", FilterOperator::as_str);
        write!(f, "{} {}", self.field, operator)?;
        if let Some(value) = &self.value {
            write!(f, " {}", value)?;
        }
        if !self.values.is_empty() {
            write!(f, " {}", FilterValue::List(self.values.clone()))?;
        }
        Ok(())
    }
}

/// Render a criteria sequence with its logical joins, e.g. `a eq 1 or b eq 2`
pub(crate) fn fmt_sequence(criteria: &[FilterCriterion], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, criterion) in criteria.iter().enumerate() {
        if i > 0 {
            let join = criteria[i - 1].logical_op.unwrap_or(LogicalOperator::And);
            write!(f, " {} ", join)?;
        }
        write!(f, "{}", criterion)?;
    }
    Ok(())
}

/// Reject unsupported filter values anywhere in a criteria sequence
pub fn validate_criteria(criteria: &[FilterCriterion]) -> Result<(), RepositoryError> {
    criteria.iter().try_for_each(FilterCriterion::validate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_tokens_round_trip_through_strings() {
        for operator in FilterOperator::RECOGNIZED {
            let token = operator.as_str().to_string();
            assert_eq!(FilterOperator::from(token.as_str()), operator);
        }
        assert_eq!(FilterOperator::RECOGNIZED.len(), 14);
    }

    #[test]
    fn test_unrecognized_operator_is_tolerated() {
        let criterion: FilterCriterion =
            serde_json::from_value(json!({"field": "name", "operator": "regex", "value": "x"}))
                .unwrap();
        assert_eq!(
            criterion.operator,
            Some(FilterOperator::Unrecognized("regex".to_string()))
        );
        assert_eq!(
            serde_json::to_value(&criterion).unwrap()["operator"],
            json!("regex")
        );
    }

    #[test]
    fn test_criterion_wire_shape() {
        let criterion: FilterCriterion = serde_json::from_value(json!({
            "field": "age",
            "operator": "between",
            "values": [18, 65],
            "logicalOp": "or"
        }))
        .unwrap();
        assert_eq!(criterion.operator, Some(FilterOperator::Between));
        assert_eq!(
            criterion.values,
            vec![FilterValue::Integer(18), FilterValue::Integer(65)]
        );
        assert_eq!(criterion.logical_op, Some(LogicalOperator::Or));
        assert!(!criterion.is_group());
    }

    #[test]
    fn test_group_wire_shape() {
        let criterion: FilterCriterion = serde_json::from_value(json!({
            "group": [
                {"field": "a", "operator": "eq", "value": 1, "logicalOp": "or"},
                {"field": "b", "operator": "eq", "value": 2}
            ]
        }))
        .unwrap();
        assert!(criterion.is_group());
        assert_eq!(criterion.group.len(), 2);
        assert_eq!(criterion.to_string(), "(a eq 1 or b eq 2)");
    }

    #[test]
    fn test_serialization_skips_empty_parts() {
        let criterion = FilterCriterion::leaf("deleted_at", FilterOperator::IsNull, None);
        assert_eq!(
            serde_json::to_value(&criterion).unwrap(),
            json!({"field": "deleted_at", "operator": "is_null"})
        );
    }

    #[test]
    fn test_map_values_are_rejected() {
        let result = serde_json::from_value::<FilterCriterion>(json!({
            "field": "meta",
            "operator": "eq",
            "value": {"nested": true}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_accepts_scalars_and_homogeneous_lists() {
        assert!(FilterValue::from("x").validate().is_ok());
        assert!(FilterValue::from(vec![1, 2, 3]).validate().is_ok());
        assert!(FilterValue::List(vec![FilterValue::Integer(1), FilterValue::Float(2.5)])
            .validate()
            .is_ok());
        assert!(FilterValue::List(vec![FilterValue::Null, FilterValue::from("a")])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_mixed_and_nested_lists() {
        let mixed = FilterValue::List(vec![FilterValue::from("a"), FilterValue::Bool(true)]);
        assert!(mixed.validate().is_err());

        let nested = FilterValue::List(vec![FilterValue::from(vec![1])]);
        assert!(nested.validate().is_err());
    }

    #[test]
    fn test_validate_criteria_walks_groups() {
        let bad = FilterCriterion::with_values(
            "tags",
            FilterOperator::In,
            vec![FilterValue::from("a"), FilterValue::Integer(1)],
        );
        let criteria = vec![FilterCriterion::group(vec![bad])];
        let err = validate_criteria(&criteria).unwrap_err();
        assert!(err.message.contains("field `tags`"));
    }

    #[test]
    fn test_operands_prefer_values_list() {
        let criterion = FilterCriterion::with_values(
            "id",
            FilterOperator::In,
            vec![FilterValue::Integer(1), FilterValue::Integer(2)],
        );
        assert_eq!(criterion.operands().len(), 2);

        let packed = FilterCriterion::leaf("id", FilterOperator::In, Some(FilterValue::from(vec![3])));
        assert_eq!(packed.operands(), vec![&FilterValue::Integer(3)]);
    }

    #[test]
    fn test_large_unsigned_number_becomes_float() {
        let value = FilterValue::try_from(json!(u64::MAX)).unwrap();
        assert!(matches!(value, FilterValue::Float(_)));
    }
}
