//! PostgreSQL translation
//!
//! Criteria become an [`SqlPredicate`] tree which is pushed into a
//! [`sqlx::QueryBuilder`] with every operand bound as a parameter. Column
//! names are quoted identifiers; dotted names address `table.column`.

use serde_json::Value;
use sqlx::{types::Json, Postgres, QueryBuilder};

use super::{Comparison, FilterTranslator};
use crate::repository::{
    DeletedVisibility, FilterCriterion, FilterOperator, FilterValue, Pagination, SortField,
    DELETED_AT_FIELD, ID_FIELD,
};

/// Native predicate of the PostgreSQL backend
#[derive(Debug, Clone, PartialEq)]
pub enum SqlPredicate {
    /// `1 = 1`
    Always,
    /// `1 = 0`
    Never,
    Compare {
        column: String,
        op: Comparison,
        value: FilterValue,
    },
    IsNull(String),
    IsNotNull(String),
    /// Case-sensitive `LIKE`
    Like { column: String, pattern: String },
    In {
        column: String,
        values: Vec<FilterValue>,
        negated: bool,
    },
    Between {
        column: String,
        start: FilterValue,
        end: FilterValue,
    },
    /// `jsonb @>` against a one-element array
    Contains { column: String, value: FilterValue },
    /// `jsonb ? key`
    HasKey { column: String, key: String },
    /// `CAST(column AS TEXT) LIKE '%term%'`, with the term matched literally
    TextSearch { column: String, term: String },
    And(Vec<SqlPredicate>),
    Or(Vec<SqlPredicate>),
}

impl SqlPredicate {
    /// Append this predicate to `builder`, binding every operand
    pub fn push_to<'args>(&self, builder: &mut QueryBuilder<'args, Postgres>) {
        match self {
            Self::Always => {
                builder.push("1 = 1");
            }
            Self::Never => {
                builder.push("1 = 0");
            }
            Self::Compare { column, op, value } => {
                builder.push(quote_ident(column));
                builder.push(" ").push(op.as_sql()).push(" ");
                push_value(builder, value);
            }
            Self::IsNull(column) => {
                builder.push(quote_ident(column)).push(" IS NULL");
            }
            Self::IsNotNull(column) => {
                builder.push(quote_ident(column)).push(" IS NOT NULL");
            }
            Self::Like { column, pattern } => {
                builder.push(quote_ident(column)).push(" LIKE ");
                builder.push_bind(pattern.clone());
            }
            Self::In {
                column,
                values,
                negated,
            } => {
                builder.push(quote_ident(column));
                builder.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        builder.push(", ");
                    }
                    push_value(builder, value);
                }
                builder.push(")");
            }
            Self::Between { column, start, end } => {
                builder.push(quote_ident(column)).push(" BETWEEN ");
                push_value(builder, start);
                builder.push(" AND ");
                push_value(builder, end);
            }
            Self::Contains { column, value } => {
                let element = match value.clone() {
                    FilterValue::List(items) => {
                        Value::Array(items.into_iter().map(Value::from).collect())
                    }
                    scalar => Value::Array(vec![Value::from(scalar)]),
                };
                builder.push(quote_ident(column)).push(" @> ");
                builder.push_bind(Json(element));
            }
            Self::HasKey { column, key } => {
                builder.push(quote_ident(column)).push(" ? ");
                builder.push_bind(key.clone());
            }
            Self::TextSearch { column, term } => {
                builder
                    .push("CAST(")
                    .push(quote_ident(column))
                    .push(" AS TEXT) LIKE ");
                builder.push_bind(format!("%{}%", escape_like(term)));
                builder.push(" ESCAPE '\\'");
            }
            Self::And(items) => push_joined(builder, items, " AND "),
            Self::Or(items) => push_joined(builder, items, " OR "),
        }
    }
}

fn push_joined<'args>(
    builder: &mut QueryBuilder<'args, Postgres>,
    items: &[SqlPredicate],
    separator: &str,
) {
    builder.push("(");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            builder.push(separator);
        }
        item.push_to(builder);
    }
    builder.push(")");
}

/// Bind one operand; `null` is inlined, lists are bound as `jsonb`
fn push_value<'args>(builder: &mut QueryBuilder<'args, Postgres>, value: &FilterValue) {
    match value {
        FilterValue::Null => {
            builder.push("NULL");
        }
        FilterValue::Bool(b) => {
            builder.push_bind(*b);
        }
        FilterValue::Integer(i) => {
            builder.push_bind(*i);
        }
        FilterValue::Float(x) => {
            builder.push_bind(*x);
        }
        FilterValue::String(s) => {
            builder.push_bind(s.clone());
        }
        FilterValue::Timestamp(t) => {
            builder.push_bind(*t);
        }
        FilterValue::Uuid(u) => {
            builder.push_bind(*u);
        }
        FilterValue::List(_) => {
            builder.push_bind(Json(Value::from(value.clone())));
        }
    }
}

/// Escape `\`, `%` and `_` so `LIKE` matches `term` literally under `ESCAPE '\'`
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Quote a possibly dotted identifier: `a.b` becomes `"a"."b"`
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Append ` ORDER BY ...`; `"id" ASC` when `sort` is empty
pub fn push_order_by<'args>(builder: &mut QueryBuilder<'args, Postgres>, sort: &[SortField]) {
    builder.push(" ORDER BY ");
    if sort.is_empty() {
        builder.push(quote_ident(ID_FIELD)).push(" ASC");
        return;
    }
    for (i, field) in sort.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder
            .push(quote_ident(&field.field))
            .push(" ")
            .push(field.order.as_sql());
    }
}

/// Append ` LIMIT $n OFFSET $m`
pub fn push_window<'args>(builder: &mut QueryBuilder<'args, Postgres>, window: Pagination) {
    builder.push(" LIMIT ");
    builder.push_bind(i64::try_from(window.limit).unwrap_or(i64::MAX));
    builder.push(" OFFSET ");
    builder.push_bind(i64::try_from(window.offset).unwrap_or(i64::MAX));
}

/// Translator producing [`SqlPredicate`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlTranslator;

impl FilterTranslator for SqlTranslator {
    type Predicate = SqlPredicate;

    fn match_all(&self) -> SqlPredicate {
        SqlPredicate::Always
    }

    fn match_none(&self) -> SqlPredicate {
        SqlPredicate::Never
    }

    fn conjoin(&self, left: SqlPredicate, right: SqlPredicate) -> SqlPredicate {
        match left {
            SqlPredicate::And(mut items) => {
                items.push(right);
                SqlPredicate::And(items)
            }
            left => SqlPredicate::And(vec![left, right]),
        }
    }

    fn disjoin(&self, left: SqlPredicate, right: SqlPredicate) -> SqlPredicate {
        match left {
            SqlPredicate::Or(mut items) => {
                items.push(right);
                SqlPredicate::Or(items)
            }
            left => SqlPredicate::Or(vec![left, right]),
        }
    }

    fn leaf(&self, criterion: &FilterCriterion) -> Option<SqlPredicate> {
        let operator = criterion.operator.as_ref()?;
        let column = criterion.field.clone();

        if let Some(op) = Comparison::from_operator(operator) {
            let value = criterion.value.clone().unwrap_or(FilterValue::Null);
            return Some(match (op, value) {
                (Comparison::Eq, FilterValue::Null) => SqlPredicate::IsNull(column),
                (Comparison::Ne, FilterValue::Null) => SqlPredicate::IsNotNull(column),
                (op, value) => SqlPredicate::Compare { column, op, value },
            });
        }

        match operator {
            FilterOperator::Like => Some(SqlPredicate::Like {
                column,
                pattern: criterion.value.as_ref()?.as_text()?,
            }),
            FilterOperator::In | FilterOperator::NotIn => {
                let negated = *operator == FilterOperator::NotIn;
                let values: Vec<FilterValue> = criterion.operands().into_iter().cloned().collect();
                if values.is_empty() {
                    return Some(if negated {
                        self.match_all()
                    } else {
                        self.match_none()
                    });
                }
                Some(SqlPredicate::In {
                    column,
                    values,
                    negated,
                })
            }
            FilterOperator::Between => match criterion.operands().as_slice() {
                [start, end, ..] => Some(SqlPredicate::Between {
                    column,
                    start: (*start).clone(),
                    end: (*end).clone(),
                }),
                _ => None,
            },
            FilterOperator::IsNull => Some(SqlPredicate::IsNull(column)),
            FilterOperator::IsNotNull => Some(SqlPredicate::IsNotNull(column)),
            FilterOperator::Contains => Some(SqlPredicate::Contains {
                column,
                value: criterion.value.clone()?,
            }),
            FilterOperator::Has => match criterion.value.as_ref().and_then(FilterValue::as_text) {
                Some(key) => Some(SqlPredicate::HasKey { column, key }),
                None => Some(SqlPredicate::IsNotNull(column)),
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

    fn search(&self, term: &str) -> Option<SqlPredicate> {
        Some(SqlPredicate::TextSearch {
            column: ID_FIELD.to_string(),
            term: term.to_string(),
        })
    }

    fn visibility(&self, visibility: DeletedVisibility) -> Option<SqlPredicate> {
        match visibility {
            DeletedVisibility::Exclude => Some(SqlPredicate::IsNull(DELETED_AT_FIELD.to_string())),
            DeletedVisibility::Include => None,
            DeletedVisibility::Only => Some(SqlPredicate::IsNotNull(DELETED_AT_FIELD.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{Identifier, QueryParams, SortOrder};

    fn render(predicate: &SqlPredicate) -> String {
        let mut builder = QueryBuilder::<Postgres>::new("");
        predicate.push_to(&mut builder);
        builder.sql().to_string()
    }

    fn where_clause(id: &Identifier) -> String {
        render(&SqlTranslator.scoped(id.criteria(), DeletedVisibility::Include))
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("name"), "\"name\"");
        assert_eq!(quote_ident("u.name"), "\"u\".\"name\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_comparisons_bind_parameters() {
        assert_eq!(where_clause(&Identifier::new().equal("age", 30)), "\"age\" = $1");
        assert_eq!(
            where_clause(&Identifier::new().not_equal("status", "banned")),
            "\"status\" <> $1"
        );
        assert_eq!(
            where_clause(&Identifier::new().greater_or_equal("age", 18).less_than("age", 65)),
            "(\"age\" >= $1 AND \"age\" < $2)"
        );
    }

    #[test]
    fn test_equal_null_becomes_is_null() {
        let id = Identifier::new().equal("manager", Option::<String>::None);
        assert_eq!(where_clause(&id), "\"manager\" IS NULL");

        let id = Identifier::new().not_equal("manager", Option::<String>::None);
        assert_eq!(where_clause(&id), "\"manager\" IS NOT NULL");
    }

    #[test]
    fn test_in_lists() {
        assert_eq!(
            where_clause(&Identifier::new().in_values("role", ["admin", "owner"])),
            "\"role\" IN ($1, $2)"
        );
        assert_eq!(
            where_clause(&Identifier::new().not_in("role", ["guest"])),
            "\"role\" NOT IN ($1)"
        );
        assert_eq!(
            where_clause(&Identifier::new().in_values("role", Vec::<String>::new())),
            "1 = 0"
        );
        assert_eq!(
            where_clause(&Identifier::new().not_in("role", Vec::<String>::new())),
            "1 = 1"
        );
    }

    #[test]
    fn test_like_between_and_null_checks() {
        assert_eq!(
            where_clause(&Identifier::new().like("name", "Ad%")),
            "\"name\" LIKE $1"
        );
        assert_eq!(
            where_clause(&Identifier::new().between("age", 18, 30)),
            "\"age\" BETWEEN $1 AND $2"
        );
        assert_eq!(
            where_clause(&Identifier::new().is_null("deleted_at").is_not_null("email")),
            "(\"deleted_at\" IS NULL AND \"email\" IS NOT NULL)"
        );
    }

    #[test]
    fn test_json_operators() {
        assert_eq!(
            where_clause(&Identifier::new().contains("tags", "rust")),
            "\"tags\" @> $1"
        );
        assert_eq!(
            where_clause(&Identifier::new().has_key("settings", "theme")),
            "\"settings\" ? $1"
        );
        assert_eq!(
            where_clause(&Identifier::new().has("avatar")),
            "\"avatar\" IS NOT NULL"
        );
    }

    #[test]
    fn test_or_chain_and_group() {
        let role = Identifier::new()
            .equal("role", "admin")
            .or(&Identifier::new().equal("role", "owner"));
        let id = Identifier::new()
            .push(FilterCriterion::group(role.to_filter_criteria()))
            .and(&Identifier::new().equal("active", true));
        assert_eq!(
            where_clause(&id),
            "((\"role\" = $1 OR \"role\" = $2) AND \"active\" = $3)"
        );
    }

    #[test]
    fn test_search_term_is_matched_literally() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("7f3a"), "7f3a");
        assert_eq!(
            SqlTranslator.search("a_b"),
            Some(SqlPredicate::TextSearch {
                column: "id".to_string(),
                term: "a_b".to_string(),
            })
        );
    }

    #[test]
    fn test_full_translation_with_search_and_visibility() {
        let params = QueryParams::new()
            .with_filters(Some(&Identifier::new().equal("age", 30)))
            .with_search("7f3a");
        assert_eq!(
            render(&SqlTranslator.translate(&params)),
            "(\"age\" = $1 AND CAST(\"id\" AS TEXT) LIKE $2 ESCAPE '\\' AND \"deleted_at\" IS NULL)"
        );

        let trashed = QueryParams::new().only_deleted_records();
        assert_eq!(
            render(&SqlTranslator.translate(&trashed)),
            "\"deleted_at\" IS NOT NULL"
        );
        let everything = QueryParams::new().include_deleted_records();
        assert_eq!(render(&SqlTranslator.translate(&everything)), "1 = 1");
    }

    #[test]
    fn test_unrecognized_and_short_between_are_skipped() {
        let criteria = vec![
            FilterCriterion::leaf("a", FilterOperator::from("near"), Some(FilterValue::Integer(1))),
            FilterCriterion::with_values(
                "b",
                FilterOperator::Between,
                vec![FilterValue::Integer(1)],
            ),
            FilterCriterion::leaf("c", FilterOperator::Equal, Some(FilterValue::Integer(3))),
        ];
        assert_eq!(
            render(&SqlTranslator.scoped(&criteria, DeletedVisibility::Include)),
            "\"c\" = $1"
        );
    }

    #[test]
    fn test_every_known_operator_translates() {
        let tokens = [
            "eq", "neq", "gt", "gte", "lt", "lte", "like", "in", "not_in", "between", "is_null",
            "is_not_null", "contains", "has",
        ];
        for token in tokens {
            let operator = FilterOperator::from(token);
            assert!(!matches!(operator, FilterOperator::Unrecognized(_)), "{}", token);
            let mut criterion = FilterCriterion::with_values(
                "col",
                operator,
                vec![FilterValue::Integer(1), FilterValue::Integer(2)],
            );
            criterion.value = Some(FilterValue::String("x".to_string()));
            assert!(SqlTranslator.leaf(&criterion).is_some(), "{}", token);
        }
    }

    #[test]
    fn test_order_by_and_window() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM \"users\"");
        push_order_by(&mut builder, &[]);
        assert_eq!(builder.sql(), "SELECT * FROM \"users\" ORDER BY \"id\" ASC");

        let mut builder = QueryBuilder::<Postgres>::new("");
        push_order_by(
            &mut builder,
            &[
                SortField::new("name", SortOrder::Asc),
                SortField::new("created_at", SortOrder::Desc),
            ],
        );
        push_window(&mut builder, Pagination::page(2, 20));
        assert_eq!(
            builder.sql(),
            " ORDER BY \"name\" ASC, \"created_at\" DESC LIMIT $1 OFFSET $2"
        );
    }
}
