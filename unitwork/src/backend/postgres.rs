//! PostgreSQL backend
//!
//! Rows travel as `jsonb`: reads select `to_jsonb(t)` and writes go through
//! `jsonb_populate_record`, so entity field names must match column names.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{types::Json, PgPool, Postgres, QueryBuilder, Transaction};

use super::Backend;
use crate::config::DatabaseConfig;
use crate::repository::{
    Pagination, RepositoryError, RepositoryOperation, RepositoryResult, SortField,
    DELETED_AT_FIELD,
};
use crate::translate::sql::{push_order_by, push_window, quote_ident};
use crate::translate::{SqlPredicate, SqlTranslator};

/// Run a built query on the open transaction, or on the pool when there is none
macro_rules! run {
    ($query:expr, $method:ident, $tx:expr, $pool:expr) => {
        match $tx {
            Some(tx) => $query.$method(&mut **tx).await,
            None => $query.$method($pool).await,
        }
    };
}

fn failed(operation: RepositoryOperation, table: &str) -> impl FnOnce(sqlx::Error) -> RepositoryError + '_ {
    move |e| {
        tracing::error!(table, %operation, error = %e, "statement failed");
        RepositoryError::from(e).with_operation(operation)
    }
}

/// [`Backend`] over a `sqlx` PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    translator: SqlTranslator,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            translator: SqlTranslator,
        }
    }

    /// Connect with retries as configured
    pub async fn connect(config: &DatabaseConfig) -> crate::Result<Self> {
        Ok(Self::new(crate::database::create_pool(config).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn select_statement<'args>(
    table: &str,
    predicate: &SqlPredicate,
    sort: &[SortField],
    window: Option<Pagination>,
) -> QueryBuilder<'args, Postgres> {
    let mut builder = QueryBuilder::new("SELECT to_jsonb(t) FROM ");
    builder.push(quote_ident(table)).push(" AS t WHERE ");
    predicate.push_to(&mut builder);
    push_order_by(&mut builder, sort);
    if let Some(window) = window {
        push_window(&mut builder, window);
    }
    builder
}

fn count_statement<'args>(table: &str, predicate: &SqlPredicate) -> QueryBuilder<'args, Postgres> {
    let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM ");
    builder.push(quote_ident(table)).push(" WHERE ");
    predicate.push_to(&mut builder);
    builder
}

fn insert_statement<'args>(table: &str, document: &Value) -> QueryBuilder<'args, Postgres> {
    let table = quote_ident(table);
    let mut builder = QueryBuilder::new("INSERT INTO ");
    builder
        .push(&table)
        .push(" SELECT * FROM jsonb_populate_record(NULL::")
        .push(&table)
        .push(", ");
    builder.push_bind(Json(document.clone()));
    builder.push(")");
    builder
}

/// `None` when the document carries no columns
fn replace_statement<'args>(
    table: &str,
    predicate: &SqlPredicate,
    document: &Value,
) -> Option<QueryBuilder<'args, Postgres>> {
    let columns = document
        .as_object()?
        .keys()
        .map(|k| quote_ident(k))
        .collect::<Vec<_>>()
        .join(", ");
    if columns.is_empty() {
        return None;
    }
    let table = quote_ident(table);
    let mut builder = QueryBuilder::new("UPDATE ");
    builder
        .push(&table)
        .push(" SET (")
        .push(&columns)
        .push(") = (SELECT ")
        .push(&columns)
        .push(" FROM jsonb_populate_record(NULL::")
        .push(&table)
        .push(", ");
    builder.push_bind(Json(document.clone()));
    builder.push(")) WHERE ");
    predicate.push_to(&mut builder);
    Some(builder)
}

fn mark_statement<'args>(
    table: &str,
    predicate: &SqlPredicate,
    deleted_at: Option<DateTime<Utc>>,
) -> QueryBuilder<'args, Postgres> {
    let mut builder = QueryBuilder::new("UPDATE ");
    builder
        .push(quote_ident(table))
        .push(" SET ")
        .push(quote_ident(DELETED_AT_FIELD))
        .push(" = ");
    builder.push_bind(deleted_at);
    builder.push(" WHERE ");
    predicate.push_to(&mut builder);
    builder
}

fn delete_statement<'args>(table: &str, predicate: &SqlPredicate) -> QueryBuilder<'args, Postgres> {
    let mut builder = QueryBuilder::new("DELETE FROM ");
    builder.push(quote_ident(table)).push(" WHERE ");
    predicate.push_to(&mut builder);
    builder
}

impl Backend for PostgresBackend {
    type Translator = SqlTranslator;
    type Transaction = Transaction<'static, Postgres>;

    fn name(&self) -> &'static str {
        "postgres"
    }

    fn translator(&self) -> &SqlTranslator {
        &self.translator
    }

    async fn begin(&self) -> RepositoryResult<Self::Transaction> {
        self.pool
            .begin()
            .await
            .map_err(failed(RepositoryOperation::Transaction, "-"))
    }

    async fn commit(&self, tx: Self::Transaction) -> RepositoryResult<()> {
        tx.commit()
            .await
            .map_err(failed(RepositoryOperation::Transaction, "-"))
    }

    async fn rollback(&self, tx: Self::Transaction) -> RepositoryResult<()> {
        tx.rollback()
            .await
            .map_err(failed(RepositoryOperation::Transaction, "-"))
    }

    async fn find(
        &self,
        tx: Option<&mut Self::Transaction>,
        collection: &str,
        predicate: &SqlPredicate,
        sort: &[SortField],
        window: Option<Pagination>,
    ) -> RepositoryResult<Vec<Value>> {
        let mut builder = select_statement(collection, predicate, sort, window);
        let query = builder.build_query_scalar::<Json<Value>>();
        let rows = run!(query, fetch_all, tx, &self.pool)
            .map_err(failed(RepositoryOperation::FindAll, collection))?;
        Ok(rows.into_iter().map(|Json(row)| row).collect())
    }

    async fn count(
        &self,
        tx: Option<&mut Self::Transaction>,
        collection: &str,
        predicate: &SqlPredicate,
    ) -> RepositoryResult<u64> {
        let mut builder = count_statement(collection, predicate);
        let query = builder.build_query_scalar::<i64>();
        let count = run!(query, fetch_one, tx, &self.pool)
            .map_err(failed(RepositoryOperation::Count, collection))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn insert(
        &self,
        tx: Option<&mut Self::Transaction>,
        collection: &str,
        document: &Value,
    ) -> RepositoryResult<()> {
        let mut builder = insert_statement(collection, document);
        let query = builder.build();
        run!(query, execute, tx, &self.pool)
            .map_err(failed(RepositoryOperation::Insert, collection))?;
        Ok(())
    }

    async fn replace(
        &self,
        tx: Option<&mut Self::Transaction>,
        collection: &str,
        predicate: &SqlPredicate,
        document: &Value,
    ) -> RepositoryResult<u64> {
        let Some(mut builder) = replace_statement(collection, predicate, document) else {
            return Err(RepositoryError::validation_failed(
                "replacement document has no columns",
            )
            .with_operation(RepositoryOperation::Update));
        };
        let query = builder.build();
        let done = run!(query, execute, tx, &self.pool)
            .map_err(failed(RepositoryOperation::Update, collection))?;
        Ok(done.rows_affected())
    }

    async fn set_deleted_at(
        &self,
        tx: Option<&mut Self::Transaction>,
        collection: &str,
        predicate: &SqlPredicate,
        deleted_at: Option<DateTime<Utc>>,
    ) -> RepositoryResult<u64> {
        let operation = if deleted_at.is_some() {
            RepositoryOperation::SoftDelete
        } else {
            RepositoryOperation::Restore
        };
        let mut builder = mark_statement(collection, predicate, deleted_at);
        let query = builder.build();
        let done = run!(query, execute, tx, &self.pool).map_err(failed(operation, collection))?;
        Ok(done.rows_affected())
    }

    async fn delete(
        &self,
        tx: Option<&mut Self::Transaction>,
        collection: &str,
        predicate: &SqlPredicate,
    ) -> RepositoryResult<u64> {
        let mut builder = delete_statement(collection, predicate);
        let query = builder.build();
        let done = run!(query, execute, tx, &self.pool)
            .map_err(failed(RepositoryOperation::HardDelete, collection))?;
        Ok(done.rows_affected())
    }
}
