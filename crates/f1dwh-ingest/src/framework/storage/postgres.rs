//! PostgreSQL store
//!
//! Every session owns a dedicated `PgConnection`, never a pooled one, so a
//! worker's transaction cannot interleave with another's. Target tables are
//! described at runtime: column types are read from `pg_attribute` once per
//! table and session, and every value is bound as text and cast to its
//! column type in the statement.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use f1dwh_common::FieldValue;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Connection, PgConnection, Postgres, Row};
use tracing::{debug, warn};

use super::{StorageError, StoreSession, VersionedStore};
use crate::framework::types::{
    ChangeTrackedRecord, KeyProjection, StoredVersion, TargetDescriptor, DWH_HASH,
    DWH_MODIFIED_AT, DWH_VALID_FROM, DWH_VALID_TO,
};

/// Store backed by a PostgreSQL database
#[derive(Debug, Clone)]
pub struct PgStore {
    database_url: String,
    connect_timeout: Duration,
}

impl PgStore {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn connect(&self) -> Result<PgConnection, StorageError> {
        connect(&self.database_url, self.connect_timeout).await
    }
}

async fn connect(url: &str, timeout: Duration) -> Result<PgConnection, StorageError> {
    match tokio::time::timeout(timeout, PgConnection::connect(url)).await {
        Ok(conn) => Ok(conn?),
        Err(_) => Err(StorageError::Connection(format!(
            "timed out connecting after {:?}",
            timeout
        ))),
    }
}

#[async_trait]
impl VersionedStore for PgStore {
    type Session = PgSession;

    async fn open_session(&self) -> Result<Self::Session, StorageError> {
        let conn = self.connect().await?;
        Ok(PgSession {
            store: self.clone(),
            conn,
            column_types: HashMap::new(),
            in_transaction: false,
        })
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

/// Column name to base SQL type, as `format_type` prints it without a typmod
type ColumnTypes = HashMap<String, String>;

/// Column types of one table.
///
/// The typmod is left out so parameters are cast to the base type
/// (`character varying`, not `character varying(2)`). An explicit cast to a
/// length-limited type truncates silently, while assignment to the column
/// rejects over-length values.
const COLUMN_TYPES_SQL: &str = r#"
    SELECT a.attname, format_type(a.atttypid, NULL)
    FROM pg_attribute a
    WHERE a.attrelid = to_regclass($1)
      AND a.attnum > 0
      AND NOT a.attisdropped
"#;

/// Session over one PostgreSQL connection
pub struct PgSession {
    store: PgStore,
    conn: PgConnection,
    column_types: HashMap<String, ColumnTypes>,
    in_transaction: bool,
}

/// Double-quote an identifier
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quoted_table(target: &TargetDescriptor) -> String {
    match &target.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&target.table_name)),
        None => quote_ident(&target.table_name),
    }
}

fn bind_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Null => None,
        other => Some(other.to_string()),
    }
}

/// Builds a statement's text together with its text-typed parameters
struct Statement {
    sql: String,
    params: Vec<Option<String>>,
}

impl Statement {
    fn new() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Append a placeholder casting the next parameter to `sql_type`
    fn cast_param(&mut self, value: &FieldValue, sql_type: &str) -> String {
        self.params.push(bind_text(value));
        format!("CAST(${} AS {})", self.params.len(), sql_type)
    }

    fn text_param(&mut self, value: &str) -> String {
        self.params.push(Some(value.to_string()));
        format!("${}", self.params.len())
    }

    fn query(&self) -> Query<'_, Postgres, PgArguments> {
        let mut query = sqlx::query(&self.sql);
        for param in &self.params {
            query = query.bind(param.as_deref());
        }
        query
    }
}

impl PgSession {
    async fn types_for(&mut self, target: &TargetDescriptor) -> Result<&ColumnTypes, StorageError> {
        let table = quoted_table(target);
        if !self.column_types.contains_key(&table) {
            let rows = sqlx::query(COLUMN_TYPES_SQL)
                .bind(&table)
                .fetch_all(&mut self.conn)
                .await?;

            if rows.is_empty() {
                return Err(StorageError::Schema(format!("table {} does not exist", table)));
            }

            let mut types = ColumnTypes::with_capacity(rows.len());
            for row in rows {
                let name: String = row.try_get(0)?;
                let sql_type: String = row.try_get(1)?;
                types.insert(name, sql_type);
            }

            for column in [DWH_HASH, DWH_VALID_FROM, DWH_MODIFIED_AT, DWH_VALID_TO] {
                if !types.contains_key(column) {
                    return Err(StorageError::Schema(format!(
                        "table {} has no {} column",
                        table, column
                    )));
                }
            }

            debug!(table = %table, columns = types.len(), "Resolved column types");
            self.column_types.insert(table.clone(), types);
        }

        self.column_types
            .get(&table)
            .ok_or_else(|| StorageError::Schema(format!("no column types for {}", table)))
    }

    fn type_of<'t>(
        types: &'t ColumnTypes,
        table: &str,
        column: &str,
    ) -> Result<&'t str, StorageError> {
        types.get(column).map(String::as_str).ok_or_else(|| {
            StorageError::Schema(format!("table {} has no column {}", table, column))
        })
    }

    /// `"pk1" = CAST($n AS t1) AND ... AND dwh_valid_to IS NULL`
    fn current_row_filter(
        stmt: &mut Statement,
        types: &ColumnTypes,
        table: &str,
        key: &KeyProjection,
    ) -> Result<String, StorageError> {
        let mut clauses = Vec::with_capacity(key.columns.len() + 1);
        for (column, value) in key.columns.iter().zip(&key.values) {
            let sql_type = Self::type_of(types, table, column)?;
            let placeholder = stmt.cast_param(value, sql_type);
            clauses.push(format!("{} = {}", quote_ident(column), placeholder));
        }
        clauses.push(format!("{} IS NULL", quote_ident(DWH_VALID_TO)));
        Ok(clauses.join(" AND "))
    }

    async fn execute_raw(&mut self, sql: &str) -> Result<(), StorageError> {
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(sql)).await?;
        Ok(())
    }
}

#[async_trait]
impl StoreSession for PgSession {
    async fn begin(&mut self) -> Result<(), StorageError> {
        self.execute_raw("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn find_current(
        &mut self,
        target: &TargetDescriptor,
        key: &KeyProjection,
    ) -> Result<Option<StoredVersion>, StorageError> {
        let table = quoted_table(target);
        let types = self.types_for(target).await?.clone();

        let mut stmt = Statement::new();
        let filter = Self::current_row_filter(&mut stmt, &types, &table, key)?;
        stmt.sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 2",
            quote_ident(DWH_HASH),
            table,
            filter
        );

        let rows = stmt.query().fetch_all(&mut self.conn).await?;
        if rows.len() > 1 {
            return Err(StorageError::Integrity(format!(
                "more than one current row in {} for {}",
                table, key
            )));
        }

        match rows.first() {
            Some(row) => {
                let fingerprint: Option<String> = row.try_get(0)?;
                Ok(Some(StoredVersion {
                    fingerprint: fingerprint.unwrap_or_default(),
                }))
            },
            None => Ok(None),
        }
    }

    async fn insert_version(
        &mut self,
        target: &TargetDescriptor,
        record: &ChangeTrackedRecord,
    ) -> Result<(), StorageError> {
        let table = quoted_table(target);
        let types = self.types_for(target).await?.clone();

        let mut stmt = Statement::new();
        let mut columns = Vec::with_capacity(record.record.len() + 4);
        let mut values = Vec::with_capacity(record.record.len() + 4);

        for (column, value) in record.record.iter() {
            let sql_type = Self::type_of(&types, &table, column)?;
            columns.push(quote_ident(column));
            values.push(stmt.cast_param(value, sql_type));
        }

        let observed_at = FieldValue::Text(record.observed_at.to_rfc3339());
        let hash = stmt.text_param(&record.fingerprint);
        let valid_from =
            stmt.cast_param(&observed_at, Self::type_of(&types, &table, DWH_VALID_FROM)?);
        let modified_at =
            stmt.cast_param(&observed_at, Self::type_of(&types, &table, DWH_MODIFIED_AT)?);

        columns.extend([DWH_HASH, DWH_VALID_FROM, DWH_MODIFIED_AT, DWH_VALID_TO].map(quote_ident));
        values.extend([hash, valid_from, modified_at, "NULL".to_string()]);

        stmt.sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            values.join(", ")
        );

        stmt.query().execute(&mut self.conn).await?;
        Ok(())
    }

    async fn update_version(
        &mut self,
        target: &TargetDescriptor,
        record: &ChangeTrackedRecord,
    ) -> Result<(), StorageError> {
        let table = quoted_table(target);
        let types = self.types_for(target).await?.clone();

        let mut stmt = Statement::new();
        let mut assignments = Vec::with_capacity(record.record.len() + 2);

        for (column, value) in record.record.iter() {
            if record.key.columns.iter().any(|pk| pk == column) {
                continue;
            }
            let sql_type = Self::type_of(&types, &table, column)?;
            let placeholder = stmt.cast_param(value, sql_type);
            assignments.push(format!("{} = {}", quote_ident(column), placeholder));
        }

        let hash = stmt.text_param(&record.fingerprint);
        assignments.push(format!("{} = {}", quote_ident(DWH_HASH), hash));
        let modified_at = stmt.cast_param(
            &FieldValue::Text(record.observed_at.to_rfc3339()),
            Self::type_of(&types, &table, DWH_MODIFIED_AT)?,
        );
        assignments.push(format!("{} = {}", quote_ident(DWH_MODIFIED_AT), modified_at));

        let filter = Self::current_row_filter(&mut stmt, &types, &table, &record.key)?;
        stmt.sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            assignments.join(", "),
            filter
        );

        let result = stmt.query().execute(&mut self.conn).await?;
        if result.rows_affected() != 1 {
            return Err(StorageError::Integrity(format!(
                "update of {} for {} touched {} rows",
                table,
                record.key,
                result.rows_affected()
            )));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        self.execute_raw("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.execute_raw("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), StorageError> {
        let healthy = self.rollback().await.is_ok() && self.conn.ping().await.is_ok();
        if healthy {
            return Ok(());
        }

        warn!("Session connection unusable, reconnecting");
        self.conn = self.store.connect().await?;
        self.in_transaction = false;
        self.column_types.clear();
        Ok(())
    }
}
