// SQLite-backed gateway - one JSON document table per entity family
// Filters compile to json_extract expressions so the contract stays schema-free

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row as SqlxRow};
use std::str::FromStr;
use tracing::{debug, info, instrument};

use super::{
    merge_update, now_rfc3339, public_url, row_id, stamp_insert, Blob, ChangeCallback, ChangeEvent, ChangeFeed,
    ChangeKind, Direction, FilterSpec, Gateway, GatewayError, GatewayResult, MutationOp,
    Predicate, Row, Subscription, Table,
};

static COLUMN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("column pattern is valid")
});

pub struct SqliteGateway {
    pool: SqlitePool,
    public_base_url: String,
    changes: ChangeFeed,
}

impl SqliteGateway {
    /// Connect to `database_url` (e.g. `sqlite:data/community.db` or `sqlite::memory:`).
    pub async fn connect(database_url: &str, public_base_url: impl Into<String>) -> GatewayResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(backend_error("Invalid database url"))?
            .create_if_missing(true);

        // Every connection to :memory: opens a fresh database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(backend_error("Failed to connect to SQLite"))?;

        let gateway = Self {
            pool,
            public_base_url: public_base_url.into(),
            changes: ChangeFeed::default(),
        };
        gateway.initialize().await?;
        info!("SQLite gateway ready at {}", database_url);
        Ok(gateway)
    }

    pub async fn new_in_memory(public_base_url: impl Into<String>) -> GatewayResult<Self> {
        Self::connect("sqlite::memory:", public_base_url).await
    }

    /// Create one document table per entity family plus the object store.
    pub async fn initialize(&self) -> GatewayResult<()> {
        for table in Table::ALL {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, data TEXT NOT NULL)",
                table.as_str()
            ))
            .execute(&self.pool)
            .await
            .map_err(backend_error("Failed to create table"))?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS storage_objects (
                bucket TEXT NOT NULL,
                path TEXT NOT NULL,
                content_type TEXT NOT NULL,
                bytes BLOB NOT NULL,
                PRIMARY KEY (bucket, path)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_error("Failed to create storage table"))?;

        Ok(())
    }

    async fn fetch_row(&self, table: Table, id: &str) -> GatewayResult<Row> {
        let record = sqlx::query(&format!("SELECT data FROM {} WHERE id = ?", table.as_str()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error("Failed to read row"))?
            .ok_or_else(|| GatewayError::NotFound {
                table,
                id: id.to_string(),
            })?;
        decode_row(&record.get::<String, _>("data"))
    }
}

fn backend_error<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> GatewayError {
    move |e| GatewayError::Backend(format!("{}: {}", context, e))
}

fn write_error(err: sqlx::Error) -> GatewayError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            GatewayError::Constraint(db.message().to_string())
        }
        other => GatewayError::Backend(format!("Write failed: {}", other)),
    }
}

fn decode_row(data: &str) -> GatewayResult<Row> {
    match serde_json::from_str::<Value>(data)? {
        Value::Object(row) => Ok(row),
        other => Err(GatewayError::Serialization(format!(
            "expected JSON object, found {}",
            other
        ))),
    }
}

fn json_path(column: &str) -> GatewayResult<String> {
    if COLUMN_NAME.is_match(column) {
        Ok(format!("json_extract(data, '$.{}')", column))
    } else {
        Err(GatewayError::Backend(format!("Invalid column name: {}", column)))
    }
}

/// Bind a JSON scalar the way json_extract reports it (booleans become 0/1).
fn push_json_value(builder: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Null => {
            builder.push("NULL");
        }
        Value::Bool(b) => {
            builder.push_bind(i64::from(*b));
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                builder.push_bind(i);
            }
            None => {
                builder.push_bind(n.as_f64().unwrap_or_default());
            }
        },
        Value::String(s) => {
            builder.push_bind(s.clone());
        }
        other => {
            builder.push_bind(other.to_string());
        }
    }
}

fn build_select(table: Table, filter: &FilterSpec) -> GatewayResult<QueryBuilder<'static, Sqlite>> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT data FROM {} WHERE 1 = 1",
        table.as_str()
    ));

    for predicate in &filter.predicates {
        match predicate {
            Predicate::Eq(column, value) => {
                builder.push(" AND ").push(json_path(column)?).push(" = ");
                push_json_value(&mut builder, value);
            }
            Predicate::IsNull(column) => {
                builder.push(" AND ").push(json_path(column)?).push(" IS NULL");
            }
            Predicate::In(_, values) if values.is_empty() => {
                builder.push(" AND 0");
            }
            Predicate::In(column, values) => {
                builder.push(" AND ").push(json_path(column)?).push(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        builder.push(", ");
                    }
                    push_json_value(&mut builder, value);
                }
                builder.push(")");
            }
        }
    }

    builder.push(" ORDER BY ");
    for order in &filter.order {
        let path = json_path(&order.column)?;
        match &order.coalesce {
            Some(default) => {
                builder.push("COALESCE(").push(path).push(", ");
                push_json_value(&mut builder, default);
                builder.push(")");
            }
            None => {
                builder.push(path);
            }
        }
        builder.push(match order.direction {
            Direction::Ascending => " ASC",
            Direction::Descending => " DESC",
        });
        builder.push(if order.nulls_last { " NULLS LAST, " } else { " NULLS FIRST, " });
    }
    // Insertion order breaks ties, matching the in-memory backend
    builder.push("rowid ASC");

    if let Some(limit) = filter.limit {
        builder.push(" LIMIT ").push_bind(limit as i64);
    }

    Ok(builder)
}

#[async_trait]
impl Gateway for SqliteGateway {
    #[instrument(skip(self, filter))]
    async fn query(&self, table: Table, filter: &FilterSpec) -> GatewayResult<Vec<Row>> {
        let mut builder = build_select(table, filter)?;
        let records = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(backend_error("Query failed"))?;

        let rows = records
            .iter()
            .map(|record| decode_row(&record.get::<String, _>("data")))
            .collect::<GatewayResult<Vec<Row>>>()?;
        debug!("Queried {} rows from {}", rows.len(), table);
        Ok(rows)
    }

    #[instrument(skip(self, payload))]
    async fn mutate(&self, table: Table, op: MutationOp, payload: Row) -> GatewayResult<Row> {
        let (kind, row) = match op {
            MutationOp::Insert => {
                let row = stamp_insert(payload);
                let id = row_id(&row).unwrap_or_default().to_string();
                let data = serde_json::to_string(&row)?;
                sqlx::query(&format!("INSERT INTO {} (id, data) VALUES (?, ?)", table.as_str()))
                    .bind(&id)
                    .bind(data)
                    .execute(&self.pool)
                    .await
                    .map_err(write_error)?;
                (ChangeKind::Insert, row)
            }
            MutationOp::Update { id } => {
                let merged = merge_update(self.fetch_row(table, &id).await?, payload);
                let data = serde_json::to_string(&merged)?;
                sqlx::query(&format!("UPDATE {} SET data = ? WHERE id = ?", table.as_str()))
                    .bind(data)
                    .bind(&id)
                    .execute(&self.pool)
                    .await
                    .map_err(write_error)?;
                (ChangeKind::Update, merged)
            }
            MutationOp::Increment { id, column, by } => {
                let column_value = json_path(&column)?;
                let sql = format!(
                    "UPDATE {} SET data = json_set(data, '$.{}', MAX(COALESCE({}, 0) + ?, 0), '$.updated_at', ?) \
                     WHERE id = ? RETURNING data",
                    table.as_str(),
                    column,
                    column_value
                );
                let record = sqlx::query(&sql)
                    .bind(by)
                    .bind(now_rfc3339())
                    .bind(&id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(write_error)?
                    .ok_or_else(|| GatewayError::NotFound { table, id: id.clone() })?;
                (ChangeKind::Update, decode_row(&record.get::<String, _>("data"))?)
            }
            MutationOp::Delete { id } => {
                let existing = self.fetch_row(table, &id).await?;
                sqlx::query(&format!("DELETE FROM {} WHERE id = ?", table.as_str()))
                    .bind(&id)
                    .execute(&self.pool)
                    .await
                    .map_err(write_error)?;
                (ChangeKind::Delete, existing)
            }
        };

        self.changes.publish(ChangeEvent {
            table,
            kind,
            row: row.clone(),
        });
        Ok(row)
    }

    #[instrument(skip(self, blob), fields(file_name = %blob.file_name, size = blob.bytes.len()))]
    async fn upload_file(&self, bucket: &str, path: &str, blob: &Blob) -> GatewayResult<String> {
        sqlx::query(
            "INSERT OR REPLACE INTO storage_objects (bucket, path, content_type, bytes) VALUES (?, ?, ?, ?)",
        )
        .bind(bucket)
        .bind(path)
        .bind(&blob.content_type)
        .bind(&blob.bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::Storage(format!("Upload of {} failed: {}", path, e)))?;

        Ok(public_url(&self.public_base_url, bucket, path))
    }

    fn subscribe(&self, table: Table, filter: FilterSpec, on_change: ChangeCallback) -> Subscription {
        self.changes.subscribe(table, filter, on_change)
    }
}
