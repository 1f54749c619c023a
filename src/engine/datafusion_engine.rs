//! DataFusion-backed [`Engine`] + [`Catalog`] implementation.
//!
//! DataFusion has no native notion of table snapshots, so this module
//! keeps its own append-only history of `(snapshot id, created_at,
//! Arc<Vec<RecordBatch>>)` per table name and re-registers a `MemTable`
//! pointing at the latest entry after every mutating catalog operation.
//! Time-travel reads briefly swap the registration to a historical
//! entry, run the query, and swap the live registration back — the swap
//! itself is serialised by `registration_lock` so two time-travel reads
//! (or a time-travel read racing a commit) against the *same* table
//! never interleave, even though unrelated tables and ordinary queries
//! proceed concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use datafusion::arrow::array::{
    Array, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array, Int32Array,
    Int64Array, Int8Array, StringArray, TimestampMicrosecondArray, UInt16Array, UInt32Array,
    UInt64Array, UInt8Array,
};
use datafusion::arrow::datatypes::{DataType, SchemaRef, TimeUnit};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::arrow::util::display::{ArrayFormatter, FormatOptions};
use datafusion::datasource::MemTable;
use datafusion::execution::context::SessionContext;
use serde_json::{Map, Number, Value};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::model::{CacheCursor, RetentionPolicy};
use crate::engine::{Catalog, Engine, QueryResult, SnapshotMeta, WriteResult};
use crate::errors::{GatewayError, Result};

struct Snapshot {
    id: u64,
    created_at: DateTime<Utc>,
    schema: SchemaRef,
    batches: Arc<Vec<RecordBatch>>,
}

#[derive(Default)]
struct TableHistory {
    snapshots: Vec<Snapshot>,
}

pub struct DataFusionEngine {
    ctx: SessionContext,
    history: DashMap<String, TableHistory>,
    next_id: AtomicU64,
    registration_lock: AsyncMutex<()>,
}

impl DataFusionEngine {
    pub fn new() -> Self {
        Self {
            ctx: SessionContext::new(),
            history: DashMap::new(),
            next_id: AtomicU64::new(1),
            registration_lock: AsyncMutex::new(()),
        }
    }

    /// Access to the raw session context for connection initialisation
    /// scripts and external-table registration.
    pub fn session_context(&self) -> &SessionContext {
        &self.ctx
    }

    async fn collect(&self, sql: &str) -> Result<Vec<RecordBatch>> {
        let df = self.ctx.sql(sql).await?;
        df.collect().await.map_err(GatewayError::from)
    }

    fn register_live(&self, table: &str, snapshot: &Snapshot) -> Result<()> {
        let _ = self.ctx.deregister_table(table);
        let provider = MemTable::try_new(snapshot.schema.clone(), vec![(*snapshot.batches).clone()])?;
        self.ctx.register_table(table, Arc::new(provider))?;
        Ok(())
    }

    fn commit_snapshot(&self, table: &str, batches: Vec<RecordBatch>, schema: SchemaRef) -> Result<SnapshotMeta> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let created_at = Utc::now();
        let snapshot = Snapshot {
            id,
            created_at,
            schema,
            batches: Arc::new(batches),
        };
        self.register_live(table, &snapshot)?;
        let mut entry = self.history.entry(table.to_string()).or_default();
        entry.snapshots.push(snapshot);
        Ok(SnapshotMeta { id, created_at })
    }
}

impl Default for DataFusionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for DataFusionEngine {
    async fn query(&self, sql: &str) -> Result<QueryResult> {
        let batches = self.collect(sql).await?;
        batches_to_query_result(&batches)
    }

    async fn query_page(&self, sql: &str, limit: usize, offset: usize) -> Result<QueryResult> {
        // Fetch one extra row past the page boundary to detect has_more
        // without a separate COUNT(*) round trip.
        let paged = format!("SELECT * FROM ({sql}) AS page LIMIT {} OFFSET {offset}", limit + 1);
        let batches = self.collect(&paged).await?;
        let mut result = batches_to_query_result(&batches)?;
        result.has_more = result.rows.len() > limit;
        result.rows.truncate(limit);
        Ok(result)
    }

    async fn execute_write(&self, sql: &str, returning: bool) -> Result<WriteResult> {
        let batches = self.collect(sql).await?;
        let rows_affected = rows_affected_from_batches(&batches);
        let result = batches_to_query_result(&batches)?;
        Ok(WriteResult {
            rows_affected,
            returning: if returning { Some(result) } else { None },
        })
    }
}

#[async_trait]
impl Catalog for DataFusionEngine {
    async fn replace_table(&self, table: &str, select_sql: &str) -> Result<SnapshotMeta> {
        let _guard = self.registration_lock.lock().await;
        let batches = self.collect(select_sql).await?;
        let schema = batch_schema(&batches)?;
        self.commit_snapshot(table, batches, schema)
    }

    async fn append_table(
        &self,
        table: &str,
        select_sql: &str,
        cursor: Option<&CacheCursor>,
    ) -> Result<SnapshotMeta> {
        let _guard = self.registration_lock.lock().await;
        let filtered_sql = apply_cursor_filter(table, select_sql, cursor, &self.history)?;
        let new_batches = self.collect(&filtered_sql).await?;
        let schema = batch_schema(&new_batches)?;

        let mut combined = new_batches;
        if let Some(entry) = self.history.get(table) {
            if let Some(previous) = entry.snapshots.last() {
                let mut prior = (*previous.batches).clone();
                prior.extend(combined);
                combined = prior;
            }
        }
        self.commit_snapshot(table, combined, schema)
    }

    async fn merge_table(
        &self,
        table: &str,
        select_sql: &str,
        primary_key: &[String],
        cursor: Option<&CacheCursor>,
    ) -> Result<SnapshotMeta> {
        let _guard = self.registration_lock.lock().await;
        let filtered_sql = apply_cursor_filter(table, select_sql, cursor, &self.history)?;
        let changed = self.collect(&filtered_sql).await?;
        let schema = batch_schema(&changed)?;

        let previous_rows = match self.history.get(table) {
            Some(entry) => entry
                .snapshots
                .last()
                .map(|s| arrow_to_rows(&s.batches, &s.schema))
                .transpose()?
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let changed_rows = arrow_to_rows(&changed, &schema)?;

        let mut by_key: indexmap::IndexMap<Vec<String>, Map<String, Value>> = indexmap::IndexMap::new();
        for row in previous_rows {
            by_key.insert(key_for(&row, primary_key), row);
        }
        for row in changed_rows {
            by_key.insert(key_for(&row, primary_key), row);
        }

        let merged_batches = rows_to_batches(by_key.into_values().collect(), &schema)?;
        self.commit_snapshot(table, merged_batches, schema)
    }

    async fn query_as_of(
        &self,
        table: &str,
        sql: &str,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<QueryResult> {
        let _guard = self.registration_lock.lock().await;
        let entry = self
            .history
            .get(table)
            .ok_or_else(|| GatewayError::NotFound(format!("cache table '{table}' has no snapshots")))?;

        let target = match as_of {
            None => entry.snapshots.last(),
            Some(ts) => entry.snapshots.iter().rev().find(|s| s.created_at <= ts),
        }
        .ok_or_else(|| GatewayError::NotFound(format!("cache table '{table}' has no snapshot as of requested time")))?;

        self.register_live(table, target)?;
        let batches = self.collect(sql).await?;

        // Restore the live (latest) registration before releasing the lock.
        if let Some(latest) = entry.snapshots.last() {
            self.register_live(table, latest)?;
        }

        batches_to_query_result(&batches)
    }

    async fn list_snapshots(&self, table: &str) -> Result<Vec<SnapshotMeta>> {
        Ok(self
            .history
            .get(table)
            .map(|entry| {
                entry
                    .snapshots
                    .iter()
                    .map(|s| SnapshotMeta { id: s.id, created_at: s.created_at })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn prune(&self, table: &str, retention: &RetentionPolicy) -> Result<usize> {
        let _guard = self.registration_lock.lock().await;
        let Some(mut entry) = self.history.get_mut(table) else {
            return Ok(0);
        };
        let before = entry.snapshots.len();

        if let Some(max_age) = retention.max_snapshot_age {
            let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
            entry.snapshots.retain(|s| s.created_at >= cutoff || Some(s.id) == entry.snapshots.last().map(|l| l.id));
        }
        if let Some(keep) = retention.keep_last_snapshots {
            let keep = keep as usize;
            if entry.snapshots.len() > keep {
                let drop_count = entry.snapshots.len() - keep;
                entry.snapshots.drain(0..drop_count);
            }
        }
        Ok(before - entry.snapshots.len())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        let _guard = self.registration_lock.lock().await;
        let _ = self.ctx.deregister_table(table);
        self.history.remove(table);
        Ok(())
    }
}

fn apply_cursor_filter(
    table: &str,
    select_sql: &str,
    cursor: Option<&CacheCursor>,
    history: &DashMap<String, TableHistory>,
) -> Result<String> {
    let Some(cursor) = cursor else {
        return Ok(select_sql.to_string());
    };
    let Some(entry) = history.get(table) else {
        return Ok(select_sql.to_string());
    };
    let Some(latest) = entry.snapshots.last() else {
        return Ok(select_sql.to_string());
    };
    let rows = arrow_to_rows(&latest.batches, &latest.schema)?;
    let max_cursor = rows
        .iter()
        .filter_map(|row| row.get(&cursor.column))
        .filter_map(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
        .max();
    match max_cursor {
        Some(bound) => Ok(format!(
            "SELECT * FROM ({select_sql}) AS changed WHERE {} > '{}'",
            cursor.column,
            bound.replace('\'', "''")
        )),
        None => Ok(select_sql.to_string()),
    }
}

fn key_for(row: &Map<String, Value>, primary_key: &[String]) -> Vec<String> {
    primary_key
        .iter()
        .map(|k| row.get(k).map(|v| v.to_string()).unwrap_or_default())
        .collect()
}

fn batch_schema(batches: &[RecordBatch]) -> Result<SchemaRef> {
    batches
        .first()
        .map(|b| b.schema())
        .ok_or_else(|| GatewayError::CacheRefreshError("populate query returned no schema (zero batches)".into()))
}

fn rows_to_batches(rows: Vec<Map<String, Value>>, schema: &SchemaRef) -> Result<Vec<RecordBatch>> {
    // The merge path only ever re-derives rows already produced by
    // DataFusion itself, so round-tripping through a JSON-lines reader
    // keyed by the known schema is sufficient rather than hand-building
    // typed Arrow arrays per column.
    use datafusion::arrow::json::reader::ReaderBuilder;
    use std::io::Cursor;

    let mut buffer = Vec::new();
    for row in &rows {
        serde_json::to_writer(&mut buffer, row).map_err(GatewayError::from)?;
        buffer.push(b'\n');
    }
    if buffer.is_empty() {
        return Ok(vec![RecordBatch::new_empty(schema.clone())]);
    }
    let mut reader = ReaderBuilder::new(schema.clone())
        .build(Cursor::new(buffer))
        .map_err(|e| GatewayError::Internal(format!("merge rebuild failed: {e}")))?;
    let mut out = Vec::new();
    for batch in reader.by_ref() {
        out.push(batch.map_err(|e| GatewayError::Internal(format!("merge rebuild failed: {e}")))?);
    }
    Ok(out)
}

fn rows_affected_from_batches(batches: &[RecordBatch]) -> u64 {
    for batch in batches {
        if batch.num_columns() == 1 {
            let field = batch.schema().field(0).clone();
            if field.name().eq_ignore_ascii_case("count") {
                if let Some(array) = batch.column(0).as_any().downcast_ref::<UInt64Array>() {
                    return array.iter().flatten().sum();
                }
                if let Some(array) = batch.column(0).as_any().downcast_ref::<Int64Array>() {
                    return array.iter().flatten().map(|v| v.max(0) as u64).sum();
                }
            }
        }
    }
    batches.iter().map(|b| b.num_rows() as u64).sum()
}

fn arrow_to_rows(batches: &[RecordBatch], schema: &SchemaRef) -> Result<Vec<Map<String, Value>>> {
    let result = batches_to_query_result(batches)?;
    let _ = schema;
    Ok(result.rows)
}

fn batches_to_query_result(batches: &[RecordBatch]) -> Result<QueryResult> {
    let Some(first) = batches.first() else {
        return Ok(QueryResult::default());
    };
    let schema = first.schema();
    let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();

    let options = FormatOptions::default();
    let mut rows = Vec::new();
    for batch in batches {
        let formatters: Vec<ArrayFormatter> = batch
            .columns()
            .iter()
            .map(|col| ArrayFormatter::try_new(col.as_ref(), &options).map_err(|e| GatewayError::Internal(e.to_string())))
            .collect::<Result<_>>()?;

        for row_idx in 0..batch.num_rows() {
            let mut row = Map::new();
            for (col_idx, field) in schema.fields().iter().enumerate() {
                let array = batch.column(col_idx);
                let value = if array.is_null(row_idx) {
                    Value::Null
                } else {
                    typed_value(array.as_ref(), field.data_type(), row_idx)
                        .unwrap_or_else(|| Value::String(formatters[col_idx].value(row_idx).to_string()))
                };
                row.insert(field.name().clone(), value);
            }
            rows.push(row);
        }
    }
    Ok(QueryResult { columns, rows, has_more: false })
}

fn typed_value(array: &dyn Array, data_type: &DataType, idx: usize) -> Option<Value> {
    macro_rules! downcast_num {
        ($arr_ty:ty) => {
            array.as_any().downcast_ref::<$arr_ty>().map(|a| Value::from(a.value(idx)))
        };
    }
    match data_type {
        DataType::Utf8 | DataType::LargeUtf8 => array
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|a| Value::String(a.value(idx).to_string())),
        DataType::Boolean => array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .map(|a| Value::Bool(a.value(idx))),
        DataType::Int8 => downcast_num!(Int8Array),
        DataType::Int16 => downcast_num!(Int16Array),
        DataType::Int32 => downcast_num!(Int32Array),
        DataType::Int64 => downcast_num!(Int64Array),
        DataType::UInt8 => downcast_num!(UInt8Array),
        DataType::UInt16 => downcast_num!(UInt16Array),
        DataType::UInt32 => downcast_num!(UInt32Array),
        DataType::UInt64 => downcast_num!(UInt64Array),
        DataType::Float32 => array
            .as_any()
            .downcast_ref::<Float32Array>()
            .and_then(|a| Number::from_f64(a.value(idx) as f64))
            .map(Value::Number),
        DataType::Float64 => array
            .as_any()
            .downcast_ref::<Float64Array>()
            .and_then(|a| Number::from_f64(a.value(idx)))
            .map(Value::Number),
        DataType::Date32 => array
            .as_any()
            .downcast_ref::<Date32Array>()
            .and_then(|a| a.value_as_date(idx))
            .map(|d| Value::String(d.to_string())),
        DataType::Timestamp(TimeUnit::Microsecond, _) => array
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .and_then(|a| a.value_as_datetime(idx))
            .map(|d| Value::String(d.to_string())),
        _ => None,
    }
}
