//! SQLite-backed record store.
//!
//! # Responsibility
//! - Implement [`RecordStore`] over the `records` table.
//! - Enforce per-kind required attributes registered in `kind_schemas`.
//!
//! # Invariants
//! - One `write_batch` call is one IMMEDIATE transaction; each row runs in its
//!   own savepoint so a rejected row never rolls back its siblings.
//! - Upsert replaces the full attribute set of a matched row.
//! - Ids are generated here (UUID v4) and never rewritten.

use crate::config::{is_valid_name, KindSchema};
use crate::db::migrations::{latest_version, schema_version};
use crate::db::DbError;
use crate::engine::cancel::CancellationToken;
use crate::model::record::{Attributes, DomainRecord, RecordId};
use crate::repo::record_store::{
    Predicate, RecordStore, StoreError, StoreResult, WriteMode, WriteOutcome,
};
use log::{debug, info, warn};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::time::Instant;
use uuid::Uuid;

/// Upper bound of bound values per `IN (...)` statement.
const MAX_IN_VALUES: usize = 30_000;

const RECORD_SELECT_SQL: &str = "SELECT id, kind, attributes, created_at, rowid AS row_order FROM records";

/// SQLite-backed batch record store.
pub struct SqliteRecordStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecordStore<'conn> {
    /// Creates a store from a migrated connection.
    ///
    /// Returns `StoreError::Unavailable` when the connection schema is not
    /// at the expected version.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Registers or replaces validation rules for one kind.
    pub fn register_schema(&self, schema: &KindSchema) -> StoreResult<()> {
        schema
            .validate()
            .map_err(|err| StoreError::InvalidRequest(err.to_string()))?;
        let required = serde_json::to_string(&schema.required_attributes)
            .map_err(|err| StoreError::InvalidRequest(err.to_string()))?;
        self.conn.execute(
            "INSERT INTO kind_schemas (kind, required_attributes)
             VALUES (?1, ?2)
             ON CONFLICT(kind) DO UPDATE SET
                required_attributes = excluded.required_attributes,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![schema.kind.as_str(), required],
        )?;
        info!(
            "event=schema_register module=store status=ok kind={} required={}",
            schema.kind,
            schema.required_attributes.len()
        );
        Ok(())
    }

    /// Loads validation rules for one kind, if registered.
    pub fn schema(&self, kind: &str) -> StoreResult<Option<KindSchema>> {
        let required: Option<String> = self
            .conn
            .query_row(
                "SELECT required_attributes FROM kind_schemas WHERE kind = ?1;",
                [kind],
                |row| row.get(0),
            )
            .optional()?;
        match required {
            Some(text) => {
                let required_attributes: Vec<String> =
                    serde_json::from_str(&text).map_err(|err| {
                        StoreError::InvalidData(format!(
                            "invalid kind_schemas.required_attributes for `{kind}`: {err}"
                        ))
                    })?;
                Ok(Some(KindSchema {
                    kind: kind.to_string(),
                    required_attributes,
                }))
            }
            None => Ok(None),
        }
    }

    /// Loads one record by id.
    pub fn get(&self, kind: &str, id: RecordId) -> StoreResult<Option<DomainRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{RECORD_SELECT_SQL} WHERE kind = ?1 AND id = ?2;"))?;
        let mut rows = stmt.query(params![kind, id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(row)?.record));
        }
        Ok(None)
    }

    fn query_ordered(
        &self,
        kind: &str,
        filter_sql: Option<&str>,
        values: &[String],
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<DomainRecord>> {
        let mut found = Vec::new();

        match filter_sql {
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "{RECORD_SELECT_SQL} WHERE kind = ?1 ORDER BY created_at ASC, rowid ASC;"
                ))?;
                let mut rows = stmt.query([kind])?;
                while let Some(row) = rows.next()? {
                    found.push(parse_record_row(row)?);
                }
            }
            Some(filter_sql) => {
                for chunk in values.chunks(MAX_IN_VALUES) {
                    if cancel.is_cancelled() {
                        return Err(StoreError::Cancelled);
                    }
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let sql = format!(
                        "{RECORD_SELECT_SQL} WHERE kind = ? AND {filter_sql} IN ({placeholders})"
                    );
                    let mut bind_values: Vec<Value> = Vec::with_capacity(chunk.len() + 1);
                    bind_values.push(Value::Text(kind.to_string()));
                    bind_values.extend(chunk.iter().cloned().map(Value::Text));

                    let mut stmt = self.conn.prepare(&sql)?;
                    let mut rows = stmt.query(params_from_iter(bind_values))?;
                    while let Some(row) = rows.next()? {
                        found.push(parse_record_row(row)?);
                    }
                }
                found.sort_by_key(|row| (row.created_at, row.row_order));
            }
        }

        Ok(found.into_iter().map(|row| row.record).collect())
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn find(
        &self,
        kind: &str,
        predicate: &Predicate,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<DomainRecord>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let started_at = Instant::now();

        let records = match predicate {
            Predicate::All => self.query_ordered(kind, None, &[], cancel)?,
            Predicate::AttributeIn { attribute, values } => {
                if !is_valid_name(attribute) {
                    return Err(StoreError::InvalidRequest(format!(
                        "invalid attribute name `{attribute}`"
                    )));
                }
                if values.is_empty() {
                    Vec::new()
                } else {
                    let filter = format!("json_extract(attributes, '$.{attribute}')");
                    self.query_ordered(kind, Some(filter.as_str()), values, cancel)?
                }
            }
            Predicate::IdIn(ids) => {
                let values: Vec<String> = ids.iter().map(ToString::to_string).collect();
                if values.is_empty() {
                    Vec::new()
                } else {
                    self.query_ordered(kind, Some("id"), &values, cancel)?
                }
            }
        };

        debug!(
            "event=store_find module=store status=ok kind={} matched={} duration_ms={}",
            kind,
            records.len(),
            started_at.elapsed().as_millis()
        );
        Ok(records)
    }

    fn write_batch(
        &self,
        kind: &str,
        records: &[DomainRecord],
        mode: WriteMode,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<WriteOutcome>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let started_at = Instant::now();
        let required = self
            .schema(kind)?
            .map(|schema| schema.required_attributes)
            .unwrap_or_default();

        let mut tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            if cancel.is_cancelled() {
                warn!(
                    "event=store_write module=store status=cancelled kind={} mode={} written={}",
                    kind,
                    mode.as_str(),
                    outcomes.len()
                );
                return Err(StoreError::Cancelled);
            }

            let sp = tx.savepoint()?;
            let outcome = write_row(&sp, kind, record, mode, &required)?;
            if outcome.is_ok() {
                sp.commit()?;
            }
            outcomes.push(outcome);
        }
        tx.commit()?;

        let rejected = outcomes.iter().filter(|outcome| outcome.is_err()).count();
        info!(
            "event=store_write module=store status=ok kind={} mode={} records={} rejected={} duration_ms={}",
            kind,
            mode.as_str(),
            records.len(),
            rejected,
            started_at.elapsed().as_millis()
        );
        Ok(outcomes)
    }
}

struct StoredRow {
    record: DomainRecord,
    created_at: i64,
    row_order: i64,
}

/// Writes one row. `Ok(Err(_))` is a per-record rejection; `Err(_)` aborts
/// the whole batch.
fn write_row(
    conn: &Connection,
    kind: &str,
    record: &DomainRecord,
    mode: WriteMode,
    required: &[String],
) -> StoreResult<WriteOutcome> {
    if record.kind != kind {
        return Ok(Err(format!(
            "record kind `{}` does not match batch kind `{kind}`",
            record.kind
        )));
    }

    if mode != WriteMode::Delete {
        if let Some(missing) = first_missing_required(&record.attributes, required) {
            return Ok(Err(format!("missing required attribute `{missing}`")));
        }
    }

    let result = match (mode, record.id) {
        (WriteMode::Insert, Some(id)) => {
            return Ok(Err(format!("insert requires a record without id, got {id}")));
        }
        (WriteMode::Insert, None) | (WriteMode::Upsert, None) => {
            insert_row(conn, kind, &record.attributes)
        }
        (WriteMode::Upsert, Some(id)) => update_row(conn, kind, id, &record.attributes),
        (WriteMode::Delete, None) => {
            return Ok(Err("delete requires a record id".to_string()));
        }
        (WriteMode::Delete, Some(id)) => delete_row(conn, kind, id),
    };

    match result {
        Ok(outcome) => Ok(outcome),
        Err(StoreError::Db(DbError::Sqlite(err))) if is_constraint_violation(&err) => {
            Ok(Err(format!("constraint violation: {err}")))
        }
        Err(err) => Err(err),
    }
}

fn insert_row(conn: &Connection, kind: &str, attributes: &Attributes) -> StoreResult<WriteOutcome> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO records (id, kind, attributes) VALUES (?1, ?2, ?3);",
        params![id.to_string(), kind, encode_attributes(attributes)?],
    )?;
    Ok(Ok(id))
}

fn update_row(
    conn: &Connection,
    kind: &str,
    id: RecordId,
    attributes: &Attributes,
) -> StoreResult<WriteOutcome> {
    let changed = conn.execute(
        "UPDATE records
         SET
            attributes = ?3,
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?1 AND kind = ?2;",
        params![id.to_string(), kind, encode_attributes(attributes)?],
    )?;
    if changed == 0 {
        return Ok(Err(format!("record not found: {id}")));
    }
    Ok(Ok(id))
}

fn delete_row(conn: &Connection, kind: &str, id: RecordId) -> StoreResult<WriteOutcome> {
    let changed = conn.execute(
        "DELETE FROM records WHERE id = ?1 AND kind = ?2;",
        params![id.to_string(), kind],
    )?;
    if changed == 0 {
        return Ok(Err(format!("record not found: {id}")));
    }
    Ok(Ok(id))
}

fn first_missing_required<'a>(attributes: &Attributes, required: &'a [String]) -> Option<&'a str> {
    required
        .iter()
        .find(|name| match attributes.get(name.as_str()) {
            None => true,
            Some(value) if value.is_null() => true,
            Some(value) => value.as_text().is_some_and(|text| text.trim().is_empty()),
        })
        .map(String::as_str)
}

fn encode_attributes(attributes: &Attributes) -> StoreResult<String> {
    serde_json::to_string(attributes)
        .map_err(|err| StoreError::InvalidRequest(format!("cannot encode attributes: {err}")))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::ConstraintViolation)
    )
}

fn parse_record_row(row: &Row<'_>) -> StoreResult<StoredRow> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        StoreError::InvalidData(format!("invalid uuid value `{id_text}` in records.id"))
    })?;
    let attributes_text: String = row.get("attributes")?;
    let attributes: Attributes = serde_json::from_str(&attributes_text).map_err(|err| {
        StoreError::InvalidData(format!("invalid records.attributes for {id_text}: {err}"))
    })?;

    let mut record = DomainRecord::with_id(row.get::<_, String>("kind")?, id);
    record.attributes = attributes;
    Ok(StoredRow {
        record,
        created_at: row.get("created_at")?,
        row_order: row.get("row_order")?,
    })
}

fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version = schema_version(conn)?;
    if actual_version != expected_version {
        return Err(StoreError::Unavailable(format!(
            "record store requires schema version {expected_version}, got {actual_version}"
        )));
    }

    for table in ["records", "kind_schemas"] {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(StoreError::Unavailable(format!(
                "record store requires table `{table}`"
            )));
        }
    }
    Ok(())
}
