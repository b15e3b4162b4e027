//! Append-only, hash-chained audit log.
//!
//! Records are appended through the storage layer's single writer, so the
//! chain is extended by one record at a time. Each signature commits to the
//! previous record's signature and to this record's stored fields; see
//! [`cryptosafe_crypto::chain`]. There is no update or delete path, and the
//! schema triggers reject rewrites issued directly against the table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Transaction};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{format_timestamp, parse_timestamp, AuditAction, AuditRecord};
use cryptosafe_common::{EntryId, Error, Result};
use cryptosafe_crypto::{chain_link, verify_link, ChainFields, GENESIS};
use cryptosafe_storage::{storage_error, Database};

const SELECT_RECORDS: &str =
    "SELECT id, action, timestamp, entry_id, details, signature FROM audit_log";

/// Outcome of walking the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReport {
    pub intact: bool,
    /// Records examined, including the first broken one.
    pub records_checked: u64,
    /// Id of the first record whose signature is missing or does not verify.
    pub first_break: Option<i64>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.intact
    }
}

/// Raw row as stored, before conversion.
struct RawRecord {
    id: i64,
    action: String,
    timestamp: String,
    entry_id: Option<i64>,
    details: Option<String>,
    signature: Option<Vec<u8>>,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            action: row.get(1)?,
            timestamp: row.get(2)?,
            entry_id: row.get(3)?,
            details: row.get(4)?,
            signature: row.get(5)?,
        })
    }

    fn fields(&self) -> ChainFields<'_> {
        ChainFields {
            id: self.id,
            action: &self.action,
            timestamp: &self.timestamp,
            entry_id: self.entry_id,
            details: self.details.as_deref(),
        }
    }

    fn into_record(self) -> Result<AuditRecord> {
        Ok(AuditRecord {
            id: self.id,
            action: self.action.parse()?,
            timestamp: parse_timestamp(&self.timestamp)?,
            entry_id: self.entry_id,
            details: self.details.unwrap_or_default(),
            signature: self.signature,
        })
    }
}

/// Audit log over the vault database.
#[derive(Clone)]
pub struct AuditLog {
    db: Arc<Database>,
    signing: bool,
}

impl AuditLog {
    /// Create an audit log. With `signing` off, records carry no signature
    /// and the chain cannot be verified.
    pub fn new(db: Arc<Database>, signing: bool) -> Self {
        Self { db, signing }
    }

    pub fn signing_enabled(&self) -> bool {
        self.signing
    }

    /// Append a record in its own transaction.
    ///
    /// # Postconditions
    /// - Returns the new record id, one greater than the last
    /// - With signing on, the record is chained to its predecessor
    pub fn append(
        &self,
        action: AuditAction,
        timestamp: DateTime<Utc>,
        entry_id: Option<EntryId>,
        details: &str,
    ) -> Result<i64> {
        self.db
            .write(|tx| self.append_in(tx, action, timestamp, entry_id, details))
    }

    /// Append a record inside a transaction the caller already holds.
    ///
    /// Used by the store so an entry change and its audit record commit
    /// together.
    pub fn append_in(
        &self,
        tx: &Transaction<'_>,
        action: AuditAction,
        timestamp: DateTime<Utc>,
        entry_id: Option<EntryId>,
        details: &str,
    ) -> Result<i64> {
        let last: Option<(i64, Option<Vec<u8>>)> = tx
            .query_row(
                "SELECT id, signature FROM audit_log ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_error)?;

        let (id, prev) = match last {
            Some((last_id, signature)) => (last_id + 1, signature),
            None => (1, None),
        };
        let timestamp = format_timestamp(timestamp);
        let entry_id = entry_id.map(|id| id.get());

        let signature = if self.signing {
            let fields = ChainFields {
                id,
                action: action.as_str(),
                timestamp: &timestamp,
                entry_id,
                details: Some(details),
            };
            let prev = prev.as_deref().unwrap_or(&GENESIS[..]);
            Some(chain_link(prev, &fields).to_vec())
        } else {
            None
        };

        tx.execute(
            "INSERT INTO audit_log (id, action, timestamp, entry_id, details, signature) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, action.as_str(), timestamp, entry_id, details, signature],
        )
        .map_err(storage_error)?;

        debug!(record_id = id, action = %action, "Audit record appended");
        Ok(id)
    }

    /// Walk every record in id order and recompute its link.
    ///
    /// # Errors
    /// - `UnsupportedOperation` when signing is disabled
    /// - Storage failure
    pub fn verify_chain(&self) -> Result<ChainReport> {
        if !self.signing {
            return Err(Error::UnsupportedOperation(
                "Audit signing is disabled; there is no chain to verify".to_string(),
            ));
        }

        let report = self.db.read(|conn| {
            let mut stmt = conn
                .prepare(&format!("{} ORDER BY id", SELECT_RECORDS))
                .map_err(storage_error)?;
            let mut rows = stmt.query([]).map_err(storage_error)?;

            let mut prev: Vec<u8> = GENESIS.to_vec();
            let mut checked = 0u64;
            while let Some(row) = rows.next().map_err(storage_error)? {
                let record = RawRecord::from_row(row).map_err(storage_error)?;
                checked += 1;

                let linked = record
                    .signature
                    .as_deref()
                    .is_some_and(|sig| verify_link(&prev, &record.fields(), sig));
                if !linked {
                    return Ok(ChainReport {
                        intact: false,
                        records_checked: checked,
                        first_break: Some(record.id),
                    });
                }
                prev = record.signature.unwrap_or_default();
            }

            Ok(ChainReport {
                intact: true,
                records_checked: checked,
                first_break: None,
            })
        })?;

        if let Some(id) = report.first_break {
            warn!(record_id = id, "Audit chain broken");
        }
        Ok(report)
    }

    /// Audit records cannot be modified.
    pub fn update_record(&self, id: i64) -> Result<()> {
        Err(Error::UnsupportedOperation(format!(
            "Audit record {} cannot be modified",
            id
        )))
    }

    /// Audit records cannot be deleted.
    pub fn delete_record(&self, id: i64) -> Result<()> {
        Err(Error::UnsupportedOperation(format!(
            "Audit record {} cannot be deleted",
            id
        )))
    }

    /// Records referencing `entry_id`, oldest first. Deleted entries still
    /// have their history.
    pub fn query_by_entry(&self, entry_id: EntryId) -> Result<Vec<AuditRecord>> {
        self.query(
            &format!("{} WHERE entry_id = ?1 ORDER BY id", SELECT_RECORDS),
            params![entry_id.get()],
        )
    }

    /// Records with the given action, oldest first.
    pub fn query_by_action(&self, action: AuditAction) -> Result<Vec<AuditRecord>> {
        self.query(
            &format!("{} WHERE action = ?1 ORDER BY id", SELECT_RECORDS),
            params![action.as_str()],
        )
    }

    /// Up to `limit` records starting at `from_id`.
    pub fn list_range(&self, from_id: i64, limit: usize) -> Result<Vec<AuditRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query(
            &format!("{} WHERE id >= ?1 ORDER BY id LIMIT ?2", SELECT_RECORDS),
            params![from_id, limit],
        )
    }

    /// Number of records.
    pub fn count(&self) -> Result<u64> {
        self.db.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(storage_error)
        })
    }

    fn query<P: Params + Clone>(&self, sql: &str, params: P) -> Result<Vec<AuditRecord>> {
        self.db
            .read(|conn| read_records(conn, sql, params.clone()))?
            .into_iter()
            .map(RawRecord::into_record)
            .collect()
    }
}

fn read_records<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<RawRecord>> {
    let mut stmt = conn.prepare(sql).map_err(storage_error)?;
    let rows = stmt
        .query_map(params, RawRecord::from_row)
        .map_err(storage_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(storage_error)?;
    Ok(rows)
}
