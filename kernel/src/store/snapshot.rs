//! Row-level snapshots of a branch working set.
//!
//! Every versioned row is reduced to a SHA-256 over its cell values. A
//! snapshot is the sorted map of those hashes, and its root hash decides
//! whether a transaction changed anything worth committing.

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};
use sqlx::{
    sqlite::{SqliteConnection, SqliteRow},
    Row, ValueRef,
};

use super::error::StoreError;
use super::schema::{versioned_table, VersionedTable, VERSIONED_TABLES};

/// Identifies a row across versioned tables.
pub type RowKey = (&'static str, i64);

const FIELD_SEPARATOR: u8 = 0x1f;
const NULL_MARKER: &[u8] = &[0x00];

/// Hashes of every versioned row on one side of a comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    rows: BTreeMap<RowKey, String>,
}

impl Snapshot {
    /// Row hash for `key`, if the row exists.
    #[must_use]
    pub fn get(&self, key: &RowKey) -> Option<&str> {
        self.rows.get(key).map(String::as_str)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no versioned rows exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates over `(key, row hash)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&RowKey, &str)> {
        self.rows.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Union of the keys of all given snapshots.
    #[must_use]
    pub fn union_keys(snapshots: &[&Snapshot]) -> BTreeSet<RowKey> {
        snapshots
            .iter()
            .flat_map(|s| s.rows.keys().copied())
            .collect()
    }

    /// Digest over the whole snapshot.
    #[must_use]
    pub fn root_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for ((table, id), hash) in &self.rows {
            hasher.update(table.as_bytes());
            hasher.update(b":");
            hasher.update(id.to_string().as_bytes());
            hasher.update(b":");
            hasher.update(hash.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    fn insert(&mut self, key: RowKey, hash: String) {
        self.rows.insert(key, hash);
    }
}

/// Reads the current working set of `branch`.
///
/// # Errors
///
/// Returns an error if any table cannot be scanned.
pub async fn working_set(conn: &mut SqliteConnection, branch: &str) -> Result<Snapshot, StoreError> {
    let mut snapshot = Snapshot::default();
    for table in VERSIONED_TABLES {
        let sql = format!(
            "SELECT {} FROM {} WHERE branch = ? ORDER BY id",
            table.column_list(),
            table.name
        );
        let rows: Vec<SqliteRow> = sqlx::query(&sql)
            .bind(branch)
            .fetch_all(&mut *conn)
            .await?;
        for row in rows {
            let id: i64 = row.try_get(0)?;
            snapshot.insert((table.name, id), hash_row(&row, table.columns.len()));
        }
    }
    Ok(snapshot)
}

/// Loads the snapshot recorded with `commit_hash`.
///
/// # Errors
///
/// Returns an error on database failure or an unknown table name.
pub async fn load_commit(
    conn: &mut SqliteConnection,
    commit_hash: &str,
) -> Result<Snapshot, StoreError> {
    let rows: Vec<(String, i64, String)> = sqlx::query_as(
        "SELECT table_name, row_id, row_hash FROM vs_commit_rows WHERE commit_hash = ?",
    )
    .bind(commit_hash)
    .fetch_all(&mut *conn)
    .await?;

    let mut snapshot = Snapshot::default();
    for (table_name, row_id, row_hash) in rows {
        let table = versioned_table(&table_name).ok_or_else(|| {
            StoreError::Corrupt(format!("commit {commit_hash} references table {table_name}"))
        })?;
        snapshot.insert((table.name, row_id), row_hash);
    }
    Ok(snapshot)
}

/// Records `snapshot` as the content of `commit_hash`.
///
/// # Errors
///
/// Returns an error if an insert fails.
pub async fn persist(
    conn: &mut SqliteConnection,
    commit_hash: &str,
    snapshot: &Snapshot,
) -> Result<(), StoreError> {
    for ((table, id), hash) in snapshot.iter() {
        sqlx::query(
            "INSERT INTO vs_commit_rows (commit_hash, table_name, row_id, row_hash) VALUES (?, ?, ?, ?)",
        )
        .bind(commit_hash)
        .bind(*table)
        .bind(*id)
        .bind(hash)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Makes row `key` on `to` identical to the one on `from`, deleting it when
/// `from` has no such row.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn sync_row(
    conn: &mut SqliteConnection,
    key: RowKey,
    from: &str,
    to: &str,
) -> Result<(), StoreError> {
    let (table_name, id) = key;
    let table = table_for(table_name)?;
    sqlx::query(&format!(
        "DELETE FROM {} WHERE branch = ? AND id = ?",
        table.name
    ))
    .bind(to)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    let columns = table.column_list();
    sqlx::query(&format!(
        "INSERT INTO {name} (branch, {columns}) SELECT ?, {columns} FROM {name} WHERE branch = ? AND id = ?",
        name = table.name
    ))
    .bind(to)
    .bind(from)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Replaces every versioned row of `to` with the rows of `from`.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn copy_branch_rows(
    conn: &mut SqliteConnection,
    from: &str,
    to: &str,
) -> Result<(), StoreError> {
    clear_branch_rows(conn, to).await?;
    for table in VERSIONED_TABLES {
        let columns = table.column_list();
        sqlx::query(&format!(
            "INSERT INTO {name} (branch, {columns}) SELECT ?, {columns} FROM {name} WHERE branch = ?",
            name = table.name
        ))
        .bind(to)
        .bind(from)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Deletes every versioned row of `branch`.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn clear_branch_rows(conn: &mut SqliteConnection, branch: &str) -> Result<(), StoreError> {
    for table in VERSIONED_TABLES.iter().rev() {
        sqlx::query(&format!("DELETE FROM {} WHERE branch = ?", table.name))
            .bind(branch)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn table_for(name: &str) -> Result<&'static VersionedTable, StoreError> {
    versioned_table(name).ok_or_else(|| StoreError::Corrupt(format!("unknown table {name}")))
}

fn hash_row(row: &SqliteRow, width: usize) -> String {
    let mut hasher = Sha256::new();
    for index in 0..width {
        if index > 0 {
            hasher.update([FIELD_SEPARATOR]);
        }
        match cell_text(row, index) {
            Some(text) => hasher.update(text.as_bytes()),
            None => hasher.update(NULL_MARKER),
        }
    }
    hex::encode(hasher.finalize())
}

/// Best-effort textual form of a cell; `None` for SQL NULL.
fn cell_text(row: &SqliteRow, index: usize) -> Option<String> {
    if row.try_get_raw(index).map_or(true, |raw| raw.is_null()) {
        return None;
    }
    if let Ok(s) = row.try_get::<String, _>(index) {
        return Some(s);
    }
    if let Ok(n) = row.try_get::<i64, _>(index) {
        return Some(n.to_string());
    }
    if let Ok(f) = row.try_get::<f64, _>(index) {
        return Some(f.to_string());
    }
    row.try_get::<Vec<u8>, _>(index).ok().map(hex::encode)
}
