//! Commit graph: branch heads, commits and merge-base search.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{sqlite::SqliteConnection, Row};

use super::error::StoreError;
use super::snapshot::{self, Snapshot};
use crate::domain::TRUNK;

/// A node in the commit graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    /// Content-derived identifier.
    pub hash: String,
    /// First parent; `None` only for the root commit.
    pub parent: Option<String>,
    /// Second parent of a merge commit.
    pub merge_parent: Option<String>,
    /// Branch the commit was made on.
    pub branch: String,
    /// Commit message.
    pub message: String,
    /// Root hash of the recorded snapshot.
    pub root_hash: String,
    /// Commit time.
    pub created_at: DateTime<Utc>,
}

/// Parents used when writing a commit.
#[derive(Debug, Clone)]
pub struct NewCommit<'a> {
    /// Branch whose head will move to the new commit.
    pub branch: &'a str,
    /// Commit message.
    pub message: &'a str,
    /// First parent.
    pub parent: Option<String>,
    /// Second parent, for merges.
    pub merge_parent: Option<String>,
}

/// Current timestamp in the textual form used by every table.
#[must_use]
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Head commit of `branch`, or `None` if the branch does not exist.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn try_head(conn: &mut SqliteConnection, branch: &str) -> Result<Option<String>, StoreError> {
    let head: Option<String> = sqlx::query_scalar("SELECT head FROM vs_branches WHERE name = ?")
        .bind(branch)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(head)
}

/// Head commit of `branch`.
///
/// # Errors
///
/// Returns [`StoreError::BranchNotFound`] if the branch does not exist.
pub async fn head(conn: &mut SqliteConnection, branch: &str) -> Result<String, StoreError> {
    try_head(conn, branch)
        .await?
        .ok_or_else(|| StoreError::BranchNotFound(branch.to_string()))
}

/// Moves the head of `branch`.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn set_head(conn: &mut SqliteConnection, branch: &str, hash: &str) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE vs_branches SET head = ? WHERE name = ?")
        .bind(hash)
        .bind(branch)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::BranchNotFound(branch.to_string()));
    }
    Ok(())
}

/// Creates a branch ref pointing at `head`.
///
/// # Errors
///
/// Returns an error on database failure, including a duplicate name.
pub async fn create_branch_ref(
    conn: &mut SqliteConnection,
    branch: &str,
    head: &str,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO vs_branches (name, head, created_at) VALUES (?, ?, ?)")
        .bind(branch)
        .bind(head)
        .bind(timestamp())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Removes a branch ref. Commits stay in the graph.
///
/// # Errors
///
/// Returns [`StoreError::BranchNotFound`] if the branch does not exist.
pub async fn delete_branch_ref(conn: &mut SqliteConnection, branch: &str) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM vs_branches WHERE name = ?")
        .bind(branch)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::BranchNotFound(branch.to_string()));
    }
    Ok(())
}

/// Names of every branch.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn list_branches(conn: &mut SqliteConnection) -> Result<Vec<String>, StoreError> {
    let names = sqlx::query_scalar("SELECT name FROM vs_branches ORDER BY name")
        .fetch_all(&mut *conn)
        .await?;
    Ok(names)
}

/// Loads one commit.
///
/// # Errors
///
/// Returns [`StoreError::CommitNotFound`] if the hash is unknown.
pub async fn get_commit(conn: &mut SqliteConnection, hash: &str) -> Result<Commit, StoreError> {
    let row = sqlx::query(
        "SELECT hash, parent, merge_parent, branch, message, root_hash, created_at FROM vs_commits WHERE hash = ?",
    )
    .bind(hash)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| StoreError::CommitNotFound(hash.to_string()))?;

    let created_at: String = row.try_get("created_at")?;
    Ok(Commit {
        hash: row.try_get("hash")?,
        parent: row.try_get("parent")?,
        merge_parent: row.try_get("merge_parent")?,
        branch: row.try_get("branch")?,
        message: row.try_get("message")?,
        root_hash: row.try_get("root_hash")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::Corrupt(format!("commit {hash} timestamp: {e}")))?
            .with_timezone(&Utc),
    })
}

/// Writes a commit recording `snapshot` and moves the branch head to it.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn write_commit(
    conn: &mut SqliteConnection,
    new: NewCommit<'_>,
    snapshot: &Snapshot,
) -> Result<Commit, StoreError> {
    let created_at = Utc::now();
    let root_hash = snapshot.root_hash();

    let stamp = created_at.to_rfc3339_opts(SecondsFormat::Nanos, true);
    let salt = uuid::Uuid::new_v4().to_string();
    let mut hasher = Sha256::new();
    for part in [
        new.parent.as_deref().unwrap_or_default(),
        new.merge_parent.as_deref().unwrap_or_default(),
        new.branch,
        new.message,
        root_hash.as_str(),
        stamp.as_str(),
        salt.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    let hash = hex::encode(hasher.finalize());

    sqlx::query(
        "INSERT INTO vs_commits (hash, parent, merge_parent, branch, message, root_hash, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&hash)
    .bind(&new.parent)
    .bind(&new.merge_parent)
    .bind(new.branch)
    .bind(new.message)
    .bind(&root_hash)
    .bind(created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
    .execute(&mut *conn)
    .await?;

    snapshot::persist(conn, &hash, snapshot).await?;

    if try_head(conn, new.branch).await?.is_some() {
        set_head(conn, new.branch, &hash).await?;
    } else {
        create_branch_ref(conn, new.branch, &hash).await?;
    }

    metrics::counter!("stackforge_commits_total").increment(1);

    Ok(Commit {
        hash,
        parent: new.parent,
        merge_parent: new.merge_parent,
        branch: new.branch.to_string(),
        message: new.message.to_string(),
        root_hash,
        created_at,
    })
}

/// Creates trunk with an empty root commit if it does not exist yet.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn initialize_trunk(conn: &mut SqliteConnection) -> Result<bool, StoreError> {
    if try_head(conn, TRUNK).await?.is_some() {
        return Ok(false);
    }
    write_commit(
        conn,
        NewCommit {
            branch: TRUNK,
            message: "Initialize data repository",
            parent: None,
            merge_parent: None,
        },
        &Snapshot::default(),
    )
    .await?;
    Ok(true)
}

/// Nearest common ancestor of two commits.
///
/// # Errors
///
/// Returns an error on database failure.
pub async fn merge_base(
    conn: &mut SqliteConnection,
    a: &str,
    b: &str,
) -> Result<Option<String>, StoreError> {
    let rows = sqlx::query("SELECT hash, parent, merge_parent FROM vs_commits")
        .fetch_all(&mut *conn)
        .await?;
    let mut edges = HashMap::with_capacity(rows.len());
    for row in rows {
        let hash: String = row.try_get(0)?;
        let parent: Option<String> = row.try_get(1)?;
        let merge_parent: Option<String> = row.try_get(2)?;
        edges.insert(hash, (parent, merge_parent));
    }
    Ok(find_merge_base(&edges, a, b))
}

type Edges = HashMap<String, (Option<String>, Option<String>)>;

fn parents<'a>(edges: &'a Edges, hash: &str) -> impl Iterator<Item = &'a String> {
    edges
        .get(hash)
        .into_iter()
        .flat_map(|(p, m)| p.iter().chain(m.iter()))
}

/// Breadth-first search from `b` for the first commit reachable from `a`.
fn find_merge_base(edges: &Edges, a: &str, b: &str) -> Option<String> {
    let mut ancestors_of_a = HashSet::new();
    let mut queue = VecDeque::from([a.to_string()]);
    while let Some(hash) = queue.pop_front() {
        if ancestors_of_a.insert(hash.clone()) {
            queue.extend(parents(edges, &hash).cloned());
        }
    }

    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([b.to_string()]);
    while let Some(hash) = queue.pop_front() {
        if ancestors_of_a.contains(&hash) {
            return Some(hash);
        }
        if seen.insert(hash.clone()) {
            queue.extend(parents(edges, &hash).cloned());
        }
    }
    None
}

/// First-parent history of `branch`, newest first.
///
/// # Errors
///
/// Returns an error if the branch or any commit on the path is missing.
pub async fn history(
    conn: &mut SqliteConnection,
    branch: &str,
    limit: usize,
) -> Result<Vec<Commit>, StoreError> {
    let mut commits = Vec::new();
    let mut next = Some(head(conn, branch).await?);
    while let Some(hash) = next.take() {
        if commits.len() >= limit {
            break;
        }
        let commit = get_commit(conn, &hash).await?;
        next.clone_from(&commit.parent);
        commits.push(commit);
    }
    Ok(commits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(list: &[(&str, Option<&str>, Option<&str>)]) -> Edges {
        list.iter()
            .map(|(h, p, m)| {
                (
                    (*h).to_string(),
                    (p.map(str::to_string), m.map(str::to_string)),
                )
            })
            .collect()
    }

    #[test]
    fn merge_base_of_diverged_branches() {
        // root - a1 - a2
        //    \
        //     b1
        let graph = edges(&[
            ("root", None, None),
            ("a1", Some("root"), None),
            ("a2", Some("a1"), None),
            ("b1", Some("root"), None),
        ]);
        assert_eq!(find_merge_base(&graph, "a2", "b1").as_deref(), Some("root"));
    }

    #[test]
    fn merge_base_when_one_side_is_ancestor() {
        let graph = edges(&[("root", None, None), ("a1", Some("root"), None)]);
        assert_eq!(find_merge_base(&graph, "a1", "root").as_deref(), Some("root"));
        assert_eq!(find_merge_base(&graph, "root", "a1").as_deref(), Some("root"));
    }

    #[test]
    fn merge_base_follows_merge_parents() {
        // trunk: root - t1 - m (merge of b1)
        // branch:   \- b1 - b2
        let graph = edges(&[
            ("root", None, None),
            ("t1", Some("root"), None),
            ("b1", Some("root"), None),
            ("m", Some("t1"), Some("b1")),
            ("b2", Some("b1"), None),
        ]);
        assert_eq!(find_merge_base(&graph, "m", "b2").as_deref(), Some("b1"));
    }

    #[test]
    fn unrelated_histories_have_no_base() {
        let graph = edges(&[("x", None, None), ("y", None, None)]);
        assert_eq!(find_merge_base(&graph, "x", "y"), None);
    }
}
