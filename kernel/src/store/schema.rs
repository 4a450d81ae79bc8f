//! Schema installation and the versioned table registry.

use sqlx::SqliteConnection;

use super::error::StoreError;

/// A branch-scoped table tracked by the commit graph.
///
/// `columns` lists every column except `branch`, starting with `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionedTable {
    /// Table name.
    pub name: &'static str,
    /// Column list, `id` first.
    pub columns: &'static [&'static str],
}

impl VersionedTable {
    /// Comma-separated column list.
    #[must_use]
    pub fn column_list(&self) -> String {
        self.columns.join(", ")
    }
}

/// Components table.
pub const COMPONENTS: VersionedTable = VersionedTable {
    name: "components",
    columns: &[
        "id",
        "module_version_id",
        "name",
        "variables",
        "created_at",
        "updated_at",
    ],
};

/// Plans table.
pub const PLANS: VersionedTable = VersionedTable {
    name: "plans",
    columns: &[
        "id",
        "component_id",
        "changeset_id",
        "state",
        "from_version",
        "to_version",
        "add_count",
        "change_count",
        "destroy_count",
        "created_at",
        "updated_at",
    ],
};

/// Applies table.
pub const APPLIES: VersionedTable = VersionedTable {
    name: "applies",
    columns: &[
        "id",
        "plan_id",
        "changeset_id",
        "state",
        "created_at",
        "updated_at",
    ],
};

/// Component states table.
pub const STATES: VersionedTable = VersionedTable {
    name: "states",
    columns: &["id", "component_id", "version", "serial", "updated_at"],
};

/// State resources table.
pub const STATE_RESOURCES: VersionedTable = VersionedTable {
    name: "state_resources",
    columns: &[
        "id",
        "state_id",
        "address",
        "resource_type",
        "name",
        "attributes",
    ],
};

/// Every versioned table, in dependency order.
pub const VERSIONED_TABLES: &[VersionedTable] =
    &[COMPONENTS, PLANS, APPLIES, STATES, STATE_RESOURCES];

/// Looks up a versioned table by name.
#[must_use]
pub fn versioned_table(name: &str) -> Option<&'static VersionedTable> {
    VERSIONED_TABLES.iter().find(|t| t.name == name)
}

const SCHEMA: &[&str] = &[
    // Commit graph
    "CREATE TABLE IF NOT EXISTS vs_branches (
        name TEXT PRIMARY KEY,
        head TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS vs_commits (
        hash TEXT PRIMARY KEY,
        parent TEXT,
        merge_parent TEXT,
        branch TEXT NOT NULL,
        message TEXT NOT NULL,
        root_hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS vs_commit_rows (
        commit_hash TEXT NOT NULL,
        table_name TEXT NOT NULL,
        row_id INTEGER NOT NULL,
        row_hash TEXT NOT NULL,
        PRIMARY KEY (commit_hash, table_name, row_id)
    )",
    "CREATE TABLE IF NOT EXISTS vs_sequences (
        table_name TEXT PRIMARY KEY,
        next_id INTEGER NOT NULL
    )",
    // Global tables
    "CREATE TABLE IF NOT EXISTS changesets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        state TEXT NOT NULL,
        review_state TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS modules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        source TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS module_versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        module_id INTEGER NOT NULL REFERENCES modules(id),
        version TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (module_id, version)
    )",
    "CREATE TABLE IF NOT EXISTS merges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        changeset_id INTEGER NOT NULL REFERENCES changesets(id),
        state TEXT NOT NULL,
        error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rebases (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        changeset_id INTEGER NOT NULL REFERENCES changesets(id),
        state TEXT NOT NULL,
        error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS resources (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        provider TEXT NOT NULL,
        attributes TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS view_resources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        query TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    // Versioned tables
    "CREATE TABLE IF NOT EXISTS components (
        branch TEXT NOT NULL,
        id INTEGER NOT NULL,
        module_version_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        variables TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (branch, id),
        UNIQUE (branch, name)
    )",
    "CREATE TABLE IF NOT EXISTS plans (
        branch TEXT NOT NULL,
        id INTEGER NOT NULL,
        component_id INTEGER NOT NULL,
        changeset_id INTEGER NOT NULL,
        state TEXT NOT NULL,
        from_version TEXT,
        to_version TEXT,
        add_count INTEGER,
        change_count INTEGER,
        destroy_count INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (branch, id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_plans_state ON plans (branch, state)",
    "CREATE TABLE IF NOT EXISTS applies (
        branch TEXT NOT NULL,
        id INTEGER NOT NULL,
        plan_id INTEGER NOT NULL,
        changeset_id INTEGER NOT NULL,
        state TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (branch, id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_applies_state ON applies (branch, state)",
    "CREATE TABLE IF NOT EXISTS states (
        branch TEXT NOT NULL,
        id INTEGER NOT NULL,
        component_id INTEGER NOT NULL,
        version TEXT,
        serial INTEGER NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (branch, id),
        UNIQUE (branch, component_id)
    )",
    "CREATE TABLE IF NOT EXISTS state_resources (
        branch TEXT NOT NULL,
        id INTEGER NOT NULL,
        state_id INTEGER NOT NULL,
        address TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        name TEXT NOT NULL,
        attributes TEXT NOT NULL,
        PRIMARY KEY (branch, id),
        UNIQUE (branch, state_id, address)
    )",
];

/// Creates every table and index if missing.
///
/// # Errors
///
/// Returns an error if any DDL statement fails.
pub async fn install(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_versioned_table_starts_with_id() {
        for table in VERSIONED_TABLES {
            assert_eq!(table.columns[0], "id", "{}", table.name);
        }
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(versioned_table("plans"), Some(&PLANS));
        assert_eq!(versioned_table("changesets"), None);
    }
}
