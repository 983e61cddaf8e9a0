//! SQLite schema for the element graph
//!
//! Table names come from [`Tables`] so several mirrors (or a host
//! application) can share one database file.

use rusqlite::{Connection, Result};

use super::Tables;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection, tables: &Tables) -> Result<()> {
    let Tables {
        elements,
        tags,
        way_nodes,
        relation_members,
        schema_info,
        ..
    } = tables;
    let p = tables.prefix();

    conn.execute_batch(&format!(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS {schema_info} (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- One row per element; stubs only have kind and osm_id
        CREATE TABLE IF NOT EXISTS {elements} (
            element_id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL CHECK (kind IN ('node', 'way', 'relation')),
            osm_id INTEGER NOT NULL,
            version INTEGER,
            changeset INTEGER,
            user TEXT,
            uid INTEGER,
            visible INTEGER,
            timestamp INTEGER,
            last_synced_at INTEGER,
            latitude REAL,
            longitude REAL,
            UNIQUE (kind, osm_id)
        );

        CREATE TABLE IF NOT EXISTS {tags} (
            element_id INTEGER NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (element_id, key),
            FOREIGN KEY (element_id) REFERENCES {elements}(element_id) ON DELETE CASCADE
        );

        -- Way node lists (ordered, duplicates allowed)
        CREATE TABLE IF NOT EXISTS {way_nodes} (
            way_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            node_id INTEGER NOT NULL,
            PRIMARY KEY (way_id, position),
            FOREIGN KEY (way_id) REFERENCES {elements}(element_id) ON DELETE CASCADE,
            FOREIGN KEY (node_id) REFERENCES {elements}(element_id)
        );

        -- Relation member lists (ordered)
        CREATE TABLE IF NOT EXISTS {relation_members} (
            relation_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            member_id INTEGER NOT NULL,
            role TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (relation_id, position),
            FOREIGN KEY (relation_id) REFERENCES {elements}(element_id) ON DELETE CASCADE,
            FOREIGN KEY (member_id) REFERENCES {elements}(element_id)
        );

        -- Bounding box queries
        CREATE INDEX IF NOT EXISTS idx_{p}elements_coords ON {elements}(latitude, longitude);

        -- Staleness scans
        CREATE INDEX IF NOT EXISTS idx_{p}elements_synced ON {elements}(last_synced_at);

        -- Tag lookups by key and value
        CREATE INDEX IF NOT EXISTS idx_{p}tags_key_value ON {tags}(key, value);

        -- Reverse lookups: which ways/relations use an element
        CREATE INDEX IF NOT EXISTS idx_{p}way_nodes_node ON {way_nodes}(node_id);
        CREATE INDEX IF NOT EXISTS idx_{p}relation_members_member ON {relation_members}(member_id);
        "#
    ))?;

    // Set schema version
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (key, value) VALUES ('version', ?)",
            schema_info
        ),
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection, tables: &Tables) -> Result<Option<i32>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT value FROM {} WHERE key = 'version'",
        tables.schema_info
    ))?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection, tables: &Tables) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?")
        .and_then(|mut stmt| stmt.exists([&tables.schema_info]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn, tables) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
