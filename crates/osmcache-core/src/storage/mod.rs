//! Storage layer
//!
//! SQLite store adapter for the element graph.
//!
//! ## Tables
//!
//! Every table name carries the configured prefix (`osm_` by default) so the
//! mirror can live inside a host application's database:
//!
//! - `{prefix}elements` - One row per element, keyed by `(kind, osm_id)`
//! - `{prefix}tags` - Key/value tags per element
//! - `{prefix}way_nodes` - Ordered node list of each way
//! - `{prefix}relation_members` - Ordered member list of each relation
//! - `{prefix}schema_info` - Schema version tracking

pub mod elements;
pub mod filter;
pub mod schema;

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction};
use tracing::debug;

use crate::config::Config;
use crate::error::{MirrorError, MirrorResult};

pub use elements::{ElementStore, LoadListener, NoHooks, QueryInspector};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};

/// How long a write waits on a lock held by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefixed table names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    prefix: String,
    pub elements: String,
    pub tags: String,
    pub way_nodes: String,
    pub relation_members: String,
    pub schema_info: String,
}

impl Tables {
    /// Build table names for `prefix`
    ///
    /// The prefix is spliced into SQL, so only `[A-Za-z0-9_]` is accepted.
    pub fn new(prefix: &str) -> MirrorResult<Self> {
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(MirrorError::InvalidPrefix(prefix.to_string()));
        }

        Ok(Self {
            prefix: prefix.to_string(),
            elements: format!("{}elements", prefix),
            tags: format!("{}tags", prefix),
            way_nodes: format!("{}way_nodes", prefix),
            relation_members: format!("{}relation_members", prefix),
            schema_info: format!("{}schema_info", prefix),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Owns the SQLite connection and the table layout
pub struct SqliteStore {
    conn: Connection,
    tables: Tables,
}

impl SqliteStore {
    /// Open or create the database configured in `config`
    pub fn open(config: &Config) -> MirrorResult<Self> {
        Self::open_path(&config.sqlite_path(), &config.table_prefix)
    }

    /// Open or create a database file
    pub fn open_path(path: &Path, prefix: &str) -> MirrorResult<Self> {
        let tables = Tables::new(prefix)?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| MirrorError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        debug!("Opening element store at {}", path.display());
        let conn = Connection::open(path)?;
        Self::prepare(conn, tables)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(prefix: &str) -> MirrorResult<Self> {
        let tables = Tables::new(prefix)?;
        Self::prepare(Connection::open_in_memory()?, tables)
    }

    fn prepare(conn: Connection, tables: Tables) -> MirrorResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        if needs_init(&conn, &tables) {
            init_schema(&conn, &tables)?;
        }

        Ok(Self { conn, tables })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Element view over the bare connection (autocommit)
    pub fn elements(&self) -> ElementStore<'_> {
        ElementStore::new(&self.conn, &self.tables)
    }

    /// Begin a transaction, handing out the table layout alongside it
    pub fn begin(&mut self) -> MirrorResult<(Transaction<'_>, &Tables)> {
        let tx = self.conn.transaction()?;
        Ok((tx, &self.tables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_use_prefix() {
        let tables = Tables::new("osm_").unwrap();
        assert_eq!(tables.elements, "osm_elements");
        assert_eq!(tables.relation_members, "osm_relation_members");
        assert_eq!(tables.prefix(), "osm_");

        let bare = Tables::new("").unwrap();
        assert_eq!(bare.tags, "tags");
    }

    #[test]
    fn test_prefix_rejects_sql() {
        for bad in ["osm-", "osm; DROP TABLE x", "o\"sm", "ösm_"] {
            assert!(matches!(
                Tables::new(bad),
                Err(MirrorError::InvalidPrefix(_))
            ));
        }
    }

    #[test]
    fn test_open_creates_file_and_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mirror.db");

        let store = SqliteStore::open_path(&path, "osm_").unwrap();
        assert!(path.exists());
        assert_eq!(store.elements().counts().unwrap().total(), 0);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");

        {
            let store = SqliteStore::open_path(&path, "osm_").unwrap();
            store
                .elements()
                .insert_stub(crate::models::ElementKind::Node, 1)
                .unwrap();
        }

        let store = SqliteStore::open_path(&path, "osm_").unwrap();
        assert_eq!(store.elements().counts().unwrap().nodes, 1);
    }

    #[test]
    fn test_two_prefixes_share_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.db");

        let a = SqliteStore::open_path(&path, "a_").unwrap();
        a.elements()
            .insert_stub(crate::models::ElementKind::Way, 5)
            .unwrap();
        drop(a);

        let b = SqliteStore::open_path(&path, "b_").unwrap();
        assert_eq!(b.elements().counts().unwrap().total(), 0);
    }

    #[test]
    fn test_open_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let _store = SqliteStore::open(&config).unwrap();
        assert!(config.sqlite_path().exists());
    }
}
