//! Element reads and writes
//!
//! [`ElementStore`] is a borrowed view over a connection, normally the
//! caller's open transaction, so every write lands in that transaction.
//! Reads go through [`ElementStore::run_query`], which calls the two
//! interceptors:
//!
//! - [`QueryInspector::before_query`] once, before any SQL runs
//! - [`LoadListener::after_load`] for every materialized element, in result order

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};

use super::filter;
use super::Tables;
use crate::error::MirrorResult;
use crate::models::{
    Element, ElementCounts, ElementKind, ElementMeta, Member, Node, Relation, Way,
};
use crate::query::Query;

/// Called once per query before it executes
pub trait QueryInspector {
    fn before_query(&mut self, store: &ElementStore<'_>, query: &Query) -> MirrorResult<()>;
}

/// Called for every element a query materializes
///
/// The returned element replaces the loaded one in the result.
pub trait LoadListener {
    fn after_load(&mut self, store: &ElementStore<'_>, element: Element) -> MirrorResult<Element>;
}

/// Interceptor that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl QueryInspector for NoHooks {
    fn before_query(&mut self, _store: &ElementStore<'_>, _query: &Query) -> MirrorResult<()> {
        Ok(())
    }
}

impl LoadListener for NoHooks {
    fn after_load(&mut self, _store: &ElementStore<'_>, element: Element) -> MirrorResult<Element> {
        Ok(element)
    }
}

impl ToSql for ElementKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ElementKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// Column list matching [`ElementRow::from_row`]
pub(crate) fn element_columns(alias: &str) -> String {
    [
        "element_id",
        "kind",
        "osm_id",
        "version",
        "changeset",
        "user",
        "uid",
        "visible",
        "timestamp",
        "last_synced_at",
        "latitude",
        "longitude",
    ]
    .iter()
    .map(|column| format!("{}.{}", alias, column))
    .collect::<Vec<_>>()
    .join(", ")
}

/// Scalar columns of an element row
struct ElementRow {
    element_id: i64,
    kind: ElementKind,
    osm_id: i64,
    version: Option<i64>,
    changeset: Option<i64>,
    user: Option<String>,
    uid: Option<i64>,
    visible: Option<bool>,
    timestamp: Option<i64>,
    last_synced_at: Option<i64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl ElementRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            element_id: row.get(0)?,
            kind: row.get(1)?,
            osm_id: row.get(2)?,
            version: row.get(3)?,
            changeset: row.get(4)?,
            user: row.get(5)?,
            uid: row.get(6)?,
            visible: row.get(7)?,
            timestamp: row.get(8)?,
            last_synced_at: row.get(9)?,
            latitude: row.get(10)?,
            longitude: row.get(11)?,
        })
    }
}

fn millis(time: Option<DateTime<Utc>>) -> Option<i64> {
    time.map(|t| t.timestamp_millis())
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

fn coordinates(element: &Element) -> (Option<f64>, Option<f64>) {
    match element {
        Element::Node(node) => (node.latitude, node.longitude),
        _ => (None, None),
    }
}

/// Element access over a borrowed connection
#[derive(Clone, Copy)]
pub struct ElementStore<'c> {
    conn: &'c Connection,
    tables: &'c Tables,
}

impl<'c> ElementStore<'c> {
    pub fn new(conn: &'c Connection, tables: &'c Tables) -> Self {
        Self { conn, tables }
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    pub fn tables(&self) -> &'c Tables {
        self.tables
    }

    // ==================== Write Methods ====================

    /// Internal row id of the element stored under `(kind, id)`
    pub fn find_rowid(&self, kind: ElementKind, id: i64) -> MirrorResult<Option<i64>> {
        let rowid = self
            .conn
            .prepare_cached(&format!(
                "SELECT element_id FROM {} WHERE kind = ?1 AND osm_id = ?2",
                self.tables.elements
            ))?
            .query_row(params![kind, id], |row| row.get(0))
            .optional()?;
        Ok(rowid)
    }

    /// Insert a placeholder carrying only kind and id
    pub fn insert_stub(&self, kind: ElementKind, id: i64) -> MirrorResult<i64> {
        self.conn.execute(
            &format!(
                "INSERT INTO {} (kind, osm_id) VALUES (?1, ?2)",
                self.tables.elements
            ),
            params![kind, id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert the scalar fields of `element`, stamped with `synced_at`
    ///
    /// Tags and member lists are written separately.
    pub fn insert_element(&self, element: &Element, synced_at: DateTime<Utc>) -> MirrorResult<i64> {
        let meta = element.meta();
        let (latitude, longitude) = coordinates(element);
        self.conn.execute(
            &format!(
                r#"INSERT INTO {} (kind, osm_id, version, changeset, user, uid, visible,
                                   timestamp, last_synced_at, latitude, longitude)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
                self.tables.elements
            ),
            params![
                element.kind(),
                meta.id,
                meta.version,
                meta.changeset,
                meta.user,
                meta.uid,
                meta.visible,
                millis(meta.timestamp),
                synced_at.timestamp_millis(),
                latitude,
                longitude,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Replace every scalar field of the row `rowid`
    pub fn update_element(
        &self,
        rowid: i64,
        element: &Element,
        synced_at: DateTime<Utc>,
    ) -> MirrorResult<()> {
        let meta = element.meta();
        let (latitude, longitude) = coordinates(element);
        self.conn.execute(
            &format!(
                r#"UPDATE {} SET version = ?1, changeset = ?2, user = ?3, uid = ?4,
                       visible = ?5, timestamp = ?6, last_synced_at = ?7,
                       latitude = ?8, longitude = ?9
                   WHERE element_id = ?10"#,
                self.tables.elements
            ),
            params![
                meta.version,
                meta.changeset,
                meta.user,
                meta.uid,
                meta.visible,
                millis(meta.timestamp),
                synced_at.timestamp_millis(),
                latitude,
                longitude,
                rowid,
            ],
        )?;
        Ok(())
    }

    pub fn replace_tags(&self, rowid: i64, tags: &BTreeMap<String, String>) -> MirrorResult<()> {
        self.conn.execute(
            &format!("DELETE FROM {} WHERE element_id = ?1", self.tables.tags),
            [rowid],
        )?;

        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {} (element_id, key, value) VALUES (?1, ?2, ?3)",
            self.tables.tags
        ))?;
        for (key, value) in tags {
            stmt.execute(params![rowid, key, value])?;
        }
        Ok(())
    }

    /// Replace the node list of a way with `node_rowids`, positions from 0
    pub fn replace_way_nodes(&self, way_rowid: i64, node_rowids: &[i64]) -> MirrorResult<()> {
        self.conn.execute(
            &format!("DELETE FROM {} WHERE way_id = ?1", self.tables.way_nodes),
            [way_rowid],
        )?;

        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {} (way_id, position, node_id) VALUES (?1, ?2, ?3)",
            self.tables.way_nodes
        ))?;
        for (position, node_rowid) in node_rowids.iter().enumerate() {
            stmt.execute(params![way_rowid, position as i64, node_rowid])?;
        }
        Ok(())
    }

    /// Replace the member list of a relation with `(member rowid, role)` pairs
    pub fn replace_relation_members(
        &self,
        relation_rowid: i64,
        members: &[(i64, String)],
    ) -> MirrorResult<()> {
        self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE relation_id = ?1",
                self.tables.relation_members
            ),
            [relation_rowid],
        )?;

        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {} (relation_id, position, member_id, role) VALUES (?1, ?2, ?3, ?4)",
            self.tables.relation_members
        ))?;
        for (position, (member_rowid, role)) in members.iter().enumerate() {
            stmt.execute(params![relation_rowid, position as i64, member_rowid, role])?;
        }
        Ok(())
    }

    /// Overwrite the sync time of one element; `None` marks it as never synced
    ///
    /// Returns false if the element is not stored.
    pub fn set_synced_at(
        &self,
        kind: ElementKind,
        id: i64,
        synced_at: Option<DateTime<Utc>>,
    ) -> MirrorResult<bool> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET last_synced_at = ?1 WHERE kind = ?2 AND osm_id = ?3",
                self.tables.elements
            ),
            params![millis(synced_at), kind, id],
        )?;
        Ok(changed > 0)
    }

    // ==================== Query Methods ====================

    /// Load one element without running any interceptor
    pub fn load(&self, kind: ElementKind, id: i64) -> MirrorResult<Option<Element>> {
        let row = self
            .conn
            .prepare_cached(&format!(
                "SELECT {} FROM {} e WHERE e.kind = ?1 AND e.osm_id = ?2",
                element_columns("e"),
                self.tables.elements
            ))?
            .query_row(params![kind, id], ElementRow::from_row)
            .optional()?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row)?)),
            None => Ok(None),
        }
    }

    /// Run a query without interceptors
    pub fn select(&self, query: &Query) -> MirrorResult<Vec<Element>> {
        self.run_query(query, &mut NoHooks, &mut NoHooks)
    }

    /// Run a query through the interceptors
    pub fn run_query(
        &self,
        query: &Query,
        inspector: &mut dyn QueryInspector,
        listener: &mut dyn LoadListener,
    ) -> MirrorResult<Vec<Element>> {
        inspector.before_query(self, query)?;

        let compiled = filter::compile(query, self.tables);
        let mut stmt = self.conn.prepare(&compiled.sql)?;
        let rows = stmt
            .query_map(params_from_iter(compiled.params.iter()), ElementRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        // Hydrate everything before the listener may write
        let elements = rows
            .into_iter()
            .map(|row| self.hydrate(row))
            .collect::<MirrorResult<Vec<_>>>()?;

        elements
            .into_iter()
            .map(|element| listener.after_load(self, element))
            .collect()
    }

    pub fn count(&self, kind: ElementKind) -> MirrorResult<i64> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE kind = ?1", self.tables.elements),
            [kind],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn counts(&self) -> MirrorResult<ElementCounts> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT kind, COUNT(*) FROM {} GROUP BY kind",
            self.tables.elements
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, ElementKind>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = ElementCounts::default();
        for row in rows {
            let (kind, count) = row?;
            match kind {
                ElementKind::Node => counts.nodes = count,
                ElementKind::Way => counts.ways = count,
                ElementKind::Relation => counts.relations = count,
            }
        }
        Ok(counts)
    }

    /// Number of elements synced before `cutoff` or never synced
    pub fn count_stale(&self, cutoff: DateTime<Utc>) -> MirrorResult<i64> {
        let count = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE last_synced_at IS NULL OR last_synced_at < ?1",
                self.tables.elements
            ),
            [cutoff.timestamp_millis()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==================== Helper Methods ====================

    fn hydrate(&self, row: ElementRow) -> MirrorResult<Element> {
        let meta = ElementMeta {
            id: row.osm_id,
            version: row.version,
            changeset: row.changeset,
            user: row.user,
            uid: row.uid,
            visible: row.visible,
            timestamp: from_millis(row.timestamp),
            last_synced_at: from_millis(row.last_synced_at),
            tags: self.load_tags(row.element_id)?,
        };

        let element = match row.kind {
            ElementKind::Node => Element::Node(Node {
                meta,
                latitude: row.latitude,
                longitude: row.longitude,
            }),
            ElementKind::Way => Element::Way(Way {
                meta,
                nodes: self.load_way_nodes(row.element_id)?,
            }),
            ElementKind::Relation => Element::Relation(Relation {
                meta,
                members: self.load_relation_members(row.element_id)?,
            }),
        };
        Ok(element)
    }

    fn load_tags(&self, rowid: i64) -> MirrorResult<BTreeMap<String, String>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT key, value FROM {} WHERE element_id = ?1",
            self.tables.tags
        ))?;
        let tags = stmt
            .query_map([rowid], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;
        Ok(tags)
    }

    fn load_way_nodes(&self, way_rowid: i64) -> MirrorResult<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            r#"SELECT n.osm_id FROM {} wn
               JOIN {} n ON n.element_id = wn.node_id
               WHERE wn.way_id = ?1
               ORDER BY wn.position"#,
            self.tables.way_nodes, self.tables.elements
        ))?;
        let nodes = stmt
            .query_map([way_rowid], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(nodes)
    }

    fn load_relation_members(&self, relation_rowid: i64) -> MirrorResult<Vec<Member>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            r#"SELECT m.kind, m.osm_id, rm.role FROM {} rm
               JOIN {} m ON m.element_id = rm.member_id
               WHERE rm.relation_id = ?1
               ORDER BY rm.position"#,
            self.tables.relation_members, self.tables.elements
        ))?;
        let members = stmt
            .query_map([relation_rowid], |row| {
                Ok(Member {
                    kind: row.get(0)?,
                    id: row.get(1)?,
                    role: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<Member>>>()?;
        Ok(members)
    }
}
