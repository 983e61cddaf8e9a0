//! Graph importer
//!
//! Merges a [`FeedDocument`] into the store. Records are processed in
//! document order and upserted by `(kind, id)`; existing rows, stubs
//! included, are updated in place so their internal row id never changes.
//!
//! Forward references are only legal in relations: an unknown member
//! becomes a stub row that a later record hydrates. A way referencing an
//! unknown node is a malformed feed.
//!
//! The batch runs inside a SQL savepoint. Any error rolls back the whole
//! batch, even when the importer is nested inside a caller's transaction.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{MirrorError, MirrorResult};
use crate::feed::FeedDocument;
use crate::models::{Element, ElementKey, ElementKind, Node, Relation, Way};
use crate::storage::ElementStore;

const SAVEPOINT: &str = "osmcache_import";

/// What one import wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportStats {
    pub nodes: usize,
    pub ways: usize,
    pub relations: usize,
    /// Placeholders created for forward references
    pub stubs: usize,
}

impl ImportStats {
    /// Number of records imported (stubs not included)
    pub fn total(&self) -> usize {
        self.nodes + self.ways + self.relations
    }
}

impl fmt::Display for ImportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} ways, {} relations ({} stubs)",
            self.nodes, self.ways, self.relations, self.stubs
        )
    }
}

/// Merges feed documents into an element store
pub struct Importer<'c> {
    store: ElementStore<'c>,
    synced_at: DateTime<Utc>,
}

impl<'c> Importer<'c> {
    /// Importer stamping records with the current time
    pub fn new(store: ElementStore<'c>) -> Self {
        Self {
            store,
            synced_at: Utc::now(),
        }
    }

    /// Stamp imported records with `synced_at` instead of the current time
    pub fn synced_at(mut self, synced_at: DateTime<Utc>) -> Self {
        self.synced_at = synced_at;
        self
    }

    /// Import every record of `doc`, all or nothing
    pub fn import(&self, doc: &FeedDocument) -> MirrorResult<ImportStats> {
        let conn = self.store.connection();
        conn.execute_batch(&format!("SAVEPOINT {}", SAVEPOINT))?;

        match self.import_records(doc) {
            Ok(stats) => {
                conn.execute_batch(&format!("RELEASE {}", SAVEPOINT))?;
                info!("Imported {}", stats);
                Ok(stats)
            }
            Err(e) => {
                let rollback = format!("ROLLBACK TO {0}; RELEASE {0}", SAVEPOINT);
                if let Err(rollback_err) = conn.execute_batch(&rollback) {
                    warn!("Failed to roll back import: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    fn import_records(&self, doc: &FeedDocument) -> MirrorResult<ImportStats> {
        let mut stats = ImportStats::default();
        for element in &doc.elements {
            match element {
                Element::Node(node) => {
                    self.import_node(element, node)?;
                    stats.nodes += 1;
                }
                Element::Way(way) => {
                    self.import_way(element, way)?;
                    stats.ways += 1;
                }
                Element::Relation(relation) => {
                    stats.stubs += self.import_relation(element, relation)?;
                    stats.relations += 1;
                }
            }
        }
        Ok(stats)
    }

    fn import_node(&self, element: &Element, node: &Node) -> MirrorResult<()> {
        let key = element.key();
        check_coordinate(key, "latitude", node.latitude, 90.0)?;
        check_coordinate(key, "longitude", node.longitude, 180.0)?;

        let rowid = self.upsert(element)?;
        self.store.replace_tags(rowid, element.tags())?;
        Ok(())
    }

    fn import_way(&self, element: &Element, way: &Way) -> MirrorResult<()> {
        // Resolve every node before touching the way row
        let node_rowids = way
            .nodes
            .iter()
            .map(|node_id| {
                self.store
                    .find_rowid(ElementKind::Node, *node_id)?
                    .ok_or_else(|| {
                        MirrorError::malformed(format!(
                            "{} references unknown node {}",
                            element.key(),
                            node_id
                        ))
                    })
            })
            .collect::<MirrorResult<Vec<i64>>>()?;

        let rowid = self.upsert(element)?;
        self.store.replace_tags(rowid, element.tags())?;
        self.store.replace_way_nodes(rowid, &node_rowids)?;
        Ok(())
    }

    /// Returns the number of stubs created
    fn import_relation(&self, element: &Element, relation: &Relation) -> MirrorResult<usize> {
        // The relation row goes first so a self-reference resolves to it
        let rowid = self.upsert(element)?;

        let mut stubs = 0;
        let mut members = Vec::with_capacity(relation.members.len());
        for member in &relation.members {
            let member_rowid = match self.store.find_rowid(member.kind, member.id)? {
                Some(existing) => existing,
                None => {
                    debug!("Creating stub {} for {}", member.key(), element.key());
                    stubs += 1;
                    self.insert_stub(member.key())?
                }
            };
            members.push((member_rowid, member.role.clone()));
        }

        self.store.replace_tags(rowid, element.tags())?;
        self.store.replace_relation_members(rowid, &members)?;
        Ok(stubs)
    }

    /// Update the row stored under the element's key, or insert it
    fn upsert(&self, element: &Element) -> MirrorResult<i64> {
        let key = element.key();
        if let Some(rowid) = self.store.find_rowid(key.kind, key.id)? {
            self.store.update_element(rowid, element, self.synced_at)?;
            return Ok(rowid);
        }

        match self.store.insert_element(element, self.synced_at) {
            Ok(rowid) => Ok(rowid),
            Err(MirrorError::ConstraintViolation(reason)) => {
                debug!("{} appeared concurrently, updating instead: {}", key, reason);
                let rowid = self
                    .store
                    .find_rowid(key.kind, key.id)?
                    .ok_or(MirrorError::NotFound(key))?;
                self.store.update_element(rowid, element, self.synced_at)?;
                Ok(rowid)
            }
            Err(e) => Err(e),
        }
    }

    fn insert_stub(&self, key: ElementKey) -> MirrorResult<i64> {
        match self.store.insert_stub(key.kind, key.id) {
            Ok(rowid) => Ok(rowid),
            Err(MirrorError::ConstraintViolation(_)) => self
                .store
                .find_rowid(key.kind, key.id)?
                .ok_or(MirrorError::NotFound(key)),
            Err(e) => Err(e),
        }
    }
}

fn check_coordinate(
    key: ElementKey,
    name: &str,
    value: Option<f64>,
    limit: f64,
) -> MirrorResult<()> {
    match value {
        None => Err(MirrorError::malformed(format!("{} has no {}", key, name))),
        Some(v) if !v.is_finite() || v.abs() > limit => Err(MirrorError::malformed(format!(
            "{} has {} {} outside ±{}",
            key, name, v, limit
        ))),
        Some(_) => Ok(()),
    }
}
