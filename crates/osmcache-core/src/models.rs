//! Data models for osmcache
//!
//! Defines the three OSM element kinds: Node, Way, and Relation.
//! All of them share an [`ElementMeta`] block; the kind-specific payload
//! (coordinates, node list, member list) lives in the variant struct.
//!
//! An element whose metadata is entirely absent is a *stub*: a placeholder
//! created by the importer for a relation member that has not been seen yet.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator for the three element kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

impl ElementKind {
    /// All kinds, in the order the store reports them
    pub const ALL: [ElementKind; 3] = [ElementKind::Node, ElementKind::Way, ElementKind::Relation];

    /// Name as used in OSM XML and in the `kind` column
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Node => "node",
            ElementKind::Way => "way",
            ElementKind::Relation => "relation",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(ElementKind::Node),
            "way" => Ok(ElementKind::Way),
            "relation" => Ok(ElementKind::Relation),
            other => Err(format!(
                "unknown element kind '{}' (expected node, way or relation)",
                other
            )),
        }
    }
}

/// Unique key of an element: OSM ids are only unique per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementKey {
    pub kind: ElementKind,
    pub id: i64,
}

impl ElementKey {
    pub fn new(kind: ElementKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Metadata shared by every element kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementMeta {
    /// OSM id (not the internal storage key)
    pub id: i64,
    pub version: Option<i64>,
    pub changeset: Option<i64>,
    /// Name of the last editor
    pub user: Option<String>,
    /// Uid of the last editor
    pub uid: Option<i64>,
    pub visible: Option<bool>,
    /// Edit time as reported by the remote service
    pub timestamp: Option<DateTime<Utc>>,
    /// When this record was last written by an import or refresh
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ElementMeta {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// True if nothing beyond the id has ever been set
    fn is_bare(&self) -> bool {
        self.version.is_none()
            && self.changeset.is_none()
            && self.user.is_none()
            && self.uid.is_none()
            && self.visible.is_none()
            && self.timestamp.is_none()
            && self.last_synced_at.is_none()
            && self.tags.is_empty()
    }
}

/// A point with coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub meta: ElementMeta,
    /// Required for hydrated nodes; absent only on a stub
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Node {
    pub fn new(id: i64, latitude: f64, longitude: f64) -> Self {
        Self {
            meta: ElementMeta::new(id),
            latitude: Some(latitude),
            longitude: Some(longitude),
        }
    }
}

/// An ordered list of nodes (a path or, when closed, an area)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Way {
    #[serde(flatten)]
    pub meta: ElementMeta,
    /// OSM ids of the member nodes, in order. The same node may appear twice.
    pub nodes: Vec<i64>,
}

impl Way {
    pub fn new(id: i64) -> Self {
        Self {
            meta: ElementMeta::new(id),
            nodes: Vec::new(),
        }
    }
}

/// A member of a relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub kind: ElementKind,
    pub id: i64,
    #[serde(default)]
    pub role: String,
}

impl Member {
    pub fn new(kind: ElementKind, id: i64, role: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            role: role.into(),
        }
    }

    pub fn key(&self) -> ElementKey {
        ElementKey::new(self.kind, self.id)
    }
}

/// An ordered grouping of elements with roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    #[serde(flatten)]
    pub meta: ElementMeta,
    pub members: Vec<Member>,
}

impl Relation {
    pub fn new(id: i64) -> Self {
        Self {
            meta: ElementMeta::new(id),
            members: Vec::new(),
        }
    }
}

/// Any OSM element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Element {
    /// Create a placeholder carrying only kind and id
    pub fn stub(kind: ElementKind, id: i64) -> Self {
        match kind {
            ElementKind::Node => Element::Node(Node {
                meta: ElementMeta::new(id),
                latitude: None,
                longitude: None,
            }),
            ElementKind::Way => Element::Way(Way::new(id)),
            ElementKind::Relation => Element::Relation(Relation::new(id)),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Node(_) => ElementKind::Node,
            Element::Way(_) => ElementKind::Way,
            Element::Relation(_) => ElementKind::Relation,
        }
    }

    pub fn id(&self) -> i64 {
        self.meta().id
    }

    pub fn key(&self) -> ElementKey {
        ElementKey::new(self.kind(), self.id())
    }

    pub fn meta(&self) -> &ElementMeta {
        match self {
            Element::Node(n) => &n.meta,
            Element::Way(w) => &w.meta,
            Element::Relation(r) => &r.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ElementMeta {
        match self {
            Element::Node(n) => &mut n.meta,
            Element::Way(w) => &mut w.meta,
            Element::Relation(r) => &mut r.meta,
        }
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.meta().tags
    }

    /// Check whether this element is an unhydrated placeholder
    pub fn is_stub(&self) -> bool {
        let payload_empty = match self {
            Element::Node(n) => n.latitude.is_none() && n.longitude.is_none(),
            Element::Way(w) => w.nodes.is_empty(),
            Element::Relation(r) => r.members.is_empty(),
        };
        payload_empty && self.meta().is_bare()
    }

    /// Keys of the elements this one refers to, in order
    pub fn child_keys(&self) -> Vec<ElementKey> {
        match self {
            Element::Node(_) => Vec::new(),
            Element::Way(w) => w
                .nodes
                .iter()
                .map(|id| ElementKey::new(ElementKind::Node, *id))
                .collect(),
            Element::Relation(r) => r.members.iter().map(Member::key).collect(),
        }
    }
}

impl From<Node> for Element {
    fn from(node: Node) -> Self {
        Element::Node(node)
    }
}

impl From<Way> for Element {
    fn from(way: Way) -> Self {
        Element::Way(way)
    }
}

impl From<Relation> for Element {
    fn from(relation: Relation) -> Self {
        Element::Relation(relation)
    }
}

/// Number of stored elements per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ElementCounts {
    pub nodes: i64,
    pub ways: i64,
    pub relations: i64,
}

impl ElementCounts {
    pub fn total(&self) -> i64 {
        self.nodes + self.ways + self.relations
    }
}
