//! osmcache Core Library
//!
//! This crate keeps a local SQLite mirror of OpenStreetMap elements
//! (nodes, ways and relations) and keeps it fresh against an Overpass
//! endpoint while it is being read.
//!
//! # Architecture
//!
//! - **SQLite**: every element lives in a set of prefixed tables
//! - **Importer**: merges OSM XML documents, creating stubs for forward
//!   references in relations
//! - **Freshness monitor**: refetches elements older than `max_age` as
//!   queries load them
//! - **Analyzer**: reduces query filters to per-kind predicates used to
//!   fetch matching elements before the local query runs
//!
//! # Quick Start
//!
//! ```text
//! let mut mirror = Mirror::open()?;
//! mirror.import_file(Path::new("bonn.osm"))?;
//!
//! let query = Query::of(ElementKind::Node).filter(Expr::and(vec![
//!     Field::Latitude.ge(50.0),
//!     Field::Longitude.le(7.2),
//! ]));
//! let nodes = mirror.query(&query)?;
//! ```
//!
//! # Modules
//!
//! - `mirror`: Mirror handle (main entry point)
//! - `session`: Transactions with prefetch and freshness interceptors
//! - `models`: Nodes, ways, relations and their metadata
//! - `query`: Filter expressions over element fields
//! - `analyzer`: Canonical per-kind predicates
//! - `importer`: OSM document import
//! - `freshness`: Staleness checks and refresh on read
//! - `remote`: Overpass client and scoped fetch planning
//! - `storage`: SQLite schema and element access
//! - `config`: Application configuration

pub mod analyzer;
pub mod config;
pub mod error;
pub mod feed;
pub mod freshness;
pub mod importer;
pub mod mirror;
pub mod models;
pub mod query;
pub mod remote;
pub mod session;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use analyzer::{analyze, Analysis, Predicate, ScopedPredicate};
pub use config::Config;
pub use error::{MirrorError, MirrorResult, RemoteError};
pub use feed::{parse_osm_xml, FeedDocument};
pub use freshness::{Freshness, FreshnessMonitor};
pub use importer::{ImportStats, Importer};
pub use mirror::Mirror;
pub use models::{
    Element, ElementCounts, ElementKey, ElementKind, ElementMeta, Member, Node, Relation, Way,
};
pub use query::{Expr, Field, Query, Value};
pub use remote::{OverpassClient, RemoteSource, Scope};
pub use session::Session;
pub use storage::{ElementStore, LoadListener, QueryInspector, SqliteStore};
