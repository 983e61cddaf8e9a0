//! Mirror handle
//!
//! The `Mirror` owns the SQLite store, the remote client and the
//! configuration. Reads and writes happen in a [`Session`].
//!
//! ## Usage
//!
//! ```ignore
//! let mut mirror = Mirror::open()?;
//! mirror.import_file(Path::new("bonn.osm"))?;
//!
//! let mut session = mirror.session()?;
//! let cafes = session.query(
//!     &Query::of(ElementKind::Node).filter(Field::tag("amenity").eq("cafe")),
//! )?;
//! session.commit()?;
//! ```

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{MirrorError, MirrorResult};
use crate::feed::parse_osm_xml;
use crate::importer::ImportStats;
use crate::models::{Element, ElementCounts, ElementKind};
use crate::query::Query;
use crate::remote::{OverpassClient, RemoteSource};
use crate::session::Session;
use crate::storage::SqliteStore;

/// Local mirror of OSM elements
pub struct Mirror {
    store: SqliteStore,
    remote: Option<Box<dyn RemoteSource>>,
    config: Config,
}

impl Mirror {
    /// Open the mirror described by the user's configuration
    pub fn open() -> anyhow::Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config).context("Failed to open element store")
    }

    /// Open the mirror with a specific configuration
    ///
    /// With `online` set, an Overpass client for the configured endpoint
    /// is attached.
    pub fn open_with_config(config: Config) -> MirrorResult<Self> {
        let store = SqliteStore::open(&config)?;
        let remote = remote_for(&config);
        Ok(Self {
            store,
            remote,
            config,
        })
    }

    /// In-memory mirror without remote access (for testing and embedding)
    pub fn open_in_memory(config: Config) -> MirrorResult<Self> {
        let store = SqliteStore::open_in_memory(&config.table_prefix)?;
        Ok(Self {
            store,
            remote: None,
            config,
        })
    }

    /// Replace the remote source
    pub fn with_remote(mut self, remote: impl RemoteSource + 'static) -> Self {
        self.remote = Some(Box::new(remote));
        self
    }

    /// Drop the remote source; reads only use local data
    pub fn offline(mut self) -> Self {
        self.remote = None;
        self
    }

    pub fn is_online(&self) -> bool {
        self.remote.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a transaction
    pub fn session(&mut self) -> MirrorResult<Session<'_>> {
        let (tx, tables) = self.store.begin()?;
        Ok(Session::new(
            tx,
            tables,
            self.remote.as_deref(),
            &self.config,
        ))
    }

    // ==================== Import ====================

    /// Import an OSM XML document, all or nothing
    pub fn import_xml(&mut self, xml: &str) -> MirrorResult<ImportStats> {
        let doc = parse_osm_xml(xml)?;
        let mut session = self.session()?;
        let stats = session.import(&doc)?;
        session.commit()?;
        Ok(stats)
    }

    /// Import an OSM XML file
    pub fn import_file(&mut self, path: &Path) -> MirrorResult<ImportStats> {
        let xml = std::fs::read_to_string(path).map_err(|source| MirrorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Importing {}", path.display());
        self.import_xml(&xml)
    }

    // ==================== Reads ====================

    /// Load one element in its own session
    pub fn get(&mut self, kind: ElementKind, id: i64) -> MirrorResult<Option<Element>> {
        let mut session = self.session()?;
        let element = session.get(kind, id)?;
        session.commit()?;
        Ok(element)
    }

    /// Run one query in its own session
    pub fn query(&mut self, query: &Query) -> MirrorResult<Vec<Element>> {
        let mut session = self.session()?;
        let elements = session.query(query)?;
        session.commit()?;
        Ok(elements)
    }

    pub fn counts(&self) -> MirrorResult<ElementCounts> {
        self.store.elements().counts()
    }

    /// Elements older than `max_age`, stubs included
    pub fn stale_count(&self) -> MirrorResult<i64> {
        // A max_age reaching past the earliest representable time leaves only never-synced rows
        let cutoff = Utc::now()
            .checked_sub_signed(self.config.max_age())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.store.elements().count_stale(cutoff)
    }

    /// Mark an element as never synced; returns false if it is not stored
    pub fn expire(&mut self, kind: ElementKind, id: i64) -> MirrorResult<bool> {
        self.store.elements().set_synced_at(kind, id, None)
    }
}

fn remote_for(config: &Config) -> Option<Box<dyn RemoteSource>> {
    if !config.online {
        return None;
    }
    match OverpassClient::from_config(config) {
        Ok(client) => Some(Box::new(client)),
        Err(e) => {
            warn!("Remote access disabled: {}", e);
            None
        }
    }
}
