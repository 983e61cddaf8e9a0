//! Freshness monitor
//!
//! Checks every element a query materializes. An element whose last sync
//! is older than `max_age` is fetched again from the remote service and
//! re-imported inside the reader's transaction. Elements that were never
//! synced, stubs included, are always stale.
//!
//! A refresh stamps `last_synced_at` with the fetch time, so the same
//! element is not judged stale again until another `max_age` has passed.
//! Remote failures never fail the read: the stored copy is returned and a
//! warning is logged.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::MirrorResult;
use crate::importer::Importer;
use crate::models::{Element, ElementKey, ElementKind};
use crate::remote::RemoteSource;
use crate::storage::{ElementStore, LoadListener};

/// Freshness of one element during a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Synced within `max_age`; returned as is
    Fresh,
    /// Older than `max_age` or never synced
    Stale,
    /// A refresh of this element is in progress
    Refreshing,
    /// Fetched and merged during this read
    Refreshed,
}

/// Classify an element by the age of its last sync
pub fn classify(element: &Element, now: DateTime<Utc>, max_age: Duration) -> Freshness {
    match element.meta().last_synced_at {
        Some(synced) if now - synced <= max_age => Freshness::Fresh,
        _ => Freshness::Stale,
    }
}

/// Load listener that refreshes stale elements
pub struct FreshnessMonitor<'r> {
    remote: Option<&'r dyn RemoteSource>,
    max_age: Duration,
    recursive: bool,
    /// Keys being refreshed right now
    in_flight: HashSet<ElementKey>,
    refreshed: usize,
    failed: usize,
}

impl<'r> FreshnessMonitor<'r> {
    /// Without a remote, stale elements are returned unchanged
    pub fn new(remote: Option<&'r dyn RemoteSource>, max_age: Duration, recursive: bool) -> Self {
        Self {
            remote,
            max_age,
            recursive,
            in_flight: HashSet::new(),
            refreshed: 0,
            failed: 0,
        }
    }

    /// Current state of `element`
    pub fn state(&self, element: &Element, now: DateTime<Utc>) -> Freshness {
        if self.in_flight.contains(&element.key()) {
            Freshness::Refreshing
        } else {
            classify(element, now, self.max_age)
        }
    }

    /// Number of successful refreshes so far
    pub fn refreshed(&self) -> usize {
        self.refreshed
    }

    /// Number of refreshes that fell back to the stored copy
    pub fn failed(&self) -> usize {
        self.failed
    }

    fn refresh(&mut self, store: &ElementStore<'_>, element: Element) -> Element {
        let key = element.key();
        let Some(remote) = self.remote else {
            debug!("{} is stale but remote access is disabled", key);
            return element;
        };

        self.in_flight.insert(key);
        let result = self.fetch_and_merge(store, remote, key);
        self.in_flight.remove(&key);

        match result {
            Ok(Some(fresh)) => {
                debug!("{} {:?}", key, Freshness::Refreshed);
                self.refreshed += 1;
                fresh
            }
            Ok(None) => {
                warn!("Remote service did not return {}, keeping stored copy", key);
                self.failed += 1;
                element
            }
            Err(e) => {
                warn!("Failed to refresh {}, keeping stored copy: {}", key, e);
                self.failed += 1;
                element
            }
        }
    }

    fn fetch_and_merge(
        &self,
        store: &ElementStore<'_>,
        remote: &dyn RemoteSource,
        key: ElementKey,
    ) -> MirrorResult<Option<Element>> {
        let recurse = self.recursive && key.kind != ElementKind::Node;
        let fetched_at = Utc::now();
        debug!("Refreshing {} (recurse: {})", key, recurse);

        let doc = remote.fetch_element(key.kind, key.id, recurse)?;
        if doc.get(key).is_none() {
            return Ok(None);
        }

        Importer::new(*store).synced_at(fetched_at).import(&doc)?;
        store.load(key.kind, key.id)
    }
}

impl LoadListener for FreshnessMonitor<'_> {
    fn after_load(&mut self, store: &ElementStore<'_>, element: Element) -> MirrorResult<Element> {
        let now = Utc::now();
        match self.state(&element, now) {
            Freshness::Stale => {
                // An earlier recursive refresh in this read may have rewritten the row
                let current = store
                    .load(element.kind(), element.id())?
                    .unwrap_or(element);
                match classify(&current, now, self.max_age) {
                    Freshness::Fresh => Ok(current),
                    _ => Ok(self.refresh(store, current)),
                }
            }
            // Refreshing: a nested load of the element being refreshed
            _ => Ok(element),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::parse_osm_xml;
    use crate::models::Node;
    use crate::query::{Field, Query};
    use crate::storage::{NoHooks, SqliteStore};
    use crate::test_support::FakeRemote;

    fn max_age() -> Duration {
        Duration::hours(24)
    }

    /// Store holding node 1 and way 10, synced two max-ages ago
    fn stale_store() -> (SqliteStore, DateTime<Utc>) {
        let store = SqliteStore::open_in_memory("osm_").unwrap();
        let synced = Utc::now() - max_age() * 2;
        let doc = parse_osm_xml(
            r#"<osm>
                 <node id="1" lat="50.0" lon="7.0" version="1"/>
                 <node id="2" lat="50.1" lon="7.1" version="1"/>
                 <way id="10" version="1"><nd ref="1"/><nd ref="2"/></way>
               </osm>"#,
        )
        .unwrap();
        Importer::new(store.elements())
            .synced_at(synced)
            .import(&doc)
            .unwrap();
        (store, synced)
    }

    fn remote() -> FakeRemote {
        FakeRemote::new()
            .with_element(
                ElementKind::Node,
                1,
                r#"<osm><node id="1" lat="50.5" lon="7.5" version="2"/></osm>"#,
            )
            .with_element(
                ElementKind::Way,
                10,
                r#"<osm>
                     <node id="2" lat="50.1" lon="7.1" version="1"/>
                     <node id="3" lat="50.2" lon="7.2" version="1"/>
                     <way id="10" version="2"><nd ref="2"/><nd ref="3"/></way>
                   </osm>"#,
            )
    }

    fn read_node(store: &SqliteStore, monitor: &mut FreshnessMonitor<'_>) -> Element {
        let query = Query::of(ElementKind::Node).filter(Field::Id.eq(1));
        let mut result = store
            .elements()
            .run_query(&query, &mut NoHooks, monitor)
            .unwrap();
        assert_eq!(result.len(), 1);
        result.remove(0)
    }

    #[test]
    fn test_classify() {
        let now = Utc::now();
        let mut node = Node::new(1, 0.0, 0.0);

        node.meta.last_synced_at = Some(now - Duration::hours(1));
        assert_eq!(classify(&node.clone().into(), now, max_age()), Freshness::Fresh);

        node.meta.last_synced_at = Some(now - max_age());
        assert_eq!(classify(&node.clone().into(), now, max_age()), Freshness::Fresh);

        node.meta.last_synced_at = Some(now - max_age() - Duration::seconds(1));
        assert_eq!(classify(&node.clone().into(), now, max_age()), Freshness::Stale);

        node.meta.last_synced_at = None;
        assert_eq!(classify(&node.into(), now, max_age()), Freshness::Stale);

        let stub = Element::stub(ElementKind::Relation, 5);
        assert_eq!(classify(&stub, now, max_age()), Freshness::Stale);
    }

    #[test]
    fn test_stale_read_refreshes_exactly_once() {
        let (store, synced) = stale_store();
        let remote = remote();
        let mut monitor = FreshnessMonitor::new(Some(&remote), max_age(), true);
        let before = Utc::now();

        let first = read_node(&store, &mut monitor);
        assert_eq!(remote.calls(), vec!["element node/1 recurse=false"]);
        let Element::Node(node) = &first else {
            panic!("expected node");
        };
        assert_eq!(node.latitude, Some(50.5));
        assert_eq!(node.meta.version, Some(2));
        let refreshed_at = node.meta.last_synced_at.unwrap();
        assert!(refreshed_at > synced);
        assert!(refreshed_at.timestamp_millis() >= before.timestamp_millis());

        let second = read_node(&store, &mut monitor);
        assert_eq!(remote.call_count(), 1);
        assert_eq!(second, first);
        assert_eq!(monitor.refreshed(), 1);
    }

    #[test]
    fn test_remote_failure_serves_stale_copy() {
        let (store, synced) = stale_store();
        let remote = remote();
        remote.fail();
        let mut monitor = FreshnessMonitor::new(Some(&remote), max_age(), true);

        let element = read_node(&store, &mut monitor);
        assert_eq!(remote.call_count(), 1);
        assert_eq!(element.meta().version, Some(1));
        assert_eq!(
            element.meta().last_synced_at.unwrap().timestamp_millis(),
            synced.timestamp_millis()
        );
        assert_eq!(monitor.failed(), 1);
    }

    #[test]
    fn test_offline_never_fetches() {
        let (store, _) = stale_store();
        let mut monitor = FreshnessMonitor::new(None, max_age(), true);
        let element = read_node(&store, &mut monitor);
        assert_eq!(element.meta().version, Some(1));
    }

    #[test]
    fn test_fresh_elements_are_not_fetched() {
        let store = SqliteStore::open_in_memory("osm_").unwrap();
        let doc = parse_osm_xml(r#"<osm><node id="1" lat="1" lon="1"/></osm>"#).unwrap();
        Importer::new(store.elements()).import(&doc).unwrap();

        let remote = remote();
        let mut monitor = FreshnessMonitor::new(Some(&remote), max_age(), true);
        read_node(&store, &mut monitor);
        assert_eq!(remote.call_count(), 0);
    }

    #[test]
    fn test_way_refresh_pulls_children() {
        let (store, _) = stale_store();
        let remote = remote();
        let mut monitor = FreshnessMonitor::new(Some(&remote), max_age(), true);

        let query = Query::of(ElementKind::Way);
        let ways = store
            .elements()
            .run_query(&query, &mut NoHooks, &mut monitor)
            .unwrap();
        assert_eq!(remote.calls(), vec!["element way/10 recurse=true"]);

        let Element::Way(way) = &ways[0] else {
            panic!("expected way");
        };
        assert_eq!(way.nodes, vec![2, 3]);
        assert_eq!(store.elements().counts().unwrap().nodes, 3);
    }

    #[test]
    fn test_non_recursive_refresh() {
        let (store, _) = stale_store();
        let remote = remote();
        let mut monitor = FreshnessMonitor::new(Some(&remote), max_age(), false);
        store
            .elements()
            .run_query(&Query::of(ElementKind::Way), &mut NoHooks, &mut monitor)
            .unwrap();
        assert_eq!(remote.calls(), vec!["element way/10 recurse=false"]);
    }

    #[test]
    fn test_missing_remote_element_keeps_stored_copy() {
        let (store, _) = stale_store();
        // No canned answer for node 2
        let remote = remote();
        let mut monitor = FreshnessMonitor::new(Some(&remote), max_age(), true);

        let query = Query::of(ElementKind::Node).filter(Field::Id.eq(2));
        let result = store
            .elements()
            .run_query(&query, &mut NoHooks, &mut monitor)
            .unwrap();
        assert_eq!(result[0].meta().version, Some(1));
        assert_eq!(monitor.failed(), 1);
    }

    #[test]
    fn test_malformed_remote_answer_keeps_stored_copy() {
        let (store, _) = stale_store();
        // The way references a node the answer does not contain
        let remote = FakeRemote::new().with_element(
            ElementKind::Way,
            10,
            r#"<osm><way id="10" version="3"><nd ref="77"/></way></osm>"#,
        );
        let mut monitor = FreshnessMonitor::new(Some(&remote), max_age(), true);

        let ways = store
            .elements()
            .run_query(&Query::of(ElementKind::Way), &mut NoHooks, &mut monitor)
            .unwrap();
        assert_eq!(ways[0].meta().version, Some(1));
        assert_eq!(monitor.failed(), 1);
    }

    #[test]
    fn test_member_pulled_by_earlier_refresh_is_not_fetched_again() {
        let store = SqliteStore::open_in_memory("osm_").unwrap();
        let doc = parse_osm_xml(
            r#"<osm>
                 <relation id="20" version="1"><member type="node" ref="5" role="stop"/></relation>
               </osm>"#,
        )
        .unwrap();
        Importer::new(store.elements())
            .synced_at(Utc::now() - max_age() * 2)
            .import(&doc)
            .unwrap();

        let remote = FakeRemote::new().with_element(
            ElementKind::Relation,
            20,
            r#"<osm>
                 <node id="5" lat="50.3" lon="7.3" version="4"/>
                 <relation id="20" version="2"><member type="node" ref="5" role="stop"/></relation>
               </osm>"#,
        );
        let mut monitor = FreshnessMonitor::new(Some(&remote), max_age(), true);

        let elements = store
            .elements()
            .run_query(&Query::all(), &mut NoHooks, &mut monitor)
            .unwrap();
        assert_eq!(remote.calls(), vec!["element relation/20 recurse=true"]);
        assert_eq!(monitor.refreshed(), 1);

        let node = elements
            .iter()
            .find(|e| e.kind() == ElementKind::Node)
            .unwrap();
        assert!(!node.is_stub());
        assert_eq!(node.meta().version, Some(4));
    }

    #[test]
    fn test_in_flight_element_reports_refreshing() {
        let remote = FakeRemote::new();
        let mut monitor = FreshnessMonitor::new(Some(&remote), max_age(), true);
        let stub = Element::stub(ElementKind::Node, 9);

        monitor.in_flight.insert(stub.key());
        assert_eq!(monitor.state(&stub, Utc::now()), Freshness::Refreshing);

        // A nested load of an in-flight element passes through
        let store = SqliteStore::open_in_memory("osm_").unwrap();
        let out = monitor.after_load(&store.elements(), stub.clone()).unwrap();
        assert_eq!(out, stub);
        assert_eq!(remote.call_count(), 0);
    }
}
