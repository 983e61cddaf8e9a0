//! Read/write sessions
//!
//! A [`Session`] is one transaction plus the interceptors that belong to
//! it: the scoped prefetch run before each query and the freshness
//! monitor run after each load. Both live exactly as long as the session,
//! so nothing about one request leaks into the next.
//!
//! Dropping a session without [`Session::commit`] rolls everything back,
//! refreshed elements included.

use rusqlite::Transaction;
use tracing::{debug, warn};

use crate::analyzer::analyze;
use crate::config::Config;
use crate::error::MirrorResult;
use crate::feed::FeedDocument;
use crate::freshness::FreshnessMonitor;
use crate::importer::{ImportStats, Importer};
use crate::models::{Element, ElementKey, ElementKind};
use crate::query::Query;
use crate::remote::{plan, RemoteSource};
use crate::storage::{ElementStore, LoadListener, QueryInspector, Tables};

/// Query inspector that pulls matching elements from the remote service
pub struct ScopedPrefetch<'r> {
    remote: Option<&'r dyn RemoteSource>,
    imported: usize,
}

impl<'r> ScopedPrefetch<'r> {
    pub fn new(remote: Option<&'r dyn RemoteSource>) -> Self {
        Self {
            remote,
            imported: 0,
        }
    }

    /// Records imported by scoped fetches so far
    pub fn imported(&self) -> usize {
        self.imported
    }
}

impl QueryInspector for ScopedPrefetch<'_> {
    fn before_query(&mut self, store: &ElementStore<'_>, query: &Query) -> MirrorResult<()> {
        let Some(analysis) = analyze(query) else {
            return Ok(());
        };
        let Some(remote) = self.remote else {
            return Ok(());
        };

        for (kind, scoped) in analysis.iter() {
            let Some(scope) = plan(kind, scoped) else {
                debug!("No scoped fetch for {}: {}", kind, scoped.predicate);
                continue;
            };

            let doc = match remote.fetch_scoped(&scope) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("Scoped fetch of {}s failed, using local data: {}", kind, e);
                    continue;
                }
            };
            match Importer::new(*store).import(&doc) {
                Ok(stats) => self.imported += stats.total(),
                Err(e) => warn!("Could not merge scoped fetch of {}s: {}", kind, e),
            }
        }
        Ok(())
    }
}

/// One transaction over the mirror
pub struct Session<'m> {
    tx: Transaction<'m>,
    tables: &'m Tables,
    remote: Option<&'m dyn RemoteSource>,
    recursive: bool,
    prefetch: ScopedPrefetch<'m>,
    monitor: FreshnessMonitor<'m>,
}

impl<'m> Session<'m> {
    pub(crate) fn new(
        tx: Transaction<'m>,
        tables: &'m Tables,
        remote: Option<&'m dyn RemoteSource>,
        config: &Config,
    ) -> Self {
        Self {
            tx,
            tables,
            remote,
            recursive: config.recursive_refresh,
            prefetch: ScopedPrefetch::new(remote),
            monitor: FreshnessMonitor::new(remote, config.max_age(), config.recursive_refresh),
        }
    }

    /// Element access inside this session's transaction, without interceptors
    pub fn elements(&self) -> ElementStore<'_> {
        ElementStore::new(&self.tx, self.tables)
    }

    /// Run a query through the prefetch and freshness interceptors
    pub fn query(&mut self, query: &Query) -> MirrorResult<Vec<Element>> {
        let store = ElementStore::new(&self.tx, self.tables);
        store.run_query(query, &mut self.prefetch, &mut self.monitor)
    }

    /// Load one element, refreshing it if stale
    ///
    /// An element missing locally is fetched from the remote service when
    /// one is configured.
    pub fn get(&mut self, kind: ElementKind, id: i64) -> MirrorResult<Option<Element>> {
        let store = ElementStore::new(&self.tx, self.tables);
        match store.load(kind, id)? {
            Some(element) => Ok(Some(self.monitor.after_load(&store, element)?)),
            None => self.fetch_missing(&store, ElementKey::new(kind, id)),
        }
    }

    /// Way nodes or relation members of `element`, in order
    ///
    /// Members may be stubs. Elements that cannot be found are skipped.
    pub fn members(&mut self, element: &Element) -> MirrorResult<Vec<Element>> {
        let mut members = Vec::new();
        for key in element.child_keys() {
            match self.get(key.kind, key.id)? {
                Some(member) => members.push(member),
                None => debug!("Member {} of {} not available", key, element.key()),
            }
        }
        Ok(members)
    }

    /// Write a locally built element
    pub fn save(&mut self, element: &Element) -> MirrorResult<ImportStats> {
        self.import(&FeedDocument::from_elements(vec![element.clone()]))
    }

    /// Merge a document into this session's transaction
    pub fn import(&mut self, doc: &FeedDocument) -> MirrorResult<ImportStats> {
        Importer::new(self.elements()).import(doc)
    }

    /// Mark one element as never synced so its next read refreshes it
    pub fn expire(&mut self, kind: ElementKind, id: i64) -> MirrorResult<bool> {
        self.elements().set_synced_at(kind, id, None)
    }

    /// Elements refreshed by the freshness monitor in this session
    pub fn refreshed(&self) -> usize {
        self.monitor.refreshed()
    }

    /// Records imported by scoped prefetches in this session
    pub fn prefetched(&self) -> usize {
        self.prefetch.imported()
    }

    pub fn commit(self) -> MirrorResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    fn fetch_missing(
        &self,
        store: &ElementStore<'_>,
        key: ElementKey,
    ) -> MirrorResult<Option<Element>> {
        let Some(remote) = self.remote else {
            return Ok(None);
        };

        let recurse = self.recursive && key.kind != ElementKind::Node;
        let doc = match remote.fetch_element(key.kind, key.id, recurse) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Could not fetch {}: {}", key, e);
                return Ok(None);
            }
        };
        if doc.get(key).is_none() {
            return Ok(None);
        }

        if let Err(e) = Importer::new(*store).import(&doc) {
            warn!("Could not merge fetched {}: {}", key, e);
            return Ok(None);
        }
        store.load(key.kind, key.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::Mirror;
    use crate::query::{Expr, Field};
    use crate::test_support::FakeRemote;
    use std::rc::Rc;

    const LOCAL: &str = r#"<osm>
      <node id="1" lat="50.73" lon="7.10" version="1"/>
      <node id="2" lat="52.52" lon="13.40" version="1"/>
    </osm>"#;

    const AREA: &str = r#"<osm>
      <node id="1" lat="50.73" lon="7.10" version="3"/>
      <node id="5" lat="50.70" lon="7.05" version="1"><tag k="amenity" v="cafe"/></node>
    </osm>"#;

    fn mirror(remote: &Rc<FakeRemote>) -> Mirror {
        let mut mirror = Mirror::open_in_memory(Config::default())
            .unwrap()
            .with_remote(Rc::clone(remote));
        mirror.import_xml(LOCAL).unwrap();
        mirror
    }

    fn around_bonn() -> Query {
        Query::of(ElementKind::Node).filter(Expr::and(vec![
            Field::Latitude.ge(50.0),
            Field::Latitude.le(51.0),
            Field::Longitude.ge(7.0),
            Field::Longitude.le(7.5),
        ]))
    }

    #[test]
    fn test_query_prefetches_scope() {
        let remote = Rc::new(FakeRemote::new().with_scoped(AREA));
        let mut mirror = mirror(&remote);

        let mut session = mirror.session().unwrap();
        let found = session.query(&around_bonn()).unwrap();
        let ids: Vec<i64> = found.iter().map(Element::id).collect();
        assert_eq!(ids, vec![1, 5]);
        assert_eq!(found[0].meta().version, Some(3));
        assert_eq!(session.prefetched(), 2);
        assert_eq!(session.refreshed(), 0);
        session.commit().unwrap();

        assert_eq!(
            remote.calls(),
            vec!["scoped [out:xml][timeout:1];(node(50.0,7.0,51.0,7.5););out meta;"]
        );
        assert_eq!(mirror.counts().unwrap().nodes, 3);
    }

    #[test]
    fn test_query_instance_is_analyzed_once() {
        let remote = Rc::new(FakeRemote::new().with_scoped(AREA));
        let mut mirror = mirror(&remote);
        let query = around_bonn();

        let mut session = mirror.session().unwrap();
        session.query(&query).unwrap();
        session.query(&query).unwrap();
        // A clone is a new query
        session.query(&query.clone()).unwrap();
        assert_eq!(remote.call_count(), 2);
    }

    #[test]
    fn test_unscoped_query_skips_prefetch() {
        let remote = Rc::new(FakeRemote::new().with_scoped(AREA));
        let mut mirror = mirror(&remote);

        let mut session = mirror.session().unwrap();
        let all = session.query(&Query::of(ElementKind::Node)).unwrap();
        assert_eq!(all.len(), 2);
        let northern = Query::of(ElementKind::Node).filter(Field::Latitude.ge(51.0));
        assert_eq!(session.query(&northern).unwrap().len(), 1);
        // A tag alone would match planet-wide
        let cafes = Query::of(ElementKind::Node).filter(Field::tag("amenity").eq("cafe"));
        assert!(session.query(&cafes).unwrap().is_empty());
        assert_eq!(remote.call_count(), 0);
    }

    #[test]
    fn test_prefetch_failure_serves_local_rows() {
        let remote = Rc::new(FakeRemote::new().with_scoped(AREA));
        remote.fail();
        let mut mirror = mirror(&remote);

        let mut session = mirror.session().unwrap();
        let found = session.query(&around_bonn()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].meta().version, Some(1));
        assert_eq!(session.prefetched(), 0);
    }

    #[test]
    fn test_get_fetches_missing_element() {
        let remote = Rc::new(FakeRemote::new().with_element(
            ElementKind::Node,
            7,
            r#"<osm><node id="7" lat="1.5" lon="2.5" version="4"/></osm>"#,
        ));
        let mut mirror = mirror(&remote);

        let mut session = mirror.session().unwrap();
        let node = session.get(ElementKind::Node, 7).unwrap().unwrap();
        assert_eq!(node.meta().version, Some(4));
        assert!(session.get(ElementKind::Node, 8).unwrap().is_none());
        session.commit().unwrap();

        assert_eq!(
            remote.calls(),
            vec!["element node/7 recurse=false", "element node/8 recurse=false"]
        );
        assert!(mirror.offline().get(ElementKind::Node, 7).unwrap().is_some());
    }

    #[test]
    fn test_drop_rolls_back() {
        let remote = Rc::new(FakeRemote::new());
        let mut mirror = mirror(&remote);

        {
            let mut session = mirror.session().unwrap();
            session
                .import(&crate::feed::parse_osm_xml(r#"<osm><node id="9" lat="0" lon="0"/></osm>"#).unwrap())
                .unwrap();
            assert!(session.elements().load(ElementKind::Node, 9).unwrap().is_some());
            assert!(session.expire(ElementKind::Node, 1).unwrap());
        }

        assert_eq!(mirror.counts().unwrap().nodes, 2);
        assert_eq!(mirror.stale_count().unwrap(), 0);
    }

    #[test]
    fn test_members_in_order() {
        let remote = Rc::new(FakeRemote::new());
        let mut mirror = mirror(&remote);
        mirror
            .import_xml(
                r#"<osm><way id="3"><nd ref="2"/><nd ref="1"/><nd ref="2"/></way>
                   <relation id="4"><member type="way" ref="3" role=""/>
                   <member type="relation" ref="40" role="sub"/></relation></osm>"#,
            )
            .unwrap();
        let mut mirror = mirror.offline();

        let mut session = mirror.session().unwrap();
        let way = session.get(ElementKind::Way, 3).unwrap().unwrap();
        let ids: Vec<i64> = session.members(&way).unwrap().iter().map(Element::id).collect();
        assert_eq!(ids, vec![2, 1, 2]);

        let relation = session.get(ElementKind::Relation, 4).unwrap().unwrap();
        let members = session.members(&relation).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members[1].is_stub());
    }

    #[test]
    fn test_save_local_element() {
        let remote = Rc::new(FakeRemote::new());
        let mut mirror = mirror(&remote).offline();

        let mut session = mirror.session().unwrap();
        let mut node = session.get(ElementKind::Node, 1).unwrap().unwrap();
        node.meta_mut().tags.insert("name".into(), "Bonn".into());
        session.save(&node).unwrap();
        session.commit().unwrap();

        let node = mirror.get(ElementKind::Node, 1).unwrap().unwrap();
        assert_eq!(node.tags().get("name").map(String::as_str), Some("Bonn"));
    }
}
