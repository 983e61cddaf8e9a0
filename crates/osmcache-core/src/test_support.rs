//! Test helpers shared across modules

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::RemoteError;
use crate::feed::{parse_osm_xml, FeedDocument};
use crate::models::{ElementKey, ElementKind};
use crate::remote::{RemoteSource, Scope};

/// Remote source serving canned documents and recording every call
#[derive(Default)]
pub struct FakeRemote {
    elements: HashMap<ElementKey, FeedDocument>,
    scoped: Option<FeedDocument>,
    failing: Cell<bool>,
    calls: RefCell<Vec<String>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer point fetches of `kind/id` with `xml`
    pub fn with_element(mut self, kind: ElementKind, id: i64, xml: &str) -> Self {
        let doc = parse_osm_xml(xml).expect("fixture XML must parse");
        self.elements.insert(ElementKey::new(kind, id), doc);
        self
    }

    /// Answer every scoped fetch with `xml`
    pub fn with_scoped(mut self, xml: &str) -> Self {
        self.scoped = Some(parse_osm_xml(xml).expect("fixture XML must parse"));
        self
    }

    /// Fail every call from now on
    pub fn fail(&self) {
        self.failing.set(true);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl RemoteSource for FakeRemote {
    fn fetch_element(
        &self,
        kind: ElementKind,
        id: i64,
        recurse: bool,
    ) -> Result<FeedDocument, RemoteError> {
        let key = ElementKey::new(kind, id);
        self.calls
            .borrow_mut()
            .push(format!("element {} recurse={}", key, recurse));

        if self.failing.get() {
            return Err(RemoteError::Unavailable("connection refused".into()));
        }
        Ok(self.elements.get(&key).cloned().unwrap_or_default())
    }

    fn fetch_scoped(&self, scope: &Scope) -> Result<FeedDocument, RemoteError> {
        self.calls
            .borrow_mut()
            .push(format!("scoped {}", scope.to_overpass_ql(1)));

        if self.failing.get() {
            return Err(RemoteError::Timeout {
                after: Duration::from_secs(1),
            });
        }
        Ok(self.scoped.clone().unwrap_or_default())
    }
}
