//! Feed documents
//!
//! A feed document is the batch of elements handed to the importer, both
//! for bulk imports from a file and for the single-element answers of the
//! remote service. The only wire format is OSM XML:
//!
//! ```text
//! <osm>
//!   <node id="1" lat="50.75" lon="7.11" version="3" user="alice" .../>
//!   <way id="2"><nd ref="1"/><nd ref="1"/><tag k="highway" v="path"/></way>
//!   <relation id="3"><member type="way" ref="2" role="outer"/></relation>
//! </osm>
//! ```
//!
//! Parsing only checks syntax and attribute types. Referential checks
//! (way nodes must exist, nodes must carry coordinates) belong to the importer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{MirrorError, MirrorResult};
use crate::models::{Element, ElementKey, ElementKind, Member, Node, Relation, Way};

/// An ordered batch of elements
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedDocument {
    /// Elements in document order
    pub elements: Vec<Element>,
    /// Free-text remark attached by the producer (Overpass uses it for errors)
    pub remark: Option<String>,
}

impl FeedDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_elements(elements: Vec<Element>) -> Self {
        Self {
            elements,
            remark: None,
        }
    }

    pub fn push(&mut self, element: impl Into<Element>) {
        self.elements.push(element.into());
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Find an element of the batch by key
    pub fn get(&self, key: ElementKey) -> Option<&Element> {
        self.elements.iter().find(|e| e.key() == key)
    }
}

/// Parse an OSM XML document
pub fn parse_osm_xml(xml: &str) -> MirrorResult<FeedDocument> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut parser = FeedParser::default();

    loop {
        let event = reader.read_event().map_err(|e| {
            MirrorError::malformed(format!(
                "XML error at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Start(e) => parser.open(&e, false)?,
            Event::Empty(e) => parser.open(&e, true)?,
            Event::End(e) => parser.close(e.name().as_ref()),
            Event::Text(text) if parser.in_remark => {
                let text = text
                    .unescape()
                    .map_err(|e| MirrorError::malformed(format!("bad remark text: {}", e)))?;
                parser.remark.get_or_insert_with(String::new).push_str(&text);
            }
            Event::Eof => break,
            _ => (),
        }
    }

    parser.finish()
}

#[derive(Default)]
struct FeedParser {
    elements: Vec<Element>,
    /// Element whose children are currently being read
    current: Option<Element>,
    seen_root: bool,
    in_remark: bool,
    remark: Option<String>,
}

impl FeedParser {
    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> MirrorResult<()> {
        if !self.seen_root {
            return self.open_root(e.name().as_ref());
        }
        match e.name().as_ref() {
            b"node" => self.open_element(ElementKind::Node, e, empty),
            b"way" => self.open_element(ElementKind::Way, e, empty),
            b"relation" => self.open_element(ElementKind::Relation, e, empty),
            b"tag" => self.add_tag(e),
            b"nd" => self.add_way_node(e),
            b"member" => self.add_member(e),
            b"remark" => {
                self.in_remark = !empty;
                Ok(())
            }
            // bounds, meta, note, ...
            _ => Ok(()),
        }
    }

    fn open_root(&mut self, name: &[u8]) -> MirrorResult<()> {
        if name != b"osm" {
            return Err(MirrorError::malformed(format!(
                "expected <osm> root element, found <{}>",
                String::from_utf8_lossy(name)
            )));
        }
        self.seen_root = true;
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"node" | b"way" | b"relation" => {
                if let Some(element) = self.current.take() {
                    self.elements.push(element);
                }
            }
            b"remark" => self.in_remark = false,
            _ => (),
        }
    }

    fn finish(self) -> MirrorResult<FeedDocument> {
        if !self.seen_root {
            return Err(MirrorError::malformed("document has no <osm> root element"));
        }
        if let Some(open) = self.current {
            return Err(MirrorError::malformed(format!(
                "document ended inside {}",
                open.key()
            )));
        }
        Ok(FeedDocument {
            elements: self.elements,
            remark: self.remark.map(|r| r.trim().to_string()),
        })
    }

    fn open_element(
        &mut self,
        kind: ElementKind,
        e: &BytesStart<'_>,
        empty: bool,
    ) -> MirrorResult<()> {
        if let Some(open) = &self.current {
            return Err(MirrorError::malformed(format!(
                "{} nested inside {}",
                kind,
                open.key()
            )));
        }

        let attrs = attributes(e)?;
        let element = element_from_attrs(kind, &attrs)?;
        if empty {
            self.elements.push(element);
        } else {
            self.current = Some(element);
        }
        Ok(())
    }

    fn add_tag(&mut self, e: &BytesStart<'_>) -> MirrorResult<()> {
        // Tags outside an element (e.g. changeset tags) carry nothing for us
        let Some(current) = self.current.as_mut() else {
            return Ok(());
        };
        let attrs = attributes(e)?;
        let key = current.key();
        let k = required(&attrs, "k", key)?;
        let v = attrs.get("v").cloned().unwrap_or_default();
        // Later duplicates win, keeping keys unique
        current.meta_mut().tags.insert(k.to_string(), v);
        Ok(())
    }

    fn add_way_node(&mut self, e: &BytesStart<'_>) -> MirrorResult<()> {
        let Some(Element::Way(way)) = self.current.as_mut() else {
            return Ok(());
        };
        let attrs = attributes(e)?;
        let key = ElementKey::new(ElementKind::Way, way.meta.id);
        let node_ref = parse_i64(required(&attrs, "ref", key)?, "nd ref", key)?;
        way.nodes.push(node_ref);
        Ok(())
    }

    fn add_member(&mut self, e: &BytesStart<'_>) -> MirrorResult<()> {
        let Some(Element::Relation(relation)) = self.current.as_mut() else {
            return Ok(());
        };
        let attrs = attributes(e)?;
        let key = ElementKey::new(ElementKind::Relation, relation.meta.id);
        let kind = required(&attrs, "type", key)?
            .parse::<ElementKind>()
            .map_err(|reason| MirrorError::malformed(format!("{}: member {}", key, reason)))?;
        let member_ref = parse_i64(required(&attrs, "ref", key)?, "member ref", key)?;
        let role = attrs.get("role").cloned().unwrap_or_default();
        relation.members.push(Member::new(kind, member_ref, role));
        Ok(())
    }
}

/// Collect the attributes of a start tag, unescaped
fn attributes(e: &BytesStart<'_>) -> MirrorResult<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| MirrorError::malformed(format!("bad attribute: {}", err)))?;
        let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| MirrorError::malformed(format!("bad value for '{}': {}", name, err)))?
            .into_owned();
        map.insert(name, value);
    }
    Ok(map)
}

fn element_from_attrs(
    kind: ElementKind,
    attrs: &BTreeMap<String, String>,
) -> MirrorResult<Element> {
    let raw_id = attrs
        .get("id")
        .ok_or_else(|| MirrorError::malformed(format!("{} without id", kind)))?;
    let id: i64 = raw_id
        .trim()
        .parse()
        .map_err(|_| MirrorError::malformed(format!("{} with invalid id '{}'", kind, raw_id)))?;
    let key = ElementKey::new(kind, id);

    let mut element = match kind {
        ElementKind::Node => Element::Node(Node {
            meta: Default::default(),
            latitude: optional_f64(attrs, "lat", key)?,
            longitude: optional_f64(attrs, "lon", key)?,
        }),
        ElementKind::Way => Element::Way(Way::new(id)),
        ElementKind::Relation => Element::Relation(Relation::new(id)),
    };

    let meta = element.meta_mut();
    meta.id = id;
    meta.version = optional_i64(attrs, "version", key)?;
    meta.changeset = optional_i64(attrs, "changeset", key)?;
    meta.user = attrs.get("user").cloned();
    meta.uid = optional_i64(attrs, "uid", key)?;
    meta.visible = attrs.get("visible").map(|v| v == "true");
    meta.timestamp = match attrs.get("timestamp") {
        Some(raw) => Some(parse_timestamp(raw, key)?),
        None => None,
    };

    Ok(element)
}

fn required<'a>(
    attrs: &'a BTreeMap<String, String>,
    name: &str,
    key: ElementKey,
) -> MirrorResult<&'a str> {
    attrs
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| MirrorError::malformed(format!("{}: child without '{}'", key, name)))
}

fn parse_i64(raw: &str, what: &str, key: ElementKey) -> MirrorResult<i64> {
    raw.trim()
        .parse()
        .map_err(|_| MirrorError::malformed(format!("{}: invalid {} '{}'", key, what, raw)))
}

fn optional_i64(
    attrs: &BTreeMap<String, String>,
    name: &str,
    key: ElementKey,
) -> MirrorResult<Option<i64>> {
    attrs
        .get(name)
        .map(|raw| parse_i64(raw, name, key))
        .transpose()
}

fn optional_f64(
    attrs: &BTreeMap<String, String>,
    name: &str,
    key: ElementKey,
) -> MirrorResult<Option<f64>> {
    attrs
        .get(name)
        .map(|raw| {
            raw.trim().parse::<f64>().map_err(|_| {
                MirrorError::malformed(format!("{}: invalid {} '{}'", key, name, raw))
            })
        })
        .transpose()
}

fn parse_timestamp(raw: &str, key: ElementKey) -> MirrorResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| MirrorError::malformed(format!("{}: invalid timestamp '{}'", key, raw)))
}
