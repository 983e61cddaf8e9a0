//! Element command handlers

use anyhow::{anyhow, bail, Context, Result};

use osmcache_core::{ElementKind, Expr, Field, Mirror, Query};

use crate::output::Output;

/// Filters accepted by `find`
#[derive(Debug, Default)]
pub struct FindFilter {
    /// south,west,north,east
    pub bbox: Option<String>,
    /// key=value pairs
    pub tags: Vec<String>,
    pub user: Option<String>,
    pub limit: Option<usize>,
}

/// Show one element, refreshing it first if stale
pub fn show(
    mirror: &mut Mirror,
    kind: ElementKind,
    id: i64,
    members: bool,
    output: &Output,
) -> Result<()> {
    let mut session = mirror.session()?;
    let element = session
        .get(kind, id)?
        .ok_or_else(|| anyhow!("Element not found: {}/{}", kind, id))?;

    output.print_element(&element)?;
    if members {
        let members = session.members(&element)?;
        println!();
        output.print_elements(&members)?;
    }

    session.commit()?;
    Ok(())
}

/// Find elements of one kind
pub fn find(
    mirror: &mut Mirror,
    kind: ElementKind,
    filter: FindFilter,
    output: &Output,
) -> Result<()> {
    let query = build_query(kind, &filter)?;
    let elements = mirror.query(&query).context("Query failed")?;
    output.print_elements(&elements)
}

/// Mark an element stale
pub fn expire(mirror: &mut Mirror, kind: ElementKind, id: i64, output: &Output) -> Result<()> {
    if !mirror.expire(kind, id)? {
        bail!("Element not found: {}/{}", kind, id);
    }
    output.success(&format!("{}/{} will be refreshed on next read", kind, id));
    Ok(())
}

fn build_query(kind: ElementKind, filter: &FindFilter) -> Result<Query> {
    let mut conditions = Vec::new();

    if let Some(ref bbox) = filter.bbox {
        if kind != ElementKind::Node {
            bail!("--bbox only applies to nodes");
        }
        let [south, west, north, east] = parse_bbox(bbox)?;
        conditions.extend([
            Field::Latitude.ge(south),
            Field::Latitude.le(north),
            Field::Longitude.ge(west),
            Field::Longitude.le(east),
        ]);
    }

    for tag in &filter.tags {
        let (key, value) = parse_tag(tag)?;
        conditions.push(Field::tag(key).eq(value));
    }

    if let Some(ref user) = filter.user {
        conditions.push(Field::User.eq(user.as_str()));
    }

    let mut query = Query::of(kind);
    if !conditions.is_empty() {
        query = query.filter(Expr::and(conditions));
    }
    if let Some(limit) = filter.limit {
        query = query.limit(limit);
    }
    Ok(query)
}

/// Parse "south,west,north,east"
fn parse_bbox(s: &str) -> Result<[f64; 4]> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("Invalid bounding box '{}'", s))?;

    let [south, west, north, east]: [f64; 4] = parts
        .try_into()
        .map_err(|_| anyhow!("Bounding box needs four values: south,west,north,east"))?;

    if !(-90.0..=90.0).contains(&south) || !(-90.0..=90.0).contains(&north) {
        bail!("Latitude out of range in '{}'", s);
    }
    if !(-180.0..=180.0).contains(&west) || !(-180.0..=180.0).contains(&east) {
        bail!("Longitude out of range in '{}'", s);
    }
    if south > north || west > east {
        bail!("Empty bounding box '{}'", s);
    }
    Ok([south, west, north, east])
}

/// Parse "key=value"; the value may itself contain '='
fn parse_tag(s: &str) -> Result<(&str, &str)> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("Invalid tag filter '{}': expected key=value", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osmcache_core::Config;

    #[test]
    fn test_parse_bbox() {
        assert_eq!(
            parse_bbox("50.0, 7.0, 51.0, 7.5").unwrap(),
            [50.0, 7.0, 51.0, 7.5]
        );
        assert_eq!(
            parse_bbox("-34.1,-58.6,-34.5,-58.3").unwrap_err().to_string(),
            "Empty bounding box '-34.1,-58.6,-34.5,-58.3'"
        );
        assert!(parse_bbox("50,7,51").is_err());
        assert!(parse_bbox("50,7,91,8").is_err());
        assert!(parse_bbox("north,7,51,8").is_err());
    }

    #[test]
    fn test_parse_tag() {
        assert_eq!(parse_tag("amenity=cafe").unwrap(), ("amenity", "cafe"));
        assert_eq!(parse_tag("note=a=b").unwrap(), ("note", "a=b"));
        assert_eq!(parse_tag("name=").unwrap(), ("name", ""));
        assert!(parse_tag("amenity").is_err());
        assert!(parse_tag("=cafe").is_err());
    }

    #[test]
    fn test_build_query() {
        let filter = FindFilter {
            bbox: Some("50,7,51,7.5".into()),
            tags: vec!["amenity=cafe".into()],
            user: Some("alice".into()),
            limit: Some(10),
        };
        let query = build_query(ElementKind::Node, &filter).unwrap();
        assert_eq!(query.limit, Some(10));
        let Some(Expr::Bool { children, .. }) = &query.filter else {
            panic!("expected a conjunction");
        };
        assert_eq!(children.len(), 6);

        assert!(build_query(ElementKind::Way, &filter).is_err());
        assert!(build_query(ElementKind::Way, &FindFilter::default())
            .unwrap()
            .filter
            .is_none());
    }

    #[test]
    fn test_find_and_expire_offline() {
        let mut mirror = Mirror::open_in_memory(Config::default()).unwrap();
        mirror
            .import_xml(
                r#"<osm>
                     <node id="1" lat="50.73" lon="7.10"><tag k="amenity" v="cafe"/></node>
                     <node id="2" lat="50.74" lon="7.11"/>
                   </osm>"#,
            )
            .unwrap();

        let filter = FindFilter {
            tags: vec!["amenity=cafe".into()],
            ..FindFilter::default()
        };
        let query = build_query(ElementKind::Node, &filter).unwrap();
        let found = mirror.query(&query).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), 1);

        let output = Output::new(crate::output::OutputFormat::Quiet);
        expire(&mut mirror, ElementKind::Node, 2, &output).unwrap();
        assert_eq!(mirror.stale_count().unwrap(), 1);
        assert!(expire(&mut mirror, ElementKind::Node, 3, &output).is_err());
    }
}
