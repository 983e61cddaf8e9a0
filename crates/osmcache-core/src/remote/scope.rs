//! Scoped remote fetches
//!
//! Translates an analyzed predicate into an Overpass union of filtered
//! statements, so a query can pull just the matching elements before it
//! runs locally.
//!
//! Translation errs on the side of fetching more. Under `&&`, a child
//! that cannot be expressed is dropped, which only widens the result.
//! Under `||`, every child must translate, since dropping one would miss
//! matches. A plan is declined outright when a branch would pull an
//! unbounded part of the dataset.

use std::fmt::Write as _;

use super::overpass::RECURSE_DOWN;
use crate::analyzer::{Predicate, ScopedPredicate};
use crate::models::ElementKind;
use crate::query::{BoolOp, CompareOp, Field, Value};

/// Upper limit on union branches after distributing `&&` over `||`
pub const MAX_BRANCHES: usize = 32;

/// Coordinate bounds; missing sides are open
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub south: Option<f64>,
    pub west: Option<f64>,
    pub north: Option<f64>,
    pub east: Option<f64>,
}

impl Bounds {
    fn is_set(&self) -> bool {
        self.south.is_some() || self.west.is_some() || self.north.is_some() || self.east.is_some()
    }

    /// All four sides are given
    fn is_closed(&self) -> bool {
        self.south.is_some() && self.west.is_some() && self.north.is_some() && self.east.is_some()
    }

    fn is_empty(&self) -> bool {
        matches!((self.south, self.north), (Some(s), Some(n)) if s > n)
            || matches!((self.west, self.east), (Some(w), Some(e)) if w > e)
    }

    fn intersect(&mut self, other: &Bounds) {
        self.south = tighter(self.south, other.south, f64::max);
        self.west = tighter(self.west, other.west, f64::max);
        self.north = tighter(self.north, other.north, f64::min);
        self.east = tighter(self.east, other.east, f64::min);
    }
}

fn tighter(a: Option<f64>, b: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, b) => a.or(b),
    }
}

/// One Overpass filter
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Id(i64),
    User(String),
    Uid(i64),
    TagEquals(String, String),
    TagNotEquals(String, String),
}

impl Clause {
    /// Whether this clause alone keeps the result small; attribute filters
    /// still match planet-wide
    fn is_bounding(&self) -> bool {
        matches!(self, Clause::Id(_))
    }
}

/// One statement of the union: all clauses must hold
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Branch {
    pub clauses: Vec<Clause>,
    pub bounds: Bounds,
}

impl Branch {
    fn merge(&self, other: &Branch) -> Branch {
        let mut merged = self.clone();
        merged.clauses.extend(other.clauses.iter().cloned());
        merged.bounds.intersect(&other.bounds);
        merged
    }

    fn is_bounded(&self) -> bool {
        self.bounds.is_closed() || self.clauses.iter().any(Clause::is_bounding)
    }
}

/// A remote fetch restricted to elements of one kind matching any branch
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub kind: ElementKind,
    pub branches: Vec<Branch>,
}

impl Scope {
    /// Overpass QL for this scope; ways and relations also pull their children
    pub fn to_overpass_ql(&self, timeout_secs: u64) -> String {
        let mut ql = format!("[out:xml][timeout:{}];(", timeout_secs);
        for branch in &self.branches {
            ql.push_str(self.kind.as_str());
            for clause in &branch.clauses {
                write_clause(&mut ql, clause);
            }
            if branch.bounds.is_set() {
                let b = branch.bounds;
                let _ = write!(
                    ql,
                    "({:?},{:?},{:?},{:?})",
                    b.south.unwrap_or(-90.0),
                    b.west.unwrap_or(-180.0),
                    b.north.unwrap_or(90.0),
                    b.east.unwrap_or(180.0)
                );
            }
            ql.push(';');
        }
        ql.push_str(");");
        if self.kind != ElementKind::Node {
            ql.push_str(RECURSE_DOWN);
        }
        ql.push_str("out meta;");
        ql
    }
}

fn write_clause(ql: &mut String, clause: &Clause) {
    let _ = match clause {
        Clause::Id(id) => write!(ql, "(id:{})", id),
        Clause::User(name) => write!(ql, "(user:\"{}\")", escape(name)),
        Clause::Uid(uid) => write!(ql, "(uid:{})", uid),
        Clause::TagEquals(k, v) => write!(ql, "[\"{}\"=\"{}\"]", escape(k), escape(v)),
        Clause::TagNotEquals(k, v) => write!(ql, "[\"{}\"!=\"{}\"]", escape(k), escape(v)),
    };
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Plan a scoped fetch for `kind`, or decline
pub fn plan(kind: ElementKind, scoped: &ScopedPredicate) -> Option<Scope> {
    if scoped.lossy_disjunction {
        return None;
    }

    let branches: Vec<Branch> = translate(&scoped.predicate)?
        .into_iter()
        .filter(|b| !b.bounds.is_empty())
        .collect();

    if branches.is_empty() || !branches.iter().all(Branch::is_bounded) {
        return None;
    }

    Some(Scope { kind, branches })
}

/// Disjunctive normal form of `predicate`; `None` if it cannot be expressed
fn translate(predicate: &Predicate) -> Option<Vec<Branch>> {
    match predicate {
        Predicate::Compare { op, field, value } => translate_compare(*op, field, value),
        Predicate::Combine {
            op: BoolOp::Or,
            children,
        } => {
            let mut branches = Vec::new();
            for child in children {
                branches.extend(translate(child)?);
            }
            (branches.len() <= MAX_BRANCHES).then_some(branches)
        }
        Predicate::Combine {
            op: BoolOp::And,
            children,
        } => {
            let mut branches = vec![Branch::default()];
            let mut translated_any = false;
            for child in children {
                let Some(alternatives) = translate(child) else {
                    continue;
                };
                if branches.len() * alternatives.len() > MAX_BRANCHES {
                    continue;
                }
                branches = branches
                    .iter()
                    .flat_map(|b| alternatives.iter().map(move |a| b.merge(a)))
                    .collect();
                translated_any = true;
            }
            translated_any.then_some(branches)
        }
    }
}

fn translate_compare(op: CompareOp, field: &Field, value: &Value) -> Option<Vec<Branch>> {
    let mut branch = Branch::default();
    match (field, op, value) {
        (Field::Id, CompareOp::Eq, Value::Int(id)) => branch.clauses.push(Clause::Id(*id)),
        (Field::User, CompareOp::Eq, Value::Text(name)) => {
            branch.clauses.push(Clause::User(name.clone()))
        }
        (Field::Uid, CompareOp::Eq, Value::Int(uid)) => branch.clauses.push(Clause::Uid(*uid)),
        (Field::Tag(key), CompareOp::Eq, Value::Text(v)) => {
            branch.clauses.push(Clause::TagEquals(key.clone(), v.clone()))
        }
        (Field::Tag(key), CompareOp::Ne, Value::Text(v)) => {
            branch.clauses.push(Clause::TagNotEquals(key.clone(), v.clone()))
        }
        (Field::Latitude, op, value) => {
            let v = coordinate(value)?;
            let (low, high) = bound_sides(op, v)?;
            branch.bounds.south = low;
            branch.bounds.north = high;
        }
        (Field::Longitude, op, value) => {
            let v = coordinate(value)?;
            let (low, high) = bound_sides(op, v)?;
            branch.bounds.west = low;
            branch.bounds.east = high;
        }
        _ => return None,
    }
    Some(vec![branch])
}

fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Float(v) if v.is_finite() => Some(*v),
        Value::Int(v) => Some(*v as f64),
        _ => None,
    }
}

/// Lower and upper bound implied by `field op v`; strict bounds widen to inclusive
fn bound_sides(op: CompareOp, v: f64) -> Option<(Option<f64>, Option<f64>)> {
    match op {
        CompareOp::Ge | CompareOp::Gt => Some((Some(v), None)),
        CompareOp::Le | CompareOp::Lt => Some((None, Some(v))),
        CompareOp::Eq => Some((Some(v), Some(v))),
        _ => None,
    }
}
