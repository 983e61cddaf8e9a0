//! Query predicate analyzer
//!
//! Reduces the filter of an outgoing query to a canonical predicate per
//! targeted element kind, written in prefix form:
//!
//! ```text
//! (&&, (>=, latitude, 50.0), (<=, longitude, 7.2))
//! ```
//!
//! Only `field op literal` comparisons with `==, !=, <, >, <=, >=` and
//! `&&`/`||` combinators are understood. Anything else is dropped from
//! its branch, never reported as an error. A combinator keeps the children
//! that survived.
//!
//! Dropping a child of `&&` widens the predicate, which is harmless for
//! scoping a fetch. Dropping a child of `||` narrows it, so such results
//! are flagged with [`ScopedPredicate::lossy_disjunction`].

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::models::ElementKind;
use crate::query::{BoolOp, CompareOp, Expr, Field, FieldRef, Operand, Query, Value};

/// Canonical predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        op: CompareOp,
        field: Field,
        value: Value,
    },
    Combine {
        op: BoolOp,
        children: Vec<Predicate>,
    },
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { op, field, value } => {
                write!(f, "({}, {}, {})", op.symbol(), field, value)
            }
            Predicate::Combine { op, children } => {
                write!(f, "({}", op.symbol())?;
                for child in children {
                    write!(f, ", {}", child)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// The predicate usable for one element kind
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedPredicate {
    pub predicate: Predicate,
    /// A branch of some `||` was dropped; the predicate may miss matches
    pub lossy_disjunction: bool,
}

/// Result of analyzing one query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    scopes: BTreeMap<ElementKind, ScopedPredicate>,
}

impl Analysis {
    pub fn get(&self, kind: ElementKind) -> Option<&ScopedPredicate> {
        self.scopes.get(&kind)
    }

    /// Kinds with a usable predicate, in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (ElementKind, &ScopedPredicate)> {
        self.scopes.iter().map(|(kind, scoped)| (*kind, scoped))
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Analyze `query` unless this instance was analyzed before
///
/// Returns `None` when the query was already analyzed, targets no element
/// kind, or has no filter. Kinds for which nothing usable remains are
/// absent from the analysis.
pub fn analyze(query: &Query) -> Option<Analysis> {
    if !query.mark_analyzed() {
        return None;
    }

    let kinds = query.targeted_kinds();
    if kinds.is_empty() {
        debug!("Query targets no element kind, skipping analysis");
        return None;
    }

    let Some(filter) = &query.filter else {
        debug!("Unfiltered query, skipping analysis");
        return None;
    };

    let mut scopes = BTreeMap::new();
    for kind in kinds {
        let mut walk = Walk { kind, lossy: false };
        match walk.expr(filter) {
            Some(predicate) => {
                debug!("Analyzed {} predicate: {}", kind, predicate);
                scopes.insert(
                    kind,
                    ScopedPredicate {
                        predicate,
                        lossy_disjunction: walk.lossy,
                    },
                );
            }
            None => debug!("Nothing usable in filter for {}", kind),
        }
    }

    Some(Analysis { scopes })
}

struct Walk {
    kind: ElementKind,
    lossy: bool,
}

impl Walk {
    fn expr(&mut self, expr: &Expr) -> Option<Predicate> {
        match expr {
            Expr::Compare { left, op, right } => self.compare(left, *op, right),
            Expr::Bool { op, children } => {
                let kept: Vec<Predicate> = children.iter().filter_map(|c| self.expr(c)).collect();
                if *op == BoolOp::Or && kept.len() < children.len() {
                    self.lossy = true;
                }
                if kept.is_empty() {
                    None
                } else {
                    Some(Predicate::Combine {
                        op: *op,
                        children: kept,
                    })
                }
            }
            Expr::Not(_) => None,
        }
    }

    fn compare(&self, left: &Operand, op: CompareOp, right: &Operand) -> Option<Predicate> {
        if op == CompareOp::Like {
            return None;
        }

        let Operand::Column(FieldRef { kind, field }) = left else {
            return None;
        };
        if kind.is_some_and(|k| k != self.kind) || !field.applies_to(self.kind) {
            return None;
        }

        let Operand::Literal(value) = right else {
            return None;
        };

        Some(Predicate::Compare {
            op,
            field: field.clone(),
            value: value.clone(),
        })
    }
}
