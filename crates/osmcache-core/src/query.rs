//! Filtered element queries
//!
//! A [`Query`] names the element kinds it returns and an optional filter
//! expression. The store compiles every expression shape to SQL; the
//! analyzer only understands a subset (see [`crate::analyzer`]).
//!
//! ```
//! use osmcache_core::query::{Expr, Field, Query};
//! use osmcache_core::ElementKind;
//!
//! let query = Query::of(ElementKind::Node).filter(Expr::and(vec![
//!     Field::Latitude.ge(50.0),
//!     Field::Longitude.le(7.2),
//! ]));
//! assert_eq!(query.targeted_kinds(), vec![ElementKind::Node]);
//! ```

use std::cell::Cell;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::models::ElementKind;

/// A filterable element attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    Version,
    Changeset,
    User,
    Uid,
    Visible,
    Timestamp,
    Latitude,
    Longitude,
    /// Value of the tag with this key
    Tag(String),
}

impl Field {
    /// Name used in canonical predicates
    pub fn name(&self) -> String {
        match self {
            Field::Id => "id".into(),
            Field::Version => "version".into(),
            Field::Changeset => "changeset".into(),
            Field::User => "user".into(),
            Field::Uid => "uid".into(),
            Field::Visible => "visible".into(),
            Field::Timestamp => "timestamp".into(),
            Field::Latitude => "latitude".into(),
            Field::Longitude => "longitude".into(),
            Field::Tag(key) => format!("tags[{}]", key),
        }
    }

    /// Whether elements of `kind` carry this field
    pub fn applies_to(&self, kind: ElementKind) -> bool {
        match self {
            Field::Latitude | Field::Longitude => kind == ElementKind::Node,
            _ => true,
        }
    }

    pub fn tag(key: impl Into<String>) -> Self {
        Field::Tag(key.into())
    }

    pub fn eq(self, value: impl Into<Value>) -> Expr {
        FieldRef::from(self).compare(CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<Value>) -> Expr {
        FieldRef::from(self).compare(CompareOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Expr {
        FieldRef::from(self).compare(CompareOp::Lt, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Expr {
        FieldRef::from(self).compare(CompareOp::Gt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Expr {
        FieldRef::from(self).compare(CompareOp::Le, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Expr {
        FieldRef::from(self).compare(CompareOp::Ge, value)
    }

    /// SQL `LIKE` pattern match
    pub fn like(self, pattern: impl Into<String>) -> Expr {
        FieldRef::from(self).compare(CompareOp::Like, Value::Text(pattern.into()))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Time(DateTime<Utc>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            // Debug keeps the fractional part: 50.0 rather than 50
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Text(v) => write!(f, "'{}'", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Time(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Like,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BoolOp::And => "&&",
            BoolOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

/// A column reference, optionally pinned to one element kind
///
/// `kind: None` refers to the field of whatever element is being matched.
/// `Some(kind)` only yields a value for rows of that kind.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    pub kind: Option<ElementKind>,
    pub field: Field,
}

impl FieldRef {
    pub fn of(kind: ElementKind, field: Field) -> Self {
        Self {
            kind: Some(kind),
            field,
        }
    }

    pub fn compare(self, op: CompareOp, value: impl Into<Value>) -> Expr {
        Expr::Compare {
            left: Operand::Column(self),
            op,
            right: Operand::Literal(value.into()),
        }
    }
}

impl From<Field> for FieldRef {
    fn from(field: Field) -> Self {
        Self { kind: None, field }
    }
}

/// Scalar subquery: `field` of the first element matching `query`
#[derive(Debug, Clone)]
pub struct Subquery {
    pub query: Query,
    pub field: Field,
}

/// One side of a comparison
#[derive(Debug, Clone)]
pub enum Operand {
    Column(FieldRef),
    Literal(Value),
    Subquery(Box<Subquery>),
    Arith {
        op: ArithOp,
        left: Box<Operand>,
        right: Box<Operand>,
    },
}

impl Operand {
    pub fn column(field: impl Into<FieldRef>) -> Self {
        Operand::Column(field.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Operand::Literal(value.into())
    }

    pub fn subquery(query: Query, field: Field) -> Self {
        Operand::Subquery(Box::new(Subquery { query, field }))
    }

    pub fn arith(op: ArithOp, left: Operand, right: Operand) -> Self {
        Operand::Arith {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

/// Filter expression tree
#[derive(Debug, Clone)]
pub enum Expr {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Bool {
        op: BoolOp,
        children: Vec<Expr>,
    },
    Not(Box<Expr>),
}

impl Expr {
    pub fn compare(left: Operand, op: CompareOp, right: Operand) -> Self {
        Expr::Compare { left, op, right }
    }

    pub fn and(children: Vec<Expr>) -> Self {
        Expr::Bool {
            op: BoolOp::And,
            children,
        }
    }

    pub fn or(children: Vec<Expr>) -> Self {
        Expr::Bool {
            op: BoolOp::Or,
            children,
        }
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }
}

/// A read against the element store
#[derive(Debug)]
pub struct Query {
    pub kinds: Vec<ElementKind>,
    pub filter: Option<Expr>,
    pub limit: Option<usize>,
    /// Set once the analyzer has looked at this instance
    analyzed: Cell<bool>,
}

impl Query {
    pub fn new(kinds: impl IntoIterator<Item = ElementKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            filter: None,
            limit: None,
            analyzed: Cell::new(false),
        }
    }

    /// Query over a single kind
    pub fn of(kind: ElementKind) -> Self {
        Self::new([kind])
    }

    /// Query over every kind
    pub fn all() -> Self {
        Self::new(ElementKind::ALL)
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(expr);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Element kinds this query returns, deduplicated in canonical order
    pub fn targeted_kinds(&self) -> Vec<ElementKind> {
        ElementKind::ALL
            .into_iter()
            .filter(|k| self.kinds.contains(k))
            .collect()
    }

    /// Mark this instance as analyzed; returns false if it already was
    pub fn mark_analyzed(&self) -> bool {
        !self.analyzed.replace(true)
    }

    pub fn is_analyzed(&self) -> bool {
        self.analyzed.get()
    }
}

impl Clone for Query {
    /// A clone is a new query instance and has not been analyzed
    fn clone(&self) -> Self {
        Self {
            kinds: self.kinds.clone(),
            filter: self.filter.clone(),
            limit: self.limit,
            analyzed: Cell::new(false),
        }
    }
}
