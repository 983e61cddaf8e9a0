//! Query compilation
//!
//! Turns a [`Query`] into one parameterized `SELECT` over the elements
//! table. Every expression shape compiles, including those the analyzer
//! ignores. Values are always bound as parameters; only table names and
//! aliases are spliced into the SQL text.

use rusqlite::types::Value as SqlValue;

use super::elements::element_columns;
use super::Tables;
use crate::query::{BoolOp, CompareOp, Expr, Field, FieldRef, Operand, Query, Value};

/// SQL text plus its positional parameters
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Compile `query` into a select of full element rows ordered by insertion
pub fn compile(query: &Query, tables: &Tables) -> CompiledQuery {
    let mut compiler = Compiler {
        tables,
        params: Vec::new(),
        next_alias: 1,
    };
    let sql = compiler.select(query, "e0", None);
    CompiledQuery {
        sql,
        params: compiler.params,
    }
}

struct Compiler<'t> {
    tables: &'t Tables,
    params: Vec<SqlValue>,
    next_alias: usize,
}

impl Compiler<'_> {
    /// Parameters are pushed in the order their `?` appears in the text
    fn select(&mut self, query: &Query, alias: &str, scalar: Option<&Field>) -> String {
        let projection = match scalar {
            Some(field) => self.column(field, alias),
            None => element_columns(alias),
        };

        let mut sql = format!(
            "SELECT {} FROM {} {}",
            projection, self.tables.elements, alias
        );

        let mut conditions = Vec::new();
        let kinds = query.targeted_kinds();
        if kinds.is_empty() {
            conditions.push("0".to_string());
        } else if kinds.len() < 3 {
            let placeholders = vec!["?"; kinds.len()].join(", ");
            conditions.push(format!("{}.kind IN ({})", alias, placeholders));
            self.params.extend(
                kinds
                    .iter()
                    .map(|kind| SqlValue::Text(kind.as_str().to_string())),
            );
        }
        if let Some(filter) = &query.filter {
            conditions.push(self.expr(filter, alias));
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {}.element_id", alias));

        let limit = if scalar.is_some() { Some(1) } else { query.limit };
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }

    fn expr(&mut self, expr: &Expr, alias: &str) -> String {
        match expr {
            Expr::Compare { left, op, right } => {
                let left = self.operand(left, alias);
                let right = self.operand(right, alias);
                format!("{} {} {}", left, sql_operator(*op), right)
            }
            Expr::Bool { op, children } => {
                if children.is_empty() {
                    // Identity of the operator
                    return match op {
                        BoolOp::And => "1".into(),
                        BoolOp::Or => "0".into(),
                    };
                }
                let joiner = match op {
                    BoolOp::And => " AND ",
                    BoolOp::Or => " OR ",
                };
                let parts: Vec<String> = children.iter().map(|c| self.expr(c, alias)).collect();
                format!("({})", parts.join(joiner))
            }
            Expr::Not(inner) => format!("NOT ({})", self.expr(inner, alias)),
        }
    }

    fn operand(&mut self, operand: &Operand, alias: &str) -> String {
        match operand {
            Operand::Column(column) => self.field_ref(column, alias),
            Operand::Literal(value) => {
                self.params.push(sql_value(value));
                "?".into()
            }
            Operand::Subquery(sub) => {
                let inner = format!("e{}", self.next_alias);
                self.next_alias += 1;
                format!("({})", self.select(&sub.query, &inner, Some(&sub.field)))
            }
            Operand::Arith { op, left, right } => {
                let left = self.operand(left, alias);
                let right = self.operand(right, alias);
                format!("({} {} {})", left, op.symbol(), right)
            }
        }
    }

    fn field_ref(&mut self, column: &FieldRef, alias: &str) -> String {
        match column.kind {
            None => self.column(&column.field, alias),
            Some(kind) => {
                // Only rows of `kind` have a value; others compare as NULL
                self.params.push(SqlValue::Text(kind.as_str().to_string()));
                let value = self.column(&column.field, alias);
                format!("(CASE WHEN {}.kind = ? THEN {} END)", alias, value)
            }
        }
    }

    fn column(&mut self, field: &Field, alias: &str) -> String {
        match field {
            Field::Id => format!("{}.osm_id", alias),
            Field::Tag(key) => {
                self.params.push(SqlValue::Text(key.clone()));
                format!(
                    "(SELECT t.value FROM {} t WHERE t.element_id = {}.element_id AND t.key = ?)",
                    self.tables.tags, alias
                )
            }
            // Remaining field names match their column names
            other => format!("{}.{}", alias, other.name()),
        }
    }
}

fn sql_operator(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "=",
        CompareOp::Ne => "!=",
        CompareOp::Lt => "<",
        CompareOp::Gt => ">",
        CompareOp::Le => "<=",
        CompareOp::Ge => ">=",
        CompareOp::Like => "LIKE",
    }
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Float(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Bool(v) => SqlValue::Integer(i64::from(*v)),
        Value::Time(v) => SqlValue::Integer(v.timestamp_millis()),
    }
}
