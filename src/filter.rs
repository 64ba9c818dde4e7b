//! Generic query filter: an ordered conjunction of attribute/op/value clauses.
//!
//! Deliberately restricted -- no OR, no joins, no grouping. Complex predicates
//! are encoded as dedicated high-level store queries instead of this DSL.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
}

impl Op {
    pub fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Neq => "!=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Gte => ">=",
            Op::Lte => "<=",
            Op::In => "IN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterAttribute {
    pub attribute: String,
    pub op: Op,
    pub value: Value,
}

impl FilterAttribute {
    pub fn new(attribute: impl Into<String>, op: Op, value: Value) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            value,
        }
    }

    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Op::Eq, value.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    pub attribute: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn new(attribute: impl Into<String>, ascending: bool) -> Self {
        Self {
            attribute: attribute.into(),
            ascending,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    pub attributes: Vec<FilterAttribute>,
    pub order_by: Option<OrderBy>,
    /// `<= 0` means unlimited.
    pub limit: i64,
}

impl Filter {
    pub fn empty(&self) -> bool {
        self.attributes.is_empty() && self.order_by.is_none() && self.limit <= 0
    }

    pub fn with_attribute(mut self, attribute: FilterAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}
