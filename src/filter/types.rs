use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators understood by the table service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    Is,
}

impl FilterOp {
    /// Operator token as it appears in a PostgREST filter (`column=op.value`)
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::ILike => "ilike",
            FilterOp::Is => "is",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Field {
        column: String,
        op: FilterOp,
        value: Value,
    },
    /// Any of the nested conditions must hold
    Or(Vec<Condition>),
}

impl Condition {
    pub fn field(column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Condition::Field { column: column.into(), op, value: value.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountMode {
    /// Rows only
    #[default]
    None,
    /// Rows plus the exact total matching the conditions (ignoring range)
    Exact,
    /// Exact total only, no rows transferred
    Head,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    #[default]
    Many,
    /// Exactly one row or an error
    Single,
    /// Zero or one row
    MaybeSingle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOrderInfo {
    pub column: String,
    pub sort: SortDirection,
}

/// Inclusive row window, zero-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub from: i64,
    pub to: i64,
}

impl RowRange {
    pub fn limit(&self) -> i64 {
        self.to - self.from + 1
    }
}
