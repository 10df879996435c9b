use serde_json::{Map, Value};

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::{validate_column, FilterWhere};
use super::types::{Cardinality, Condition, CountMode, FilterOp, FilterOrderInfo, RowRange, SortDirection};

/// Explicit query description handed to a single table-service call.
/// Nothing here talks to the backend; the backend renders or evaluates it.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    table_name: String,
    select_columns: Vec<String>,
    conditions: Vec<Condition>,
    order_data: Vec<FilterOrderInfo>,
    range: Option<RowRange>,
    count: CountMode,
    cardinality: Cardinality,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        Self::validate_table_name(&table_name)?;
        Ok(Self {
            table_name,
            select_columns: vec![],
            conditions: vec![],
            order_data: vec![],
            range: None,
            count: CountMode::None,
            cardinality: Cardinality::Many,
        })
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(Condition::field(column, FilterOp::Eq, value))
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(Condition::field(column, FilterOp::Neq, value))
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(Condition::field(column, FilterOp::Gt, value))
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(Condition::field(column, FilterOp::Gte, value))
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(Condition::field(column, FilterOp::Lt, value))
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(Condition::field(column, FilterOp::Lte, value))
    }

    pub fn ilike(self, column: &str, pattern: impl Into<String>) -> Self {
        self.condition(Condition::field(column, FilterOp::ILike, pattern.into()))
    }

    pub fn is_null(self, column: &str) -> Self {
        self.condition(Condition::field(column, FilterOp::Is, Value::Null))
    }

    pub fn or(self, any_of: Vec<Condition>) -> Self {
        self.condition(Condition::Or(any_of))
    }

    pub fn order(mut self, column: impl Into<String>, sort: SortDirection) -> Self {
        self.order_data.push(FilterOrderInfo { column: column.into(), sort });
        self
    }

    /// Append orderings from a `"column dir, ..."` clause
    pub fn order_clause(mut self, clause: &str) -> Result<Self, FilterError> {
        self.order_data.extend(FilterOrder::parse(clause)?);
        Ok(self)
    }

    /// Inclusive, zero-based row window
    pub fn range(mut self, from: i64, to: i64) -> Result<Self, FilterError> {
        if from < 0 { return Err(FilterError::InvalidRange("Range start must be non-negative".to_string())); }
        if to < from { return Err(FilterError::InvalidRange(format!("Range end {} precedes start {}", to, from))); }
        self.range = Some(RowRange { from, to });
        Ok(self)
    }

    pub fn count(mut self, mode: CountMode) -> Self {
        self.count = mode;
        self
    }

    pub fn single(mut self) -> Self {
        self.cardinality = Cardinality::Single;
        self
    }

    pub fn maybe_single(mut self) -> Self {
        self.cardinality = Cardinality::MaybeSingle;
        self
    }

    pub fn table(&self) -> &str { &self.table_name }
    pub fn conditions(&self) -> &[Condition] { &self.conditions }
    pub fn order_by(&self) -> &[FilterOrderInfo] { &self.order_data }
    pub fn row_range(&self) -> Option<RowRange> { self.range }
    pub fn count_mode(&self) -> CountMode { self.count }
    pub fn cardinality(&self) -> Cardinality { self.cardinality }

    /// Full PostgREST query string pairs for a read
    pub fn to_query_pairs(&self) -> Result<Vec<(String, String)>, FilterError> {
        let mut pairs = vec![("select".to_string(), self.build_select_clause()?)];
        pairs.extend(FilterWhere::generate(&self.conditions)?);
        for info in &self.order_data { validate_column(&info.column)?; }
        if let Some(order) = FilterOrder::generate(&self.order_data) {
            pairs.push(("order".to_string(), order));
        }
        if let Some(range) = self.range {
            pairs.push(("offset".to_string(), range.from.to_string()));
            pairs.push(("limit".to_string(), range.limit().to_string()));
        }
        Ok(pairs)
    }

    /// Only the row-selecting pairs, for update and delete
    pub fn to_where_pairs(&self) -> Result<Vec<(String, String)>, FilterError> {
        FilterWhere::generate(&self.conditions)
    }

    pub fn matches(&self, row: &Value) -> bool {
        FilterWhere::matches(&self.conditions, row)
    }

    /// Evaluate against in-memory rows: filter, sort, window and project.
    /// Returns the windowed rows and the total matching count.
    pub fn apply(&self, rows: impl IntoIterator<Item = Value>) -> (Vec<Value>, i64) {
        let mut matched: Vec<Value> = rows.into_iter().filter(|r| self.matches(r)).collect();
        let total = matched.len() as i64;
        FilterOrder::sort_rows(&self.order_data, &mut matched);

        if let Some(range) = self.range {
            let from = (range.from as usize).min(matched.len());
            let to = ((range.to + 1) as usize).min(matched.len());
            matched = matched.drain(from..to).collect();
        }

        if !self.select_columns.is_empty() && !self.select_columns.iter().any(|c| c == "*") {
            matched = matched
                .into_iter()
                .map(|row| {
                    let mut projected = Map::new();
                    for column in &self.select_columns {
                        if let Some(v) = row.get(column) {
                            projected.insert(column.clone(), v.clone());
                        }
                    }
                    Value::Object(projected)
                })
                .collect();
        }
        (matched, total)
    }

    fn validate_table_name(name: &str) -> Result<(), FilterError> {
        if name.is_empty() { return Err(FilterError::InvalidTableName("Table name cannot be empty".to_string())); }
        validate_column(name).map_err(|_| FilterError::InvalidTableName(format!("Invalid table name format: {}", name)))
    }

    fn build_select_clause(&self) -> Result<String, FilterError> {
        if self.select_columns.is_empty() || self.select_columns.iter().any(|c| c == "*") {
            return Ok("*".to_string());
        }
        for column in &self.select_columns { validate_column(column)?; }
        Ok(self.select_columns.join(","))
    }
}
