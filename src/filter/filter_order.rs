use std::cmp::Ordering;

use serde_json::Value;

use super::error::FilterError;
use super::filter_where::compare_values;
use super::types::{FilterOrderInfo, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    /// Parse `"created_at desc, name asc"` style order clauses
    pub fn parse(clause: &str) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let mut out = Vec::new();
        for part in clause.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() { continue; }
            let mut it = trimmed.split_whitespace();
            if let Some(col) = it.next() {
                let sort = match it.next() {
                    None => SortDirection::Asc,
                    Some(dir) if dir.eq_ignore_ascii_case("asc") => SortDirection::Asc,
                    Some(dir) if dir.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                    Some(dir) => {
                        return Err(FilterError::InvalidOperatorData(format!("Unknown sort direction: {}", dir)))
                    }
                };
                out.push(FilterOrderInfo { column: col.to_string(), sort });
            }
        }
        Ok(out)
    }

    /// Render as the value of a PostgREST `order` parameter
    pub fn generate(infos: &[FilterOrderInfo]) -> Option<String> {
        if infos.is_empty() { return None; }
        let parts: Vec<String> = infos
            .iter()
            .map(|i| format!("{}.{}", i.column, i.sort.as_str()))
            .collect();
        Some(parts.join(","))
    }

    /// Sort JSON rows in place; nulls sort last in either direction
    pub fn sort_rows(infos: &[FilterOrderInfo], rows: &mut [Value]) {
        if infos.is_empty() { return; }
        rows.sort_by(|a, b| {
            for info in infos {
                let left = a.get(&info.column).unwrap_or(&Value::Null);
                let right = b.get(&info.column).unwrap_or(&Value::Null);
                let ord = match (left.is_null(), right.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => {
                        let ord = compare_values(left, right).unwrap_or(Ordering::Equal);
                        match info.sort {
                            SortDirection::Asc => ord,
                            SortDirection::Desc => ord.reverse(),
                        }
                    }
                };
                if ord != Ordering::Equal { return ord; }
            }
            Ordering::Equal
        });
    }
}
