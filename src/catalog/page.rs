use serde::Serialize;

use crate::filter::SortDirection;

/// One paginated, searchable list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageState<T> {
    /// 1-based
    pub page: i64,
    pub page_size: i64,
    pub search: String,
    pub total: i64,
    pub items: Vec<T>,
}

impl<T> PageState<T> {
    pub fn new(page_size: i64) -> Self {
        Self {
            page: 1,
            page_size,
            search: String::new(),
            total: 0,
            items: Vec::new(),
        }
    }

    pub fn total_pages(&self) -> i64 {
        if self.page_size <= 0 {
            return 0;
        }
        (self.total + self.page_size - 1) / self.page_size
    }

    pub fn has_more(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn contains_page(&self, page: i64) -> bool {
        page >= 1 && page <= self.total_pages()
    }

    /// Store a fetched page, appending to or replacing the loaded items
    pub fn apply(&mut self, items: Vec<T>, total: i64, page: i64, append: bool) {
        if append {
            self.items.extend(items);
        } else {
            self.items = items;
        }
        self.total = total;
        self.page = page;
    }
}

/// Inclusive zero-based row window of a 1-based page, `None` when the
/// window does not fit in an `i64`
pub fn page_window(page: i64, page_size: i64) -> Option<(i64, i64)> {
    let from = (page.max(1) - 1).checked_mul(page_size)?;
    let to = from.checked_add(page_size - 1)?;
    Some((from, to))
}

/// Per-call overrides; unset fields fall back to the list's current state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortDirection>,
    pub append: bool,
}

impl FetchOptions {
    pub fn page(page: i64) -> Self {
        Self { page: Some(page), ..Default::default() }
    }

    pub fn append() -> Self {
        Self { append: true, ..Default::default() }
    }

    pub fn sorted(mut self, column: impl Into<String>, order: SortDirection) -> Self {
        self.sort_by = Some(column.into());
        self.sort_order = Some(order);
        self
    }
}

/// Result object returned by every list operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListOutcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ListOutcome<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }
}

impl ListOutcome<()> {
    pub fn done() -> Self {
        Self { success: true, data: None, error: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        let mut state: PageState<i32> = PageState::new(10);
        assert_eq!(state.total_pages(), 0);
        state.total = 21;
        assert_eq!(state.total_pages(), 3);
        state.total = 20;
        assert_eq!(state.total_pages(), 2);
        assert!(state.contains_page(2));
        assert!(!state.contains_page(3));
        assert!(!state.contains_page(0));
    }

    #[test]
    fn apply_appends_or_replaces() {
        let mut state = PageState::new(2);
        state.apply(vec![1, 2], 5, 1, false);
        state.apply(vec![3, 4], 5, 2, true);
        assert_eq!(state.items, vec![1, 2, 3, 4]);
        assert!(state.has_more());
        state.apply(vec![9], 5, 3, false);
        assert_eq!(state.items, vec![9]);
        assert!(!state.has_more());
    }

    #[test]
    fn window_for_page() {
        assert_eq!(page_window(1, 10), Some((0, 9)));
        assert_eq!(page_window(3, 10), Some((20, 29)));
        assert_eq!(page_window(0, 5), Some((0, 4)));
        assert_eq!(page_window(i64::MAX, 10), None);
    }
}
