//! Declarative record matching.
//!
//! Queries use MongoDB-style selector documents:
//!
//! ```rust
//! use driftdb_core::query::{Query, SortOrder};
//! use serde_json::json;
//!
//! let items = vec![
//!     json!({"id": "a", "color": "red", "size": 3}),
//!     json!({"id": "b", "color": "blue", "size": 1}),
//!     json!({"id": "c", "color": "red", "size": 2}),
//! ];
//!
//! let query = Query::parse(&json!({"color": "red"}))
//!     .unwrap()
//!     .sort_by("size", SortOrder::Ascending);
//! let ids: Vec<_> = query.run(&items).unwrap().into_iter().map(|v| v["id"].clone()).collect();
//! assert_eq!(ids, vec![json!("c"), json!("a")]);
//! ```

mod selector;

pub use selector::{FieldOp, Selector};

use driftdb_storage::{compare_values, value_at_path};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

/// Errors raised while parsing or running a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The selector document is not an object.
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    /// The operator is unknown or deliberately unsupported.
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// An operator received an argument of the wrong shape.
    #[error("invalid argument for {op}: {message}")]
    InvalidArgument {
        /// The operator.
        op: String,
        /// What was wrong.
        message: String,
    },

    /// A record could not be converted to JSON for matching.
    #[error("cannot match record: {0}")]
    Serialize(String),
}

impl QueryError {
    pub(crate) fn invalid_argument(op: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            op: op.to_string(),
            message: message.into(),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// A selector plus sort, skip and limit.
#[derive(Debug, Clone)]
pub struct Query {
    selector: Selector,
    sort: Vec<(String, SortOrder)>,
    skip: usize,
    limit: Option<usize>,
}

impl Query {
    /// Creates a query from a selector.
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            sort: Vec::new(),
            skip: 0,
            limit: None,
        }
    }

    /// Creates a query that matches everything.
    pub fn all() -> Self {
        Self::new(Selector::All)
    }

    /// Parses a selector document into a query.
    ///
    /// # Errors
    ///
    /// See [`Selector::parse`].
    pub fn parse(doc: &Value) -> Result<Self, QueryError> {
        Selector::parse(doc).map(Self::new)
    }

    /// Adds a sort key. Earlier keys take precedence.
    #[must_use]
    pub fn sort_by(mut self, path: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((path.into(), order));
        self
    }

    /// Skips the first `n` matches.
    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    /// Returns at most `n` matches.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Returns the selector.
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Returns the matching items, sorted, skipped and limited.
    ///
    /// # Errors
    ///
    /// Returns an error if an item cannot be serialized to JSON.
    pub fn run<T: Serialize + Clone>(&self, items: &[T]) -> Result<Vec<T>, QueryError> {
        let mut matched = self.matching(items)?;

        if !self.sort.is_empty() {
            matched.sort_by(|(a, _), (b, _)| self.compare(a, b));
        }

        let limit = self.limit.unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .skip(self.skip)
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect())
    }

    /// Counts the items the selector matches, ignoring skip and limit.
    ///
    /// # Errors
    ///
    /// Returns an error if an item cannot be serialized to JSON.
    pub fn count<T: Serialize>(&self, items: &[T]) -> Result<usize, QueryError> {
        Ok(self.matching(items)?.len())
    }

    fn matching<'a, T: Serialize>(&self, items: &'a [T]) -> Result<Vec<(Value, &'a T)>, QueryError> {
        let mut matched = Vec::new();
        for item in items {
            let doc = serde_json::to_value(item).map_err(|e| QueryError::Serialize(e.to_string()))?;
            if self.selector.matches(&doc) {
                matched.push((doc, item));
            }
        }
        Ok(matched)
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for (path, order) in &self.sort {
            let left = value_at_path(a, path).unwrap_or(&Value::Null);
            let right = value_at_path(b, path).unwrap_or(&Value::Null);
            let ord = match order {
                SortOrder::Ascending => compare_values(left, right),
                SortOrder::Descending => compare_values(right, left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::all()
    }
}
