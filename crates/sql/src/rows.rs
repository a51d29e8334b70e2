use crate::SqlParam;

use serde::{Deserialize, Serialize};

/// Result set of a query.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Rows {
    /// Number of columns in every row.
    pub column_count: u16,

    /// Column names in result order.
    pub column_names: Vec<String>,

    /// Declared column types, empty where the engine reports none.
    pub column_types: Vec<String>,

    /// Row values.
    pub rows: Vec<Vec<SqlParam>>,
}

/// Borrowed view of a single row.
#[derive(Debug)]
pub struct Row<'a> {
    column_names: &'a [String],
    values: &'a [SqlParam],
}

impl Row<'_> {
    /// Value of the named column.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&SqlParam> {
        self.column_names
            .iter()
            .position(|n| n == name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Integer value at `idx`.
    #[must_use]
    pub fn get_integer(&self, idx: usize) -> Option<i64> {
        match self.values.get(idx)? {
            SqlParam::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integer value of the named column.
    #[must_use]
    pub fn get_integer_by_name(&self, name: &str) -> Option<i64> {
        match self.get_by_name(name)? {
            SqlParam::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Text value at `idx`.
    #[must_use]
    pub fn get_text(&self, idx: usize) -> Option<&str> {
        match self.values.get(idx)? {
            SqlParam::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Text value of the named column.
    #[must_use]
    pub fn get_text_by_name(&self, name: &str) -> Option<&str> {
        match self.get_by_name(name)? {
            SqlParam::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Rows {
    /// Whether the result set has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows.len()
    }

    /// Iterates over the rows.
    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|values| Row {
            column_names: &self.column_names,
            values,
        })
    }

    /// Row at `idx`.
    #[must_use]
    pub fn row(&self, idx: usize) -> Option<Row<'_>> {
        self.rows.get(idx).map(|values| Row {
            column_names: &self.column_names,
            values,
        })
    }
}
