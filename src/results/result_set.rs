use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Result block of one row-producing statement
///
/// `exec` yields one block per statement that returned at least one row; statements that
/// returned nothing contribute no block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names, in select-list order
    pub columns: Vec<String>,
    /// One entry per row, each aligned with `columns`
    pub values: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Number of rows in this block
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by row and column name
    #[must_use]
    pub fn get(&self, row: usize, column_name: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|col| col == column_name)?;
        self.values.get(row).and_then(|values| values.get(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_as_columns_and_values() {
        let block = QueryResult {
            columns: vec!["a".into(), "b".into()],
            values: vec![vec![Value::Integer(1), Value::from("x")]],
        };
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({"columns": ["a", "b"], "values": [[1, "x"]]})
        );
        assert_eq!(block.get(0, "b"), Some(&Value::from("x")));
        assert_eq!(block.get(1, "b"), None);
    }
}
