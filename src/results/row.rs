use std::collections::HashMap;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::types::Value;

/// One row as a column-name → value mapping
///
/// Column names are shared by every row of a statement. Serializes as a JSON object in column
/// order; when a name repeats, the rightmost column wins, matching what a plain object built
/// column by column would hold.
#[derive(Debug, Clone, PartialEq)]
pub struct RowObject {
    /// The column names for this row (shared across all rows of a statement)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<Value>,
}

impl RowObject {
    /// Create a new row
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self {
            column_names,
            values,
        }
    }

    /// Get the index of a column by name (rightmost match)
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_names.iter().rposition(|col| col == column_name)
    }

    /// Get a value from the row by column name
    ///
    /// Returns None if the column wasn't found
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&Value> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Indexes that survive name collisions, in column order.
    fn visible_columns(&self) -> Vec<usize> {
        let mut last: HashMap<&str, usize> = HashMap::with_capacity(self.column_names.len());
        for (idx, name) in self.column_names.iter().enumerate() {
            last.insert(name.as_str(), idx);
        }
        let mut visible: Vec<usize> = last.into_values().collect();
        visible.sort_unstable();
        visible
    }

    /// Owned (name, value) pairs in serialization order.
    #[must_use]
    pub fn into_pairs(self) -> Vec<(String, Value)> {
        let visible = self.visible_columns();
        let mut values: Vec<Option<Value>> = self.values.into_iter().map(Some).collect();
        visible
            .into_iter()
            .filter_map(|idx| {
                let name = self.column_names.get(idx)?.clone();
                let value = values.get_mut(idx)?.take().unwrap_or(Value::Null);
                Some((name, value))
            })
            .collect()
    }
}

impl Serialize for RowObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let visible = self.visible_columns();
        let mut map = serializer.serialize_map(Some(visible.len()))?;
        for idx in visible {
            let value = self.values.get(idx).unwrap_or(&Value::Null);
            map.serialize_entry(&self.column_names[idx], value)?;
        }
        map.end()
    }
}
