use serde::{Deserialize, Serialize, de::IgnoredAny};
use serde_json::value::RawValue;
use std::collections::BTreeMap;

/// A full source row keyed by its primary key.
///
/// The row body is kept as the JSON object text produced by the source, so
/// column values reach the destination without being re-encoded.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RowData {
    pub key: i64,
    pub record: Box<RawValue>,
}

impl RowData {
    pub fn new(key: i64, record: Box<RawValue>) -> Self {
        RowData { key, record }
    }

    pub fn from_value(key: i64, value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let record = RawValue::from_string(serde_json::to_string(value)?)?;
        Ok(RowData { key, record })
    }

    pub fn json(&self) -> &str {
        self.record.get()
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(self.record.get())
    }

    /// Column names of the row, in lexical order.
    pub fn columns(&self) -> Result<Vec<String>, serde_json::Error> {
        let fields: BTreeMap<String, IgnoredAny> = serde_json::from_str(self.record.get())?;
        Ok(fields.into_keys().collect())
    }

    pub fn size_bytes(&self) -> usize {
        self.record.get().len()
    }
}

/// Renders rows as one JSON array, the shape bulk upserts bind as a parameter.
pub fn json_array(rows: &[RowData]) -> String {
    let mut out = String::with_capacity(rows.iter().map(|r| r.size_bytes() + 1).sum::<usize>() + 2);
    out.push('[');
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(row.json());
    }
    out.push(']');
    out
}
