use crate::sql::base::error::ConnectorError;
use std::fmt;

/// A table identified by optional schema, name, and integer key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
    pub key_column: String,
}

impl TableRef {
    /// Parses `table` or `schema.table`.
    pub fn parse(table: &str, key_column: &str) -> Result<Self, ConnectorError> {
        let key_column = key_column.trim();
        if key_column.is_empty() {
            return Err(ConnectorError::InvalidTable(
                "key column must not be empty".to_string(),
            ));
        }

        let parts: Vec<&str> = table.trim().split('.').collect();
        let (schema, name) = match parts.as_slice() {
            [name] => (None, *name),
            [schema, name] => (Some(schema.to_string()), *name),
            _ => return Err(ConnectorError::InvalidTable(table.to_string())),
        };

        if name.is_empty() || schema.as_deref() == Some("") {
            return Err(ConnectorError::InvalidTable(table.to_string()));
        }

        Ok(TableRef {
            schema,
            name: name.to_string(),
            key_column: key_column.to_string(),
        })
    }

    /// Quoted, schema-qualified table name.
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(&self.name)),
            None => quote_identifier(&self.name),
        }
    }

    pub fn quoted_key(&self) -> String {
        quote_identifier(&self.key_column)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

pub fn quote_identifier(ident: &str) -> String {
    format!(r#""{}""#, ident.replace('"', r#""""#))
}
