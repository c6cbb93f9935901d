//! Table and column inventory of a tenant database

use serde::{Deserialize, Serialize};

/// Row returned from a tenant query, column name to JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Complete inventory of a tenant database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

impl SchemaInfo {
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl TableInfo {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Quote an identifier for SQLite, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_lookup() {
        let schema = SchemaInfo {
            tables: vec![TableInfo {
                name: "people".into(),
                columns: vec![ColumnInfo {
                    name: "id".into(),
                    data_type: "INTEGER".into(),
                    nullable: true,
                    primary_key: false,
                }],
                row_count: 2,
            }],
        };
        assert_eq!(schema.table_names(), vec!["people"]);
        assert_eq!(schema.table("people").unwrap().column_names(), vec!["id"]);
        assert!(schema.table("missing").is_none());
    }
}
