//! Tabular input for tenant databases
//!
//! Uploaded CSV files and the built-in sample dataset are both turned into
//! [`TabularData`] before anything touches a tenant store. Column types are
//! inferred from content:
//! - every non-empty value parses as i64 → INTEGER
//! - every non-empty value parses as f64 → REAL
//! - every non-empty value is true/false → INTEGER (0/1)
//! - anything else → TEXT
//!
//! Empty fields become NULL.

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

/// Declared storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// One table to be written into a tenant store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Cell>>,
}

/// Where a dataset came from, for logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Upload,
    Sample,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Upload => "upload",
            DataSource::Sample => "sample",
        }
    }
}

/// A batch of tables loaded atomically into one tenant store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularData {
    pub source: DataSource,
    pub tables: Vec<Table>,
}

impl TabularData {
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Check every table before any of them is written
    pub fn validate(&self) -> Result<()> {
        if self.tables.is_empty() {
            return Err(invalid("no tables in input"));
        }
        let mut seen = HashSet::new();
        for table in &self.tables {
            table.validate()?;
            if !seen.insert(table.name.to_ascii_lowercase()) {
                return Err(invalid(format!("table '{}' appears twice", table.name)));
            }
        }
        Ok(())
    }
}

impl Table {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(invalid("table name is empty"));
        }
        if sanitize_table_name(&self.name) != self.name {
            return Err(invalid(format!(
                "table name '{}' may only contain letters, digits and '_'",
                self.name
            )));
        }
        if self.name.to_ascii_lowercase().starts_with("sqlite_") {
            return Err(invalid(format!("table name '{}' is reserved", self.name)));
        }
        if self.columns.is_empty() {
            return Err(invalid(format!("table '{}' has no columns", self.name)));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(invalid(format!("table '{}' has an unnamed column", self.name)));
            }
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(invalid(format!(
                    "table '{}' has duplicate column '{}'",
                    self.name, column.name
                )));
            }
        }

        if self.rows.is_empty() {
            return Err(invalid(format!("table '{}' has no rows", self.name)));
        }
        for (idx, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(invalid(format!(
                    "table '{}' row {} has {} fields, expected {}",
                    self.name,
                    idx + 1,
                    row.len(),
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::InvalidData {
        message: message.into(),
    }
}

/// Keep letters, digits and '_' of a file stem
pub fn sanitize_table_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Parse an uploaded CSV file into a single table named after the file
pub fn parse_csv(file_name: &str, bytes: &[u8]) -> Result<TabularData> {
    let stem = file_name
        .strip_suffix(".csv")
        .or_else(|| file_name.strip_suffix(".CSV"))
        .ok_or_else(|| invalid("only CSV files are supported"))?;
    // browsers may send a full client path
    let stem = stem.rsplit(&['/', '\\'][..]).next().unwrap_or(stem);
    let name = sanitize_table_name(stem);
    if name.is_empty() {
        return Err(invalid(format!(
            "cannot derive a table name from '{}'",
            file_name
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if header.is_empty() || header.iter().all(String::is_empty) {
        return Err(invalid("CSV has no header row"));
    }

    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() != header.len() {
            return Err(invalid(format!(
                "row {} has {} fields, expected {}",
                idx + 2,
                record.len(),
                header.len()
            )));
        }
        raw_rows.push(record.iter().map(str::to_string).collect());
    }

    let column_types: Vec<ColumnType> = (0..header.len())
        .map(|col| infer_type(raw_rows.iter().map(|row| row[col].as_str())))
        .collect();

    let rows: Vec<Vec<Cell>> = raw_rows
        .iter()
        .map(|row| {
            row.iter()
                .zip(&column_types)
                .map(|(value, ty)| to_cell(value, *ty))
                .collect()
        })
        .collect();

    let table = Table {
        name,
        columns: header
            .into_iter()
            .zip(column_types)
            .map(|(name, column_type)| Column { name, column_type })
            .collect(),
        rows,
    };

    let data = TabularData {
        source: DataSource::Upload,
        tables: vec![table],
    };
    data.validate()?;
    Ok(data)
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn infer_type<'a>(values: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut all_int = true;
    let mut all_real = true;
    let mut all_bool = true;
    let mut any = false;

    for value in values.filter(|v| !v.is_empty()) {
        any = true;
        all_int &= value.parse::<i64>().is_ok();
        all_real &= value.parse::<f64>().map_or(false, f64::is_finite);
        all_bool &= parse_bool(value).is_some();
    }

    match (any, all_int, all_real, all_bool) {
        (false, ..) => ColumnType::Text,
        (true, true, _, _) => ColumnType::Integer,
        (true, _, true, _) => ColumnType::Real,
        (true, _, _, true) => ColumnType::Integer,
        _ => ColumnType::Text,
    }
}

fn to_cell(value: &str, ty: ColumnType) -> Cell {
    if value.is_empty() {
        return Cell::Null;
    }
    match ty {
        ColumnType::Integer => value
            .parse::<i64>()
            .ok()
            .or_else(|| parse_bool(value).map(i64::from))
            .map(Cell::Integer)
            .unwrap_or_else(|| Cell::Text(value.to_string())),
        ColumnType::Real => value
            .parse::<f64>()
            .map(Cell::Real)
            .unwrap_or_else(|_| Cell::Text(value.to_string())),
        ColumnType::Text => Cell::Text(value.to_string()),
    }
}

fn text(v: &str) -> Cell {
    Cell::Text(v.to_string())
}

/// Demonstration dataset: five customers and eight orders
pub fn sample_dataset() -> TabularData {
    let customers = Table {
        name: "customers".to_string(),
        columns: vec![
            Column { name: "customer_id".into(), column_type: ColumnType::Integer },
            Column { name: "name".into(), column_type: ColumnType::Text },
            Column { name: "email".into(), column_type: ColumnType::Text },
            Column { name: "city".into(), column_type: ColumnType::Text },
        ],
        rows: [
            (1, "Alice Johnson", "alice@email.com", "New York"),
            (2, "Bob Smith", "bob@email.com", "Los Angeles"),
            (3, "Carol Davis", "carol@email.com", "Chicago"),
            (4, "David Wilson", "david@email.com", "Houston"),
            (5, "Eve Brown", "eve@email.com", "Phoenix"),
        ]
        .into_iter()
        .map(|(id, name, email, city)| vec![Cell::Integer(id), text(name), text(email), text(city)])
        .collect(),
    };

    let orders = Table {
        name: "orders".to_string(),
        columns: vec![
            Column { name: "order_id".into(), column_type: ColumnType::Integer },
            Column { name: "customer_id".into(), column_type: ColumnType::Integer },
            Column { name: "product".into(), column_type: ColumnType::Text },
            Column { name: "quantity".into(), column_type: ColumnType::Integer },
            Column { name: "price".into(), column_type: ColumnType::Real },
            Column { name: "order_date".into(), column_type: ColumnType::Text },
        ],
        rows: [
            (101, 1, "Laptop", 1, 999.99, "2024-01-15"),
            (102, 2, "Mouse", 2, 29.99, "2024-01-16"),
            (103, 1, "Keyboard", 1, 79.99, "2024-01-17"),
            (104, 3, "Monitor", 1, 299.99, "2024-01-18"),
            (105, 4, "Headphones", 1, 149.99, "2024-01-19"),
            (106, 2, "Webcam", 1, 89.99, "2024-01-20"),
            (107, 5, "Tablet", 1, 399.99, "2024-01-21"),
            (108, 3, "Printer", 1, 199.99, "2024-01-22"),
        ]
        .into_iter()
        .map(|(order_id, customer_id, product, quantity, price, date)| {
            vec![
                Cell::Integer(order_id),
                Cell::Integer(customer_id),
                text(product),
                Cell::Integer(quantity),
                Cell::Real(price),
                text(date),
            ]
        })
        .collect(),
    };

    TabularData {
        source: DataSource::Sample,
        tables: vec![customers, orders],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_infers_types() {
        let csv = b"id,score,label,flag\n1,2.5,alpha,true\n2,3,beta,false\n3,,gamma,TRUE\n";
        let data = parse_csv("scores.csv", csv).unwrap();
        let table = &data.tables[0];

        assert_eq!(table.name, "scores");
        let types: Vec<_> = table.columns.iter().map(|c| c.column_type).collect();
        assert_eq!(
            types,
            vec![ColumnType::Integer, ColumnType::Real, ColumnType::Text, ColumnType::Integer]
        );
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[2][1], Cell::Null);
        assert_eq!(table.rows[1][1], Cell::Real(3.0));
        assert_eq!(table.rows[0][3], Cell::Integer(1));
    }

    #[test]
    fn test_table_name_is_sanitized() {
        let data = parse_csv("C:\\Users\\me\\sales-2024 (final).csv", b"a\n1\n").unwrap();
        assert_eq!(data.tables[0].name, "sales2024final");
    }

    #[test]
    fn test_rejects_non_csv_and_bad_shapes() {
        assert!(matches!(
            parse_csv("data.xlsx", b"a,b\n1,2\n"),
            Err(AppError::InvalidData { .. })
        ));
        assert!(matches!(
            parse_csv("empty.csv", b""),
            Err(AppError::InvalidData { .. })
        ));
        assert!(matches!(
            parse_csv("header_only.csv", b"a,b\n"),
            Err(AppError::InvalidData { .. })
        ));
        assert!(matches!(
            parse_csv("ragged.csv", b"a,b\n1,2\n3\n"),
            Err(AppError::InvalidData { .. })
        ));
        assert!(matches!(
            parse_csv("dupes.csv", b"a,A\n1,2\n"),
            Err(AppError::InvalidData { .. })
        ));
        assert!(matches!(
            parse_csv("---.csv", b"a\n1\n"),
            Err(AppError::InvalidData { .. })
        ));
        assert!(matches!(
            parse_csv("sqlite_master.csv", b"a\n1\n"),
            Err(AppError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let data = parse_csv("t.csv", b"a,b\n1,2\n\n3,4\n").unwrap();
        assert_eq!(data.tables[0].rows.len(), 2);
    }

    #[test]
    fn test_sample_dataset_is_valid() {
        let data = sample_dataset();
        data.validate().unwrap();
        assert_eq!(data.table_names(), vec!["customers", "orders"]);
        assert_eq!(data.tables[0].rows.len(), 5);
        assert_eq!(data.tables[1].rows.len(), 8);
    }
}
