//! Per-tenant isolated storage
//!
//! Every tenant owns exactly one SQLite file under the storage root. The file
//! name is derived from the validated tenant id plus a digest of it, so two
//! tenants can never resolve to the same file (even on case-insensitive
//! filesystems) and no id can address anything outside the root.
//!
//! A [`TenantHandle`] carries a single-connection writer pool, a read-only
//! reader pool, and a reader/writer lock: data loads are serialized per
//! tenant while queries proceed concurrently and never observe a half-loaded
//! table.

pub mod schema;
pub mod tabular;

pub use schema::{ColumnInfo, Row, SchemaInfo, TableInfo};
pub use tabular::{parse_csv, sample_dataset, Cell, DataSource, TabularData};

use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use dashmap::DashMap;
use futures::TryStreamExt;
use regex_lite::Regex;
use schema::quote_ident;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Longest accepted tenant id
pub const MAX_TENANT_ID_LEN: usize = 50;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn tenant_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,50}$").expect("valid tenant id pattern"))
}

fn forbidden_sql_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(attach|detach|vacuum)\b").expect("valid statement pattern")
    })
}

fn pragma_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bpragma\b").expect("valid pragma pattern"))
}

/// Validated tenant identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Accept `[A-Za-z0-9_-]{1,50}` and nothing else; ids are never coerced
    pub fn parse(raw: &str) -> Result<Self> {
        if tenant_id_pattern().is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            let reason = if raw.is_empty() {
                "must not be empty".to_string()
            } else if raw.chars().count() > MAX_TENANT_ID_LEN {
                format!("must be at most {} characters", MAX_TENANT_ID_LEN)
            } else {
                "may only contain letters, digits, '_' and '-'".to_string()
            };
            Err(AppError::InvalidTenantId {
                tenant_id: raw.to_string(),
                reason,
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        TenantId::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// File name for a tenant: readable prefix plus a digest of the exact id
pub fn store_file_name(tenant: &TenantId) -> String {
    let digest = hex::encode(Sha256::digest(tenant.as_str().as_bytes()));
    format!("{}-{}.db", tenant.as_str().to_ascii_lowercase(), &digest[..16])
}

/// Blank out string literals, quoted identifiers and comments
///
/// Literals become `''` and identifiers `""` so token boundaries survive;
/// comments become a single space. Keyword checks run on the result, so a
/// table named `pragma` or a value like `'Vacuum cleaner'` is never mistaken
/// for a statement.
pub fn mask_quoted(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                // doubled quotes are escapes inside the same token
                while let Some(inner) = chars.next() {
                    if inner == close {
                        if close != ']' && chars.peek() == Some(&close) {
                            chars.next();
                            continue;
                        }
                        break;
                    }
                }
                out.push_str(if c == '\'' { "''" } else { "\"\"" });
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Reject anything but a single read-only SELECT before it reaches SQLite
pub fn guard_read_only(sql: &str) -> Result<()> {
    let masked = mask_quoted(sql);
    if forbidden_sql_pattern().is_match(&masked) {
        return Err(AppError::IsolationViolation {
            message: "statement references another database file".to_string(),
        });
    }

    let trimmed = masked.trim();
    let body = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    let first_word = body
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    if body.is_empty() {
        return Err(AppError::AgentError {
            message: "empty query".to_string(),
        });
    }
    if body.contains(';') || pragma_pattern().is_match(body) {
        return Err(AppError::AgentError {
            message: "only a single SELECT statement is allowed".to_string(),
        });
    }
    if first_word != "SELECT" && first_word != "WITH" {
        return Err(AppError::AgentError {
            message: format!("operation '{}' is not allowed", first_word),
        });
    }
    Ok(())
}

/// Registry of tenant databases under one storage root
pub struct TenantStore {
    root: PathBuf,
    max_read_connections: u32,
    handles: DashMap<TenantId, Arc<OnceCell<TenantHandle>>>,
}

impl TenantStore {
    /// Create the storage root if needed and canonicalize it
    pub fn new(config: &StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root_dir).map_err(|e| AppError::Storage {
            message: format!(
                "Failed to create storage root {}: {}",
                config.root_dir.display(),
                e
            ),
        })?;
        let root = config.root_dir.canonicalize()?;

        info!(root = %root.display(), "Tenant storage ready");

        Ok(Self {
            root,
            max_read_connections: config.max_read_connections.max(1),
            handles: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic, injective location of a tenant's database
    pub fn path_for(&self, tenant: &TenantId) -> Result<PathBuf> {
        let path = self.root.join(store_file_name(tenant));
        if path.parent() != Some(self.root.as_path()) {
            warn!(
                security = true,
                tenant_id = %tenant,
                path = %path.display(),
                "Tenant path escapes storage root"
            );
            return Err(AppError::IsolationViolation {
                message: format!("store for tenant '{}' escapes the storage root", tenant),
            });
        }
        Ok(path)
    }

    /// Open the tenant's database, creating it on first use
    ///
    /// Concurrent first calls for one tenant share a single open.
    pub async fn ensure_exists(&self, tenant: &TenantId) -> Result<TenantHandle> {
        let cell = self.handles.entry(tenant.clone()).or_default().clone();
        let handle = cell.get_or_try_init(|| self.open(tenant)).await?;
        Ok(handle.clone())
    }

    async fn open(&self, tenant: &TenantId) -> Result<TenantHandle> {
        let path = self.path_for(tenant)?;
        let existed = tokio::fs::try_exists(&path).await?;

        let write_options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_options)
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to open store for tenant '{}': {}", tenant, e),
            })?;

        if !existed {
            // materialize the header so read-only opens see a valid database
            sqlx::query("PRAGMA user_version = 1")
                .execute(&writer)
                .await?;
        }

        let read_options = SqliteConnectOptions::new()
            .filename(&path)
            .read_only(true)
            .busy_timeout(BUSY_TIMEOUT);

        let reader = SqlitePoolOptions::new()
            .max_connections(self.max_read_connections)
            .connect_with(read_options)
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to open reader for tenant '{}': {}", tenant, e),
            })?;

        info!(
            tenant_id = %tenant,
            path = %path.display(),
            created = !existed,
            "Tenant store opened"
        );

        Ok(TenantHandle {
            inner: Arc::new(HandleInner {
                tenant_id: tenant.clone(),
                path,
                writer,
                reader,
                lock: RwLock::new(()),
            }),
        })
    }

    /// Replace the named tables with `data` in one transaction
    ///
    /// Input is validated before anything is written; on any failure the
    /// store keeps its previous contents.
    pub async fn load_tabular(&self, tenant: &TenantId, data: &TabularData) -> Result<SchemaInfo> {
        data.validate()?;
        let handle = self.ensure_exists(tenant).await?;
        handle.replace_tables(data).await?;
        handle.schema().await
    }

    /// Current table/column inventory without touching any cache
    pub async fn describe(&self, tenant: &TenantId) -> Result<SchemaInfo> {
        self.ensure_exists(tenant).await?.schema().await
    }

    /// Number of tenant databases currently open
    pub fn open_count(&self) -> usize {
        self.handles
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    /// Probe that the storage root accepts writes
    pub async fn check_writable(&self) -> Result<()> {
        let probe = self.root.join(format!(".probe-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&probe, b"ok").await?;
        tokio::fs::remove_file(&probe).await?;
        Ok(())
    }

    /// Close every open tenant database
    pub async fn close_all(&self) {
        let handles: Vec<TenantHandle> = self
            .handles
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();
        self.handles.clear();

        for handle in &handles {
            handle.close().await;
        }
        info!(closed = handles.len(), "Tenant stores closed");
    }
}

struct HandleInner {
    tenant_id: TenantId,
    path: PathBuf,
    writer: SqlitePool,
    reader: SqlitePool,
    lock: RwLock<()>,
}

/// Open connection to exactly one tenant's database
#[derive(Clone)]
pub struct TenantHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for TenantHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantHandle")
            .field("tenant_id", &self.inner.tenant_id)
            .field("path", &self.inner.path)
            .finish()
    }
}

impl TenantHandle {
    pub fn tenant_id(&self) -> &TenantId {
        &self.inner.tenant_id
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Run a guarded read-only query, returning at most `max_rows` rows
    pub async fn query_readonly(&self, sql: &str, max_rows: usize) -> Result<Vec<Row>> {
        guard_read_only(sql)?;
        self.fetch_rows(sql, max_rows).await
    }

    /// Read path for statements composed here from quoted identifiers
    async fn fetch_rows(&self, sql: &str, max_rows: usize) -> Result<Vec<Row>> {
        let _guard = self.inner.lock.read().await;

        let mut rows = Vec::new();
        let mut stream = sqlx::query(sql).fetch(&self.inner.reader);
        while let Some(row) = stream.try_next().await? {
            if rows.len() >= max_rows {
                break;
            }
            rows.push(row_to_json(&row)?);
        }

        debug!(
            tenant_id = %self.inner.tenant_id,
            rows = rows.len(),
            "Read-only query executed"
        );
        Ok(rows)
    }

    /// Table/column inventory with row counts
    pub async fn schema(&self) -> Result<SchemaInfo> {
        let _guard = self.inner.lock.read().await;
        let pool = &self.inner.reader;

        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let quoted = quote_ident(&name);
            let columns = sqlx::query(&format!("PRAGMA table_info({})", quoted))
                .fetch_all(pool)
                .await?
                .iter()
                .map(|row| {
                    Ok(ColumnInfo {
                        name: row.try_get::<String, _>("name")?,
                        data_type: row.try_get::<String, _>("type")?,
                        nullable: row.try_get::<i64, _>("notnull")? == 0,
                        primary_key: row.try_get::<i64, _>("pk")? != 0,
                    })
                })
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

            let row_count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", quoted))
                .fetch_one(pool)
                .await?;

            tables.push(TableInfo {
                name,
                columns,
                row_count,
            });
        }

        Ok(SchemaInfo { tables })
    }

    /// First `limit` rows of a table known to exist
    pub async fn preview(&self, table: &str, limit: usize) -> Result<Vec<Row>> {
        self.fetch_rows(&format!("SELECT * FROM {}", quote_ident(table)), limit)
            .await
    }

    async fn replace_tables(&self, data: &TabularData) -> Result<()> {
        let _guard = self.inner.lock.write().await;
        let mut tx = self.inner.writer.begin().await?;

        for table in &data.tables {
            let name = quote_ident(&table.name);
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", name))
                .execute(&mut *tx)
                .await?;

            let columns = table
                .columns
                .iter()
                .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.as_sql()))
                .collect::<Vec<_>>()
                .join(", ");
            sqlx::query(&format!("CREATE TABLE {} ({})", name, columns))
                .execute(&mut *tx)
                .await?;

            let placeholders = vec!["?"; table.columns.len()].join(", ");
            let insert = format!("INSERT INTO {} VALUES ({})", name, placeholders);
            for row in &table.rows {
                let mut query = sqlx::query(&insert);
                for cell in row {
                    query = match cell {
                        Cell::Null => query.bind(None::<String>),
                        Cell::Integer(v) => query.bind(*v),
                        Cell::Real(v) => query.bind(*v),
                        Cell::Text(v) => query.bind(v.clone()),
                    };
                }
                query.execute(&mut *tx).await?;
            }
        }

        tx.commit().await?;

        info!(
            tenant_id = %self.inner.tenant_id,
            source = data.source.as_str(),
            tables = ?data.table_names(),
            "Tenant data replaced"
        );
        Ok(())
    }

    async fn close(&self) {
        self.inner.reader.close().await;
        self.inner.writer.close().await;
    }
}

fn row_to_json(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            serde_json::Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => serde_json::Value::from(row.try_get::<i64, _>(idx)?),
                "REAL" => serde_json::Number::from_f64(row.try_get::<f64, _>(idx)?)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
                "BLOB" => serde_json::Value::String(hex::encode(row.try_get::<Vec<u8>, _>(idx)?)),
                _ => serde_json::Value::String(row.try_get::<String, _>(idx)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabular::{Column, ColumnType, Table};

    fn store_in(dir: &Path) -> TenantStore {
        TenantStore::new(&StorageConfig {
            root_dir: dir.to_path_buf(),
            max_read_connections: 2,
        })
        .unwrap()
    }

    fn people(rows: usize) -> TabularData {
        TabularData {
            source: DataSource::Upload,
            tables: vec![Table {
                name: "people".into(),
                columns: vec![
                    Column { name: "name".into(), column_type: ColumnType::Text },
                    Column { name: "age".into(), column_type: ColumnType::Integer },
                ],
                rows: (0..rows)
                    .map(|i| vec![Cell::Text(format!("p{}", i)), Cell::Integer(20 + i as i64)])
                    .collect(),
            }],
        }
    }

    #[test]
    fn test_tenant_id_validation() {
        assert!(TenantId::parse("alice").is_ok());
        assert!(TenantId::parse("team_a-01").is_ok());
        let too_long = "a".repeat(51);
        for bad in ["", "../../etc", "a/b", "a b", "ünïcode", "x.db", too_long.as_str()] {
            assert!(
                matches!(TenantId::parse(bad), Err(AppError::InvalidTenantId { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_path_mapping_is_injective() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let upper = store.path_for(&TenantId::parse("Alice").unwrap()).unwrap();
        let lower = store.path_for(&TenantId::parse("alice").unwrap()).unwrap();

        assert_ne!(upper, lower);
        assert_eq!(upper, store.path_for(&TenantId::parse("Alice").unwrap()).unwrap());
        assert_eq!(upper.parent().unwrap(), store.root());
        assert!(lower.file_name().unwrap().to_str().unwrap().starts_with("alice-"));
    }

    #[tokio::test]
    async fn test_ensure_exists_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(dir.path()));
        let tenant = TenantId::parse("alice").unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let tenant = tenant.clone();
                tokio::spawn(async move { store.ensure_exists(&tenant).await.unwrap() })
            })
            .collect();
        let mut paths = Vec::new();
        for task in tasks {
            paths.push(task.await.unwrap().path().to_path_buf());
        }

        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        assert!(paths[0].exists());
        assert_eq!(store.open_count(), 1);
        let databases = std::fs::read_dir(store.root())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "db"))
            .count();
        assert_eq!(databases, 1);
    }

    #[tokio::test]
    async fn test_load_and_describe() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let tenant = TenantId::parse("alice").unwrap();

        let schema = store.load_tabular(&tenant, &people(3)).await.unwrap();
        let table = schema.table("people").unwrap();
        assert_eq!(table.column_names(), vec!["name", "age"]);
        assert_eq!(table.columns[1].data_type, "INTEGER");
        assert_eq!(table.row_count, 3);

        // reload replaces rather than appends
        let schema = store.load_tabular(&tenant, &people(5)).await.unwrap();
        assert_eq!(schema.table("people").unwrap().row_count, 5);
        assert_eq!(store.describe(&tenant).await.unwrap(), schema);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let tenant = TenantId::parse("alice").unwrap();

        let before = store.load_tabular(&tenant, &people(3)).await.unwrap();
        let path = store.path_for(&tenant).unwrap();
        let bytes_before = std::fs::read(&path).unwrap();

        let mut broken = people(2);
        broken.tables[0].rows.push(vec![Cell::Text("only one field".into())]);
        let err = store.load_tabular(&tenant, &broken).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidData { .. }));

        let mut empty = people(1);
        empty.tables[0].rows.clear();
        assert!(store.load_tabular(&tenant, &empty).await.is_err());

        assert_eq!(std::fs::read(&path).unwrap(), bytes_before);
        assert_eq!(store.describe(&tenant).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let alice = TenantId::parse("alice").unwrap();
        let bob = TenantId::parse("bob").unwrap();

        store.load_tabular(&alice, &people(3)).await.unwrap();
        let bob_handle = store.ensure_exists(&bob).await.unwrap();
        assert_ne!(bob_handle.path(), store.path_for(&alice).unwrap());
        assert!(bob_handle.schema().await.unwrap().is_empty());

        let alice_path = store.path_for(&alice).unwrap();
        let attach = format!("ATTACH DATABASE '{}' AS other", alice_path.display());
        assert!(matches!(
            bob_handle.query_readonly(&attach, 10).await,
            Err(AppError::IsolationViolation { .. })
        ));
        let vacuum = format!("VACUUM INTO '{}/copy.db'", dir.path().display());
        assert!(matches!(
            bob_handle.query_readonly(&vacuum, 10).await,
            Err(AppError::IsolationViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_query_readonly() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let tenant = TenantId::parse("alice").unwrap();
        store.load_tabular(&tenant, &sample_dataset()).await.unwrap();
        let handle = store.ensure_exists(&tenant).await.unwrap();

        let rows = handle
            .query_readonly("SELECT COUNT(*) AS n FROM customers", 10)
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], serde_json::json!(5));

        let rows = handle.query_readonly("SELECT * FROM orders", 3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["price"], serde_json::json!(999.99));

        for bad in ["DELETE FROM orders", "SELECT 1; DROP TABLE orders", "PRAGMA table_info(orders)", "  "] {
            assert!(matches!(
                handle.query_readonly(bad, 10).await,
                Err(AppError::AgentError { .. })
            ));
        }
        assert_eq!(handle.schema().await.unwrap().table("orders").unwrap().row_count, 8);
    }

    #[test]
    fn test_guard_ignores_quoted_text() {
        for ok in [
            "SELECT * FROM orders WHERE product = 'Vacuum cleaner'",
            "SELECT * FROM \"pragma\" LIMIT 5",
            "SELECT 'a;b', [attach] FROM `detach`",
            "SELECT 'it''s; vacuum' AS v",
            "/* pragma */ SELECT 1 -- attach\n",
        ] {
            assert!(guard_read_only(ok).is_ok(), "{ok:?} should be accepted");
        }

        assert!(matches!(
            guard_read_only("SELECT 'x'; ATTACH DATABASE 'other.db' AS o"),
            Err(AppError::IsolationViolation { .. })
        ));
        assert!(matches!(
            guard_read_only("SELECT 'x' ; DROP TABLE \"orders\""),
            Err(AppError::AgentError { .. })
        ));
        assert!(matches!(
            guard_read_only("PRAGMA \"table_info\"(orders)"),
            Err(AppError::AgentError { .. })
        ));
        assert_eq!(mask_quoted("SELECT 'a''b' FROM \"t\""), "SELECT '' FROM \"\"");
    }

    #[tokio::test]
    async fn test_keyword_named_tables_are_readable() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let tenant = TenantId::parse("alice").unwrap();

        for name in ["pragma", "vacuum"] {
            let mut data = people(2);
            data.tables[0].name = name.to_string();
            store.load_tabular(&tenant, &data).await.unwrap();
        }
        let handle = store.ensure_exists(&tenant).await.unwrap();

        assert_eq!(handle.preview("pragma", 3).await.unwrap().len(), 2);
        assert_eq!(handle.preview("vacuum", 3).await.unwrap().len(), 2);
        let rows = handle
            .query_readonly("SELECT name FROM \"vacuum\" WHERE name = 'p1'", 10)
            .await
            .unwrap();
        assert_eq!(rows[0]["name"], "p1");
    }

    #[tokio::test]
    async fn test_close_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.ensure_exists(&TenantId::parse("a").unwrap()).await.unwrap();
        store.ensure_exists(&TenantId::parse("b").unwrap()).await.unwrap();
        assert_eq!(store.open_count(), 2);

        store.close_all().await;
        assert_eq!(store.open_count(), 0);
        store.check_writable().await.unwrap();
    }
}
