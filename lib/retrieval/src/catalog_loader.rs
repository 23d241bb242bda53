//! Schema catalog introspection.
//!
//! A [`CatalogSource`] opens a [`CatalogConnection`] that lists tables and
//! describes them one at a time. [`SchemaCatalogLoader`] runs that blocking
//! work on the blocking pool and memoizes the resulting [`Catalog`].

use parking_lot::RwLock;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use schemaseek_core::{Catalog, ColumnInfo, Error, Result, SkippedTable, TableInfo};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub trait CatalogConnection: Send {
    fn list_tables(&mut self) -> Result<Vec<String>>;
    fn describe_table(&mut self, table_name: &str) -> Result<TableInfo>;
}

pub trait CatalogSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn CatalogConnection>>;

    /// Short label for log lines
    fn describe(&self) -> String {
        "catalog".to_string()
    }
}

/// Introspect every table of `source`.
///
/// Connecting and listing are fatal (`MetadataUnavailable`); a table that
/// fails to describe is skipped and reported in [`Catalog::skipped`].
pub fn introspect(source: &dyn CatalogSource) -> Result<Catalog> {
    let mut conn = source.open().map_err(into_metadata_unavailable)?;
    let names = conn.list_tables().map_err(into_metadata_unavailable)?;

    let mut tables = Vec::with_capacity(names.len());
    let mut skipped = Vec::new();
    for name in names {
        match conn.describe_table(&name) {
            Ok(mut table) => {
                table.table_name = name;
                tables.push(table);
            }
            Err(e) => {
                warn!(table = %name, error = %e, "Skipping table that failed introspection");
                skipped.push(SkippedTable {
                    table: name,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(Catalog::new(tables, skipped))
}

fn into_metadata_unavailable(e: Error) -> Error {
    match e {
        Error::MetadataUnavailable(_) => e,
        other => Error::MetadataUnavailable(other.to_string()),
    }
}

struct CachedCatalog {
    catalog: Arc<Catalog>,
    loaded_at: Instant,
}

/// Memoized catalog of one datasource
pub struct SchemaCatalogLoader {
    source: Arc<dyn CatalogSource>,
    ttl: Option<Duration>,
    cache: tokio::sync::Mutex<Option<CachedCatalog>>,
}

impl SchemaCatalogLoader {
    pub fn new(source: Arc<dyn CatalogSource>, ttl: Option<Duration>) -> Self {
        Self {
            source,
            ttl,
            cache: tokio::sync::Mutex::new(None),
        }
    }

    /// The cached catalog, introspecting first if there is none or it has
    /// expired. Concurrent callers wait for a single introspection.
    pub async fn load_all(&self) -> Result<Arc<Catalog>> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            let fresh = self.ttl.map_or(true, |ttl| cached.loaded_at.elapsed() < ttl);
            if fresh {
                return Ok(cached.catalog.clone());
            }
        }

        let source = self.source.clone();
        let started = Instant::now();
        let catalog = tokio::task::spawn_blocking(move || introspect(source.as_ref()))
            .await
            .map_err(|e| Error::MetadataUnavailable(format!("introspection task failed: {}", e)))??;

        info!(
            source = %self.source.describe(),
            tables = catalog.len(),
            skipped = catalog.skipped().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Loaded schema catalog"
        );

        let catalog = Arc::new(catalog);
        *cache = Some(CachedCatalog {
            catalog: catalog.clone(),
            loaded_at: Instant::now(),
        });
        Ok(catalog)
    }

    /// Drop the cached catalog; the next `load_all` introspects again
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// The cached catalog without loading, if one is present and not
    /// currently being refreshed
    pub fn cached(&self) -> Option<Arc<Catalog>> {
        self.cache
            .try_lock()
            .ok()
            .and_then(|cache| cache.as_ref().map(|c| c.catalog.clone()))
    }
}

// ---------------------------------------------------------------------------
// In-memory source

/// Tables supplied by the embedding application. The table list can be
/// swapped at runtime; call [`SchemaCatalogLoader::invalidate`] afterwards.
#[derive(Default)]
pub struct StaticCatalogSource {
    tables: RwLock<Vec<TableInfo>>,
}

impl StaticCatalogSource {
    pub fn new(tables: Vec<TableInfo>) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub fn replace(&self, tables: Vec<TableInfo>) {
        *self.tables.write() = tables;
    }
}

impl CatalogSource for StaticCatalogSource {
    fn open(&self) -> Result<Box<dyn CatalogConnection>> {
        let tables = self
            .tables
            .read()
            .iter()
            .map(|t| (t.table_name.clone(), t.clone()))
            .collect();
        Ok(Box::new(StaticConnection { tables }))
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

struct StaticConnection {
    tables: BTreeMap<String, TableInfo>,
}

impl CatalogConnection for StaticConnection {
    fn list_tables(&mut self) -> Result<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    fn describe_table(&mut self, table_name: &str) -> Result<TableInfo> {
        self.tables.get(table_name).cloned().ok_or_else(|| Error::TableIntrospection {
            table: table_name.to_string(),
            reason: "no such table".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// JSON file source

/// Catalog exported to a JSON file:
/// `{"tables": {"<name>": {"table_comment", "schema", "columns", "foreign_keys"}}}`
pub struct JsonCatalogSource {
    path: PathBuf,
}

impl JsonCatalogSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[derive(Deserialize)]
struct JsonCatalogFile {
    tables: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct JsonTable {
    #[serde(default)]
    table_comment: Option<String>,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    columns: BTreeMap<String, ColumnInfo>,
    #[serde(default)]
    foreign_keys: Vec<String>,
}

impl CatalogSource for JsonCatalogSource {
    fn open(&self) -> Result<Box<dyn CatalogConnection>> {
        let bytes = std::fs::read(&self.path).map_err(|e| {
            Error::MetadataUnavailable(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let file: JsonCatalogFile = serde_json::from_slice(&bytes).map_err(|e| {
            Error::MetadataUnavailable(format!("invalid catalog file {}: {}", self.path.display(), e))
        })?;
        Ok(Box::new(JsonConnection { tables: file.tables }))
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

struct JsonConnection {
    tables: serde_json::Map<String, serde_json::Value>,
}

impl CatalogConnection for JsonConnection {
    fn list_tables(&mut self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn describe_table(&mut self, table_name: &str) -> Result<TableInfo> {
        let value = self.tables.get(table_name).cloned().ok_or_else(|| Error::TableIntrospection {
            table: table_name.to_string(),
            reason: "no such table".to_string(),
        })?;
        let table: JsonTable = serde_json::from_value(value).map_err(|e| Error::TableIntrospection {
            table: table_name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(TableInfo {
            table_name: table_name.to_string(),
            schema: table.schema,
            columns: table.columns,
            foreign_keys: table.foreign_keys,
            table_comment: table.table_comment,
        })
    }
}

// ---------------------------------------------------------------------------
// SQLite source

/// Read-only introspection of a SQLite database file.
///
/// SQLite has no comment catalog, so comments come from `--` comments in
/// the stored `CREATE TABLE` statement: a comment on the `CREATE TABLE`
/// line or above the first column describes the table, and a comment at
/// the end of a column line describes that column.
pub struct SqliteCatalogSource {
    path: PathBuf,
}

impl SqliteCatalogSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl CatalogSource for SqliteCatalogSource {
    fn open(&self) -> Result<Box<dyn CatalogConnection>> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::MetadataUnavailable(format!("cannot open {}: {}", self.path.display(), e)))?;
        Ok(Box::new(SqliteConnection { conn }))
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    fn describe(&self, table_name: &str) -> rusqlite::Result<Option<TableInfo>> {
        let ddl: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table_name],
                |row| row.get(0),
            )
            .optional()?;
        let Some(ddl) = ddl else {
            return Ok(None);
        };
        let comments = parse_ddl_comments(ddl.as_deref().unwrap_or(""));

        let mut table = TableInfo::new(table_name);
        table.table_comment = comments.table_comment.clone();

        let mut stmt = self
            .conn
            .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt.query_map([table_name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for column in columns {
            let (name, data_type) = column?;
            let comment = comments.column_comment(&name).map(str::to_string);
            table.columns.insert(name, ColumnInfo::new(data_type, comment));
        }

        let mut stmt = self
            .conn
            .prepare("SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq")?;
        let keys: Vec<(String, String, Option<String>)> = stmt
            .query_map([table_name], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<_>>()?;
        for (column, referred_table, referred_column) in keys {
            let referred_column = match referred_column {
                Some(c) => c,
                None => self.primary_key(&referred_table)?.unwrap_or_else(|| "rowid".to_string()),
            };
            table = table.with_foreign_key(&column, &referred_table, &referred_column);
        }

        Ok(Some(table))
    }

    // `REFERENCES t` without a column points at t's primary key
    fn primary_key(&self, table_name: &str) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT name FROM pragma_table_info(?1) WHERE pk = 1",
                [table_name],
                |row| row.get(0),
            )
            .optional()
    }
}

impl CatalogConnection for SqliteConnection {
    fn list_tables(&mut self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .map_err(|e| Error::MetadataUnavailable(e.to_string()))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
            .map_err(|e| Error::MetadataUnavailable(e.to_string()))?;
        Ok(names)
    }

    fn describe_table(&mut self, table_name: &str) -> Result<TableInfo> {
        match self.describe(table_name) {
            Ok(Some(table)) => Ok(table),
            Ok(None) => Err(Error::TableIntrospection {
                table: table_name.to_string(),
                reason: "no such table".to_string(),
            }),
            Err(e) => Err(Error::TableIntrospection {
                table: table_name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[derive(Debug, Default, PartialEq)]
struct DdlComments {
    table_comment: Option<String>,
    columns: HashMap<String, String>,
}

impl DdlComments {
    fn column_comment(&self, column: &str) -> Option<&str> {
        self.columns
            .get(column)
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(column))
                    .map(|(_, comment)| comment)
            })
            .map(String::as_str)
    }
}

const CONSTRAINT_KEYWORDS: [&str; 5] = ["constraint", "primary", "foreign", "unique", "check"];

fn parse_ddl_comments(ddl: &str) -> DdlComments {
    let mut out = DdlComments::default();
    let mut seen_column = false;

    for (i, line) in ddl.lines().enumerate() {
        let (code, comment) = match line.find("--") {
            Some(pos) => (&line[..pos], Some(line[pos + 2..].trim())),
            None => (line, None),
        };
        let comment = comment.filter(|c| !c.is_empty());

        if i == 0 {
            if out.table_comment.is_none() {
                out.table_comment = comment.map(str::to_string);
            }
            continue;
        }

        let code = code.trim().trim_start_matches('(').trim();
        if code.is_empty() || code.starts_with(')') {
            if !seen_column && out.table_comment.is_none() {
                out.table_comment = comment.map(str::to_string);
            }
            continue;
        }

        let Some(name) = leading_identifier(code) else {
            continue;
        };
        if CONSTRAINT_KEYWORDS.iter().any(|k| name.eq_ignore_ascii_case(k)) {
            continue;
        }
        seen_column = true;
        if let Some(comment) = comment {
            out.columns.insert(name.to_string(), comment.to_string());
        }
    }
    out
}

// First identifier of a column definition, without its quotes
fn leading_identifier(code: &str) -> Option<&str> {
    let close = match code.chars().next()? {
        '"' => '"',
        '`' => '`',
        '[' => ']',
        _ => {
            let end = code
                .find(|c: char| c.is_whitespace() || c == ',' || c == '(')
                .unwrap_or(code.len());
            return Some(&code[..end]).filter(|s| !s.is_empty());
        }
    };
    let rest = &code[1..];
    rest.find(close).map(|end| &rest[..end])
}
