use crate::fingerprint::SchemaFingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column metadata as reported by the database
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnInfo {
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnInfo {
    #[must_use]
    pub fn new(data_type: impl Into<String>, comment: Option<String>) -> Self {
        Self {
            data_type: data_type.into(),
            comment: normalize_comment(comment),
        }
    }
}

/// Metadata of one table.
///
/// Columns live in a `BTreeMap`, so every walk over them is in name order
/// no matter how the database reported them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableInfo {
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnInfo>,
    /// `"<column> -> <referred_table>.<referred_column>"`
    #[serde(default)]
    pub foreign_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_comment: Option<String>,
}

impl TableInfo {
    #[must_use]
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            schema: None,
            columns: BTreeMap::new(),
            foreign_keys: Vec::new(),
            table_comment: None,
        }
    }

    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.table_comment = normalize_comment(Some(comment.into()));
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        data_type: impl Into<String>,
        comment: Option<&str>,
    ) -> Self {
        self.columns.insert(
            name.into(),
            ColumnInfo::new(data_type, comment.map(str::to_string)),
        );
        self
    }

    #[must_use]
    pub fn with_foreign_key(mut self, column: &str, referred_table: &str, referred_column: &str) -> Self {
        self.foreign_keys.push(format_foreign_key(column, referred_table, referred_column));
        self
    }

    /// Blank comments become `None` so they never reach documents or
    /// fingerprints as empty strings.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.table_comment = normalize_comment(self.table_comment.take());
        for column in self.columns.values_mut() {
            column.comment = normalize_comment(column.comment.take());
        }
        self
    }

    /// Table name with its schema qualifier, if any
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table_name),
            None => self.table_name.clone(),
        }
    }
}

/// A table that could not be introspected and was left out of the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedTable {
    pub table: String,
    pub reason: String,
}

/// Snapshot of every table of one datasource, keyed and ordered by name
#[derive(Debug, Clone)]
pub struct Catalog {
    tables: BTreeMap<String, TableInfo>,
    skipped: Vec<SkippedTable>,
    fingerprint: SchemaFingerprint,
}

impl Catalog {
    pub fn new(tables: impl IntoIterator<Item = TableInfo>, skipped: Vec<SkippedTable>) -> Self {
        let tables: BTreeMap<String, TableInfo> = tables
            .into_iter()
            .map(|t| {
                let t = t.normalized();
                (t.table_name.clone(), t)
            })
            .collect();
        let fingerprint = SchemaFingerprint::compute(&tables);
        Self {
            tables,
            skipped,
            fingerprint,
        }
    }

    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    #[inline]
    pub fn tables(&self) -> &BTreeMap<String, TableInfo> {
        &self.tables
    }

    #[inline]
    pub fn get(&self, table_name: &str) -> Option<&TableInfo> {
        self.tables.get(table_name)
    }

    #[inline]
    pub fn contains(&self, table_name: &str) -> bool {
        self.tables.contains_key(table_name)
    }

    #[inline]
    pub fn skipped(&self) -> &[SkippedTable] {
        &self.skipped
    }

    #[inline]
    pub fn fingerprint(&self) -> &SchemaFingerprint {
        &self.fingerprint
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Table names in sorted order
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}

pub fn format_foreign_key(column: &str, referred_table: &str, referred_column: &str) -> String {
    format!("{} -> {}.{}", column, referred_table, referred_column)
}

fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}
