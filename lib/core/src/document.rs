use crate::catalog::{Catalog, TableInfo};

/// Render one table as the flat text document shared by BM25 and the
/// embedding model.
///
/// Order is fixed: table name, table comment, then every column name
/// followed by its comment, columns in name order. The output is hashed
/// and embedded, so it must not depend on anything but the table content.
pub fn build_document(table_name: &str, table: &TableInfo) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(2 + table.columns.len() * 2);
    parts.push(table_name);
    if let Some(comment) = table.table_comment.as_deref() {
        parts.push(comment);
    }
    for (column, info) in &table.columns {
        parts.push(column);
        if let Some(comment) = info.comment.as_deref() {
            parts.push(comment);
        }
    }
    parts.join(" ")
}

/// Documents for every table of a catalog, in table-name order
pub fn build_corpus(catalog: &Catalog) -> Vec<String> {
    catalog
        .tables()
        .iter()
        .map(|(name, table)| build_document(name, table))
        .collect()
}
