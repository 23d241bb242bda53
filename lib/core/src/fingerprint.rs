//! Content fingerprint of a schema catalog.
//!
//! The fingerprint covers exactly what ends up in table documents: table
//! names, table comments and `column:comment` pairs. It decides whether a
//! persisted vector index can be reused or has to be rebuilt.

use crate::catalog::TableInfo;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaFingerprint(String);

impl SchemaFingerprint {
    /// Hash a name-keyed table map.
    ///
    /// Tables are visited in sorted name order and each table's
    /// `column:comment` pairs are sorted before hashing. Every field is
    /// length-prefixed so adjacent values cannot run into each other.
    pub fn compute(tables: &BTreeMap<String, TableInfo>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((tables.len() as u64).to_le_bytes());

        for (name, table) in tables {
            update_field(&mut hasher, name);
            update_field(&mut hasher, table.table_comment.as_deref().unwrap_or(""));

            let mut pairs: Vec<String> = table
                .columns
                .iter()
                .map(|(column, info)| format!("{}:{}", column, info.comment.as_deref().unwrap_or("")))
                .collect();
            pairs.sort();

            hasher.update((pairs.len() as u64).to_le_bytes());
            for pair in &pairs {
                update_field(&mut hasher, pair);
            }
        }

        Self(format!("{:x}", hasher.finalize()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a fingerprint read back from a snapshot sidecar
    #[inline]
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }
}

impl fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn update_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}
