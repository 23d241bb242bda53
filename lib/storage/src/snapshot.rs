// Vector index snapshots: a bincode ANN file plus a JSON sidecar per datasource
use atomicwrites::{AtomicFile, OverwriteBehavior};
use chrono::{DateTime, Utc};
use schemaseek_core::{Error, FlatIpIndex, Result, SchemaFingerprint};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;
pub const ANN_FILE: &str = "schema_index.ann";
pub const SIDECAR_FILE: &str = "schema_index.json";

/// Sidecar bookkeeping written next to the ANN file.
///
/// The sidecar is written after the ANN file, so a crash between the two
/// writes leaves a sidecar whose checksum no longer matches and the
/// snapshot is rejected as a whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotMeta {
    pub format_version: u32,
    pub table_names: Vec<String>,
    pub corpus: Vec<String>,
    pub fingerprint: SchemaFingerprint,
    pub dimension: usize,
    /// SHA-256 hex of the ANN file bytes
    pub ann_checksum: String,
    pub updated_at: DateTime<Utc>,
}

/// A complete persisted index. Row `i` of `index`, `table_names[i]` and
/// `corpus[i]` describe the same table.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndexSnapshot {
    pub table_names: Vec<String>,
    pub corpus: Vec<String>,
    pub fingerprint: SchemaFingerprint,
    pub index: FlatIpIndex,
    pub updated_at: DateTime<Utc>,
}

impl VectorIndexSnapshot {
    pub fn new(
        table_names: Vec<String>,
        corpus: Vec<String>,
        fingerprint: SchemaFingerprint,
        index: FlatIpIndex,
    ) -> Self {
        Self {
            table_names,
            corpus,
            fingerprint,
            index,
            updated_at: Utc::now(),
        }
    }

    fn check_consistency(&self) -> Result<()> {
        self.index.validate()?;
        if self.table_names.len() != self.corpus.len() || self.table_names.len() != self.index.len() {
            return Err(Error::IndexCorrupt(format!(
                "{} table names, {} documents, {} vectors",
                self.table_names.len(),
                self.corpus.len(),
                self.index.len()
            )));
        }
        Ok(())
    }
}

/// Snapshot files of one datasource under `<data_dir>/<datasource>/`
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn for_datasource<P: AsRef<Path>>(data_dir: P, datasource_id: &str) -> Self {
        Self::new(data_dir.as_ref().join(sanitize_datasource_id(datasource_id)))
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    pub fn ann_path(&self) -> PathBuf {
        self.dir.join(ANN_FILE)
    }

    #[inline]
    pub fn sidecar_path(&self) -> PathBuf {
        self.dir.join(SIDECAR_FILE)
    }

    pub fn exists(&self) -> bool {
        self.sidecar_path().exists()
    }

    /// Persist both files. The ANN file goes first, then the sidecar.
    pub fn save(&self, snapshot: &VectorIndexSnapshot) -> Result<()> {
        snapshot.check_consistency()?;
        fs::create_dir_all(&self.dir)?;

        let ann_bytes = bincode::serialize(&snapshot.index)
            .map_err(|e| Error::Serialization(format!("ANN encode failed: {}", e)))?;
        let meta = SnapshotMeta {
            format_version: FORMAT_VERSION,
            table_names: snapshot.table_names.clone(),
            corpus: snapshot.corpus.clone(),
            fingerprint: snapshot.fingerprint.clone(),
            dimension: snapshot.index.dimension(),
            ann_checksum: checksum(&ann_bytes),
            updated_at: snapshot.updated_at,
        };
        let sidecar_bytes = serde_json::to_vec_pretty(&meta)?;

        write_atomic(&self.ann_path(), &ann_bytes)?;
        write_atomic(&self.sidecar_path(), &sidecar_bytes)?;

        tracing::debug!(
            dir = %self.dir.display(),
            tables = meta.table_names.len(),
            dimension = meta.dimension,
            "Saved vector index snapshot"
        );
        Ok(())
    }

    /// Read only the sidecar. `Ok(None)` when there is no snapshot.
    pub fn read_meta(&self) -> Result<Option<SnapshotMeta>> {
        let bytes = match fs::read(self.sidecar_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: SnapshotMeta = serde_json::from_slice(&bytes)
            .map_err(|e| Error::IndexCorrupt(format!("unreadable sidecar: {}", e)))?;
        if meta.format_version != FORMAT_VERSION {
            return Err(Error::IndexCorrupt(format!(
                "unsupported format version {}",
                meta.format_version
            )));
        }
        Ok(Some(meta))
    }

    /// Load and verify the full snapshot. `Ok(None)` when there is no
    /// snapshot; `IndexCorrupt` when the two files disagree in any way.
    pub fn load(&self) -> Result<Option<VectorIndexSnapshot>> {
        let Some(meta) = self.read_meta()? else {
            return Ok(None);
        };
        let ann_bytes = match fs::read(self.ann_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::IndexCorrupt("sidecar present but ANN file missing".into()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(decode(meta, &ann_bytes)?))
    }

    /// Load the snapshot only if it was built for `fingerprint`.
    /// A snapshot for another fingerprint is `Ok(None)` and its ANN file is
    /// never read.
    pub fn load_matching(&self, fingerprint: &SchemaFingerprint) -> Result<Option<VectorIndexSnapshot>> {
        match self.read_meta()? {
            Some(meta) if &meta.fingerprint == fingerprint => self.load(),
            _ => Ok(None),
        }
    }

    /// Delete both files, ignoring ones already gone
    pub fn remove(&self) -> Result<()> {
        for path in [self.sidecar_path(), self.ann_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn decode(meta: SnapshotMeta, ann_bytes: &[u8]) -> Result<VectorIndexSnapshot> {
    if checksum(ann_bytes) != meta.ann_checksum {
        return Err(Error::IndexCorrupt("ANN checksum mismatch".into()));
    }
    let index: FlatIpIndex = bincode::deserialize(ann_bytes)
        .map_err(|e| Error::IndexCorrupt(format!("ANN decode failed: {}", e)))?;
    if index.dimension() != meta.dimension {
        return Err(Error::IndexCorrupt(format!(
            "dimension {} in sidecar, {} in ANN file",
            meta.dimension,
            index.dimension()
        )));
    }

    let snapshot = VectorIndexSnapshot {
        table_names: meta.table_names,
        corpus: meta.corpus,
        fingerprint: meta.fingerprint,
        index,
        updated_at: meta.updated_at,
    };
    snapshot.check_consistency()?;
    Ok(snapshot)
}

fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|f| f.write_all(bytes))
        .map_err(|e| Error::Storage(format!("failed to write {}: {}", path.display(), e)))
}

/// Directory name for a datasource id: ASCII alphanumerics, `-`, `_` and
/// `.` are kept, everything else becomes `_`, followed by `-` and the first
/// 8 hex digits of the SHA-256 of the raw id. Ids that sanitize alike
/// (`sales/eu`, `sales_eu`) still get separate directories.
pub fn sanitize_datasource_id(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = checksum(id.as_bytes());
    format!("{}-{}", sanitized, &digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemaseek_core::Vector;
    use tempfile::TempDir;

    fn snapshot(fingerprint: &str) -> VectorIndexSnapshot {
        let mut index = FlatIpIndex::new(3);
        index.add(&Vector::new(vec![1.0, 0.0, 0.0])).unwrap();
        index.add(&Vector::new(vec![0.0, 1.0, 0.0])).unwrap();
        VectorIndexSnapshot::new(
            vec!["customers".into(), "orders".into()],
            vec!["customers name".into(), "orders amount".into()],
            SchemaFingerprint::from_hex(fingerprint),
            index,
        )
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(store.load().unwrap().is_none());

        let original = snapshot("abc");
        store.save(&original).unwrap();
        assert!(store.exists());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_load_matching_skips_other_fingerprints() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.save(&snapshot("abc")).unwrap();

        assert!(store.load_matching(&SchemaFingerprint::from_hex("abc")).unwrap().is_some());
        assert!(store.load_matching(&SchemaFingerprint::from_hex("def")).unwrap().is_none());
    }

    #[test]
    fn test_tampered_ann_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.save(&snapshot("abc")).unwrap();

        let mut bytes = fs::read(store.ann_path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(store.ann_path(), bytes).unwrap();

        assert!(matches!(store.load(), Err(Error::IndexCorrupt(_))));
    }

    #[test]
    fn test_missing_ann_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.save(&snapshot("abc")).unwrap();
        fs::remove_file(store.ann_path()).unwrap();

        assert!(matches!(store.load(), Err(Error::IndexCorrupt(_))));
    }

    #[test]
    fn test_garbage_sidecar_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.save(&snapshot("abc")).unwrap();
        fs::write(store.sidecar_path(), b"{not json").unwrap();

        assert!(matches!(store.load(), Err(Error::IndexCorrupt(_))));
    }

    #[test]
    fn test_row_count_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let mut bad = snapshot("abc");
        bad.table_names.push("extra".into());
        assert!(store.save(&bad).is_err());
        assert!(!store.exists());
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.save(&snapshot("abc")).unwrap();
        store.remove().unwrap();
        assert!(store.load().unwrap().is_none());
        store.remove().unwrap();
    }

    #[test]
    fn test_sanitize_datasource_id() {
        let name = sanitize_datasource_id("../etc/passwd");
        assert!(name.starts_with(".._etc_passwd-"));
        assert!(!name.contains('/'));
        assert!(sanitize_datasource_id("sales-db_1").starts_with("sales-db_1-"));
        assert!(sanitize_datasource_id("客户 db").starts_with("___db-"));
        assert_eq!(sanitize_datasource_id("").len(), 9);
        assert_ne!(sanitize_datasource_id(".."), "..");
        assert_eq!(sanitize_datasource_id("sales"), sanitize_datasource_id("sales"));
    }

    #[test]
    fn test_ids_that_sanitize_alike_get_distinct_dirs() {
        assert_ne!(sanitize_datasource_id("sales/eu"), sanitize_datasource_id("sales_eu"));
        assert_ne!(sanitize_datasource_id("a b"), sanitize_datasource_id("a:b"));
    }

    #[test]
    fn test_for_datasource_layout() {
        let store = SnapshotStore::for_datasource("/data", "prod/main");
        let dir = PathBuf::from("/data").join(sanitize_datasource_id("prod/main"));
        assert!(dir.to_string_lossy().contains("prod_main-"));
        assert_eq!(store.ann_path(), dir.join("schema_index.ann"));
        assert_eq!(store.sidecar_path(), dir.join("schema_index.json"));
    }
}
