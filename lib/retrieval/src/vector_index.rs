//! Persisted semantic index over table documents.
//!
//! The index is keyed by the catalog fingerprint. While the fingerprint is
//! unchanged it is reused in memory, or loaded from the snapshot store after
//! a restart, without a single embedding call. Any change, a corrupt
//! snapshot or an explicit force triggers a full rebuild.

use crate::config::RetrievalConfig;
use crate::embedder::Embedder;
use parking_lot::RwLock;
use schemaseek_core::{build_corpus, Catalog, Error, FlatIpIndex, Result, SchemaFingerprint, Vector};
use schemaseek_storage::{SnapshotStore, VectorIndexSnapshot};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Unbuilt,
    Building,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum BuildOutcome {
    /// the in-memory index already matched the catalog
    Reused,
    /// adopted a persisted snapshot
    Loaded,
    /// embedded every document again
    Rebuilt { failed_documents: usize },
    /// no document could be embedded; there is no vector signal
    Unavailable,
}

struct LoadedIndex {
    fingerprint: SchemaFingerprint,
    table_names: Vec<String>,
    index: FlatIpIndex,
}

impl From<VectorIndexSnapshot> for LoadedIndex {
    fn from(snapshot: VectorIndexSnapshot) -> Self {
        Self {
            fingerprint: snapshot.fingerprint,
            table_names: snapshot.table_names,
            index: snapshot.index,
        }
    }
}

pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    store: SnapshotStore,
    batch_size: usize,
    timeout: Duration,
    retry_cooldown: Duration,
    build_lock: tokio::sync::Mutex<()>,
    ready: RwLock<Option<Arc<LoadedIndex>>>,
    state: RwLock<IndexState>,
    // fingerprint whose last build embedded nothing, and when
    unavailable: RwLock<Option<(SchemaFingerprint, Instant)>>,
}

// Puts the state back if a build is dropped or fails before committing.
struct BuildGuard<'a> {
    state: &'a RwLock<IndexState>,
    previous: IndexState,
    committed: bool,
}

impl<'a> BuildGuard<'a> {
    fn enter(state: &'a RwLock<IndexState>) -> Self {
        let previous = std::mem::replace(&mut *state.write(), IndexState::Building);
        Self {
            state,
            previous,
            committed: false,
        }
    }

    fn commit(mut self, state: IndexState) {
        *self.state.write() = state;
        self.committed = true;
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            *self.state.write() = self.previous;
        }
    }
}

impl VectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>, store: SnapshotStore, config: &RetrievalConfig) -> Self {
        Self {
            embedder,
            store,
            batch_size: config.embed_batch_size.max(1),
            timeout: config.embed_timeout(),
            retry_cooldown: config.embed_retry_cooldown(),
            build_lock: tokio::sync::Mutex::new(()),
            ready: RwLock::new(None),
            state: RwLock::new(IndexState::Unbuilt),
            unavailable: RwLock::new(None),
        }
    }

    #[inline]
    pub fn state(&self) -> IndexState {
        *self.state.read()
    }

    #[inline]
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Fingerprint of the index currently serving searches
    pub fn fingerprint(&self) -> Option<SchemaFingerprint> {
        self.ready.read().as_ref().map(|r| r.fingerprint.clone())
    }

    /// Rows in the serving index
    pub fn len(&self) -> usize {
        self.ready.read().as_ref().map_or(0, |r| r.index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Option<Arc<LoadedIndex>> {
        self.ready.read().clone()
    }

    fn cooling_down(&self, fingerprint: &SchemaFingerprint) -> bool {
        self.unavailable
            .read()
            .as_ref()
            .is_some_and(|(fp, at)| fp == fingerprint && at.elapsed() < self.retry_cooldown)
    }

    fn matches(&self, fingerprint: &SchemaFingerprint) -> bool {
        self.ready
            .read()
            .as_ref()
            .is_some_and(|r| &r.fingerprint == fingerprint)
    }

    /// Make the serving index match `catalog`, loading or rebuilding as
    /// needed. `force` skips both the in-memory and the persisted index.
    ///
    /// After a build that embedded nothing, further rebuilds for the same
    /// fingerprint are skipped (`Unavailable`) until the retry cooldown has
    /// passed, unless forced.
    pub async fn ensure_built(&self, catalog: &Catalog, force: bool) -> BuildOutcome {
        let fingerprint = catalog.fingerprint();
        if !force && self.matches(fingerprint) {
            return BuildOutcome::Reused;
        }

        let _lock = self.build_lock.lock().await;
        // another caller may have finished the build while we waited
        if !force && self.matches(fingerprint) {
            return BuildOutcome::Reused;
        }

        let guard = BuildGuard::enter(&self.state);

        if !force {
            if let Some(loaded) = self.load_snapshot(catalog).await {
                *self.ready.write() = Some(Arc::new(loaded));
                guard.commit(IndexState::Ready);
                info!(fingerprint = %fingerprint, tables = catalog.len(), "Loaded vector index snapshot");
                return BuildOutcome::Loaded;
            }
        }

        if !force && self.cooling_down(fingerprint) {
            debug!(fingerprint = %fingerprint, "Embedding service failed recently, not rebuilding yet");
            return BuildOutcome::Unavailable;
        }

        match self.rebuild(catalog).await {
            Some((loaded, failed_documents)) => {
                *self.ready.write() = Some(Arc::new(loaded));
                *self.unavailable.write() = None;
                guard.commit(IndexState::Ready);
                BuildOutcome::Rebuilt { failed_documents }
            }
            None => {
                *self.ready.write() = None;
                *self.unavailable.write() = Some((fingerprint.clone(), Instant::now()));
                guard.commit(IndexState::Unbuilt);
                BuildOutcome::Unavailable
            }
        }
    }

    async fn load_snapshot(&self, catalog: &Catalog) -> Option<LoadedIndex> {
        let store = self.store.clone();
        let fingerprint = catalog.fingerprint().clone();
        let loaded = tokio::task::spawn_blocking(move || store.load_matching(&fingerprint)).await;

        let snapshot = match loaded {
            Ok(Ok(Some(snapshot))) => snapshot,
            Ok(Ok(None)) => {
                debug!(dir = %self.store.dir().display(), "No matching vector index snapshot");
                return None;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Discarding unusable vector index snapshot");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Snapshot load task failed");
                return None;
            }
        };

        if snapshot.table_names != catalog.table_names() {
            warn!("Snapshot table list disagrees with its fingerprint, rebuilding");
            return None;
        }
        Some(snapshot.into())
    }

    async fn rebuild(&self, catalog: &Catalog) -> Option<(LoadedIndex, usize)> {
        let started = Instant::now();
        let table_names = catalog.table_names();
        let corpus = build_corpus(catalog);

        if corpus.is_empty() {
            return Some((
                LoadedIndex {
                    fingerprint: catalog.fingerprint().clone(),
                    table_names,
                    index: FlatIpIndex::new(0),
                },
                0,
            ));
        }

        let (vectors, dim) = self.embed_corpus(&corpus).await;
        let Some(dim) = dim else {
            warn!(documents = corpus.len(), "No document could be embedded, vector index unavailable");
            return None;
        };

        let mut index = FlatIpIndex::with_capacity(dim, vectors.len());
        let mut failed_documents = 0;
        for vector in vectors {
            let row = match vector {
                Some(v) => v.normalized(),
                None => {
                    failed_documents += 1;
                    Vector::zeros(dim)
                }
            };
            if let Err(e) = index.add(&row) {
                warn!(error = %e, "Vector index build failed");
                return None;
            }
        }

        let snapshot = VectorIndexSnapshot::new(table_names, corpus, catalog.fingerprint().clone(), index);
        let snapshot = self.persist(snapshot).await?;

        info!(
            fingerprint = %snapshot.fingerprint,
            tables = snapshot.table_names.len(),
            failed_documents,
            dimension = dim,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rebuilt vector index"
        );
        Some((snapshot.into(), failed_documents))
    }

    // A failed save is logged; the snapshot still serves from memory.
    async fn persist(&self, snapshot: VectorIndexSnapshot) -> Option<VectorIndexSnapshot> {
        let store = self.store.clone();
        let saved = tokio::task::spawn_blocking(move || {
            let result = store.save(&snapshot);
            (snapshot, result)
        })
        .await;

        match saved {
            Ok((snapshot, Ok(()))) => Some(snapshot),
            Ok((snapshot, Err(e))) => {
                warn!(error = %e, "Failed to persist vector index, serving from memory");
                Some(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "Snapshot save task failed");
                None
            }
        }
    }

    // One slot per document; `None` where embedding failed. The dimension
    // is fixed by the first successful vector.
    //
    // A failed batch is retried one document at a time. The first timeout
    // marks the service unreachable and every remaining document fails
    // without a call; so does a batch whose documents all fail one by one
    // before anything has been embedded.
    async fn embed_corpus(&self, corpus: &[String]) -> (Vec<Option<Vector>>, Option<usize>) {
        let mut vectors: Vec<Option<Vector>> = Vec::with_capacity(corpus.len());
        let mut dim: Option<usize> = None;
        let mut unreachable = false;

        for (batch_no, batch) in corpus.chunks(self.batch_size).enumerate() {
            if unreachable {
                vectors.extend(batch.iter().map(|_| None));
                continue;
            }

            match tokio::time::timeout(self.timeout, self.embedder.embed_batch(batch)).await {
                Ok(Ok(batch_vectors)) if batch_vectors.len() == batch.len() => {
                    for raw in batch_vectors {
                        vectors.push(accept(raw, &mut dim));
                    }
                    continue;
                }
                Ok(Ok(batch_vectors)) => {
                    warn!(batch = batch_no, expected = batch.len(), got = batch_vectors.len(), "Short embedding batch");
                }
                Ok(Err(e)) => warn!(batch = batch_no, error = %e, "Embedding batch failed"),
                Err(_) => {
                    warn!(batch = batch_no, remaining = corpus.len() - vectors.len(), "Embedding batch timed out, skipping remaining documents");
                    unreachable = true;
                    vectors.extend(batch.iter().map(|_| None));
                    continue;
                }
            }

            let mut embedded = 0;
            for (offset, document) in batch.iter().enumerate() {
                if unreachable {
                    vectors.push(None);
                    continue;
                }
                let position = batch_no * self.batch_size + offset;
                let vector = match tokio::time::timeout(self.timeout, self.embedder.embed(document)).await {
                    Ok(Ok(raw)) => accept(raw, &mut dim),
                    Ok(Err(e)) => {
                        warn!(document = position, error = %e, "Embedding failed, using zero vector");
                        None
                    }
                    Err(_) => {
                        warn!(document = position, "Embedding timed out, skipping remaining documents");
                        unreachable = true;
                        None
                    }
                };
                if vector.is_some() {
                    embedded += 1;
                }
                vectors.push(vector);
            }

            if embedded == 0 && dim.is_none() {
                warn!(batch = batch_no, "No document of the batch could be embedded, skipping remaining documents");
                unreachable = true;
            }
        }
        (vectors, dim)
    }

    /// Table names nearest to `query`, best first. Empty on any failure.
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<String> {
        match self.try_search(query, top_k).await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Vector search failed");
                Vec::new()
            }
        }
    }

    pub async fn try_search(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        let ready = self
            .current()
            .ok_or_else(|| Error::EmbeddingUnavailable("vector index is not built".into()))?;
        if ready.index.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let raw = tokio::time::timeout(self.timeout, self.embedder.embed(query))
            .await
            .map_err(|_| Error::EmbeddingUnavailable("query embedding timed out".into()))??;
        let query = Vector::new(raw).normalized();
        let hits = ready.index.search(&query, top_k)?;

        Ok(hits
            .into_iter()
            .filter_map(|(row, _)| ready.table_names.get(row).cloned())
            .collect())
    }
}

fn accept(raw: Vec<f32>, dim: &mut Option<usize>) -> Option<Vector> {
    if raw.is_empty() || raw.iter().any(|x| !x.is_finite()) {
        return None;
    }
    match *dim {
        Some(d) if d != raw.len() => {
            warn!(expected = d, actual = raw.len(), "Embedding dimension mismatch, using zero vector");
            None
        }
        Some(_) => Some(Vector::new(raw)),
        None => {
            *dim = Some(raw.len());
            Some(Vector::new(raw))
        }
    }
}
