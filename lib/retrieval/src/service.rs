//! The retrieval entry point for one datasource.
//!
//! `retrieve` only fails when the catalog cannot be loaded. Every other
//! problem (embedding service down, reranker timing out, tables that
//! could not be introspected) narrows or reorders the result and is
//! reported as a [`Degradation`].

use crate::catalog_loader::{CatalogSource, SchemaCatalogLoader};
use crate::config::RetrievalConfig;
use crate::embedder::Embedder;
use crate::rerank::{rerank_candidates, RerankStatus, Reranker};
use crate::vector_index::{BuildOutcome, IndexState, VectorIndex};
use parking_lot::RwLock;
use schemaseek_core::{
    build_document, BM25Index, Catalog, FusionRanker, RankedCandidate, Result, SchemaFingerprint, TableInfo,
};
use schemaseek_storage::SnapshotStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "count")]
pub enum Degradation {
    /// ranked without the vector signal
    EmbeddingUnavailable,
    /// kept the fused order
    RerankUnavailable,
    /// tables left out of the catalog because introspection failed
    TablesSkipped(usize),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    /// Selected tables, most relevant first
    pub tables: Vec<TableInfo>,
    /// Fused candidates the tables were chosen from
    pub candidates: Vec<RankedCandidate>,
    pub degradations: Vec<Degradation>,
}

impl RetrievalResult {
    #[inline]
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.table_name.as_str()).collect()
    }

    #[inline]
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }

    fn degrade(&mut self, degradation: Degradation) {
        if !self.degradations.contains(&degradation) {
            self.degradations.push(degradation);
        }
    }
}

struct LexicalCache {
    fingerprint: SchemaFingerprint,
    index: Arc<BM25Index>,
}

pub struct SchemaRetrievalService {
    datasource_id: String,
    config: RetrievalConfig,
    loader: SchemaCatalogLoader,
    vector_index: VectorIndex,
    reranker: Option<Arc<dyn Reranker>>,
    fusion: FusionRanker,
    lexical: RwLock<Option<LexicalCache>>,
}

impl SchemaRetrievalService {
    pub fn new(
        datasource_id: impl Into<String>,
        source: Arc<dyn CatalogSource>,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
        store: SnapshotStore,
        config: RetrievalConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            datasource_id: datasource_id.into(),
            loader: SchemaCatalogLoader::new(source, config.catalog_ttl()),
            vector_index: VectorIndex::new(embedder, store, &config),
            reranker,
            fusion: FusionRanker::new(config.fusion),
            lexical: RwLock::new(None),
            config,
        })
    }

    #[inline]
    pub fn datasource_id(&self) -> &str {
        &self.datasource_id
    }

    #[inline]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    #[inline]
    pub fn index_state(&self) -> IndexState {
        self.vector_index.state()
    }

    #[inline]
    pub fn vector_index(&self) -> &VectorIndex {
        &self.vector_index
    }

    pub async fn catalog(&self) -> Result<Arc<Catalog>> {
        self.loader.load_all().await
    }

    /// Forget the cached catalog; the next call introspects again
    pub async fn invalidate_catalog(&self) {
        self.loader.invalidate().await;
    }

    /// Rebuild the vector index from scratch, ignoring any snapshot
    pub async fn rebuild_index(&self) -> Result<BuildOutcome> {
        let catalog = self.loader.load_all().await?;
        let outcome = self.vector_index.ensure_built(&catalog, true).await;
        info!(datasource = %self.datasource_id, ?outcome, "Forced vector index rebuild");
        Ok(outcome)
    }

    /// Tables most relevant to `query`, at most `result_cap` of them.
    /// An empty query returns the whole catalog.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        let catalog = self.loader.load_all().await?;
        let mut result = RetrievalResult::default();
        if !catalog.skipped().is_empty() {
            result.degrade(Degradation::TablesSkipped(catalog.skipped().len()));
        }

        let query = query.trim();
        if query.is_empty() {
            result.tables = catalog.tables().values().cloned().collect();
            return Ok(result);
        }
        if catalog.is_empty() {
            return Ok(result);
        }

        let bm25_order = self.bm25_order(&catalog, query);
        let vector_order = self.vector_order(&catalog, query, &mut result).await;

        let ranked = self.fusion.rank(&bm25_order, &vector_order);
        let documents: Vec<String> = ranked
            .iter()
            .filter_map(|c| catalog.get(&c.table_name).map(|t| build_document(&c.table_name, t)))
            .collect();

        let reranker = self.reranker.as_deref().filter(|_| self.config.rerank_enabled);
        let reranked = rerank_candidates(
            reranker,
            query,
            &documents,
            self.config.result_cap,
            self.config.rerank_timeout(),
        )
        .await;
        if reranked.status == RerankStatus::Failed {
            result.degrade(Degradation::RerankUnavailable);
        }

        result.tables = reranked
            .order
            .iter()
            .filter_map(|&(i, _)| ranked.get(i))
            .filter_map(|c| catalog.get(&c.table_name).cloned())
            .collect();
        result.candidates = ranked;

        debug!(
            datasource = %self.datasource_id,
            bm25 = bm25_order.len(),
            vector = vector_order.len(),
            candidates = result.candidates.len(),
            selected = result.tables.len(),
            degraded = result.is_degraded(),
            "Retrieved tables"
        );
        Ok(result)
    }

    fn bm25_order(&self, catalog: &Catalog, query: &str) -> Vec<String> {
        let index = self.lexical_index(catalog);
        let names: Vec<&String> = catalog.tables().keys().collect();
        index
            .rank(query)
            .into_iter()
            .filter_map(|i| names.get(i).map(|n| n.to_string()))
            .collect()
    }

    async fn vector_order(&self, catalog: &Catalog, query: &str, result: &mut RetrievalResult) -> Vec<String> {
        if self.vector_index.ensure_built(catalog, false).await == BuildOutcome::Unavailable {
            result.degrade(Degradation::EmbeddingUnavailable);
            return Vec::new();
        }
        match self
            .vector_index
            .try_search(query, self.config.fusion.vector_top_k)
            .await
        {
            Ok(names) => names.into_iter().filter(|n| catalog.contains(n)).collect(),
            Err(e) => {
                debug!(datasource = %self.datasource_id, error = %e, "Vector ranking dropped");
                result.degrade(Degradation::EmbeddingUnavailable);
                Vec::new()
            }
        }
    }

    // BM25 is rebuilt only when the catalog fingerprint changes
    fn lexical_index(&self, catalog: &Catalog) -> Arc<BM25Index> {
        if let Some(cached) = self.lexical.read().as_ref() {
            if &cached.fingerprint == catalog.fingerprint() {
                return cached.index.clone();
            }
        }
        let index = Arc::new(BM25Index::from_catalog(catalog, self.config.bm25));
        *self.lexical.write() = Some(LexicalCache {
            fingerprint: catalog.fingerprint().clone(),
            index: index.clone(),
        });
        index
    }
}
