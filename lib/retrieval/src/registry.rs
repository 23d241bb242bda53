use crate::catalog_loader::CatalogSource;
use crate::config::RetrievalConfig;
use crate::embedder::Embedder;
use crate::rerank::Reranker;
use crate::service::{RetrievalResult, SchemaRetrievalService};
use ahash::AHashMap;
use parking_lot::RwLock;
use schemaseek_core::{Error, Result};
use schemaseek_storage::SnapshotStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// One [`SchemaRetrievalService`] per datasource, each with its own
/// catalog cache, vector index and snapshot directory under `data_dir`.
pub struct ServiceRegistry {
    data_dir: PathBuf,
    config: RetrievalConfig,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    services: RwLock<AHashMap<String, Arc<SchemaRetrievalService>>>,
}

impl ServiceRegistry {
    pub fn new<P: AsRef<Path>>(
        data_dir: P,
        config: RetrievalConfig,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            config,
            embedder,
            reranker,
            services: RwLock::new(AHashMap::new()),
        })
    }

    #[inline]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The service for `datasource_id`, created from `source` on first use.
    /// An already registered datasource keeps its original source.
    pub fn get_or_register(
        &self,
        datasource_id: &str,
        source: Arc<dyn CatalogSource>,
    ) -> Result<Arc<SchemaRetrievalService>> {
        if let Some(service) = self.get(datasource_id) {
            return Ok(service);
        }

        let mut services = self.services.write();
        if let Some(service) = services.get(datasource_id) {
            return Ok(service.clone());
        }
        let service = Arc::new(SchemaRetrievalService::new(
            datasource_id,
            source,
            self.embedder.clone(),
            self.reranker.clone(),
            SnapshotStore::for_datasource(&self.data_dir, datasource_id),
            self.config.clone(),
        )?);
        services.insert(datasource_id.to_string(), service.clone());
        info!(datasource = datasource_id, "Registered datasource");
        Ok(service)
    }

    pub fn get(&self, datasource_id: &str) -> Option<Arc<SchemaRetrievalService>> {
        self.services.read().get(datasource_id).cloned()
    }

    /// Unregister a datasource. Its snapshot files stay on disk.
    pub fn remove(&self, datasource_id: &str) -> Option<Arc<SchemaRetrievalService>> {
        self.services.write().remove(datasource_id)
    }

    pub async fn retrieve(&self, datasource_id: &str, query: &str) -> Result<RetrievalResult> {
        let service = self
            .get(datasource_id)
            .ok_or_else(|| Error::MetadataUnavailable(format!("unknown datasource '{}'", datasource_id)))?;
        service.retrieve(query).await
    }

    /// Registered ids, sorted
    pub fn datasource_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.services.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
