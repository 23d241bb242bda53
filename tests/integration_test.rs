// Integration tests for SchemaSeek
use async_trait::async_trait;
use schemaseek::{
    BuildOutcome, Catalog, Degradation, DisabledEmbedder, Embedder, Error, IndexState, JsonCatalogSource,
    RerankScore, Reranker, Result, RetrievalConfig, SchemaRetrievalService, ServiceRegistry, SnapshotStore,
    SqliteCatalogSource, StaticCatalogSource, TableInfo,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DIM: usize = 256;

/// Hashes every token into one of `DIM` buckets. Document batches and
/// single (query) embeddings are counted separately.
#[derive(Default)]
struct HashingEmbedder {
    batch_calls: AtomicUsize,
    single_calls: AtomicUsize,
}

impl HashingEmbedder {
    fn batches(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn singles(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }
}

fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    for token in schemaseek_core::tokenize(text) {
        let bucket = token
            .bytes()
            .fold(5381usize, |h, b| h.wrapping_mul(33).wrapping_add(b as usize));
        v[bucket % DIM] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(hash_vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        // widen the window for concurrent callers
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

#[derive(Default)]
struct HangingEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for HangingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![1.0; DIM])
    }
}

struct BrokenReranker;

#[async_trait]
impl Reranker for BrokenReranker {
    async fn rerank(&self, _query: &str, _documents: &[String], _top_n: usize) -> Result<Vec<RerankScore>> {
        Err(Error::RerankUnavailable("HTTP 502".into()))
    }
}

fn shop_tables() -> Vec<TableInfo> {
    vec![
        TableInfo::new("orders")
            .with_comment("customer orders")
            .with_column("id", "INTEGER", Some("order id"))
            .with_column("customer_id", "INTEGER", Some("buyer"))
            .with_column("amount", "REAL", Some("order amount"))
            .with_foreign_key("customer_id", "customers", "id"),
        TableInfo::new("customers")
            .with_comment("registered customers")
            .with_column("id", "INTEGER", None)
            .with_column("name", "TEXT", Some("customer name")),
        TableInfo::new("order_items")
            .with_comment("line items of an order")
            .with_column("order_id", "INTEGER", None)
            .with_column("sku", "TEXT", None),
        TableInfo::new("products")
            .with_comment("product master")
            .with_column("sku", "TEXT", None)
            .with_column("price", "REAL", None),
        TableInfo::new("audit_log").with_column("message", "TEXT", Some("log message")),
        TableInfo::new("employees")
            .with_comment("staff")
            .with_column("name", "TEXT", None),
        TableInfo::new("warehouses").with_column("city", "TEXT", None),
        TableInfo::new("shipments")
            .with_comment("order shipments")
            .with_column("order_id", "INTEGER", None)
            .with_column("carrier", "TEXT", None),
    ]
}

fn quick_config() -> RetrievalConfig {
    RetrievalConfig {
        embed_timeout_ms: 100,
        rerank_timeout_ms: 100,
        ..RetrievalConfig::default()
    }
}

fn service(
    dir: &TempDir,
    tables: Vec<TableInfo>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
) -> SchemaRetrievalService {
    SchemaRetrievalService::new(
        "shop",
        Arc::new(StaticCatalogSource::new(tables)),
        embedder,
        reranker,
        SnapshotStore::for_datasource(dir.path(), "shop"),
        quick_config(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_retrieve_returns_at_most_four_tables() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir, shop_tables(), Arc::new(HashingEmbedder::default()), None);

    let result = svc.retrieve("find customer orders").await.unwrap();
    assert!(!result.tables.is_empty());
    assert!(result.tables.len() <= 4);
    assert!(result.table_names().contains(&"orders"));
    assert!(!result.is_degraded());
    assert_eq!(svc.index_state(), IndexState::Ready);
}

#[tokio::test]
async fn test_bm25_only_when_embeddings_are_disabled() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir, shop_tables(), Arc::new(DisabledEmbedder), None);

    let result = svc.retrieve("find customer orders").await.unwrap();
    assert_eq!(result.tables[0].table_name, "orders");
    assert!(result.tables.len() <= 4);
    assert_eq!(result.degradations, vec![Degradation::EmbeddingUnavailable]);
    assert!(result.candidates.iter().all(|c| c.vector_rank.is_none()));
    assert!(!SnapshotStore::for_datasource(dir.path(), "shop").exists());
}

#[tokio::test]
async fn test_empty_catalog_returns_nothing() {
    let dir = TempDir::new().unwrap();
    let embedder = Arc::new(HashingEmbedder::default());
    let svc = service(&dir, Vec::new(), embedder.clone(), None);

    let result = svc.retrieve("find customer orders").await.unwrap();
    assert!(result.tables.is_empty());
    assert!(result.candidates.is_empty());
    assert_eq!(embedder.batches() + embedder.singles(), 0);
}

#[tokio::test]
async fn test_warm_start_needs_no_document_embeddings() {
    let dir = TempDir::new().unwrap();
    let first = Arc::new(HashingEmbedder::default());
    let cold = service(&dir, shop_tables(), first.clone(), None);
    let expected = cold.retrieve("order shipments").await.unwrap();
    assert_eq!(first.batches(), 1);
    drop(cold);

    // a restarted process: new service, new embedder, same data dir
    let second = Arc::new(HashingEmbedder::default());
    let warm = service(&dir, shop_tables(), second.clone(), None);
    let catalog = warm.catalog().await.unwrap();
    assert_eq!(warm.vector_index().ensure_built(&catalog, false).await, BuildOutcome::Loaded);

    let result = warm.retrieve("order shipments").await.unwrap();
    assert_eq!(result.table_names(), expected.table_names());
    assert_eq!(second.batches(), 0);
    assert_eq!(second.singles(), 1);
}

#[tokio::test]
async fn test_schema_drift_triggers_rebuild() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir, shop_tables(), Arc::new(HashingEmbedder::default()), None);
    svc.retrieve("orders").await.unwrap();

    let mut edited = shop_tables();
    edited[0] = edited[0].clone().with_comment("sales orders placed by customers");
    let new_catalog = Catalog::new(edited.clone(), Vec::new());

    let embedder = Arc::new(HashingEmbedder::default());
    let restarted = service(&dir, edited, embedder.clone(), None);
    let catalog = restarted.catalog().await.unwrap();
    assert_eq!(catalog.fingerprint(), new_catalog.fingerprint());
    assert_eq!(
        restarted.vector_index().ensure_built(&catalog, false).await,
        BuildOutcome::Rebuilt { failed_documents: 0 }
    );
    assert_eq!(embedder.batches(), 1);

    let persisted = SnapshotStore::for_datasource(dir.path(), "shop")
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(&persisted.fingerprint, new_catalog.fingerprint());
}

#[tokio::test]
async fn test_corrupt_index_file_is_rebuilt() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir, shop_tables(), Arc::new(HashingEmbedder::default()), None);
    svc.retrieve("orders").await.unwrap();

    let store = SnapshotStore::for_datasource(dir.path(), "shop");
    std::fs::write(store.ann_path(), b"definitely not an index").unwrap();

    let embedder = Arc::new(HashingEmbedder::default());
    let restarted = service(&dir, shop_tables(), embedder.clone(), None);
    let result = restarted.retrieve("customer orders").await.unwrap();
    assert!(!result.is_degraded());
    assert_eq!(embedder.batches(), 1);
    assert!(store.load().unwrap().is_some());
}

#[tokio::test]
async fn test_reranker_failure_keeps_fused_order() {
    let dir = TempDir::new().unwrap();
    let plain = service(&dir, shop_tables(), Arc::new(HashingEmbedder::default()), None);
    let expected = plain.retrieve("customer orders").await.unwrap();

    let dir = TempDir::new().unwrap();
    let broken = service(
        &dir,
        shop_tables(),
        Arc::new(HashingEmbedder::default()),
        Some(Arc::new(BrokenReranker)),
    );
    let result = broken.retrieve("customer orders").await.unwrap();
    assert_eq!(result.table_names(), expected.table_names());
    assert_eq!(result.degradations, vec![Degradation::RerankUnavailable]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cold_start_builds_once() {
    let dir = TempDir::new().unwrap();
    let embedder = Arc::new(HashingEmbedder::default());
    let svc = Arc::new(service(&dir, shop_tables(), embedder.clone(), None));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let svc = svc.clone();
        handles.push(tokio::spawn(async move { svc.retrieve("customer orders").await }));
    }
    let mut names = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert!(!result.is_degraded());
        names.push(result.table_names().join(","));
    }

    assert_eq!(embedder.batches(), 1);
    assert!(names.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_hanging_embedder_times_out() {
    let dir = TempDir::new().unwrap();
    let svc = service(&dir, shop_tables(), Arc::new(HangingEmbedder::default()), None);

    let result = tokio::time::timeout(Duration::from_secs(30), svc.retrieve("find customer orders"))
        .await
        .expect("retrieve should not hang")
        .unwrap();
    assert_eq!(result.tables[0].table_name, "orders");
    assert_eq!(result.degradations, vec![Degradation::EmbeddingUnavailable]);
    assert_eq!(svc.index_state(), IndexState::Unbuilt);
}

#[tokio::test]
async fn test_hanging_embedder_cost_is_bounded() {
    let dir = TempDir::new().unwrap();
    let mut tables = shop_tables();
    tables.extend((0..56).map(|i| TableInfo::new(format!("archive_{:02}", i)).with_column("payload", "TEXT", None)));
    let embedder = Arc::new(HangingEmbedder::default());
    let svc = service(&dir, tables, embedder.clone(), None);

    let started = std::time::Instant::now();
    for _ in 0..3 {
        let result = svc.retrieve("find customer orders").await.unwrap();
        assert_eq!(result.tables[0].table_name, "orders");
        assert_eq!(result.degradations, vec![Degradation::EmbeddingUnavailable]);
    }
    // one timed-out batch in total; later calls wait out the retry cooldown
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_fingerprint_is_deterministic() {
    let mut reversed = shop_tables();
    reversed.reverse();
    let a = Catalog::new(shop_tables(), Vec::new());
    let b = Catalog::new(reversed, Vec::new());
    assert_eq!(a.fingerprint(), b.fingerprint());

    let mut edited = shop_tables();
    edited[4] = edited[4].clone().with_column("message", "TEXT", Some("event text"));
    let c = Catalog::new(edited, Vec::new());
    assert_ne!(a.fingerprint(), c.fingerprint());
}

#[tokio::test]
async fn test_registry_over_sqlite_database() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("shop.db");
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE customers ( -- registered customers
                 id INTEGER PRIMARY KEY,
                 name TEXT -- customer name
             );
             CREATE TABLE orders ( -- customer orders
                 id INTEGER PRIMARY KEY, -- order id
                 customer_id INTEGER REFERENCES customers(id), -- buyer
                 amount REAL -- order amount
             );
             CREATE TABLE audit_log (
                 message TEXT
             );",
        )
        .unwrap();
    }

    let data_dir = dir.path().join("data");
    let embedder = Arc::new(HashingEmbedder::default());
    let registry = ServiceRegistry::new(&data_dir, quick_config(), embedder.clone(), None).unwrap();
    registry
        .get_or_register("shop", Arc::new(SqliteCatalogSource::new(&db_path)))
        .unwrap();

    let result = registry.retrieve("inventory", "customer orders").await;
    assert!(matches!(result, Err(Error::MetadataUnavailable(_))));

    let result = registry.retrieve("shop", "customer orders").await.unwrap();
    assert_eq!(result.tables[0].table_name, "orders");
    assert_eq!(result.tables[0].table_comment.as_deref(), Some("customer orders"));
    assert_eq!(result.tables[0].foreign_keys, vec!["customer_id -> customers.id"]);
    assert!(SnapshotStore::for_datasource(&data_dir, "shop").exists());
}

#[tokio::test]
async fn test_registry_over_json_catalog() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.json");
    let export = serde_json::json!({
        "tables": {
            "orders": {
                "table_comment": "customer orders",
                "columns": {
                    "id": {"type": "INTEGER", "comment": "order id"},
                    "amount": {"type": "REAL"}
                }
            },
            "employees": {
                "table_comment": "staff",
                "columns": {"name": {"type": "TEXT"}}
            }
        }
    });
    std::fs::write(&path, serde_json::to_vec(&export).unwrap()).unwrap();

    let registry = ServiceRegistry::new(
        dir.path().join("data"),
        quick_config(),
        Arc::new(HashingEmbedder::default()),
        None,
    )
    .unwrap();
    registry
        .get_or_register("warehouse/prod", Arc::new(JsonCatalogSource::new(&path)))
        .unwrap();

    let result = registry.retrieve("warehouse/prod", "order amount").await.unwrap();
    assert_eq!(result.tables[0].table_name, "orders");
    assert_eq!(result.tables[0].columns["id"].comment.as_deref(), Some("order id"));
    let store = SnapshotStore::for_datasource(dir.path().join("data"), "warehouse/prod");
    assert!(store.ann_path().exists());
    assert!(store.dir().starts_with(dir.path().join("data")));
}
