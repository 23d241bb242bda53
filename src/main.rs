use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use schemaseek::{
    CatalogSource, DisabledEmbedder, Embedder, EmbeddingConfig, EmbeddingProvider, EngineConfig, HttpEmbedder,
    HttpReranker, JsonCatalogSource, RerankConfig, Reranker, ServiceRegistry, SqliteCatalogSource,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Pick the tables of a database schema that matter for a question
#[derive(Parser, Debug)]
#[command(name = "schemaseek")]
#[command(about = "Hybrid BM25 + vector schema retrieval", long_about = None)]
struct Args {
    /// Directory holding the vector index snapshots
    #[arg(short, long, env = "SCHEMASEEK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// JSON config file (see EngineConfig)
    #[arg(short, long, env = "SCHEMASEEK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the tables selected for a question
    Retrieve {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        models: ModelArgs,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        /// The question
        query: String,
    },
    /// Rebuild the vector index from scratch
    Rebuild {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        models: ModelArgs,
    },
    /// Print the schema fingerprint of a catalog
    Fingerprint {
        /// SQLite database file or JSON catalog export
        #[arg(long)]
        catalog: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
struct Target {
    /// SQLite database file or JSON catalog export
    #[arg(long)]
    catalog: PathBuf,

    /// Datasource id; defaults to the catalog file name
    #[arg(long)]
    datasource: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Openai,
    Ollama,
}

#[derive(ClapArgs, Debug)]
struct ModelArgs {
    /// Embedding service base URL
    #[arg(long, env = "SCHEMASEEK_EMBED_URL")]
    embed_url: Option<String>,

    #[arg(long, env = "SCHEMASEEK_EMBED_MODEL")]
    embed_model: Option<String>,

    #[arg(long, value_enum, env = "SCHEMASEEK_EMBED_PROVIDER")]
    embed_provider: Option<ProviderArg>,

    #[arg(long, env = "SCHEMASEEK_EMBED_API_KEY", hide_env_values = true)]
    embed_api_key: Option<String>,

    /// Rerank service base URL
    #[arg(long, env = "SCHEMASEEK_RERANK_URL")]
    rerank_url: Option<String>,

    #[arg(long, env = "SCHEMASEEK_RERANK_MODEL")]
    rerank_model: Option<String>,

    #[arg(long, env = "SCHEMASEEK_RERANK_API_KEY", hide_env_values = true)]
    rerank_api_key: Option<String>,

    /// Keep the fused order even when a reranker is configured
    #[arg(long)]
    no_rerank: bool,
}

impl ModelArgs {
    // Flags override the config file field by field.
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(url) = &self.embed_url {
            let model = self
                .embed_model
                .clone()
                .or_else(|| config.embedding.as_ref().map(|e| e.model.clone()))
                .unwrap_or_default();
            let embedding = config
                .embedding
                .get_or_insert_with(|| EmbeddingConfig::new(url.clone(), model.clone()));
            embedding.base_url = url.clone();
            embedding.model = model;
        } else if let (Some(model), Some(embedding)) = (&self.embed_model, config.embedding.as_mut()) {
            embedding.model = model.clone();
        }
        if let Some(embedding) = config.embedding.as_mut() {
            if let Some(provider) = self.embed_provider {
                embedding.provider = match provider {
                    ProviderArg::Openai => EmbeddingProvider::OpenAiCompatible,
                    ProviderArg::Ollama => EmbeddingProvider::Ollama,
                };
            }
            if self.embed_api_key.is_some() {
                embedding.api_key = self.embed_api_key.clone();
            }
        }

        if let Some(url) = &self.rerank_url {
            let model = self
                .rerank_model
                .clone()
                .or_else(|| config.rerank.as_ref().map(|r| r.model.clone()))
                .unwrap_or_default();
            let rerank = config
                .rerank
                .get_or_insert_with(|| RerankConfig::new(url.clone(), model.clone()));
            rerank.base_url = url.clone();
            rerank.model = model;
        } else if let (Some(model), Some(rerank)) = (&self.rerank_model, config.rerank.as_mut()) {
            rerank.model = model.clone();
        }
        if let Some(rerank) = config.rerank.as_mut() {
            if self.rerank_api_key.is_some() {
                rerank.api_key = self.rerank_api_key.clone();
            }
        }
        if self.no_rerank {
            config.retrieval.rerank_enabled = false;
        }
    }
}

fn catalog_source(path: &Path) -> Arc<dyn CatalogSource> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        Arc::new(JsonCatalogSource::new(path))
    } else {
        Arc::new(SqliteCatalogSource::new(path))
    }
}

fn datasource_id(target: &Target) -> String {
    target.datasource.clone().unwrap_or_else(|| {
        target
            .catalog
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("default")
            .to_string()
    })
}

fn build_registry(config: &EngineConfig) -> anyhow::Result<ServiceRegistry> {
    let embedder: Arc<dyn Embedder> = match &config.embedding {
        Some(embedding) => Arc::new(HttpEmbedder::new(embedding)?),
        None => {
            warn!("No embedding service configured, ranking with BM25 only");
            Arc::new(DisabledEmbedder)
        }
    };
    let reranker: Option<Arc<dyn Reranker>> = match &config.rerank {
        Some(rerank) => Some(Arc::new(HttpReranker::new(rerank)?)),
        None => None,
    };
    Ok(ServiceRegistry::new(
        &config.data_dir,
        config.retrieval.clone(),
        embedder,
        reranker,
    )?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }

    match args.command {
        Command::Retrieve {
            target,
            models,
            json,
            query,
        } => {
            models.apply(&mut config);
            config.validate()?;
            let registry = build_registry(&config)?;
            let id = datasource_id(&target);
            registry.get_or_register(&id, catalog_source(&target.catalog))?;

            let result = registry.retrieve(&id, &query).await?;
            for degradation in &result.degradations {
                warn!(?degradation, "Result is degraded");
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for table in &result.tables {
                    match &table.table_comment {
                        Some(comment) => println!("{}\t{}", table.table_name, comment),
                        None => println!("{}", table.table_name),
                    }
                }
            }
        }
        Command::Rebuild { target, models } => {
            models.apply(&mut config);
            config.validate()?;
            let registry = build_registry(&config)?;
            let id = datasource_id(&target);
            let service = registry.get_or_register(&id, catalog_source(&target.catalog))?;

            let outcome = service.rebuild_index().await?;
            info!(datasource = %id, ?outcome, "Rebuild finished");
            println!("{}", serde_json::to_string(&outcome)?);
        }
        Command::Fingerprint { catalog } => {
            let source = catalog_source(&catalog);
            let catalog = tokio::task::spawn_blocking(move || schemaseek::introspect(source.as_ref()))
                .await??;
            println!(
                "{}\ttables={}\tskipped={}",
                catalog.fingerprint(),
                catalog.len(),
                catalog.skipped().len()
            );
        }
    }

    Ok(())
}
