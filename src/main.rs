use std::sync::Arc;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cinerec::config::{CacheBackend, Config};
use cinerec::db::{
    create_pool, create_redis_client, run_migrations, CacheWriterHandle, MemoryCache, PgStore,
    RedisCache, ResultCache,
};
use cinerec::routes::{create_router, AppState};
use cinerec::services::providers::{EmbeddingProvider, OllamaEmbeddingProvider};
use cinerec::services::{RecommendationEngine, Stores};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cinerec=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = Config::from_env()?;
    let engine_config = config.engine()?;

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;
    let stores = Stores::shared(Arc::new(PgStore::new(pool)));

    let mut cache_writer: Option<CacheWriterHandle> = None;
    let cache: Arc<dyn ResultCache> = match config.cache_backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new(engine_config.cache_max_entries)),
        CacheBackend::Redis => {
            let client = create_redis_client(&config.redis_url)?;
            let (cache, writer) = RedisCache::new(client);
            cache_writer = Some(writer);
            Arc::new(cache)
        }
    };

    let provider: Arc<dyn EmbeddingProvider> = Arc::new(OllamaEmbeddingProvider::new(
        config.embedding_url.clone(),
        config.embedding_model.clone(),
        config.embedding_dimension,
        config.embedding_connect_timeout(),
        config.embedding_read_timeout(),
    )?);

    tracing::info!(
        cache_backend = ?config.cache_backend,
        embedding_model = %config.embedding_model,
        embedding_dimension = config.embedding_dimension,
        "Starting recommendation engine"
    );

    let engine = RecommendationEngine::new(stores, provider, cache, engine_config);
    let app = create_router(AppState::new(engine));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(writer) = cache_writer {
        writer.shutdown().await;
    }
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
