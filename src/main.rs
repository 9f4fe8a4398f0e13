use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zettel_ingest::{
    config::Config,
    db::{self, DocumentStore, InMemoryDocumentStore, PgDocumentStore},
    embeddings::{InMemoryVectorIndex, IngestionServices, OpenAIEmbeddings, PlainTextExtractor, VectorIndex},
    events::{EventEmitter, EventHub},
    queue::{JobQueue, JobWorker, MemoryStore, QueueBackend, RecoveryManager, RedisStore},
    routes::create_router,
    utils::init_logger,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config.server);

    let backend: Arc<dyn QueueBackend> = if config.redis.enabled {
        Arc::new(RedisStore::connect(&config.redis.url, config.queue.queue_key.clone()).await?)
    } else {
        warn!("USE_REDIS_QUEUE=false: jobs are kept in memory and lost on restart");
        Arc::new(MemoryStore::new())
    };
    let queue = JobQueue::new(backend, config.queue.clone());

    let documents: Arc<dyn DocumentStore> = match db::create_pool(&config.database).await? {
        Some(pool) => {
            info!("Database migrations completed");
            Arc::new(PgDocumentStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set: document records are kept in memory");
            Arc::new(InMemoryDocumentStore::new())
        }
    };
    let vectors: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());

    let (hub, hub_task) = EventHub::spawn(&config.hub);
    let events = EventEmitter::new(hub.clone());

    // Interrupted jobs go back on the queue before anything new is consumed.
    let report = RecoveryManager::new(queue.clone()).run().await?;
    info!(
        requeued = report.requeued.len(),
        failed = report.failed.len(),
        "Startup recovery finished"
    );

    let services = IngestionServices {
        extractor: Arc::new(PlainTextExtractor::default()),
        embedder: Arc::new(
            OpenAIEmbeddings::new(&config.embedding.openai_api_key, &config.embedding.model)
                .with_endpoint(&config.embedding.api_url),
        ),
        vectors: vectors.clone(),
        documents: documents.clone(),
    };

    let shutdown = CancellationToken::new();
    let worker = JobWorker::new(queue.clone(), services, events.clone(), shutdown.clone());
    let worker_task = tokio::spawn(async move { worker.run().await });

    let state = AppState {
        config: config.clone(),
        queue,
        hub,
        events,
        documents,
        vectors,
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    // The worker finishes its current job before exiting.
    shutdown.cancel();
    if let Err(e) = worker_task.await {
        warn!("Job worker task ended abnormally: {}", e);
    }
    hub_task.abort();

    info!("Shutdown complete");
    Ok(())
}
