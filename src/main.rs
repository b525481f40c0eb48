use std::{sync::Arc, time::Duration};

use anyhow::Context;
use poem::{Route, Server, listener::TcpListener};
use poem_openapi::OpenApiService;
use sqlx::postgres::PgPoolOptions;
use tokio::main;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier::{
    application::{
        handlers::message_dispatcher::{DispatcherConfig, MessageDispatchHandler},
        services::{
            circuit_breaker::CircuitBreaker, health::HealthService, scheduler::Scheduler,
        },
        usecases::list_sent_messages::ListSentMessagesUseCase,
    },
    config::{Config, StorageKind},
    domain::repositories::{MessageCache, MessageRepository},
    infrastructure::{
        cache::{in_memory::InMemoryMessageCache, redis::RedisMessageCache},
        messaging::webhook::HttpWebhookClient,
        repositories::{in_memory::InMemoryMessageRepository, postgres::PostgresMessageRepository},
    },
    presentation::http::endpoints::root::{ApiState, endpoints},
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::try_parse()?;
    let server_url = config.server_url();

    let (message_repo, cache) = build_storage(&config).await?;

    let webhook = HttpWebhookClient::new(config.webhook_config())?;
    let breaker = Arc::new(CircuitBreaker::new(config.breaker_config()));
    let dispatcher = Arc::new(MessageDispatchHandler::new(
        message_repo.clone(),
        cache.clone(),
        webhook,
        breaker,
        DispatcherConfig {
            batch_size: config.scheduler_batch_size,
        },
    ));
    let scheduler = Arc::new(Scheduler::new(
        config.scheduler_interval,
        dispatcher.clone(),
    ));
    let health_service = Arc::new(HealthService::new(
        message_repo.clone(),
        cache,
        scheduler.clone(),
        dispatcher,
    ));

    let shutdown = CancellationToken::new();

    if config.scheduler_autostart {
        scheduler.start(&shutdown).await?;
    }

    let state = Arc::new(ApiState {
        scheduler: scheduler.clone(),
        health_service,
        list_sent_messages_usecase: Arc::new(ListSentMessagesUseCase::new(message_repo)),
        shutdown: shutdown.clone(),
    });

    let api_service = OpenApiService::new(endpoints(state), "Courier API", "0.1.0")
        .server(format!("{}/api", server_url));
    let ui = api_service.swagger_ui();
    let app = Route::new().nest("/api", api_service).nest("/", ui);

    info!(url = %server_url, "Starting server");

    let served = Server::new(TcpListener::bind(format!("{}:{}", config.host, config.port)))
        .run_with_graceful_shutdown(
            app,
            async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "Failed to listen for shutdown signal");
                }
                info!("Shutting down server");
            },
            Some(SHUTDOWN_GRACE),
        )
        .await;

    if scheduler.is_running().await {
        if let Err(err) = scheduler.stop().await {
            warn!(error = %err, "Failed to stop scheduler");
        }
    }
    shutdown.cancel();

    served.context("server error")?;
    info!("Server exited");
    Ok(())
}

async fn build_storage(
    config: &Config,
) -> anyhow::Result<(Arc<dyn MessageRepository>, Arc<dyn MessageCache>)> {
    match config.storage {
        StorageKind::Memory => {
            warn!("Using in-memory storage, messages are lost on restart");
            let repo: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::new());
            let cache: Arc<dyn MessageCache> = Arc::new(InMemoryMessageCache::new());
            Ok((repo, cache))
        }
        StorageKind::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for postgres storage")?;
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .context("failed to connect to database")?;
            let repo = PostgresMessageRepository::new(pool);
            repo.migrate().await.context("failed to run migrations")?;

            let cache: Arc<dyn MessageCache> = RedisMessageCache::connect(&config.redis_url)
                .await
                .context("failed to connect to redis")?;

            info!("Connected to database and redis");
            let repo: Arc<dyn MessageRepository> = repo;
            Ok((repo, cache))
        }
    }
}
