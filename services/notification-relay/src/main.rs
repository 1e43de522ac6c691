use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use legalrelay_database::{
    create_mongo_client, create_redis_pool, get_database, initialize_postgres, mongo_health_check,
    redis_health_check, CaseDirectory, DatabaseConfig, IdentityStore, InMemoryCorrelationStore,
    InMemoryWebhookEventStore, MongoWebhookEventStore, PostgresCaseDirectory, PostgresIdentityStore,
    RedisCorrelationStore, ThreadCorrelationStore, WebhookEventStore,
};
use legalrelay_notification_relay::{
    composer::NotificationComposer,
    create_app,
    metrics::RelayMetrics,
    poller::spawn_reply_poller,
    providers::{ChatProvider, GmailClient, MailProvider, SendbirdClient},
    recipients::RecipientResolver,
    threading::ThreadedMailer,
    tracking::EmailTrackingService,
    AppState, EmailReplyRouter, RelayEventHandler, RetryPolicy, TokioScheduler,
    WebhookRetryEngine,
};
use legalrelay_utils::{init_logging, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load().unwrap_or_else(|_| {
        eprintln!("Failed to load configuration, using defaults");
        AppConfig::default()
    });

    init_logging(&config.logging)?;
    info!("Starting LegalRelay notification relay");

    if config.chat.webhook_secret.as_deref().map_or(true, str::is_empty) {
        warn!("No webhook secret configured; every webhook will be rejected");
    }

    // Identity and case lookups live in PostgreSQL
    let postgres_pool = initialize_postgres(&DatabaseConfig {
        postgres_url: config.database.postgres_url.clone(),
        max_connections: config.database.max_connections,
        connection_timeout: Duration::from_secs(config.database.connection_timeout_seconds),
    })
    .await
    .context("Failed to initialize PostgreSQL")?;
    let identities: Arc<dyn IdentityStore> = Arc::new(PostgresIdentityStore::new(postgres_pool.clone()));
    let cases: Arc<dyn CaseDirectory> = Arc::new(PostgresCaseDirectory::new(postgres_pool));

    let correlations = correlation_store(&config).await?;
    let events = event_store(&config).await?;
    info!("Database connections established");

    let chat: Arc<dyn ChatProvider> = Arc::new(SendbirdClient::new(&config.chat));
    let mail: Arc<dyn MailProvider> = Arc::new(GmailClient::new(config.mail.clone())?);

    let metrics = RelayMetrics::new()?;
    let tracking = EmailTrackingService::new();

    let handler = Arc::new(RelayEventHandler::new(
        chat.clone(),
        RecipientResolver::new(chat.clone(), identities),
        NotificationComposer::new()?,
        cases,
        ThreadedMailer::new(mail.clone(), chat.clone()),
        correlations.clone(),
        tracking.clone(),
        metrics.clone(),
    ));
    let engine = Arc::new(WebhookRetryEngine::new(
        events.clone(),
        handler,
        Arc::new(TokioScheduler),
        RetryPolicy::from_config(&config.relay),
        metrics.clone(),
    ));

    let router = Arc::new(EmailReplyRouter::new(
        mail,
        chat.clone(),
        correlations.clone(),
        config.chat.system_user_id.clone(),
        metrics.clone(),
    ));
    spawn_reply_poller(
        router.clone(),
        correlations,
        Duration::from_secs(config.relay.poll_interval_seconds.max(1)),
        Duration::from_secs(config.relay.correlation_ttl_seconds),
    );

    let app = create_app(
        AppState {
            engine,
            events,
            router,
            chat,
            tracking,
            metrics,
            webhook_secret: config.chat.webhook_secret.clone(),
        },
        config.server.max_request_size,
    );

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    info!("Notification relay listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn correlation_store(config: &AppConfig) -> Result<Arc<dyn ThreadCorrelationStore>> {
    match config.relay.correlation_backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryCorrelationStore::new())),
        "redis" => {
            let pool = create_redis_pool(&config.database.redis_url).await?;
            redis_health_check(&pool).await?;
            Ok(Arc::new(RedisCorrelationStore::new(
                pool,
                config.relay.correlation_ttl_seconds,
            )))
        }
        other => anyhow::bail!("Unknown correlation backend: {}", other),
    }
}

async fn event_store(config: &AppConfig) -> Result<Arc<dyn WebhookEventStore>> {
    match config.relay.event_backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryWebhookEventStore::new())),
        "mongodb" => {
            let client = create_mongo_client(&config.database.mongodb_url).await?;
            mongo_health_check(&client).await?;
            let database = get_database(&client, &config.database.mongodb_database);
            Ok(Arc::new(MongoWebhookEventStore::new(&database)))
        }
        other => anyhow::bail!("Unknown webhook event backend: {}", other),
    }
}
