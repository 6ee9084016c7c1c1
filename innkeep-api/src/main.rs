use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use innkeep_api::{app, metrics::ApiMetrics, AppState, AuthConfig};
use innkeep_booking::{
    CancellationService, GuestAccessService, RefundOrchestrator, ReservationService, TokenVerifier,
};
use innkeep_core::events::ReservationEventPublisher;
use innkeep_core::notify::LoggingNotificationSender;
use innkeep_core::payment::MockPaymentProcessor;
use innkeep_core::platform::Platform;
use innkeep_core::rate_limit::RateLimiter;
use innkeep_core::repository::{
    ConnectionRegistry, OwnerInbox, ReservationLedger, SyncFailureStore, UnitSettingsRepository,
};
use innkeep_store::app_config::Config;
use innkeep_store::{
    DbClient, PostgresConnectionRegistry, PostgresOwnerInbox, PostgresReservationLedger,
    PostgresSyncFailureStore, RedisClient, RedisRateLimiter,
};
use innkeep_sync::{
    AdapterRegistry, BackoffPolicy, CredentialManager, CredentialVault, HttpPlatformAdapter,
    RetryQueuePublisher, RetryScheduler, RetrySettings, SyncDispatcher,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "innkeep_api=debug,innkeep_sync=info,innkeep_booking=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Innkeep API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    // Redis
    let redis = RedisClient::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    let rate_limiter: Arc<dyn RateLimiter> =
        Arc::new(RedisRateLimiter::new(redis, config.rate_limits.clone()));

    let ledger: Arc<dyn ReservationLedger> = Arc::new(PostgresReservationLedger::new(db.pool.clone()));
    let settings: Arc<dyn UnitSettingsRepository> = Arc::new(db.clone());
    let connections: Arc<dyn ConnectionRegistry> =
        Arc::new(PostgresConnectionRegistry::new(db.pool.clone()));
    let failures: Arc<dyn SyncFailureStore> = Arc::new(PostgresSyncFailureStore::new(db.pool.clone()));
    let inbox: Arc<dyn OwnerInbox> = Arc::new(PostgresOwnerInbox::new(db.pool.clone()));

    // Sync engine
    let vault = CredentialVault::from_base64(&config.sync.credential_key)
        .context("Invalid sync.credential_key")?;
    let credentials = Arc::new(CredentialManager::new(
        Arc::new(vault),
        connections.clone(),
        config.sync.credential_refresh_window_seconds,
    ));
    let mut adapters = AdapterRegistry::new();
    for (name, base_url) in &config.sync.platform_base_urls {
        let platform = Platform::from_str(name).context("Unknown platform in sync.platform_base_urls")?;
        adapters = adapters.register(Arc::new(HttpPlatformAdapter::new(platform, base_url.clone())));
    }
    let backoff = BackoffPolicy::from_config(&config.sync);
    let dispatcher = Arc::new(SyncDispatcher::new(
        connections.clone(),
        adapters,
        credentials,
        failures.clone(),
        inbox.clone(),
        backoff,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (transport, dispatch_task) = event_transport(&config, dispatcher.clone(), shutdown_rx.clone());
    let events: Arc<dyn ReservationEventPublisher> =
        Arc::new(RetryQueuePublisher::new(transport, dispatcher.clone()));

    let scheduler = Arc::new(RetryScheduler::new(
        ledger.clone(),
        connections,
        failures.clone(),
        inbox.clone(),
        dispatcher.clone(),
        backoff,
        RetrySettings::from_config(&config.sync),
    ));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    // Booking services
    tracing::warn!("No payment provider configured, card refunds go through the mock processor");
    let payments = Arc::new(MockPaymentProcessor::new());
    let notifier = Arc::new(LoggingNotificationSender);
    let verifier = Arc::new(TokenVerifier::new(rate_limiter.clone()));

    let app_state = AppState {
        reservations: Arc::new(ReservationService::new(
            ledger.clone(),
            settings,
            events.clone(),
            notifier.clone(),
        )),
        cancellations: Arc::new(CancellationService::new(
            ledger.clone(),
            RefundOrchestrator::new(payments, ledger.clone()),
            events,
            notifier,
        )),
        guest_access: Arc::new(GuestAccessService::new(ledger, verifier)),
        dispatcher,
        inbox,
        sync_failures: failures,
        rate_limiter,
        metrics: Arc::new(ApiMetrics::new().context("Failed to register metrics")?),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("HTTP server stopped, draining background tasks");
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        tracing::error!("Retry scheduler task failed: {}", e);
    }
    if let Err(e) = dispatch_task.await {
        tracing::error!("Sync dispatch task failed: {}", e);
    }
    db.close().await;
    Ok(())
}

#[cfg(not(feature = "kafka"))]
fn event_transport(
    _config: &Config,
    dispatcher: Arc<SyncDispatcher>,
    shutdown: watch::Receiver<bool>,
) -> (Arc<dyn ReservationEventPublisher>, JoinHandle<()>) {
    channel_transport(dispatcher, shutdown)
}

#[cfg(feature = "kafka")]
fn event_transport(
    config: &Config,
    dispatcher: Arc<SyncDispatcher>,
    shutdown: watch::Receiver<bool>,
) -> (Arc<dyn ReservationEventPublisher>, JoinHandle<()>) {
    let Some(kafka) = config.kafka.clone() else {
        tracing::warn!("Built with kafka but no [kafka] section, using the in-process channel");
        return channel_transport(dispatcher, shutdown);
    };

    match innkeep_store::KafkaEventPublisher::new(&kafka.brokers) {
        Ok(producer) => {
            let task = tokio::spawn(async move {
                if let Err(e) = innkeep_api::worker::start_sync_worker(
                    kafka.brokers,
                    kafka.group_id,
                    dispatcher,
                    shutdown,
                )
                .await
                {
                    tracing::error!("Sync worker failed: {}", e);
                }
            });
            (Arc::new(producer), task)
        }
        Err(e) => {
            tracing::error!("Failed to create Kafka producer, using the in-process channel: {}", e);
            channel_transport(dispatcher, shutdown)
        }
    }
}

fn channel_transport(
    dispatcher: Arc<SyncDispatcher>,
    shutdown: watch::Receiver<bool>,
) -> (Arc<dyn ReservationEventPublisher>, JoinHandle<()>) {
    let (publisher, receiver) = innkeep_sync::ChannelPublisher::new(EVENT_CHANNEL_CAPACITY);
    let task = tokio::spawn(innkeep_sync::run_dispatch_loop(dispatcher, receiver, shutdown));
    (Arc::new(publisher), task)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
