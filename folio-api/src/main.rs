use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use folio_api::{
    app,
    middleware::ResiliencyState,
    state::{AppState, AuthConfig, RateLimitSettings},
    worker,
};
use folio_catalog::{CurrencyCode, StaticRateTable};
use folio_order::{
    ApprovalWorkflow, DownloadAuthorizer, OrderManager, OrderPolicy, PaymentOrchestrator,
    PaymentVerifier, PendingOrderSweeper,
};
use folio_store::{
    app_config::Config, DbClient, EventProducer, KafkaNotifier, PgOrderRepository,
    PgTemplateCatalog, RazorpayGateway, RedisClient,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BREAKER_THRESHOLD: usize = 5;
const BREAKER_RESET: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "folio_api=debug,folio_order=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Folio API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let store = Arc::new(PgOrderRepository::new(db.pool.clone()));
    let catalog = Arc::new(PgTemplateCatalog::new(db.pool.clone()));

    // Redis (rate limiting)
    let redis = RedisClient::new(&config.redis.url)
        .await
        .context("Failed to create Redis client")?;

    // Kafka (notifications)
    let producer = EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?;
    let notifier = Arc::new(KafkaNotifier::new(producer, config.kafka.notification_topic.clone()));

    let base_currency = CurrencyCode::parse(&config.orders.base_currency)?;
    let rates = Arc::new(StaticRateTable::new(base_currency.clone(), &config.currency.rates)?);

    let mut policy = OrderPolicy::new(base_currency);
    policy.max_downloads = config.orders.max_downloads;
    policy.link_ttl = chrono::Duration::days(config.orders.link_ttl_days);
    policy.pending_ttl = chrono::Duration::minutes(config.orders.pending_ttl_minutes);
    policy.gateway_timeout = Duration::from_secs(config.payment.timeout_seconds);
    policy.notify_timeout = Duration::from_secs(config.orders.notify_timeout_seconds);
    policy.download_base_url = config.orders.download_base_url.clone();
    let policy = Arc::new(policy);

    let gateway = RazorpayGateway::new(
        &config.payment.api_base,
        &config.payment.key_id,
        &config.payment.key_secret,
        &config.payment.webhook_secret,
        policy.gateway_timeout,
    )?;
    let payments = Arc::new(PaymentOrchestrator::new(Arc::new(gateway), policy.gateway_timeout));

    let sweeper = Arc::new(PendingOrderSweeper::new(store.clone(), policy.pending_ttl));
    tokio::spawn(worker::start_pending_sweeper(
        sweeper,
        Duration::from_secs(config.orders.sweep_interval_seconds.max(1)),
    ));

    let state = AppState {
        orders: Arc::new(OrderManager::new(
            store.clone(),
            catalog,
            rates,
            payments.clone(),
            policy.clone(),
        )),
        verifier: Arc::new(PaymentVerifier::new(
            store.clone(),
            payments,
            notifier.clone(),
            policy.clone(),
        )),
        approvals: Arc::new(ApprovalWorkflow::new(store.clone(), notifier, policy)),
        downloads: Arc::new(DownloadAuthorizer::new(store)),
        rate_limiter: Some(Arc::new(redis)),
        rate_limit: RateLimitSettings {
            requests: config.rate_limit.requests,
            window_seconds: config.rate_limit.window_seconds,
        },
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        resiliency: Arc::new(ResiliencyState::new(BREAKER_THRESHOLD, BREAKER_RESET)),
        allowed_origins: config.server.allowed_origins.clone(),
        trust_forwarded_for: config.server.trust_forwarded_for,
    };

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
