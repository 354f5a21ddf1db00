use anyhow::Context;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use queue_system::{
    cache::CacheService,
    config::Config,
    controllers,
    database::Database,
    redis_client::RedisClient,
    services::{
        notifier::{FanoutNotifier, Notifier, RedisNotifier, WebhookNotifier},
        scheduler::SearchRangeExpander,
        tickets::PgTicketVerifier,
        CoreContext, QueueCore,
    },
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    let registry = tracing_subscriber::registry().with(filter);
    if config.app.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();
    init_tracing(&config);

    info!(environment = %config.app.environment, "Starting queue service");

    // Connect to the database
    let db = Database::new(&config.database.url, config.database.pool_size)
        .await
        .context("Failed to connect to database")?;
    info!("Database connected");

    db.run_migrations().await.context("Failed to run migrations")?;

    // Connect to Redis
    let redis = RedisClient::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Redis connected");

    let cache = CacheService::new(redis.clone(), config.redis.slot_summary_ttl_secs);

    // Каналы уведомлений: redis всегда, вебхук если настроен
    let mut channels: Vec<Arc<dyn Notifier>> = vec![Arc::new(RedisNotifier::new(redis))];
    if let Some(webhook) = WebhookNotifier::from_config(&config.notifications, &config.circuit_breaker)
        .context("Failed to create webhook notifier")?
    {
        info!("Webhook notifications enabled");
        channels.push(Arc::new(webhook));
    }

    let mut ctx = CoreContext::new(Arc::new(db.store()), Arc::new(FanoutNotifier::new(channels)))
        .with_policy(config.queue)
        .with_retry(config.retry.policy());
    if config.features.require_verified_ticket {
        info!("Ticket verification is required to join queues");
        ctx = ctx.with_tickets(Arc::new(PgTicketVerifier::new(db.pool.clone())));
    }
    let core = QueueCore::new(ctx);

    // Create the shared application state
    let app_state = Arc::new(AppState {
        db,
        cache,
        config: config.clone(),
        core,
    });

    // --- Start background tasks ---

    if config.features.enable_search_expansion {
        let expander = SearchRangeExpander::new(
            app_state.core.matching.clone(),
            Duration::from_secs(config.features.search_expand_interval_secs.max(1)),
        );
        task::spawn(expander.run());
    } else {
        warn!("Search range expansion is disabled");
    }

    // --- Start the web server ---

    let app = Router::new()
        .route("/", get(|| async { "Queue API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(app_state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("HOST/PORT do not form a valid socket address")?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
