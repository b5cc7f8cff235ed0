use anyhow::anyhow;
use chrono_tz::Tz;
use shuttle_api::{app, state::{AppState, AuthConfig}};
use shuttle_catalog::{PricingConfig, SlotCalendar, TierResolver};
use shuttle_core::{BusyCalendar, LogNotifier, NoCalendar, Notifier, Store};
use shuttle_order::{BookingOrchestrator, BookingPolicy, CreditLedger, EngineMetrics};
use shuttle_store::{app_config::Config, CachedCalendar, DbClient, HttpCalendar, PgStore, RedisClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shuttle_api=debug,shuttle_order=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!("Starting Shuttle API on port {}", config.server.port);

    // Database
    let db = DbClient::new(&config.database).await?;
    db.migrate().await?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(db.pool.clone(), config.database.lock_timeout_ms));

    // Redis is optional; without it there is no rate limiting and no calendar cache
    let redis = match &config.redis {
        Some(redis_config) => {
            let connected = match RedisClient::new(&redis_config.url).await {
                Ok(client) => client.ping().await.map(|_| client),
                Err(e) => Err(e),
            };
            match connected {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::warn!(error = %e, "Redis unavailable; continuing without it");
                    None
                }
            }
        }
        None => None,
    };

    let calendar = build_calendar(&config, redis.as_deref())?;
    let notifier = build_notifier(&config)?;
    let metrics = Arc::new(EngineMetrics::new()?);

    let tz: Tz = config
        .booking
        .time_zone
        .parse()
        .map_err(|e| anyhow!("Invalid booking.time_zone {}: {}", config.booking.time_zone, e))?;
    let slots = SlotCalendar::new(tz, config.booking.weekdays()?);
    let policy = BookingPolicy {
        start_hour: config.booking.start_hour,
        end_hour: config.booking.end_hour,
        interval_minutes: config.booking.interval_minutes,
        cutoff_minutes: config.booking.cutoff_minutes,
    };
    let resolver = TierResolver::new(PricingConfig {
        flat_rate_credits: config.pricing.flat_rate_credits,
        reject_non_monotonic_tiers: config.pricing.reject_non_monotonic_tiers,
    });

    let mut orchestrator = BookingOrchestrator::new(store.clone(), slots, policy)
        .with_calendar(calendar)
        .with_notifier(notifier)
        .with_resolver(resolver)
        .with_metrics(metrics.clone());
    if let Some(calendar_id) = config.calendar.as_ref().and_then(|c| c.default_calendar_id.clone()) {
        orchestrator = orchestrator.with_default_calendar(calendar_id);
    }

    let app_state = AppState {
        orchestrator: Arc::new(orchestrator),
        ledger: Arc::new(CreditLedger::new(store)),
        metrics,
        redis,
        rate_limit: config.rate_limit.clone(),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        rand_per_credit: config.credits.rand_per_credit,
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn build_calendar(config: &Config, redis: Option<&RedisClient>) -> anyhow::Result<Arc<dyn BusyCalendar>> {
    let Some(calendar_config) = &config.calendar else {
        return Ok(Arc::new(NoCalendar));
    };

    let http: Arc<dyn BusyCalendar> = Arc::new(HttpCalendar::new(
        &calendar_config.base_url,
        Duration::from_millis(calendar_config.timeout_ms),
    )?);

    let calendar: Arc<dyn BusyCalendar> = match redis {
        Some(redis) => Arc::new(CachedCalendar::new(http, redis.clone(), calendar_config.cache_ttl_seconds)),
        None => http,
    };
    Ok(calendar)
}

#[cfg(feature = "kafka")]
fn build_notifier(config: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
    match &config.kafka {
        Some(kafka) => {
            let producer = shuttle_store::EventProducer::new(&kafka.brokers)?;
            Ok(Arc::new(shuttle_store::KafkaNotifier::new(producer, kafka.topic.clone())))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

#[cfg(not(feature = "kafka"))]
fn build_notifier(config: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
    if config.kafka.is_some() {
        tracing::warn!("Kafka configured but the binary was built without the `kafka` feature; logging notifications instead");
    }
    Ok(Arc::new(LogNotifier))
}
