use std::sync::Arc;

use actix_web::{App, HttpServer, middleware, web};
use anyhow::{Context, Result};
use log::{info, warn};
use reqwest::Client;

use hryvnia::api::{self, AppState};
use hryvnia::cache::spawn_eviction;
use hryvnia::config::Config;
use hryvnia::store::SharedRateStore;
use hryvnia::{MemoryRateCache, MemoryRateStore, NbuClient, PgRateStore, RateResolver, RetentionGate};

#[actix_web::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;

    let store: SharedRateStore = match &config.database_url {
        Some(url) => {
            let store = PgRateStore::connect(url)
                .await
                .context("Can't connect to the database")?;
            store.migrate().await.context("Can't run migrations")?;
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL is not set, rates will only be kept in memory");
            Arc::new(MemoryRateStore::new())
        }
    };

    let client = Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Can't build HTTP client")?;
    let source = NbuClient::new(client, config.nbu_api_url.clone())
        .with_format(config.feed_format)
        .with_retry(config.retry);

    let cache = Arc::new(MemoryRateCache::new());
    let sweeper = spawn_eviction(cache.clone(), config.cache_sweep_interval);

    let resolver = RateResolver::new(cache.clone(), store, Arc::new(source))
        .with_ttl(config.cache_ttl)
        .with_coverage(config.coverage);

    let state = web::Data::new(AppState {
        resolver,
        gate: RetentionGate::new(config.retention_months).with_max_span_days(config.max_span_days),
    });

    info!("Listening on {}", config.bind_addr);
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(api::configure)
    })
    .bind(&config.bind_addr)
    .with_context(|| format!("Can't bind {}", config.bind_addr))?
    .run()
    .await?;

    sweeper.abort();
    let stats = cache.stats();
    info!(
        "Shut down with {} cached rates ({} expired)",
        stats.total_entries, stats.expired_entries
    );
    Ok(())
}
