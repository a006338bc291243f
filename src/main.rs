use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{error, info};

use hermes_gateway::config::GatewayConfig;
use hermes_gateway::dao::cache::CacheService;
use hermes_gateway::dao::{init_db, init_sqlite_pool};
use hermes_gateway::gateway::breaker::{BreakerConfig, CircuitBreaker};
use hermes_gateway::gateway::dispatcher::{ChatUpstream, Dispatcher, RouteFeedback};
use hermes_gateway::gateway::limiter::SlidingWindowLimiter;
use hermes_gateway::gateway::normalizer::Normalizer;
use hermes_gateway::gateway::proxy::UpstreamProxy;
use hermes_gateway::gateway::registry::ProviderRegistry;
use hermes_gateway::gateway::scorer::RoutingScorer;
use hermes_gateway::gateway::sink::{LogSink, LogSinkConfig};
use hermes_gateway::gateway::sync::ModelSync;
use hermes_gateway::logger::{init_dev_logger, init_prod_logger};
use hermes_gateway::web::handlers::setting_handler::apply_runtime_settings;
use hermes_gateway::web::server::{AppState, WebServer};

#[tokio::main]
async fn main() {
    //*
    //* Initialize logger
    //*
    let logger_result = match std::env::var("ENV").as_deref() {
        Ok("production") => init_prod_logger(),
        _ => init_dev_logger(),
    };
    if let Err(e) = logger_result {
        eprintln!("Failed to initialize logger: {}", e);
        std::process::exit(1);
    }

    //*
    //* Load configuration
    //*
    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    info!(port = config.port, db = %config.db_path, "configuration loaded");

    //*
    //* Initialize database
    //*
    info!("Initializing database...");
    let pool = match init_sqlite_pool(&config.db_url()).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("DB open failed: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = init_db(&pool, "data/init.sql").await {
        error!("DB init failed: {}", e);
        std::process::exit(1);
    }
    info!("Database initialized successfully");

    //*
    //* Assemble core services
    //*
    let normalizer = Arc::new(Normalizer::new());
    let registry = Arc::new(ProviderRegistry::new(pool.clone(), normalizer));
    if let Err(e) = registry.bootstrap().await {
        error!("Registry bootstrap failed: {}", e);
        std::process::exit(1);
    }

    let scorer = Arc::new(RoutingScorer::new());
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));

    let sink = LogSink::new(pool.clone(), LogSinkConfig::default());
    sink.initialize().await;
    sink.start();

    let sync = match ModelSync::new(registry.clone(), sink.clone()) {
        Ok(sync) => sync,
        Err(e) => {
            error!("Model sync setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let proxy = match UpstreamProxy::new() {
        Ok(proxy) => proxy,
        Err(e) => {
            error!("HTTP client setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let feedback = Arc::new(RouteFeedback {
        scorer: scorer.clone(),
        breaker: breaker.clone(),
        registry: registry.clone(),
        sink: sink.clone(),
        sync: sync.clone(),
    });
    let upstream: Arc<dyn ChatUpstream> = proxy.clone();
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        scorer.clone(),
        breaker.clone(),
        upstream,
        feedback,
    ));

    let limiter = Arc::new(RwLock::new(Arc::new(SlidingWindowLimiter::new(
        config.rate_limit_max,
        config.rate_limit_window,
    ))));

    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        registry: registry.clone(),
        scorer,
        breaker,
        dispatcher,
        limiter,
        sink: sink.clone(),
        sync: sync.clone(),
        proxy,
        models_cache: CacheService::new(Duration::from_secs(30), 16),
    };

    // settings 表里的运行时参数优先于内置默认
    apply_runtime_settings(&state).await;

    //*
    //* Background workers
    //*
    sync.sync_all().await;
    sync.start_periodic();

    info!("Application started successfully!");

    //*
    //* Serve
    //*
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let server = WebServer::new(state);
    tokio::select! {
        result = server.start(addr) => {
            if let Err(e) = result {
                error!("Server terminated: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, flushing pending logs");
            if let Err(e) = sink.flush().await {
                error!("final log flush failed: {}", e);
            }
        }
    }
}
