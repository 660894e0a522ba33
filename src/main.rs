use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::net::TcpListener;
use tokio::time::interval;
use tower_http::cors::CorsLayer;

use ticker_socket::api::{create_api_router, ApiState};
use ticker_socket::auth::JwtValidator;
use ticker_socket::config::{Config, CLEANUP_INTERVAL_SECS};
use ticker_socket::market::{PriceGenerator, PriceTable};
use ticker_socket::stream::{BroadcastRouter, SessionRegistry, StreamContext, StreamHandler};
use ticker_socket::subscriptions::{JsonFileBackend, SubscriptionService, SubscriptionStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    config.log_config();

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e.into());
    }

    // Process-wide state, initialized once and torn down with the process
    let prices = Arc::new(PriceTable::with_seed_prices());
    let router = Arc::new(BroadcastRouter::new());
    let registry = Arc::new(SessionRegistry::new());
    let store = Arc::new(SubscriptionStore::open(Box::new(JsonFileBackend::new(
        &config.store_path,
    )))?);
    let service = Arc::new(SubscriptionService::new(
        store.clone(),
        registry.clone(),
        router.clone(),
    ));
    let verifier = Arc::new(JwtValidator::new(&config.jwt_secret));

    // Start the per-second price broadcast loop
    PriceGenerator::new(prices.clone(), router.clone()).spawn();

    // Start background maintenance tasks
    start_background_tasks(registry.clone(), router.clone(), store.clone()).await;

    // Start API server
    let api_state = ApiState {
        service: service.clone(),
        verifier: verifier.clone(),
    };
    let api_router = create_api_router(api_state).layer(CorsLayer::permissive()); // Enable CORS for web clients

    let api_listener = TcpListener::bind(&config.api_bind_address).await?;
    info!(
        "🌐 HTTP API server running at http://{}",
        config.api_bind_address
    );
    let api_server = async move { axum::serve(api_listener, api_router).await };

    // Start WebSocket server
    let ws_listener = TcpListener::bind(&config.ws_bind_address).await?;
    info!(
        "🚀 WebSocket server running at ws://{}/ws with JWT authentication",
        config.ws_bind_address
    );

    let ctx = StreamContext {
        verifier,
        prices,
        router,
        registry,
        store,
        service,
    };

    let websocket_server = async move {
        info!("Ready to accept WebSocket connections");

        while let Ok((stream, addr)) = ws_listener.accept().await {
            let handler = StreamHandler::new(ctx.clone(), addr.to_string());
            tokio::spawn(handler.handle_connection(stream));
        }
    };

    // Run both servers concurrently
    tokio::select! {
        result = api_server => {
            error!("API server stopped: {:?}", result);
        }
        _ = websocket_server => {
            error!("WebSocket server stopped");
        }
    }

    Ok(())
}

async fn start_background_tasks(
    registry: Arc<SessionRegistry>,
    router: Arc<BroadcastRouter>,
    store: Arc<SubscriptionStore>,
) {
    // Closed-session sweep task
    let sweep_registry = registry.clone();
    let sweep_router = router.clone();
    tokio::spawn(async move {
        let mut interval_timer = interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));

        loop {
            interval_timer.tick().await;
            let swept = sweep_registry.sweep_closed(&sweep_router);
            if swept > 0 {
                info!("Swept {} closed sessions", swept);
            }
        }
    });

    // Stats task
    tokio::spawn(async move {
        let mut interval_timer = interval(Duration::from_secs(60)); // Every minute

        loop {
            interval_timer.tick().await;
            let sessions = registry.count();
            let registrations = router.registration_count();
            let users = store.user_count();

            if sessions > 0 || registrations > 0 || users > 0 {
                info!(
                    "Stats - Sessions: {}, Room registrations: {}, Subscribed users: {}",
                    sessions, registrations, users
                );
            }
        }
    });

    info!(
        "🧹 Started session sweep task (every {} seconds)",
        CLEANUP_INTERVAL_SECS
    );
    info!("📈 Started stats monitoring task (every 60 seconds)");
}
