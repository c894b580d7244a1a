use std::net::SocketAddr;
use std::sync::Arc;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use call_signaling_cell::{
    CallCoordinator, CallTransport, CoordinatorConfig, LoopbackTransport, RedisSignalTransport,
    TransportSession,
};
use shared_config::AppConfig;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting call signaling API server");

    // Load configuration
    let config = AppConfig::from_env();

    // Pick the signal transport: Redis when configured, loopback otherwise
    let transport: Arc<dyn CallTransport> = if config.is_broker_configured() {
        match RedisSignalTransport::new(&config).await {
            Ok(transport) => {
                info!("Using Redis signal transport");
                Arc::new(transport)
            }
            Err(e) => {
                warn!("Redis transport unavailable ({}), falling back to loopback", e);
                Arc::new(LoopbackTransport::with_capacity(config.event_channel_capacity))
            }
        }
    } else {
        info!("Using in-process loopback signal transport");
        Arc::new(LoopbackTransport::with_capacity(config.event_channel_capacity))
    };

    // Start the call coordinator
    let coordinator = Arc::new(CallCoordinator::with_config(
        transport,
        CoordinatorConfig::from_app_config(&config),
    ));
    coordinator
        .start(TransportSession::default())
        .await
        .expect("Failed to start call coordinator");

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(coordinator)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .await
        .unwrap();
}
