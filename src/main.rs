use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatfolio::application::gateway::{create_router, AppState};
use chatfolio::application::rooms::RoomRegistry;
use chatfolio::application::sync::SyncHandler;
use chatfolio::config::AppConfig;
use chatfolio::domain::presence::PresenceRegistry;
use chatfolio::infrastructure::messenger::{
    DemoProfileApi, GraphProfileApi, GraphSendApi, NoopSendApi, SendApi, UserProfileApi,
};
use chatfolio::persistence::repository::PortfolioRepository;
use chatfolio::rate_limit::create_rate_limiter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatfolio=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    info!("Chatfolio realtime server starting...");

    let pool = chatfolio::persistence::init_database(&config.database_url).await?;

    let presence = Arc::new(PresenceRegistry::new());
    let rooms = Arc::new(RoomRegistry::new());

    // Outside demo mode the Messenger collaborators need a page token;
    // without one the server still runs, but offline
    let (profiles, send_api): (Arc<dyn UserProfileApi>, Arc<dyn SendApi>) = match (
        config.demo,
        config.page_access_token.as_deref(),
    ) {
        (true, _) => {
            info!("Demo mode: offline profiles, Send API disabled");
            (Arc::new(DemoProfileApi), Arc::new(NoopSendApi))
        }
        (false, Some(token)) => (
            Arc::new(GraphProfileApi::new(
                &config.graph_api_url,
                token,
                config.profile_cache_size,
            )),
            Arc::new(GraphSendApi::new(&config.graph_api_url, token)),
        ),
        (false, None) => {
            warn!("PAGE_ACCESS_TOKEN not set, falling back to demo collaborators");
            (Arc::new(DemoProfileApi), Arc::new(NoopSendApi))
        }
    };

    let handler = SyncHandler::new(
        pool.clone(),
        presence.clone(),
        rooms.clone(),
        profiles,
        send_api,
    );

    let state = Arc::new(AppState {
        handler,
        presence,
        rooms,
        portfolios: PortfolioRepository::new(pool),
        socket_address: config.advertised_socket_address(),
        demo: config.demo,
    });

    let limiter = create_rate_limiter(config.requests_per_minute);
    let app = create_router(state, limiter);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);
    info!(
        "Webview socket address: {}",
        config.advertised_socket_address()
    );

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Shutdown complete");
    Ok(())
}
