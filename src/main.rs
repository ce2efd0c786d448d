use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use headlinea::aggregator::Aggregator;
use headlinea::config::Config;
use headlinea::display::LogSink;
use headlinea::fetcher::Fetcher;
use headlinea::routes::{self, ServerState};
use headlinea::scheduler::RefreshScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "headlinea=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("HEADLINEA_CONFIG").unwrap_or_else(|_| "headlinea.toml".to_string());
    let config = Config::load_or_default(&config_path)?;
    let port = match std::env::var("PORT") {
        Ok(port) => port.parse()?,
        Err(_) => config.port,
    };

    let fetcher = Fetcher::new(&config)?;
    let aggregator = Arc::new(Aggregator::new(fetcher, Arc::new(LogSink)));

    // A broken catalog leaves zero feeds; the server still comes up
    if let Err(e) = aggregator.load_sources(&config.sources).await {
        warn!("Starting without news sources: {}", e);
    }

    // Initial fetch runs in the background so the server is reachable right away
    let initial = aggregator.clone();
    tokio::spawn(async move {
        info!("Starting initial feed fetch");
        initial.refresh_news().await;
    });

    let scheduler = Arc::new(RefreshScheduler::new(config.refresh_period()));
    if config.auto_refresh {
        scheduler.enable_for(aggregator.clone());
    }

    let state = Arc::new(ServerState {
        aggregator,
        scheduler,
    });
    let app = routes::router(state, &config);

    // Start server
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Headlinea server running at http://localhost:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}
