use crate::config::Config;
use crate::error::ThrottlerResult;
use crate::fetcher::PostFetcher;
use crate::handlers::{get_post, health_check, readiness_check, AppState, SharedState};
use crate::middleware::logging_middleware;
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the gateway router around an existing fetcher.
pub fn create_app(fetcher: PostFetcher) -> Router {
    let shared_state: SharedState = AppState::shared(fetcher);

    Router::new()
        .route("/posts/:id", get(get_post))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(shared_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> ThrottlerResult<Self> {
        let fetcher = PostFetcher::from_config(&config).await?;
        Ok(Self::with_fetcher(config.bind_addr, fetcher))
    }

    pub fn with_fetcher(bind_addr: SocketAddr, fetcher: PostFetcher) -> Self {
        Self {
            app: create_app(fetcher),
            bind_addr,
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Gateway listening on {}", self.bind_addr);
        tracing::info!("Posts available at /posts/:id");
        tracing::info!("Health check available at /health");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
