use anyhow::Result;
use clap::{Parser, Subcommand};
use mirror_throttler::config::Config;
use mirror_throttler::fetcher::{write_outcomes, PostFetcher};
use mirror_throttler::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "mirror-throttler", version, about = "Fetch posts through rate-limited mirrors")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch a single post and print its body
    Fetch {
        id: u64,
    },
    /// Fetch posts 0..count in sequence and print every result
    SelfTest {
        #[arg(long, default_value_t = 70)]
        count: u64,
    },
    /// Run the HTTP gateway
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Logs go to stderr so fetched bodies on stdout stay clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("mirror_throttler={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(
        "Configuration: redis={}:{}, endpoints={}, boundary={:?}",
        config.redis_host,
        config.redis_port,
        config.endpoints.len(),
        config.quota_boundary
    );

    match cli.command {
        Command::Fetch { id } => {
            let fetcher = PostFetcher::from_config(&config)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialise fetcher: {}", e))?;
            write_outcomes(&fetcher, [id], &mut std::io::stdout()).await?;
        }
        Command::SelfTest { count } => {
            let fetcher = PostFetcher::from_config(&config)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialise fetcher: {}", e))?;
            write_outcomes(&fetcher, 0..count, &mut std::io::stdout()).await?;
        }
        Command::Serve => {
            let server = Server::new(config)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;
            server
                .run()
                .await
                .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;
        }
    }

    Ok(())
}
