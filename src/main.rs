use anyhow::Context as _;
use clap::Parser;
use deploybot::config::Config;
use deploybot::flow::Engine;
use deploybot::messaging::TelegramAdapter;
use deploybot::render::RenderClient;
use deploybot::store::StateStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser)]
#[command(name = "deploybot", about = "Telegram control surface for Render services")]
struct Cli {
    /// Path to the configuration file (default: ./deploybot.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = Config::load(cli.config.as_deref())?;
    let token = config.bot_token()?;

    let store = Arc::new(
        StateStore::open(&config.store.path).with_context(|| {
            format!("failed to open state store: {}", config.store.path.display())
        })?,
    );
    let client = RenderClient::new(
        config.render.base_url.clone(),
        Duration::from_secs(config.render.timeout_secs),
    )
    .context("failed to build the API client")?;
    let engine = Arc::new(Engine::new(Arc::new(client), store));

    tracing::info!(api = %config.render.base_url, "deploybot starting");
    Arc::new(TelegramAdapter::new(&token, engine)).run().await;
    tracing::info!("deploybot stopped");
    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::new("info")
    };
    let fmt_layer = tracing_subscriber::fmt::layer().compact();
    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
