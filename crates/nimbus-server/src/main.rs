use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nimbus::registry::ToolRegistry;
use nimbus::transport::server::serve;

mod weather;

use weather::WeatherToolSet;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the channel, so every diagnostic goes to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(WeatherToolSet::new()?))?;

    info!("Weather tool server running on stdio");

    serve(&registry, tokio::io::stdin(), tokio::io::stdout()).await
}
