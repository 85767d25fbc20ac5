use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;

use nimbus::agent::Agent;
use nimbus::providers::anthropic::AnthropicProvider;
use nimbus::providers::configs::AnthropicProviderConfig;
use nimbus::transport::client::ChannelClient;

mod session;

use session::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the tool server to launch (a .py or .js script, or a native executable)
    server_path: PathBuf,

    /// Model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum tokens per completion
    #[arg(long)]
    max_tokens: Option<i32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AnthropicProviderConfig::from_env()?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    if cli.max_tokens.is_some() {
        config.max_tokens = cli.max_tokens;
    }
    let provider = AnthropicProvider::new(config)?;

    let channel = ChannelClient::connect(&cli.server_path)
        .await
        .context("failed to connect to the tool server")?;

    let agent = Agent::connect(Box::new(provider), Box::new(channel)).await?;

    let tool_names: Vec<&str> = agent
        .tools()
        .iter()
        .map(|tool| tool.name.as_str())
        .collect();
    println!(
        "Connected to server with tools: {}",
        style(tool_names.join(", ")).cyan()
    );

    Session::new(agent).start().await
}
