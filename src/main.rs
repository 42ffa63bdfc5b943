mod repl;

use anyhow::Result;
use clap::{Parser, Subcommand};
use relay_agent::SseToolClient;
use relay_core::config::AppConfig;
use relay_core::tool_registry::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tool-relay",
    about = "Serve tools over a streaming session and chat with a model that calls them",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/tool-relay/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the model name
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Override the tool server stream URL
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the model, using tools from a running server (default)
    Chat,

    /// Start the tool server
    Serve {
        /// Bind host
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(long)]
        port: Option<u16>,
    },

    /// List the tools a running server offers
    Tools,

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize default configuration file
    Init,
    /// Print config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    // API keys may live in a .env file next to the binary's working directory.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "tool_relay=info,relay_server=info,relay_agent=info,warn".into()
        }))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(server_url) = &cli.server_url {
        config.client.server_url = server_url.clone();
    }

    match cli.command {
        Some(Commands::Serve { host, port }) => {
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }

            let mut registry = ToolRegistry::new();
            relay_tools::register_all(&mut registry, &config)?;
            relay_server::serve(config, Arc::new(registry)).await?;
        }
        Some(Commands::Tools) => {
            let client = SseToolClient::connect(&config.client).await?;
            let tools = client.tools();
            println!("  {} tools at {}:", tools.len(), config.client.server_url);
            for tool in tools {
                let params: Vec<_> = tool.parameter_schema.properties.keys().cloned().collect();
                println!("    • {}({}) — {}", tool.name, params.join(", "), tool.description);
            }
            client.close();
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, &config)?;
        }
        Some(Commands::Chat) | None => {
            tracing::info!(
                model = %config.provider.model,
                server = %config.client.server_url,
                "Starting chat"
            );
            repl::run(config).await?;
        }
    }

    Ok(())
}

fn handle_config_command(action: Option<ConfigAction>, config: &AppConfig) -> Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
        }
        Some(ConfigAction::Init) => {
            let path = AppConfig::default_path();
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                config.save()?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", AppConfig::default_path().display());
        }
    }
    Ok(())
}
