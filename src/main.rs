use clap::{Parser, Subcommand};

use group_relay::application::errors::RelayError;
use group_relay::application::services::{ChatSession, CommandProcessor, RelayWorker, SessionControl};
use group_relay::infrastructure::adapters::console::ConsoleAdapter;
use group_relay::infrastructure::broker::{self, MemoryBroker};
use group_relay::infrastructure::config::Config;
use group_relay::infrastructure::storage::InMemoryGroupRegistry;

#[derive(Parser)]
#[command(name = "group-relay")]
#[command(about = "Group chat relay over a publish/subscribe broker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Username (overrides config)
    #[arg(short, long)]
    username: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a relay and a console chat session
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            run_chat(cli.config, cli.username);
        }
        Commands::Version => {
            println!("group-relay v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => {
            init_config(&cli.config);
        }
    }
}

fn load_config(config_path: &str, username_override: Option<String>) -> Config {
    let mut config = if std::path::Path::new(config_path).exists() {
        Config::load(config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::load_env()
        })
    } else {
        Config::load_env()
    };

    if let Some(username) = username_override {
        config.client.username = username;
    }
    config
}

fn run_chat(config_path: String, username_override: Option<String>) {
    let config = load_config(&config_path, username_override);
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let broker = match broker::from_config(&config.broker) {
        Ok(broker) => broker,
        Err(e) => {
            tracing::error!("Failed to set up broker: {}", e);
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    rt.block_on(async {
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let mut relay = RelayWorker::new(
            broker.clone(),
            CommandProcessor::new(InMemoryGroupRegistry::new()),
            config.broker.clone(),
        );
        let relay_task = tokio::spawn(async move {
            tracing::info!("Starting relay worker...");
            relay
                .run_until(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        if let Err(e) = run_console(broker, &config).await {
            tracing::error!("Chat session ended with error: {}", e);
        }

        let _ = stop_tx.send(());
        match relay_task.await {
            Ok(Ok(())) => tracing::info!("Stopping relay worker..."),
            Ok(Err(e)) => tracing::error!("Relay worker failed: {}", e),
            Err(e) => tracing::error!("Relay worker panicked: {}", e),
        }
    });
}

async fn run_console(broker: MemoryBroker, config: &Config) -> Result<(), RelayError> {
    let mut console = ConsoleAdapter::new();
    let mut session = ChatSession::new(broker, &config.client, console.printer());
    tracing::info!("Chat started as {}", session.username());

    let groups = session.fetch_groups().await?;
    if let Some(first) = groups.first() {
        session.select_group(first).await?;
    }
    session.handle_line("/help").await?;

    // Main loop (for console mode)
    while let Some(line) = console.read_line().await {
        match session.handle_line(&line).await {
            Ok(SessionControl::Quit) => break,
            Ok(SessionControl::Continue) => {}
            Err(e) => tracing::warn!("Command failed: {}", e),
        }
    }
    Ok(())
}

fn init_config(path: &str) {
    let config = Config::default();
    let yaml = match config.to_yaml() {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("Failed to generate config: {}", e);
            return;
        }
    };

    match std::fs::write(path, yaml) {
        Ok(()) => println!("Default config written to {}", path),
        Err(e) => eprintln!("Failed to write {}: {}", path, e),
    }
}
