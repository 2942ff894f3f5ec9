use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use why_coach::chat;
use why_coach::model_client::ChatBackend;
use why_coach::{CoachConfig, CoachSession, HttpChatBackend};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start an interactive Why Discovery session.
    Chat {
        #[arg(long, help = "Model to use; defaults to WHY_COACH_MODEL or the first one offered.")]
        model: Option<String>,
        #[arg(long, env = "WHY_COACH_API_URL", help = "Base URL of the chat API.")]
        api_url: Option<String>,
    },
    /// List the models the chat API offers.
    Models {
        #[arg(long, env = "WHY_COACH_API_URL", help = "Base URL of the chat API.")]
        api_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g. RUST_LOG=info,why_coach=debug).
    // Logs go to stderr so they never interleave with the streamed conversation.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("why-coach starting with command: {:?}", cli.command);

    let mut config = CoachConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Chat { model, api_url } => {
            if let Some(url) = api_url {
                config = config.with_api_url(url);
            }
            if let Some(model) = model {
                config = config.with_preferred_model(model);
            }
            config.validate().context("Invalid configuration")?;

            let backend = HttpChatBackend::new(&config).context("Failed to build chat client")?;
            let coach = Arc::new(CoachSession::new(backend, &config));
            chat::run_chat(coach).await.context("Chat session failed")?;
            info!("Chat session finished.");
        }
        Commands::Models { api_url } => {
            if let Some(url) = api_url {
                config = config.with_api_url(url);
            }
            config.validate().context("Invalid configuration")?;

            let backend = HttpChatBackend::new(&config).context("Failed to build chat client")?;
            let models = backend
                .list_models()
                .await
                .with_context(|| format!("Failed to load models from {}", config.api_url))?;
            if models.is_empty() {
                println!("No AI models available. Please configure a model provider.");
            }
            for model in models {
                println!("{}\t{}\t{}", model.name, model.provider, model.server_name);
            }
        }
    }

    Ok(())
}
