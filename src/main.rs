//! DocSphere entry point.
//!
//! Loads configuration, initializes tracing, opens the database and then
//! either serves the HTTP API or imports knowledge entries.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docsphere::config::{AppConfig, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER};
use docsphere::doctor::AiDoctorService;
use docsphere::http::start_server;
use docsphere::llm::{mask_token, OpenAiChatModel};
use docsphere::routes::create_router;
use docsphere::state::AppState;
use docsphere::storage::{ConversationStore, Database, KnowledgeStore, NewKnowledgeEntry};

/// DocSphere: an AI health-information assistant API
#[derive(Parser, Debug)]
#[command(name = "docsphere", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level filter (e.g., "docsphere=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Load medical knowledge entries from a JSON array file
    ImportKnowledge {
        /// File containing `[{"topic", "category", "content", "source"?}, ...]`
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = AppConfig::load(&args.config)?;

    // Log filter priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let json_logs = config.logging.is_json();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_filter))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!(
        app = %config.app.name,
        version = %config.app.version,
        debug = config.app.debug,
        config = %args.config,
        "Loaded configuration"
    );

    let db = Database::connect(&config.database).await?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, db).await,
        Command::ImportKnowledge { file } => import_knowledge(db, file).await,
    }
}

async fn serve(config: AppConfig, db: Database) -> Result<(), Box<dyn std::error::Error>> {
    let model = OpenAiChatModel::new(&config.openai)?;
    tracing::info!(
        model = %config.openai.model,
        base_url = %config.openai.base_url,
        api_key = %mask_token(&config.openai.api_key),
        "Initialized language model client"
    );

    let store = ConversationStore::new(db.clone());
    let doctor = AiDoctorService::new(&config, store, Arc::new(model));
    let expiry = doctor.conversations().spawn_expiry_task();
    tracing::info!(
        timeout_minutes = config.conversation.timeout_minutes,
        "Started idle conversation sweep"
    );

    let state = AppState::new(config.clone(), doctor, db);
    let app = create_router(state);

    let result = start_server(app, &config).await;
    expiry.abort();
    result?;
    Ok(())
}

async fn import_knowledge(db: Database, file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let contents = tokio::fs::read_to_string(&file).await?;
    let entries: Vec<NewKnowledgeEntry> = serde_json::from_str(&contents)?;

    let imported = KnowledgeStore::new(db).import_entries(&entries).await?;
    tracing::info!(file = %file.display(), imported, "Knowledge import finished");
    Ok(())
}
