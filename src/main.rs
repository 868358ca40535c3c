use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use feedbot_core::config::{self, Config};
use feedbot_core::repository::FeedbackRepository;
use feedbot_core::store;

#[derive(Parser)]
#[command(
    name = "feedbot",
    about = "feedbot - LINE course-feedback and chat bot",
    version = feedbot_core::VERSION,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the LINE webhook server
    Serve {
        /// Bind address (overrides gateway.host)
        #[arg(long)]
        host: Option<String>,
        /// Port (overrides gateway.port)
        #[arg(short, long)]
        port: Option<u16>,
        /// Config file (default: ~/.feedbot/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show configuration status
    Status {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the stored feedback for a course
    Feedback {
        /// Course key, e.g. "帶至華 作業系統"
        course: Vec<String>,
        /// Print the record as JSON
        #[arg(long)]
        json: bool,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("feedbot=info".parse()?)
                .add_directive("feedbot_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port, config } => cmd_serve(host, port, config).await?,
        Commands::Status { config } => cmd_status(config)?,
        Commands::Feedback { course, json, config } => cmd_feedback(course, json, config).await?,
    }

    Ok(())
}

fn load(config_path: Option<&PathBuf>) -> Result<Config> {
    config::load_config_from_env(config_path.map(PathBuf::as_path))
        .context("failed to load configuration")
}

#[cfg(feature = "http-api")]
async fn cmd_serve(host: Option<String>, port: Option<u16>, config_path: Option<PathBuf>) -> Result<()> {
    use std::sync::Arc;
    use feedbot_core::service::http::{self, AppState};

    let cfg = load(config_path.as_ref())?;
    cfg.validate().context("invalid configuration")?;

    let addr = format!(
        "{}:{}",
        host.unwrap_or_else(|| cfg.gateway.host.clone()),
        port.unwrap_or(cfg.gateway.port)
    );
    tracing::info!("feedbot v{} starting", feedbot_core::VERSION);
    let state = Arc::new(AppState::from_config(cfg)?);
    http::serve(&addr, state).await
}

#[cfg(not(feature = "http-api"))]
async fn cmd_serve(_host: Option<String>, _port: Option<u16>, _config: Option<PathBuf>) -> Result<()> {
    anyhow::bail!("HTTP server not available. Rebuild with: cargo build --features http-api")
}

fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.clone().unwrap_or_else(config::get_config_path);
    let cfg = load(config_path.as_ref())?;

    let mark = |set: bool| if set { "✓" } else { "not set" };

    println!("feedbot Status\n");
    println!(
        "Config: {} {}",
        path.display(),
        if path.exists() { "✓" } else { "✗" }
    );
    println!("Mode: {}", cfg.bot.mode);
    println!("LINE secret: {}", mark(!cfg.line.channel_secret.is_empty()));
    println!("LINE token: {}", mark(!cfg.line.channel_access_token.is_empty()));
    println!(
        "Gemini API: {} ({})",
        mark(!cfg.gemini.api_key.is_empty()),
        cfg.gemini.model
    );
    println!("Store: {}", cfg.store.backend);
    match cfg.store.backend {
        config::StoreBackend::Firestore => {
            println!("Credentials: {}", cfg.store.credentials.describe());
            match cfg.firestore_project() {
                Ok((_, project)) => println!("Firestore project: {project}"),
                Err(e) => println!("Firestore project: ✗ {e}"),
            }
        }
        config::StoreBackend::File => println!("Data dir: {}", cfg.data_dir().display()),
        config::StoreBackend::Memory => {}
    }

    match cfg.validate() {
        Ok(()) => println!("\nReady to serve."),
        Err(e) => println!("\nNot ready: {e}"),
    }
    Ok(())
}

async fn cmd_feedback(course: Vec<String>, json: bool, config_path: Option<PathBuf>) -> Result<()> {
    let joined = course.join(" ");
    let course_key = joined.trim();
    if course_key.is_empty() {
        anyhow::bail!("course key is required, e.g. feedbot feedback 帶至華 作業系統");
    }

    let cfg = load(config_path.as_ref())?;
    let store = store::create_store(&cfg)?;
    let repo = FeedbackRepository::new(store, cfg.bot.feedback_collection.clone());
    let record = repo.read(course_key).await?;

    if json {
        let value = serde_json::json!({ "course": course_key, "feedback": record });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match record {
        None => println!("No record for \"{course_key}\""),
        Some(entries) if entries.is_empty() => println!("\"{course_key}\" has no feedback yet"),
        Some(entries) => {
            println!("{} ({} entries)", course_key, entries.len());
            for entry in entries {
                println!("- {entry}");
            }
        }
    }
    Ok(())
}
