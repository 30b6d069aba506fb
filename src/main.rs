//! CLI entry point for `lazysmtp`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use lazysmtp::config::{self, Config};
use lazysmtp::paths::{self, PlatformDirs};
use lazysmtp::{
    CaptureBackend, Message, MessageStore, SmtpService, SqliteStore, StoreError, arrival_channel,
};

#[derive(Parser)]
#[command(name = "lazysmtp", version, about = "Local SMTP server that captures outgoing mail")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// SMTP port to listen on [default: 2525]
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Path to the SQLite database [default: platform data directory]
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Config file [default: $LAZYSMTP_CONFIG or platform config directory]
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the SMTP server and log captured messages (default)
    Serve,
    /// List captured messages, newest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print the raw content of a message
    Show { id: String },
    /// Delete a message
    Delete { id: String },
    /// Delete every message
    Clear,
    /// Print the number of captured messages
    Count,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let resolver = PlatformDirs;
    let loaded = config::load_config(cli.config.as_deref(), &resolver);
    let configured_level = match &loaded {
        Ok(config) => config.general.log_level.as_str(),
        Err(_) => "info",
    };
    setup_logging(cli.verbose, configured_level);

    let mut config = loaded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Using default configuration");
        Config::default()
    });

    if let Some(port) = cli.port {
        config.smtp.port = port;
    }
    if let Some(db) = cli.db {
        config.storage.db_path = Some(db);
    }

    let db_path = match config.storage.db_path.clone() {
        Some(path) => path,
        None => paths::default_store_location(&resolver)
            .context("Failed to resolve the default database location")?,
    };
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database '{}'", db_path.display()))?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => cmd_serve(config, Arc::new(store), &db_path),
        Commands::List { json } => cmd_list(&store, json),
        Commands::Show { id } => cmd_show(&store, &id),
        Commands::Delete { id } => {
            store.delete(&id)?;
            Ok(())
        }
        Commands::Clear => {
            store.delete_all()?;
            Ok(())
        }
        Commands::Count => {
            println!("{}", store.count()?);
            Ok(())
        }
    }
}

/// Set up tracing on stderr. `RUST_LOG` wins over `-v`, which wins over the
/// configured level.
fn setup_logging(verbose: u8, configured: &str) {
    let level = match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Start the listener and follow arrivals until the process is killed
fn cmd_serve(config: Config, store: Arc<SqliteStore>, db_path: &Path) -> anyhow::Result<()> {
    let (notifier, arrivals) = arrival_channel();
    let backend = CaptureBackend::new(store.clone(), notifier);
    let service = SmtpService::new(config.smtp, backend);

    service
        .start()
        .with_context(|| format!("Failed to start SMTP server on port {}", service.port()))?;
    tracing::info!(
        port = service.port(),
        db = %db_path.display(),
        messages = store.count()?,
        "lazysmtp ready"
    );

    // The service holds a notifier for as long as it lives, so this only
    // returns if the process is shutting down.
    arrivals.refresh_loop(store.as_ref(), |listing| match listing {
        Ok(messages) => {
            if let Some(latest) = messages.first() {
                tracing::info!(
                    total = messages.len(),
                    latest = %latest.id,
                    subject = %latest.subject,
                    "Mailbox updated"
                );
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to list messages"),
    });

    service.stop();
    Ok(())
}

fn cmd_list(store: &dyn MessageStore, json: bool) -> anyhow::Result<()> {
    let messages = store.list()?;
    let mut out = std::io::stdout().lock();

    if json {
        serde_json::to_writer_pretty(&mut out, &messages)?;
        writeln!(out)?;
        return Ok(());
    }

    for message in &messages {
        writeln!(out, "{}", summary_line(message))?;
    }
    Ok(())
}

fn cmd_show(store: &dyn MessageStore, id: &str) -> anyhow::Result<()> {
    let message = match store.get(id) {
        Ok(message) => message,
        Err(StoreError::NotFound(_)) => anyhow::bail!("No message with id '{id}'"),
        Err(e) => return Err(e.into()),
    };

    let mut out = std::io::stdout().lock();
    writeln!(out, "ID:      {}", message.id)?;
    writeln!(out, "From:    {}", message.from)?;
    writeln!(out, "To:      {}", message.to)?;
    writeln!(out, "Subject: {}", message.subject)?;
    writeln!(out, "Date:    {}", message.date)?;
    if let Some(content_type) = message.content_type() {
        writeln!(out, "Type:    {content_type}")?;
    }
    writeln!(out)?;
    out.write_all(&message.body)?;
    Ok(())
}

fn summary_line(message: &Message) -> String {
    format!(
        "{}  {}  {:<30}  {}",
        message.id,
        message.date,
        truncate(&message.to, 30),
        message.subject
    )
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
