use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use bookstore_client::settings::ClientSettings;
use bookstore_client::types::export_bindings;
use bookstore_client::Client;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bookstore-client")]
#[command(version, about = "Bookstore session client", long_about = None)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and remember the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "BOOKSTORE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Restore the stored session and print it
    Status,
    /// Authenticated GET, printing the response data
    Get { path: String },
    Logout,
    /// Print order notifications until Ctrl-C
    Listen,
    /// Write TypeScript bindings for the UI-facing types
    Bindings { dir: PathBuf },
}

fn now_iso() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Command::Bindings { dir } = &cli.command {
        export_bindings(dir).with_context(|| format!("failed to export bindings to {}", dir.display()))?;
        return Ok(());
    }

    let settings = ClientSettings::load(cli.config.as_deref()).context("failed to load settings")?;
    let client = Client::build(settings)?;

    match cli.command {
        Command::Login { email, password } => {
            let profile = client.session().login(&email, &password).await?;
            print_json(&profile)?;
        }
        Command::Status => {
            let snapshot = client.session().init().await;
            print_json(&snapshot)?;
        }
        Command::Get { path } => {
            client.session().init().await;
            let data: Value = client.gateway().get(&path).await?;
            print_json(&data)?;
        }
        Command::Logout => client.session().logout().await,
        Command::Listen => listen(&client).await?,
        Command::Bindings { .. } => {}
    }
    Ok(())
}

async fn listen(client: &Client) -> Result<()> {
    let snapshot = client.session().init().await;
    if !snapshot.is_authenticated() {
        bail!("not signed in; run `bookstore-client login` first");
    }
    let mut notifications = client.subscribe_notifications();
    let Some(handle) = client.start_notifications() else {
        bail!("notifications are disabled in settings");
    };

    tracing::info!("listening for notifications. Press Ctrl+C to stop.");
    loop {
        tokio::select! {
            received = notifications.recv() => match received {
                Ok(notification) => println!("{} {}", now_iso(), notification.summary()),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "missed notifications"),
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }
    handle.stop().await;
    Ok(())
}
