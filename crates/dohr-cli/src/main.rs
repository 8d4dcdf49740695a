use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.dohr.Dohr1",
    default_service = "org.dohr.Dohr1",
    default_path = "/org/dohr/Dohr1"
)]
trait Dohr {
    async fn enroll(
        &self,
        name: &str,
        photo: Vec<u8>,
        track_uri: &str,
        track_name: &str,
    ) -> zbus::Result<String>;
    async fn remove_identity(&self, id: &str) -> zbus::Result<bool>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn entrances(&self) -> zbus::Result<String>;
    async fn remove_entrance(&self, id: &str) -> zbus::Result<()>;
    async fn toggle_pause(&self) -> zbus::Result<bool>;
    async fn get_pause_state(&self) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "dohr", about = "Dohr entrance daemon CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity from a reference photo
    Enroll {
        /// Display name, must be unique
        name: String,
        /// Path to a photo containing exactly one face
        photo: PathBuf,
        /// Playback cue to queue when this person enters
        #[arg(long, default_value = "")]
        track_uri: String,
        /// Human-readable name of the cue
        #[arg(long, default_value = "")]
        track_name: String,
    },
    /// List enrolled identities
    List,
    /// Remove an identity by ID
    Remove {
        id: String,
    },
    /// List entrance events inside the dedup window
    Entrances,
    /// Remove an entrance event by ID, re-arming detection for that person
    Forget {
        id: String,
    },
    /// Toggle the detection pause flag
    Pause,
    /// Show daemon status
    Status,
}

fn pretty(json: &str) -> String {
    serde_json::from_str::<serde_json::Value>(json)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| json.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = DohrProxy::new(&connection)
        .await
        .context("connecting to dohrd")?;

    match cli.command {
        Commands::Enroll { name, photo, track_uri, track_name } => {
            let bytes = std::fs::read(&photo)
                .with_context(|| format!("reading {}", photo.display()))?;
            let id = proxy.enroll(&name, bytes, &track_uri, &track_name).await?;
            println!("Enrolled {name} ({id})");
        }
        Commands::List => {
            println!("{}", pretty(&proxy.list_identities().await?));
        }
        Commands::Remove { id } => {
            if proxy.remove_identity(&id).await? {
                println!("Removed {id}");
            } else {
                println!("No identity with ID {id}");
            }
        }
        Commands::Entrances => {
            println!("{}", pretty(&proxy.entrances().await?));
        }
        Commands::Forget { id } => {
            proxy.remove_entrance(&id).await?;
            println!("Forgot entrance {id}");
        }
        Commands::Pause => {
            let paused = proxy.toggle_pause().await?;
            println!("Detection {}", if paused { "paused" } else { "resumed" });
        }
        Commands::Status => {
            println!("{}", pretty(&proxy.status().await?));
        }
    }

    Ok(())
}
