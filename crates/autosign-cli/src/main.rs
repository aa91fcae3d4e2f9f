use anyhow::Result;
use autosign_core::config::{API_ISSUER_ID_ENV, API_KEY_ID_ENV, API_KEY_PATH_ENV};
use autosign_core::models::DevicePlatform;
use autosign_core::portal::demo;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod layout;

use commands::{
    Session,
    codesign::{CodesignArgs, handle_codesign_command},
    config::{ConfigCommands, handle_config_command},
    portal::{list_certificates, list_devices},
    preflight::handle_preflight_command,
};
use config::ApiKeyFlags;

#[derive(Parser)]
#[command(name = "autosign")]
#[command(about = "Keeps iOS and tvOS code signing assets in sync with the Apple Developer Portal", long_about = None)]
#[command(version = autosign_core::VERSION)]
struct Cli {
    /// Configuration profile to use
    #[arg(long, global = true)]
    profile: Option<String>,

    /// App Store Connect API key ID (overrides profile)
    #[arg(long, env = API_KEY_ID_ENV, global = true, hide_env_values = true)]
    api_key_id: Option<String>,

    /// App Store Connect issuer ID (overrides profile)
    #[arg(long, env = API_ISSUER_ID_ENV, global = true, hide_env_values = true)]
    api_issuer_id: Option<String>,

    /// Path to the .p8 private key (overrides profile)
    #[arg(long, env = API_KEY_PATH_ENV, global = true)]
    api_key_path: Option<PathBuf>,

    /// Use an in-memory Developer Portal seeded with a demo team
    #[arg(long, global = true)]
    demo: bool,

    /// Log per-item detail
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ensure certificates, App IDs, devices and profiles, then install them
    Codesign(CodesignArgs),

    /// Check that every target's entitlements can be provisioned
    Preflight {
        /// Project layout file (JSON)
        #[arg(long)]
        layout: PathBuf,
    },

    /// List registered devices
    Devices {
        /// Device platform: ios, tvos or macos
        #[arg(long, default_value = "ios")]
        platform: DevicePlatform,
    },

    /// List signing certificates by type
    Certificates,

    /// Manage CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (doesn't override existing env vars)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("autosign_core={level},autosign_cli={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Config commands don't need the portal, handle separately
    if let Commands::Config(cmd) = cli.command {
        return handle_config_command(cmd);
    }

    let file_config = config::load_config().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config file: {}", e);
        None
    });

    let flags = ApiKeyFlags {
        key_id: cli.api_key_id,
        issuer_id: cli.api_issuer_id,
        key_path: cli.api_key_path,
    };
    let resolved = config::resolve_config(cli.profile.as_deref(), &flags, file_config)?;

    let session = Session {
        config: resolved,
        demo: cli.demo || demo::is_enabled(),
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Codesign(args) => handle_codesign_command(&session, args).await?,
        Commands::Preflight { layout } => handle_preflight_command(&session, &layout)?,
        Commands::Devices { platform } => list_devices(&session, platform).await?,
        Commands::Certificates => list_certificates(&session).await?,
        Commands::Config(_) => unreachable!(), // Handled above
    }

    Ok(())
}
