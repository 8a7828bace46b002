//! keyward - command line client for the keyward authentication service.
//!
//! Every command that needs a session runs the authenticator first: the
//! cached token is reused when it still matches the requested identity and
//! factors, otherwise the user is prompted to log in.

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keyward_core::api::HttpSessionClient;
use keyward_core::auth::{
    Authenticator, NonInteractivePrompter, Prompter, Session, TerminalPrompter,
};
use keyward_core::config::{ConfigKey, ConfigStore, FileBackend, KeyringBackend, Provenance};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// keyward - keep an authenticated session with the keyward service
#[derive(Parser, Debug)]
#[command(name = "keyward", version, about)]
struct Cli {
    /// Username to log in as
    #[arg(long, global = true)]
    user: Option<String>,

    /// Act as another user (requires impersonation rights)
    #[arg(long, global = true)]
    impersonate: Option<String>,

    /// Require a yubikey factor on the session
    #[arg(long, global = true)]
    yubikey: bool,

    /// Requested session lifetime in seconds
    #[arg(long, global = true)]
    session_validity: Option<u64>,

    /// Authentication service base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Never prompt; fail if input would be needed
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Keep the cached token in the config file instead of the OS keychain
    #[arg(long, global = true)]
    no_keyring: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in, reusing the cached session when possible
    Login,

    /// Show the current session
    Whoami,

    /// Revoke and forget the cached session
    Logout,

    /// Inspect or change stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print a setting and where it came from
    Get { key: String },

    /// Store a setting
    Set { key: String, value: String },

    /// Remove a stored setting
    Unset { key: String },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

/// Persisted settings, then `KEYWARD_*` environment, then flags.
fn load_config(cli: &Cli) -> Result<ConfigStore> {
    let file = FileBackend::default_location()?;
    info!(path = ?file.path(), keyring = !cli.no_keyring, "Loading config");

    let mut config = if cli.no_keyring {
        ConfigStore::load(file)
    } else {
        ConfigStore::load(KeyringBackend::new(file))
    }
    .context("Failed to load config")?;

    config.apply_env();
    apply_flags(cli, &mut config);
    Ok(config)
}

fn apply_flags(cli: &Cli, config: &mut ConfigStore) {
    if let Some(ref user) = cli.user {
        config.set(ConfigKey::User, user.clone(), Provenance::Flag);
    }
    if let Some(ref target) = cli.impersonate {
        config.set(ConfigKey::Impersonate, target.clone(), Provenance::Flag);
    }
    if cli.yubikey {
        config.set(ConfigKey::Yubikey, "true", Provenance::Flag);
    }
    if let Some(validity) = cli.session_validity {
        config.set(ConfigKey::SessionValidity, validity.to_string(), Provenance::Flag);
    }
    if let Some(ref url) = cli.api_url {
        config.set(ConfigKey::ApiUrl, url.clone(), Provenance::Flag);
    }
}

fn session_client(config: &ConfigStore) -> Result<HttpSessionClient> {
    let client = match config.get(ConfigKey::ApiUrl) {
        Ok(url) if !url.is_empty() => HttpSessionClient::with_base_url(url),
        _ => HttpSessionClient::new(),
    };
    client.context("Failed to create HTTP client")
}

async fn run_authenticator<P: Prompter>(
    client: &mut HttpSessionClient,
    config: &mut ConfigStore,
    prompter: &mut P,
) -> Result<Session> {
    Authenticator::new(client, config, prompter)
        .authenticate()
        .await
        .context("Authentication failed")
}

async fn authenticate(cli: &Cli, config: &mut ConfigStore) -> Result<Session> {
    let mut client = session_client(config)?;

    if cli.non_interactive || !io::stdin().is_terminal() {
        run_authenticator(&mut client, config, &mut NonInteractivePrompter::new()).await
    } else {
        run_authenticator(&mut client, config, &mut TerminalPrompter::new()).await
    }
}

fn print_session(session: &Session, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(session)?);
        return Ok(());
    }

    println!("User:    {}", session.username);
    println!("Factors: {}", session.factor_list());
    if let Some(expiry) = session.expires_at() {
        println!(
            "Expires: {} ({} minutes)",
            expiry.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
            session.minutes_until_expiry().unwrap_or_default()
        );
    }
    Ok(())
}

async fn logout(config: &mut ConfigStore) -> Result<()> {
    let token = config.get_or_empty(ConfigKey::Token);
    if !token.is_empty() {
        let client = session_client(config)?;
        if let Err(e) = client.revoke(&token).await {
            warn!(error = %e, "Failed to revoke session token");
        }
    }

    config.unset(ConfigKey::Token)?;
    config.unset(ConfigKey::Impersonate)?;
    println!("Logged out.");
    Ok(())
}

fn config_command(action: &ConfigAction, config: &mut ConfigStore) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let key: ConfigKey = key.parse()?;
            match config.get(key) {
                Ok(value) => {
                    let shown = if key.is_secret() && !value.is_empty() {
                        "********".to_string()
                    } else {
                        value
                    };
                    let provenance = config.provenance(key).unwrap_or(Provenance::Default);
                    println!("{} = {} ({})", key, shown, provenance);
                }
                Err(_) => println!("{} is not set", key),
            }
        }
        ConfigAction::Set { key, value } => {
            let key: ConfigKey = key.parse()?;
            config
                .set_persistent(key, value.clone(), Provenance::Flag)
                .with_context(|| format!("Failed to store {}", key))?;
        }
        ConfigAction::Unset { key } => {
            let key: ConfigKey = key.parse()?;
            config
                .unset(key)
                .with_context(|| format!("Failed to remove {}", key))?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref())?;
    info!("keyward starting");

    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Login => {
            let session = authenticate(&cli, &mut config).await?;
            if cli.json {
                print_session(&session, true)?;
            } else {
                println!(
                    "Logged in as {} ({})",
                    session.username,
                    session.factor_list()
                );
            }
        }
        Commands::Whoami => {
            let session = authenticate(&cli, &mut config).await?;
            print_session(&session, cli.json)?;
        }
        Commands::Logout => logout(&mut config).await?,
        Commands::Config { ref action } => config_command(action, &mut config)?,
    }

    Ok(())
}
