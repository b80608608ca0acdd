use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use dialoguer::{Confirm, Password};
use patient_roster_core::{
    ClientConfig, HttpApi, NewPatient, ReceptionDesk, SqliteSessionStore, StompTransport, SyncSession,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod render;

type Desk = ReceptionDesk<HttpApi, SqliteSessionStore>;

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "patient-roster", about = "Live patient roster: chief dashboard and reception desk")]
struct Cli {
    /// JSON client config file
    #[arg(long, env = "PATIENT_ROSTER_CONFIG")]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(long)]
    api_url: Option<String>,

    /// STOMP WebSocket endpoint
    #[arg(long)]
    broker_url: Option<String>,

    /// SQLite file holding the login session
    #[arg(long, env = "PATIENT_ROSTER_SESSION_DB")]
    session_db: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "human")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow the roster live until Ctrl-C
    Watch,
    /// Print the current roster
    List,
    /// Register a patient
    Add {
        first_name: String,
        last_name: String,
        /// YYYY-MM-DD
        date_of_birth: NaiveDate,
    },
    /// Remove a patient
    Delete {
        id: i64,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Log in and remember the session
    Login {
        username: String,
        #[arg(long, env = "PATIENT_ROSTER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account and log in
    Register {
        username: String,
        full_name: String,
        #[arg(long, env = "PATIENT_ROSTER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("patient_roster=info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let session_db = match &cli.session_db {
        Some(path) => path.clone(),
        None => default_session_db()?,
    };

    let store = SqliteSessionStore::open(&session_db)
        .with_context(|| format!("Failed to open session store {}", session_db.display()))?;
    let api = Arc::new(config.http_api()?);
    let mut desk = ReceptionDesk::new(api, store).with_require_auth(config.require_auth);

    match cli.command {
        Commands::Watch => watch(&desk, &config).await,
        Commands::List => {
            let roster = desk.refresh().await?;
            match cli.format {
                OutputFormat::Human => print!("{}", render::roster_table(roster, Local::now().date_naive())),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(roster)?),
            }
            Ok(())
        }
        Commands::Add {
            first_name,
            last_name,
            date_of_birth,
        } => {
            let created = desk
                .add_patient(NewPatient::new(first_name, last_name, date_of_birth))
                .await?;
            match cli.format {
                OutputFormat::Human => println!("Patient added: #{} {}", created.id, created.full_name()),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&created)?),
            }
            Ok(())
        }
        Commands::Delete { id, yes } => delete(&mut desk, id, yes).await,
        Commands::Login { username, password } => {
            let password = password_or_prompt(password)?;
            let user = desk.login(&username, &password).await?;
            println!("Logged in as {} ({})", user.full_name, user.username);
            Ok(())
        }
        Commands::Register {
            username,
            full_name,
            password,
        } => {
            let password = password_or_prompt(password)?;
            let user = desk.register(&username, &password, &full_name).await?;
            println!("Registered and logged in as {} ({})", user.full_name, user.username);
            Ok(())
        }
        Commands::Logout => {
            desk.logout().await?;
            println!("Logged out");
            Ok(())
        }
        Commands::Whoami => {
            match desk.restore().await? {
                Some(user) => match &user.role {
                    Some(role) => println!("{} ({}, {role})", user.full_name, user.username),
                    None => println!("{} ({})", user.full_name, user.username),
                },
                None => println!("Not logged in"),
            }
            Ok(())
        }
    }
}

/// Defaults, then the config file, then `PATIENT_ROSTER_*`, then flags.
fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_json_file(path)?,
        None => ClientConfig::default(),
    };
    config.apply_env()?;
    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    if let Some(url) = &cli.broker_url {
        config.broker_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

fn default_session_db() -> Result<PathBuf> {
    let base = dirs::data_dir().context("No data directory on this platform; pass --session-db")?;
    Ok(base.join("patient-roster").join("session.db"))
}

async fn watch(desk: &Desk, config: &ClientConfig) -> Result<()> {
    let stomp = config.stomp_config()?.with_bearer(desk.bearer()?.as_deref());
    let transport = StompTransport::new(stomp);
    let handle = SyncSession::new(desk.roster_source()?, transport)
        .with_topic(config.topic.clone())
        .start();
    info!(session = %handle.id(), broker = %config.broker_url, "Watching roster");

    let mut views = handle.subscribe_view();
    loop {
        let view = views.borrow_and_update().clone();
        print!("{}", render::dashboard(&view, Local::now().date_naive()));
        io::stdout().flush()?;

        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn delete(desk: &mut Desk, id: i64, yes: bool) -> Result<()> {
    if !yes {
        let roster = desk.refresh().await?;
        let Some(patient) = roster.get(id) else {
            bail!("No patient with id {id}");
        };
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete patient #{id} {}?", patient.full_name()))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Cancelled");
            return Ok(());
        }
    }

    desk.delete_patient(id).await?;
    println!("Patient deleted");
    Ok(())
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(password) => Ok(password),
        None => Ok(Password::new().with_prompt("Password").interact()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_flag_skips_prompt() {
        assert_eq!(password_or_prompt(Some("s3cret".into())).unwrap(), "s3cret");
    }

    #[test]
    fn test_delete_flags() {
        let cli = Cli::try_parse_from(["patient-roster", "delete", "7", "--yes"]).unwrap();
        assert!(matches!(cli.command, Commands::Delete { id: 7, yes: true }));

        let cli = Cli::try_parse_from(["patient-roster", "delete", "7"]).unwrap();
        assert!(matches!(cli.command, Commands::Delete { id: 7, yes: false }));
    }

    #[test]
    fn test_login_password_optional() {
        let cli = Cli::try_parse_from(["patient-roster", "login", "reception"]).unwrap();
        match cli.command {
            Commands::Login { username, password } => {
                assert_eq!(username, "reception");
                // Falls back to the hidden prompt unless the env var is set
                assert_eq!(password, std::env::var("PATIENT_ROSTER_PASSWORD").ok());
            }
            other => panic!("expected login, got {other:?}"),
        }
    }
}
