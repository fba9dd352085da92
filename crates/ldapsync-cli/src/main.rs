//! Ldapsync - Directory authentication and account synchronization
//!
//! Operator commands plus the long-running sync daemon.

mod commands;
mod config;
mod utils;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use commands::CommandContext;
use ldapsync_auth::DirectoryClient;
use ldapsync_core::config::LoggingConfig;
use ldapsync_metadata::MetadataStore;
use ldapsync_sync::DirectoryEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ldapsync")]
#[command(author = "Ldapsync Team")]
#[command(version = ldapsync_core::VERSION)]
#[command(about = "Directory authentication and account synchronization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LDAPSYNC_CONFIG")]
    config: Option<String>,

    /// Database URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    output: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync scheduler until interrupted
    Serve,

    /// Run one sync pass and print its counters
    Sync,

    /// Show configuration and sync status
    Status,

    /// Connect and bind with the stored configuration
    TestConnection,

    /// List directory users
    Users {
        /// Include inactive users
        #[arg(long)]
        all: bool,
    },

    /// Activate or deactivate a directory user
    SetActive {
        /// Directory user id
        id: String,

        /// true or false
        #[arg(action = ArgAction::Set)]
        active: bool,
    },

    /// Authenticate a user against the directory
    Login {
        username: String,

        #[arg(long, env = "LDAPSYNC_LOGIN_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create or update the directory configuration from a TOML file
    Configure {
        file: PathBuf,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("ldapsync {}", ldapsync_core::VERSION);
        return Ok(());
    }

    let service = config::load(cli.config.as_deref(), cli.database_url, cli.log_level)?;
    init_logging(&service.logging);

    debug!("Database: {}", service.database.url);
    let store = MetadataStore::new(&service.database.url, service.database.max_connections).await?;
    let client = DirectoryClient::ldap3(service.directory.clone());
    let engine = DirectoryEngine::new(Arc::new(store), client, service.scheduler.clone());

    let ctx = CommandContext {
        engine,
        output_format: cli.output,
    };

    match cli.command {
        Commands::Serve => commands::serve::execute(&ctx).await,
        Commands::Sync => commands::sync::execute(&ctx).await,
        Commands::Status => commands::status::execute(&ctx).await,
        Commands::TestConnection => commands::status::test_connection(&ctx).await,
        Commands::Users { all } => commands::users::list(&ctx, all).await,
        Commands::SetActive { id, active } => commands::users::set_active(&ctx, &id, active).await,
        Commands::Login { username, password } => {
            commands::login::execute(&ctx, &username, &password).await
        }
        Commands::Configure { file } => commands::configure::execute(&ctx, &file).await,
        Commands::Version => Ok(()),
    }
}

fn init_logging(logging: &LoggingConfig) {
    if let Err(e) = log_subscriber(logging, std::io::stderr).try_init() {
        eprintln!("Failed to install logger: {}", e);
    }
}

/// Both formats go to `writer`; stdout is left to command output
fn log_subscriber<W>(logging: &LoggingConfig, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        Box::new(registry.with(fmt::layer().json().with_target(true).with_writer(writer)))
    } else {
        Box::new(registry.with(fmt::layer().with_target(true).with_writer(writer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture(format: &str) -> String {
        let logging = LoggingConfig {
            level: "info".into(),
            format: format.into(),
        };
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = log_subscriber(&logging, move || sink.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(created = 3, "sync finished");
        });
        captured.text()
    }

    #[test]
    fn test_json_logs_use_the_log_writer() {
        let output = capture("json");
        let line = output.lines().next().unwrap();
        let event: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(event["fields"]["message"], "sync finished");
        assert_eq!(event["fields"]["created"], 3);
    }

    #[test]
    fn test_pretty_logs_use_the_log_writer() {
        let output = capture("pretty");
        assert!(output.contains("sync finished"));
        assert!(output.contains("created"));
    }
}
