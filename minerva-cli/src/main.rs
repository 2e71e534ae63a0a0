mod check;
mod connections;
mod prompt;

use clap::{Args, Parser, Subcommand};
use minerva::config::with_env_api_key;
use minerva::{ConnectionConfig, ConnectionStore};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minerva", version, about = "Talk to LLM providers through one adapter layer")]
struct Cli {
    /// Connections file (defaults to $MINERVA_CONFIG or ~/.minerva/connections.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported providers and their settings
    Providers {
        /// Print the connection and parameter schemas as JSON
        #[arg(long)]
        json: bool,
    },

    /// List saved connections
    Connections,

    /// Save a named connection
    AddConnection {
        name: String,

        #[arg(long)]
        provider: String,

        #[arg(long, default_value = "")]
        url: String,

        #[arg(long)]
        api_key: Option<String>,

        #[arg(long)]
        model: Option<String>,

        /// Make this the default connection
        #[arg(long)]
        default: bool,
    },

    /// Check that a connection works
    Check {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// Check every saved connection
        #[arg(long, conflicts_with_all = ["connection", "provider"])]
        all: bool,
    },

    /// Send a prompt and stream the reply to stdout
    Prompt {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// User message; read from stdin when omitted
        message: Option<String>,

        /// System instruction
        #[arg(short, long)]
        system: Option<String>,

        /// Wait for the whole reply instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Generation parameter, repeatable
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Send every parameter default not overridden by --param
        #[arg(long)]
        defaults: bool,

        /// JSON file with earlier messages ([{"role": "...", "content": "..."}])
        #[arg(long)]
        history: Option<PathBuf>,
    },
}

/// Either a saved connection or an ad-hoc one built from flags.
#[derive(Args, Debug, Clone)]
struct ConnectionArgs {
    /// Saved connection name (defaults to the configured default)
    #[arg(short, long)]
    connection: Option<String>,

    /// Provider id for an ad-hoc connection (v1, gemini, deepseek)
    #[arg(long, conflicts_with = "connection")]
    provider: Option<String>,

    #[arg(long, requires = "provider")]
    url: Option<String>,

    /// Overrides the saved key
    #[arg(long)]
    api_key: Option<String>,

    /// Overrides the saved model
    #[arg(long)]
    model: Option<String>,
}

impl ConnectionArgs {
    fn resolve(&self, store: &ConnectionStore) -> anyhow::Result<ConnectionConfig> {
        let mut config = match &self.provider {
            Some(provider) => {
                ConnectionConfig::new(provider, self.url.clone().unwrap_or_default())
            }
            None => store.resolve(self.connection.as_deref())?,
        };
        if let Some(key) = &self.api_key {
            config.api_key = Some(key.clone());
        }
        if let Some(model) = &self.model {
            config.model = Some(model.clone());
        }
        Ok(with_env_api_key(config))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "minerva=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let store = match cli.config {
        Some(path) => ConnectionStore::new(path),
        None => ConnectionStore::default_path(),
    };

    match cli.command {
        Commands::Providers { json } => {
            connections::print_providers(json)?;
        }
        Commands::Connections => {
            connections::print_connections(&store)?;
        }
        Commands::AddConnection {
            name,
            provider,
            url,
            api_key,
            model,
            default,
        } => {
            let mut config = ConnectionConfig::new(provider, url);
            config.api_key = api_key;
            config.model = model;
            connections::add_connection(&store, &name, config, default)?;
        }
        Commands::Check { conn, all } => {
            let ok = if all {
                check::run_check_all(&store).await?
            } else {
                check::run_check(conn.resolve(&store)?).await?
            };
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Prompt {
            conn,
            message,
            system,
            no_stream,
            params,
            defaults,
            history,
        } => {
            let request = prompt::PromptRequest {
                message,
                system,
                stream: !no_stream,
                params,
                defaults,
                history,
            };
            prompt::run_prompt(conn.resolve(&store)?, request).await?;
        }
    }

    Ok(())
}
