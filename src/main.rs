//! retsio - Command-line client for RETS servers
//!
//! Logs in, runs one operation and logs out again.

mod commands;
mod config;
mod http;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use http::{Credentials, HttpTransport};
use retsio_client::Client;
use retsio_protocol::{OutputFormat, ResultFormat};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retsio")]
#[command(about = "Command-line client for RETS real-estate data servers")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "RETSIO_CONFIG")]
    config: Option<PathBuf>,

    /// Server login URL
    #[arg(short, long)]
    url: Option<String>,

    /// Username
    #[arg(short = 'U', long)]
    username: Option<String>,

    /// Password
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// User-Agent header value
    #[arg(long)]
    user_agent: Option<String>,

    /// Metadata cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Log in and print the negotiated settings
    Login,

    /// Log in and print the advertised capability paths
    Capabilities,

    /// Run a search and print one JSON line per row
    Search {
        /// Resource to search
        #[arg(short = 't', long, default_value = "Property")]
        search_type: String,

        /// Class within the resource
        #[arg(short, long, default_value = "ResidentialProperty")]
        class: String,

        /// DMQL query
        #[arg(short, long, default_value = "(Status=|A)")]
        query: String,

        /// Query language
        #[arg(long, default_value = "DMQL2")]
        query_type: String,

        /// Comma-separated field list
        #[arg(short, long)]
        select: Option<String>,

        /// Maximum rows to return
        #[arg(short, long)]
        limit: Option<u64>,

        /// Row offset (1-based on most servers)
        #[arg(long)]
        offset: Option<u64>,

        /// Result encoding: COMPACT, COMPACT-DECODED or STANDARD-XML
        #[arg(short, long, default_value = "COMPACT-DECODED")]
        format: ResultFormat,

        /// Row shape: objects or arrays
        #[arg(short, long, default_value = "objects")]
        output: OutputFormat,

        /// Omit the header line in arrays output
        #[arg(long)]
        no_headers: bool,

        /// Do not ask the server for a record count
        #[arg(long)]
        no_count: bool,
    },

    /// Fetch metadata, using the local cache when it is fresh
    Metadata {
        /// Metadata type
        #[arg(short = 't', long = "type", default_value = "METADATA-SYSTEM")]
        metadata_type: String,

        /// Metadata ID
        #[arg(short, long, default_value = "*")]
        id: String,

        /// Metadata format
        #[arg(short, long, default_value = "STANDARD-XML")]
        format: String,
    },

    /// Log in and log out again
    Logout,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.url {
        config.server.url = Some(url);
    }
    if let Some(username) = cli.username {
        config.server.username = Some(username);
    }
    if let Some(password) = cli.password {
        config.server.password = Some(password);
    }
    if let Some(user_agent) = cli.user_agent {
        config.server.user_agent = Some(user_agent);
    }
    if let Some(dir) = cli.cache_dir {
        config.cache.dir = Some(dir);
    }

    let client_config = config.client_config()?;
    let credentials = Credentials {
        username: config.server.username.clone(),
        password: config.server.password.clone(),
    };
    let transport = HttpTransport::new(&client_config, credentials, config.timeout())?;
    let client = Client::new(client_config, Arc::new(transport));

    client.login().await.map_err(|e| {
        eprintln!("{}: {}", "Login failed".red(), e);
        e
    })?;

    let result = commands::execute(&client, cli.command).await;

    if !matches!(result, Ok(commands::Flow::LoggedOut)) {
        commands::logout_quietly(&client).await;
    }

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
    Ok(())
}
