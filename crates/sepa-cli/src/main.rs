//! SEPA CLI - Command-line tool for SEPA brokers
//!
//! Runs SPARQL queries and updates, registers clients and streams
//! subscription notifications.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sepa_client::{ConnectionHandler, Security, SubscriptionRequest};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::{endpoint, read_sparql};
use crate::config::{Config, EndpointArgs};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "sepa-cli")]
#[command(author, version, about = "SEPA SPARQL Event Processing CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// Query endpoint URL
    #[arg(long, env = "SEPA_QUERY_ENDPOINT")]
    query_endpoint: Option<String>,

    /// Update endpoint URL
    #[arg(long, env = "SEPA_UPDATE_ENDPOINT")]
    update_endpoint: Option<String>,

    /// Subscribe endpoint URL (ws:// or wss://)
    #[arg(long, env = "SEPA_SUBSCRIBE_ENDPOINT")]
    subscribe_endpoint: Option<String>,

    /// Client registration endpoint URL
    #[arg(long, env = "SEPA_REGISTER_ENDPOINT")]
    register_endpoint: Option<String>,

    /// Token request endpoint URL
    #[arg(long, env = "SEPA_TOKEN_ENDPOINT")]
    token_endpoint: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "SEPA_CONFIG")]
    config: Option<PathBuf>,

    /// Use the client-credentials flow whatever the URL scheme
    #[arg(long)]
    secure: bool,

    /// Accept self-signed broker certificates
    #[arg(long)]
    insecure_tls: bool,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a SPARQL query
    Query {
        /// SPARQL query text
        sparql: Option<String>,

        /// Read the query from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Run a SPARQL update
    Update {
        /// SPARQL update text
        sparql: Option<String>,

        /// Read the update from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Delete every triple
    Clear,

    /// Print every triple
    QueryAll,

    /// Subscribe to a query and print notifications until Ctrl+C
    Subscribe {
        /// SPARQL query text
        sparql: Option<String>,

        /// Read the query from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Subscription alias
        #[arg(long, default_value = "sepa-cli")]
        alias: String,

        /// Default graph URI
        #[arg(long)]
        default_graph: Option<String>,

        /// Named graph URI
        #[arg(long)]
        named_graph: Option<String>,
    },

    /// Register this client with the broker
    Register {
        /// Also request a bearer token
        #[arg(long)]
        token: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let endpoints = EndpointArgs {
        query: cli.query_endpoint.clone(),
        update: cli.update_endpoint.clone(),
        subscribe: cli.subscribe_endpoint.clone(),
        register: cli.register_endpoint.clone(),
        token: cli.token_endpoint.clone(),
    };
    let merged = config.merge_with_args(
        &endpoints,
        cli.output.map(<&str>::from),
        cli.no_color,
        cli.insecure_tls,
    );

    let format = OutputFormat::parse(&merged.output)
        .with_context(|| format!("Unknown output format '{}'", merged.output))?;
    let ctx = OutputContext::new(format, merged.no_color, cli.quiet);
    let security = cli.secure.then_some(Security::Secure);

    let handler =
        ConnectionHandler::new(merged.client.clone()).context("Failed to create SEPA client")?;
    let endpoints = &merged.client.endpoints;

    // Execute command
    match &cli.command {
        Commands::Query { sparql, file } => {
            let sparql = read_sparql(sparql.as_deref(), file.as_deref())?;
            let uri = endpoint(&endpoints.query, "query")?;
            commands::query(&handler, uri, &sparql, security, &ctx).await?;
        }

        Commands::Update { sparql, file } => {
            let sparql = read_sparql(sparql.as_deref(), file.as_deref())?;
            let uri = endpoint(&endpoints.update, "update")?;
            commands::update(&handler, uri, &sparql, security, &ctx).await?;
        }

        Commands::Clear => {
            let uri = endpoint(&endpoints.update, "update")?;
            commands::clear(&handler, uri, security, &ctx).await?;
        }

        Commands::QueryAll => {
            let uri = endpoint(&endpoints.query, "query")?;
            commands::query_all(&handler, uri, security, &ctx).await?;
        }

        Commands::Subscribe {
            sparql,
            file,
            alias,
            default_graph,
            named_graph,
        } => {
            let sparql = read_sparql(sparql.as_deref(), file.as_deref())?;
            let uri = endpoint(&endpoints.subscribe, "subscribe")?;

            let mut request = SubscriptionRequest::new(sparql, alias.clone());
            if let Some(graph) = default_graph {
                request = request.with_default_graph(graph.clone());
            }
            if let Some(graph) = named_graph {
                request = request.with_named_graph(graph.clone());
            }
            commands::subscribe(&handler, uri, request, security, &ctx).await?;
        }

        Commands::Register { token } => {
            commands::register(&handler, *token, &ctx).await?;
        }
    }

    Ok(())
}

// Implement conversion for OutputFormat to string (for config merge)
impl From<OutputFormat> for &str {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }
}
