//! CLI command definitions.
//!
//! Every query the HTTP API answers is also reachable from the command line.

use super::output::OutputFormat;
use crate::core::config::{CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
use crate::core::models::QueryType;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Motif Studio CLI - motif search over host graphs.
#[derive(Parser)]
#[command(name = "motifstudio")]
#[command(
    version,
    about,
    long_about = "Query host graphs for motifs, counts, and attribute schemas.\n\nHosts and providers come from the configuration file."
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Configuration file (JSON, or YAML by extension)
    #[arg(long, short = 'c', global = true, env = CONFIG_ENV_VAR, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show version information
    Version,

    /// Run the HTTP API server
    Serve(ServeArgs),

    /// Registered host providers
    #[command(subcommand)]
    Providers(ProviderCommands),

    /// Configured host graphs
    #[command(subcommand)]
    Hosts(HostCommands),

    /// Run a query against a host
    #[command(subcommand)]
    Query(QueryCommands),

    /// Temporary uploaded graphs
    #[command(subcommand)]
    Upload(UploadCommands),
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    #[arg(long, default_value_t = 5000)]
    pub port: u16,
}

#[derive(Subcommand)]
pub enum ProviderCommands {
    /// List providers in routing order
    List,
}

#[derive(Subcommand)]
pub enum HostCommands {
    /// List public hosts
    List,
    /// Report which hosts a provider accepts
    Validate,
}

#[derive(Subcommand)]
pub enum QueryCommands {
    /// Count the vertices of a host
    VertexCount(HostArgs),
    /// Count the edges of a host
    EdgeCount(HostArgs),
    /// Vertex attribute names and types
    VertexAttributes(HostArgs),
    /// Edge attribute names and types
    EdgeAttributes(HostArgs),
    /// Compile a motif without running it
    MotifParse(MotifParseArgs),
    /// Count motif matches in a host
    MotifCount(MotifArgs),
    /// Find motif matches in a host, optionally aggregated
    Motifs(MotifSearchArgs),
    /// Export a host graph
    Download(DownloadArgs),
}

#[derive(Args)]
pub struct HostArgs {
    /// Host ID
    pub host_id: String,
}

/// Motif source: inline, or read from a file.
#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct MotifSource {
    /// Query text, e.g. "A -> B; B -> C"
    #[arg(long, short = 'q')]
    pub query: Option<String>,

    /// Path to a query file
    #[arg(long = "query-file")]
    pub query_file: Option<PathBuf>,
}

#[derive(Args)]
pub struct MotifParseArgs {
    #[command(flatten)]
    pub source: MotifSource,

    /// Query language
    #[arg(long = "query-type", short = 't', value_enum, default_value_t = QueryType::Dotmotif)]
    pub query_type: QueryType,
}

#[derive(Args)]
pub struct MotifArgs {
    /// Host ID
    pub host_id: String,

    #[command(flatten)]
    pub source: MotifSource,

    /// Query language
    #[arg(long = "query-type", short = 't', value_enum, default_value_t = QueryType::Dotmotif)]
    pub query_type: QueryType,
}

#[derive(Args)]
pub struct MotifSearchArgs {
    /// Host ID
    pub host_id: String,

    #[command(flatten)]
    pub source: MotifSource,

    /// Query language
    #[arg(long = "query-type", short = 't', value_enum, default_value_t = QueryType::Dotmotif)]
    pub query_type: QueryType,

    /// Aggregation directive, e.g. 'motif.vertex' or 'sample|{"limit": 5}'
    #[arg(long, short = 'a')]
    pub aggregation: Option<String>,
}

#[derive(Args)]
pub struct DownloadArgs {
    /// Host ID
    pub host_id: String,

    /// Export format
    #[arg(long, default_value = "graphml")]
    pub export_format: String,

    /// Write the graph here instead of printing the response
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum UploadCommands {
    /// Upload a graph file as a temporary host
    Add(UploadAddArgs),
    /// List live uploads
    List,
    /// Show one upload
    Info(UploadIdArgs),
    /// Delete an upload
    Remove(UploadIdArgs),
}

#[derive(Args)]
pub struct UploadAddArgs {
    /// Graph file (.graphml, .graphml.gz, or .csv)
    pub path: PathBuf,

    /// Display name (defaults to the file name)
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct UploadIdArgs {
    /// Upload ID
    pub temp_id: String,
}
