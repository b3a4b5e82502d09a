use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediafeed")]
#[command(author, version, about = "Serve one media feed to DLNA renderers")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve a file, URL or command output until interrupted
    Serve(ServeArgs),

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Local path or direct content URL
    #[arg(required_unless_present = "exec")]
    pub source: Option<String>,

    /// Feed from the standard output of this command instead
    #[arg(long, num_args = 1.., allow_hyphen_values = true, value_name = "CMD")]
    pub exec: Vec<String>,

    /// Extension served to renderers (default: taken from the source)
    #[arg(long)]
    pub extension: Option<String>,

    /// Title used in logs
    #[arg(long)]
    pub title: Option<String>,

    /// Size in bytes, overriding what the source reports
    #[arg(long)]
    pub size: Option<u64>,

    /// Deliver sequentially even if the size is known
    #[arg(long)]
    pub sequential: bool,

    /// Subtitle file offered alongside the media
    #[arg(long)]
    pub subtitle: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Renderer address allowed to connect (repeatable)
    #[arg(long = "allow", value_name = "IP")]
    pub allow: Vec<String>,
}
