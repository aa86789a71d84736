use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Archival backups to cold storage", long_about = None)]
#[command(name = "coldvault")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub global: GlobalArgs,
}

#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Configuration file (default: ~/.config/coldvault/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Inventory file, overriding the configured one
    #[arg(long, global = true)]
    pub inventory: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short = 'x', long, global = true)]
    pub verbose: bool,

    /// AWS access key id
    #[arg(long, global = true)]
    pub access_key: Option<String>,

    /// AWS secret access key
    #[arg(long, global = true)]
    pub secret_key: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a file as a new archive
    Upload(UploadArgs),
    /// Ask the service to prepare an archive for download
    RequestDownload {
        /// Item name
        #[arg(long)]
        name: String,
        /// Use the expedited retrieval tier
        #[arg(long)]
        urgent: bool,
    },
    /// Download an item whose retrieval job is ready
    Download(DownloadArgs),
    /// Check every pending retrieval job
    JobStatus,
    /// List uploaded items
    List,
    /// Delete an archive and forget the item
    Remove {
        #[arg(long)]
        name: String,
    },
    /// Forget the retrieval job of an item
    ForgetJob {
        #[arg(long)]
        name: String,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// File to upload
    #[arg(long)]
    pub file: PathBuf,

    /// Item name (default: the file name)
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub vault: Option<String>,

    #[arg(long)]
    pub region: Option<String>,

    /// Part size in MB, a power of two
    #[arg(long)]
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Item name
    #[arg(long)]
    pub name: String,

    /// Where to write the archive
    #[arg(long)]
    pub target: PathBuf,

    /// Range size in MB, a power of two
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Keep the job after downloading so the item can be fetched again
    #[arg(long)]
    pub keep_job: bool,
}
