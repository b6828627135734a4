//! CLI argument definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "nova",
    about = "Nova - integration credential maintenance",
    version,
    author = "Nova Team"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional YAML settings file; `NOVA_*` variables are used when absent
    #[arg(long, short = 'c', env = "NOVA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Overrides `database_url` from settings
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or upgrade the configuration database
    Migrate,

    /// Generate a new base64 encryption key
    Keygen,

    /// Re-encrypt every stored document under the primary key
    RotateKeys {
        /// Only report what would be re-sealed
        #[arg(long)]
        dry_run: bool,
    },

    /// Print one user's configuration with secrets redacted
    Inspect {
        #[arg(long)]
        user: String,
    },

    /// Print a provider authorization URL for linking an account
    AuthorizeUrl {
        #[arg(long)]
        user: String,

        /// Connector kind (mail, calendar, music)
        #[arg(long)]
        connector: String,

        /// Same-site path the callback redirects to
        #[arg(long, default_value = "/settings/connectors")]
        return_to: String,
    },
}
