//! Command-line interface (CLI) argument parsing module.
//!
//! This module provides CLI argument parsing using `clap`.
//! Without a subcommand the interactive TUI starts; the subcommands
//! expose the same probing and resolver operations one at a time.

use crate::dns::prober::{DEFAULT_ECHO_COUNT, DEFAULT_ECHO_TIMEOUT_SECS};
use crate::resolver::manager::{DEFAULT_BACKUP, DEFAULT_RESOLV_CONF, DEFAULT_STUB_RESOLV_CONF};
use crate::resolver::{Elevation, ResolverPaths};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// CLI argument parser using clap derive macro.
///
/// # Example
///
/// ```ignore
/// let cli = Cli::parse();
/// match cli.command {
///     Some(Commands::Probe { provider, .. }) => { /* ... */ }
///     Some(Commands::Apply { provider, .. }) => { /* ... */ }
///     None => { /* interactive mode */ }
/// }
/// ```
#[derive(Parser, Debug)]
#[command(
    name = "dnschanger",
    version,
    about = "Probe DNS providers and switch the system resolver",
    long_about = "Pick a DNS provider from a catalog, check its servers with ICMP echo, \
                  and write them to /etc/resolv.conf with a safe backup and rollback.",
    infer_subcommands = true
)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    pub format: OutputFormat,

    #[command(flatten)]
    pub resolver: ResolverArgs,

    #[command(flatten)]
    pub probe: ProbeArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Resolver file locations and privilege elevation.
#[derive(Args, Debug, Clone)]
pub struct ResolverArgs {
    /// Resolver file to manage
    #[arg(long, global = true, env = "DNSCHANGER_RESOLV_CONF", default_value = DEFAULT_RESOLV_CONF)]
    pub resolv_conf: PathBuf,

    /// Backup written before every change
    #[arg(long, global = true, env = "DNSCHANGER_BACKUP", default_value = DEFAULT_BACKUP)]
    pub backup: PathBuf,

    /// systemd-resolved stub file linked back on turn off
    #[arg(long, global = true, env = "DNSCHANGER_STUB", default_value = DEFAULT_STUB_RESOLV_CONF)]
    pub stub: PathBuf,

    /// How privileged commands obtain root
    #[arg(long, global = true, value_enum, default_value_t = Elevation::Sudo)]
    pub elevate: Elevation,
}

impl ResolverArgs {
    /// The configured file locations.
    #[must_use]
    pub fn paths(&self) -> ResolverPaths {
        ResolverPaths::new(&self.resolv_conf, &self.backup, &self.stub)
    }
}

/// Echo probe tuning.
#[derive(Args, Debug, Clone, Copy)]
pub struct ProbeArgs {
    /// Echo requests per address
    #[arg(short, long, global = true, default_value_t = DEFAULT_ECHO_COUNT)]
    pub count: u32,

    /// Seconds to wait for each echo reply
    #[arg(short, long, global = true, default_value_t = DEFAULT_ECHO_TIMEOUT_SECS)]
    pub timeout: u64,
}

impl ProbeArgs {
    /// Per-echo timeout.
    #[must_use]
    pub fn echo_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Where the provider catalog comes from.
#[derive(Args, Debug, Clone, Default)]
pub struct CatalogArgs {
    /// Provider catalog file (JSON format)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Custom providers (format: Name|ip,ip), replacing the catalog
    #[arg(long = "provider")]
    pub providers: Vec<String>,
}

/// Output format for CLI commands.
///
/// This enum represents different output formats that can be used
/// when displaying probe results and provider lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format (default, human-readable)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
    /// TSV format (tab-separated)
    Tsv,
}

impl OutputFormat {
    /// Get all available output format names.
    #[must_use]
    pub fn names() -> &'static [&'static str] {
        &["table", "json", "csv", "tsv"]
    }

    /// Field separator for delimited formats.
    #[must_use]
    pub fn separator(&self) -> Option<char> {
        match self {
            Self::Csv => Some(','),
            Self::Tsv => Some('\t'),
            Self::Table | Self::Json => None,
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            _ => Err(format!(
                "Unknown format: {}. Valid options are: {:?}",
                s,
                Self::names()
            )),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
            Self::Tsv => write!(f, "tsv"),
        }
    }
}

/// Available commands for the dnschanger CLI.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Launch the interactive terminal user interface (TUI).
    ///
    /// Select a provider to probe it, Enter to use it, `o` to hand DNS
    /// back to systemd-resolved, `r` to restore the backup.
    #[command(alias = "i")]
    Interactive {
        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// List the providers in the catalog.
    #[command(alias = "l")]
    List {
        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// Probe every address of a provider with ICMP echo.
    ///
    /// Results are printed as each address completes.
    #[command(alias = "p")]
    Probe {
        /// Provider name (case-insensitive)
        provider: String,

        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// Write a provider's nameservers to the resolver file.
    ///
    /// The current file is backed up first and restored if the write
    /// cannot be verified.
    #[command(alias = "a")]
    Apply {
        /// Provider name (case-insensitive)
        provider: String,

        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// Hand the resolver file back to systemd-resolved.
    #[command(alias = "off")]
    Release,

    /// Copy the backup back over the resolver file.
    #[command(alias = "r")]
    Restore,

    /// Show the current resolver configuration.
    #[command(alias = "s")]
    Status,

    /// Export the provider catalog to a JSON file.
    ///
    /// The exported file can be edited and placed in the config directory
    /// or passed back with `--file`.
    #[command(alias = "e")]
    Export {
        /// Output file path
        #[arg(short, long, default_value = "providers.json")]
        output: PathBuf,

        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Commands {
    /// Whether the command runs the full-screen interface.
    #[must_use]
    pub fn is_interactive(command: Option<&Self>) -> bool {
        matches!(command, None | Some(Self::Interactive { .. }))
    }
}

/// Parse CLI arguments.
///
/// # Returns
///
/// Returns the parsed `Cli` struct.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
