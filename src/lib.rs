//! dnschanger - Probe DNS providers and switch the system resolver.
//!
//! This crate provides both a library API and a CLI tool for:
//! - Keeping a catalog of named DNS providers
//! - Probing provider nameservers with ICMP echo, concurrently
//! - Rewriting `/etc/resolv.conf` with backup, verification and rollback
//! - Handing the resolver back to `systemd-resolved`
//! - An interactive TUI that ties the above together
//!
//! # Library Usage
//!
//! ```ignore
//! use dnschanger::{ConfigLoader, Prober, ResolverConfigManager, ResolverPaths, SystemExecutor};
//!
//! let catalog = ConfigLoader::builtin();
//! let cloudflare = catalog.get("Cloudflare").unwrap();
//!
//! // Probe every address, printing results as they arrive
//! let prober = Prober::new();
//! let token = tokio_util::sync::CancellationToken::new();
//! prober
//!     .probe(&cloudflare.addresses, &mut |o| println!("{}", o.summary_line()), &token)
//!     .await;
//!
//! // Point the system at it
//! let manager = ResolverConfigManager::new(ResolverPaths::default(), SystemExecutor::default());
//! manager.apply(&cloudflare.addresses)?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Interactive TUI mode (default)
//! dnschanger
//!
//! # Probe and apply a provider
//! dnschanger probe cloudflare
//! sudo dnschanger apply cloudflare
//!
//! # Undo
//! sudo dnschanger restore
//! dnschanger release
//!
//! # Catalog
//! dnschanger list --format json
//! dnschanger export --output providers.json
//! ```

pub mod cli;
pub mod config;
pub mod dns;
pub mod error;
pub mod resolver;
pub mod session;
pub mod tui;

// Re-export commonly used types
pub use cli::{Cli, Commands, OutputFormat};
pub use config::ConfigLoader;
pub use dns::types::{ProbeOutcome, ProbeStatus, ProbeSummary, Provider, ProviderCatalog};
pub use dns::{ProbeRunner, ProbeSettings, Prober, SystemPing};
pub use error::{Error, Result};
pub use resolver::{
    ConfigState, Elevation, PrivilegedExecutor, ResolverConfigManager, ResolverPaths,
    SystemExecutor,
};
pub use session::{SessionCommand, SessionController, SessionEvent};
