//! Resolver configuration module.
//!
//! This module owns the system resolver file:
//! - Backup, write, verify and rollback of nameserver lists
//! - Restoring the backup
//! - Handing control back to the system resolver service

pub mod executor;
pub mod manager;

pub use executor::{Elevation, ExecError, ExecOutput, PrivilegedExecutor, SystemExecutor};
pub use manager::{
    ConfigState, FileStore, LinkRestorePlan, ResolverConfigManager, ResolverPaths,
    ResolverStatus, ResolverStore,
};
