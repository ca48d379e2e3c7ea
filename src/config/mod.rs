//! Configuration module.
//!
//! This module provides functionality for loading and saving
//! the provider catalog from various sources.

pub mod loader;

pub use loader::{CatalogFile, ConfigLoader};
