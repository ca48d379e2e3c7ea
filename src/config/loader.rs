//! Provider catalog loader.
//!
//! This module provides functionality to load provider catalogs
//! from JSON files, command-line arguments, or the built-in table.

use crate::dns::types::{Provider, ProviderCatalog};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name searched for in the config directory.
pub const CATALOG_FILE: &str = "providers.json";

/// Built-in providers, in display order.
const BUILTIN_PROVIDERS: &[(&str, &[&str])] = &[
    ("Shecan", &["178.22.122.100", "185.51.200.2"]),
    ("Electro Team", &["78.157.42.100", "78.157.42.101"]),
    ("Radar game", &["10.202.10.10", "10.202.10.11"]),
    ("403.online", &["10.202.10.202", "10.202.10.102"]),
    ("Asiatech", &["194.36.174.161", "178.22.122.100"]),
    ("Cloudflare", &["1.1.1.1", "1.0.0.1"]),
    ("Gaming 1", &["78.157.42.100", "78.157.42.101"]),
    ("Gaming 2", &["88.135.36.247", "0.0.0.0"]),
    ("Gaming 3", &["178.22.122.100", "185.51.200.2"]),
    ("Gaming 4", &["37.152.182.112", "0.0.0.0"]),
    ("Gaming 5", &["78.157.41.100", "88.135.36.247"]),
    ("Gaming 6", &["109.96.8.51", "78.157.42.101"]),
    ("Gaming 7", &["78.157.42.100", "77.157.42.110"]),
    ("Gaming 8", &["45.90.30.205", "45.90.30.193"]),
    ("Google DNS", &["8.8.8.8", "8.8.4.4"]),
    ("OpenDNS", &["208.67.222.222", "208.67.220.220"]),
    ("Quad9", &["9.9.9.9", "149.112.112.112"]),
    ("Comodo Secure DNS", &["8.26.56.26", "8.20.247.20"]),
    ("Norton ConnectSafe", &["199.85.126.10", "199.85.127.10"]),
    ("Yandex.DNS", &["77.88.8.8", "77.88.8.1"]),
];

/// On-disk catalog format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    /// Providers in display order
    pub providers: Vec<Provider>,
}

impl From<&ProviderCatalog> for CatalogFile {
    fn from(catalog: &ProviderCatalog) -> Self {
        Self {
            providers: catalog.providers().to_vec(),
        }
    }
}

/// Provider catalog loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// The built-in provider table.
    #[must_use]
    pub fn builtin() -> ProviderCatalog {
        let providers = BUILTIN_PROVIDERS
            .iter()
            .map(|(name, addrs)| Provider::new(*name, addrs.iter().copied()))
            .collect();
        // Static table, checked by tests
        ProviderCatalog::new(providers).unwrap_or_default()
    }

    /// Load a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or a
    /// provider is invalid.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let catalog = ConfigLoader::load_from_file("providers.json")?;
    /// for provider in catalog.providers() {
    ///     println!("{provider}");
    /// }
    /// ```
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<ProviderCatalog> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let file: CatalogFile = serde_json::from_str(&content)?;
        ProviderCatalog::new(file.providers)
    }

    /// Load the catalog from the default location.
    ///
    /// Searches in the following order:
    /// 1. `$CONFIG_DIR/dnschanger/providers.json`
    /// 2. the built-in table
    ///
    /// A file that exists but cannot be parsed is an error rather than a
    /// silent fallback.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but is invalid.
    pub fn load_default() -> Result<ProviderCatalog> {
        let path = Self::config_dir().join(CATALOG_FILE);
        if path.exists() {
            tracing::debug!(path = %path.display(), "Loading provider catalog");
            return Self::load_from_file(&path);
        }
        Ok(Self::builtin())
    }

    /// Load from `file` if given, otherwise from the default location.
    ///
    /// # Errors
    ///
    /// See [`load_from_file`](Self::load_from_file) and
    /// [`load_default`](Self::load_default).
    pub fn load(file: Option<&Path>) -> Result<ProviderCatalog> {
        match file {
            Some(path) => Self::load_from_file(path),
            None => Self::load_default(),
        }
    }

    /// Get the config directory path.
    #[must_use]
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dnschanger")
    }

    /// Create a catalog from command-line arguments.
    ///
    /// # Arguments
    ///
    /// * `entries` - Strings in format `"Name|ip,ip"`
    ///
    /// # Errors
    ///
    /// Returns an error if any entry is malformed or names a provider twice.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let args = vec!["Cloudflare|1.1.1.1,1.0.0.1".to_string()];
    /// let catalog = ConfigLoader::from_args(&args)?;
    /// ```
    pub fn from_args(entries: &[String]) -> Result<ProviderCatalog> {
        let providers = entries
            .iter()
            .map(|s| s.parse::<Provider>())
            .collect::<Result<Vec<_>>>()?;
        ProviderCatalog::new(providers)
    }

    /// Write a catalog as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(catalog: &ProviderCatalog, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&CatalogFile::from(catalog))?;
        std::fs::write(path, json).map_err(|e| {
            Error::config(format!("failed to write {}: {e}", path.display()))
        })
    }
}
