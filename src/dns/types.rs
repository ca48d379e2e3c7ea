//! DNS types and data structures.
//!
//! This module provides the core types used for provider representation
//! and probe outcomes.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A named DNS configuration bundle.
///
/// Address order is significant: the first entry is the primary
/// nameserver, the rest are fallbacks in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provider {
    /// Provider name (e.g., "Cloudflare", "Quad9")
    pub name: String,
    /// Nameserver addresses, primary first
    pub addresses: Vec<String>,
}

impl Provider {
    /// Create a new provider.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let provider = Provider::new("Cloudflare", ["1.1.1.1", "1.0.0.1"]);
    /// ```
    pub fn new<I, S>(name: impl Into<String>, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }

    /// Check that the provider has at least one address and every
    /// address is an IP literal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending provider.
    pub fn validate(&self) -> Result<()> {
        if self.addresses.is_empty() {
            return Err(Error::config(format!(
                "provider '{}' has no addresses",
                self.name
            )));
        }
        for addr in &self.addresses {
            if addr.parse::<IpAddr>().is_err() {
                return Err(Error::config(format!(
                    "provider '{}' has invalid address '{addr}'",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for Provider {
    type Err = Error;

    /// Parse a `"Name | ip, ip"` entry.
    fn from_str(s: &str) -> Result<Self> {
        let (name, addrs) = s
            .split_once('|')
            .ok_or_else(|| Error::parse(format!("expected 'Name | ip, ip', got '{s}'")))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::parse(format!("missing provider name in '{s}'")));
        }

        let addresses: Vec<String> = addrs
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();

        let provider = Self::new(name, addresses);
        provider.validate().map_err(|e| Error::parse(e.to_string()))?;
        Ok(provider)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.name, self.addresses.join(", "))
    }
}

/// Immutable table of providers, in display order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderCatalog {
    providers: Vec<Provider>,
}

impl ProviderCatalog {
    /// Build a catalog, validating every provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on an invalid provider or a duplicate name.
    pub fn new(providers: Vec<Provider>) -> Result<Self> {
        for (idx, provider) in providers.iter().enumerate() {
            provider.validate()?;
            if providers[..idx].iter().any(|p| p.name == provider.name) {
                return Err(Error::config(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
        }
        Ok(Self { providers })
    }

    /// Look up a provider by name (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Provider> {
        self.providers
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Provider at a display index.
    #[must_use]
    pub fn by_index(&self, idx: usize) -> Option<&Provider> {
        self.providers.get(idx)
    }

    /// All providers, in display order.
    #[must_use]
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// Provider names, in display order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.name.as_str())
    }

    /// Get the number of providers in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Check if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Classification of a single probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// Every echo was answered
    Reachable,
    /// Some, but not all, echoes were answered
    Lossy,
    /// No echo was answered
    Unreachable,
    /// The probe did not finish before its deadline
    TimedOut,
    /// The probe could not run or its output was not understood
    Failed,
}

impl ProbeStatus {
    /// Check if the status indicates a usable nameserver.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Reachable)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reachable => write!(f, "reachable"),
            Self::Lossy => write!(f, "lossy"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of probing one address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// The probed address
    pub address: String,
    /// Probe classification
    pub status: ProbeStatus,
    /// Whether the address answered every echo
    pub reachable: bool,
    /// Packet loss ratio (0.0 = no loss, 1.0 = all lost)
    pub packet_loss: f64,
    /// Average round-trip time in milliseconds; `None` when unknown
    pub average_latency_ms: Option<f64>,
    /// Raw probe output or diagnostic text
    pub raw: String,
    /// When the probe finished
    pub completed_at: DateTime<Local>,
}

impl ProbeOutcome {
    fn with_status(
        address: impl Into<String>,
        status: ProbeStatus,
        packet_loss: f64,
        average_latency_ms: Option<f64>,
        raw: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            status,
            reachable: status.is_success(),
            packet_loss,
            average_latency_ms,
            raw: raw.into(),
            completed_at: Local::now(),
        }
    }

    /// Every echo answered. `average_latency_ms` is `None` when the
    /// round-trip line could not be parsed.
    pub fn reachable(
        address: impl Into<String>,
        average_latency_ms: Option<f64>,
        raw: impl Into<String>,
    ) -> Self {
        Self::with_status(address, ProbeStatus::Reachable, 0.0, average_latency_ms, raw)
    }

    /// Some echoes lost.
    pub fn lossy(address: impl Into<String>, packet_loss: f64, raw: impl Into<String>) -> Self {
        Self::with_status(address, ProbeStatus::Lossy, packet_loss, None, raw)
    }

    /// No echo answered.
    pub fn unreachable(address: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::with_status(address, ProbeStatus::Unreachable, 1.0, None, raw)
    }

    /// Deadline expired before the probe finished.
    pub fn timed_out(address: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::with_status(address, ProbeStatus::TimedOut, 1.0, None, raw)
    }

    /// The probe could not run or produced output that was not understood.
    pub fn failed(address: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::with_status(address, ProbeStatus::Failed, 1.0, None, diagnostic)
    }

    /// One-line human summary, e.g. `[1.1.1.1] 12.345 ms`.
    #[must_use]
    pub fn summary_line(&self) -> String {
        match (self.status, self.average_latency_ms) {
            (ProbeStatus::Reachable, Some(ms)) => format!("[{}] {:.3} ms", self.address, ms),
            (ProbeStatus::Reachable, None) => format!("[{}] reachable, latency unknown", self.address),
            (ProbeStatus::Lossy, _) => format!(
                "[{}] unavailable ({:.0}% loss)",
                self.address,
                self.packet_loss * 100.0
            ),
            (ProbeStatus::TimedOut, _) => format!("[{}] timed out", self.address),
            _ => format!("[{}] unavailable", self.address),
        }
    }
}

/// Aggregated statistics over a set of probe outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProbeSummary {
    /// Total number of outcomes
    pub total: usize,
    /// Number of reachable addresses
    pub reachable: usize,
    /// Number of lossy or unreachable addresses
    pub unreachable: usize,
    /// Number of timeouts
    pub timed_out: usize,
    /// Number of probes that failed to run
    pub failed: usize,
    /// Average latency in milliseconds over reachable addresses
    pub avg_latency: Option<f64>,
    /// Minimum latency in milliseconds
    pub min_latency: Option<f64>,
    /// Maximum latency in milliseconds
    pub max_latency: Option<f64>,
    #[serde(skip)]
    latency_samples: usize,
}

impl ProbeSummary {
    /// Create a new empty summary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Summarize a slice of outcomes.
    #[must_use]
    pub fn from_outcomes(outcomes: &[ProbeOutcome]) -> Self {
        let mut summary = Self::new();
        for outcome in outcomes {
            summary.add(outcome);
        }
        summary
    }

    /// Add an outcome to the summary.
    pub fn add(&mut self, outcome: &ProbeOutcome) {
        self.total += 1;
        match outcome.status {
            ProbeStatus::Reachable => {
                self.reachable += 1;
                if let Some(latency) = outcome.average_latency_ms {
                    self.latency_samples += 1;
                    let n = self.latency_samples as f64;
                    self.avg_latency = Some(
                        self.avg_latency
                            .map(|a| a.mul_add(n - 1.0, latency) / n)
                            .unwrap_or(latency),
                    );
                    self.min_latency =
                        Some(self.min_latency.map(|m| m.min(latency)).unwrap_or(latency));
                    self.max_latency =
                        Some(self.max_latency.map(|m| m.max(latency)).unwrap_or(latency));
                }
            }
            ProbeStatus::Lossy | ProbeStatus::Unreachable => self.unreachable += 1,
            ProbeStatus::TimedOut => self.timed_out += 1,
            ProbeStatus::Failed => self.failed += 1,
        }
    }

    /// Fraction of reachable addresses as a percentage.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.reachable as f64 / self.total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        let p: Provider = "Cloudflare | 1.1.1.1, 1.0.0.1".parse().unwrap();
        assert_eq!(p.name, "Cloudflare");
        assert_eq!(p.addresses, vec!["1.1.1.1", "1.0.0.1"]);
        assert_eq!(p.to_string(), "Cloudflare | 1.1.1.1, 1.0.0.1");
    }

    #[test]
    fn test_provider_from_str_rejects_bad_entries() {
        assert!("no separator".parse::<Provider>().is_err());
        assert!(" | 1.1.1.1".parse::<Provider>().is_err());
        assert!("Empty | ".parse::<Provider>().is_err());
        assert!("Bad | 1.1.1.1, not-an-ip".parse::<Provider>().is_err());
    }

    #[test]
    fn test_catalog_lookup_and_order() {
        let catalog = ProviderCatalog::new(vec![
            Provider::new("Google DNS", ["8.8.8.8", "8.8.4.4"]),
            Provider::new("Quad9", ["9.9.9.9", "149.112.112.112"]),
        ])
        .unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.names().collect::<Vec<_>>(), ["Google DNS", "Quad9"]);
        assert_eq!(catalog.get("quad9").unwrap().addresses[0], "9.9.9.9");
        assert_eq!(catalog.by_index(0).unwrap().name, "Google DNS");
        assert!(catalog.get("Nope").is_none());
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        let result = ProviderCatalog::new(vec![
            Provider::new("A", ["1.1.1.1"]),
            Provider::new("A", ["8.8.8.8"]),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = ProbeOutcome::reachable("1.1.1.1", Some(12.5), "raw");
        assert!(ok.reachable);
        assert_eq!(ok.packet_loss, 0.0);
        assert_eq!(ok.summary_line(), "[1.1.1.1] 12.500 ms");

        let unknown = ProbeOutcome::reachable("1.1.1.1", None, "raw");
        assert!(unknown.reachable);
        assert!(unknown.summary_line().contains("latency unknown"));

        let lossy = ProbeOutcome::lossy("1.1.1.1", 0.5, "raw");
        assert!(!lossy.reachable);
        assert_eq!(lossy.summary_line(), "[1.1.1.1] unavailable (50% loss)");

        let failed = ProbeOutcome::failed("1.1.1.1", "ping: not found");
        assert!(!failed.reachable);
        assert_eq!(failed.packet_loss, 1.0);
        assert_eq!(failed.raw, "ping: not found");
    }

    #[test]
    fn test_probe_summary() {
        let outcomes = vec![
            ProbeOutcome::reachable("a", Some(10.0), ""),
            ProbeOutcome::reachable("b", Some(20.0), ""),
            ProbeOutcome::reachable("c", None, ""),
            ProbeOutcome::timed_out("d", ""),
            ProbeOutcome::unreachable("e", ""),
            ProbeOutcome::failed("f", ""),
        ];
        let summary = ProbeSummary::from_outcomes(&outcomes);

        assert_eq!(summary.total, 6);
        assert_eq!(summary.reachable, 3);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.unreachable, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.avg_latency, Some(15.0));
        assert_eq!(summary.min_latency, Some(10.0));
        assert_eq!(summary.max_latency, Some(20.0));
        assert!((summary.success_rate() - 50.0).abs() < f64::EPSILON);
    }
}
