//! DNS module.
//!
//! This module provides the nameserver-facing functionality:
//! - Provider and probe outcome types
//! - Ping output parsing
//! - Concurrent reachability probing

pub mod parser;
pub mod prober;
pub mod types;

pub use parser::{parse_average_latency, parse_stats, PingStats};
pub use prober::{OutcomeSink, ProbeOutput, ProbeRunner, ProbeSettings, Prober, SystemPing};
pub use types::*;
