//! Ping output parsing.
//!
//! Pure functions that turn the text printed by `ping` into packet counts
//! and round-trip statistics. Both the iputils (`rtt min/avg/max/mdev`)
//! and BSD (`round-trip min/avg/max/stddev`) summary formats are accepted.

use regex::Regex;
use std::sync::OnceLock;

/// Packet counters from the ping summary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingStats {
    /// Echo requests sent
    pub transmitted: u32,
    /// Echo replies received
    pub received: u32,
}

impl PingStats {
    /// Fraction of echoes that got no reply, in `[0, 1]`.
    ///
    /// Nothing transmitted counts as total loss.
    #[must_use]
    pub fn packet_loss(&self) -> f64 {
        if self.transmitted == 0 {
            return 1.0;
        }
        let lost = self.transmitted.saturating_sub(self.received);
        f64::from(lost) / f64::from(self.transmitted)
    }
}

fn stats_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+) packets transmitted, (\d+) (?:packets )?received")
            .expect("static regex is valid")
    })
}

fn rtt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = ([\d.]+)/([\d.]+)/([\d.]+)/([\d.]+)",
        )
        .expect("static regex is valid")
    })
}

/// Extract the transmitted/received counters.
///
/// Returns `None` when the summary line is absent or its numbers overflow.
#[must_use]
pub fn parse_stats(raw_output: &str) -> Option<PingStats> {
    let caps = stats_regex().captures(raw_output)?;
    let transmitted = caps[1].parse().ok()?;
    let received = caps[2].parse().ok()?;
    Some(PingStats {
        transmitted,
        received,
    })
}

/// Extract the average round-trip time in milliseconds.
///
/// Returns `None` when the min/avg/max line is absent.
#[must_use]
pub fn parse_average_latency(raw_output: &str) -> Option<f64> {
    let caps = rtt_regex().captures(raw_output)?;
    caps[2].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_OK: &str = "\
PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.
64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=10.0 ms
64 bytes from 1.1.1.1: icmp_seq=2 ttl=57 time=20.0 ms
64 bytes from 1.1.1.1: icmp_seq=3 ttl=57 time=14.0 ms
64 bytes from 1.1.1.1: icmp_seq=4 ttl=57 time=18.0 ms

--- 1.1.1.1 ping statistics ---
4 packets transmitted, 4 received, 0% packet loss, time 3004ms
rtt min/avg/max/mdev = 10.000/15.500/20.000/2.000 ms
";

    const LINUX_DEAD: &str = "\
PING 10.255.255.1 (10.255.255.1) 56(84) bytes of data.

--- 10.255.255.1 ping statistics ---
4 packets transmitted, 0 received, 100% packet loss, time 3071ms
";

    const MACOS_OK: &str = "\
--- 8.8.8.8 ping statistics ---
4 packets transmitted, 4 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 11.210/12.806/14.402/1.125 ms
";

    #[test]
    fn test_parse_stats_full_reply() {
        let stats = parse_stats(LINUX_OK).unwrap();
        assert_eq!(
            stats,
            PingStats {
                transmitted: 4,
                received: 4
            }
        );
        assert_eq!(stats.packet_loss(), 0.0);
    }

    #[test]
    fn test_parse_stats_no_reply() {
        let stats = parse_stats(LINUX_DEAD).unwrap();
        assert_eq!(stats.received, 0);
        assert_eq!(stats.packet_loss(), 1.0);
    }

    #[test]
    fn test_zero_transmitted_is_total_loss() {
        let stats = parse_stats("0 packets transmitted, 0 received").unwrap();
        let loss = stats.packet_loss();
        assert!(!loss.is_nan());
        assert_eq!(loss, 1.0);
    }

    #[test]
    fn test_partial_loss() {
        let stats = parse_stats("4 packets transmitted, 3 received, 25% packet loss").unwrap();
        assert!((stats.packet_loss() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_more_received_than_sent_is_clamped() {
        let stats = PingStats {
            transmitted: 2,
            received: 3,
        };
        assert_eq!(stats.packet_loss(), 0.0);
    }

    #[test]
    fn test_parse_stats_missing() {
        assert_eq!(parse_stats("ping: unknown host"), None);
        assert_eq!(parse_stats(""), None);
    }

    #[test]
    fn test_parse_average_latency() {
        assert_eq!(
            parse_average_latency("rtt min/avg/max/mdev = 10.000/15.500/20.000/2.000 ms"),
            Some(15.5)
        );
        assert_eq!(parse_average_latency(LINUX_OK), Some(15.5));
        assert_eq!(parse_average_latency(MACOS_OK), Some(12.806));
        assert_eq!(parse_stats(MACOS_OK).unwrap().packet_loss(), 0.0);
    }

    #[test]
    fn test_parse_average_latency_missing() {
        assert_eq!(parse_average_latency(LINUX_DEAD), None);
    }
}
