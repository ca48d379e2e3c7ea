//! Nameserver reachability probing.
//!
//! Each address is checked with an ICMP echo run by an external `ping`
//! process. Probes for one provider run concurrently; their outcomes are
//! funneled through a channel and handed to the caller's sink from a
//! single task, so sinks never need their own locking.

#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

use crate::dns::parser::{parse_average_latency, parse_stats};
use crate::dns::types::ProbeOutcome;
use futures::stream::{FuturesUnordered, Stream};
use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Default number of echo requests per address.
pub const DEFAULT_ECHO_COUNT: u32 = 4;

/// Default time to wait for each echo reply in seconds.
pub const DEFAULT_ECHO_TIMEOUT_SECS: u64 = 2;

/// Extra time granted on top of `echo_count * echo_timeout` before a
/// probe is abandoned.
const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Output of one reachability check.
#[derive(Debug, Clone, Default)]
pub struct ProbeOutput {
    /// Process exit code, `None` if killed by a signal
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ProbeOutput {
    /// Both output streams joined, for diagnostics.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", "") => format!("probe exited with code {:?} and no output", self.exit_code),
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// A mechanism that sends `echo_count` echoes to an address and reports
/// the raw output.
///
/// Implementations must not enforce the overall deadline themselves;
/// [`Prober`] wraps every call in a timeout.
pub trait ProbeRunner: Send + Sync + 'static {
    /// Run one check against `address`.
    fn run(
        &self,
        address: IpAddr,
        echo_count: u32,
        echo_timeout: Duration,
    ) -> impl Future<Output = io::Result<ProbeOutput>> + Send;
}

/// Runs the system `ping` binary.
#[derive(Debug, Clone)]
pub struct SystemPing {
    program: String,
}

impl SystemPing {
    /// Use `ping` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("ping")
    }

    /// Use a specific ping executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SystemPing {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeRunner for SystemPing {
    fn run(
        &self,
        address: IpAddr,
        echo_count: u32,
        echo_timeout: Duration,
    ) -> impl Future<Output = io::Result<ProbeOutput>> + Send {
        // iputils flags: numeric output, echo count, per-reply wait in seconds
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("-n")
            .arg("-c")
            .arg(echo_count.to_string())
            .arg("-W")
            .arg(echo_timeout.as_secs().max(1).to_string())
            .arg(address.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        async move {
            let output = cmd.output().await?;
            Ok(ProbeOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// Receives probe outcomes as they complete.
pub trait OutcomeSink {
    /// Called once per completed probe, never concurrently.
    fn on_outcome(&mut self, outcome: ProbeOutcome);
}

impl<F> OutcomeSink for F
where
    F: FnMut(ProbeOutcome),
{
    fn on_outcome(&mut self, outcome: ProbeOutcome) {
        self(outcome);
    }
}

/// Echo count and timing for a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Echo requests per address
    pub echo_count: u32,
    /// Wait per echo reply
    pub echo_timeout: Duration,
    /// Slack added to the overall deadline
    pub grace: Duration,
}

impl ProbeSettings {
    /// Create settings with the default grace period.
    #[must_use]
    pub fn new(echo_count: u32, echo_timeout: Duration) -> Self {
        Self {
            echo_count: echo_count.max(1),
            echo_timeout,
            grace: DEFAULT_GRACE,
        }
    }

    /// Time after which a probe is reported as timed out.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.echo_timeout * self.echo_count + self.grace
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::new(
            DEFAULT_ECHO_COUNT,
            Duration::from_secs(DEFAULT_ECHO_TIMEOUT_SECS),
        )
    }
}

/// Concurrent nameserver prober.
///
/// # Example
///
/// ```ignore
/// let prober = Prober::new();
/// let token = CancellationToken::new();
/// let outcomes = prober
///     .probe(&provider.addresses, &mut |o: ProbeOutcome| println!("{}", o.summary_line()), &token)
///     .await;
/// ```
pub struct Prober<R = SystemPing> {
    runner: Arc<R>,
    settings: ProbeSettings,
}

impl Prober<SystemPing> {
    /// Create a prober using the system `ping` with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(ProbeSettings::default())
    }

    /// Create a prober using the system `ping` with custom settings.
    #[must_use]
    pub fn with_settings(settings: ProbeSettings) -> Self {
        Self::with_runner(SystemPing::new(), settings)
    }
}

impl Default for Prober<SystemPing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ProbeRunner> Prober<R> {
    /// Create a prober around any [`ProbeRunner`].
    pub fn with_runner(runner: R, settings: ProbeSettings) -> Self {
        Self {
            runner: Arc::new(runner),
            settings,
        }
    }

    /// Current probe settings.
    #[must_use]
    pub fn settings(&self) -> ProbeSettings {
        self.settings
    }

    /// Probe a single address.
    pub async fn probe_one(&self, address: &str) -> ProbeOutcome {
        probe_address(self.runner.as_ref(), self.settings, address).await
    }

    /// Lazily probe every address, yielding outcomes in completion order.
    ///
    /// Nothing runs until the stream is polled. The stream ends after one
    /// outcome per address.
    pub fn stream<'a>(
        &'a self,
        addresses: &'a [String],
    ) -> impl Stream<Item = ProbeOutcome> + 'a {
        addresses
            .iter()
            .map(|address| self.probe_one(address))
            .collect::<FuturesUnordered<_>>()
    }

    /// Probe every address concurrently, delivering each outcome to `sink`
    /// as it completes.
    ///
    /// Returns once every probe has finished, with the outcomes in
    /// delivery order. If `cancel` fires first, in-flight probes are
    /// aborted and only the outcomes delivered so far are returned.
    pub async fn probe<S: OutcomeSink>(
        &self,
        addresses: &[String],
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Vec<ProbeOutcome> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(addresses.len());

        for address in addresses {
            let runner = Arc::clone(&self.runner);
            let settings = self.settings;
            let address = address.clone();
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                let outcome = probe_address(runner.as_ref(), settings, &address).await;
                let _ = tx.send(outcome);
            }));
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(addresses.len());
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    for handle in &handles {
                        handle.abort();
                    }
                    tracing::debug!(delivered = outcomes.len(), "Probe cancelled");
                    return outcomes;
                }
                next = rx.recv() => match next {
                    Some(outcome) => {
                        sink.on_outcome(outcome.clone());
                        outcomes.push(outcome);
                    }
                    None => break,
                },
            }
        }

        // Channel closed: every task either sent its outcome or panicked.
        let results = futures::future::join_all(handles).await;
        for (address, result) in addresses.iter().zip(results) {
            if let Err(e) = result {
                tracing::error!(%address, "Probe task failed: {e}");
                let outcome = ProbeOutcome::failed(address.as_str(), format!("probe task failed: {e}"));
                sink.on_outcome(outcome.clone());
                outcomes.push(outcome);
            }
        }

        outcomes
    }
}

async fn probe_address<R: ProbeRunner>(
    runner: &R,
    settings: ProbeSettings,
    address: &str,
) -> ProbeOutcome {
    let Ok(ip) = address.parse::<IpAddr>() else {
        return ProbeOutcome::failed(address, format!("'{address}' is not an IP address"));
    };

    let deadline = settings.deadline();
    match timeout(
        deadline,
        runner.run(ip, settings.echo_count, settings.echo_timeout),
    )
    .await
    {
        Err(_) => {
            tracing::debug!(%address, ?deadline, "Probe timed out");
            ProbeOutcome::timed_out(address, format!("no result within {deadline:?}"))
        }
        Ok(Err(e)) => {
            let diagnostic = match e.kind() {
                io::ErrorKind::NotFound => format!("probe tool not found: {e}"),
                io::ErrorKind::PermissionDenied => format!("permission denied running probe: {e}"),
                _ => format!("failed to run probe: {e}"),
            };
            tracing::warn!(%address, "{diagnostic}");
            ProbeOutcome::failed(address, diagnostic)
        }
        Ok(Ok(output)) => interpret(address, &output),
    }
}

/// Classify raw probe output.
///
/// Output without a packet summary is a soft failure, not an error.
#[must_use]
pub fn interpret(address: &str, output: &ProbeOutput) -> ProbeOutcome {
    let Some(stats) = parse_stats(&output.stdout) else {
        tracing::debug!(
            %address,
            exit_code = ?output.exit_code,
            "No packet statistics in probe output"
        );
        return ProbeOutcome::failed(address, output.diagnostic());
    };

    if stats.transmitted > 0 && stats.received >= stats.transmitted {
        let latency = parse_average_latency(&output.stdout);
        if latency.is_none() {
            tracing::warn!(%address, "Probe reported no loss but no round-trip summary");
        }
        ProbeOutcome::reachable(address, latency, output.stdout.as_str())
    } else if stats.received == 0 {
        ProbeOutcome::unreachable(address, output.stdout.as_str())
    } else {
        ProbeOutcome::lossy(address, stats.packet_loss(), output.stdout.as_str())
    }
}
