//! Session controller.
//!
//! Glue between a presentation layer and the core: the front end sends
//! [`SessionCommand`]s, the controller probes the selected provider or
//! changes the resolver configuration, and reports back with
//! [`SessionEvent`]s on a single channel.

use crate::dns::{ProbeOutcome, ProbeRunner, ProbeSummary, Prober, Provider, ProviderCatalog, SystemPing};
use crate::error::Result;
use crate::resolver::ResolverConfigManager;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Requests from the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Select a provider by name and probe its addresses
    Select(String),
    /// Apply the selected provider to the resolver file
    Connect,
    /// Hand the resolver back to the system service
    TurnOff,
    /// Copy the backup back over the resolver file
    Restore,
    /// Stop the controller
    Shutdown,
}

/// User action a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Provider selection
    Select,
    /// Applying a provider
    Connect,
    /// Releasing to the system resolver
    TurnOff,
    /// Restoring the backup
    Restore,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "select provider"),
            Self::Connect => write!(f, "change DNS server"),
            Self::TurnOff => write!(f, "turn off DNS"),
            Self::Restore => write!(f, "restore DNS configuration"),
        }
    }
}

/// Notifications for the front end.
///
/// Every selection gets a fresh `run` number. Events of one probing run
/// carry the same number, so results of a superseded run can be told
/// apart even when the same provider was selected again.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Probing of a provider started
    ProbeStarted {
        /// Provider name
        provider: String,
        /// Selection this run belongs to
        run: u64,
        /// Addresses being probed
        addresses: Vec<String>,
    },
    /// One address finished probing
    Outcome {
        /// Provider the address belongs to
        provider: String,
        /// Selection this run belongs to
        run: u64,
        /// Probe result
        outcome: ProbeOutcome,
    },
    /// Every address of a provider finished probing
    ProbeFinished {
        /// Provider name
        provider: String,
        /// Selection this run belongs to
        run: u64,
        /// Aggregated results
        summary: ProbeSummary,
    },
    /// The provider's nameservers were written
    Applied {
        /// Provider name
        provider: String,
    },
    /// The resolver file was handed back to the system
    Released,
    /// The backup was restored
    Restored,
    /// An action failed
    Failed {
        /// What was attempted
        action: Action,
        /// Human-readable reason
        message: String,
    },
    /// An action was refused because another change is in flight
    Busy {
        /// The refused action
        action: Action,
    },
}

/// Routes front-end commands to the prober and the resolver manager.
pub struct SessionController<R: ProbeRunner = SystemPing> {
    catalog: Arc<ProviderCatalog>,
    prober: Arc<Prober<R>>,
    manager: Arc<ResolverConfigManager>,
    events: mpsc::UnboundedSender<SessionEvent>,
    selected: Option<Provider>,
    probe_cancel: Option<CancellationToken>,
    runs: u64,
    busy: Arc<AtomicBool>,
    config_tasks: Vec<JoinHandle<()>>,
}

impl<R: ProbeRunner> SessionController<R> {
    /// Create a controller that reports on `events`.
    pub fn new(
        catalog: Arc<ProviderCatalog>,
        prober: Arc<Prober<R>>,
        manager: Arc<ResolverConfigManager>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            catalog,
            prober,
            manager,
            events,
            selected: None,
            probe_cancel: None,
            runs: 0,
            busy: Arc::new(AtomicBool::new(false)),
            config_tasks: Vec::new(),
        }
    }

    /// The currently selected provider.
    #[must_use]
    pub fn selected(&self) -> Option<&Provider> {
        self.selected.as_ref()
    }

    /// Process commands until [`SessionCommand::Shutdown`] or the sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        while let Some(command) = commands.recv().await {
            if !self.handle(command) {
                break;
            }
        }
        self.shutdown().await;
    }

    /// Dispatch one command. Returns `false` on shutdown.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn handle(&mut self, command: SessionCommand) -> bool {
        tracing::debug!(?command, "Session command");
        self.config_tasks.retain(|task| !task.is_finished());

        match command {
            SessionCommand::Select(name) => self.select(&name),
            SessionCommand::Connect => self.connect(),
            SessionCommand::TurnOff => self.spawn_config(Action::TurnOff, |manager| {
                manager.release().map(|()| SessionEvent::Released)
            }),
            SessionCommand::Restore => self.spawn_config(Action::Restore, |manager| {
                manager.restore().map(|()| SessionEvent::Restored)
            }),
            SessionCommand::Shutdown => return false,
        }
        true
    }

    fn emit(&self, event: SessionEvent) {
        // The front end may already be gone during shutdown
        let _ = self.events.send(event);
    }

    fn select(&mut self, name: &str) {
        let Some(provider) = self.catalog.get(name).cloned() else {
            self.emit(SessionEvent::Failed {
                action: Action::Select,
                message: format!("unknown provider '{name}'"),
            });
            return;
        };

        if let Some(stale) = self.probe_cancel.take() {
            stale.cancel();
        }
        let token = CancellationToken::new();
        self.probe_cancel = Some(token.clone());
        self.selected = Some(provider.clone());
        self.runs += 1;
        let run = self.runs;

        self.emit(SessionEvent::ProbeStarted {
            provider: provider.name.clone(),
            run,
            addresses: provider.addresses.clone(),
        });

        let prober = Arc::clone(&self.prober);
        let events = self.events.clone();
        tokio::spawn(async move {
            let name = provider.name.clone();
            let outcome_events = events.clone();
            let sink_token = token.clone();
            let mut sink = move |outcome: ProbeOutcome| {
                if sink_token.is_cancelled() {
                    return;
                }
                let _ = outcome_events.send(SessionEvent::Outcome {
                    provider: name.clone(),
                    run,
                    outcome,
                });
            };
            let outcomes = prober.probe(&provider.addresses, &mut sink, &token).await;

            if token.is_cancelled() {
                tracing::debug!(provider = %provider.name, run, "Probe superseded");
                return;
            }
            let _ = events.send(SessionEvent::ProbeFinished {
                provider: provider.name,
                run,
                summary: ProbeSummary::from_outcomes(&outcomes),
            });
        });
    }

    fn connect(&mut self) {
        let Some(provider) = self.selected.clone() else {
            self.emit(SessionEvent::Failed {
                action: Action::Connect,
                message: "no provider selected".into(),
            });
            return;
        };

        self.spawn_config(Action::Connect, move |manager| {
            manager
                .apply(&provider.addresses)
                .map(|()| SessionEvent::Applied {
                    provider: provider.name,
                })
        });
    }

    /// Run a resolver change on the blocking pool, one at a time.
    fn spawn_config<F>(&mut self, action: Action, op: F)
    where
        F: FnOnce(&ResolverConfigManager) -> Result<SessionEvent> + Send + 'static,
    {
        if self.busy.swap(true, Ordering::AcqRel) {
            self.emit(SessionEvent::Busy { action });
            return;
        }

        let manager = Arc::clone(&self.manager);
        let events = self.events.clone();
        let busy = Arc::clone(&self.busy);

        self.config_tasks.push(tokio::spawn(async move {
            let event = match tokio::task::spawn_blocking(move || op(&manager)).await {
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    tracing::error!(%action, error = %e, "Resolver change failed");
                    SessionEvent::Failed {
                        action,
                        message: e.to_string(),
                    }
                }
                Err(e) => SessionEvent::Failed {
                    action,
                    message: format!("task failed: {e}"),
                },
            };
            busy.store(false, Ordering::Release);
            let _ = events.send(event);
        }));
    }

    async fn shutdown(&mut self) {
        if let Some(token) = self.probe_cancel.take() {
            token.cancel();
        }
        // Resolver changes are never abandoned halfway
        futures::future::join_all(self.config_tasks.drain(..)).await;
        tracing::debug!("Session stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{ProbeOutput, ProbeSettings};
    use crate::resolver::{ExecError, ExecOutput, PrivilegedExecutor, ResolverPaths};
    use std::future::Future;
    use std::io;
    use std::net::IpAddr;
    use std::time::Duration;

    const ORIGINAL: &str = "nameserver 192.168.1.1\n";
    const PING_OK: &str = "4 packets transmitted, 4 received, 0% packet loss, time 3004ms\n\
                           rtt min/avg/max/mdev = 10.1/15.5/20.2/3.1 ms\n";

    /// Answers every address at once, except the ones told to hang.
    #[derive(Default)]
    struct FakePing {
        hang: Vec<IpAddr>,
    }

    impl ProbeRunner for FakePing {
        fn run(
            &self,
            address: IpAddr,
            _echo_count: u32,
            _echo_timeout: Duration,
        ) -> impl Future<Output = io::Result<ProbeOutput>> + Send {
            let hang = self.hang.contains(&address);
            async move {
                if hang {
                    std::future::pending::<()>().await;
                }
                Ok(ProbeOutput {
                    exit_code: Some(0),
                    stdout: PING_OK.to_string(),
                    stderr: String::new(),
                })
            }
        }
    }

    struct SlowExecutor(Duration);

    impl PrivilegedExecutor for SlowExecutor {
        fn run(&self, _argv: &[String]) -> std::result::Result<ExecOutput, ExecError> {
            std::thread::sleep(self.0);
            Ok(ExecOutput::default())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        paths: ResolverPaths,
        controller: SessionController<FakePing>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    fn harness(runner: FakePing, exec_delay: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResolverPaths::in_dir(dir.path());
        std::fs::write(&paths.resolv, ORIGINAL).unwrap();
        std::fs::write(&paths.stub, "nameserver 127.0.0.53\n").unwrap();

        let catalog = ProviderCatalog::new(vec![
            Provider::new("Cloudflare", ["1.1.1.1", "1.0.0.1"]),
            Provider::new("Google DNS", ["8.8.8.8", "8.8.4.4"]),
        ])
        .unwrap();
        let prober = Prober::with_runner(runner, ProbeSettings::new(1, Duration::from_millis(50)));
        let manager = ResolverConfigManager::new(paths.clone(), SlowExecutor(exec_delay));

        let (tx, events) = mpsc::unbounded_channel();
        let controller =
            SessionController::new(Arc::new(catalog), Arc::new(prober), Arc::new(manager), tx);

        Harness {
            _dir: dir,
            paths,
            controller,
            events,
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    /// Skip events until one matches.
    async fn wait_for(
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        loop {
            let event = next_event(events).await;
            if pred(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_select_probes_every_address() {
        let mut h = harness(FakePing::default(), Duration::ZERO);

        assert!(h.controller.handle(SessionCommand::Select("cloudflare".into())));
        assert_eq!(h.controller.selected().map(|p| p.name.as_str()), Some("Cloudflare"));

        match next_event(&mut h.events).await {
            SessionEvent::ProbeStarted {
                provider,
                run,
                addresses,
            } => {
                assert_eq!(provider, "Cloudflare");
                assert_eq!(run, 1);
                assert_eq!(addresses, vec!["1.1.1.1", "1.0.0.1"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut seen = Vec::new();
        for _ in 0..2 {
            match next_event(&mut h.events).await {
                SessionEvent::Outcome { outcome, .. } => {
                    assert_eq!(outcome.average_latency_ms, Some(15.5));
                    seen.push(outcome.address);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        seen.sort();
        assert_eq!(seen, vec!["1.0.0.1", "1.1.1.1"]);

        match next_event(&mut h.events).await {
            SessionEvent::ProbeFinished { summary, .. } => {
                assert_eq!(summary.total, 2);
                assert_eq!(summary.reachable, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let mut h = harness(FakePing::default(), Duration::ZERO);

        h.controller.handle(SessionCommand::Select("Nope".into()));
        assert!(matches!(
            next_event(&mut h.events).await,
            SessionEvent::Failed { action: Action::Select, ref message } if message.contains("Nope")
        ));
        assert!(h.controller.selected().is_none());
    }

    #[tokio::test]
    async fn test_connect_without_selection() {
        let mut h = harness(FakePing::default(), Duration::ZERO);

        h.controller.handle(SessionCommand::Connect);
        assert!(matches!(
            next_event(&mut h.events).await,
            SessionEvent::Failed { action: Action::Connect, .. }
        ));
        assert_eq!(std::fs::read_to_string(&h.paths.resolv).unwrap(), ORIGINAL);
    }

    #[tokio::test]
    async fn test_connect_applies_selected_provider() {
        let mut h = harness(FakePing::default(), Duration::ZERO);

        h.controller.handle(SessionCommand::Select("Cloudflare".into()));
        h.controller.handle(SessionCommand::Connect);

        let applied = wait_for(&mut h.events, |e| {
            matches!(e, SessionEvent::Applied { .. } | SessionEvent::Failed { .. })
        })
        .await;
        assert!(
            matches!(applied, SessionEvent::Applied { ref provider } if provider == "Cloudflare"),
            "{applied:?}"
        );
        assert_eq!(
            std::fs::read_to_string(&h.paths.resolv).unwrap(),
            "nameserver 1.1.1.1\nnameserver 1.0.0.1\n"
        );
        assert_eq!(std::fs::read_to_string(&h.paths.backup).unwrap(), ORIGINAL);

        // A second apply would overwrite the backup
        h.controller.handle(SessionCommand::Connect);
        let refused = wait_for(&mut h.events, |e| matches!(e, SessionEvent::Failed { .. })).await;
        assert!(
            matches!(refused, SessionEvent::Failed { action: Action::Connect, ref message } if message.contains("cannot apply")),
            "{refused:?}"
        );

        h.controller.handle(SessionCommand::Restore);
        wait_for(&mut h.events, |e| matches!(e, SessionEvent::Restored)).await;
        assert_eq!(std::fs::read_to_string(&h.paths.resolv).unwrap(), ORIGINAL);
    }

    #[tokio::test]
    async fn test_reselect_cancels_stale_probe() {
        let runner = FakePing {
            hang: vec!["1.1.1.1".parse().unwrap(), "1.0.0.1".parse().unwrap()],
        };
        let mut h = harness(runner, Duration::ZERO);

        h.controller.handle(SessionCommand::Select("Cloudflare".into()));
        h.controller.handle(SessionCommand::Select("Google DNS".into()));

        let mut stale = Vec::new();
        loop {
            let event = next_event(&mut h.events).await;
            match &event {
                SessionEvent::ProbeFinished { provider, .. } if provider == "Google DNS" => break,
                SessionEvent::Outcome { provider, .. } | SessionEvent::ProbeFinished { provider, .. }
                    if provider == "Cloudflare" =>
                {
                    stale.push(event.clone());
                }
                _ => {}
            }
        }
        assert!(stale.is_empty(), "{stale:?}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = h.events.try_recv() {
            assert!(
                !matches!(event, SessionEvent::ProbeFinished { ref provider, .. } if provider == "Cloudflare"),
                "{event:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_reselecting_same_provider_starts_new_run() {
        let mut h = harness(FakePing::default(), Duration::ZERO);

        h.controller.handle(SessionCommand::Select("Cloudflare".into()));
        h.controller.handle(SessionCommand::Select("Cloudflare".into()));

        let mut started = Vec::new();
        let mut outcome_runs = Vec::new();
        loop {
            match next_event(&mut h.events).await {
                SessionEvent::ProbeStarted { run, .. } => started.push(run),
                SessionEvent::Outcome { run, .. } => outcome_runs.push(run),
                SessionEvent::ProbeFinished { run, .. } => {
                    assert_eq!(run, 2);
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(started, vec![1, 2]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = h.events.try_recv() {
            match event {
                SessionEvent::Outcome { run, .. } => outcome_runs.push(run),
                other => panic!("unexpected {other:?}"),
            }
        }
        // The first run was cancelled before it could report anything
        assert_eq!(outcome_runs, vec![2, 2]);
    }

    #[tokio::test]
    async fn test_concurrent_change_is_refused() {
        let mut h = harness(FakePing::default(), Duration::from_millis(200));

        h.controller.handle(SessionCommand::TurnOff);
        h.controller.handle(SessionCommand::Restore);

        assert!(matches!(
            next_event(&mut h.events).await,
            SessionEvent::Busy { action: Action::Restore }
        ));
        assert!(matches!(next_event(&mut h.events).await, SessionEvent::Released));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_resolver_change() {
        let Harness {
            _dir,
            paths,
            controller,
            mut events,
        } = harness(FakePing::default(), Duration::ZERO);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(SessionCommand::Select("Google DNS".into())).unwrap();
        tx.send(SessionCommand::Connect).unwrap();
        tx.send(SessionCommand::Shutdown).unwrap();
        controller.run(rx).await;

        assert_eq!(
            std::fs::read_to_string(&paths.resolv).unwrap(),
            "nameserver 8.8.8.8\nnameserver 8.8.4.4\n"
        );
        let mut applied = false;
        while let Ok(event) = events.try_recv() {
            applied |= matches!(event, SessionEvent::Applied { .. });
        }
        assert!(applied);
    }
}
