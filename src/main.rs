//! dnschanger - DNS provider switcher
//!
//! Binary entry point for the dnschanger CLI application.

#![warn(clippy::all, warnings)]
#![warn(clippy::pedantic, clippy::nursery)]

use clap::CommandFactory;
use dnschanger::cli::{CatalogArgs, Cli, Commands, OutputFormat, ProbeArgs, ResolverArgs};
use dnschanger::config::ConfigLoader;
use dnschanger::dns::{ProbeOutcome, ProbeSettings, ProbeSummary, Prober, Provider, ProviderCatalog};
use dnschanger::error::{Error, Result};
use dnschanger::resolver::{ConfigState, ResolverConfigManager, SystemExecutor};
use dnschanger::session::{SessionCommand, SessionController};
use dnschanger::tui::App;
use std::fs::File;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Set up logging based on verbosity level.
///
/// # Arguments
///
/// * `verbose` - Enable debug-level logging
/// * `quiet` - Enable error-level only logging
/// * `interactive` - Log to a file instead of stderr, which the TUI owns
fn setup_logging(verbose: bool, quiet: bool, interactive: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (stderr_layer, file_layer) = if interactive {
        let file_layer = open_log_file().map(|file| {
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
        });
        (None, file_layer)
    } else {
        let stderr_layer = fmt::layer().without_time().with_writer(std::io::stderr);
        (Some(stderr_layer), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

/// `$CACHE_DIR/dnschanger/dnschanger.log`, or `None` if it cannot be opened.
fn open_log_file() -> Option<File> {
    let dir = dirs::cache_dir()?.join("dnschanger");
    std::fs::create_dir_all(&dir).ok()?;
    File::options()
        .create(true)
        .append(true)
        .open(dir.join("dnschanger.log"))
        .ok()
}

/// Load the provider catalog from command-line entries, a file, or the
/// default location.
fn load_catalog(args: &CatalogArgs) -> Result<ProviderCatalog> {
    if !args.providers.is_empty() {
        return ConfigLoader::from_args(&args.providers);
    }
    ConfigLoader::load(args.file.as_deref())
}

fn find_provider(catalog: &ProviderCatalog, name: &str) -> Result<Provider> {
    catalog.get(name).cloned().ok_or_else(|| {
        let known: Vec<&str> = catalog.names().collect();
        Error::config(format!(
            "unknown provider '{name}' (known: {})",
            known.join(", ")
        ))
    })
}

/// Build the resolver manager and pick up state left by an earlier run.
fn build_manager(args: &ResolverArgs, interactive: bool) -> ResolverConfigManager {
    let executor = SystemExecutor::new(args.elevate).non_interactive(interactive);
    let manager = ResolverConfigManager::new(args.paths(), executor);
    let state = manager.recover_state();
    tracing::debug!(%state, resolv = %args.resolv_conf.display(), "Resolver manager ready");
    manager
}

/// The catalog provider whose addresses are currently in effect.
fn active_provider(catalog: &ProviderCatalog, manager: &ResolverConfigManager) -> Option<String> {
    if manager.state() != ConfigState::Applied {
        return None;
    }
    let status = manager.status().ok()?;
    catalog
        .providers()
        .iter()
        .find(|p| p.addresses == status.nameservers)
        .map(|p| p.name.clone())
}

/// Probe every address of a provider and output results.
///
/// In table format each outcome is printed as soon as it completes.
/// Ctrl-C stops outstanding probes and reports what finished.
async fn run_probe(
    provider: &Provider,
    probe: ProbeArgs,
    format: OutputFormat,
) -> Result<()> {
    let prober = Prober::with_settings(ProbeSettings::new(probe.count, probe.echo_timeout()));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    if format == OutputFormat::Table {
        println!(
            "Probing {} ({} addresses, {} echoes each)...\n",
            provider.name,
            provider.addresses.len(),
            prober.settings().echo_count
        );
    }

    let mut sink = |outcome: ProbeOutcome| {
        if format == OutputFormat::Table {
            println!("{}", outcome.summary_line());
        }
    };
    let outcomes = prober.probe(&provider.addresses, &mut sink, &cancel).await;
    watcher.abort();

    if cancel.is_cancelled() {
        tracing::warn!(
            completed = outcomes.len(),
            total = provider.addresses.len(),
            "Probe interrupted"
        );
    }

    let summary = ProbeSummary::from_outcomes(&outcomes);
    match format {
        OutputFormat::Table => print_summary(&summary),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&serde_json::json!({
                "provider": provider.name,
                "outcomes": outcomes,
                "summary": summary,
            }))?;
            println!("{json}");
        }
        OutputFormat::Csv | OutputFormat::Tsv => print_outcomes_delimited(&outcomes, format),
    }

    Ok(())
}

/// Print probe statistics.
fn print_summary(summary: &ProbeSummary) {
    println!("\n=== Summary ===");
    println!("Addresses: {}", summary.total);
    println!("Reachable: {}", summary.reachable);
    println!(
        "Unavailable: {}",
        summary.unreachable + summary.timed_out + summary.failed
    );
    if let Some(avg) = summary.avg_latency {
        println!("Average latency: {avg:.2} ms");
    }
    if let (Some(min), Some(max)) = (summary.min_latency, summary.max_latency) {
        println!("Min/Max latency: {min:.2}/{max:.2} ms");
    }
}

/// Print outcomes in CSV or TSV format.
fn print_outcomes_delimited(outcomes: &[ProbeOutcome], format: OutputFormat) {
    let sep = format.separator().unwrap_or(',');
    println!("#Idx{sep}Address{sep}Status{sep}Loss{sep}Latency(ms)");
    for (idx, o) in outcomes.iter().enumerate() {
        let latency = o.average_latency_ms.unwrap_or(-1.0);
        println!(
            "{}{sep}{}{sep}{}{sep}{:.2}{sep}{:.3}",
            idx + 1,
            o.address,
            o.status,
            o.packet_loss,
            latency
        );
    }
}

/// List providers in the requested format.
fn run_list(catalog: &ProviderCatalog, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("DNS providers ({} total):\n", catalog.len());
            println!("{:<4} {:<22} {:<36}", "#", "Name", "Addresses");
            println!("{}", "-".repeat(62));
            for (idx, p) in catalog.providers().iter().enumerate() {
                println!("{:<4} {:<22} {:<36}", idx + 1, p.name, p.addresses.join(", "));
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(catalog.providers())?);
        }
        OutputFormat::Csv | OutputFormat::Tsv => {
            let sep = format.separator().unwrap_or(',');
            println!("#Idx{sep}Name{sep}Addresses");
            for (idx, p) in catalog.providers().iter().enumerate() {
                // Addresses are joined with spaces so the field needs no quoting
                println!("{}{sep}{}{sep}{}", idx + 1, p.name, p.addresses.join(" "));
            }
        }
    }
    Ok(())
}

/// Print the resolver status.
fn run_status(manager: &ResolverConfigManager, format: OutputFormat) -> Result<()> {
    let status = manager.status()?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let paths = manager.paths();
    println!("Resolver file: {}", paths.resolv.display());
    println!("State:         {}", status.state);
    println!(
        "Nameservers:   {}",
        if status.nameservers.is_empty() {
            "(none)".to_string()
        } else {
            status.nameservers.join(", ")
        }
    );
    println!(
        "Backup:        {}",
        if status.backup_present {
            paths.backup.display().to_string()
        } else {
            "(none)".to_string()
        }
    );
    println!("Symlink:       {}", if status.linked { "yes" } else { "no" });
    Ok(())
}

/// Run interactive TUI mode.
///
/// The session controller runs as its own task; the app talks to it over
/// channels and asks it to shut down when the user quits.
async fn run_interactive(
    catalog: ProviderCatalog,
    resolver: &ResolverArgs,
    probe: ProbeArgs,
) -> Result<()> {
    let catalog = Arc::new(catalog);
    let manager = Arc::new(build_manager(resolver, true));
    let active = active_provider(&catalog, &manager);
    let prober = Arc::new(Prober::with_settings(ProbeSettings::new(
        probe.count,
        probe.echo_timeout(),
    )));

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let controller = SessionController::new(Arc::clone(&catalog), prober, manager, event_tx);
    let session = tokio::spawn(controller.run(command_rx));

    let mut app = App::new(catalog, command_tx.clone(), event_rx).with_active(active);
    let res = app.run().await;

    let _ = command_tx.send(SessionCommand::Shutdown);
    drop(app);
    if let Err(e) = session.await {
        tracing::error!(error = %e, "Session task failed");
    }

    res
}

/// Add a hint for the most common failure of one-shot resolver commands.
fn explain(err: Error) -> Error {
    if err.is_permission_denied() {
        tracing::error!("Writing the resolver file needs root; try running with sudo");
    }
    err
}

/// Main entry point for the dnschanger CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = dnschanger::cli::parse();
    let interactive = Commands::is_interactive(cli.command.as_ref());
    setup_logging(cli.verbose, cli.quiet, interactive);

    tracing::debug!("dnschanger starting...");

    match cli.command {
        Some(Commands::Interactive { catalog }) => {
            run_interactive(load_catalog(&catalog)?, &cli.resolver, cli.probe).await?;
        }

        None => {
            // Default to interactive mode
            let catalog = load_catalog(&CatalogArgs::default())?;
            run_interactive(catalog, &cli.resolver, cli.probe).await?;
        }

        Some(Commands::List { catalog }) => {
            run_list(&load_catalog(&catalog)?, cli.format)?;
        }

        Some(Commands::Probe { provider, catalog }) => {
            let provider = find_provider(&load_catalog(&catalog)?, &provider)?;
            run_probe(&provider, cli.probe, cli.format).await?;
        }

        Some(Commands::Apply { provider, catalog }) => {
            let provider = find_provider(&load_catalog(&catalog)?, &provider)?;
            let manager = build_manager(&cli.resolver, false);
            manager.apply(&provider.addresses).map_err(explain)?;
            println!(
                "DNS changed to {} ({})",
                provider.name,
                provider.addresses.join(", ")
            );
        }

        Some(Commands::Release) => {
            build_manager(&cli.resolver, false).release()?;
            println!("DNS handed back to systemd-resolved");
        }

        Some(Commands::Restore) => {
            build_manager(&cli.resolver, false)
                .restore()
                .map_err(explain)?;
            println!("DNS configuration restored from backup");
        }

        Some(Commands::Status) => {
            run_status(&build_manager(&cli.resolver, false), cli.format)?;
        }

        Some(Commands::Export { output, catalog }) => {
            let catalog = load_catalog(&catalog)?;
            ConfigLoader::save(&catalog, &output)?;
            println!("Exported {} providers to: {}", catalog.len(), output.display());
        }

        Some(Commands::Completions { shell }) => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "dnschanger", &mut std::io::stdout());
        }
    }

    Ok(())
}

