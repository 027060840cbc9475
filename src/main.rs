use clap::{Parser, Subcommand, ValueEnum};
use dns_redirect::{
    AdapterScope, AdapterWatchdog, OrchestratorConfig, Outcome, PortConflict, ProxyOrchestrator,
    SettingsStore, StartMode, StatusObserver,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dns-redirect")]
#[command(about = "Redirect adapter DNS to a local resolver and supervise the proxy", long_about = None)]
struct Args {
    /// Installation directory containing `Data/`
    #[arg(short, long, global = true, default_value = ".")]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List network adapters
    Adapters {
        #[arg(short, long, value_enum, default_value = "friendly")]
        scope: Scope,
    },
    /// Show the adapter carrying the default route
    BestAdapter,
    /// Start the proxy and resolver and redirect the selected adapter
    Start {
        /// Fail instead of asking when proxy ports are taken
        #[arg(long)]
        unattended: bool,
    },
    /// Stop everything and restore the selected adapter
    Stop,
    /// Show proxy, resolver and selection state
    Status,
    /// Run the adapter watchdog until interrupted
    Watch,
    /// List processes holding the proxy ports
    Ports,
    /// Kill the processes holding the proxy ports
    Reclaim,
    /// Register the resolver service
    InstallResolver,
    /// Remove the resolver service
    UninstallResolver,
    /// Select the adapter to redirect
    Select { name: String },
    /// Follow the default-route adapter automatically
    Auto { state: Toggle },
    /// Write resolver hit logs
    HitLog { state: Toggle },
}

#[derive(Clone, Copy, ValueEnum)]
enum Scope {
    All,
    Enabled,
    Connected,
    Physical,
    Friendly,
}

impl From<Scope> for AdapterScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::All => Self::All,
            Scope::Enabled => Self::EnabledOnly,
            Scope::Connected => Self::ConnectedOnly,
            Scope::Physical => Self::PhysicalOnly,
            Scope::Friendly => Self::FriendlyNameOnly,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl From<Toggle> for bool {
    fn from(toggle: Toggle) -> Self {
        matches!(toggle, Toggle::On)
    }
}

/// Logs progress and asks on the terminal before killing port owners.
struct ConsoleObserver;

impl StatusObserver for ConsoleObserver {
    fn phase(&self, phase: &str) {
        tracing::info!("{phase}");
    }

    fn confirm_reclaim(&self, conflicts: &[PortConflict]) -> bool {
        for c in conflicts {
            println!("port {} is held by pid {}", c.port, c.pid);
        }
        print!("Kill these processes? [y/N] ");
        if std::io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }

    fn adapter_lost(&self, adapter: &str) {
        tracing::warn!(adapter, "Selected adapter disappeared; redirection stopped");
    }

    fn adapter_switched(&self, from: Option<&str>, to: &str) {
        tracing::info!(from = from.unwrap_or("<none>"), to, "Adapter switched");
    }
}

fn report(outcome: Outcome) {
    if outcome.is_busy() {
        println!("another operation is in progress");
    }
}

async fn run(args: Args) -> dns_redirect::Result<()> {
    let config = OrchestratorConfig::for_base_dir(&args.base_dir);
    let settings = SettingsStore::load(&config.settings_path);
    let host = dns_redirect::platform::system_host()?;
    let orchestrator = ProxyOrchestrator::new(host, config, settings);

    match args.command {
        Command::Adapters { scope } => {
            for a in orchestrator.list_adapters(scope.into()).await? {
                let ipv4 = if a.ipv4_dns_auto() { "auto".to_string() } else { a.ipv4_dns().join(",") };
                let ipv6 = if a.ipv6_dns_auto() { "auto".to_string() } else { a.ipv6_dns().join(",") };
                println!(
                    "{:>4}  {:<24} {}  ipv4={ipv4}  ipv6={ipv6}",
                    a.interface_index, a.friendly_name, a.id
                );
            }
        }
        Command::BestAdapter => match orchestrator.default_adapter().await {
            Some(a) => println!("{}", a.friendly_name),
            None => println!("no default-route adapter"),
        },
        Command::Start { unattended } => {
            let mode = if unattended { StartMode::Unattended } else { StartMode::Interactive };
            report(orchestrator.start(mode, &ConsoleObserver).await?);
        }
        Command::Stop => report(orchestrator.stop(&ConsoleObserver).await?),
        Command::Status => {
            let state = orchestrator.runtime_state().await;
            let s = orchestrator.settings().snapshot();
            println!("proxy:     {}", if state.proxy_running { "running" } else { "stopped" });
            println!("resolver:  {}", if state.resolver_running { "running" } else { "stopped" });
            println!("adapter:   {}", s.selected_adapter().unwrap_or("<none>"));
            println!("auto:      {}", s.auto_switch_adapter);
            println!("hit log:   {}", s.resolver_hit_log);
            println!("backups:   {}", s.adapter_backups.len());
        }
        Command::Watch => {
            let (tx, rx) = watch::channel(false);
            let watchdog = AdapterWatchdog::new(orchestrator, Arc::new(ConsoleObserver));
            let task = tokio::spawn(async move { watchdog.run(rx).await });
            tokio::signal::ctrl_c().await?;
            let _ = tx.send(true);
            task.await?;
        }
        Command::Ports => {
            let conflicts = orchestrator.port_conflicts().await?;
            if conflicts.is_empty() {
                println!("proxy ports are free");
            }
            for c in conflicts {
                println!("port {} is held by pid {}", c.port, c.pid);
            }
        }
        Command::Reclaim => orchestrator.reclaim_ports().await?,
        Command::InstallResolver => orchestrator.resolver().install().await?,
        Command::UninstallResolver => orchestrator.resolver().uninstall().await?,
        Command::Select { name } => report(orchestrator.select_adapter(&name).await?),
        Command::Auto { state } => orchestrator.set_auto_switch(state.into()).await?,
        Command::HitLog { state } => {
            let enabled: bool = state.into();
            orchestrator.settings().update(|s| s.resolver_hit_log = enabled);
            orchestrator.settings().flush_now().await?;
            if !enabled {
                let resolver = orchestrator.resolver().clone();
                tokio::task::spawn_blocking(move || resolver.disable_hit_log()).await??;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}
