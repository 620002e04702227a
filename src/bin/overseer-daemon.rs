use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Overseer daemon - supervises the processes of one configuration file
#[derive(Parser, Debug)]
#[command(name = "overseer-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML or JSON configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Detach from the terminal and run in the background
    #[arg(long)]
    daemonize: bool,

    /// Override the control socket path from the configuration
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Override the state file path from the configuration
    #[arg(long)]
    state_file: Option<PathBuf>,
}

mod daemon_core {
    use overseer::config::Config;
    use overseer::control::{ControlDispatcher, DispatcherConfig};
    use overseer::daemon::DaemonManager;
    use overseer::error::{OverseerError, Result};
    use overseer::ipc::{
        ActionOutcome, Command, DaemonCommand, IpcServer, ProcessInfo, Response, ResponseData,
    };
    use overseer::monitor::{compile_events, AlertChannel, EventMonitor, Readings};
    use overseer::resource::{Amount, Resource, ResourceSampler, SystemMetrics};
    use overseer::state::StateStore;
    use overseer::watcher::Watcher;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::signal::unix::{signal, SignalKind};
    use tokio::sync::watch;
    use tracing::{error, info, warn};

    /// Everything the IPC handler needs to answer a request
    #[derive(Clone)]
    struct HandlerContext {
        dispatcher: Arc<ControlDispatcher>,
        readings: Readings,
        started: Instant,
        shutdown: Arc<watch::Sender<bool>>,
    }

    /// Owns the supervisor components for one configuration
    pub struct Daemon {
        config: Config,
        manager: DaemonManager,
    }

    impl Daemon {
        pub fn new(config: Config) -> Self {
            let manager = DaemonManager::with_pid_file(&config.settings.pid_file);
            Self { config, manager }
        }

        pub async fn run(self) -> Result<()> {
            self.manager.register_daemon()?;
            let result = self.serve().await;

            if let Err(e) = self.manager.unregister_daemon() {
                warn!("Failed to remove daemon pid file: {}", e);
            }
            result
        }

        async fn serve(&self) -> Result<()> {
            let settings = &self.config.settings;
            let registry = Arc::new(self.config.build_registry()?);
            info!(
                "Loaded {} processes in {} groups",
                registry.len(),
                registry.groups().len()
            );

            let dispatcher = Arc::new(ControlDispatcher::new(
                Arc::clone(&registry),
                StateStore::new(&settings.state_file),
                DispatcherConfig::from(settings),
            )?);

            let (events, rule_errors) = compile_events(&registry);
            for e in &rule_errors {
                error!("Ignoring rule: {}", e);
            }

            let mut server = IpcServer::with_socket_path(&settings.socket_path);
            server.start()?;
            info!("IPC server listening on {}", server.socket_path().display());

            for (name, result) in dispatcher.start_on_boot().await {
                match result {
                    Ok(()) => info!("Started {} on boot", name),
                    Err(e) => error!("Failed to start {} on boot: {}", name, e),
                }
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let shutdown_tx = Arc::new(shutdown_tx);

            let watcher = Watcher::new(
                Arc::clone(&dispatcher),
                settings.poll_interval(),
                settings.exit_notifications,
            );
            let watcher_task = tokio::spawn(watcher.run(shutdown_rx.clone()));

            let monitor = EventMonitor::new(
                Arc::clone(&dispatcher),
                events,
                ResourceSampler::new(Box::new(SystemMetrics::new())),
                AlertChannel::new(settings.alert_socket.clone()),
            );
            let readings = monitor.readings();
            let monitor_task = tokio::spawn(monitor.run(shutdown_rx.clone()));

            let context = HandlerContext {
                dispatcher: Arc::clone(&dispatcher),
                readings,
                started: Instant::now(),
                shutdown: Arc::clone(&shutdown_tx),
            };
            let server_rx = shutdown_rx.clone();
            let server_task = tokio::spawn(async move {
                let result = server
                    .run(
                        move |command| {
                            let context = context.clone();
                            async move { handle_command(command, context).await }
                        },
                        server_rx,
                    )
                    .await;
                if let Err(e) = result {
                    error!("IPC server error: {}", e);
                }
            });

            wait_for_shutdown(shutdown_rx).await?;
            info!("Shutting down daemon");
            let _ = shutdown_tx.send(true);

            for (what, task) in [
                ("watcher", watcher_task),
                ("event monitor", monitor_task),
                ("IPC server", server_task),
            ] {
                if let Err(e) = task.await {
                    warn!("{} task ended abnormally: {}", what, e);
                }
            }

            dispatcher.persist()?;
            info!("Daemon stopped");
            Ok(())
        }
    }

    /// Resolve once SIGTERM or SIGINT arrives, or a client asks to shut down
    async fn wait_for_shutdown(mut requested: watch::Receiver<bool>) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| OverseerError::Other(format!("Failed to install SIGTERM handler: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| OverseerError::Other(format!("Failed to install SIGINT handler: {}", e)))?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = requested.wait_for(|stop| *stop) => info!("Shutdown requested by client"),
        }
        Ok(())
    }

    async fn handle_command(command: Command, context: HandlerContext) -> Result<Response> {
        let data = match command {
            Command::Control { action, target } => {
                let outcomes = context
                    .dispatcher
                    .dispatch_target(&target, action)
                    .await?
                    .into_iter()
                    .map(|(process, result)| ActionOutcome {
                        process,
                        error: result.err().map(|e| e.to_string()),
                    })
                    .collect();
                ResponseData::ActionApplied { action, outcomes }
            }

            Command::Status { target } => {
                let statuses = context.dispatcher.status(target.as_deref())?;
                let readings = context.readings.read().await;
                let processes = statuses
                    .into_iter()
                    .map(|status| {
                        let running = status.running;
                        let reading = |resource: Resource| {
                            running
                                .then(|| readings.get(&(status.name.clone(), resource)).copied())
                                .flatten()
                        };
                        let memory_bytes = reading(Resource::MemoryUsed).map(|amount| match amount {
                            Amount::Integer(bytes) => bytes,
                            Amount::Float(bytes) => bytes as u64,
                        });
                        let cpu_percent = reading(Resource::CpuPercent).map(|a| a.as_f64());
                        ProcessInfo {
                            status,
                            memory_bytes,
                            cpu_percent,
                        }
                    })
                    .collect();
                ResponseData::Status(processes)
            }

            Command::Daemon(DaemonCommand::Status) => ResponseData::DaemonStatus {
                running: true,
                uptime: context.started.elapsed(),
            },

            Command::Daemon(DaemonCommand::Shutdown) => {
                let _ = context.shutdown.send(true);
                ResponseData::Success("Daemon shutting down".to_string())
            }
        };

        Ok(Response::success(0, data))
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Forking is only sound before the runtime spawns its worker threads
    if args.daemonize {
        overseer::daemon::daemonize().context("Failed to daemonize")?;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = overseer::config::Config::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if let Some(socket) = args.socket {
        config.settings.socket_path = socket;
    }
    if let Some(state_file) = args.state_file {
        config.settings.state_file = state_file;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime
        .block_on(daemon_core::Daemon::new(config).run())
        .context("Daemon failed")
}
