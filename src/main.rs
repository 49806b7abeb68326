use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use validation_operator::controller::{
    metrics, BackoffConfig, ClusterClient, KubeClusterClient, ResourceTypeDiscoverer, Scheduler,
};
use validation_operator::validation::config::ChecksConfig;
use validation_operator::validation::{watch_checks_config, CheckEngine, ValidationEngine};
use validation_operator::ScannerConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scanner
    Run(RunArgs),
    /// List the built-in checks and whether they are enabled
    Checks(ChecksArgs),
    /// Print the resource types the scanner would validate
    Discover(ChecksArgs),
    /// Show version information
    Version,
}

#[derive(ClapArgs, Debug)]
struct ChecksArgs {
    /// YAML file selecting the enabled checks
    #[arg(long, env = "CONFIG_FILE")]
    config_file: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    #[command(flatten)]
    checks: ChecksArgs,

    /// Regular expression; matching namespaces are not scanned
    #[arg(long, env = "NAMESPACE_IGNORE_PATTERN")]
    namespace_ignore_pattern: Option<String>,

    /// Objects requested per list call
    #[arg(long, env = "RESOURCES_PER_LIST_QUERY", default_value_t = 5)]
    resources_per_list_query: u32,

    /// Base interval between reconciliation cycles, in seconds
    #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value_t = 60)]
    reconcile_interval_secs: u64,

    /// Tries per reconciliation cycle before giving up
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value_t = 5)]
    retry_max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[arg(long, env = "RETRY_INITIAL_DELAY_MS", default_value_t = 1000)]
    retry_initial_delay_ms: u64,

    /// Upper bound for retry delays, in seconds
    #[arg(long, env = "RETRY_MAX_DELAY_SECS", default_value_t = 30)]
    retry_max_delay_secs: u64,

    /// Address of the metrics and probe endpoint
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8383")]
    metrics_addr: SocketAddr,

    /// Path serving the Prometheus metrics
    #[arg(long, env = "METRICS_PATH", default_value = "/metrics")]
    metrics_path: String,

    /// How often to check the config file for changes, in seconds (0 disables)
    #[arg(long, env = "CONFIG_RELOAD_INTERVAL_SECS", default_value_t = 30)]
    config_reload_interval_secs: u64,
}

impl RunArgs {
    fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            interval: Duration::from_secs(self.reconcile_interval_secs),
            page_size: self.resources_per_list_query,
            namespace_ignore_pattern: self.namespace_ignore_pattern.clone(),
            backoff: BackoffConfig {
                max_attempts: self.retry_max_attempts,
                initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
                max_delay: Duration::from_secs(self.retry_max_delay_secs),
                ..BackoffConfig::default()
            },
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
    }
}

fn build_engine(args: &ChecksArgs) -> anyhow::Result<CheckEngine> {
    let checks = ChecksConfig::load(args.config_file.as_deref())
        .context("Failed to load check configuration")?;
    CheckEngine::new(&checks, metrics::CHECK_FAILED.clone()).context("Invalid check configuration")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("validation-operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Checks(checks_args) => print_checks(&checks_args),
        Commands::Discover(checks_args) => {
            init_tracing(args.log_format);
            run_discover(&checks_args).await
        }
        Commands::Run(run_args) => {
            init_tracing(args.log_format);
            run_operator(run_args).await
        }
    }
}

fn print_checks(args: &ChecksArgs) -> anyhow::Result<()> {
    let engine = build_engine(args)?;
    for check in validation_operator::validation::checks::BUILT_IN_CHECKS {
        let marker = if engine.is_enabled(check.name) { "x" } else { " " };
        println!("[{}] {} ({})", marker, check.name, check.scope.as_str());
        println!("      {}", check.description);
        println!("      Remediation: {}", check.remediation);
    }
    Ok(())
}

async fn run_discover(args: &ChecksArgs) -> anyhow::Result<()> {
    let engine = build_engine(args)?;
    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let cluster = KubeClusterClient::new(client);

    let resources = ResourceTypeDiscoverer::discover(&cluster, &engine).await?;
    for resource in &resources {
        let scope = if resource.namespaced {
            "namespaced"
        } else {
            "cluster"
        };
        println!("{} ({}, {})", resource, resource.plural, scope);
    }
    info!("{} supported resource types", resources.len());
    Ok(())
}

async fn run_operator(args: RunArgs) -> anyhow::Result<()> {
    info!(
        "Starting validation-operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let engine = Arc::new(build_engine(&args.checks)?);

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client));

    let validation_engine: Arc<dyn ValidationEngine> = engine.clone();
    let mut scheduler = Scheduler::new(cluster, validation_engine, args.scanner_config())
        .context("Invalid scanner configuration")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    if let Some(path) = args.checks.config_file.clone() {
        if args.config_reload_interval_secs > 0 {
            tokio::spawn(watch_checks_config(
                path,
                engine.clone(),
                Duration::from_secs(args.config_reload_interval_secs),
                shutdown.clone(),
            ));
        }
    }

    #[cfg(feature = "rest-api")]
    let server = {
        use validation_operator::rest_api::{run_server, ServerState};

        let state = ServerState::new(scheduler.subscribe());
        let token = shutdown.clone();
        let addr = args.metrics_addr;
        let path = args.metrics_path.clone();
        tokio::spawn(async move {
            if let Err(e) = run_server(addr, &path, state, token.clone()).await {
                error!("Metrics server error: {:?}", e);
                token.cancel();
            }
        })
    };

    let result = scheduler.run(shutdown.clone()).await;
    shutdown.cancel();

    #[cfg(feature = "rest-api")]
    {
        if let Err(e) = server.await {
            warn!("Metrics server task failed: {}", e);
        }
    }

    result.context("Reconciliation scheduler stopped with an error")?;
    info!("Shutdown complete");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for ctrl-c: {}", e);
                return;
            }
            info!("Received SIGINT, shutting down");
        }
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
