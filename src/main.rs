//! Volume Group Operator
//!
//! Per-node agent that keeps LVM2 volume groups in sync with VolumeGroup
//! resources.
//!
//! ```text
//!   VolumeGroup (API server)
//!          │ watch
//!          ▼
//!   ┌──────────────┐     ┌──────────────┐     ┌──────────────────┐
//!   │  Reconciler  │ ──► │  SyncEngine  │ ──► │  lvm (vg* / pv*) │
//!   └──────┬───────┘     └──────┬───────┘     └──────────────────┘
//!          │ status             │ pvSelector
//!          ▼                    ▼
//!   VolumeGroup status   ┌──────────────┐
//!                        │    lsblk     │
//!                        └──────────────┘
//! ```

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use volume_group_operator::{
    ControllerConfig, DeviceSelector, Error, KubeStore, LsblkConfig, LsblkInventory, LvmCli,
    LvmConfig, ReconcileMetrics, Reconciler, Result, SyncEngine, VolumeGroup,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Volume Group Operator - keeps LVM2 volume groups in sync with VolumeGroup resources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Name of the node this agent runs on
    #[arg(long, env = "NODE_NAME", default_value = "")]
    node_name: String,

    /// Namespace to watch (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Seconds between periodic passes of a synced volume group
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value = "30")]
    sync_interval_secs: u64,

    /// Upper bound in seconds for one reconcile pass
    #[arg(long, env = "PASS_TIMEOUT_SECS", default_value = "10")]
    pass_timeout_secs: u64,

    /// Seconds before a failed pass is retried
    #[arg(long, env = "ERROR_REQUEUE_SECS", default_value = "15")]
    error_requeue_secs: u64,

    /// Path of the lvm binary
    #[arg(long, env = "LVM_PATH", default_value = "/sbin/lvm")]
    lvm_path: PathBuf,

    /// Path of the lsblk binary
    #[arg(long, env = "LSBLK_PATH", default_value = "/usr/bin/lsblk")]
    lsblk_path: PathBuf,

    /// Path of the nsenter binary
    #[arg(long, env = "NSENTER_PATH", default_value = "/usr/bin/nsenter")]
    nsenter_path: PathBuf,

    /// Run host tools in the namespaces of the host init process
    #[arg(long, env = "CONTAINERIZED")]
    containerized: bool,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the VolumeGroup CustomResourceDefinition as YAML
    Crds,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::Crds) = args.command {
        let crd = serde_yaml::to_string(&VolumeGroup::crd())
            .map_err(|e| Error::Internal(format!("CRD serialization failed: {}", e)))?;
        print!("{}", crd);
        return Ok(());
    }

    init_logging(&args)?;

    let config = ControllerConfig {
        node_name: args.node_name.clone(),
        sync_interval: Duration::from_secs(args.sync_interval_secs),
        pass_timeout: Duration::from_secs(args.pass_timeout_secs),
        error_requeue: Duration::from_secs(args.error_requeue_secs),
        watch_namespace: args.watch_namespace.clone(),
    };
    config.validate()?;

    info!("Starting Volume Group Operator");
    info!("  Version: {}", volume_group_operator::VERSION);
    info!("  Node: {}", config.node_name);
    info!("  Sync interval: {:?}", config.sync_interval);
    info!("  Pass timeout: {:?}", config.pass_timeout);
    info!("  Containerized: {}", args.containerized);

    let metrics = Arc::new(ReconcileMetrics::new(prometheus::default_registry())?);

    let subsystem = Arc::new(LvmCli::new(LvmConfig {
        lvm_path: args.lvm_path.clone(),
        nsenter_path: args.nsenter_path.clone(),
        containerized: args.containerized,
    }));
    let inventory = Arc::new(LsblkInventory::new(LsblkConfig {
        lsblk_path: args.lsblk_path.clone(),
        nsenter_path: args.nsenter_path.clone(),
        containerized: args.containerized,
    }));
    let engine = SyncEngine::new(subsystem, DeviceSelector::new(inventory), metrics.clone());

    let client = kube::Client::try_default().await?;
    let store = Arc::new(KubeStore::new(client.clone()));
    let reconciler = Arc::new(Reconciler::new(config, store, engine, metrics));

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    volume_group_operator::controller::run(client, reconciler).await?;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info"] {
        filter = filter.add_directive(
            directive
                .parse::<Directive>()
                .map_err(|e| Error::Configuration(format!("Invalid log directive: {}", e)))?,
        );
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// HTTP Servers
// =============================================================================

fn respond(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "ok"),
                _ => respond(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            let mut response = respond(StatusCode::OK, buffer);
                            response.headers_mut().insert(
                                CONTENT_TYPE,
                                HeaderValue::from_static(prometheus::TEXT_FORMAT),
                            );
                            response
                        }
                        Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    }
                }
                _ => respond(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
