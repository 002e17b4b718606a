//! VolumeGroup Controller
//!
//! Wires the reconciliation state machine into a `kube` runtime controller.
//!
//! - [`reconciler`]: per-pass lifecycle state machine
//! - [`sync`]: attribute planners and the sync engine
//! - [`recovery`]: device loss classification and recovery
//! - [`status`]: status projection and conditions
//! - [`store`]: Kubernetes-backed resource store
//! - [`metrics`]: Prometheus counters

pub mod metrics;
pub mod reconciler;
pub mod recovery;
pub mod status;
pub mod store;
pub mod sync;

pub use metrics::{PassOutcome, ReconcileMetrics};
pub use reconciler::Reconciler;
pub use store::KubeStore;
pub use sync::SyncEngine;

use crate::crd::VolumeGroup;
use crate::domain::ports::ResourceKey;
use crate::error::{Error, ErrorAction, Result};
use futures::StreamExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

// =============================================================================
// Controller Configuration
// =============================================================================

/// Configuration for the volume group controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Name of the node this controller manages volume groups for
    pub node_name: String,
    /// Delay between periodic passes of a synced volume group
    pub sync_interval: Duration,
    /// Upper bound for one reconcile pass
    pub pass_timeout: Duration,
    /// Requeue delay for transient errors
    pub error_requeue: Duration,
    /// Namespace to watch, all namespaces when unset
    pub watch_namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            sync_interval: Duration::from_secs(30),
            pass_timeout: Duration::from_secs(10),
            error_requeue: Duration::from_secs(15),
            watch_namespace: None,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(Error::Configuration("node name must not be empty".into()));
        }
        if self.pass_timeout.is_zero() {
            return Err(Error::Configuration("pass timeout must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Watch VolumeGroup resources and reconcile them until shutdown
pub async fn run(client: Client, reconciler: Arc<Reconciler>) -> Result<()> {
    reconciler.config().validate()?;

    let api: Api<VolumeGroup> = match &reconciler.config().watch_namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    info!(node = %reconciler.config().node_name, "starting volume group controller");

    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(name = %obj.name, "reconciled volume group"),
                Err(e) => error!(error = %e, "reconcile error"),
            }
        })
        .await;

    info!("volume group controller stopped");
    Ok(())
}

async fn reconcile(vg: Arc<VolumeGroup>, reconciler: Arc<Reconciler>) -> Result<Action> {
    let key = ResourceKey::new(vg.namespace(), vg.name_any());
    Ok(match reconciler.reconcile_once(&key).await? {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    })
}

fn error_policy(vg: Arc<VolumeGroup>, error: &Error, reconciler: Arc<Reconciler>) -> Action {
    error!(name = %vg.name_any(), error = %error, "reconcile failed");
    requeue_action(error, reconciler.config())
}

/// Requeue decision for a failed pass
pub fn requeue_action(error: &Error, config: &ControllerConfig) -> Action {
    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(config.error_requeue),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}
