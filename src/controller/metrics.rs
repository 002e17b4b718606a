//! Reconciliation Metrics
//!
//! Prometheus counters for reconcile passes, host mutations and device-loss
//! recoveries. Registered against a caller supplied registry so tests can
//! use a private one.

use crate::error::{Error, Result};
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Outcome label of one reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Volume group created on the host
    Created,
    /// Finalizer attached to a record whose volume group already existed
    FinalizerAttached,
    Synced,
    /// Host volume group gone and finalizer released
    Deleted,
    /// Nothing to do on this node
    Skipped,
    Failed,
    TimedOut,
}

impl PassOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Created => "created",
            PassOutcome::FinalizerAttached => "finalizer_attached",
            PassOutcome::Synced => "synced",
            PassOutcome::Deleted => "deleted",
            PassOutcome::Skipped => "skipped",
            PassOutcome::Failed => "failed",
            PassOutcome::TimedOut => "timed_out",
        }
    }
}

/// Counters exported by the controller
#[derive(Clone)]
pub struct ReconcileMetrics {
    passes: IntCounterVec,
    host_operations: IntCounterVec,
    device_loss_recoveries: IntCounter,
}

impl ReconcileMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let passes = IntCounterVec::new(
            Opts::new(
                "volume_group_reconcile_passes_total",
                "Reconcile passes by outcome",
            ),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let host_operations = IntCounterVec::new(
            Opts::new(
                "volume_group_host_operations_total",
                "Volume group mutations issued to the host by kind",
            ),
            &["kind"],
        )
        .map_err(metrics_error)?;
        let device_loss_recoveries = IntCounter::new(
            "volume_group_device_loss_recoveries_total",
            "Missing physical volumes removed by device loss policy",
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(passes.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(host_operations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(device_loss_recoveries.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            passes,
            host_operations,
            device_loss_recoveries,
        })
    }

    pub fn record_pass(&self, outcome: PassOutcome) {
        self.passes.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn record_operation(&self, kind: &str) {
        self.host_operations.with_label_values(&[kind]).inc();
    }

    pub fn record_recovery(&self) {
        self.device_loss_recoveries.inc();
    }

    pub fn passes(&self, outcome: PassOutcome) -> u64 {
        self.passes.with_label_values(&[outcome.as_str()]).get()
    }

    pub fn operations(&self, kind: &str) -> u64 {
        self.host_operations.with_label_values(&[kind]).get()
    }

    pub fn recoveries(&self) -> u64 {
        self.device_loss_recoveries.get()
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}
