//! Volume Group Operator
//!
//! A per-node Kubernetes operator that reconciles VolumeGroup resources
//! against the LVM2 subsystem of the node it runs on.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                    Reconciliation State Machine                       │
//! │     Unmanaged │ PendingDeletion │ Absent (create) │ Present (sync)     │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐  ┌─────────────────┐  ┌───────────────────────┐  │
//! │  │  Sync Engine   │  │ Failure Classif. │  │   Status Projector    │  │
//! │  │  (sub-syncs)   │  │ & Recovery       │  │   (conditions)        │  │
//! │  └───────┬────────┘  └─────────────────┘  └───────────────────────┘  │
//! │          │                                                           │
//! │  ┌───────┴────────┐                                                  │
//! │  │ Device Selector│                                                  │
//! │  └───────┬────────┘                                                  │
//! ├──────────┼───────────────────────────────────────────────────────────┤
//! │   lsblk (inventory)            lvm (vgs/pvs/vgcreate/vgchange/...)   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: Reconciler, sync engine, recovery and status
//! - [`inventory`]: Block device inventory and device selection
//! - [`lvm`]: LVM2 command adapter and report parsing
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod inventory;
pub mod lvm;
pub mod quantity;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use controller::{
    ControllerConfig, KubeStore, PassOutcome, ReconcileMetrics, Reconciler, SyncEngine,
};

pub use crd::{
    AllocationPolicy, DeviceLossPolicy, DeviceRemovalPolicy, MoveTarget, PvSelector,
    VolumeGroup, VolumeGroupSpec, VolumeGroupStatus,
};

pub use domain::ports::{
    InventorySource, ObservedState, ResourceKey, ResourceStore, VolumeGroupSubsystem,
};

pub use error::{Error, ErrorAction, Result};

pub use inventory::{DeviceSelector, LsblkConfig, LsblkInventory};

pub use lvm::{LvmCli, LvmConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
