//! Block device inventory and selector evaluation

pub mod lsblk;
pub mod selector;

pub use lsblk::{LsblkConfig, LsblkInventory};
pub use selector::{DeviceSelector, SelectorError};
