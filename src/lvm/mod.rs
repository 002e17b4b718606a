//! LVM2 host subsystem
//!
//! - [`cli`]: `lvm` command invocation and failure classification
//! - [`report`]: JSON report decoding

pub mod cli;
pub mod report;

pub use cli::{LvmCli, LvmConfig};
