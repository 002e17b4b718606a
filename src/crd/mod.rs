//! Custom Resource Definitions for the Volume Group Operator
//!
//! - VolumeGroup: an LVM2 volume group declared for a single node

pub mod volume_group;

pub use volume_group::*;
