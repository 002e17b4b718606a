//! LVM2 Command Line Subsystem
//!
//! Implements [`VolumeGroupSubsystem`] on top of the `lvm` binary. Reports are
//! read as JSON; mutations are plain commands whose stderr is classified into
//! the operator's error kinds.

use super::report::{parse_physical_volumes, parse_volume_groups, PV_FIELDS, VG_FIELDS};
use crate::domain::ports::{
    AttributeChange, CreateOptions, ObservedPhysicalVolume, ObservedVolumeGroup,
    VolumeGroupSubsystem,
};
use crate::crd::AutoActivation;
use crate::error::{DeviceLossDetails, Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Configuration for the LVM2 command line
#[derive(Debug, Clone)]
pub struct LvmConfig {
    pub lvm_path: PathBuf,
    pub nsenter_path: PathBuf,
    /// Run through nsenter into the host's namespaces
    pub containerized: bool,
}

impl Default for LvmConfig {
    fn default() -> Self {
        Self {
            lvm_path: PathBuf::from("/sbin/lvm"),
            nsenter_path: PathBuf::from("/usr/bin/nsenter"),
            containerized: false,
        }
    }
}

/// LVM2 subsystem driven through the `lvm` command
pub struct LvmCli {
    config: LvmConfig,
}

impl LvmCli {
    pub fn new(config: LvmConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = if self.config.containerized {
            let mut cmd = Command::new(&self.config.nsenter_path);
            cmd.args(["-m", "-u", "-i", "-n", "-p", "-t", "1"])
                .arg(&self.config.lvm_path);
            cmd
        } else {
            Command::new(&self.config.lvm_path)
        };
        cmd.args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Run one lvm command. `subject` names the volume group for not-found errors.
    async fn run(&self, subject: &str, args: Vec<String>) -> Result<Vec<u8>> {
        let operation = args.first().cloned().unwrap_or_default();
        debug!(command = %args.join(" "), "running lvm");

        let output = self
            .command(&args)
            .output()
            .await
            .map_err(|e| Error::operation(&operation, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&operation, subject, &stderr));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl VolumeGroupSubsystem for LvmCli {
    async fn volume_group(&self, name: &str) -> Result<ObservedVolumeGroup> {
        let mut args = report_args("vgs", VG_FIELDS);
        args.push(name.to_string());

        let output = self.run(name, args).await?;
        parse_volume_groups(&output)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::SubsystemNotFound {
                name: name.to_string(),
            })
    }

    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<ObservedVolumeGroup>> {
        let mut args = report_args("vgs", VG_FIELDS);
        args.extend(["--select".to_string(), format!("vg_uuid={}", uuid)]);

        let output = self.run(uuid, args).await?;
        Ok(parse_volume_groups(&output)?.into_iter().next())
    }

    async fn physical_volumes(&self, name: &str) -> Result<Vec<ObservedPhysicalVolume>> {
        let mut args = report_args("pvs", PV_FIELDS);
        args.extend(["--select".to_string(), format!("vg_name={}", name)]);

        let output = self.run(name, args).await?;
        parse_physical_volumes(&output)
    }

    async fn create(&self, options: &CreateOptions) -> Result<()> {
        info!(vg = %options.name, pvs = ?options.physical_volumes, "creating volume group");
        self.run(&options.name, create_args(options)).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        match self.run(name, vec!["vgremove".into(), name.into()]).await {
            Err(e) if e.is_not_found() => {
                debug!(vg = %name, "volume group already absent");
                Ok(())
            }
            Err(e) => Err(e),
            Ok(_) => {
                info!(vg = %name, "removed volume group");
                Ok(())
            }
        }
    }

    async fn extend(&self, name: &str, devices: &[String]) -> Result<()> {
        info!(vg = %name, ?devices, "extending volume group");
        let mut args = vec!["vgextend".to_string(), name.to_string()];
        args.extend(devices.iter().cloned());
        self.run(name, args).await?;
        Ok(())
    }

    async fn reduce(&self, name: &str, devices: &[String], force: bool) -> Result<()> {
        info!(vg = %name, ?devices, force, "reducing volume group");
        self.run(name, reduce_args(name, devices, force)).await?;
        Ok(())
    }

    async fn reduce_missing(&self, name: &str, force: bool) -> Result<()> {
        info!(vg = %name, force, "removing missing physical volumes");
        let mut args = vec!["vgreduce".to_string(), "--removemissing".to_string()];
        if force {
            args.push("--force".into());
        }
        args.push(name.to_string());
        self.run(name, args).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        info!(from = %from, to = %to, "renaming volume group");
        self.run(from, vec!["vgrename".into(), from.into(), to.into()])
            .await?;
        Ok(())
    }

    async fn change(&self, name: &str, change: &AttributeChange) -> Result<()> {
        info!(vg = %name, %change, "changing volume group");
        self.run(name, change_args(name, change)).await?;
        Ok(())
    }

    async fn move_data(&self, device: &str, destinations: &[String]) -> Result<()> {
        info!(%device, ?destinations, "moving extents");
        let mut args = vec!["pvmove".to_string(), device.to_string()];
        args.extend(destinations.iter().cloned());
        match self.run(device, args).await {
            // An empty physical volume has nothing to relocate
            Err(Error::SubsystemOperationFailed { reason, .. })
                if reason.contains("No data to move") =>
            {
                debug!(%device, "no extents to move");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }
}

// =============================================================================
// Argument Building
// =============================================================================

fn report_args(command: &str, fields: &[&str]) -> Vec<String> {
    vec![
        command.to_string(),
        "--reportformat".into(),
        "json".into(),
        "--units".into(),
        "b".into(),
        "--nosuffix".into(),
        "-o".into(),
        fields.join(","),
    ]
}

fn yes_no(value: bool) -> String {
    String::from(if value { "y" } else { "n" })
}

fn create_args(options: &CreateOptions) -> Vec<String> {
    let mut args = vec!["vgcreate".to_string()];

    for tag in &options.tags {
        args.extend(["--addtag".to_string(), tag.clone()]);
    }
    match options.auto_activation {
        AutoActivation::Enabled => args.extend(["--setautoactivation".into(), yes_no(true)]),
        AutoActivation::Disabled => args.extend(["--setautoactivation".into(), yes_no(false)]),
        AutoActivation::Unset => {}
    }
    if let Some(zero) = options.zero {
        args.extend(["--zero".into(), yes_no(zero)]);
    }
    if let Some(policy) = options.allocation_policy {
        args.extend(["--alloc".into(), policy.as_host_str().to_string()]);
    }
    if let Some(max) = options.maximum_physical_volumes {
        args.extend(["--maxphysicalvolumes".into(), max.to_string()]);
    }
    if let Some(max) = options.maximum_logical_volumes {
        args.extend(["--maxlogicalvolumes".into(), max.to_string()]);
    }

    let sizes = [
        ("--physicalextentsize", &options.physical_extent_size),
        ("--metadatasize", &options.metadata_size),
        ("--dataalignment", &options.data_alignment),
        ("--dataalignmentoffset", &options.data_alignment_offset),
    ];
    for (flag, value) in sizes {
        if let Some(value) = value {
            args.extend([flag.to_string(), value.clone()]);
        }
    }

    if !options.devices.is_empty() {
        args.extend(["--devices".into(), options.devices.join(",")]);
    }
    if let Some(file) = &options.devices_file {
        args.extend(["--devicesfile".into(), file.clone()]);
    }

    args.push(options.name.clone());
    args.extend(options.physical_volumes.iter().cloned());
    args
}

fn reduce_args(name: &str, devices: &[String], force: bool) -> Vec<String> {
    let mut args = vec!["vgreduce".to_string()];
    if force {
        args.push("--force".into());
    }
    args.push(name.to_string());
    args.extend(devices.iter().cloned());
    args
}

fn change_args(name: &str, change: &AttributeChange) -> Vec<String> {
    let mut args = vec!["vgchange".to_string()];
    match change {
        AttributeChange::AddTags(tags) => {
            for tag in tags {
                args.extend(["--addtag".to_string(), tag.clone()]);
            }
        }
        AttributeChange::DelTags(tags) => {
            for tag in tags {
                args.extend(["--deltag".to_string(), tag.clone()]);
            }
        }
        AttributeChange::MaximumPhysicalVolumes(max) => {
            args.extend(["--maxphysicalvolumes".into(), max.to_string()])
        }
        AttributeChange::MaximumLogicalVolumes(max) => {
            args.extend(["--logicalvolume".into(), max.to_string()])
        }
        AttributeChange::AllocationPolicy(policy) => {
            args.extend(["--alloc".into(), policy.as_host_str().to_string()])
        }
        AttributeChange::AutoActivation(enabled) => {
            args.extend(["--setautoactivation".into(), yes_no(*enabled)])
        }
    }
    args.push(name.to_string());
    args
}

// =============================================================================
// Failure Classification
// =============================================================================

/// Map lvm stderr onto an error kind
pub fn classify_failure(operation: &str, subject: &str, stderr: &str) -> Error {
    let message = stderr.trim();

    if let Some(details) = parse_device_loss(message) {
        return Error::DeviceLossDetected {
            details,
            message: message.to_string(),
        };
    }

    let missing = format!("Volume group \"{}\" not found", subject);
    if message.lines().any(|line| line.trim() == missing) {
        return Error::SubsystemNotFound {
            name: subject.to_string(),
        };
    }

    Error::operation(operation, message)
}

/// Extract missing-device details from lvm output.
///
/// Recognises `VG <vg> is missing PV <pv> (last written to <path>)` and
/// `Cannot change VG <vg> while PVs are missing`.
pub fn parse_device_loss(message: &str) -> Option<DeviceLossDetails> {
    for line in message.lines() {
        if let Some(rest) = after(line, "VG ") {
            if let Some((vg, rest)) = rest.split_once(" is missing PV ") {
                let (pv, path) = match rest.split_once(" (last written to ") {
                    Some((pv, tail)) => (pv, tail.split(')').next()),
                    None => (rest.trim_end_matches('.'), None),
                };
                return Some(DeviceLossDetails {
                    missing_vg: Some(vg.trim().to_string()),
                    missing_pv: Some(pv.trim().to_string()),
                    last_write_path: path.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
                });
            }
        }

        if let Some(rest) = after(line, "Cannot change VG ") {
            if let Some((vg, _)) = rest.split_once(" while PVs are missing") {
                return Some(DeviceLossDetails {
                    missing_vg: Some(vg.trim().to_string()),
                    ..Default::default()
                });
            }
        }
    }
    None
}

fn after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|i| &line[i + marker.len()..])
}
