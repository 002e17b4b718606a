//! In-memory fakes and fixtures shared by the unit tests

use crate::crd::{AutoActivation, VolumeGroup, VolumeGroupSpec};
use crate::domain::ports::{
    AttributeChange, AttributeValue, BlockDevice, CreateOptions, InventorySource,
    ObservedPhysicalVolume, ObservedState, ObservedVolumeGroup, ResourceKey, ResourceStore,
    VolumeGroupSubsystem,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

// =============================================================================
// Fixtures
// =============================================================================

pub fn block_device(path: &str, attributes: &[(&str, AttributeValue)]) -> BlockDevice {
    let mut map = BTreeMap::new();
    map.insert("PATH".to_string(), AttributeValue::Text(path.to_string()));
    for (key, value) in attributes {
        map.insert(key.to_ascii_uppercase(), value.clone());
    }
    BlockDevice {
        attributes: map,
        children: Vec::new(),
    }
}

/// A 1 GiB volume group with 4 MiB extents and nothing allocated
pub fn observed_volume_group(name: &str, tags: &[&str]) -> ObservedVolumeGroup {
    ObservedVolumeGroup {
        name: name.to_string(),
        uuid: format!("uuid-{}", name),
        sys_id: String::new(),
        attributes: "wz--n-".into(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        extent_size: "4194304".into(),
        extent_count: 255,
        seq_no: 1,
        size: "1069547520".into(),
        free: "1069547520".into(),
        pv_count: 0,
        missing_pv_count: 0,
        max_pv: 0,
        lv_count: 0,
        max_lv: 0,
        snap_count: 0,
        mda_count: 1,
        mda_used_count: 1,
        mda_copies: 0,
        allocation_policy: "normal".into(),
        auto_activation: true,
    }
}

pub fn observed_physical_volume(path: &str) -> ObservedPhysicalVolume {
    ObservedPhysicalVolume {
        name: path.to_string(),
        uuid: format!("pv-{}", path.trim_start_matches("/dev/")),
        device_size: "1073741824".into(),
        size: "1069547520".into(),
        free: "1069547520".into(),
        used: "0".into(),
        mda_free: "520192".into(),
        mda_size: "1044480".into(),
        pe_start: "1048576".into(),
        mda_count: 1,
        mda_used_count: 1,
        tags: Vec::new(),
        device_id: String::new(),
        device_id_type: String::new(),
        attributes: "a--".into(),
        major: 7,
        minor: 0,
    }
}

pub fn observed_state(name: &str, tags: &[&str], pvs: &[&str]) -> ObservedState {
    let mut volume_group = observed_volume_group(name, tags);
    volume_group.pv_count = pvs.len() as i64;
    ObservedState {
        volume_group,
        physical_volumes: pvs.iter().map(|p| observed_physical_volume(p)).collect(),
    }
}

pub fn volume_group(name: &str, spec: VolumeGroupSpec) -> VolumeGroup {
    let mut vg = VolumeGroup::new(name, spec);
    vg.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".into()),
        uid: Some(format!("uid-{}", name)),
        generation: Some(1),
        ..Default::default()
    };
    vg
}

pub fn resource_key(vg: &VolumeGroup) -> ResourceKey {
    ResourceKey::new(vg.namespace(), vg.name_any())
}

// =============================================================================
// Inventory
// =============================================================================

/// Inventory returning a fixed device tree and recording requested columns
#[derive(Default)]
pub struct StaticInventory {
    devices: Vec<BlockDevice>,
    queries: Mutex<Vec<Vec<String>>>,
}

impl StaticInventory {
    pub fn new(devices: Vec<BlockDevice>) -> Self {
        Self {
            devices,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<Vec<String>> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl InventorySource for StaticInventory {
    async fn query(&self, columns: &[String]) -> Result<Vec<BlockDevice>> {
        self.queries.lock().push(columns.to_vec());
        Ok(self.devices.clone())
    }
}

// =============================================================================
// Volume Group Subsystem
// =============================================================================

/// A call made against [`RecordingSubsystem`], including failed ones
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Lookup(String),
    FindByUuid(String),
    ListPhysicalVolumes(String),
    Create(CreateOptions),
    Remove(String),
    Extend(String, Vec<String>),
    Reduce(String, Vec<String>, bool),
    ReduceMissing(String, bool),
    Rename(String, String),
    Change(String, AttributeChange),
    MoveData(String, Vec<String>),
}

impl Call {
    pub fn kind(&self) -> &'static str {
        match self {
            Call::Lookup(_) => "volume_group",
            Call::FindByUuid(_) => "find_by_uuid",
            Call::ListPhysicalVolumes(_) => "physical_volumes",
            Call::Create(_) => "create",
            Call::Remove(_) => "remove",
            Call::Extend(..) => "extend",
            Call::Reduce(..) => "reduce",
            Call::ReduceMissing(..) => "reduce_missing",
            Call::Rename(..) => "rename",
            Call::Change(..) => "change",
            Call::MoveData(..) => "move",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Call::Lookup(_) | Call::FindByUuid(_) | Call::ListPhysicalVolumes(_)
        )
    }
}

struct ScriptedFailure {
    kind: String,
    remaining: Option<usize>,
    make: fn() -> Error,
}

#[derive(Default)]
struct SubsystemState {
    volume_groups: BTreeMap<String, ObservedState>,
    calls: Vec<Call>,
    failures: Vec<ScriptedFailure>,
    lookup_latency: Option<Duration>,
}

/// In-memory volume group subsystem that applies mutations to its state
#[derive(Default)]
pub struct RecordingSubsystem {
    state: Mutex<SubsystemState>,
}

impl RecordingSubsystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, state: ObservedState) {
        self.state
            .lock()
            .volume_groups
            .insert(state.volume_group.name.clone(), state);
    }

    /// Current state of a volume group, without recording a call
    pub fn observed(&self, name: &str) -> ObservedState {
        self.state
            .lock()
            .volume_groups
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("volume group {} not present", name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.state.lock().volume_groups.contains_key(name)
    }

    /// Fail calls of `kind`, `times` times or forever
    pub fn fail(&self, kind: &str, times: Option<usize>, make: fn() -> Error) {
        self.state.lock().failures.push(ScriptedFailure {
            kind: kind.to_string(),
            remaining: times,
            make,
        });
    }

    /// Delay every volume group lookup by `latency`
    pub fn slow_lookups(&self, latency: Duration) {
        self.state.lock().lookup_latency = Some(latency);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| !c.is_read()).collect()
    }

    pub fn calls_of(&self, kind: &str) -> usize {
        self.calls().iter().filter(|c| c.kind() == kind).count()
    }

    pub fn reduce_missing_calls(&self) -> Vec<(String, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ReduceMissing(name, force) => Some((name, force)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Record the call and return a scripted failure if one applies
    fn begin(&self, call: Call) -> Result<()> {
        let mut state = self.state.lock();
        let kind = call.kind();
        state.calls.push(call);

        let failure = state
            .failures
            .iter_mut()
            .find(|f| f.kind == kind && f.remaining != Some(0));
        match failure {
            Some(failure) => {
                if let Some(remaining) = failure.remaining.as_mut() {
                    *remaining -= 1;
                }
                Err((failure.make)())
            }
            None => Ok(()),
        }
    }

    fn mutate<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ObservedState),
    {
        let mut state = self.state.lock();
        let vg = state
            .volume_groups
            .get_mut(name)
            .ok_or_else(|| Error::SubsystemNotFound {
                name: name.to_string(),
            })?;
        f(&mut *vg);
        vg.volume_group.pv_count = vg.physical_volumes.len() as i64;
        Ok(())
    }
}

#[async_trait]
impl VolumeGroupSubsystem for RecordingSubsystem {
    async fn volume_group(&self, name: &str) -> Result<ObservedVolumeGroup> {
        self.begin(Call::Lookup(name.to_string()))?;
        let latency = self.state.lock().lookup_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.state
            .lock()
            .volume_groups
            .get(name)
            .map(|s| s.volume_group.clone())
            .ok_or_else(|| Error::SubsystemNotFound {
                name: name.to_string(),
            })
    }

    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<ObservedVolumeGroup>> {
        self.begin(Call::FindByUuid(uuid.to_string()))?;
        Ok(self
            .state
            .lock()
            .volume_groups
            .values()
            .find(|s| s.volume_group.uuid == uuid)
            .map(|s| s.volume_group.clone()))
    }

    async fn physical_volumes(&self, name: &str) -> Result<Vec<ObservedPhysicalVolume>> {
        self.begin(Call::ListPhysicalVolumes(name.to_string()))?;
        Ok(self
            .state
            .lock()
            .volume_groups
            .get(name)
            .map(|s| s.physical_volumes.clone())
            .unwrap_or_default())
    }

    async fn create(&self, options: &CreateOptions) -> Result<()> {
        self.begin(Call::Create(options.clone()))?;
        if self.exists(&options.name) {
            return Err(Error::operation("vgcreate", "volume group already exists"));
        }

        let tags: Vec<&str> = options.tags.iter().map(String::as_str).collect();
        let pvs: Vec<&str> = options.physical_volumes.iter().map(String::as_str).collect();
        let mut state = observed_state(&options.name, &tags, &pvs);
        let vg = &mut state.volume_group;
        if let Some(max) = options.maximum_physical_volumes {
            vg.max_pv = max as i64;
        }
        if let Some(max) = options.maximum_logical_volumes {
            vg.max_lv = max as i64;
        }
        if let Some(policy) = options.allocation_policy {
            vg.allocation_policy = policy.as_host_str().to_string();
        }
        if options.auto_activation == AutoActivation::Disabled {
            vg.auto_activation = false;
        }
        self.insert(state);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.begin(Call::Remove(name.to_string()))?;
        self.state.lock().volume_groups.remove(name);
        Ok(())
    }

    async fn extend(&self, name: &str, devices: &[String]) -> Result<()> {
        self.begin(Call::Extend(name.to_string(), devices.to_vec()))?;
        self.mutate(name, |vg| {
            for device in devices {
                if !vg.physical_volumes.iter().any(|pv| &pv.name == device) {
                    vg.physical_volumes.push(observed_physical_volume(device));
                }
            }
        })
    }

    async fn reduce(&self, name: &str, devices: &[String], force: bool) -> Result<()> {
        self.begin(Call::Reduce(name.to_string(), devices.to_vec(), force))?;
        self.mutate(name, |vg| {
            vg.physical_volumes.retain(|pv| !devices.contains(&pv.name))
        })
    }

    async fn reduce_missing(&self, name: &str, force: bool) -> Result<()> {
        self.begin(Call::ReduceMissing(name.to_string(), force))?;
        self.mutate(name, |vg| {
            vg.physical_volumes.retain(|pv| !pv.attributes.contains('m'));
            vg.volume_group.missing_pv_count = 0;
        })
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.begin(Call::Rename(from.to_string(), to.to_string()))?;
        let mut state = self.state.lock();
        let mut vg = state
            .volume_groups
            .remove(from)
            .ok_or_else(|| Error::SubsystemNotFound {
                name: from.to_string(),
            })?;
        vg.volume_group.name = to.to_string();
        state.volume_groups.insert(to.to_string(), vg);
        Ok(())
    }

    async fn change(&self, name: &str, change: &AttributeChange) -> Result<()> {
        self.begin(Call::Change(name.to_string(), change.clone()))?;
        self.mutate(name, |state| {
            let vg = &mut state.volume_group;
            match change {
                AttributeChange::AddTags(tags) => {
                    for tag in tags {
                        if !vg.tags.contains(tag) {
                            vg.tags.push(tag.clone());
                        }
                    }
                }
                AttributeChange::DelTags(tags) => vg.tags.retain(|t| !tags.contains(t)),
                AttributeChange::MaximumPhysicalVolumes(max) => vg.max_pv = *max as i64,
                AttributeChange::MaximumLogicalVolumes(max) => vg.max_lv = *max as i64,
                AttributeChange::AllocationPolicy(policy) => {
                    vg.allocation_policy = policy.as_host_str().to_string()
                }
                AttributeChange::AutoActivation(on) => vg.auto_activation = *on,
            }
        })
    }

    async fn move_data(&self, device: &str, destinations: &[String]) -> Result<()> {
        self.begin(Call::MoveData(device.to_string(), destinations.to_vec()))
    }
}

// =============================================================================
// Resource Store
// =============================================================================

#[derive(Default)]
struct StoreState {
    records: BTreeMap<ResourceKey, VolumeGroup>,
    updates: usize,
    status_updates: usize,
}

/// Resource store keeping records in memory with subresource semantics:
/// `update` never touches the status, `update_status` touches nothing else
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, vg: VolumeGroup) {
        self.state.lock().records.insert(resource_key(&vg), vg);
    }

    pub fn stored(&self, key: &ResourceKey) -> Option<VolumeGroup> {
        self.state.lock().records.get(key).cloned()
    }

    pub fn updates(&self) -> usize {
        self.state.lock().updates
    }

    pub fn status_updates(&self) -> usize {
        self.state.lock().status_updates
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<VolumeGroup>> {
        Ok(self.stored(key))
    }

    async fn update(&self, vg: &VolumeGroup) -> Result<VolumeGroup> {
        let mut state = self.state.lock();
        let key = resource_key(vg);
        let record = state
            .records
            .get_mut(&key)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "VolumeGroup".into(),
                name: key.to_string(),
            })?;
        record.metadata = vg.metadata.clone();
        record.spec = vg.spec.clone();
        let updated = record.clone();
        state.updates += 1;
        Ok(updated)
    }

    async fn update_status(&self, vg: &VolumeGroup) -> Result<VolumeGroup> {
        let mut state = self.state.lock();
        let key = resource_key(vg);
        let record = state
            .records
            .get_mut(&key)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "VolumeGroup".into(),
                name: key.to_string(),
            })?;
        record.status = vg.status.clone();
        let updated = record.clone();
        state.status_updates += 1;
        Ok(updated)
    }
}
