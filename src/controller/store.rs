//! Kubernetes resource store

use crate::crd::VolumeGroup;
use crate::domain::ports::{ResourceKey, ResourceStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};

/// [`ResourceStore`] backed by the Kubernetes API
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: Option<&str>) -> Api<VolumeGroup> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    fn api_for(&self, vg: &VolumeGroup) -> Api<VolumeGroup> {
        self.api(vg.namespace().as_deref())
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<VolumeGroup>> {
        Ok(self.api(key.namespace.as_deref()).get_opt(&key.name).await?)
    }

    async fn update(&self, vg: &VolumeGroup) -> Result<VolumeGroup> {
        Ok(self
            .api_for(vg)
            .replace(&vg.name_any(), &PostParams::default(), vg)
            .await?)
    }

    async fn update_status(&self, vg: &VolumeGroup) -> Result<VolumeGroup> {
        if vg.status.is_none() {
            return Err(Error::Internal(format!(
                "volume group {} has no status to write",
                vg.name_any()
            )));
        }
        let body = serde_json::to_vec(vg)?;
        Ok(self
            .api_for(vg)
            .replace_status(&vg.name_any(), &PostParams::default(), body)
            .await?)
    }
}
