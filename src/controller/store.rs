//! Typed access to the object store.
//!
//! [`GroupStore`] is the seam between the reconcilers and the Kubernetes
//! API: typed getters that map 404 to `None`, listers returning
//! materialized snapshots, and writes that go through the conflict-retry
//! discipline (refetch, reapply the intended delta, write; never reuse a
//! stale object). The trait allows mocking the store in tests while
//! [`KubeGroupStore`] talks to the real API server in production.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Secret};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::ObjectMeta;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{VolumeGroup, VolumeGroupClass, VolumeGroupContent};
use crate::retry::{retry_on_conflict, ConflictRetry};
use crate::{Error, PVC_FINALIZER, VOLUME_GROUP_FINALIZER};

/// Object-store operations used by the reconcilers.
///
/// Getters return `None` for objects that disappeared between event and
/// fetch; writes are idempotent where the protocol requires it (finalizers,
/// content create/delete).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Fetch a VolumeGroup by namespace and name.
    async fn get_volume_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeGroup>, Error>;

    /// List every VolumeGroup in the cluster (unfiltered).
    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroup>, Error>;

    /// Fetch a VolumeGroupClass by name.
    async fn get_volume_group_class(&self, name: &str)
        -> Result<Option<VolumeGroupClass>, Error>;

    /// Fetch a VolumeGroupContent by name.
    async fn get_volume_group_content(
        &self,
        name: &str,
    ) -> Result<Option<VolumeGroupContent>, Error>;

    /// Create a VolumeGroupContent. An already-existing object of the same
    /// name is treated as success so re-creation after a crash is safe.
    async fn create_volume_group_content(&self, vgc: &VolumeGroupContent) -> Result<(), Error>;

    /// Delete a VolumeGroupContent. Deleting a missing object is success.
    async fn delete_volume_group_content(&self, name: &str) -> Result<(), Error>;

    /// Write a VolumeGroup's spec (conflict-retried).
    async fn update_volume_group(&self, vg: &VolumeGroup) -> Result<(), Error>;

    /// Write a VolumeGroup's status (conflict-retried).
    async fn update_volume_group_status(&self, vg: &VolumeGroup) -> Result<(), Error>;

    /// Write a VolumeGroupContent's spec (conflict-retried).
    async fn update_volume_group_content(&self, vgc: &VolumeGroupContent) -> Result<(), Error>;

    /// Write a VolumeGroupContent's status (conflict-retried).
    async fn update_volume_group_content_status(
        &self,
        vgc: &VolumeGroupContent,
    ) -> Result<(), Error>;

    /// Fetch a PersistentVolumeClaim by namespace and name.
    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error>;

    /// List every PersistentVolumeClaim in the cluster (unfiltered).
    async fn list_pvcs(&self) -> Result<Vec<PersistentVolumeClaim>, Error>;

    /// Fetch a PersistentVolume by name.
    async fn get_pv(&self, name: &str) -> Result<Option<PersistentVolume>, Error>;

    /// Fetch a StorageClass by name.
    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, Error>;

    /// Fetch a Secret's data decoded to strings.
    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error>;

    /// Ensure the group finalizer is present on a VolumeGroup.
    async fn add_volume_group_finalizer(&self, vg: &VolumeGroup) -> Result<(), Error>;

    /// Ensure the group finalizer is absent from a VolumeGroup.
    async fn remove_volume_group_finalizer(&self, vg: &VolumeGroup) -> Result<(), Error>;

    /// Ensure the group finalizer is present on a VolumeGroupContent.
    async fn add_content_finalizer(&self, vgc: &VolumeGroupContent) -> Result<(), Error>;

    /// Ensure the group finalizer is absent from a VolumeGroupContent.
    async fn remove_content_finalizer(&self, vgc: &VolumeGroupContent) -> Result<(), Error>;

    /// Ensure the claim finalizer is present on a PersistentVolumeClaim.
    async fn add_claim_finalizer(&self, pvc: &PersistentVolumeClaim) -> Result<(), Error>;

    /// Ensure the claim finalizer is absent from a PersistentVolumeClaim.
    async fn remove_claim_finalizer(&self, pvc: &PersistentVolumeClaim) -> Result<(), Error>;
}

/// Add a finalizer token to object metadata. Idempotent.
pub fn with_finalizer(meta: &mut ObjectMeta, token: &str) {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|f| f == token) {
        finalizers.push(token.to_string());
    }
}

/// Remove a finalizer token from object metadata. Idempotent.
pub fn without_finalizer(meta: &mut ObjectMeta, token: &str) {
    if let Some(finalizers) = meta.finalizers.as_mut() {
        finalizers.retain(|f| f != token);
    }
}

/// True if the metadata carries the finalizer token.
pub fn has_finalizer(meta: &ObjectMeta, token: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == token))
}

/// Fetch a resource, mapping 404 to `None`.
async fn get_optional<K>(api: &Api<K>, name: &str) -> Result<Option<K>, Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(resource) => Ok(Some(resource)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Production [`GroupStore`] implementation over a kube client.
pub struct KubeGroupStore {
    client: Client,
    retry: ConflictRetry,
}

impl KubeGroupStore {
    /// Wrap a client with the default conflict-retry budget.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry: ConflictRetry::default(),
        }
    }

    fn volume_groups(&self, namespace: &str) -> Api<VolumeGroup> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn contents(&self) -> Api<VolumeGroupContent> {
        Api::all(self.client.clone())
    }

    /// Replace an object, retrying conflicts by refetching and reapplying
    /// the caller's delta to the latest revision.
    async fn replace_with_retry<K, F>(
        &self,
        api: Api<K>,
        seed: &K,
        operation: &str,
        apply: F,
    ) -> Result<(), Error>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
        F: Fn(&mut K),
    {
        let name = seed.name_any();
        retry_on_conflict(&self.retry, operation, |attempt| {
            let api = api.clone();
            let name = name.clone();
            let seed = seed.clone();
            let apply = &apply;
            async move {
                let mut latest = if attempt == 0 { seed } else { api.get(&name).await? };
                apply(&mut latest);
                api.replace(&name, &PostParams::default(), &latest).await?;
                Ok(())
            }
        })
        .await
    }

    /// Replace an object's status subresource with the same retry
    /// discipline as [`Self::replace_with_retry`].
    async fn replace_status_with_retry<K, F>(
        &self,
        api: Api<K>,
        seed: &K,
        operation: &str,
        apply: F,
    ) -> Result<(), Error>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
        F: Fn(&mut K),
    {
        let name = seed.name_any();
        retry_on_conflict(&self.retry, operation, |attempt| {
            let api = api.clone();
            let name = name.clone();
            let seed = seed.clone();
            let apply = &apply;
            async move {
                let mut latest = if attempt == 0 { seed } else { api.get(&name).await? };
                apply(&mut latest);
                let data = serde_json::to_vec(&latest)
                    .map_err(|e| Error::serialization(e.to_string()))?;
                api.replace_status(&name, &PostParams::default(), data)
                    .await?;
                Ok(())
            }
        })
        .await
    }
}

#[async_trait]
impl GroupStore for KubeGroupStore {
    async fn get_volume_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeGroup>, Error> {
        get_optional(&self.volume_groups(namespace), name).await
    }

    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroup>, Error> {
        let api: Api<VolumeGroup> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_volume_group_class(
        &self,
        name: &str,
    ) -> Result<Option<VolumeGroupClass>, Error> {
        let api: Api<VolumeGroupClass> = Api::all(self.client.clone());
        get_optional(&api, name).await
    }

    async fn get_volume_group_content(
        &self,
        name: &str,
    ) -> Result<Option<VolumeGroupContent>, Error> {
        get_optional(&self.contents(), name).await
    }

    async fn create_volume_group_content(&self, vgc: &VolumeGroupContent) -> Result<(), Error> {
        match self.contents().create(&PostParams::default(), vgc).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(name = %vgc.name_any(), "volumeGroupContent already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_volume_group_content(&self, name: &str) -> Result<(), Error> {
        match self.contents().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_volume_group(&self, vg: &VolumeGroup) -> Result<(), Error> {
        let spec = vg.spec.clone();
        self.replace_with_retry(
            self.volume_groups(vg.namespace()),
            vg,
            "update VolumeGroup",
            move |latest| latest.spec = spec.clone(),
        )
        .await
    }

    async fn update_volume_group_status(&self, vg: &VolumeGroup) -> Result<(), Error> {
        let status = vg.status.clone();
        self.replace_status_with_retry(
            self.volume_groups(vg.namespace()),
            vg,
            "update VolumeGroup status",
            move |latest| latest.status = status.clone(),
        )
        .await
    }

    async fn update_volume_group_content(&self, vgc: &VolumeGroupContent) -> Result<(), Error> {
        let spec = vgc.spec.clone();
        self.replace_with_retry(
            self.contents(),
            vgc,
            "update VolumeGroupContent",
            move |latest| latest.spec = spec.clone(),
        )
        .await
    }

    async fn update_volume_group_content_status(
        &self,
        vgc: &VolumeGroupContent,
    ) -> Result<(), Error> {
        let status = vgc.status.clone();
        self.replace_status_with_retry(
            self.contents(),
            vgc,
            "update VolumeGroupContent status",
            move |latest| latest.status = status.clone(),
        )
        .await
    }

    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        get_optional(&api, name).await
    }

    async fn list_pvcs(&self) -> Result<Vec<PersistentVolumeClaim>, Error> {
        let api: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_pv(&self, name: &str) -> Result<Option<PersistentVolume>, Error> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        get_optional(&api, name).await
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, Error> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        get_optional(&api, name).await
    }

    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = get_optional(&api, name).await? else {
            return Ok(None);
        };

        let mut data = BTreeMap::new();
        for (key, value) in secret.data.unwrap_or_default() {
            let value = String::from_utf8(value.0).map_err(|_| {
                Error::validation(format!(
                    "secret {namespace}/{name} has a non-UTF-8 value for key {key}"
                ))
            })?;
            data.insert(key, value);
        }
        Ok(Some(data))
    }

    async fn add_volume_group_finalizer(&self, vg: &VolumeGroup) -> Result<(), Error> {
        if has_finalizer(&vg.metadata, VOLUME_GROUP_FINALIZER) {
            return Ok(());
        }
        self.replace_with_retry(
            self.volume_groups(vg.namespace()),
            vg,
            "add VolumeGroup finalizer",
            |latest| with_finalizer(&mut latest.metadata, VOLUME_GROUP_FINALIZER),
        )
        .await
    }

    async fn remove_volume_group_finalizer(&self, vg: &VolumeGroup) -> Result<(), Error> {
        if !has_finalizer(&vg.metadata, VOLUME_GROUP_FINALIZER) {
            return Ok(());
        }
        self.replace_with_retry(
            self.volume_groups(vg.namespace()),
            vg,
            "remove VolumeGroup finalizer",
            |latest| without_finalizer(&mut latest.metadata, VOLUME_GROUP_FINALIZER),
        )
        .await
    }

    async fn add_content_finalizer(&self, vgc: &VolumeGroupContent) -> Result<(), Error> {
        if has_finalizer(&vgc.metadata, VOLUME_GROUP_FINALIZER) {
            return Ok(());
        }
        self.replace_with_retry(
            self.contents(),
            vgc,
            "add VolumeGroupContent finalizer",
            |latest| with_finalizer(&mut latest.metadata, VOLUME_GROUP_FINALIZER),
        )
        .await
    }

    async fn remove_content_finalizer(&self, vgc: &VolumeGroupContent) -> Result<(), Error> {
        if !has_finalizer(&vgc.metadata, VOLUME_GROUP_FINALIZER) {
            return Ok(());
        }
        self.replace_with_retry(
            self.contents(),
            vgc,
            "remove VolumeGroupContent finalizer",
            |latest| without_finalizer(&mut latest.metadata, VOLUME_GROUP_FINALIZER),
        )
        .await
    }

    async fn add_claim_finalizer(&self, pvc: &PersistentVolumeClaim) -> Result<(), Error> {
        if has_finalizer(&pvc.metadata, PVC_FINALIZER) {
            return Ok(());
        }
        let namespace = pvc.namespace().unwrap_or_default();
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &namespace);
        self.replace_with_retry(api, pvc, "add PersistentVolumeClaim finalizer", |latest| {
            with_finalizer(&mut latest.metadata, PVC_FINALIZER)
        })
        .await
    }

    async fn remove_claim_finalizer(&self, pvc: &PersistentVolumeClaim) -> Result<(), Error> {
        if !has_finalizer(&pvc.metadata, PVC_FINALIZER) {
            return Ok(());
        }
        let namespace = pvc.namespace().unwrap_or_default();
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &namespace);
        self.replace_with_retry(api, pvc, "remove PersistentVolumeClaim finalizer", |latest| {
            without_finalizer(&mut latest.metadata, PVC_FINALIZER)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalizer_add_is_idempotent() {
        let mut meta = ObjectMeta::default();
        with_finalizer(&mut meta, VOLUME_GROUP_FINALIZER);
        with_finalizer(&mut meta, VOLUME_GROUP_FINALIZER);
        assert_eq!(
            meta.finalizers.as_deref(),
            Some(&[VOLUME_GROUP_FINALIZER.to_string()][..])
        );
        assert!(has_finalizer(&meta, VOLUME_GROUP_FINALIZER));
    }

    #[test]
    fn finalizer_remove_keeps_other_tokens() {
        let mut meta = ObjectMeta {
            finalizers: Some(vec![
                "kubernetes.io/pvc-protection".to_string(),
                PVC_FINALIZER.to_string(),
            ]),
            ..Default::default()
        };

        without_finalizer(&mut meta, PVC_FINALIZER);
        assert_eq!(
            meta.finalizers.as_deref(),
            Some(&["kubernetes.io/pvc-protection".to_string()][..])
        );
        assert!(!has_finalizer(&meta, PVC_FINALIZER));
    }

    #[test]
    fn remove_from_empty_metadata_is_a_no_op() {
        let mut meta = ObjectMeta::default();
        without_finalizer(&mut meta, PVC_FINALIZER);
        assert!(meta.finalizers.is_none());
    }

    #[test]
    fn finalizer_tokens_are_bit_exact() {
        // Other controllers in the deployed ecosystem key on these strings.
        assert_eq!(
            VOLUME_GROUP_FINALIZER,
            "volumegroup.storage.ibm.io/vg-protection"
        );
        assert_eq!(PVC_FINALIZER, "volumegroup.storage.ibm.io/pvc-protection");
    }
}
