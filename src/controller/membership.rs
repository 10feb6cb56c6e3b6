//! Membership predicates and the shared add/remove core.
//!
//! Both reconcile loops converge on the same primitives: predicates that
//! decide whether a claim belongs to a group, and symmetric add/remove
//! operations that speculatively edit the in-memory membership list, push
//! the resulting volume-id vector to the backend with ModifyVolumeGroup,
//! and revert the in-memory edit if the RPC fails so the next reconcile
//! re-derives from truth.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::{Resource, ResourceExt};
use kube::runtime::events::EventType;
use tracing::{debug, info};

use crate::crd::{ClaimReference, GroupSource, VolumeGroup, VolumeGroupClass};
use crate::events::{actions, reasons};
use crate::selector::selector_matches;
use crate::{Error, BETA_STORAGE_CLASS_ANNOTATION, STORAGE_CLASS_GROUP_PARAMETER};

use super::store::{has_finalizer, GroupStore};
use super::Context;

/// Namespace and name of a claim.
pub fn claim_key(pvc: &PersistentVolumeClaim) -> (String, String) {
    (pvc.namespace().unwrap_or_default(), pvc.name_any())
}

/// Membership as recorded in the group's status list.
pub fn claim_recorded_in_group(pvc: &PersistentVolumeClaim, vg: &VolumeGroup) -> bool {
    let (namespace, name) = claim_key(pvc);
    vg.status
        .as_ref()
        .is_some_and(|status| status.contains_claim(&namespace, &name))
}

/// True iff the claim's labels satisfy the group's selector.
///
/// Static groups (and groups with an unresolvable source) match nothing.
pub fn claim_matches_group(
    pvc: &PersistentVolumeClaim,
    vg: &VolumeGroup,
) -> Result<bool, Error> {
    let Ok(GroupSource::Dynamic(selector)) = vg.source() else {
        return Ok(false);
    };
    let labels = pvc.metadata.labels.clone().unwrap_or_default();
    selector_matches(selector, &labels)
}

/// True iff the claim has reached the Bound phase.
pub fn claim_is_bound(pvc: &PersistentVolumeClaim) -> bool {
    pvc.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some("Bound")
}

/// The claim's storage class name, honoring the beta annotation over the
/// spec field.
pub fn claim_storage_class(pvc: &PersistentVolumeClaim) -> Option<String> {
    if let Some(annotations) = pvc.metadata.annotations.as_ref() {
        if let Some(class) = annotations.get(BETA_STORAGE_CLASS_ANNOTATION) {
            return Some(class.clone());
        }
    }
    pvc.spec.as_ref().and_then(|spec| spec.storage_class_name.clone())
}

/// True iff the claim's storage class is provisioned by `driver`.
///
/// Claims without a resolvable storage class belong to no driver.
pub async fn claim_driver_matches(
    store: &dyn GroupStore,
    pvc: &PersistentVolumeClaim,
    driver: &str,
) -> Result<bool, Error> {
    let Some(class_name) = claim_storage_class(pvc) else {
        return Ok(false);
    };
    let Some(class) = store.get_storage_class(&class_name).await? else {
        return Ok(false);
    };
    Ok(class.provisioner == driver)
}

/// True iff the claim's storage class carries the static-group parameter.
///
/// Such claims are grouped by the storage class itself and must not be
/// auto-grouped by this controller.
pub async fn claim_in_static_storage_class(
    store: &dyn GroupStore,
    pvc: &PersistentVolumeClaim,
) -> Result<bool, Error> {
    let Some(class_name) = claim_storage_class(pvc) else {
        return Ok(false);
    };
    let Some(class) = store.get_storage_class(&class_name).await? else {
        return Ok(false);
    };
    Ok(class
        .parameters
        .as_ref()
        .is_some_and(|params| params.contains_key(STORAGE_CLASS_GROUP_PARAMETER)))
}

/// Snapshot of claims eligible for grouping: Bound and provisioned by the
/// configured driver.
pub async fn eligible_claims(
    store: &dyn GroupStore,
    driver: &str,
) -> Result<Vec<PersistentVolumeClaim>, Error> {
    let mut eligible = Vec::new();
    for pvc in store.list_pvcs().await? {
        if !claim_is_bound(&pvc) {
            continue;
        }
        if claim_driver_matches(store, &pvc, driver).await? {
            eligible.push(pvc);
        }
    }
    Ok(eligible)
}

/// Snapshot of groups owned by the configured driver.
///
/// A group whose class is missing (or names no class) is skipped rather
/// than failing the caller; its own reconcile reports the problem.
pub async fn groups_for_driver(
    store: &dyn GroupStore,
    driver: &str,
) -> Result<Vec<VolumeGroup>, Error> {
    let mut owned = Vec::new();
    for vg in store.list_volume_groups().await? {
        let Some(class_name) = vg.spec.volume_group_class_name.as_deref() else {
            continue;
        };
        let Some(class) = store.get_volume_group_class(class_name).await? else {
            continue;
        };
        if class.driver == driver {
            owned.push(vg);
        }
    }
    Ok(owned)
}

/// Enforce single-group mode: a claim may only join a group when it is not
/// already recorded elsewhere and matches exactly one new group.
pub fn check_claim_admission(
    pvc: &PersistentVolumeClaim,
    groups: &[VolumeGroup],
) -> Result<(), Error> {
    let (namespace, name) = claim_key(pvc);
    let mut recorded_in = Vec::new();
    let mut candidates = Vec::new();

    for vg in groups {
        if claim_recorded_in_group(pvc, vg) {
            recorded_in.push(vg.name().to_string());
        } else if claim_matches_group(pvc, vg)? {
            candidates.push(vg.name().to_string());
        }
    }

    if !recorded_in.is_empty() && !candidates.is_empty() {
        return Err(Error::validation(format!(
            "persistentVolumeClaim {}/{} already belongs to ({}), cannot also join ({})",
            namespace,
            name,
            recorded_in.join(", "),
            candidates.join(", ")
        )));
    }
    if candidates.len() > 1 {
        return Err(Error::validation(format!(
            "persistentVolumeClaim {}/{} matched multiple groups ({})",
            namespace,
            name,
            candidates.join(", ")
        )));
    }
    Ok(())
}

/// Resolve the class a group was created from.
pub async fn class_for_group(
    store: &dyn GroupStore,
    vg: &VolumeGroup,
) -> Result<VolumeGroupClass, Error> {
    let class_name = vg.spec.volume_group_class_name.as_deref().ok_or_else(|| {
        Error::validation(format!(
            "volumeGroup {}/{} has no volumeGroupClassName",
            vg.namespace(),
            vg.name()
        ))
    })?;
    store
        .get_volume_group_class(class_name)
        .await?
        .ok_or_else(|| {
            Error::dependency(format!(
                "volumeGroupClass {} for volumeGroup {}/{} not found",
                class_name,
                vg.namespace(),
                vg.name()
            ))
        })
}

/// Resolve the secret the class points the driver at, if any.
pub async fn secrets_for_class(
    store: &dyn GroupStore,
    class: &VolumeGroupClass,
) -> Result<BTreeMap<String, String>, Error> {
    let Some(secret_ref) = class.secret_reference() else {
        return Ok(BTreeMap::new());
    };
    let class_name = class.name_any();
    let name = secret_ref.name.unwrap_or_default();
    let namespace = secret_ref.namespace.ok_or_else(|| {
        Error::validation(format!(
            "volumeGroupClass {class_name} names secret {name} without a namespace"
        ))
    })?;

    store
        .get_secret_data(&namespace, &name)
        .await?
        .ok_or_else(|| {
            Error::dependency(format!(
                "secret {namespace}/{name} for volumeGroupClass {class_name} not found"
            ))
        })
}

/// Compute the volume-id vector for the recorded membership list.
///
/// Claims that disappeared or have no bound volume yet are skipped; their
/// own reconcile picks them up later.
pub async fn volume_ids_for_claims(
    store: &dyn GroupStore,
    claims: &[ClaimReference],
) -> Result<Vec<String>, Error> {
    let mut volume_ids = Vec::new();
    for claim in claims {
        let Some(pvc) = store.get_pvc(&claim.namespace, &claim.name).await? else {
            continue;
        };
        if let Some(pv_name) = bound_volume_name(&pvc) {
            let Some(pv) = store.get_pv(&pv_name).await? else {
                continue;
            };
            if let Some(handle) = csi_volume_handle(&pv) {
                volume_ids.push(handle);
            }
        }
    }
    Ok(volume_ids)
}

/// Name of the PersistentVolume a claim is bound to, if any.
pub fn bound_volume_name(pvc: &PersistentVolumeClaim) -> Option<String> {
    pvc.spec
        .as_ref()
        .and_then(|spec| spec.volume_name.clone())
        .filter(|name| !name.is_empty())
}

fn csi_volume_handle(pv: &k8s_openapi::api::core::v1::PersistentVolume) -> Option<String> {
    pv.spec
        .as_ref()
        .and_then(|spec| spec.csi.as_ref())
        .map(|csi| csi.volume_handle.clone())
}

/// Push the group's current membership to the backend.
///
/// Resolves the group's content handle, the volume-id vector and the class
/// secret, then issues ModifyVolumeGroup.
pub async fn modify_backend_group(ctx: &Context, vg: &VolumeGroup) -> Result<(), Error> {
    let store = ctx.store.as_ref();
    let content_name = vg.content_name().ok_or_else(|| {
        Error::dependency(format!(
            "volumeGroup {}/{} is not bound to a volumeGroupContent",
            vg.namespace(),
            vg.name()
        ))
    })?;
    let vgc = store
        .get_volume_group_content(content_name)
        .await?
        .ok_or_else(|| {
            Error::dependency(format!(
                "volumeGroupContent {} for volumeGroup {}/{} not found",
                content_name,
                vg.namespace(),
                vg.name()
            ))
        })?;
    let handle = vgc.handle().ok_or_else(|| {
        Error::validation(format!(
            "volumeGroupContent {content_name} has no volumeGroupHandle"
        ))
    })?;

    let claims = vg
        .status
        .as_ref()
        .map(|status| status.pvc_list.as_slice())
        .unwrap_or_default();
    let volume_ids = volume_ids_for_claims(store, claims).await?;

    let class = class_for_group(store, vg).await?;
    let secrets = secrets_for_class(store, &class).await?;

    ctx.driver
        .modify_volume_group(handle, &volume_ids, &secrets)
        .await
}

fn status_mut(vg: &mut VolumeGroup) -> &mut crate::crd::VolumeGroupStatus {
    vg.status.get_or_insert_with(Default::default)
}

/// Add claims to the group: speculative in-memory append, backend modify,
/// revert on failure, persist on success.
pub async fn add_claims_to_group(
    ctx: &Context,
    pvcs: &[PersistentVolumeClaim],
    vg: &mut VolumeGroup,
) -> Result<(), Error> {
    if pvcs.is_empty() {
        return Ok(());
    }

    for pvc in pvcs {
        let (namespace, name) = claim_key(pvc);
        status_mut(vg).record_claim(ClaimReference::new(namespace, name));
    }

    if let Err(e) = modify_backend_group(ctx, vg).await {
        for pvc in pvcs {
            let (namespace, name) = claim_key(pvc);
            status_mut(vg).remove_claim(&namespace, &name);
        }
        return Err(e);
    }

    ctx.store.update_volume_group_status(vg).await?;
    info!(group = %vg.name(), added = pvcs.len(), "added volumes to volume group");
    Ok(())
}

/// Remove claims from the group: speculative in-memory removal, backend
/// modify, revert on failure, persist on success.
pub async fn remove_claims_from_group(
    ctx: &Context,
    pvcs: &[PersistentVolumeClaim],
    vg: &mut VolumeGroup,
) -> Result<(), Error> {
    if pvcs.is_empty() {
        return Ok(());
    }

    for pvc in pvcs {
        let (namespace, name) = claim_key(pvc);
        status_mut(vg).remove_claim(&namespace, &name);
    }

    if let Err(e) = modify_backend_group(ctx, vg).await {
        for pvc in pvcs {
            let (namespace, name) = claim_key(pvc);
            status_mut(vg).record_claim(ClaimReference::new(namespace, name));
        }
        return Err(e);
    }

    ctx.store.update_volume_group_status(vg).await?;
    info!(group = %vg.name(), removed = pvcs.len(), "removed volumes from volume group");
    Ok(())
}

/// Per-claim bookkeeping after a successful backend add: mirror the bound
/// volume into the content's pvList, add the claim finalizer, emit an
/// event.
pub async fn attach_claim(
    ctx: &Context,
    pvc: &PersistentVolumeClaim,
    vg: &VolumeGroup,
) -> Result<(), Error> {
    let store = ctx.store.as_ref();
    let (namespace, name) = claim_key(pvc);

    if let Some(pv_name) = bound_volume_name(pvc) {
        if let Some(content_name) = vg.content_name() {
            if let Some(mut vgc) = store.get_volume_group_content(content_name).await? {
                vgc.record_pv(&pv_name);
                store.update_volume_group_content(&vgc).await?;
            }
        }
    }

    store.add_claim_finalizer(pvc).await?;

    let message = format!(
        "persistentVolumeClaim {}/{} was added to volumeGroup {}/{}",
        namespace,
        name,
        vg.namespace(),
        vg.name()
    );
    ctx.events
        .publish(
            &vg.object_ref(&()),
            EventType::Normal,
            reasons::VOLUME_ADDED,
            actions::ADD_VOLUME,
            Some(message),
        )
        .await;
    Ok(())
}

/// Per-claim bookkeeping after a successful backend remove: drop the bound
/// volume from the content's pvList, release the claim finalizer when the
/// claim is in no group at all, emit an event.
pub async fn detach_claim(
    ctx: &Context,
    pvc: &PersistentVolumeClaim,
    vg: &VolumeGroup,
) -> Result<(), Error> {
    let store = ctx.store.as_ref();
    let (namespace, name) = claim_key(pvc);

    if let Some(pv_name) = bound_volume_name(pvc) {
        if let Some(content_name) = vg.content_name() {
            if let Some(mut vgc) = store.get_volume_group_content(content_name).await? {
                vgc.remove_pv(&pv_name);
                store.update_volume_group_content(&vgc).await?;
            }
        }
    }

    release_claim_finalizer_if_orphaned(ctx, pvc).await?;

    let message = format!(
        "persistentVolumeClaim {}/{} was removed from volumeGroup {}/{}",
        namespace,
        name,
        vg.namespace(),
        vg.name()
    );
    ctx.events
        .publish(
            &vg.object_ref(&()),
            EventType::Normal,
            reasons::VOLUME_REMOVED,
            actions::REMOVE_VOLUME,
            Some(message),
        )
        .await;
    Ok(())
}

/// Remove the claim finalizer when no group records the claim any more.
///
/// This is the repair path for the invariant "every claim carrying the
/// finalizer belongs to at least one group".
pub async fn release_claim_finalizer_if_orphaned(
    ctx: &Context,
    pvc: &PersistentVolumeClaim,
) -> Result<(), Error> {
    if !has_finalizer(&pvc.metadata, crate::PVC_FINALIZER) {
        return Ok(());
    }

    let groups = groups_for_driver(ctx.store.as_ref(), &ctx.config.driver_name).await?;
    if groups.iter().any(|vg| claim_recorded_in_group(pvc, vg)) {
        return Ok(());
    }

    debug!(claim = %pvc.name_any(), "claim belongs to no group, releasing finalizer");
    ctx.store.remove_claim_finalizer(pvc).await
}

/// VolumeGroup with a populated status list, used by both reconcilers to
/// decide removals.
pub fn recorded_claims(vg: &VolumeGroup) -> Vec<ClaimReference> {
    vg.status
        .as_ref()
        .map(|status| status.pvc_list.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_support::*;
    use crate::driver::MockVolumeGroupService;
    use crate::events::MockEventPublisher;
    use mockall::predicate::eq;

    #[test]
    fn claim_key_uses_namespace_and_name() {
        let pvc = bound_claim("prod", "p1", &[("app", "db")], "gold", Some("pv-1"));
        assert_eq!(claim_key(&pvc), ("prod".to_string(), "p1".to_string()));
    }

    #[test]
    fn recorded_membership_is_by_namespace_and_name() {
        let vg = group_with_members("default", "g1", &[("default", "p1")]);
        let member = bound_claim("default", "p1", &[], "gold", None);
        let stranger = bound_claim("other", "p1", &[], "gold", None);

        assert!(claim_recorded_in_group(&member, &vg));
        assert!(!claim_recorded_in_group(&stranger, &vg));
    }

    #[test]
    fn static_groups_match_no_claims() {
        let vg = static_group("default", "g3", "vgc-static");
        let pvc = bound_claim("default", "p1", &[("app", "db")], "gold", None);
        assert!(!claim_matches_group(&pvc, &vg).unwrap());
    }

    #[test]
    fn beta_annotation_wins_over_spec_class() {
        let mut pvc = bound_claim("default", "p1", &[], "gold", None);
        pvc.metadata.annotations = Some(
            [(
                BETA_STORAGE_CLASS_ANNOTATION.to_string(),
                "legacy".to_string(),
            )]
            .into(),
        );
        assert_eq!(claim_storage_class(&pvc).as_deref(), Some("legacy"));
    }

    #[test]
    fn admission_rejects_multiple_new_groups_with_named_groups() {
        let g1 = selector_group("default", "g1", &[("tier", "a")]);
        let g2 = selector_group("default", "g2", &[("tier", "a"), ("zone", "x")]);
        let p2 = bound_claim("default", "p2", &[("tier", "a"), ("zone", "x")], "gold", None);

        let err = check_claim_admission(&p2, &[g1, g2]).unwrap_err();
        let message = err.status_message();
        assert!(
            message.contains("persistentVolumeClaim default/p2 matched multiple groups (g1, g2)"),
            "unexpected message: {message}"
        );
    }

    #[test]
    fn admission_rejects_joining_a_second_group() {
        let g1 = group_with_members("default", "g1", &[("default", "p1")]);
        let g2 = selector_group("default", "g2", &[("app", "db")]);
        let p1 = bound_claim("default", "p1", &[("app", "db")], "gold", None);

        let err = check_claim_admission(&p1, &[g1, g2]).unwrap_err();
        let message = err.status_message();
        assert!(message.contains("already belongs to (g1)"), "{message}");
        assert!(message.contains("cannot also join (g2)"), "{message}");
    }

    #[test]
    fn admission_accepts_a_single_candidate() {
        let g1 = selector_group("default", "g1", &[("app", "db")]);
        let p1 = bound_claim("default", "p1", &[("app", "db")], "gold", None);
        check_claim_admission(&p1, &[g1]).unwrap();
    }

    #[tokio::test]
    async fn volume_ids_skip_claims_without_volumes() {
        let mut store = MockGroupStore::new();
        store
            .expect_get_pvc()
            .with(eq("default"), eq("p1"))
            .returning(|_, _| Ok(Some(bound_claim("default", "p1", &[], "gold", Some("pv-1")))));
        store
            .expect_get_pvc()
            .with(eq("default"), eq("p2"))
            .returning(|_, _| Ok(Some(bound_claim("default", "p2", &[], "gold", None))));
        store
            .expect_get_pvc()
            .with(eq("default"), eq("gone"))
            .returning(|_, _| Ok(None));
        store
            .expect_get_pv()
            .with(eq("pv-1"))
            .returning(|_| Ok(Some(csi_volume("pv-1", "handle-1"))));

        let claims = vec![
            ClaimReference::new("default", "p1"),
            ClaimReference::new("default", "p2"),
            ClaimReference::new("default", "gone"),
        ];
        let ids = volume_ids_for_claims(&store, &claims).await.unwrap();
        assert_eq!(ids, vec!["handle-1".to_string()]);
    }

    #[tokio::test]
    async fn failed_modify_reverts_the_in_memory_append() {
        let mut store = MockGroupStore::new();
        store
            .expect_get_volume_group_content()
            .with(eq("volumegroup-uid-1"))
            .returning(|_| Ok(Some(content_with_handle("volumegroup-uid-1", "handle-1"))));
        store
            .expect_get_pvc()
            .returning(|_, _| Ok(Some(bound_claim("default", "p1", &[], "gold", Some("pv-1")))));
        store
            .expect_get_pv()
            .returning(|_| Ok(Some(csi_volume("pv-1", "handle-p1"))));
        store
            .expect_get_volume_group_class()
            .returning(|_| Ok(Some(driver_class("gold", "csi.example.com"))));
        // No update_volume_group_status expectation: a failed modify must not persist.

        let mut driver = MockVolumeGroupService::new();
        driver
            .expect_modify_volume_group()
            .returning(|_, _, _| Err(unavailable("backend is down")));

        let ctx = test_context(store, driver, MockEventPublisher::new());

        let mut vg = bound_group("default", "g1", "volumegroup-uid-1");
        let p1 = bound_claim("default", "p1", &[("app", "db")], "gold", Some("pv-1"));

        let err = add_claims_to_group(&ctx, &[p1], &mut vg).await.unwrap_err();
        assert!(err.status_message().contains("backend is down"));
        assert!(recorded_claims(&vg).is_empty(), "append must be reverted");
    }

    #[tokio::test]
    async fn successful_modify_persists_the_status() {
        let mut store = MockGroupStore::new();
        store
            .expect_get_volume_group_content()
            .returning(|_| Ok(Some(content_with_handle("volumegroup-uid-1", "handle-1"))));
        store
            .expect_get_pvc()
            .returning(|_, _| Ok(Some(bound_claim("default", "p1", &[], "gold", Some("pv-1")))));
        store
            .expect_get_pv()
            .returning(|_| Ok(Some(csi_volume("pv-1", "handle-p1"))));
        store
            .expect_get_volume_group_class()
            .returning(|_| Ok(Some(driver_class("gold", "csi.example.com"))));
        store
            .expect_update_volume_group_status()
            .withf(|vg: &VolumeGroup| {
                recorded_claims(vg) == vec![ClaimReference::new("default", "p1")]
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut driver = MockVolumeGroupService::new();
        driver
            .expect_modify_volume_group()
            .withf(|handle, ids, _| handle == "handle-1" && ids == ["handle-p1".to_string()])
            .times(1)
            .returning(|_, _, _| Ok(()));

        let ctx = test_context(store, driver, MockEventPublisher::new());

        let mut vg = bound_group("default", "g1", "volumegroup-uid-1");
        let p1 = bound_claim("default", "p1", &[("app", "db")], "gold", Some("pv-1"));

        add_claims_to_group(&ctx, &[p1], &mut vg).await.unwrap();
        assert_eq!(
            recorded_claims(&vg),
            vec![ClaimReference::new("default", "p1")]
        );
    }

    #[tokio::test]
    async fn add_and_remove_round_trip_restores_the_list() {
        // Complementary ModifyVolumeGroup vectors: [handle-p1] then [].
        let mut store = MockGroupStore::new();
        store
            .expect_get_volume_group_content()
            .returning(|_| Ok(Some(content_with_handle("volumegroup-uid-1", "handle-1"))));
        store
            .expect_get_pvc()
            .returning(|_, _| Ok(Some(bound_claim("default", "p1", &[], "gold", Some("pv-1")))));
        store
            .expect_get_pv()
            .returning(|_| Ok(Some(csi_volume("pv-1", "handle-p1"))));
        store
            .expect_get_volume_group_class()
            .returning(|_| Ok(Some(driver_class("gold", "csi.example.com"))));
        store
            .expect_update_volume_group_status()
            .times(2)
            .returning(|_| Ok(()));

        let mut driver = MockVolumeGroupService::new();
        let mut seq = mockall::Sequence::new();
        driver
            .expect_modify_volume_group()
            .withf(|_, ids, _| ids == ["handle-p1".to_string()])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        driver
            .expect_modify_volume_group()
            .withf(|_, ids, _| ids.is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        let ctx = test_context(store, driver, MockEventPublisher::new());

        let mut vg = bound_group("default", "g1", "volumegroup-uid-1");
        let p1 = bound_claim("default", "p1", &[("app", "db")], "gold", Some("pv-1"));

        add_claims_to_group(&ctx, std::slice::from_ref(&p1), &mut vg)
            .await
            .unwrap();
        remove_claims_from_group(&ctx, &[p1], &mut vg).await.unwrap();
        assert!(recorded_claims(&vg).is_empty());
    }

    #[tokio::test]
    async fn orphaned_claim_finalizer_is_released() {
        let mut store = MockGroupStore::new();
        store.expect_list_volume_groups().returning(|| Ok(vec![]));
        store
            .expect_remove_claim_finalizer()
            .times(1)
            .returning(|_| Ok(()));

        let ctx = test_context(store, MockVolumeGroupService::new(), MockEventPublisher::new());

        let mut pvc = bound_claim("default", "p1", &[], "gold", None);
        pvc.metadata.finalizers = Some(vec![crate::PVC_FINALIZER.to_string()]);

        release_claim_finalizer_if_orphaned(&ctx, &pvc).await.unwrap();
    }

    #[tokio::test]
    async fn member_claim_keeps_its_finalizer() {
        let mut store = MockGroupStore::new();
        let vg = group_with_members("default", "g1", &[("default", "p1")]);
        store
            .expect_list_volume_groups()
            .return_once(move || Ok(vec![vg]));
        store
            .expect_get_volume_group_class()
            .returning(|_| Ok(Some(driver_class("gold", "csi.example.com"))));
        // No remove_claim_finalizer expectation: it must not be called.

        let ctx = test_context(store, MockVolumeGroupService::new(), MockEventPublisher::new());

        let mut pvc = bound_claim("default", "p1", &[], "gold", None);
        pvc.metadata.finalizers = Some(vec![crate::PVC_FINALIZER.to_string()]);

        release_claim_finalizer_if_orphaned(&ctx, &pvc).await.unwrap();
    }
}
