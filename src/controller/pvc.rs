//! PersistentVolumeClaim controller implementation
//!
//! On every claim change this loop removes the claim from groups whose
//! selector it no longer satisfies, then joins it to the group it now
//! matches. Claims are gated first: the controller only acts on Bound
//! claims provisioned by its own driver, and refuses claims whose storage
//! class marks them as statically grouped.
//!
//! The add path joins at most one group per reconcile; a claim matching
//! several groups (with multiple membership enabled) converges over
//! subsequent passes.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use crate::crd::VolumeGroup;
use crate::events::actions;
use crate::{Error, STORAGE_CLASS_GROUP_PARAMETER};

use super::membership::{
    add_claims_to_group, attach_claim, check_claim_admission, claim_driver_matches,
    claim_in_static_storage_class, claim_is_bound, claim_key, claim_matches_group,
    claim_recorded_in_group, claim_storage_class, detach_claim, groups_for_driver,
    release_claim_finalizer_if_orphaned, remove_claims_from_group,
};
use super::{record_claim_warning, record_group_error, Context};

/// Reconcile a PersistentVolumeClaim
///
/// # Arguments
///
/// * `pvc` - The claim to reconcile
/// * `ctx` - Shared controller context
#[instrument(skip(pvc, ctx), fields(claim = %pvc.name_any(), namespace = %pvc.namespace().unwrap_or_default()))]
pub async fn reconcile(
    pvc: Arc<PersistentVolumeClaim>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    debug!("reconciling persistent volume claim");

    if !should_handle(&ctx, &pvc).await? {
        return Ok(Action::await_change());
    }

    remove_stale_memberships(&ctx, &pvc).await?;
    let joined = add_new_membership(&ctx, &pvc).await?;
    if !joined {
        release_claim_finalizer_if_orphaned(&ctx, &pvc).await?;
    }

    Ok(Action::await_change())
}

/// Error policy for the claim controller.
pub fn error_policy(pvc: Arc<PersistentVolumeClaim>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        claim = %pvc.name_any(),
        "claim reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}

/// Eligibility gate: right driver, Bound phase, not statically grouped via
/// the storage class.
async fn should_handle(ctx: &Context, pvc: &PersistentVolumeClaim) -> Result<bool, Error> {
    let store = ctx.store.as_ref();

    if !claim_driver_matches(store, pvc, &ctx.config.driver_name).await? {
        return Ok(false);
    }
    if !claim_is_bound(pvc) {
        debug!("claim is not in Bound phase");
        return Ok(false);
    }
    if claim_in_static_storage_class(store, pvc).await? {
        let (namespace, name) = claim_key(pvc);
        let class = claim_storage_class(pvc).unwrap_or_default();
        let message = format!(
            "storageClass {class} of persistentVolumeClaim {namespace}/{name} has the \
             {STORAGE_CLASS_GROUP_PARAMETER} parameter, the claim is grouped by its storage class"
        );
        warn!("{message}");
        record_claim_warning(ctx, pvc, actions::ADD_VOLUME, message).await;
        return Ok(false);
    }
    Ok(true)
}

/// Remove the claim from every group that records it but whose selector it
/// no longer satisfies.
async fn remove_stale_memberships(
    ctx: &Context,
    pvc: &PersistentVolumeClaim,
) -> Result<(), Error> {
    let groups = groups_for_driver(ctx.store.as_ref(), &ctx.config.driver_name).await?;

    for mut vg in groups {
        if !claim_recorded_in_group(pvc, &vg) {
            continue;
        }
        if claim_matches_group(pvc, &vg)? {
            continue;
        }

        info!(group = %vg.name(), "claim no longer matches group, removing");
        if let Err(e) = remove_claim(ctx, pvc, &mut vg).await {
            record_group_error(ctx, &vg, &e, actions::REMOVE_VOLUME).await;
            return Err(e);
        }
    }
    Ok(())
}

async fn remove_claim(
    ctx: &Context,
    pvc: &PersistentVolumeClaim,
    vg: &mut VolumeGroup,
) -> Result<(), Error> {
    remove_claims_from_group(ctx, std::slice::from_ref(pvc), vg).await?;
    detach_claim(ctx, pvc, vg).await
}

/// Join the claim to the first group it matches but is not yet recorded in.
///
/// Returns true when a group was joined this pass.
async fn add_new_membership(ctx: &Context, pvc: &PersistentVolumeClaim) -> Result<bool, Error> {
    let store = ctx.store.as_ref();
    let groups = groups_for_driver(store, &ctx.config.driver_name).await?;

    if !ctx.config.multiple_vgs_to_pvc {
        if let Err(e) = check_claim_admission(pvc, &groups) {
            record_claim_warning(ctx, pvc, actions::ADD_VOLUME, e.status_message()).await;
            return Err(e);
        }
    }

    for mut vg in groups {
        if claim_recorded_in_group(pvc, &vg) {
            continue;
        }
        if !claim_matches_group(pvc, &vg)? {
            continue;
        }

        info!(group = %vg.name(), "claim matches group, adding");
        if let Err(e) = add_claims_to_group(ctx, std::slice::from_ref(pvc), &mut vg).await {
            record_group_error(ctx, &vg, &e, actions::ADD_VOLUME).await;
            return Err(e);
        }
        if let Err(e) = attach_claim(ctx, pvc, &vg).await {
            record_group_error(ctx, &vg, &e, actions::ADD_VOLUME).await;
            return Err(e);
        }
        // One group per pass; a claim matching several groups converges
        // over later reconciles.
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_support::*;
    use crate::crd::ClaimReference;
    use crate::driver::MockVolumeGroupService;
    use crate::events::{MockEventPublisher, NoopEventPublisher};
    use kube::runtime::events::EventType;
    use mockall::predicate::{always, eq};

    fn relabeled_claim() -> PersistentVolumeClaim {
        bound_claim("default", "p1", &[("app", "other")], "fast-sc", Some("pv-1"))
    }

    /// Label drift: the claim is removed from the group it no longer
    /// matches; the backend sees an empty member vector; the claim
    /// finalizer is released.
    #[tokio::test]
    async fn label_drift_removes_the_claim() {
        let mut store = MockGroupStore::new();
        // First list: g1 still records p1 (selector {app: db}, claim now
        // {app: other}). Later lists see the persisted removal.
        store
            .expect_list_volume_groups()
            .times(1)
            .returning(|| Ok(vec![group_with_members("default", "g1", &[("default", "p1")])]));
        store
            .expect_list_volume_groups()
            .returning(|| Ok(vec![bound_group("default", "g1", "volumegroup-uid-g1")]));
        store
            .expect_get_volume_group_class()
            .returning(|_| Ok(Some(driver_class("gold", TEST_DRIVER))));
        store
            .expect_get_storage_class()
            .with(eq("fast-sc"))
            .returning(|_| Ok(Some(storage_class("fast-sc", TEST_DRIVER, &[]))));
        store
            .expect_get_volume_group_content()
            .returning(|_| Ok(Some(content_with_handle("volumegroup-uid-g1", "handle-g1"))));
        store
            .expect_update_volume_group_status()
            .withf(|vg: &crate::crd::VolumeGroup| {
                vg.status.as_ref().is_some_and(|s| s.pvc_list.is_empty())
            })
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_update_volume_group_content()
            .withf(|vgc: &crate::crd::VolumeGroupContent| vgc.spec.pv_list.is_empty())
            .times(1)
            .returning(|_| Ok(()));
        // Called by the detach bookkeeping and again by the end-of-pass
        // orphan repair; both are idempotent.
        store
            .expect_remove_claim_finalizer()
            .times(1..)
            .returning(|_| Ok(()));

        let mut driver = MockVolumeGroupService::new();
        driver
            .expect_modify_volume_group()
            .withf(|handle, ids, _| handle == "handle-g1" && ids.is_empty())
            .times(1)
            .returning(|_, _, _| Ok(()));

        let ctx = Arc::new(test_context(store, driver, NoopEventPublisher));

        let mut pvc = relabeled_claim();
        pvc.metadata.finalizers = Some(vec![crate::PVC_FINALIZER.to_string()]);

        let action = reconcile(Arc::new(pvc), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Single-group exclusivity: a claim matching two groups is
    /// rejected with an event naming both groups; neither group is
    /// modified.
    #[tokio::test]
    async fn multi_group_match_is_rejected_with_an_event() {
        let mut store = MockGroupStore::new();
        store.expect_list_volume_groups().returning(|| {
            Ok(vec![
                selector_group("default", "g1", &[("tier", "a")]),
                selector_group("default", "g2", &[("tier", "a"), ("zone", "x")]),
            ])
        });
        store
            .expect_get_volume_group_class()
            .returning(|_| Ok(Some(driver_class("gold", TEST_DRIVER))));
        store
            .expect_get_storage_class()
            .returning(|_| Ok(Some(storage_class("fast-sc", TEST_DRIVER, &[]))));

        let driver = MockVolumeGroupService::new(); // any ModifyGroup would panic

        let mut events = MockEventPublisher::new();
        events
            .expect_publish()
            .withf(|_, type_, reason, _, note| {
                matches!(type_, EventType::Warning)
                    && reason == crate::events::reasons::CLAIM_REJECTED
                    && note
                        .as_deref()
                        .is_some_and(|n| n.contains("matched multiple groups (g1, g2)"))
            })
            .times(1)
            .return_const(());

        let ctx = Arc::new(test_context(store, driver, events));

        let p2 = bound_claim(
            "default",
            "p2",
            &[("tier", "a"), ("zone", "x")],
            "fast-sc",
            Some("pv-2"),
        );

        let err = reconcile(Arc::new(p2), ctx).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    /// A claim whose storage class carries the static-group parameter is
    /// refused with an event and never touches any group.
    #[tokio::test]
    async fn statically_grouped_claim_is_refused() {
        let mut store = MockGroupStore::new();
        store.expect_get_storage_class().returning(|_| {
            Ok(Some(storage_class(
                "static-sc",
                TEST_DRIVER,
                &[(STORAGE_CLASS_GROUP_PARAMETER, "legacy-group")],
            )))
        });

        let driver = MockVolumeGroupService::new();

        let mut events = MockEventPublisher::new();
        events
            .expect_publish()
            .withf(|_, type_, _, _, note| {
                matches!(type_, EventType::Warning)
                    && note.as_deref().is_some_and(|n| {
                        n.contains("static-sc") && n.contains(STORAGE_CLASS_GROUP_PARAMETER)
                    })
            })
            .times(1)
            .return_const(());

        let ctx = Arc::new(test_context(store, driver, events));

        let pvc = bound_claim("default", "p1", &[("app", "db")], "static-sc", None);

        let action = reconcile(Arc::new(pvc), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Claims not yet Bound (or no longer Bound) are skipped; a Lost claim
    /// recorded in a group is removed on its next pass once Bound is gone.
    #[tokio::test]
    async fn unbound_claims_are_skipped() {
        let mut store = MockGroupStore::new();
        store
            .expect_get_storage_class()
            .returning(|_| Ok(Some(storage_class("fast-sc", TEST_DRIVER, &[]))));

        let driver = MockVolumeGroupService::new();

        let ctx = Arc::new(test_context(store, driver, NoopEventPublisher));

        let mut pvc = bound_claim("default", "p1", &[("app", "db")], "fast-sc", None);
        pvc.status.as_mut().unwrap().phase = Some("Lost".to_string());

        let action = reconcile(Arc::new(pvc), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// A claim for a different driver's storage class is ignored.
    #[tokio::test]
    async fn foreign_driver_claims_are_ignored() {
        let mut store = MockGroupStore::new();
        store
            .expect_get_storage_class()
            .returning(|_| Ok(Some(storage_class("other-sc", "other.driver.io", &[]))));

        let driver = MockVolumeGroupService::new();

        let ctx = Arc::new(test_context(store, driver, NoopEventPublisher));

        let pvc = bound_claim("default", "p1", &[("app", "db")], "other-sc", None);

        let action = reconcile(Arc::new(pvc), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// The claim loop joins the single matching group and records the
    /// membership end to end.
    #[tokio::test]
    async fn matching_claim_joins_the_group() {
        let mut store = MockGroupStore::new();
        store
            .expect_list_volume_groups()
            .returning(|| Ok(vec![bound_group("default", "g1", "volumegroup-uid-g1")]));
        store
            .expect_get_volume_group_class()
            .returning(|_| Ok(Some(driver_class("gold", TEST_DRIVER))));
        store
            .expect_get_storage_class()
            .returning(|_| Ok(Some(storage_class("fast-sc", TEST_DRIVER, &[]))));
        store
            .expect_get_volume_group_content()
            .returning(|_| Ok(Some(content_with_handle("volumegroup-uid-g1", "handle-g1"))));
        store
            .expect_get_pvc()
            .with(eq("default"), eq("p1"))
            .returning(|_, _| {
                Ok(Some(bound_claim(
                    "default",
                    "p1",
                    &[("app", "db")],
                    "fast-sc",
                    Some("pv-1"),
                )))
            });
        store
            .expect_get_pv()
            .with(eq("pv-1"))
            .returning(|_| Ok(Some(csi_volume("pv-1", "handle-p1"))));
        store
            .expect_update_volume_group_status()
            .withf(|vg: &crate::crd::VolumeGroup| {
                vg.status
                    .as_ref()
                    .is_some_and(|s| s.pvc_list == vec![ClaimReference::new("default", "p1")])
            })
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_update_volume_group_content()
            .withf(|vgc: &crate::crd::VolumeGroupContent| vgc.spec.pv_list == ["pv-1".to_string()])
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_add_claim_finalizer()
            .times(1)
            .returning(|_| Ok(()));

        let mut driver = MockVolumeGroupService::new();
        driver
            .expect_modify_volume_group()
            .withf(|handle, ids, _| handle == "handle-g1" && ids == ["handle-p1".to_string()])
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut events = MockEventPublisher::new();
        events
            .expect_publish()
            .with(always(), always(), always(), always(), always())
            .return_const(());

        let ctx = Arc::new(test_context(store, driver, events));

        let p1 = bound_claim("default", "p1", &[("app", "db")], "fast-sc", Some("pv-1"));

        let action = reconcile(Arc::new(p1), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// A transient backend failure during removal surfaces for requeue and
    /// leaves the group status untouched.
    #[tokio::test]
    async fn failed_removal_surfaces_the_driver_error() {
        let mut store = MockGroupStore::new();
        store
            .expect_list_volume_groups()
            .returning(|| Ok(vec![group_with_members("default", "g1", &[("default", "p1")])]));
        store
            .expect_get_volume_group_class()
            .returning(|_| Ok(Some(driver_class("gold", TEST_DRIVER))));
        store
            .expect_get_storage_class()
            .returning(|_| Ok(Some(storage_class("fast-sc", TEST_DRIVER, &[]))));
        store
            .expect_get_volume_group_content()
            .returning(|_| Ok(Some(content_with_handle("volumegroup-uid-g1", "handle-g1"))));
        store
            .expect_get_pvc()
            .returning(|_, _| Ok(Some(relabeled_claim())));
        store
            .expect_get_pv()
            .returning(|_| Ok(Some(csi_volume("pv-1", "handle-p1"))));
        // Failed modify: record_group_error writes status.error.
        store
            .expect_update_volume_group_status()
            .withf(|vg: &crate::crd::VolumeGroup| {
                vg.status
                    .as_ref()
                    .and_then(|s| s.error.as_ref())
                    .is_some()
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut driver = MockVolumeGroupService::new();
        driver
            .expect_modify_volume_group()
            .times(1)
            .returning(|_, _, _| Err(unavailable("backend is down")));

        let ctx = Arc::new(test_context(store, driver, NoopEventPublisher));

        let mut pvc = relabeled_claim();
        pvc.metadata.finalizers = Some(vec![crate::PVC_FINALIZER.to_string()]);

        let err = reconcile(Arc::new(pvc), ctx).await.unwrap_err();
        assert!(err.status_message().contains("backend is down"));
    }
}
