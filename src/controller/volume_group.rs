//! VolumeGroup controller implementation
//!
//! This module implements the reconciliation logic for VolumeGroup
//! resources. It follows the Kubernetes controller pattern: observe current
//! state, determine desired state, calculate diff, and apply changes.
//!
//! Lifecycle of a dynamic group: add the protection finalizer, create the
//! backend group over RPC once, materialize a VolumeGroupContent for the
//! returned handle, bind group and content together, then converge the
//! realized membership onto the label selector. A group whose
//! deletionTimestamp is set walks the reverse path: backend delete, content
//! finalizer and object removal, group finalizer removal. Static groups
//! only mirror class fields onto their pre-provisioned content and never
//! touch the backend.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use crate::crd::{
    GroupSource, VolumeGroup, VolumeGroupClass, VolumeGroupContent, VolumeGroupContentStatus,
};
use crate::events::{actions, reasons};
use crate::Error;

use super::membership::{
    add_claims_to_group, attach_claim, check_claim_admission, claim_matches_group,
    claim_recorded_in_group, class_for_group, detach_claim, eligible_claims, groups_for_driver,
    recorded_claims, remove_claims_from_group, secrets_for_class,
};
use super::store::{has_finalizer, with_finalizer};
use super::{record_group_error, record_group_success, Context};

/// Which lifecycle branch a group takes, decided before any mutation.
enum Branch {
    Static(String),
    Dynamic,
}

/// Reconcile a VolumeGroup resource
///
/// # Arguments
///
/// * `vg` - The VolumeGroup resource to reconcile
/// * `ctx` - Shared controller context
///
/// # Returns
///
/// Returns an `Action` indicating when to requeue the resource, or an error
/// if reconciliation failed.
#[instrument(skip(vg, ctx), fields(group = %vg.name_any(), namespace = %vg.namespace()))]
pub async fn reconcile(vg: Arc<VolumeGroup>, ctx: Arc<Context>) -> Result<Action, Error> {
    info!("reconciling volume group");
    let store = ctx.store.as_ref();

    let class = match class_for_group(store, &vg).await {
        Ok(class) => class,
        Err(e) => {
            record_group_error(&ctx, &vg, &e, actions::RECONCILE).await;
            return Err(e);
        }
    };

    if class.driver != ctx.config.driver_name {
        debug!(driver = %class.driver, "group is owned by another driver, ignoring");
        return Ok(Action::await_change());
    }

    if let Err(e) = class.validate_parameters() {
        record_group_error(&ctx, &vg, &e, actions::RECONCILE).await;
        // A bad parameter needs a spec change, not a retry.
        return Ok(Action::await_change());
    }

    let secrets = match secrets_for_class(store, &class).await {
        Ok(secrets) => secrets,
        Err(e) => {
            record_group_error(&ctx, &vg, &e, actions::RECONCILE).await;
            return Err(e);
        }
    };

    if vg.metadata.deletion_timestamp.is_some() {
        if has_finalizer(&vg.metadata, crate::VOLUME_GROUP_FINALIZER) {
            if let Err(e) = finalize_group(&ctx, &vg, &secrets).await {
                record_group_error(&ctx, &vg, &e, actions::DELETE_GROUP).await;
                return Err(e);
            }
        }
        info!("volume group is terminating, skipping reconciliation");
        return Ok(Action::await_change());
    }

    if let Err(e) = store.add_volume_group_finalizer(&vg).await {
        record_group_error(&ctx, &vg, &e, actions::RECONCILE).await;
        return Err(e);
    }

    let branch = match vg.source() {
        Ok(GroupSource::Static(content_name)) => Branch::Static(content_name.to_string()),
        Ok(GroupSource::Dynamic(_)) => Branch::Dynamic,
        Err(e) => {
            record_group_error(&ctx, &vg, &e, actions::RECONCILE).await;
            return Ok(Action::await_change());
        }
    };

    let mut vg = (*vg).clone();
    with_finalizer(&mut vg.metadata, crate::VOLUME_GROUP_FINALIZER);

    match branch {
        Branch::Static(content_name) => {
            if let Err(e) = reconcile_static(&ctx, &mut vg, &class, &content_name).await {
                record_group_error(&ctx, &vg, &e, actions::RECONCILE).await;
                return Err(e);
            }
        }
        Branch::Dynamic => {
            reconcile_dynamic(&ctx, &mut vg, &class, &secrets).await?;
            record_group_success(
                &ctx,
                &vg,
                reasons::VOLUME_GROUP_CREATED,
                actions::RECONCILE,
                format!(
                    "volumeGroup {}/{} was successfully created",
                    vg.namespace(),
                    vg.name()
                ),
            )
            .await;
        }
    }

    Ok(Action::await_change())
}

/// Error policy for the controller
///
/// Called when reconciliation fails; requeues with a delay so transient
/// failures (driver unavailable, conflicts past the local budget) converge.
pub fn error_policy(vg: Arc<VolumeGroup>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        group = %vg.name_any(),
        "reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}

/// Dynamic branch: ensure the backend group and content exist, bind them to
/// the group, converge membership.
///
/// Each step records its own failure on the group status before returning.
async fn reconcile_dynamic(
    ctx: &Context,
    vg: &mut VolumeGroup,
    class: &VolumeGroupClass,
    secrets: &std::collections::BTreeMap<String, String>,
) -> Result<(), Error> {
    let store = ctx.store.as_ref();

    let existing = match vg.content_name() {
        Some(name) => match store.get_volume_group_content(name).await {
            Ok(vgc) => vgc,
            Err(e) => {
                record_group_error(ctx, vg, &e, actions::RECONCILE).await;
                return Err(e);
            }
        },
        None => None,
    };

    let (mut vgc, creation_time) = match existing {
        Some(vgc) => {
            let time = vg
                .status
                .as_ref()
                .and_then(|s| s.group_creation_time.clone())
                .unwrap_or_else(|| Time(Utc::now()));
            (vgc, time)
        }
        None => provision_backend_group(ctx, vg, class, secrets).await?,
    };

    if let Err(e) = bind_group(ctx, vg, &mut vgc, &creation_time).await {
        record_group_error(ctx, vg, &e, actions::RECONCILE).await;
        return Err(e);
    }

    if let Err(e) = remove_unmatched_members(ctx, vg).await {
        record_group_error(ctx, vg, &e, actions::REMOVE_VOLUME).await;
        return Err(e);
    }
    if let Err(e) = add_matching_members(ctx, vg).await {
        record_group_error(ctx, vg, &e, actions::ADD_VOLUME).await;
        return Err(e);
    }
    Ok(())
}

/// Create the backend group and its content object.
///
/// The backend name is `<prefix>-<UID>`, so a crashed controller recreates
/// the same group idempotently. The content create treats 409 as success
/// for the same reason.
async fn provision_backend_group(
    ctx: &Context,
    vg: &VolumeGroup,
    class: &VolumeGroupClass,
    secrets: &std::collections::BTreeMap<String, String>,
) -> Result<(VolumeGroupContent, Time), Error> {
    let uid = vg.metadata.uid.as_deref().unwrap_or_default();
    let group_name = match ctx.config.volume_group_name(uid) {
        Ok(name) => name,
        Err(e) => {
            record_group_error(ctx, vg, &e, actions::CREATE_GROUP).await;
            return Err(e);
        }
    };

    let created = match ctx
        .driver
        .create_volume_group(&group_name, &class.driver_parameters(), secrets)
        .await
    {
        Ok(created) => created,
        Err(e) => {
            error!(error = %e, "failed to create backend volume group");
            record_group_error(ctx, vg, &e, actions::CREATE_GROUP).await;
            return Err(e);
        }
    };

    let vgc = VolumeGroupContent::for_group(&group_name, vg, class, &created.handle);
    if let Err(e) = ctx.store.create_volume_group_content(&vgc).await {
        record_group_error(ctx, vg, &e, actions::CREATE_GROUP).await;
        return Err(e);
    }

    info!(content = %group_name, handle = %created.handle, "provisioned backend volume group");
    let creation_time = created.creation_time.unwrap_or_else(|| Time(Utc::now()));
    Ok((vgc, creation_time))
}

/// Bind group and content: spec back-reference, group status, content
/// finalizer and content status.
async fn bind_group(
    ctx: &Context,
    vg: &mut VolumeGroup,
    vgc: &mut VolumeGroupContent,
    creation_time: &Time,
) -> Result<(), Error> {
    let store = ctx.store.as_ref();
    let content_name = vgc.name_any();

    if vg.spec.source.volume_group_content_name.as_deref() != Some(content_name.as_str()) {
        vg.spec.source.volume_group_content_name = Some(content_name.clone());
        store.update_volume_group(vg).await?;
    }

    {
        let status = vg.status.get_or_insert_with(Default::default);
        status.bound_volume_group_content_name = Some(content_name);
        status.group_creation_time = Some(creation_time.clone());
        status.ready = Some(true);
        status.error = None;
    }
    store.update_volume_group_status(vg).await?;

    store.add_content_finalizer(vgc).await?;
    with_finalizer(&mut vgc.metadata, crate::VOLUME_GROUP_FINALIZER);

    vgc.status = Some(VolumeGroupContentStatus {
        ready: Some(true),
        group_creation_time: Some(creation_time.clone()),
        error: None,
    });
    store.update_volume_group_content_status(vgc).await
}

/// Static branch: bind to the pre-provisioned content and mirror the class
/// fields onto it. No backend RPCs, ever.
async fn reconcile_static(
    ctx: &Context,
    vg: &mut VolumeGroup,
    class: &VolumeGroupClass,
    content_name: &str,
) -> Result<(), Error> {
    let store = ctx.store.as_ref();

    let Some(mut vgc) = store.get_volume_group_content(content_name).await? else {
        return Err(Error::dependency(format!(
            "volumeGroupContent {} for volumeGroup {}/{} not found",
            content_name,
            vg.namespace(),
            vg.name()
        )));
    };

    let creation_time = vg
        .status
        .as_ref()
        .and_then(|s| s.group_creation_time.clone())
        .unwrap_or_else(|| Time(Utc::now()));
    bind_group(ctx, vg, &mut vgc, &creation_time).await?;

    vgc.spec.volume_group_class_name = Some(class.name_any());
    vgc.spec.source.driver = Some(class.driver.clone());
    vgc.spec.volume_group_secret_ref = class.secret_reference();
    store.update_volume_group_content(&vgc).await
}

/// Deletion protocol: backend delete, content finalizer removal, content
/// deletion, group finalizer removal, in that order, so a crash at any
/// point resumes safely. Static groups only release the group finalizer.
async fn finalize_group(
    ctx: &Context,
    vg: &VolumeGroup,
    secrets: &std::collections::BTreeMap<String, String>,
) -> Result<(), Error> {
    let store = ctx.store.as_ref();
    let is_dynamic = matches!(vg.source(), Ok(GroupSource::Dynamic(_)));

    if is_dynamic {
        if let Some(content_name) = vg.content_name() {
            if let Some(vgc) = store.get_volume_group_content(content_name).await? {
                if let Some(handle) = vgc.handle() {
                    ctx.driver.delete_volume_group(handle, secrets).await?;
                }
                store.remove_content_finalizer(&vgc).await?;
                store.delete_volume_group_content(&vgc.name_any()).await?;
            }
        }
    }

    store.remove_volume_group_finalizer(vg).await
}

/// Drop recorded members whose labels no longer satisfy the selector.
async fn remove_unmatched_members(ctx: &Context, vg: &mut VolumeGroup) -> Result<(), Error> {
    let store = ctx.store.as_ref();
    let recorded = recorded_claims(vg);
    if recorded.is_empty() {
        return Ok(());
    }

    let mut to_remove = Vec::new();
    for claim in &recorded {
        let Some(pvc) = store.get_pvc(&claim.namespace, &claim.name).await? else {
            return Err(Error::dependency(format!(
                "persistentVolumeClaim {} recorded in volumeGroup {}/{} not found",
                claim,
                vg.namespace(),
                vg.name()
            )));
        };
        if !claim_matches_group(&pvc, vg)? {
            to_remove.push(pvc);
        }
    }

    remove_claims_from_group(ctx, &to_remove, vg).await?;
    for pvc in &to_remove {
        detach_claim(ctx, pvc, vg).await?;
    }
    Ok(())
}

/// Join eligible claims whose labels satisfy the selector.
async fn add_matching_members(ctx: &Context, vg: &mut VolumeGroup) -> Result<(), Error> {
    let store = ctx.store.as_ref();

    let mut to_add = Vec::new();
    for pvc in eligible_claims(store, &ctx.config.driver_name).await? {
        if claim_recorded_in_group(&pvc, vg) {
            continue;
        }
        if !claim_matches_group(&pvc, vg)? {
            continue;
        }
        if !ctx.config.multiple_vgs_to_pvc {
            let groups = groups_for_driver(store, &ctx.config.driver_name).await?;
            check_claim_admission(&pvc, &groups)?;
        }
        to_add.push(pvc);
    }

    add_claims_to_group(ctx, &to_add, vg).await?;
    for pvc in &to_add {
        attach_claim(ctx, pvc, vg).await?;
    }
    Ok(())
}
