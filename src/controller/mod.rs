//! Controller implementations for the volume group CRDs
//!
//! This module contains the reconciliation logic for the two watched kinds.
//! Controllers follow the Kubernetes controller pattern with
//! observe-diff-act loops: the VolumeGroup loop owns the group lifecycle
//! (backend create/delete, content binding, membership), the
//! PersistentVolumeClaim loop keeps individual claims in the groups their
//! labels select.

pub mod membership;
pub mod pvc;
pub mod store;
pub mod volume_group;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, ListParams};
use kube::runtime::controller::Controller;
use kube::runtime::events::EventType;
use kube::runtime::watcher;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::config::DriverConfig;
use crate::crd::{GroupError, VolumeGroup, VolumeGroupClass, VolumeGroupContent};
use crate::driver::VolumeGroupService;
use crate::events::{reasons, EventPublisher};
use crate::Error;

use store::GroupStore;

/// Interval between startup probes while the CRDs are not yet registered.
const CRD_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Controller context containing shared state and clients
///
/// The context is shared across all reconciliation calls and holds the
/// object-store access layer, the driver RPC adapter, the event publisher
/// and the immutable process configuration.
pub struct Context {
    /// Object-store access layer (trait object for testability)
    pub store: Arc<dyn GroupStore>,
    /// Driver RPC adapter
    pub driver: Arc<dyn VolumeGroupService>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Immutable driver configuration
    pub config: DriverConfig,
}

impl Context {
    /// Create a production context over a kube client and an established
    /// driver connection.
    pub fn new(
        client: Client,
        driver: Arc<dyn VolumeGroupService>,
        events: Arc<dyn EventPublisher>,
        config: DriverConfig,
    ) -> Self {
        Self {
            store: Arc::new(store::KubeGroupStore::new(client)),
            driver,
            events,
            config,
        }
    }
}

/// Write the failure onto the group's status and emit a Warning event.
///
/// Status-write failures are logged, never propagated: the original error
/// is what the caller surfaces to the dispatcher.
pub(crate) async fn record_group_error(
    ctx: &Context,
    vg: &VolumeGroup,
    err: &Error,
    action: &'static str,
) {
    let message = err.status_message();
    warn!(group = %vg.name(), error = %message, "volume group reconcile step failed");

    let mut vg = vg.clone();
    let status = vg.status.get_or_insert_with(Default::default);
    status.error = Some(GroupError::new(message.clone()));
    if let Err(update_err) = ctx.store.update_volume_group_status(&vg).await {
        warn!(
            group = %vg.name(),
            error = %update_err,
            "failed to record error on volume group status"
        );
    }

    ctx.events
        .publish(
            &vg.object_ref(&()),
            EventType::Warning,
            reasons::VOLUME_GROUP_FAILED,
            action,
            Some(message),
        )
        .await;
}

/// Emit a Normal event on the group.
pub(crate) async fn record_group_success(
    ctx: &Context,
    vg: &VolumeGroup,
    reason: &'static str,
    action: &'static str,
    message: String,
) {
    ctx.events
        .publish(
            &vg.object_ref(&()),
            EventType::Normal,
            reason,
            action,
            Some(message),
        )
        .await;
}

/// Emit a Warning event on the claim (admission rejections).
pub(crate) async fn record_claim_warning(
    ctx: &Context,
    pvc: &PersistentVolumeClaim,
    action: &'static str,
    message: String,
) {
    ctx.events
        .publish(
            &pvc.object_ref(&()),
            EventType::Warning,
            reasons::CLAIM_REJECTED,
            action,
            Some(message),
        )
        .await;
}

/// Block until all three custom kinds are served by the API server.
///
/// A list that fails with 404 means the CRD is not registered yet; probe
/// again after a fixed interval, forever. Any other error is fatal.
pub async fn wait_for_crds(client: &Client) -> Result<(), Error> {
    wait_for_crd::<VolumeGroup>(client, "VolumeGroup").await?;
    wait_for_crd::<VolumeGroupClass>(client, "VolumeGroupClass").await?;
    wait_for_crd::<VolumeGroupContent>(client, "VolumeGroupContent").await?;
    Ok(())
}

async fn wait_for_crd<K>(client: &Client, kind: &str) -> Result<(), Error>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug,
{
    let api: Api<K> = Api::all(client.clone());
    loop {
        match api.list(&ListParams::default().limit(1)).await {
            Ok(_) => {
                debug!(kind, "custom resource definition is served");
                return Ok(());
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                info!(kind, "custom resource definition not registered yet, waiting");
                tokio::time::sleep(CRD_PROBE_INTERVAL).await;
            }
            Err(e) => {
                error!(kind, error = %e, "unexpected error while waiting for custom resource definition");
                return Err(e.into());
            }
        }
    }
}

/// Run both controllers until shutdown.
///
/// Must be called after [`wait_for_crds`] has succeeded.
pub async fn run(client: Client, ctx: Arc<Context>) {
    let groups: Api<VolumeGroup> = Api::all(client.clone());
    let claims: Api<PersistentVolumeClaim> = Api::all(client);

    info!("starting VolumeGroup controller");
    let group_controller = Controller::new(groups, watcher::Config::default())
        .shutdown_on_signal()
        .run(volume_group::reconcile, volume_group::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => debug!(?action, "volume group reconciliation completed"),
                Err(e) => error!(error = ?e, "volume group reconciliation error"),
            }
        });

    info!("starting PersistentVolumeClaim controller");
    let claim_controller = Controller::new(claims, watcher::Config::default())
        .shutdown_on_signal()
        .run(pvc::reconcile, pvc::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => debug!(?action, "claim reconciliation completed"),
                Err(e) => error!(error = ?e, "claim reconciliation error"),
            }
        });

    tokio::join!(group_controller, claim_controller);
}
