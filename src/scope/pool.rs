//! Per-pass view of one AWSMachinePool
//!
//! `PoolScope` snapshots the pool when the pass starts. Handlers mutate the
//! working copy, and [`PoolScope::patch_object`] sends only what changed
//! against the snapshot: status first, then metadata and spec. The driver
//! always calls [`PoolScope::close`] on the way out, so status written by a
//! failing stage still reaches the API server.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Resource, ResourceExt};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::cloud::Instance;
use crate::controller::KubeClient;
use crate::crd::{
    conditions, AsgStatus, AwsMachinePool, AwsMachinePoolInstanceStatus, AwsMachinePoolStatus,
    Cluster, Condition, MachinePool, ASG_READY_CONDITION, LAUNCH_TEMPLATE_READY_CONDITION,
    MACHINE_POOL_FINALIZER,
};
use crate::scope::{InfraClusterScope, ResolvedScope};
use crate::{Error, REPLICAS_MANAGED_BY_ANNOTATION};

/// Conditions summarized into Ready
const SUMMARY_CONDITIONS: [&str; 2] = [ASG_READY_CONDITION, LAUNCH_TEMPLATE_READY_CONDITION];

/// Scope for one reconcile pass of an AWSMachinePool
pub struct PoolScope {
    original: AwsMachinePool,
    /// Working copy of the pool
    pub pool: AwsMachinePool,
    /// Owning CAPI MachinePool
    pub machine_pool: MachinePool,
    /// CAPI Cluster
    pub cluster: Cluster,
    /// Infrastructure cluster
    pub infra: InfraClusterScope,
    kube: Arc<dyn KubeClient>,
}

impl PoolScope {
    /// Open a scope over `pool`
    pub fn new(pool: AwsMachinePool, resolved: ResolvedScope, kube: Arc<dyn KubeClient>) -> Self {
        Self {
            original: pool.clone(),
            pool,
            machine_pool: resolved.machine_pool,
            cluster: resolved.cluster,
            infra: resolved.infra,
            kube,
        }
    }

    /// Pool name, also the ASG name
    pub fn name(&self) -> String {
        self.pool.name_any()
    }

    /// Pool namespace
    pub fn namespace(&self) -> String {
        self.pool.namespace().unwrap_or_default()
    }

    /// Status of the working copy, created on first access
    pub fn status_mut(&mut self) -> &mut AwsMachinePoolStatus {
        self.pool.status.get_or_insert_with(Default::default)
    }

    /// Conditions of the working copy
    pub fn conditions(&self) -> &[Condition] {
        self.pool
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// Conditions of the working copy, for the `conditions::*` helpers
    pub fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status_mut().conditions
    }

    /// A terminal failure was recorded
    pub fn has_failed(&self) -> bool {
        self.pool
            .status
            .as_ref()
            .is_some_and(|s| s.failure_reason.is_some() || s.failure_message.is_some())
    }

    /// Whether the pool is being deleted
    pub fn is_deleting(&self) -> bool {
        self.pool.metadata.deletion_timestamp.is_some()
    }

    /// Add the pool finalizer; true if it was missing
    pub fn add_finalizer(&mut self) -> bool {
        let finalizers = self.pool.metadata.finalizers.get_or_insert_with(Vec::new);
        if finalizers.iter().any(|f| f == MACHINE_POOL_FINALIZER) {
            return false;
        }
        finalizers.push(MACHINE_POOL_FINALIZER.to_string());
        true
    }

    /// Remove the pool finalizer
    pub fn remove_finalizer(&mut self) {
        if let Some(finalizers) = self.pool.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != MACHINE_POOL_FINALIZER);
        }
    }

    /// Whether the pool finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.pool.finalizers().iter().any(|f| f == MACHINE_POOL_FINALIZER)
    }

    /// `status.ready = false`
    pub fn set_not_ready(&mut self) {
        self.status_mut().ready = false;
    }

    /// Record the observed ASG lifecycle status
    pub fn set_asg_status(&mut self, status: Option<AsgStatus>) {
        self.status_mut().asg_status = status;
    }

    /// Set an annotation on the working copy
    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.pool
            .annotations_mut()
            .insert(key.to_string(), value.to_string());
    }

    /// An external autoscaler owns the replica count
    pub fn replicas_externally_managed(&self) -> bool {
        self.machine_pool
            .annotations()
            .contains_key(REPLICAS_MANAGED_BY_ANNOTATION)
    }

    /// Desired replicas from the MachinePool
    pub fn desired_replicas(&self) -> Option<i32> {
        self.machine_pool.spec.replicas
    }

    /// Launch template name, defaulting to the pool name
    pub fn launch_template_name(&self) -> String {
        self.pool
            .spec
            .aws_launch_template
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.name())
    }

    /// Launch template ID recorded in status
    pub fn launch_template_id(&self) -> Option<String> {
        self.pool
            .status
            .as_ref()
            .and_then(|s| s.launch_template_id.clone())
    }

    /// Launch template version recorded in status
    pub fn launch_template_version(&self) -> Option<String> {
        self.pool
            .status
            .as_ref()
            .and_then(|s| s.launch_template_version.clone())
    }

    /// Bootstrap data secret name from the MachinePool
    pub fn bootstrap_data_secret(&self) -> Option<String> {
        self.machine_pool
            .spec
            .template
            .spec
            .bootstrap
            .data_secret_name
            .clone()
    }

    /// Tags for every resource the pool creates
    ///
    /// Cluster tags, overridden by pool tags, plus the cluster ownership tag.
    pub fn additional_tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.infra.additional_tags().clone();
        tags.extend(self.pool.spec.additional_tags.clone());
        tags.insert(self.infra.owned_tag_key(), "owned".to_string());
        tags
    }

    /// Replace `status.instances` with the observed members
    pub fn update_instance_statuses(&mut self, instances: &[Instance]) {
        self.status_mut().instances = instances
            .iter()
            .map(|instance| AwsMachinePoolInstanceStatus {
                instance_id: instance.id.clone(),
                instance_state: Some(instance.state.to_string()),
            })
            .collect();
    }

    /// Reference to the pool for Events
    pub fn object_ref(&self) -> ObjectReference {
        self.pool.object_ref(&())
    }

    /// Set `spec.replicas` on the MachinePool
    pub async fn patch_machine_pool_replicas(&mut self, replicas: i32) -> Result<(), Error> {
        let namespace = self.machine_pool.namespace().unwrap_or_default();
        self.kube
            .patch_machine_pool_replicas(&namespace, &self.machine_pool.name_any(), replicas)
            .await?;
        self.machine_pool.spec.replicas = Some(replicas);
        Ok(())
    }

    /// Persist the changes made since the last patch
    ///
    /// Both patches carry only the fields that differ from the snapshot.
    /// Fields that disappeared are sent as `null` so the server drops them.
    pub async fn patch_object(&mut self) -> Result<(), Error> {
        let namespace = self.namespace();
        let name = self.name();

        if self.pool.status != self.original.status {
            debug!(pool = %name, "patching status");
            let patch = json!({
                "status": merge_patch(
                    &serde_json::to_value(&self.original.status)?,
                    &serde_json::to_value(&self.pool.status)?,
                ),
            });
            self.kube
                .patch_pool_status(&namespace, &name, &patch)
                .await?;
            self.original.status = self.pool.status.clone();
        }

        let original = metadata_and_spec(&self.original)?;
        let modified = metadata_and_spec(&self.pool)?;
        if original != modified {
            debug!(pool = %name, "patching metadata and spec");
            let patch = merge_patch(&original, &modified);
            self.kube.patch_pool(&namespace, &name, &patch).await?;
            self.original.metadata = self.pool.metadata.clone();
            self.original.spec = self.pool.spec.clone();
        }
        Ok(())
    }

    /// Summarize Ready and persist everything
    pub async fn close(mut self) -> Result<(), Error> {
        conditions::set_summary(self.conditions_mut(), &SUMMARY_CONDITIONS);
        let ready = conditions::is_true(self.conditions(), conditions::READY_CONDITION);
        info!(pool = %self.name(), ready, "closing pool scope");
        self.patch_object().await
    }
}

/// The parts of the pool this controller writes outside of status
fn metadata_and_spec(pool: &AwsMachinePool) -> Result<Value, Error> {
    Ok(json!({
        "metadata": {
            "finalizers": pool.metadata.finalizers.clone().unwrap_or_default(),
            "annotations": pool.metadata.annotations.clone().unwrap_or_default(),
        },
        "spec": serde_json::to_value(&pool.spec)?,
    }))
}

/// JSON merge patch (RFC 7386) that turns `original` into `modified`
///
/// Objects are diffed key by key; anything else, arrays included, is
/// replaced whole.
pub(crate) fn merge_patch(original: &Value, modified: &Value) -> Value {
    let (Value::Object(original), Value::Object(modified)) = (original, modified) else {
        return modified.clone();
    };

    let mut patch = Map::new();
    for key in original.keys() {
        if !modified.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    for (key, value) in modified {
        match original.get(key) {
            Some(old) if old == value => {}
            Some(old) => {
                patch.insert(key.clone(), merge_patch(old, value));
            }
            None => {
                patch.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(patch)
}
