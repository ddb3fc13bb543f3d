//! Cluster API core types (`cluster.x-k8s.io/v1beta1`)
//!
//! Only the fields the pool controller reads or patches are modelled.
//! Unknown fields are ignored on deserialization, and every write goes
//! through a merge patch, so the rest of the object is never clobbered.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Typed reference to another object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent (e.g. "infrastructure.cluster.x-k8s.io/v1beta2")
    #[serde(default)]
    pub api_version: String,
    /// Kind of the referent
    #[serde(default)]
    pub kind: String,
    /// Name of the referent
    #[serde(default)]
    pub name: String,
    /// Namespace of the referent, defaults to the referrer's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectReference {
    /// API group of the referent, empty for the core group
    pub fn group(&self) -> &str {
        match self.api_version.split_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }
}

/// CAPI MachinePool: the provider-independent half of a node pool
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachinePool",
    plural = "machinepools",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolSpec {
    /// Name of the owning Cluster
    pub cluster_name: String,

    /// Desired number of instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Template for pool members
    #[serde(default)]
    pub template: MachineTemplateSpec,
}

/// Machine template of a MachinePool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct MachineTemplateSpec {
    /// Member machine spec
    #[serde(default)]
    pub spec: MachineTemplateMachineSpec,
}

/// The subset of the member machine spec the controller needs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateMachineSpec {
    /// Bootstrap configuration
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Reference to the infrastructure pool (the AWSMachinePool)
    #[serde(default)]
    pub infrastructure_ref: ObjectReference,
}

/// Bootstrap data source
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Secret holding the rendered bootstrap data, set once the bootstrap
    /// provider has produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

impl MachinePool {
    /// Whether the bootstrap data secret has been published
    pub fn has_bootstrap_data(&self) -> bool {
        self.spec.template.spec.bootstrap.data_secret_name.is_some()
    }
}

/// CAPI Cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    plural = "clusters",
    namespaced,
    status = "ClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Control plane provider object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ObjectReference>,

    /// Infrastructure provider object (e.g. AWSCluster)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

/// CAPI Cluster status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// The infrastructure provider reports the cluster infrastructure ready
    #[serde(default)]
    pub infrastructure_ready: bool,
}

impl Cluster {
    /// Whether the cluster infrastructure is ready
    pub fn infrastructure_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|status| status.infrastructure_ready)
    }
}

/// CAPI Machine, one per pool member
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    plural = "machines",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the owning Cluster
    #[serde(default)]
    pub cluster_name: String,

    /// ProviderID of the backing instance
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}
