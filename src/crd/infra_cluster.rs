//! Infrastructure cluster types the pool runs inside
//!
//! A pool belongs either to a self-managed AWSCluster or to an EKS
//! AWSManagedControlPlane. Both carry the region and the cluster-wide tags.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Control plane ref kind that selects the managed (EKS) scope
pub const MANAGED_CONTROL_PLANE_KIND: &str = "AWSManagedControlPlane";

/// Self-managed AWS cluster infrastructure
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "AWSCluster",
    root = "AwsCluster",
    plural = "awsclusters",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AwsClusterSpec {
    /// AWS region
    #[serde(default)]
    pub region: String,

    /// Tags applied to every resource the cluster owns
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: BTreeMap<String, String>,
}

/// EKS managed control plane
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "controlplane.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "AWSManagedControlPlane",
    root = "AwsManagedControlPlane",
    plural = "awsmanagedcontrolplanes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AwsManagedControlPlaneSpec {
    /// EKS cluster name, defaults to a name derived from the CAPI cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eks_cluster_name: Option<String>,

    /// AWS region
    #[serde(default)]
    pub region: String,

    /// Tags applied to every resource the cluster owns
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: BTreeMap<String, String>,
}
