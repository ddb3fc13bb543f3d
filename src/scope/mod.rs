//! Reconciliation scopes
//!
//! A reconcile pass runs against three resolved views: the infrastructure
//! cluster the pool lives in ([`InfraClusterScope`]), the pool itself with its
//! owning MachinePool and Cluster ([`PoolScope`]), and the cloud services
//! bound to the infrastructure cluster.

mod pool;
pub mod resolver;

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::Span;

use crate::crd::{AwsCluster, AwsManagedControlPlane, Cluster};

pub use pool::PoolScope;
pub use resolver::{resolve, ResolvedScope};

/// Tag key prefix marking resources owned by a cluster
pub const OWNED_TAG_PREFIX: &str = "sigs.k8s.io/cluster-api-provider-aws/cluster/";

/// The infrastructure cluster a pool belongs to
///
/// Closed set: a Cluster either uses an EKS managed control plane or a
/// self-managed AWSCluster.
#[derive(Clone, Debug)]
pub enum InfraClusterScope {
    /// EKS, selected by a control plane ref of kind AWSManagedControlPlane
    ManagedControlPlane {
        /// The CAPI cluster
        cluster: Box<Cluster>,
        /// Its managed control plane
        control_plane: Box<AwsManagedControlPlane>,
    },
    /// Self-managed, from the Cluster's infrastructure ref
    Cluster {
        /// The CAPI cluster
        cluster: Box<Cluster>,
        /// Its AWSCluster
        aws_cluster: Box<AwsCluster>,
    },
}

impl InfraClusterScope {
    fn cluster(&self) -> &Cluster {
        match self {
            Self::ManagedControlPlane { cluster, .. } | Self::Cluster { cluster, .. } => cluster,
        }
    }

    /// CAPI cluster name
    pub fn name(&self) -> String {
        self.cluster().name_any()
    }

    /// Namespace of the cluster objects
    pub fn namespace(&self) -> String {
        self.cluster().namespace().unwrap_or_default()
    }

    /// Name of the cluster as Kubernetes (and AWS tagging) knows it
    pub fn kubernetes_cluster_name(&self) -> String {
        match self {
            Self::ManagedControlPlane { control_plane, .. } => control_plane
                .spec
                .eks_cluster_name
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| self.name()),
            Self::Cluster { .. } => self.name(),
        }
    }

    /// AWS region
    pub fn region(&self) -> &str {
        match self {
            Self::ManagedControlPlane { control_plane, .. } => &control_plane.spec.region,
            Self::Cluster { aws_cluster, .. } => &aws_cluster.spec.region,
        }
    }

    /// Cluster-wide tags
    pub fn additional_tags(&self) -> &BTreeMap<String, String> {
        match self {
            Self::ManagedControlPlane { control_plane, .. } => &control_plane.spec.additional_tags,
            Self::Cluster { aws_cluster, .. } => &aws_cluster.spec.additional_tags,
        }
    }

    /// Tag key marking resources owned by this cluster
    pub fn owned_tag_key(&self) -> String {
        format!("{OWNED_TAG_PREFIX}{}", self.kubernetes_cluster_name())
    }

    /// Kind of the infrastructure object
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ManagedControlPlane { .. } => "AWSManagedControlPlane",
            Self::Cluster { .. } => "AWSCluster",
        }
    }

    /// Span carrying the cluster identity
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "infra_cluster",
            cluster = %self.name(),
            namespace = %self.namespace(),
            kind = self.kind(),
            region = self.region(),
        )
    }
}
