//! Resolve the objects a pool reconcile depends on
//!
//! AWSMachinePool → owning MachinePool → Cluster (by label) → AWSCluster or
//! AWSManagedControlPlane. Any missing link means "not yet": the resolver
//! returns `Ok(None)` and the driver waits for the next event.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::KubeClient;
use crate::crd::{AwsMachinePool, Cluster, MachinePool, MANAGED_CONTROL_PLANE_KIND};
use crate::scope::InfraClusterScope;
use crate::{Error, CAPI_GROUP, CLUSTER_NAME_LABEL};

/// Everything a reconcile pass needs beyond the pool itself
#[derive(Clone, Debug)]
pub struct ResolvedScope {
    /// Owning CAPI MachinePool
    pub machine_pool: MachinePool,
    /// CAPI Cluster the pool belongs to
    pub cluster: Cluster,
    /// Infrastructure cluster
    pub infra: InfraClusterScope,
}

/// Split an apiVersion into (group, version)
///
/// `"v1"` is the core group. More than one `/` is malformed.
pub fn parse_group_version(api_version: &str) -> Result<(&str, &str), Error> {
    match api_version.split_once('/') {
        None => Ok(("", api_version)),
        Some((group, version)) if !version.contains('/') => Ok((group, version)),
        Some(_) => Err(Error::validation(format!(
            "unexpected GroupVersion string: {api_version}"
        ))),
    }
}

/// The CAPI MachinePool named in `meta`'s owner references
pub async fn owner_machine_pool(
    kube: &dyn KubeClient,
    meta: &ObjectMeta,
) -> Result<Option<MachinePool>, Error> {
    let pool_name = meta.name.clone().unwrap_or_default();
    let namespace = meta.namespace.clone().unwrap_or_default();

    for owner in meta.owner_references.iter().flatten() {
        if owner.kind != "MachinePool" {
            continue;
        }
        let (group, _) = parse_group_version(&owner.api_version).map_err(|e| {
            Error::validation_for_field(&pool_name, "metadata.ownerReferences", e.to_string())
        })?;
        if group == CAPI_GROUP {
            return kube.get_machine_pool(&namespace, &owner.name).await;
        }
    }
    Ok(None)
}

/// The CAPI Cluster named by the cluster-name label
pub async fn cluster_from_metadata(
    kube: &dyn KubeClient,
    meta: &ObjectMeta,
) -> Result<Option<Cluster>, Error> {
    let Some(name) = meta
        .labels
        .as_ref()
        .and_then(|labels| labels.get(CLUSTER_NAME_LABEL))
    else {
        return Ok(None);
    };
    let namespace = meta.namespace.clone().unwrap_or_default();
    kube.get_cluster(&namespace, name).await
}

/// The infrastructure cluster backing `cluster`
pub async fn infra_cluster(
    kube: &dyn KubeClient,
    cluster: &Cluster,
    namespace: &str,
) -> Result<Option<InfraClusterScope>, Error> {
    if let Some(cp) = cluster
        .spec
        .control_plane_ref
        .as_ref()
        .filter(|cp| cp.kind == MANAGED_CONTROL_PLANE_KIND)
    {
        let control_plane = kube.get_managed_control_plane(namespace, &cp.name).await?;
        return Ok(control_plane.map(|control_plane| InfraClusterScope::ManagedControlPlane {
            cluster: Box::new(cluster.clone()),
            control_plane: Box::new(control_plane),
        }));
    }

    let Some(infra_ref) = cluster.spec.infrastructure_ref.as_ref() else {
        return Ok(None);
    };
    let aws_cluster = kube.get_aws_cluster(namespace, &infra_ref.name).await?;
    Ok(aws_cluster.map(|aws_cluster| InfraClusterScope::Cluster {
        cluster: Box::new(cluster.clone()),
        aws_cluster: Box::new(aws_cluster),
    }))
}

/// Resolve MachinePool, Cluster and infrastructure cluster for `pool`
pub async fn resolve(
    kube: &dyn KubeClient,
    pool: &AwsMachinePool,
) -> Result<Option<ResolvedScope>, Error> {
    let Some(machine_pool) = owner_machine_pool(kube, &pool.metadata).await? else {
        info!("MachinePool controller has not yet set OwnerRef");
        return Ok(None);
    };

    let Some(cluster) = cluster_from_metadata(kube, &machine_pool.metadata).await? else {
        info!(machine_pool = %machine_pool.name_any(), "MachinePool is missing cluster label or cluster does not exist");
        return Ok(None);
    };

    let namespace = pool.namespace().unwrap_or_default();
    let Some(infra) = infra_cluster(kube, &cluster, &namespace).await? else {
        info!(cluster = %cluster.name_any(), "AWSCluster or AWSManagedControlPlane is not ready yet");
        return Ok(None);
    };

    debug!(cluster = %cluster.name_any(), kind = infra.kind(), "resolved infrastructure cluster");
    Ok(Some(ResolvedScope {
        machine_pool,
        cluster,
        infra,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockKubeClient;
    use crate::crd::{
        AwsCluster, AwsClusterSpec, AwsMachinePoolSpec, AwsManagedControlPlane,
        AwsManagedControlPlaneSpec, ClusterSpec, MachinePoolSpec, ObjectReference,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn owner(api_version: &str, kind: &str, name: &str) -> OwnerReference {
        OwnerReference {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: "uid".to_string(),
            ..Default::default()
        }
    }

    fn pool_owned_by(owners: Vec<OwnerReference>) -> AwsMachinePool {
        let mut pool = AwsMachinePool::new("workers", AwsMachinePoolSpec::default());
        pool.metadata.namespace = Some("default".to_string());
        pool.metadata.owner_references = Some(owners);
        pool
    }

    fn machine_pool() -> MachinePool {
        let mut mp = MachinePool::new(
            "workers",
            MachinePoolSpec {
                cluster_name: "prod".to_string(),
                ..Default::default()
            },
        );
        mp.metadata.namespace = Some("default".to_string());
        mp.metadata.labels = Some(BTreeMap::from([(
            CLUSTER_NAME_LABEL.to_string(),
            "prod".to_string(),
        )]));
        mp
    }

    fn cluster(control_plane_kind: &str) -> Cluster {
        let mut cluster = Cluster::new(
            "prod",
            ClusterSpec {
                control_plane_ref: Some(ObjectReference {
                    kind: control_plane_kind.to_string(),
                    name: "prod-cp".to_string(),
                    ..Default::default()
                }),
                infrastructure_ref: Some(ObjectReference {
                    kind: "AWSCluster".to_string(),
                    name: "prod-infra".to_string(),
                    ..Default::default()
                }),
            },
        );
        cluster.metadata.namespace = Some("default".to_string());
        cluster
    }

    #[rstest]
    #[case("cluster.x-k8s.io/v1beta1", ("cluster.x-k8s.io", "v1beta1"))]
    #[case("v1", ("", "v1"))]
    #[case("", ("", ""))]
    fn parses_group_versions(#[case] raw: &str, #[case] expected: (&str, &str)) {
        assert_eq!(parse_group_version(raw).unwrap(), expected);
    }

    #[test]
    fn rejects_extra_slashes() {
        assert!(parse_group_version("a/b/c").is_err());
    }

    /// Story: a freshly created pool has no owner yet, so the pass defers
    /// without touching the API.
    #[tokio::test]
    async fn story_pool_without_owner_defers() {
        let kube = MockKubeClient::new();
        let pool = pool_owned_by(vec![]);
        assert!(resolve(&kube, &pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn owner_from_another_group_is_ignored() {
        let kube = MockKubeClient::new();
        let pool = pool_owned_by(vec![owner("example.com/v1", "MachinePool", "workers")]);
        assert!(owner_machine_pool(&kube, &pool.metadata)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn malformed_owner_api_version_is_fatal() {
        let kube = MockKubeClient::new();
        let pool = pool_owned_by(vec![owner("a/b/c", "MachinePool", "workers")]);
        let err = owner_machine_pool(&kube, &pool.metadata).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_cluster_label_defers() {
        let kube = MockKubeClient::new();
        let mut mp = machine_pool();
        mp.metadata.labels = None;
        assert!(cluster_from_metadata(&kube, &mp.metadata)
            .await
            .unwrap()
            .is_none());
    }

    /// Story: a self-managed cluster resolves through its AWSCluster.
    #[tokio::test]
    async fn story_self_managed_cluster_resolves() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_machine_pool()
            .withf(|ns, name| ns == "default" && name == "workers")
            .returning(|_, _| Ok(Some(machine_pool())));
        kube.expect_get_cluster()
            .withf(|_, name| name == "prod")
            .returning(|_, _| Ok(Some(cluster("KubeadmControlPlane"))));
        kube.expect_get_aws_cluster()
            .withf(|_, name| name == "prod-infra")
            .returning(|_, _| {
                Ok(Some(AwsCluster::new(
                    "prod-infra",
                    AwsClusterSpec {
                        region: "us-east-1".to_string(),
                        ..Default::default()
                    },
                )))
            });

        let pool = pool_owned_by(vec![owner("cluster.x-k8s.io/v1beta1", "MachinePool", "workers")]);
        let resolved = resolve(&kube, &pool).await.unwrap().unwrap();
        assert!(matches!(resolved.infra, InfraClusterScope::Cluster { .. }));
        assert_eq!(resolved.infra.region(), "us-east-1");
        assert_eq!(resolved.machine_pool.spec.cluster_name, "prod");
    }

    /// Story: an EKS cluster resolves through its managed control plane.
    #[tokio::test]
    async fn story_managed_control_plane_resolves() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_managed_control_plane()
            .withf(|_, name| name == "prod-cp")
            .returning(|_, _| {
                Ok(Some(AwsManagedControlPlane::new(
                    "prod-cp",
                    AwsManagedControlPlaneSpec::default(),
                )))
            });

        let infra = infra_cluster(&kube, &cluster(MANAGED_CONTROL_PLANE_KIND), "default")
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            infra,
            InfraClusterScope::ManagedControlPlane { .. }
        ));
    }

    #[tokio::test]
    async fn missing_aws_cluster_defers() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_aws_cluster().returning(|_, _| Ok(None));
        assert!(infra_cluster(&kube, &cluster("KubeadmControlPlane"), "default")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn lookup_errors_propagate() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_aws_cluster()
            .returning(|_, _| Err(Error::internal("apiserver unavailable")));
        assert!(infra_cluster(&kube, &cluster("KubeadmControlPlane"), "default")
            .await
            .is_err());
    }
}
