//! Object store access for the pool controller
//!
//! Every Kubernetes read and write the reconciler makes goes through
//! [`KubeClient`], so tests can drive the whole reconcile with a mock.
//! Lookups return `Ok(None)` for missing objects and deletes treat 404 as
//! success.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{
    AwsCluster, AwsMachine, AwsMachinePool, AwsManagedControlPlane,
    Cluster, Machine, MachinePool,
};
use crate::Error;

/// Kubernetes operations the reconciler needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a CAPI MachinePool
    async fn get_machine_pool(&self, namespace: &str, name: &str)
        -> Result<Option<MachinePool>, Error>;

    /// Get a CAPI Cluster
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error>;

    /// Get an AWSCluster
    async fn get_aws_cluster(&self, namespace: &str, name: &str)
        -> Result<Option<AwsCluster>, Error>;

    /// Get an AWSManagedControlPlane
    async fn get_managed_control_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AwsManagedControlPlane>, Error>;

    /// Get a CAPI Machine
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, Error>;

    /// List AWSMachines matching every label in `labels`
    async fn list_aws_machines(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<AwsMachine>, Error>;

    /// Create an AWSMachine (name generated server side)
    async fn create_aws_machine(&self, machine: &AwsMachine) -> Result<AwsMachine, Error>;

    /// Delete a CAPI Machine
    async fn delete_machine(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Delete an AWSMachine
    async fn delete_aws_machine(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Merge-patch metadata and spec of an AWSMachinePool
    async fn patch_pool(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Merge-patch the status subresource of an AWSMachinePool
    async fn patch_pool_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Set `spec.replicas` on a CAPI MachinePool
    async fn patch_machine_pool_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error>;
}

/// [`KubeClient`] backed by kube-rs
pub struct KubeClientImpl {
    client: Client,
    field_manager: String,
}

impl KubeClientImpl {
    /// Writes are attributed to `field_manager`
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

/// Treat a 404 on delete as already deleted
fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_machine_pool(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MachinePool>, Error> {
        let api: Api<MachinePool> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_aws_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AwsCluster>, Error> {
        let api: Api<AwsCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_managed_control_plane(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AwsManagedControlPlane>, Error> {
        let api: Api<AwsManagedControlPlane> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, Error> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_aws_machines(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<AwsMachine>, Error> {
        let api: Api<AwsMachine> = Api::namespaced(self.client.clone(), namespace);
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let list = api.list(&ListParams::default().labels(&selector)).await?;
        Ok(list.items)
    }

    async fn create_aws_machine(&self, machine: &AwsMachine) -> Result<AwsMachine, Error> {
        let namespace = machine.metadata.namespace.as_deref().ok_or_else(|| {
            Error::internal_with_context("machine-sync", "AWSMachine has no namespace")
        })?;
        let api: Api<AwsMachine> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        Ok(api.create(&params, machine).await?)
    }

    async fn delete_machine(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        debug!(namespace, name, "deleting Machine");
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn delete_aws_machine(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<AwsMachine> = Api::namespaced(self.client.clone(), namespace);
        debug!(namespace, name, "deleting AWSMachine");
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn patch_pool(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let api: Api<AwsMachinePool> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &self.patch_params(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn patch_pool_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let api: Api<AwsMachinePool> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &self.patch_params(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn patch_machine_pool_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error> {
        let api: Api<MachinePool> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        api.patch(name, &self.patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
