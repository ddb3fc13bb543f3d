//! Controller wiring
//!
//! Watches AWSMachinePools, plus MachinePools mapped back to the pool named
//! in their infrastructure reference, and drives [`reconcile`] until a
//! shutdown signal arrives.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::Controller;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::info;

use crate::cloud::CloudServices;
use crate::config::ControllerConfig;
use crate::controller::{error_policy, reconcile, Context};
use crate::crd::{AwsMachinePool, MachinePool};
use crate::scope::resolver::parse_group_version;
use crate::WATCH_FILTER_LABEL;

/// Server-side watch timeout, below the default client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// The AWSMachinePool a MachinePool points at, if any
pub fn machine_pool_to_infrastructure(machine_pool: MachinePool) -> Option<ObjectRef<AwsMachinePool>> {
    let infra_ref = &machine_pool.spec.template.spec.infrastructure_ref;
    if infra_ref.kind != <AwsMachinePool as Resource>::kind(&()) || infra_ref.name.is_empty() {
        return None;
    }
    let (group, _) = parse_group_version(&infra_ref.api_version).ok()?;
    if group != <AwsMachinePool as Resource>::group(&()) {
        return None;
    }

    let namespace = infra_ref
        .namespace
        .clone()
        .or_else(|| machine_pool.namespace())?;
    Some(ObjectRef::new(&infra_ref.name).within(&namespace))
}

fn watcher_config(config: &ControllerConfig) -> WatcherConfig {
    let watcher = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    match &config.watch_filter_value {
        Some(value) => watcher.labels(&format!("{WATCH_FILTER_LABEL}={value}")),
        None => watcher,
    }
}

/// The pool controller as a future that completes on shutdown
pub fn build_controller(client: Client, ctx: Arc<Context>) -> impl Future<Output = ()> {
    let pools: Api<AwsMachinePool> = Api::all(client.clone());
    let machine_pools: Api<MachinePool> = Api::all(client);

    Controller::new(pools, watcher_config(&ctx.config))
        .watches(
            machine_pools,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            machine_pool_to_infrastructure,
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result)
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    result: Result<T, E>,
) -> std::future::Ready<()> {
    match result {
        Ok(reconciled) => tracing::debug!(?reconciled, "AWSMachinePool reconciliation completed"),
        Err(e) => tracing::error!(error = ?e, "AWSMachinePool reconciliation error"),
    }
    std::future::ready(())
}

/// Run the controller until shutdown
pub async fn run(client: Client, config: ControllerConfig, cloud: Arc<dyn CloudServices>) {
    info!(controller = %config.controller_name, watch_filter = ?config.watch_filter_value, "starting AWSMachinePool controller");
    let ctx = Arc::new(Context::builder(client.clone(), cloud).config(config).build());
    build_controller(client, ctx).await;
    info!("AWSMachinePool controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{MachinePoolSpec, ObjectReference};

    fn machine_pool(infrastructure_ref: ObjectReference) -> MachinePool {
        let mut mp = MachinePool::new("workers", MachinePoolSpec::default());
        mp.metadata.namespace = Some("default".to_string());
        mp.spec.template.spec.infrastructure_ref = infrastructure_ref;
        mp
    }

    fn infra_ref(api_version: &str, kind: &str) -> ObjectReference {
        ObjectReference {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: "workers-infra".to_string(),
            namespace: None,
        }
    }

    #[test]
    fn maps_to_referenced_pool() {
        let mp = machine_pool(infra_ref(
            "infrastructure.cluster.x-k8s.io/v1beta2",
            "AWSMachinePool",
        ));
        let target = machine_pool_to_infrastructure(mp).unwrap();
        assert_eq!(target.name, "workers-infra");
        assert_eq!(target.namespace.as_deref(), Some("default"));
    }

    #[test]
    fn other_versions_of_the_group_still_map() {
        let mp = machine_pool(infra_ref(
            "infrastructure.cluster.x-k8s.io/v1beta1",
            "AWSMachinePool",
        ));
        assert!(machine_pool_to_infrastructure(mp).is_some());
    }

    #[test]
    fn other_kinds_are_ignored() {
        let mp = machine_pool(infra_ref(
            "infrastructure.cluster.x-k8s.io/v1beta2",
            "AWSManagedMachinePool",
        ));
        assert!(machine_pool_to_infrastructure(mp).is_none());
    }

    #[test]
    fn other_groups_are_ignored() {
        let mp = machine_pool(infra_ref("example.com/v1", "AWSMachinePool"));
        assert!(machine_pool_to_infrastructure(mp).is_none());
    }

    #[test]
    fn watch_filter_becomes_label_selector() {
        let config = ControllerConfig {
            watch_filter_value: Some("team-a".to_string()),
            ..Default::default()
        };
        assert_eq!(
            watcher_config(&config).label_selector.as_deref(),
            Some("cluster.x-k8s.io/watch-filter=team-a")
        );
        assert!(watcher_config(&ControllerConfig::default())
            .label_selector
            .is_none());
    }
}
