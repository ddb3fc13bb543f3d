//! Autoscaling group convergence
//!
//! Builds the desired group from the pool and its MachinePool, compares it
//! with what AWS reports, and issues create or update calls only when they
//! would change something.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::cloud::{AsgService, AsgSpec, AutoScalingGroup, LaunchTemplateUpdatePolicy};
use crate::crd::{MixedInstancesPolicy, RefreshPreferences};
use crate::processes::reconcile_processes;
use crate::scope::PoolScope;
use crate::Error;

/// One field where the desired group differs from the observed one
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDiff {
    /// Field name
    pub field: &'static str,
    /// Desired value
    pub desired: String,
    /// Observed value
    pub observed: String,
}

impl FieldDiff {
    fn new(field: &'static str, desired: impl fmt::Debug, observed: impl fmt::Debug) -> Self {
        Self {
            field,
            desired: format!("{desired:?}"),
            observed: format!("{observed:?}"),
        }
    }
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.observed, self.desired)
    }
}

/// Look up the pool's group; `None` when it does not exist
pub async fn find_asg(asg: &dyn AsgService, name: &str) -> Result<Option<AutoScalingGroup>, Error> {
    asg.get_asg_by_name(name).await
}

/// The group the pool asks for
///
/// Desired capacity is left unset when an external autoscaler owns it.
pub fn desired_asg(scope: &PoolScope) -> AsgSpec {
    let spec = &scope.pool.spec;
    AsgSpec {
        name: scope.name(),
        desired_capacity: if scope.replicas_externally_managed() {
            None
        } else {
            scope.desired_replicas()
        },
        min_size: spec.min_size,
        max_size: spec.max_size,
        subnets: spec.subnets.clone(),
        availability_zones: spec.availability_zones.clone(),
        mixed_instances_policy: spec.mixed_instances_policy.clone(),
        capacity_rebalance: spec.capacity_rebalance,
        launch_template_id: scope.launch_template_id(),
        launch_template_version: scope.launch_template_version(),
        tags: scope.additional_tags(),
        suspended_processes: spec
            .suspend_processes
            .as_ref()
            .map(|s| s.process_names())
            .unwrap_or_default(),
    }
}

/// Fields of the pool that differ from the observed group
///
/// Replicas only count when the MachinePool owns them. An unset instance
/// distribution matches whatever AWS defaulted it to.
pub fn diff_asg(scope: &PoolScope, existing: &AutoScalingGroup) -> Vec<FieldDiff> {
    let spec = &scope.pool.spec;
    let mut diffs = Vec::new();

    if !scope.replicas_externally_managed() && scope.desired_replicas() != existing.desired_capacity
    {
        diffs.push(FieldDiff::new(
            "replicas",
            scope.desired_replicas(),
            existing.desired_capacity,
        ));
    }
    if spec.min_size != existing.min_size {
        diffs.push(FieldDiff::new("minSize", spec.min_size, existing.min_size));
    }
    if spec.max_size != existing.max_size {
        diffs.push(FieldDiff::new("maxSize", spec.max_size, existing.max_size));
    }
    if spec.capacity_rebalance != existing.capacity_rebalance {
        diffs.push(FieldDiff::new(
            "capacityRebalance",
            spec.capacity_rebalance,
            existing.capacity_rebalance,
        ));
    }

    let desired_policy = with_observed_distribution(
        spec.mixed_instances_policy.as_ref(),
        existing.mixed_instances_policy.as_ref(),
    );
    if desired_policy.as_ref() != existing.mixed_instances_policy.as_ref() {
        diffs.push(FieldDiff::new(
            "mixedInstancesPolicy",
            desired_policy,
            &existing.mixed_instances_policy,
        ));
    }

    diffs
}

fn with_observed_distribution(
    desired: Option<&MixedInstancesPolicy>,
    observed: Option<&MixedInstancesPolicy>,
) -> Option<MixedInstancesPolicy> {
    let mut policy = desired?.clone();
    if policy.instances_distribution.is_none() {
        policy.instances_distribution = observed.and_then(|o| o.instances_distribution.clone());
    }
    Some(policy)
}

/// Order-insensitive subnet comparison
pub fn subnets_differ(desired: &[String], observed: &[String]) -> bool {
    let desired: BTreeSet<&String> = desired.iter().collect();
    let observed: BTreeSet<&String> = observed.iter().collect();
    desired != observed
}

/// Launch template policy that rolls the group after a template change
pub struct InstanceRefreshPolicy {
    asg: Arc<dyn AsgService>,
    asg_name: String,
    asg_exists: bool,
    preferences: Option<RefreshPreferences>,
}

impl InstanceRefreshPolicy {
    /// Policy for the pool's group; `asg_exists` is false before creation
    pub fn new(asg: Arc<dyn AsgService>, scope: &PoolScope, asg_exists: bool) -> Self {
        Self {
            asg,
            asg_name: scope.name(),
            asg_exists,
            preferences: scope.pool.spec.refresh_preferences.clone(),
        }
    }

    fn refresh_disabled(&self) -> bool {
        self.preferences.as_ref().is_some_and(|p| p.disable)
    }
}

#[async_trait]
impl LaunchTemplateUpdatePolicy for InstanceRefreshPolicy {
    /// Only one refresh can run at a time. A template changed while one is
    /// running would never be rolled out, so wait until it finishes. Before
    /// the group exists a broken template may be what blocks its creation,
    /// so updating is always allowed then.
    async fn can_update(&self) -> Result<bool, Error> {
        if !self.asg_exists {
            return Ok(true);
        }
        self.asg.can_start_instance_refresh(&self.asg_name).await
    }

    // If this fails, or the controller stops before it runs, a later pass
    // whose template diff is user data only will not start the refresh.
    async fn after_update(&self) -> Result<(), Error> {
        if !self.asg_exists {
            debug!(asg = %self.asg_name, "ASG does not exist yet, skipping instance refresh");
            return Ok(());
        }
        if self.refresh_disabled() {
            debug!(asg = %self.asg_name, "instance refresh disabled, skipping instance refresh");
            return Ok(());
        }
        info!(asg = %self.asg_name, "starting instance refresh");
        let preferences = self.preferences.clone().unwrap_or_default();
        self.asg
            .start_instance_refresh(&self.asg_name, &preferences)
            .await
    }
}

/// Create the pool's group
pub async fn create_asg(asg: &dyn AsgService, scope: &PoolScope) -> Result<AutoScalingGroup, Error> {
    let mut spec = desired_asg(scope);
    spec.desired_capacity = scope.desired_replicas();
    info!(asg = %spec.name, "creating autoscaling group");
    asg.create_asg(&spec).await
}

/// Update the group if it drifted, then reconcile suspended processes
pub async fn update_asg(
    asg: &dyn AsgService,
    scope: &PoolScope,
    existing: &AutoScalingGroup,
) -> Result<(), Error> {
    let spec = desired_asg(scope);

    let subnet_ids = asg
        .subnet_ids(&spec.subnets, &spec.availability_zones)
        .await?;
    let subnet_drift = subnets_differ(&subnet_ids, &existing.subnets);
    if subnet_drift {
        debug!(asg = %spec.name, desired = ?subnet_ids, observed = ?existing.subnets, "asg subnet diff detected");
    }

    let diffs = diff_asg(scope, existing);
    for diff in &diffs {
        debug!(asg = %spec.name, %diff, "asg diff detected");
    }

    if !diffs.is_empty() || subnet_drift {
        info!(asg = %spec.name, "updating autoscaling group");
        asg.update_asg(&spec).await?;
    }

    reconcile_processes(
        asg,
        &existing.name,
        &existing.currently_suspended_processes,
        &spec.suspended_processes,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MockAsgService;
    use crate::controller::MockKubeClient;
    use crate::crd::{
        AwsCluster, AwsClusterSpec, AwsMachinePool, AwsMachinePoolSpec, Cluster, ClusterSpec,
        InstancesDistribution, MachinePool, MachinePoolSpec, Override, Processes,
        SuspendProcessesTypes,
    };
    use crate::scope::{InfraClusterScope, ResolvedScope};
    use crate::REPLICAS_MANAGED_BY_ANNOTATION;
    use kube::ResourceExt;
    use rstest::rstest;

    fn scope_with(spec: AwsMachinePoolSpec, replicas: Option<i32>) -> PoolScope {
        let mut pool = AwsMachinePool::new("workers", spec);
        pool.metadata.namespace = Some("default".to_string());
        let cluster = Cluster::new("prod", ClusterSpec::default());
        let resolved = ResolvedScope {
            machine_pool: MachinePool::new(
                "workers",
                MachinePoolSpec {
                    cluster_name: "prod".to_string(),
                    replicas,
                    ..Default::default()
                },
            ),
            cluster: cluster.clone(),
            infra: InfraClusterScope::Cluster {
                cluster: Box::new(cluster),
                aws_cluster: Box::new(AwsCluster::new("prod", AwsClusterSpec::default())),
            },
        };
        PoolScope::new(pool, resolved, Arc::new(MockKubeClient::new()))
    }

    fn base_spec() -> AwsMachinePoolSpec {
        AwsMachinePoolSpec {
            min_size: 1,
            max_size: 5,
            ..Default::default()
        }
    }

    fn matching_asg() -> AutoScalingGroup {
        AutoScalingGroup {
            id: "arn:aws:autoscaling:us-east-1:123:autoScalingGroup:workers".to_string(),
            name: "workers".to_string(),
            desired_capacity: Some(3),
            min_size: 1,
            max_size: 5,
            subnets: vec!["subnet-a".to_string(), "subnet-b".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn in_sync_group_has_no_diff() {
        let scope = scope_with(base_spec(), Some(3));
        assert!(diff_asg(&scope, &matching_asg()).is_empty());
    }

    #[rstest]
    #[case::min_size(AwsMachinePoolSpec { min_size: 2, ..base_spec() }, "minSize")]
    #[case::max_size(AwsMachinePoolSpec { max_size: 9, ..base_spec() }, "maxSize")]
    #[case::rebalance(AwsMachinePoolSpec { capacity_rebalance: true, ..base_spec() }, "capacityRebalance")]
    fn size_drift_is_detected(#[case] spec: AwsMachinePoolSpec, #[case] field: &str) {
        let scope = scope_with(spec, Some(3));
        let diffs = diff_asg(&scope, &matching_asg());
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].field, field);
    }

    #[test]
    fn replica_drift_is_detected() {
        let scope = scope_with(base_spec(), Some(4));
        let diffs = diff_asg(&scope, &matching_asg());
        assert_eq!(diffs[0].field, "replicas");
        assert_eq!(diffs[0].to_string(), "replicas: Some(3) -> Some(4)");
    }

    #[test]
    fn externally_managed_replicas_are_ignored() {
        let mut scope = scope_with(base_spec(), Some(4));
        scope
            .machine_pool
            .annotations_mut()
            .insert(REPLICAS_MANAGED_BY_ANNOTATION.to_string(), String::new());
        assert!(diff_asg(&scope, &matching_asg()).is_empty());
        assert_eq!(desired_asg(&scope).desired_capacity, None);
    }

    #[test]
    fn unset_instance_distribution_matches_aws_default() {
        let overrides = vec![Override {
            instance_type: "m5.large".to_string(),
        }];
        let scope = scope_with(
            AwsMachinePoolSpec {
                mixed_instances_policy: Some(MixedInstancesPolicy {
                    instances_distribution: None,
                    overrides: overrides.clone(),
                }),
                ..base_spec()
            },
            Some(3),
        );
        let existing = AutoScalingGroup {
            mixed_instances_policy: Some(MixedInstancesPolicy {
                instances_distribution: Some(InstancesDistribution {
                    on_demand_allocation_strategy: Some("prioritized".to_string()),
                    on_demand_base_capacity: Some(0),
                    ..Default::default()
                }),
                overrides,
            }),
            ..matching_asg()
        };
        assert!(diff_asg(&scope, &existing).is_empty());
    }

    #[test]
    fn changed_overrides_are_detected() {
        let scope = scope_with(
            AwsMachinePoolSpec {
                mixed_instances_policy: Some(MixedInstancesPolicy {
                    instances_distribution: None,
                    overrides: vec![Override {
                        instance_type: "m6i.large".to_string(),
                    }],
                }),
                ..base_spec()
            },
            Some(3),
        );
        let diffs = diff_asg(&scope, &matching_asg());
        assert_eq!(diffs[0].field, "mixedInstancesPolicy");
    }

    #[rstest]
    #[case(&["a", "b"], &["b", "a"], false)]
    #[case(&["a"], &["a", "b"], true)]
    #[case(&[], &[], false)]
    fn subnet_comparison_ignores_order(
        #[case] desired: &[&str],
        #[case] observed: &[&str],
        #[case] differ: bool,
    ) {
        let desired: Vec<String> = desired.iter().map(|s| s.to_string()).collect();
        let observed: Vec<String> = observed.iter().map(|s| s.to_string()).collect();
        assert_eq!(subnets_differ(&desired, &observed), differ);
    }

    /// Story: nothing drifted, so the update pass makes no mutating calls.
    #[tokio::test]
    async fn story_in_sync_group_is_left_alone() {
        let mut asg = MockAsgService::new();
        asg.expect_subnet_ids()
            .returning(|_, _| Ok(vec!["subnet-b".to_string(), "subnet-a".to_string()]));
        asg.expect_update_asg().never();
        asg.expect_suspend_processes().never();
        asg.expect_resume_processes().never();

        let scope = scope_with(base_spec(), Some(3));
        update_asg(&asg, &scope, &matching_asg()).await.unwrap();
    }

    #[tokio::test]
    async fn subnet_drift_triggers_update() {
        let mut asg = MockAsgService::new();
        asg.expect_subnet_ids()
            .returning(|_, _| Ok(vec!["subnet-c".to_string()]));
        asg.expect_update_asg().times(1).returning(|_| Ok(()));

        let scope = scope_with(base_spec(), Some(3));
        update_asg(&asg, &scope, &matching_asg()).await.unwrap();
    }

    #[tokio::test]
    async fn suspended_processes_follow_the_spec() {
        let mut asg = MockAsgService::new();
        asg.expect_subnet_ids()
            .returning(|_, _| Ok(vec!["subnet-a".to_string(), "subnet-b".to_string()]));
        asg.expect_suspend_processes()
            .withf(|name, processes| name == "workers" && processes == ["Launch".to_string()])
            .times(1)
            .returning(|_, _| Ok(()));

        let scope = scope_with(
            AwsMachinePoolSpec {
                suspend_processes: Some(SuspendProcessesTypes {
                    all: false,
                    processes: Some(Processes {
                        launch: Some(true),
                        ..Default::default()
                    }),
                }),
                ..base_spec()
            },
            Some(3),
        );
        update_asg(&asg, &scope, &matching_asg()).await.unwrap();
    }

    #[tokio::test]
    async fn create_uses_machine_pool_replicas() {
        let mut asg = MockAsgService::new();
        asg.expect_create_asg()
            .withf(|spec| spec.name == "workers" && spec.desired_capacity == Some(2))
            .times(1)
            .returning(|_| Ok(AutoScalingGroup::default()));

        let scope = scope_with(base_spec(), Some(2));
        create_asg(&asg, &scope).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_policy_allows_update_before_creation() {
        let asg = MockAsgService::new();
        let scope = scope_with(base_spec(), Some(3));
        let policy = InstanceRefreshPolicy::new(Arc::new(asg), &scope, false);
        assert!(policy.can_update().await.unwrap());
        policy.after_update().await.unwrap();
    }

    #[tokio::test]
    async fn refresh_policy_waits_for_running_refresh() {
        let mut asg = MockAsgService::new();
        asg.expect_can_start_instance_refresh()
            .returning(|_| Ok(false));
        let scope = scope_with(base_spec(), Some(3));
        let policy = InstanceRefreshPolicy::new(Arc::new(asg), &scope, true);
        assert!(!policy.can_update().await.unwrap());
    }

    /// Story: a new template version rolls the group unless refresh is disabled.
    #[tokio::test]
    async fn story_template_change_starts_refresh() {
        let mut asg = MockAsgService::new();
        asg.expect_start_instance_refresh()
            .withf(|name, _| name == "workers")
            .times(1)
            .returning(|_, _| Ok(()));
        let scope = scope_with(base_spec(), Some(3));
        InstanceRefreshPolicy::new(Arc::new(asg), &scope, true)
            .after_update()
            .await
            .unwrap();

        let mut asg = MockAsgService::new();
        asg.expect_start_instance_refresh().never();
        let scope = scope_with(
            AwsMachinePoolSpec {
                refresh_preferences: Some(RefreshPreferences {
                    disable: true,
                    ..Default::default()
                }),
                ..base_spec()
            },
            Some(3),
        );
        InstanceRefreshPolicy::new(Arc::new(asg), &scope, true)
            .after_update()
            .await
            .unwrap();
    }
}
