//! CRD generation
//!
//! The manifests rendered here are what gets applied to a management
//! cluster, so their group, names and schema shape are part of the API.

use kube::CustomResourceExt;

use machinepool_controller::crd::{crd_yaml, AwsMachine, AwsMachinePool};

#[test]
fn machine_pool_crd_identity() {
    let crd = AwsMachinePool::crd();
    assert_eq!(
        crd.metadata.name.as_deref(),
        Some("awsmachinepools.infrastructure.cluster.x-k8s.io")
    );
    assert_eq!(crd.spec.group, "infrastructure.cluster.x-k8s.io");
    assert_eq!(crd.spec.names.kind, "AWSMachinePool");
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.versions[0].name, "v1beta2");
}

#[test]
fn machine_pool_crd_has_status_subresource() {
    let crd = AwsMachinePool::crd();
    let version = &crd.spec.versions[0];
    assert!(version
        .subresources
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .is_some());
}

#[test]
fn machine_pool_schema_uses_capi_field_names() {
    let crd = serde_json::to_value(AwsMachinePool::crd()).unwrap();
    let spec = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"]
        ["properties"];
    for field in ["providerID", "providerIDList", "minSize", "maxSize", "awsLaunchTemplate"] {
        assert!(spec.get(field).is_some(), "missing spec field {field}");
    }
    let status = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]
        ["status"]["properties"];
    for field in ["ready", "replicas", "launchTemplateID", "asgStatus", "conditions"] {
        assert!(status.get(field).is_some(), "missing status field {field}");
    }
    assert_eq!(status["asgStatus"]["type"], "string");
}

#[test]
fn machine_crd_identity() {
    let crd = AwsMachine::crd();
    assert_eq!(
        crd.metadata.name.as_deref(),
        Some("awsmachines.infrastructure.cluster.x-k8s.io")
    );
    assert_eq!(crd.spec.names.kind, "AWSMachine");
}

#[test]
fn yaml_stream_holds_both_crds() {
    let yaml = crd_yaml().unwrap();
    let docs: Vec<serde_yaml::Value> = yaml
        .split("---\n")
        .filter(|doc| !doc.trim().is_empty())
        .map(|doc| serde_yaml::from_str(doc).unwrap())
        .collect();
    assert_eq!(docs.len(), 2);
    assert!(docs
        .iter()
        .all(|doc| doc["kind"] == serde_yaml::Value::from("CustomResourceDefinition")));
}
