//! Kubernetes output tests
//!
//! These tests compile applications into a Kubernetes deployment and assert
//! on the manifests: defaults for namespace and replicas, property
//! flow-through, and the ConfigMap passthrough for addresses that resolve
//! outside the deployment.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use weave::plugins::{self, dockercompose, goproc, grpc, kubernetes, linuxcontainer, workflow};
use weave::wiring::{build_application, WiringSpec};
use weave::ApplicationNode;

/// One gRPC service in its own process and container, ready for a
/// deployment tier. `go mod tidy` is disabled so compiling does not shell
/// out.
fn containered_grpc_service(spec: &mut WiringSpec) -> String {
    let a = workflow::service(spec, "A", "EchoService", &[]);
    grpc::deploy(spec, &a);
    let proc_name = goproc::deploy(spec, "A");
    goproc::set_tidy(spec, &proc_name, false);
    linuxcontainer::deploy(spec, &proc_name)
}

fn compile(app: &ApplicationNode, out: &Path) {
    plugins::standard_registry().build_all(out, app).unwrap();
}

#[test]
fn unset_namespace_and_replicas_default_at_emission() {
    let mut spec = WiringSpec::new("app");
    containered_grpc_service(&mut spec);
    kubernetes::create_deployment(&mut spec, "kubernetes", &["A_proc_ctr"]);

    let app = build_application(spec, "app", &["kubernetes"]).unwrap();
    let dep_node = app
        .children
        .iter()
        .find(|c| c.name() == "kubernetes")
        .unwrap();
    {
        let dep = dep_node.downcast_ref::<kubernetes::Deployment>().unwrap();
        assert_eq!(dep.namespace(), "");
        assert_eq!(dep.replicas(), 0);
    }

    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    compile(&app, &out);

    let deployment =
        fs::read_to_string(out.join("kubernetes/manifests/deployment.yaml")).unwrap();
    assert!(deployment.contains("  name: kubernetes\n  namespace: default\n"));
    assert!(deployment.contains("  replicas: 1\n"));
    assert!(deployment.contains("      - name: a-proc-ctr\n"));
    assert!(deployment.contains("        image: ${REGISTRY}/A_proc_ctr:latest\n"));
    assert!(deployment.contains(
        "        - name: A_GRPC_BIND_ADDR\n          value: \"0.0.0.0:2000\"\n"
    ));
    assert!(deployment.contains(
        "        ports:\n        - containerPort: 2000\n          name: a-grpc\n          protocol: TCP\n"
    ));

    let services = fs::read_to_string(out.join("kubernetes/manifests/services.yaml")).unwrap();
    assert!(services.contains("  name: a-proc-ctr\n"));
    assert!(services.contains("    name: a-grpc\n"));

    assert!(out.join("kubernetes/A_proc_ctr/Dockerfile").exists());
    assert!(out.join("kubernetes/apply.sh").exists());
    assert!(out.join("kubernetes/apply.bat").exists());
    assert!(out.join("kubernetes/README.md").exists());
}

#[test]
fn namespace_and_replicas_flow_from_the_wiring_spec() {
    let mut spec = WiringSpec::new("app");
    containered_grpc_service(&mut spec);
    kubernetes::create_deployment(&mut spec, "kubernetes", &["A_proc_ctr"]);
    kubernetes::set_namespace(&mut spec, "kubernetes", "staging");
    kubernetes::set_replicas(&mut spec, "kubernetes", 3);

    let app = build_application(spec, "app", &["kubernetes"]).unwrap();
    let dep_node = app
        .children
        .iter()
        .find(|c| c.name() == "kubernetes")
        .unwrap();
    {
        let dep = dep_node.downcast_ref::<kubernetes::Deployment>().unwrap();
        assert_eq!(dep.namespace(), "staging");
        assert_eq!(dep.replicas(), 3);
    }

    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    compile(&app, &out);

    let deployment =
        fs::read_to_string(out.join("kubernetes/manifests/deployment.yaml")).unwrap();
    assert!(deployment.contains("  namespace: staging\n"));
    assert!(deployment.contains("  replicas: 3\n"));

    let services = fs::read_to_string(out.join("kubernetes/manifests/services.yaml")).unwrap();
    assert!(services.contains("  namespace: staging\n"));

    let readme = fs::read_to_string(out.join("kubernetes/README.md")).unwrap();
    assert!(readme.contains("- Namespace: staging\n- Replicas: 3\n"));
}

#[test]
fn addresses_outside_the_deployment_pass_through_the_configmap() {
    let mut spec = WiringSpec::new("app");
    let a = workflow::service(&mut spec, "A", "EchoService", &[]);
    grpc::deploy(&mut spec, &a);
    workflow::service(&mut spec, "B", "FrontendService", &[&a]);
    for svc in ["A", "B"] {
        let proc_name = goproc::deploy(&mut spec, svc);
        goproc::set_tidy(&mut spec, &proc_name, false);
        linuxcontainer::deploy(&mut spec, &proc_name);
    }
    dockercompose::create_deployment(&mut spec, "docker", &["A_proc_ctr"]);
    kubernetes::create_deployment(&mut spec, "kubernetes", &["B_proc_ctr"]);

    let app = build_application(spec, "app", &["docker", "kubernetes"]).unwrap();
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    compile(&app, &out);

    // B dials A, but A lives in the compose deployment; the Kubernetes side
    // reads the dial address from its ConfigMap at apply time.
    let configmap =
        fs::read_to_string(out.join("kubernetes/manifests/configmap.yaml")).unwrap();
    assert_eq!(
        configmap,
        "apiVersion: v1\n\
         kind: ConfigMap\n\
         metadata:\n\
         \x20 name: kubernetes-config\n\
         \x20 namespace: default\n\
         data:\n\
         \x20 A_GRPC_DIAL_ADDR: \"${A_GRPC_DIAL_ADDR}\"\n"
    );

    let deployment =
        fs::read_to_string(out.join("kubernetes/manifests/deployment.yaml")).unwrap();
    assert!(deployment.contains(
        "        - name: A_GRPC_DIAL_ADDR\n\
         \x20         valueFrom:\n\
         \x20           configMapKeyRef:\n\
         \x20             name: kubernetes-config\n\
         \x20             key: A_GRPC_DIAL_ADDR\n\
         \x20             optional: true\n"
    ));

    // No bind lives in the Kubernetes deployment, so no service manifest.
    assert!(!out.join("kubernetes/manifests/services.yaml").exists());
    let readme = fs::read_to_string(out.join("kubernetes/README.md")).unwrap();
    assert!(readme.contains("- `A_GRPC_DIAL_ADDR`\n"));

    // The compose side still binds A and records it in the env files.
    assert!(out.join("docker/docker-compose.yml").exists());
    let env = fs::read_to_string(out.join(".env")).unwrap();
    assert_eq!(env, "A_GRPC_BIND_ADDR=0.0.0.0:2000\n");
}
