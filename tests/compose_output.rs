//! docker-compose output tests
//!
//! These tests compile small applications all the way to a compose
//! deployment and assert on the generated docker-compose.yml, .env and
//! .local.env, including the failure mode where two addresses insist on
//! the same port.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use weave::address;
use weave::plugins::{self, dockercompose, goproc, grpc, linuxcontainer, workflow};
use weave::wiring::{build_application, WiringSpec};
use weave::ApplicationNode;

/// Services `A` (a gRPC echo backend) and `B` (its caller), each in a Go
/// process with `go mod tidy` disabled so compiling does not shell out.
fn two_tier_services(spec: &mut WiringSpec) {
    let a = workflow::service(spec, "A", "EchoService", &[]);
    grpc::deploy(spec, &a);
    workflow::service(spec, "B", "FrontendService", &[&a]);
    for svc in ["A", "B"] {
        let proc_name = goproc::deploy(spec, svc);
        goproc::set_tidy(spec, &proc_name, false);
    }
}

fn compile(app: &ApplicationNode, out: &Path) {
    plugins::standard_registry().build_all(out, app).unwrap();
}

#[test]
fn a_two_service_deployment_renders_compose_and_env_files() {
    let mut spec = WiringSpec::new("app");
    two_tier_services(&mut spec);
    linuxcontainer::create_container(&mut spec, "a", &["A_proc"]);
    linuxcontainer::create_container(&mut spec, "b", &["B_proc"]);
    dockercompose::create_deployment(&mut spec, "docker", &["a", "b"]);

    let app = build_application(spec, "app", &["docker"]).unwrap();
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    compile(&app, &out);

    let compose = fs::read_to_string(out.join("docker/docker-compose.yml")).unwrap();
    assert_eq!(
        compose,
        "version: '3'\n\
         services:\n\
         \n\
         \x20 a:\n\
         \x20   build:\n\
         \x20     context: a\n\
         \x20     dockerfile: ./Dockerfile\n\
         \x20   hostname: a\n\
         \x20   expose:\n\
         \x20    - \"2000\"\n\
         \x20   ports:\n\
         \x20    - \"${A_GRPC_BIND_ADDR?A.grpc.bind_addr must be set by the calling environment}:2000\"\n\
         \x20   environment:\n\
         \x20    - A_GRPC_BIND_ADDR=0.0.0.0:2000\n\
         \x20   restart: always\n\
         \n\
         \x20 b:\n\
         \x20   build:\n\
         \x20     context: b\n\
         \x20     dockerfile: ./Dockerfile\n\
         \x20   hostname: b\n\
         \x20   environment:\n\
         \x20    - A_GRPC_DIAL_ADDR=a:2000\n\
         \x20   restart: always\n"
    );

    let env = fs::read_to_string(out.join(".env")).unwrap();
    assert_eq!(env, "A_GRPC_BIND_ADDR=0.0.0.0:2000\nA_GRPC_DIAL_ADDR=a:2000\n");

    let local = fs::read_to_string(out.join(".local.env")).unwrap();
    assert_eq!(
        local,
        "A_GRPC_BIND_ADDR=0.0.0.0:2000\nA_GRPC_DIAL_ADDR=localhost:2000\n"
    );
}

#[test]
fn conflicting_fixed_ports_abort_the_compile() {
    let mut spec = WiringSpec::new("app");
    let a = workflow::service(&mut spec, "A", "EchoService", &[]);
    grpc::deploy(&mut spec, &a);
    address::set_fixed_port(&mut spec, "A.grpc.addr", 2500);
    let b = workflow::service(&mut spec, "B", "FrontendService", &[&a]);
    grpc::deploy(&mut spec, &b);
    address::set_fixed_port(&mut spec, "B.grpc.addr", 2500);
    for svc in ["A", "B"] {
        let proc_name = goproc::deploy(&mut spec, svc);
        goproc::set_tidy(&mut spec, &proc_name, false);
    }
    linuxcontainer::create_container(&mut spec, "a", &["A_proc"]);
    linuxcontainer::create_container(&mut spec, "b", &["B_proc"]);
    dockercompose::create_deployment(&mut spec, "docker", &["a", "b"]);

    let app = build_application(spec, "app", &["docker"]).unwrap();
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    let err = plugins::standard_registry()
        .build_all(&out, &app)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "A.grpc.bind_addr and B.grpc.bind_addr both pre-assigned to port 2500"
    );
    // The conflict is detected before the compose file is written.
    assert!(!out.join("docker/docker-compose.yml").exists());
    assert!(!out.join(".env").exists());
}

#[test]
fn a_dial_inside_the_bound_container_uses_its_own_service_name() {
    let mut spec = WiringSpec::new("app");
    two_tier_services(&mut spec);
    linuxcontainer::create_container(&mut spec, "ab", &["A_proc", "B_proc"]);
    dockercompose::create_deployment(&mut spec, "docker", &["ab"]);

    let app = build_application(spec, "app", &["docker"]).unwrap();
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    compile(&app, &out);

    let compose = fs::read_to_string(out.join("docker/docker-compose.yml")).unwrap();
    assert!(
        compose.contains(
            "    environment:\n\
             \x20    - A_GRPC_BIND_ADDR=0.0.0.0:2000\n\
             \x20    - A_GRPC_DIAL_ADDR=ab:2000\n"
        ),
        "compose:\n{compose}"
    );

    let env = fs::read_to_string(out.join(".env")).unwrap();
    assert_eq!(env, "A_GRPC_BIND_ADDR=0.0.0.0:2000\nA_GRPC_DIAL_ADDR=ab:2000\n");
}
