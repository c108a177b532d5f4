//! The weave binary: two demo wiring specs behind the spec driver.
//!
//! Both specs wire the same two-service workflow. Service `a` keeps its
//! state in an in-process cache; service `b` calls `a` over gRPC with
//! client-side retries and per-call timeouts. Each service compiles into
//! one Go process inside one container; the specs differ only in the
//! deployment tier those containers land in.
//!
//!   weave build -w docker -o build      # docker-compose deployment
//!   weave build -w kubernetes -o build  # Kubernetes deployment

use weave::cmdbuilder::{CmdBuilder, SpecOption};
use weave::plugins::{
    dockercompose, goproc, grpc, kubernetes, linuxcontainer, retries, simplecache, timeouts,
    workflow,
};
use weave::wiring::WiringSpec;

/// The demo workflow: `b` calls `a`, `a` is backed by a cache.
///
/// Client modifiers apply caller-outward, so callers of `a` reach a retrier
/// whose attempts each run under a timeout before hitting the gRPC stub.
fn wire_services(spec: &mut WiringSpec) {
    let cache = simplecache::cache(spec, "a_cache");
    let a = workflow::service(spec, "a", "EchoService", &[&cache]);
    retries::add_retries(spec, &a, 3);
    timeouts::add_timeouts(spec, &a, "1s");
    grpc::deploy(spec, &a);

    let b = workflow::service(spec, "b", "FrontendService", &[&a]);
    grpc::deploy(spec, &b);

    for svc in ["a", "b"] {
        let proc_name = goproc::deploy(spec, svc);
        linuxcontainer::deploy(spec, &proc_name);
    }
}

fn docker_spec(spec: &mut WiringSpec) -> Vec<String> {
    wire_services(spec);
    let dep = dockercompose::create_deployment(spec, "docker", &["a_proc_ctr", "b_proc_ctr"]);
    vec![dep]
}

fn kubernetes_spec(spec: &mut WiringSpec) -> Vec<String> {
    wire_services(spec);
    let dep = kubernetes::create_deployment(spec, "kubernetes", &["a_proc_ctr", "b_proc_ctr"]);
    vec![dep]
}

fn main() {
    let mut builder = CmdBuilder::new("demo");
    builder.add(SpecOption {
        name: "docker",
        description: "the demo services in a docker-compose deployment",
        build: docker_spec,
    });
    builder.add(SpecOption {
        name: "kubernetes",
        description: "the demo services in a Kubernetes deployment",
        build: kubernetes_spec,
    });
    builder.make_and_execute();
}
