//! Wiring evaluation tests
//!
//! These tests cover spec declaration and namespace resolution end to end:
//! aliases, build caching, cycle detection, the spec error channel, and the
//! placement of nodes into the namespaces that host them.

use std::cell::Cell;
use std::rc::Rc;

use weave::ir::{IrValue, NodeRef, NodeTag};
use weave::plugins::{goproc, grpc, workflow};
use weave::wiring::{build_application, WiringSpec};

#[test]
fn aliases_resolve_to_one_node() {
    let mut spec = WiringSpec::new("app");
    spec.define("c", NodeTag::Instance, |_ns| {
        Ok(NodeRef::new(IrValue::new("c", "leaf")))
    });
    spec.alias("b", "c");
    spec.alias("a", "b");

    // All three roots reach the same definition, so only one node is built.
    let app = build_application(spec, "app", &["a", "b", "c"]).unwrap();
    assert_eq!(app.children.len(), 1);
    assert_eq!(app.children[0].name(), "c");
}

#[test]
fn definitions_build_once_per_namespace() {
    let calls = Rc::new(Cell::new(0u32));
    let seen = calls.clone();

    let mut spec = WiringSpec::new("app");
    spec.define("x", NodeTag::Instance, move |_ns| {
        seen.set(seen.get() + 1);
        Ok(NodeRef::new(IrValue::new("x", "1")))
    });

    let app = build_application(spec, "app", &["x", "x"]).unwrap();
    assert_eq!(app.children.len(), 1);
    assert_eq!(calls.get(), 1);
}

#[test]
fn cyclic_services_fail_with_the_cycle_path() {
    let mut spec = WiringSpec::new("app");
    workflow::service(&mut spec, "a", "PingService", &["b"]);
    workflow::service(&mut spec, "b", "PongService", &["a"]);

    let err = build_application(spec, "app", &["a"]).unwrap_err();
    let message = err.to_string();
    assert!(
        message.starts_with("dependency cycle detected: "),
        "unexpected error: {message}"
    );
    assert!(message.contains("a.handler"));
    assert!(message.contains("b.handler"));
}

#[test]
fn declaration_errors_fail_the_build_before_any_node() {
    let mut spec = WiringSpec::new("app");
    spec.define("a", NodeTag::Instance, |_ns| {
        Ok(NodeRef::new(IrValue::new("a", "1")))
    });
    // Deploying a plain definition over gRPC is a declaration-time mistake.
    grpc::deploy(&mut spec, "a");
    assert_eq!(spec.errors().len(), 1);

    let err = build_application(spec, "app", &["a"]).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("wiring spec has errors:"));
    assert!(message.contains("definition a has no property ptr"));
}

#[test]
fn redefining_with_a_new_tag_is_reported() {
    let mut spec = WiringSpec::new("app");
    spec.define("x", NodeTag::Instance, |_ns| {
        Ok(NodeRef::new(IrValue::new("x", "1")))
    });
    spec.define("x", NodeTag::Container, |_ns| {
        Ok(NodeRef::new(IrValue::new("x", "2")))
    });

    assert_eq!(spec.errors().len(), 1);
    assert_eq!(
        spec.errors()[0].to_string(),
        "x redefined with node type container but was previously instance"
    );
}

#[test]
fn processes_capture_their_members() {
    let mut spec = WiringSpec::new("app");
    let a = workflow::service(&mut spec, "a", "EchoService", &[]);
    grpc::deploy(&mut spec, &a);
    workflow::service(&mut spec, "b", "FrontendService", &[&a]);
    let a_proc = goproc::deploy(&mut spec, "a");
    let b_proc = goproc::deploy(&mut spec, "b");

    let app = build_application(spec, "app", &[&a_proc, &b_proc]).unwrap();
    let names: Vec<String> = app.children.iter().map(|c| c.name()).collect();
    assert!(names.contains(&"a_proc".to_string()), "roots: {names:?}");
    assert!(names.contains(&"b_proc".to_string()), "roots: {names:?}");

    // The server side of the pointer lands in a's process.
    let a_proc_node = app
        .children
        .iter()
        .find(|c| c.name() == "a_proc")
        .unwrap();
    let members: Vec<String> = a_proc_node
        .contained()
        .iter()
        .map(|c| c.name())
        .collect();
    assert!(members.contains(&"a.handler".to_string()), "a_proc: {members:?}");
    assert!(members.contains(&"a.grpc_server".to_string()), "a_proc: {members:?}");

    // The client side lands in b's process; the dial config floats to the
    // root and is recorded on the process as an argument instead.
    let b_proc_node = app
        .children
        .iter()
        .find(|c| c.name() == "b_proc")
        .unwrap();
    let b_members: Vec<String> = b_proc_node
        .contained()
        .iter()
        .map(|c| c.name())
        .collect();
    assert!(b_members.contains(&"b.handler".to_string()), "b_proc: {b_members:?}");
    assert!(b_members.contains(&"a.grpc_client".to_string()), "b_proc: {b_members:?}");
    assert!(!b_members.contains(&"a.grpc.dial_addr".to_string()));
    assert!(names.contains(&"a.grpc.dial_addr".to_string()));
    assert!(b_proc_node.to_string().contains("a.grpc.dial_addr"));
}
