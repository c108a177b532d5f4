//! Built-in plugins.
//!
//! Each plugin exposes wiring-time functions that extend a [`WiringSpec`]
//! (define services, wrap clients, group nodes into processes, containers
//! and deployments) plus the IR node types those definitions build into.
//! The artifact-side plugins also contribute builders to
//! [`standard_registry`], which the command-line driver hands to
//! [`BuilderRegistry::build_all`].
//!
//! [`WiringSpec`]: crate::wiring::WiringSpec
//! [`BuilderRegistry::build_all`]: crate::ir::artifacts::BuilderRegistry::build_all

use crate::ir::artifacts::{generate_node_artifacts, BuilderRegistry};
use crate::ir::NodeTag;

pub mod dockercompose;
pub mod goproc;
pub mod grpc;
pub mod kubernetes;
pub mod linuxcontainer;
pub mod retries;
pub mod simplecache;
pub mod timeouts;
pub mod workflow;

/// Go module that hosts the generated code's runtime support packages
/// (the dependency-injection graph and the plugin client/server shims).
pub(crate) const RUNTIME_MODULE: &str = "weave.dev/runtime";

/// Registry with every built-in artifact builder registered in its
/// canonical order.
///
/// Namespace builders act as bundlers for nodes left at the application
/// root: stray instances are collected into a default process, stray
/// processes into a default container workspace, stray containers into a
/// default compose deployment. Deployment nodes generate their own
/// artifact trees. Registration order matters because each bundler can
/// produce nodes for the next one to claim.
pub fn standard_registry() -> BuilderRegistry {
    let mut registry = BuilderRegistry::new();
    registry.register_namespace_builder(NodeTag::Instance, "goproc", |dir, nodes| {
        goproc::build_instances(dir, nodes)
    });
    registry.register_namespace_builder(NodeTag::Process, "linuxcontainer", |dir, nodes| {
        linuxcontainer::build_processes(dir, nodes)
    });
    registry.register_namespace_builder(NodeTag::Container, "dockercompose", |dir, nodes| {
        dockercompose::build_containers(dir, nodes)
    });
    registry.register_node_builder(NodeTag::Deployment, "deployment", |dir, node| {
        generate_node_artifacts(dir, node)
    });
    registry
}
