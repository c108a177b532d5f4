//! Workflow services: the application-logic nodes everything else wraps.

use std::fmt;

use crate::ir::artifacts::{InstanceGraph, ProvidesGraphInstance};
use crate::ir::{IrNode, NodeRef, NodeTag, ServiceInterface, ServiceNode};
use crate::pointer;
use crate::wiring::{BuildError, WiringSpec};

/// Defines a service named `name`, implemented by the workflow type
/// `service_type`, with constructor arguments resolved from `deps`.
///
/// The service sits behind a pointer, so callers resolve the head of its
/// client-side modifier chain and RPC plugins can interpose on either side.
/// Returns `name` for chaining into other wiring calls.
pub fn service(spec: &mut WiringSpec, name: &str, service_type: &str, deps: &[&str]) -> String {
    service_with_interface(spec, name, ServiceInterface::new(service_type), deps)
}

/// Like [`service`], for callers that describe the interface's method set.
pub fn service_with_interface(
    spec: &mut WiringSpec,
    name: &str,
    interface: ServiceInterface,
    deps: &[&str],
) -> String {
    let handler_name = format!("{name}.handler");
    let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
    let node_name = handler_name.clone();
    spec.define(&handler_name, NodeTag::Instance, move |ns| {
        let mut args = Vec::with_capacity(deps.len());
        for dep in &deps {
            args.push(ns.get(dep)?);
        }
        Ok(NodeRef::new(WorkflowService {
            name: node_name.clone(),
            interface: interface.clone(),
            args,
        }))
    });
    pointer::create_pointer(spec, name, NodeTag::Instance, &handler_name, None);
    name.to_string()
}

/// IR node for an instantiated workflow service.
pub struct WorkflowService {
    name: String,
    interface: ServiceInterface,
    args: Vec<NodeRef>,
}

impl IrNode for WorkflowService {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> NodeTag {
        NodeTag::Instance
    }

    fn as_service(&self) -> Option<&dyn ServiceNode> {
        Some(self)
    }

    fn as_graph_instance(&self) -> Option<&dyn ProvidesGraphInstance> {
        Some(self)
    }
}

impl ServiceNode for WorkflowService {
    fn interface(&self) -> &ServiceInterface {
        &self.interface
    }
}

impl ProvidesGraphInstance for WorkflowService {
    fn add_graph_instance(&self, graph: &mut dyn InstanceGraph) -> Result<(), BuildError> {
        let alias = graph.import("workflow");
        graph.declare(&self.name, &format!("{alias}.New{}", self.interface.name))
    }
}

impl fmt::Display for WorkflowService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| a.name()).collect();
        write!(
            f,
            "{} = WorkflowService<{}>({})",
            self.name,
            self.interface.name,
            args.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ServiceMethod, TypedName};
    use crate::wiring::build_application;

    #[test]
    fn service_defines_handler_behind_a_pointer() {
        let mut spec = WiringSpec::new("app");
        let a = service(&mut spec, "a", "EchoService", &[]);
        assert_eq!(a, "a");
        assert!(spec.get_def("a").is_some());
        assert!(spec.get_def("a.handler").is_some());
        assert!(pointer::get_pointer(&spec, "a").is_some());
    }

    #[test]
    fn dependencies_resolve_to_arg_nodes() {
        let mut spec = WiringSpec::new("app");
        let a = service(&mut spec, "a", "EchoService", &[]);
        let b = service(&mut spec, "b", "FrontendService", &[&a]);
        let app = build_application(spec, "app", &[&b]).unwrap();
        let names: Vec<String> = app.children.iter().map(|c| c.name()).collect();
        assert!(names.contains(&"a.handler".to_string()));
        assert!(names.contains(&"b.handler".to_string()));
        let b_node = app
            .children
            .iter()
            .find(|c| c.name() == "b.handler")
            .cloned()
            .unwrap();
        let b_node = b_node.downcast_ref::<WorkflowService>().unwrap();
        assert_eq!(b_node.args.len(), 1);
        assert_eq!(b_node.args[0].name(), "a.handler");
        assert_eq!(
            b_node.to_string(),
            "b.handler = WorkflowService<FrontendService>(a.handler)"
        );
    }

    #[test]
    fn interface_method_set_is_carried() {
        let iface = ServiceInterface::new("CacheService").with_method(ServiceMethod {
            name: "Put".to_string(),
            args: vec![
                TypedName {
                    name: "key".to_string(),
                    type_name: "string".to_string(),
                },
                TypedName {
                    name: "value".to_string(),
                    type_name: "string".to_string(),
                },
            ],
            returns: vec![TypedName {
                name: "err".to_string(),
                type_name: "error".to_string(),
            }],
        });
        let mut spec = WiringSpec::new("app");
        service_with_interface(&mut spec, "cache", iface, &[]);
        let app = build_application(spec, "app", &["cache"]).unwrap();
        let node = app.children[0].clone();
        let borrowed = node.borrow();
        let iface = borrowed.as_service().unwrap().interface();
        assert_eq!(iface.name, "CacheService");
        assert_eq!(iface.methods.len(), 1);
        assert_eq!(iface.methods[0].args[1].name, "value");
    }

    struct FakeGraph {
        declared: Vec<(String, String)>,
    }

    impl InstanceGraph for FakeGraph {
        fn import(&mut self, path: &str) -> String {
            path.rsplit('/').next().unwrap_or(path).to_string()
        }

        fn declare(&mut self, name: &str, constructor: &str) -> Result<(), BuildError> {
            self.declared.push((name.to_string(), constructor.to_string()));
            Ok(())
        }
    }

    #[test]
    fn graph_instance_declares_workflow_constructor() {
        let mut spec = WiringSpec::new("app");
        service(&mut spec, "a", "CacheService", &[]);
        let app = build_application(spec, "app", &["a"]).unwrap();
        let node = app.children[0].clone();
        let mut graph = FakeGraph { declared: vec![] };
        node.borrow()
            .as_graph_instance()
            .unwrap()
            .add_graph_instance(&mut graph)
            .unwrap();
        assert_eq!(
            graph.declared,
            vec![("a.handler".to_string(), "workflow.NewCacheService".to_string())]
        );
    }
}
