//! gRPC: expose a pointed-to service over the network.
//!
//! Deploying a service splices a server onto the destination side of its
//! pointer and a client onto the source side, joined by an address. The
//! server instantiates wherever the service lives and binds the address
//! there; every caller's client chain now ends in a client that dials it.

use std::fmt;

use crate::address;
use crate::ir::artifacts::{InstanceGraph, ProvidesGraphInstance};
use crate::ir::{BindableServer, IrNode, NodeRef, NodeTag};
use crate::pointer::{self, POINTER};
use crate::wiring::{BuildError, WiringError, WiringSpec};

use super::RUNTIME_MODULE;

/// Expose `service` over gRPC.
///
/// `service` must already be a pointer (see [`crate::plugins::workflow`]);
/// misuse is recorded on the spec's error channel rather than panicking
/// mid-declaration. Returns `service` for chaining.
pub fn deploy(spec: &mut WiringSpec, service: &str) -> String {
    let Some(ptr) = pointer::get_pointer(spec, service) else {
        spec.add_error(WiringError::PropertyNotFound {
            name: service.to_string(),
            key: POINTER.to_string(),
        });
        return service.to_string();
    };

    let addr_name = format!("{service}.grpc.addr");
    let server_name = format!("{service}.grpc_server");
    let client_name = format!("{service}.grpc_client");

    address::define(spec, &addr_name, &server_name, NodeTag::Application);

    let wrapped = match ptr.borrow_mut().add_addr_modifier(spec, &addr_name) {
        Ok(next) => next,
        Err(err) => {
            spec.add_error(err);
            return service.to_string();
        }
    };

    {
        let node_name = server_name.clone();
        let addr = addr_name.clone();
        spec.define(&server_name, NodeTag::Instance, move |ns| {
            let handler = ns.get(&wrapped)?;
            let node = NodeRef::new(GrpcServer {
                name: node_name.clone(),
                handler,
            });
            address::bind(ns, &addr, &node)?;
            Ok(node)
        });
    }

    let next = ptr.borrow_mut().add_src_modifier(spec, &client_name);
    {
        let node_name = client_name.clone();
        let addr = addr_name;
        spec.define(&client_name, NodeTag::Instance, move |ns| {
            ns.get(&next)?;
            let dial = address::dial(ns, &addr)?;
            Ok(NodeRef::new(GrpcClient {
                name: node_name.clone(),
                dial,
            }))
        });
    }

    service.to_string()
}

/// IR node for the server side of a deployed service.
pub struct GrpcServer {
    name: String,
    handler: NodeRef,
}

impl IrNode for GrpcServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> NodeTag {
        NodeTag::Instance
    }

    fn as_bindable_server(&self) -> Option<&dyn BindableServer> {
        Some(self)
    }

    fn as_graph_instance(&self) -> Option<&dyn ProvidesGraphInstance> {
        Some(self)
    }
}

impl BindableServer for GrpcServer {
    fn interface_name(&self) -> String {
        let handler = self.handler.borrow();
        match handler.as_service() {
            Some(service) => service.interface().name.clone(),
            None => handler.name().to_string(),
        }
    }
}

impl ProvidesGraphInstance for GrpcServer {
    fn add_graph_instance(&self, graph: &mut dyn InstanceGraph) -> Result<(), BuildError> {
        let alias = graph.import(&format!("{RUNTIME_MODULE}/plugins/grpc"));
        graph.declare(&self.name, &format!("{alias}.NewServer"))
    }
}

impl fmt::Display for GrpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = GrpcServer({})", self.name, self.handler.name())
    }
}

/// IR node for one caller-side client of a deployed service.
pub struct GrpcClient {
    name: String,
    dial: NodeRef,
}

impl IrNode for GrpcClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> NodeTag {
        NodeTag::Instance
    }

    fn as_graph_instance(&self) -> Option<&dyn ProvidesGraphInstance> {
        Some(self)
    }
}

impl ProvidesGraphInstance for GrpcClient {
    fn add_graph_instance(&self, graph: &mut dyn InstanceGraph) -> Result<(), BuildError> {
        let alias = graph.import(&format!("{RUNTIME_MODULE}/plugins/grpc"));
        graph.declare(&self.name, &format!("{alias}.NewClient"))
    }
}

impl fmt::Display for GrpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = GrpcClient({})", self.name, self.dial.name())
    }
}
