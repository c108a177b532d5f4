//! Client-side call timeouts for pointed-to services.

use std::fmt;

use crate::ir::artifacts::{InstanceGraph, ProvidesGraphInstance};
use crate::ir::{IrNode, NodeRef, NodeTag};
use crate::pointer::{self, POINTER};
use crate::wiring::{BuildError, WiringError, WiringSpec};

use super::RUNTIME_MODULE;

/// Wrap every client of `service` so each call is cancelled after
/// `timeout`, a duration string such as `"100ms"` or `"1s"`.
pub fn add_timeouts(spec: &mut WiringSpec, service: &str, timeout: &str) -> String {
    let Some(ptr) = pointer::get_pointer(spec, service) else {
        spec.add_error(WiringError::PropertyNotFound {
            name: service.to_string(),
            key: POINTER.to_string(),
        });
        return service.to_string();
    };
    let wrapper_name = format!("{service}.client.timeout");
    let next = ptr.borrow_mut().add_src_modifier(spec, &wrapper_name);
    let node_name = wrapper_name.clone();
    let timeout = timeout.to_string();
    spec.define(&wrapper_name, NodeTag::Instance, move |ns| {
        let wrapped = ns.get(&next)?;
        Ok(NodeRef::new(TimeoutClient {
            name: node_name.clone(),
            wrapped,
            timeout: timeout.clone(),
        }))
    });
    service.to_string()
}

/// IR node wrapping a client chain link with a per-call deadline.
pub struct TimeoutClient {
    name: String,
    wrapped: NodeRef,
    timeout: String,
}

impl IrNode for TimeoutClient {
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

impl ProvidesGraphInstance for TimeoutClient {
    fn add_graph_instance(&self, graph: &mut dyn InstanceGraph) -> Result<(), BuildError> {
        let alias = graph.import(&format!("{RUNTIME_MODULE}/plugins/timeouts"));
        graph.declare(&self.name, &format!("{alias}.NewTimeoutClient"))
    }
}

impl fmt::Display for TimeoutClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = TimeoutClient({}, timeout={})",
            self.name,
            self.wrapped.name(),
            self.timeout
        )
    }
}
