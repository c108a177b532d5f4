//! Client-side retries for pointed-to services.

use std::fmt;

use crate::ir::artifacts::{InstanceGraph, ProvidesGraphInstance};
use crate::ir::{IrNode, NodeRef, NodeTag};
use crate::pointer::{self, POINTER};
use crate::wiring::{BuildError, WiringError, WiringSpec};

use super::RUNTIME_MODULE;

/// Wrap every client of `service` in a retrier that re-issues failed calls
/// up to `max_retries` times.
pub fn add_retries(spec: &mut WiringSpec, service: &str, max_retries: u32) -> String {
    let Some(ptr) = pointer::get_pointer(spec, service) else {
        spec.add_error(WiringError::PropertyNotFound {
            name: service.to_string(),
            key: POINTER.to_string(),
        });
        return service.to_string();
    };
    let retrier_name = format!("{service}.client.retrier");
    let next = ptr.borrow_mut().add_src_modifier(spec, &retrier_name);
    let node_name = retrier_name.clone();
    spec.define(&retrier_name, NodeTag::Instance, move |ns| {
        let wrapped = ns.get(&next)?;
        Ok(NodeRef::new(Retrier {
            name: node_name.clone(),
            wrapped,
            max_retries,
        }))
    });
    service.to_string()
}

/// IR node wrapping a client chain link with retry behavior.
pub struct Retrier {
    name: String,
    wrapped: NodeRef,
    max_retries: u32,
}

impl IrNode for Retrier {
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

impl ProvidesGraphInstance for Retrier {
    fn add_graph_instance(&self, graph: &mut dyn InstanceGraph) -> Result<(), BuildError> {
        let alias = graph.import(&format!("{RUNTIME_MODULE}/plugins/retries"));
        graph.declare(&self.name, &format!("{alias}.NewRetrier"))
    }
}

impl fmt::Display for Retrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = Retrier({}, max_retries={})",
            self.name,
            self.wrapped.name(),
            self.max_retries
        )
    }
}
