//! An in-process cache backend, unique at application scope.

use std::fmt;

use crate::ir::artifacts::{InstanceGraph, ProvidesGraphInstance};
use crate::ir::{IrNode, NodeRef, NodeTag};
use crate::pointer;
use crate::wiring::{BuildError, WiringSpec};

use super::RUNTIME_MODULE;

/// Defines an in-process cache named `name`.
///
/// The backend lives in the memory of whichever process first resolves it,
/// so it is declared unique at application scope: a second process asking
/// for the same cache is a wiring error, not a silent second copy.
pub fn cache(spec: &mut WiringSpec, name: &str) -> String {
    let backend_name = format!("{name}.backend");
    let node_name = backend_name.clone();
    spec.define(&backend_name, NodeTag::Instance, move |_ns| {
        Ok(NodeRef::new(SimpleCache {
            name: node_name.clone(),
        }))
    });
    pointer::create_pointer(
        spec,
        name,
        NodeTag::Instance,
        &backend_name,
        Some(NodeTag::Application),
    );
    name.to_string()
}

/// IR node for an instantiated cache backend.
pub struct SimpleCache {
    name: String,
}

impl IrNode for SimpleCache {
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

impl ProvidesGraphInstance for SimpleCache {
    fn add_graph_instance(&self, graph: &mut dyn InstanceGraph) -> Result<(), BuildError> {
        let alias = graph.import(&format!("{RUNTIME_MODULE}/plugins/simplecache"));
        graph.declare(&self.name, &format!("{alias}.NewSimpleCache"))
    }
}

impl fmt::Display for SimpleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = SimpleCache()", self.name)
    }
}
