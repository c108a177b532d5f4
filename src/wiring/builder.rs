//! Helpers for plugins that declare namespace nodes and their contents.
//!
//! Processes, containers, and deployments all follow the same shape: a
//! definition that builds a namespace node, a `children` property listing
//! what lives inside it, and a deferred pass that instantiates those
//! children once the node itself exists. The helpers here implement that
//! shape once so plugins only differ in the node type they build.

use crate::ir::{NodeRef, NodeTag};
use crate::pointer;

use super::error::WiringError;
use super::namespace::{DeferOpts, Namespace};
use super::spec::{DefOptions, PropertyValue, WiringSpec};

/// Property key listing the members of a namespace definition.
pub const CHILDREN: &str = "children";

/// Hosted nodes and reached edges of a namespace node.
///
/// Plugins embed this in their namespace node types and forward their
/// `NamespaceHandler` methods to it.
#[derive(Default)]
pub struct NamespaceContents {
    /// Nodes built inside the namespace, in resolution order.
    pub contained_nodes: Vec<NodeRef>,
    /// Nodes the namespace reaches through its parent, e.g. the dial configs
    /// of addresses its members talk to.
    pub arg_nodes: Vec<NodeRef>,
}

impl NamespaceContents {
    pub fn new() -> Self {
        NamespaceContents::default()
    }

    pub fn add_node(&mut self, node: NodeRef) {
        self.contained_nodes.push(node);
    }

    pub fn add_edge(&mut self, node: NodeRef) {
        if !self.arg_nodes.iter().any(|n| n.ptr_eq(&node)) {
            self.arg_nodes.push(node);
        }
    }
}

/// Register `child_name` as a member of the namespace definition
/// `namespace_name`.
///
/// Plain definitions are listed directly. Pointer definitions get a server
/// modifier spliced into their destination chain instead, so that
/// instantiating the pointer's server routes through the namespace: the
/// modifier resolves the namespace node, then builds the rest of the chain
/// inside it. `namespace_tag` is the tag of the namespace node itself, which
/// decides where the modifier definition is allowed to build.
pub fn add_node_to(
    spec: &mut WiringSpec,
    namespace_tag: NodeTag,
    namespace_name: &str,
    child_name: &str,
) {
    let Some(ptr) = pointer::get_pointer(spec, child_name) else {
        spec.add_property(
            namespace_name,
            CHILDREN,
            PropertyValue::Str(child_name.to_string()),
        );
        return;
    };

    let modifier_name = format!("{child_name}.{namespace_name}");
    let ptr_next = ptr.borrow_mut().add_dst_modifier(
        spec,
        &modifier_name,
        pointer::ModifierOpts::default(),
    );

    let ns_name = namespace_name.to_string();
    let next = ptr_next.clone();
    spec.define_with(
        &modifier_name,
        namespace_tag,
        DefOptions { proxy: true },
        move |ns| {
            let child = match ns.get_namespace(&ns_name) {
                Ok(child) => child,
                Err(_) => {
                    // Namespace not derived yet; resolving its node does that.
                    ns.get(&ns_name)?;
                    ns.get_namespace(&ns_name)?
                }
            };
            child.instantiate(&next)
        },
    );
    spec.add_property(namespace_name, CHILDREN, PropertyValue::Str(ptr_next));
}

/// Derive a namespace for `node` and queue instantiation of its children.
///
/// Children run at the front of the deferred queue so every namespace's
/// contents exist before cross-namespace work such as pointer destination
/// resolution.
pub fn instantiate_namespace(parent: &Namespace, node: &NodeRef) -> Result<Namespace, WiringError> {
    let ns = parent.derive_namespace(&node.name(), node)?;
    let child = ns.clone();
    parent.defer(DeferOpts { front: true }, move || {
        instantiate_from_property(&child, CHILDREN).map_err(|err| {
            WiringError::NamespaceContents {
                namespace: child.name(),
                source: Box::new(err),
            }
        })
    });
    Ok(ns)
}

/// Instantiate each name in `names`, resolving pointers to their servers.
///
/// Names that carry a pointer have their destination chain instantiated;
/// everything else is a plain `Get`.
pub fn instantiate(ns: &Namespace, names: &[&str]) -> Result<(), WiringError> {
    for name in names {
        instantiate_one(ns, name)?;
    }
    Ok(())
}

/// [`instantiate`] every name listed under property `key` of the
/// namespace's own definition.
pub fn instantiate_from_property(ns: &Namespace, key: &str) -> Result<(), WiringError> {
    for name in ns.string_properties(&ns.name(), key)? {
        instantiate_one(ns, &name)?;
    }
    Ok(())
}

/// Resolve each name as a client: pointers build only their client side.
pub fn instantiate_clients(ns: &Namespace, names: &[&str]) -> Result<(), WiringError> {
    for name in names {
        ns.get(name)?;
    }
    Ok(())
}

/// [`instantiate_clients`] for every name listed under property `key` of
/// the namespace's own definition.
pub fn instantiate_clients_from_property(ns: &Namespace, key: &str) -> Result<(), WiringError> {
    for name in ns.string_properties(&ns.name(), key)? {
        ns.get(&name)?;
    }
    Ok(())
}

fn instantiate_one(ns: &Namespace, name: &str) -> Result<(), WiringError> {
    match ns.property(name, pointer::POINTER) {
        Some(PropertyValue::Pointer(ptr)) => {
            let ptr = ptr.borrow();
            ptr.instantiate_dst(ns)?;
        }
        _ => {
            ns.get(name)?;
        }
    }
    Ok(())
}
