//! The compiled intermediate representation of an application.
//!
//! An IR node is a named element of the application graph: a workflow
//! service, an RPC server, a process, a container, an address, a config
//! value. Nodes are pure data; evaluation lives in `crate::wiring` and
//! artifact generation in [`artifacts`].
//!
//! Two classifications drive everything downstream:
//! - [`NodeTag`] is the placement tier. Namespaces accept or reject
//!   definitions by tag, and the artifact driver dispatches builders by tag.
//! - [`NodeVariant`] is the structural kind. Metadata and config variants
//!   never generate artifacts themselves; the driver strips them before
//!   dispatching builders.
//!
//! Concrete node types are declared by plugins. They expose optional
//! capabilities (config, namespace hosting, artifact generation) through
//! accessor methods on [`IrNode`] rather than runtime reflection.

pub mod artifacts;
pub mod visit;

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::stringutil;

/// Placement tier of a definition and the node it builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeTag {
    /// Application-wide nodes: addresses, configs, visibility metadata.
    Application,
    /// Workflow services and the client/server modifiers wrapped around them.
    Instance,
    /// Operating system processes.
    Process,
    /// Container images and instances.
    Container,
    /// Deployments that group containers.
    Deployment,
}

impl fmt::Display for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeTag::Application => "application",
            NodeTag::Instance => "instance",
            NodeTag::Process => "process",
            NodeTag::Container => "container",
            NodeTag::Deployment => "deployment",
        };
        f.write_str(s)
    }
}

/// Structural variant of an IR node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeVariant {
    /// An ordinary graph element.
    Plain,
    /// Non-artifact-generating bookkeeping, e.g. addresses and visibility markers.
    Metadata,
    /// A named, optional, value-or-unbound string that surfaces as an env var.
    Config,
    /// A literal string value.
    Value,
    /// The root of the IR tree.
    Application,
}

impl fmt::Display for NodeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeVariant::Plain => "plain",
            NodeVariant::Metadata => "metadata",
            NodeVariant::Config => "config",
            NodeVariant::Value => "value",
            NodeVariant::Application => "application",
        };
        f.write_str(s)
    }
}

/// Object-safe access to the concrete type behind a trait object.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A compiled element of the application graph.
///
/// The `Display` impl is the node's human-readable string form, used by the
/// IR tree printer.
pub trait IrNode: AsAny + fmt::Display {
    /// Stable identifier, also used to derive env var keys and directory names.
    fn name(&self) -> &str;

    /// Placement tier.
    fn tag(&self) -> NodeTag;

    /// Structural variant.
    fn variant(&self) -> NodeVariant {
        NodeVariant::Plain
    }

    /// Nodes hosted by this node, in hosting order. Empty for leaves;
    /// namespace nodes override it so inspection can walk the tree.
    fn contained(&self) -> Vec<NodeRef> {
        Vec::new()
    }

    /// Config capability, for [`NodeVariant::Config`] nodes.
    fn as_config(&self) -> Option<&dyn ConfigNode> {
        None
    }

    /// Mutable config capability.
    fn as_config_mut(&mut self) -> Option<&mut dyn ConfigNode> {
        None
    }

    /// Capability for nodes that can be the destination of an address.
    fn as_bindable_server(&self) -> Option<&dyn BindableServer> {
        None
    }

    /// Capability for nodes that expose a service interface.
    fn as_service(&self) -> Option<&dyn ServiceNode> {
        None
    }

    /// Capability for namespace nodes that host other nodes.
    fn as_namespace_handler(&self) -> Option<&dyn NamespaceHandler> {
        None
    }

    /// Mutable namespace-hosting capability.
    fn as_namespace_handler_mut(&mut self) -> Option<&mut dyn NamespaceHandler> {
        None
    }

    /// Capability for nodes that write artifacts to an output directory.
    fn as_artifact_generator(&self) -> Option<&dyn artifacts::ArtifactGenerator> {
        None
    }

    /// Capability for container nodes that build a local image.
    fn as_image_provider(&self) -> Option<&dyn artifacts::ProvidesContainerImage> {
        None
    }

    /// Capability for container nodes that declare a runnable instance.
    fn as_instance_provider(&self) -> Option<&dyn artifacts::ProvidesContainerInstance> {
        None
    }

    /// Capability for process nodes that contribute code to a workspace.
    fn as_process_artifacts(&self) -> Option<&dyn artifacts::ProvidesProcessArtifacts> {
        None
    }

    /// Capability for process nodes that declare how they are launched.
    fn as_process_instance(&self) -> Option<&dyn artifacts::ProcessInstantiable> {
        None
    }

    /// Capability for nodes that register a constructor in their process's
    /// dependency-injection graph.
    fn as_graph_instance(&self) -> Option<&dyn artifacts::ProvidesGraphInstance> {
        None
    }
}

/// Capability for config-variant nodes that surface as env vars or flags.
///
/// The node's [`IrNode::name`] doubles as the config key.
pub trait ConfigNode {
    /// Whether a missing value is tolerated at runtime.
    fn optional(&self) -> bool;

    /// Whether the value has been set.
    fn has_value(&self) -> bool;

    /// The current value; meaningful only when [`ConfigNode::has_value`] is true.
    fn value(&self) -> String;
}

/// Capability for nodes that can be the server side of an address.
pub trait BindableServer {
    /// Name of the interface exposed to dialing clients.
    fn interface_name(&self) -> String;
}

/// Capability for nodes backed by an application-level service.
pub trait ServiceNode {
    fn interface(&self) -> &ServiceInterface;
}

/// A named method set with typed arguments and returns.
///
/// RPC plugins read the interface name when wrapping a service; the method
/// set is carried for the wire-level generators that plug in downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInterface {
    pub name: String,
    pub methods: Vec<ServiceMethod>,
}

impl ServiceInterface {
    pub fn new(name: &str) -> Self {
        ServiceInterface {
            name: name.to_string(),
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: ServiceMethod) -> Self {
        self.methods.push(method);
        self
    }
}

/// One method of a [`ServiceInterface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMethod {
    pub name: String,
    pub args: Vec<TypedName>,
    pub returns: Vec<TypedName>,
}

/// A named, typed argument or return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedName {
    pub name: String,
    pub type_name: String,
}

/// Capability for namespace nodes (processes, containers, deployments) that
/// host other nodes.
pub trait NamespaceHandler {
    /// Whether definitions with this tag build inside the namespace.
    fn accepts(&self, tag: NodeTag) -> bool;

    /// Record a node hosted by this namespace, in resolution order.
    fn add_node(&mut self, node: NodeRef);

    /// Record a node this namespace reaches through its parent.
    fn add_edge(&mut self, node: NodeRef);
}

/// Shared, internally mutable handle to an IR node.
///
/// Nodes are aliased freely across namespaces (a dial config appears in every
/// process that dials the address), so ownership is shared and identity is
/// pointer identity.
#[derive(Clone)]
pub struct NodeRef(Rc<RefCell<dyn IrNode>>);

impl NodeRef {
    pub fn new<T: IrNode + 'static>(node: T) -> Self {
        NodeRef(Rc::new(RefCell::new(node)))
    }

    pub fn name(&self) -> String {
        self.0.borrow().name().to_string()
    }

    pub fn tag(&self) -> NodeTag {
        self.0.borrow().tag()
    }

    pub fn variant(&self) -> NodeVariant {
        self.0.borrow().variant()
    }

    /// Nodes hosted by this node; see [`IrNode::contained`].
    pub fn contained(&self) -> Vec<NodeRef> {
        self.0.borrow().contained()
    }

    /// Whether the concrete type behind this handle is `T`.
    pub fn is<T: 'static>(&self) -> bool {
        (*self.0.borrow()).as_any().is::<T>()
    }

    pub fn borrow(&self) -> Ref<'_, dyn IrNode> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, dyn IrNode> {
        self.0.borrow_mut()
    }

    /// Borrow the node as concrete type `T`, if that is what it is.
    pub fn downcast_ref<T: 'static>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.0.borrow(), |node| node.as_any().downcast_ref::<T>()).ok()
    }

    /// Mutably borrow the node as concrete type `T`.
    pub fn downcast_mut<T: 'static>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.0.borrow_mut(), |node| {
            node.as_any_mut().downcast_mut::<T>()
        })
        .ok()
    }

    /// Node identity; two handles to the same node compare equal.
    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.borrow())
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef({})", self.0.borrow().name())
    }
}

/// Root of the compiled IR tree.
///
/// Children are the top-level nodes in resolution order; the artifact driver
/// consumes them.
#[derive(Debug)]
pub struct ApplicationNode {
    pub name: String,
    pub children: Vec<NodeRef>,
}

impl ApplicationNode {
    pub fn new(name: &str) -> Self {
        ApplicationNode {
            name: name.to_string(),
            children: Vec::new(),
        }
    }
}

impl IrNode for ApplicationNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> NodeTag {
        NodeTag::Application
    }

    fn variant(&self) -> NodeVariant {
        NodeVariant::Application
    }
}

impl fmt::Display for ApplicationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            pretty_print_namespace(&self.name, "Application", &[], &self.children)
        )
    }
}

/// A literal string value in the IR.
pub struct IrValue {
    name: String,
    pub value: String,
}

impl IrValue {
    pub fn new(name: &str, value: &str) -> Self {
        IrValue {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

impl IrNode for IrValue {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> NodeTag {
        NodeTag::Application
    }

    fn variant(&self) -> NodeVariant {
        NodeVariant::Value
    }
}

impl fmt::Display for IrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {:?}", self.name, self.value)
    }
}

/// Keep only nodes whose concrete type is `T`.
pub fn filter<T: 'static>(nodes: &[NodeRef]) -> Vec<NodeRef> {
    nodes.iter().filter(|n| n.is::<T>()).cloned().collect()
}

/// Drop nodes whose concrete type is `T`.
pub fn remove<T: 'static>(nodes: &[NodeRef]) -> Vec<NodeRef> {
    nodes.iter().filter(|n| !n.is::<T>()).cloned().collect()
}

/// Keep only nodes of the given variant.
pub fn filter_variant(nodes: &[NodeRef], variant: NodeVariant) -> Vec<NodeRef> {
    nodes
        .iter()
        .filter(|n| n.variant() == variant)
        .cloned()
        .collect()
}

/// Drop nodes of the given variant.
pub fn remove_variant(nodes: &[NodeRef], variant: NodeVariant) -> Vec<NodeRef> {
    nodes
        .iter()
        .filter(|n| n.variant() != variant)
        .cloned()
        .collect()
}

/// Render a namespace node as an indented tree.
///
/// Produces `name = Kind(arg, arg) { ... }` with each child's string form
/// indented two spaces; namespace children recurse through their own
/// `Display` impls.
pub fn pretty_print_namespace(
    name: &str,
    kind: &str,
    args: &[NodeRef],
    children: &[NodeRef],
) -> String {
    let arg_list = args
        .iter()
        .map(|a| a.name())
        .collect::<Vec<_>>()
        .join(", ");
    if children.is_empty() {
        return format!("{name} = {kind}({arg_list}) {{}}");
    }
    let body = children
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{name} = {kind}({arg_list}) {{\n{}\n}}",
        stringutil::indent(&body, 2)
    )
}
