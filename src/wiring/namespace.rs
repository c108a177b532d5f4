//! Namespace evaluation: turning a wiring spec into an IR tree.
//!
//! A namespace is one scope of the application under construction. The root
//! namespace stands for the application itself; plugins derive child
//! namespaces for processes, containers, and deployments while their nodes
//! build. Each namespace resolves names against the shared wiring spec,
//! caches what it has resolved, and routes definitions it cannot host up to
//! its parent.
//!
//! Placement falls out of routing: a `Get` walks up the namespace chain until
//! a handler accepts the definition's tag, the definition builds there once,
//! and every namespace crossed on the way records the node as an edge. A
//! dial config requested from inside a process therefore materializes at the
//! application root while each intervening process and container remembers
//! that it depends on it.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use crate::ir::{ApplicationNode, NodeRef, NodeTag, NodeVariant};

use super::error::WiringError;
use super::spec::{BuildFn, PropertyValue, WiringSpec};

/// Where deferred work lands in the queue.
///
/// Front-queued work runs before anything already deferred; namespace nodes
/// use it so their contents build before cross-namespace fixups run.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferOpts {
    pub front: bool,
}

type DeferredFn = Box<dyn FnOnce() -> Result<(), WiringError>>;

struct Frame {
    name: String,
    parent: Option<usize>,
    /// The node hosting this namespace; `None` only for the root frame.
    handler: Option<NodeRef>,
    /// Names resolved in this namespace, aliases included.
    resolved: BTreeMap<String, NodeRef>,
    /// Node names already handed to the handler, to keep a node that is
    /// reachable under several definitions from being hosted twice.
    added: BTreeSet<String>,
    /// Definitions currently building in this namespace.
    building: BTreeSet<String>,
}

impl Frame {
    fn new(name: &str, parent: Option<usize>, handler: Option<NodeRef>) -> Self {
        Frame {
            name: name.to_string(),
            parent,
            handler,
            resolved: BTreeMap::new(),
            added: BTreeSet::new(),
            building: BTreeSet::new(),
        }
    }
}

struct EngineState {
    spec: WiringSpec,
    frames: Vec<Frame>,
    deferred: VecDeque<DeferredFn>,
    /// Names of definitions currently building, innermost last. Only used to
    /// report cycles.
    path: Vec<String>,
    /// Every derived namespace by name. Namespace names share one flat
    /// notion of identity so deferred work can find a namespace without
    /// knowing where in the tree it was derived.
    derived: BTreeMap<String, usize>,
    /// Nodes hosted by the root frame.
    root_children: Vec<NodeRef>,
}

/// A handle to one namespace of the application under construction.
///
/// Cloning is cheap; clones share the underlying engine. Build functions
/// receive the namespace their definition was accepted into and resolve
/// their dependencies through it.
#[derive(Clone)]
pub struct Namespace {
    state: Rc<RefCell<EngineState>>,
    frame: usize,
}

impl Namespace {
    pub fn name(&self) -> String {
        self.state.borrow().frames[self.frame].name.clone()
    }

    /// Resolve `name` to a node, building it if this is its first use.
    ///
    /// If this namespace's handler rejects the definition's tag, resolution
    /// is delegated to the parent and the returned node is recorded as an
    /// edge of this namespace. Metadata nodes and proxy definitions are
    /// never recorded as edges.
    pub fn get(&self, name: &str) -> Result<NodeRef, WiringError> {
        if let Some(node) = self.cached(name) {
            return Ok(node);
        }
        if let Some(target) = self.alias_target(name) {
            let node = self.get(&target)?;
            self.cache(name, node.clone());
            return Ok(node);
        }
        let Some((tag, proxy, build)) = self.def_parts(name) else {
            return Err(WiringError::Undefined {
                name: name.to_string(),
                namespace: self.name(),
            });
        };

        let handler = self.handler();
        if let Some(h) = &handler {
            let accepts = match h.borrow().as_namespace_handler() {
                Some(contents) => contents.accepts(tag),
                None => false,
            };
            if !accepts {
                let Some(parent) = self.parent() else {
                    return Err(WiringError::NotAccepted {
                        namespace: self.name(),
                        name: name.to_string(),
                    });
                };
                let node = parent.get(name)?;
                if !proxy && node.variant() != NodeVariant::Metadata {
                    let mut hosting = h.borrow_mut();
                    if let Some(contents) = hosting.as_namespace_handler_mut() {
                        contents.add_edge(node.clone());
                    }
                }
                self.cache(name, node.clone());
                return Ok(node);
            }
        }
        self.build_local(name, proxy, build)
    }

    /// Resolve `name` to a node built in this namespace, regardless of tag.
    ///
    /// Unlike [`get`](Namespace::get), no delegation happens and no edges
    /// are recorded. Pointer destination chains use this to force server
    /// nodes into the namespace that owns them.
    pub fn instantiate(&self, name: &str) -> Result<NodeRef, WiringError> {
        if let Some(node) = self.cached(name) {
            return Ok(node);
        }
        if let Some(target) = self.alias_target(name) {
            let node = self.instantiate(&target)?;
            self.cache(name, node.clone());
            return Ok(node);
        }
        let Some((_, proxy, build)) = self.def_parts(name) else {
            return Err(WiringError::Undefined {
                name: name.to_string(),
                namespace: self.name(),
            });
        };
        self.build_local(name, proxy, build)
    }

    /// Queue work to run after the current resolution settles.
    ///
    /// Deferred work runs at the application root once the queue's earlier
    /// entries have drained, no matter which namespace deferred it.
    pub fn defer(&self, opts: DeferOpts, work: impl FnOnce() -> Result<(), WiringError> + 'static) {
        let mut st = self.state.borrow_mut();
        if opts.front {
            st.deferred.push_front(Box::new(work));
        } else {
            st.deferred.push_back(Box::new(work));
        }
    }

    /// Create a child namespace hosted by `handler`.
    ///
    /// Namespace names are application-wide: deriving the same name twice is
    /// an error even from different parents.
    pub fn derive_namespace(
        &self,
        name: &str,
        handler: &NodeRef,
    ) -> Result<Namespace, WiringError> {
        if handler.borrow().as_namespace_handler().is_none() {
            return Err(WiringError::UnexpectedNodeType {
                name: name.to_string(),
                expected: "a namespace handler",
                actual: handler.name(),
            });
        }
        let mut st = self.state.borrow_mut();
        if st.derived.contains_key(name) {
            return Err(WiringError::DuplicateNamespace(name.to_string()));
        }
        let idx = st.frames.len();
        st.frames
            .push(Frame::new(name, Some(self.frame), Some(handler.clone())));
        st.derived.insert(name.to_string(), idx);
        drop(st);
        tracing::debug!(parent = %self.name(), namespace = %name, "derived namespace");
        Ok(Namespace {
            state: self.state.clone(),
            frame: idx,
        })
    }

    /// Look up a namespace derived earlier anywhere in the application.
    pub fn get_namespace(&self, name: &str) -> Result<Namespace, WiringError> {
        let st = self.state.borrow();
        match st.derived.get(name) {
            Some(&idx) => Ok(Namespace {
                state: self.state.clone(),
                frame: idx,
            }),
            None => Err(WiringError::NamespaceNotFound(name.to_string())),
        }
    }

    /// The first value of property `key` on the definition named `name`.
    pub fn property(&self, name: &str, key: &str) -> Option<PropertyValue> {
        self.state.borrow().spec.get_property(name, key)
    }

    /// All string values of property `key` on the definition named `name`.
    pub fn string_properties(&self, name: &str, key: &str) -> Result<Vec<String>, WiringError> {
        self.state.borrow().spec.string_properties(name, key)
    }

    fn build_local(
        &self,
        name: &str,
        proxy: bool,
        build: BuildFn,
    ) -> Result<NodeRef, WiringError> {
        {
            let mut st = self.state.borrow_mut();
            if st.frames[self.frame].building.contains(name) {
                let mut path: Vec<String> = match st.path.iter().position(|n| n == name) {
                    Some(i) => st.path[i..].to_vec(),
                    None => Vec::new(),
                };
                path.push(name.to_string());
                return Err(WiringError::Cycle { path });
            }
            st.frames[self.frame].building.insert(name.to_string());
            st.path.push(name.to_string());
        }
        tracing::debug!(namespace = %self.name(), node = %name, "building");
        let result = build(self);
        {
            let mut st = self.state.borrow_mut();
            st.path.pop();
            st.frames[self.frame].building.remove(name);
        }
        let node = result?;

        if !proxy {
            let handler = self.handler();
            let newly_added = {
                let mut st = self.state.borrow_mut();
                st.frames[self.frame].added.insert(node.name())
            };
            if newly_added {
                match handler {
                    Some(h) => {
                        let mut hosting = h.borrow_mut();
                        if let Some(contents) = hosting.as_namespace_handler_mut() {
                            contents.add_node(node.clone());
                        }
                    }
                    None => self.state.borrow_mut().root_children.push(node.clone()),
                }
            }
        }
        self.cache(name, node.clone());
        Ok(node)
    }

    fn cached(&self, name: &str) -> Option<NodeRef> {
        self.state.borrow().frames[self.frame]
            .resolved
            .get(name)
            .cloned()
    }

    fn cache(&self, name: &str, node: NodeRef) {
        self.state.borrow_mut().frames[self.frame]
            .resolved
            .insert(name.to_string(), node);
    }

    fn alias_target(&self, name: &str) -> Option<String> {
        self.state
            .borrow()
            .spec
            .get_alias(name)
            .map(|s| s.to_string())
    }

    fn def_parts(&self, name: &str) -> Option<(NodeTag, bool, BuildFn)> {
        let st = self.state.borrow();
        st.spec
            .get_def(name)
            .map(|def| (def.tag, def.options.proxy, def.build.clone()))
    }

    fn handler(&self) -> Option<NodeRef> {
        self.state.borrow().frames[self.frame].handler.clone()
    }

    fn parent(&self) -> Option<Namespace> {
        self.state.borrow().frames[self.frame]
            .parent
            .map(|idx| Namespace {
                state: self.state.clone(),
                frame: idx,
            })
    }
}

/// Evaluate a wiring spec into the application's IR tree.
///
/// Each root is resolved against the root namespace in order, then deferred
/// work drains until the queue is empty. An empty `roots` slice means every
/// definition in the spec.
///
/// Errors recorded on the spec's error channel fail the build before any
/// node is constructed.
pub fn build_application(
    spec: WiringSpec,
    name: &str,
    roots: &[&str],
) -> Result<ApplicationNode, WiringError> {
    if !spec.errors().is_empty() {
        return Err(WiringError::SpecErrors {
            messages: spec.errors().iter().map(|e| e.to_string()).collect(),
        });
    }
    let roots: Vec<String> = if roots.is_empty() {
        spec.def_names()
    } else {
        roots.iter().map(|s| s.to_string()).collect()
    };
    tracing::info!(application = %name, roots = roots.len(), "building application IR");

    let state = Rc::new(RefCell::new(EngineState {
        spec,
        frames: vec![Frame::new(name, None, None)],
        deferred: VecDeque::new(),
        path: Vec::new(),
        derived: BTreeMap::new(),
        root_children: Vec::new(),
    }));
    let root = Namespace {
        state: state.clone(),
        frame: 0,
    };
    for root_name in &roots {
        let ns = root.clone();
        let target = root_name.clone();
        root.defer(DeferOpts::default(), move || ns.get(&target).map(|_| ()));
    }

    loop {
        let work = state.borrow_mut().deferred.pop_front();
        let Some(work) = work else { break };
        if let Err(err) = work() {
            // Deferred closures hold namespace handles back into the engine;
            // drop the queue so the state is not leaked through the cycle.
            state.borrow_mut().deferred.clear();
            return Err(err);
        }
    }

    let mut app = ApplicationNode::new(name);
    app.children = std::mem::take(&mut state.borrow_mut().root_children);
    tracing::info!(application = %name, children = app.children.len(), "application IR built");
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrNode, IrValue};
    use std::fmt;

    struct Scope {
        name: String,
        hosts: NodeTag,
        nodes: Vec<NodeRef>,
        edges: Vec<NodeRef>,
    }

    impl Scope {
        fn node(name: &str, hosts: NodeTag) -> NodeRef {
            NodeRef::new(Scope {
                name: name.to_string(),
                hosts,
                nodes: Vec::new(),
                edges: Vec::new(),
            })
        }
    }

    impl IrNode for Scope {
        fn name(&self) -> &str {
            &self.name
        }
        fn tag(&self) -> NodeTag {
            NodeTag::Process
        }
        fn as_namespace_handler(&self) -> Option<&dyn crate::ir::NamespaceHandler> {
            Some(self)
        }
        fn as_namespace_handler_mut(&mut self) -> Option<&mut dyn crate::ir::NamespaceHandler> {
            Some(self)
        }
    }

    impl crate::ir::NamespaceHandler for Scope {
        fn accepts(&self, tag: NodeTag) -> bool {
            tag == self.hosts
        }
        fn add_node(&mut self, node: NodeRef) {
            self.nodes.push(node);
        }
        fn add_edge(&mut self, node: NodeRef) {
            self.edges.push(node);
        }
    }

    impl fmt::Display for Scope {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.name)
        }
    }

    struct Marker {
        name: String,
    }

    impl IrNode for Marker {
        fn name(&self) -> &str {
            &self.name
        }
        fn tag(&self) -> NodeTag {
            NodeTag::Application
        }
        fn variant(&self) -> NodeVariant {
            NodeVariant::Metadata
        }
    }

    impl fmt::Display for Marker {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.name)
        }
    }

    fn leaf(name: &'static str) -> impl Fn(&Namespace) -> Result<NodeRef, WiringError> {
        move |_ns| Ok(NodeRef::new(IrValue::new(name, name)))
    }

    #[test]
    fn roots_build_at_the_application_root() {
        let mut spec = WiringSpec::new("app");
        spec.define("a", NodeTag::Instance, leaf("a"));
        spec.define("b", NodeTag::Instance, leaf("b"));
        let app = build_application(spec, "app", &["a", "b"]).unwrap();
        let names: Vec<String> = app.children.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn resolution_is_cached_per_namespace() {
        let mut spec = WiringSpec::new("app");
        spec.define("a", NodeTag::Instance, leaf("a"));
        spec.define("b", NodeTag::Instance, |ns| {
            let first = ns.get("a")?;
            let second = ns.get("a")?;
            assert!(first.ptr_eq(&second));
            Ok(NodeRef::new(IrValue::new("b", "b")))
        });
        let app = build_application(spec, "app", &["b", "a"]).unwrap();
        // "a" was built while "b" resolved it and is not rebuilt for its root.
        assert_eq!(app.children.len(), 2);
    }

    #[test]
    fn undefined_names_report_the_namespace() {
        let mut spec = WiringSpec::new("app");
        spec.define("a", NodeTag::Instance, |ns| ns.get("ghost"));
        let err = build_application(spec, "app", &["a"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ghost does not exist in the wiring spec of namespace app"
        );
    }

    #[test]
    fn rejected_definitions_float_to_the_parent_and_leave_an_edge() {
        let mut spec = WiringSpec::new("app");
        spec.define("shared", NodeTag::Application, leaf("shared"));
        spec.define("inner", NodeTag::Instance, |ns| {
            ns.get("shared")?;
            Ok(NodeRef::new(IrValue::new("inner", "inner")))
        });
        spec.define("scope", NodeTag::Process, |ns| {
            let node = Scope::node("scope", NodeTag::Instance);
            let child = ns.derive_namespace("scope", &node)?;
            child.get("inner")?;
            Ok(node)
        });
        let app = build_application(spec, "app", &["scope"]).unwrap();

        let names: Vec<String> = app.children.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["shared", "scope"]);

        let scope = app.children[1].downcast_ref::<Scope>().unwrap();
        assert_eq!(scope.nodes.len(), 1);
        assert_eq!(scope.nodes[0].name(), "inner");
        assert_eq!(scope.edges.len(), 1);
        assert_eq!(scope.edges[0].name(), "shared");
    }

    #[test]
    fn metadata_nodes_are_not_recorded_as_edges() {
        let mut spec = WiringSpec::new("app");
        spec.define("marker", NodeTag::Application, |_ns| {
            Ok(NodeRef::new(Marker {
                name: "marker".to_string(),
            }))
        });
        spec.define("scope", NodeTag::Process, |ns| {
            let node = Scope::node("scope", NodeTag::Instance);
            let child = ns.derive_namespace("scope", &node)?;
            child.get("marker")?;
            Ok(node)
        });
        let app = build_application(spec, "app", &["scope"]).unwrap();
        let scope = app.children[1].downcast_ref::<Scope>().unwrap();
        assert!(scope.edges.is_empty());
    }

    #[test]
    fn aliases_resolve_to_the_same_node() {
        let mut spec = WiringSpec::new("app");
        spec.define("real", NodeTag::Instance, leaf("real"));
        spec.alias("nick", "real");
        spec.define("probe", NodeTag::Instance, |ns| {
            let via_alias = ns.get("nick")?;
            let direct = ns.get("real")?;
            assert!(via_alias.ptr_eq(&direct));
            Ok(NodeRef::new(IrValue::new("probe", "probe")))
        });
        build_application(spec, "app", &["probe"]).unwrap();
    }

    #[test]
    fn cycles_are_reported_with_their_path() {
        let mut spec = WiringSpec::new("app");
        spec.define("a", NodeTag::Instance, |ns| ns.get("b"));
        spec.define("b", NodeTag::Instance, |ns| ns.get("a"));
        let err = build_application(spec, "app", &["a"]).unwrap_err();
        match err {
            WiringError::Cycle { path } => assert_eq!(path, ["a", "b", "a"]),
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn namespace_names_are_application_wide() {
        let mut spec = WiringSpec::new("app");
        spec.define("first", NodeTag::Process, |ns| {
            let node = Scope::node("dup", NodeTag::Instance);
            ns.derive_namespace("dup", &node)?;
            Ok(node)
        });
        spec.define("second", NodeTag::Process, |ns| {
            let node = Scope::node("dup2", NodeTag::Instance);
            ns.derive_namespace("dup", &node)?;
            Ok(node)
        });
        let err = build_application(spec, "app", &["first", "second"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "attempt to create child namespace dup that already exists"
        );
    }

    #[test]
    fn derived_namespaces_are_reachable_from_anywhere() {
        let mut spec = WiringSpec::new("app");
        spec.define("inner", NodeTag::Instance, leaf("inner"));
        spec.define("scope", NodeTag::Process, |ns| {
            let node = Scope::node("scope", NodeTag::Instance);
            ns.derive_namespace("scope", &node)?;
            Ok(node)
        });
        spec.define("later", NodeTag::Process, |ns| {
            ns.get("scope")?;
            let scope = ns.get_namespace("scope")?;
            scope.instantiate("inner")?;
            Ok(Scope::node("later", NodeTag::Instance))
        });
        let app = build_application(spec, "app", &["later"]).unwrap();
        let scope = app
            .children
            .iter()
            .find(|c| c.name() == "scope")
            .unwrap()
            .downcast_ref::<Scope>()
            .unwrap();
        assert_eq!(scope.nodes.len(), 1);
        assert_eq!(scope.nodes[0].name(), "inner");
    }

    #[test]
    fn instantiate_builds_locally_without_edges() {
        let mut spec = WiringSpec::new("app");
        // Tagged for the application scope; instantiate must still build it
        // inside the child namespace.
        spec.define("pinned", NodeTag::Application, leaf("pinned"));
        spec.define("scope", NodeTag::Process, |ns| {
            let node = Scope::node("scope", NodeTag::Instance);
            let child = ns.derive_namespace("scope", &node)?;
            child.instantiate("pinned")?;
            Ok(node)
        });
        let app = build_application(spec, "app", &["scope"]).unwrap();
        assert_eq!(app.children.len(), 1);
        let scope = app.children[0].downcast_ref::<Scope>().unwrap();
        assert_eq!(scope.nodes.len(), 1);
        assert_eq!(scope.nodes[0].name(), "pinned");
        assert!(scope.edges.is_empty());
    }

    #[test]
    fn deferred_work_runs_front_before_back() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut spec = WiringSpec::new("app");
        let seen = order.clone();
        spec.define("a", NodeTag::Instance, move |ns| {
            let first = seen.clone();
            let second = seen.clone();
            ns.defer(DeferOpts::default(), move || {
                second.borrow_mut().push("back");
                Ok(())
            });
            ns.defer(DeferOpts { front: true }, move || {
                first.borrow_mut().push("front");
                Ok(())
            });
            Ok(NodeRef::new(IrValue::new("a", "a")))
        });
        build_application(spec, "app", &["a"]).unwrap();
        assert_eq!(*order.borrow(), ["front", "back"]);
    }

    #[test]
    fn spec_errors_fail_the_build_before_any_node_exists() {
        let mut spec = WiringSpec::new("app");
        spec.define("a", NodeTag::Instance, leaf("a"));
        spec.add_error(WiringError::EmptyPointsTo("a.addr".to_string()));
        let err = build_application(spec, "app", &["a"]).unwrap_err();
        assert!(matches!(err, WiringError::SpecErrors { .. }));
    }
}
