//! Pointers: the modifiable indirection between callers and callees.
//!
//! A pointer splits a definition into a client side and a server side.
//! Callers that `Get` the pointer receive the head of the client chain;
//! the server side is instantiated lazily through deferred work. Plugins
//! splice modifiers into either side: client wrappers (RPC stubs, retriers),
//! server wrappers (RPC servers), addresses, and namespace membership all
//! reshape a pointer without its callers noticing.
//!
//! The two chains are stitched together with aliases. The client chain ends
//! in an alias to the interface node, which is the server itself until an
//! address is spliced in; from then on clients resolve the address and reach
//! the server only through it.

pub mod visibility;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::address::{self, Address};
use crate::ir::{NodeRef, NodeTag};
use crate::wiring::{DeferOpts, Namespace, PropertyValue, WiringError, WiringSpec};

pub use visibility::{require_uniqueness, VisibilityMetadata};

/// Property key carrying a definition's pointer bookkeeping.
pub const POINTER: &str = "ptr";

/// Options for destination modifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModifierOpts {
    /// Whether clients should resolve against this modifier instead of the
    /// current interface node.
    pub is_interface_node: bool,
}

/// The bookkeeping of one pointer definition.
///
/// Held behind `Rc<RefCell<...>>` and attached to the definition as a
/// property, so plugins applied later can keep reshaping the chains.
pub struct PointerDef {
    name: String,
    client_modifiers: Vec<String>,
    /// Alias at the open end of the client chain; always points at the
    /// interface node until the next client modifier claims it.
    client_tail: String,
    /// What clients ultimately resolve: the server, or its address.
    interface_node: String,
    /// Outermost server modifier; instantiating it builds the whole chain.
    server_head: String,
    server_modifiers: Vec<String>,
}

impl PointerDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Splice a modifier into the client side.
    ///
    /// The modifier's build function should resolve the returned name to
    /// reach the rest of the chain it wraps.
    pub fn add_src_modifier(&mut self, spec: &mut WiringSpec, modifier_name: &str) -> String {
        spec.alias(&self.client_tail, modifier_name);
        self.client_modifiers.push(modifier_name.to_string());
        self.client_tail = format!("{modifier_name}.ptr.client.next");
        spec.alias(&self.client_tail, &self.interface_node);
        self.client_tail.clone()
    }

    /// Splice a modifier into the server side.
    ///
    /// Returns the name of the node the modifier now wraps; the modifier's
    /// build function should instantiate it.
    pub fn add_dst_modifier(
        &mut self,
        spec: &mut WiringSpec,
        modifier_name: &str,
        opts: ModifierOpts,
    ) -> String {
        let next_server = self.server_head.clone();
        self.server_head = modifier_name.to_string();
        if opts.is_interface_node {
            self.interface_node = modifier_name.to_string();
            spec.alias(&self.client_tail, modifier_name);
        }
        self.server_modifiers.insert(0, modifier_name.to_string());
        next_server
    }

    /// Route the pointer through an address.
    ///
    /// The address's pointsTo definition joins the server chain and the
    /// address becomes the interface node, so clients thereafter resolve the
    /// address rather than the server. Returns the name of the node the
    /// pointsTo definition now wraps.
    pub fn add_addr_modifier(
        &mut self,
        spec: &mut WiringSpec,
        addr_name: &str,
    ) -> Result<String, WiringError> {
        let Some(addr) = address::get_address(spec, addr_name) else {
            return Err(WiringError::AddressUndefined(addr_name.to_string()));
        };
        let next_server = self.add_dst_modifier(spec, &addr.points_to, ModifierOpts::default());
        self.interface_node = addr_name.to_string();
        spec.alias(&self.client_tail, addr_name);
        Ok(next_server)
    }

    /// Resolve the pointer's destination, instantiating the server chain if
    /// it has not been built yet.
    ///
    /// For pointers without an address the interface node itself is the
    /// destination. For addressed pointers the server chain builds through
    /// its namespace membership modifiers, which place each link where it
    /// belongs, and the destination recorded on the address is returned.
    pub fn instantiate_dst(&self, ns: &Namespace) -> Result<NodeRef, WiringError> {
        let node = ns.get(&self.interface_node)?;
        let resolved = node
            .downcast_ref::<Address>()
            .map(|addr| addr.destination().cloned());
        match resolved {
            None => return Ok(node),
            Some(Some(dst)) => return Ok(dst),
            Some(None) => {}
        }

        let Some(head) = self.server_modifiers.first().cloned() else {
            return Err(WiringError::ServerNotInstantiated {
                addr: self.interface_node.clone(),
                server: self.name.clone(),
            });
        };
        ns.instantiate(&head)?;

        node.downcast_ref::<Address>()
            .and_then(|addr| addr.destination().cloned())
            .ok_or_else(|| WiringError::ServerNotInstantiated {
                addr: self.interface_node.clone(),
                server: head,
            })
    }
}

impl fmt::Display for PointerDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] -> [{}]",
            self.client_modifiers.join(" -> "),
            self.server_modifiers.join(" -> ")
        )
    }
}

/// Turn the definition `name` into a pointer to `server`.
///
/// The existing definition of `name` is replaced by one that resolves the
/// client chain and defers server instantiation. With a `uniqueness` tag the
/// server is additionally aliased behind a uniqueness check at that
/// visibility, so reaching it from two namespaces fails the build.
pub fn create_pointer(
    spec: &mut WiringSpec,
    name: &str,
    tag: NodeTag,
    server: &str,
    uniqueness: Option<NodeTag>,
) -> Rc<RefCell<PointerDef>> {
    let mut server = server.to_string();
    if let Some(visibility) = uniqueness {
        let server_alias = format!("{name}.server");
        spec.alias(&server_alias, &server);
        require_uniqueness(spec, &server_alias, visibility);
        server = server_alias;
    }

    let client_head = format!("{name}.client");
    let ptr = Rc::new(RefCell::new(PointerDef {
        name: name.to_string(),
        client_modifiers: Vec::new(),
        client_tail: client_head.clone(),
        interface_node: server.clone(),
        server_head: server.clone(),
        server_modifiers: vec![server.clone()],
    }));
    spec.alias(&client_head, &server);

    let build_ptr = ptr.clone();
    spec.define(name, tag, move |ns| {
        let deferred = build_ptr.clone();
        let deferred_ns = ns.clone();
        ns.defer(DeferOpts::default(), move || {
            deferred.borrow().instantiate_dst(&deferred_ns).map(|_| ())
        });
        ns.get(&client_head)
    });
    spec.set_property(name, POINTER, PropertyValue::Pointer(ptr.clone()));
    ptr
}

/// The pointer attached to definition `name`, if it is one.
pub fn get_pointer(spec: &WiringSpec, name: &str) -> Option<Rc<RefCell<PointerDef>>> {
    match spec.get_property(name, POINTER) {
        Some(PropertyValue::Pointer(ptr)) => Some(ptr),
        _ => None,
    }
}
