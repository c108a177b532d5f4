//! Addresses: how one namespace reaches a server in another.
//!
//! An address is three definitions that travel together: the address node
//! itself, a bind config for the server side, and a dial config for the
//! client side. The address node is metadata recording which server node it
//! reaches; the two configs are ordinary config nodes that float to the
//! address's reachability scope and surface as env vars in the generated
//! artifacts. Dialing clients never see the server node, only the dial
//! config derived from the address name.

pub mod ports;

use std::fmt;
use std::rc::Rc;

use crate::ir::{ConfigNode, IrNode, NodeRef, NodeTag, NodeVariant};
use crate::stringutil;
use crate::wiring::{Namespace, PropertyValue, WiringError, WiringSpec};

/// Property key carrying a definition's address bookkeeping.
pub const ADDRESS: &str = "addr";

/// Wiring-time bookkeeping of an address definition.
pub struct AddressDef {
    pub name: String,
    /// The server-side definition the address reaches; spliced into pointer
    /// destination chains.
    pub points_to: String,
}

/// The IR node of an address.
pub struct Address {
    name: String,
    destination: Option<NodeRef>,
}

impl Address {
    /// The server node bound behind this address, once one has bound.
    pub fn destination(&self) -> Option<&NodeRef> {
        self.destination.as_ref()
    }

    /// Record the server node this address reaches.
    pub fn set_destination(&mut self, node: NodeRef) -> Result<(), WiringError> {
        if node.borrow().as_bindable_server().is_none() {
            return Err(WiringError::AddressType {
                addr: self.name.clone(),
                server: node.name(),
            });
        }
        self.destination = Some(node);
        Ok(())
    }
}

impl IrNode for Address {
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

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.destination {
            Some(dst) => write!(f, "{} = Address({})", self.name, dst.name()),
            None => write!(f, "{} = Address()", self.name),
        }
    }
}

/// Config node carrying the host:port a server binds on.
///
/// Unset until port allocation runs during artifact generation.
pub struct BindConfig {
    name: String,
    pub address_name: String,
    pub hostname: String,
    pub port: u16,
    /// Port that allocation tries first; updated to the assigned port so
    /// repeated allocations stay stable.
    pub preferred_port: u16,
}

impl IrNode for BindConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> NodeTag {
        NodeTag::Application
    }

    fn variant(&self) -> NodeVariant {
        NodeVariant::Config
    }

    fn as_config(&self) -> Option<&dyn ConfigNode> {
        Some(self)
    }

    fn as_config_mut(&mut self) -> Option<&mut dyn ConfigNode> {
        Some(self)
    }
}

impl ConfigNode for BindConfig {
    fn optional(&self) -> bool {
        false
    }

    fn has_value(&self) -> bool {
        !self.hostname.is_empty() && self.port != 0
    }

    fn value(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl fmt::Display for BindConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_value() {
            write!(f, "{} = BindConfig({})", self.name, self.value())
        } else {
            write!(f, "{} = BindConfig()", self.name)
        }
    }
}

/// Config node carrying the host:port clients dial an address on.
///
/// The value is supplied by the deployment environment; deployment plugins
/// wire it up as an env var rather than setting it here.
pub struct DialConfig {
    name: String,
    pub address_name: String,
    pub hostname: String,
    pub port: u16,
}

impl IrNode for DialConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> NodeTag {
        NodeTag::Application
    }

    fn variant(&self) -> NodeVariant {
        NodeVariant::Config
    }

    fn as_config(&self) -> Option<&dyn ConfigNode> {
        Some(self)
    }

    fn as_config_mut(&mut self) -> Option<&mut dyn ConfigNode> {
        Some(self)
    }
}

impl ConfigNode for DialConfig {
    fn optional(&self) -> bool {
        false
    }

    fn has_value(&self) -> bool {
        !self.hostname.is_empty() && self.port != 0
    }

    fn value(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl fmt::Display for DialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_value() {
            write!(f, "{} = DialConfig({})", self.name, self.value())
        } else {
            write!(f, "{} = DialConfig()", self.name)
        }
    }
}

/// The config key of an address's bind side.
pub fn bind_config_name(addr_name: &str) -> String {
    stringutil::replace_suffix(addr_name, "addr", "bind_addr")
}

/// The config key of an address's dial side.
pub fn dial_config_name(addr_name: &str) -> String {
    stringutil::replace_suffix(addr_name, "addr", "dial_addr")
}

/// Declare an address reaching `points_to`.
///
/// Defines the address node plus its bind and dial configs, all at
/// `reachability` visibility. An empty `points_to` is recorded on the spec's
/// error channel.
pub fn define(spec: &mut WiringSpec, addr_name: &str, points_to: &str, reachability: NodeTag) {
    if points_to.is_empty() {
        spec.add_error(WiringError::EmptyPointsTo(addr_name.to_string()));
        return;
    }
    let name = addr_name.to_string();
    spec.define(addr_name, reachability, move |_ns| {
        Ok(NodeRef::new(Address {
            name: name.clone(),
            destination: None,
        }))
    });
    spec.set_property(
        addr_name,
        ADDRESS,
        PropertyValue::Address(Rc::new(AddressDef {
            name: addr_name.to_string(),
            points_to: points_to.to_string(),
        })),
    );

    let bind_name = bind_config_name(addr_name);
    let bn = bind_name.clone();
    let bind_addr = addr_name.to_string();
    spec.define(&bind_name, reachability, move |ns| {
        let fixed = port_property(ns, &bn, "fixed_port")?;
        let preferred = port_property(ns, &bn, "preferred_port")?;
        Ok(NodeRef::new(BindConfig {
            name: bn.clone(),
            address_name: bind_addr.clone(),
            hostname: String::new(),
            port: fixed.unwrap_or(0),
            preferred_port: preferred.or(fixed).unwrap_or(0),
        }))
    });

    let dial_name = dial_config_name(addr_name);
    let dn = dial_name.clone();
    let dial_addr = addr_name.to_string();
    spec.define(&dial_name, reachability, move |_ns| {
        Ok(NodeRef::new(DialConfig {
            name: dn.clone(),
            address_name: dial_addr.clone(),
            hostname: String::new(),
            port: 0,
        }))
    });
}

/// Pin the bind port of an address ahead of allocation.
pub fn set_fixed_port(spec: &mut WiringSpec, addr_name: &str, port: u16) {
    spec.set_property(
        &bind_config_name(addr_name),
        "fixed_port",
        PropertyValue::Str(port.to_string()),
    );
}

/// Suggest a bind port; allocation probes upward from it if taken.
pub fn set_preferred_port(spec: &mut WiringSpec, addr_name: &str, port: u16) {
    spec.set_property(
        &bind_config_name(addr_name),
        "preferred_port",
        PropertyValue::Str(port.to_string()),
    );
}

/// Bind `server` behind `addr_name`, returning the bind config node.
///
/// Config names are derived from the address node's own name rather than
/// the name it was resolved under, so aliased addresses stay consistent.
pub fn bind(ns: &Namespace, addr_name: &str, server: &NodeRef) -> Result<NodeRef, WiringError> {
    let addr_node = ns.get(addr_name)?;
    let real_name = addr_node.name();
    let conf = ns.get(&bind_config_name(&real_name))?;
    let Some(mut addr) = addr_node.downcast_mut::<Address>() else {
        return Err(WiringError::UnexpectedNodeType {
            name: addr_name.to_string(),
            expected: "an address",
            actual: addr_node.name(),
        });
    };
    addr.set_destination(server.clone())?;
    Ok(conf)
}

/// Resolve the dial config of `addr_name` for the calling namespace.
pub fn dial(ns: &Namespace, addr_name: &str) -> Result<NodeRef, WiringError> {
    let addr_node = ns.get(addr_name)?;
    let real_name = addr_node.name();
    ns.get(&dial_config_name(&real_name))
}

/// The address bookkeeping attached to definition `name`, if any.
pub fn get_address(spec: &WiringSpec, name: &str) -> Option<Rc<AddressDef>> {
    match spec.get_property(name, ADDRESS) {
        Some(PropertyValue::Address(addr)) => Some(addr),
        _ => None,
    }
}

fn port_property(ns: &Namespace, name: &str, key: &str) -> Result<Option<u16>, WiringError> {
    match ns.property(name, key) {
        None => Ok(None),
        Some(PropertyValue::Str(s)) => {
            s.parse::<u16>()
                .map(Some)
                .map_err(|_| WiringError::PropertyType {
                    name: name.to_string(),
                    key: key.to_string(),
                    expected: "port number",
                })
        }
        Some(_) => Err(WiringError::PropertyType {
            name: name.to_string(),
            key: key.to_string(),
            expected: "port number",
        }),
    }
}
