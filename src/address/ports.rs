//! Port allocation passes run by deployment workspaces.
//!
//! After all container instances are declared, a deployment partitions each
//! instance's argument nodes with [`split`], allocates ports for the full
//! set of bind configs with [`assign_ports`], and materializes the result
//! with [`PortAllocation::apply`] and [`set_hostname`]. Allocation is
//! deterministic: binds are considered in name order, pre-assigned ports are
//! honored, and every assignment is persisted as the bind's preferred port
//! so the next compile reproduces it.

use std::collections::BTreeMap;

use crate::ir::NodeRef;
use crate::wiring::error::BuildError;

use super::{BindConfig, DialConfig};

/// Lowest port probed for binds without a preferred port.
const DEFAULT_PORT: u16 = 2000;

/// The result of [`assign_ports`]: which binds received a fresh port, and
/// the complete name-to-port table for the workspace.
#[derive(Debug, Default)]
pub struct PortAllocation {
    /// Binds that had no port and were assigned one by this pass.
    pub newly_assigned: Vec<NodeRef>,
    /// Assigned port per bind config name, including pre-assigned ports.
    pub ports: BTreeMap<String, u16>,
}

impl PortAllocation {
    /// Write the assigned ports into the bind configs themselves.
    ///
    /// Separate from [`assign_ports`] so callers can inspect or reject an
    /// allocation before mutating any node.
    pub fn apply(&self, binds: &[NodeRef]) {
        for node in binds {
            let Some(mut bind) = node.downcast_mut::<BindConfig>() else {
                continue;
            };
            if let Some(port) = self.ports.get(&bind.name) {
                bind.port = *port;
            }
        }
    }
}

/// Partition `nodes` into bind configs, dial configs, and everything else.
///
/// Order within each partition follows the input order.
pub fn split(nodes: &[NodeRef]) -> (Vec<NodeRef>, Vec<NodeRef>, Vec<NodeRef>) {
    let mut binds = Vec::new();
    let mut dials = Vec::new();
    let mut rest = Vec::new();
    for node in nodes {
        if node.is::<BindConfig>() {
            binds.push(node.clone());
        } else if node.is::<DialConfig>() {
            dials.push(node.clone());
        } else {
            rest.push(node.clone());
        }
    }
    (binds, dials, rest)
}

/// Allocate a distinct port for every bind config in `binds`.
///
/// Pre-assigned ports are honored first; two binds pre-assigned to the same
/// port are a [`BuildError::PortConflict`]. Each remaining bind probes
/// upward from its preferred port (or [`DEFAULT_PORT`]) until a free port is
/// found. The binds themselves are not modified except for their preferred
/// port, which is set to the assigned port; the returned allocation carries
/// the assignments.
pub fn assign_ports(binds: &[NodeRef]) -> Result<PortAllocation, BuildError> {
    let mut allocation = PortAllocation::default();
    let mut taken: BTreeMap<u16, String> = BTreeMap::new();

    // Pre-assigned ports claim their slot before anything is probed.
    for node in binds {
        let Some(bind) = node.downcast_ref::<BindConfig>() else {
            continue;
        };
        if bind.port == 0 {
            continue;
        }
        if let Some(first) = taken.get(&bind.port) {
            return Err(BuildError::PortConflict {
                first: first.clone(),
                second: bind.name.clone(),
                port: bind.port,
            });
        }
        taken.insert(bind.port, bind.name.clone());
        allocation.ports.insert(bind.name.clone(), bind.port);
    }

    for node in binds {
        let Some(mut bind) = node.downcast_mut::<BindConfig>() else {
            continue;
        };
        if bind.port != 0 {
            bind.preferred_port = bind.port;
            continue;
        }
        if bind.preferred_port != 0 && taken.contains_key(&bind.preferred_port) {
            tracing::warn!("preferred port {} for {} is taken", bind.preferred_port, bind.name);
        }
        let mut candidate = if bind.preferred_port != 0 {
            bind.preferred_port
        } else {
            DEFAULT_PORT
        };
        while taken.contains_key(&candidate) {
            candidate = candidate
                .checked_add(1)
                .ok_or_else(|| BuildError::UnassignedPorts {
                    names: vec![bind.name.clone()],
                })?;
        }
        tracing::debug!("assigned port {candidate} to {}", bind.name);
        taken.insert(candidate, bind.name.clone());
        allocation.ports.insert(bind.name.clone(), candidate);
        bind.preferred_port = candidate;
        drop(bind);
        allocation.newly_assigned.push(node.clone());
    }

    Ok(allocation)
}

/// Fail if any bind config still has no port.
///
/// Run after [`PortAllocation::apply`] as the workspace's final sanity pass.
pub fn check_ports(binds: &[NodeRef]) -> Result<(), BuildError> {
    let mut names = Vec::new();
    for node in binds {
        let Some(bind) = node.downcast_ref::<BindConfig>() else {
            continue;
        };
        if bind.port == 0 {
            names.push(bind.name.clone());
        }
    }
    if names.is_empty() {
        Ok(())
    } else {
        Err(BuildError::UnassignedPorts { names })
    }
}

/// Overwrite the hostname of every bind config in `binds`.
pub fn set_hostname(hostname: &str, binds: &[NodeRef]) {
    for node in binds {
        if let Some(mut bind) = node.downcast_mut::<BindConfig>() {
            bind.hostname = hostname.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ConfigNode, IrValue};

    fn bind(name: &str, port: u16, preferred: u16) -> NodeRef {
        NodeRef::new(BindConfig {
            name: name.to_string(),
            address_name: format!("{name}.addr"),
            hostname: String::new(),
            port,
            preferred_port: preferred,
        })
    }

    fn dial(name: &str) -> NodeRef {
        NodeRef::new(DialConfig {
            name: name.to_string(),
            address_name: format!("{name}.addr"),
            hostname: String::new(),
            port: 0,
        })
    }

    #[test]
    fn split_partitions_by_config_kind() {
        let nodes = vec![
            bind("b", 0, 0),
            dial("d"),
            NodeRef::new(IrValue::new("v", "1")),
        ];
        let (binds, dials, rest) = split(&nodes);
        assert_eq!(binds.len(), 1);
        assert_eq!(dials.len(), 1);
        assert_eq!(rest.len(), 1);
        assert_eq!(binds[0].name(), "b");
        assert_eq!(dials[0].name(), "d");
    }

    #[test]
    fn unassigned_binds_probe_upward_from_2000() {
        let binds = vec![bind("a", 0, 0), bind("b", 0, 0), bind("c", 0, 0)];
        let alloc = assign_ports(&binds).unwrap();

        assert_eq!(alloc.ports["a"], 2000);
        assert_eq!(alloc.ports["b"], 2001);
        assert_eq!(alloc.ports["c"], 2002);
        assert_eq!(alloc.newly_assigned.len(), 3);

        // The pass records the preference but leaves port and hostname alone.
        let first = binds[0].downcast_ref::<BindConfig>().unwrap();
        assert_eq!(first.preferred_port, 2000);
        assert_eq!(first.port, 0);
        assert!(first.hostname.is_empty());
    }

    #[test]
    fn preferred_ports_are_tried_first() {
        let binds = vec![bind("a", 0, 9090), bind("b", 0, 9090)];
        let alloc = assign_ports(&binds).unwrap();
        assert_eq!(alloc.ports["a"], 9090);
        assert_eq!(alloc.ports["b"], 9091);
    }

    #[test]
    fn preassigned_conflicts_are_an_error() {
        let binds = vec![bind("first", 2500, 0), bind("second", 2500, 0)];
        let err = assign_ports(&binds).unwrap_err();
        assert_eq!(
            err.to_string(),
            "first and second both pre-assigned to port 2500"
        );
    }

    #[test]
    fn allocation_is_stable_across_passes() {
        let binds = vec![bind("a", 0, 0), bind("b", 0, 0)];
        let first = assign_ports(&binds).unwrap();
        first.apply(&binds);

        // Applied ports now count as pre-assigned; nothing moves.
        let second = assign_ports(&binds).unwrap();
        assert!(second.newly_assigned.is_empty());
        assert_eq!(first.ports, second.ports);
    }

    #[test]
    fn apply_and_set_hostname_complete_the_binds() {
        let binds = vec![bind("a", 0, 0), bind("b", 3000, 0)];
        assert!(check_ports(&binds).is_err());

        let alloc = assign_ports(&binds).unwrap();
        alloc.apply(&binds);
        set_hostname("0.0.0.0", &binds);
        check_ports(&binds).unwrap();

        let a = binds[0].downcast_ref::<BindConfig>().unwrap();
        assert_eq!(a.value(), "0.0.0.0:2000");
        let b = binds[1].downcast_ref::<BindConfig>().unwrap();
        assert_eq!(b.value(), "0.0.0.0:3000");
    }

    #[test]
    fn check_ports_names_every_missing_bind() {
        let binds = vec![bind("a", 1234, 0), bind("b", 0, 0), bind("c", 0, 0)];
        let err = check_ports(&binds).unwrap_err();
        assert_eq!(err.to_string(), "unassigned bind addresses b, c");
    }
}
