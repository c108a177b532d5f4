//! Uniqueness constraints for aliased definitions.
//!
//! Some nodes must not be shared: a cache reached over direct function calls
//! only works from the process that owns it. [`require_uniqueness`] rewrites
//! an alias so every resolution passes through a check definition first. The
//! check builds once per namespace; a shared metadata node records the first
//! namespace to get there, and any second namespace fails the build with an
//! error naming both.

use std::fmt;

use crate::ir::{IrNode, NodeRef, NodeTag, NodeVariant};
use crate::wiring::{WiringError, WiringSpec};

/// Records which namespace first resolved a unique definition.
pub struct VisibilityMetadata {
    name: String,
    namespace: Option<String>,
    node: Option<NodeRef>,
}

impl IrNode for VisibilityMetadata {
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

impl fmt::Display for VisibilityMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = VisibilityMetadata()", self.name)
    }
}

/// Require that the target of `alias` is only ever reached from one
/// namespace at the given visibility.
///
/// Only aliases can be made unique; the alias is repointed at a check
/// definition that guards the original target. Misuse is recorded on the
/// spec's error channel rather than returned, so several declaration
/// mistakes surface in one run.
pub fn require_uniqueness(spec: &mut WiringSpec, alias: &str, visibility: NodeTag) {
    if spec.get_alias(alias).is_none() {
        spec.add_error(WiringError::UniquenessNotAlias(alias.to_string()));
        return;
    }
    let Some(def) = spec.get_def(alias) else {
        spec.add_error(WiringError::UniquenessUndefined(alias.to_string()));
        return;
    };
    let target = def.name.clone();
    let target_tag = def.tag;

    let md_name = format!("{target}.visibility");
    let build_name = md_name.clone();
    spec.define(&md_name, visibility, move |_ns| {
        Ok(NodeRef::new(VisibilityMetadata {
            name: build_name.clone(),
            namespace: None,
            node: None,
        }))
    });

    let check_name = format!("{target}.uniqueness_check");
    let md = md_name;
    let guarded = target;
    spec.define(&check_name, target_tag, move |ns| {
        let md_node = ns.get(&md)?;
        let first = {
            let Some(meta) = md_node.downcast_ref::<VisibilityMetadata>() else {
                return Err(WiringError::UnexpectedNodeType {
                    name: md.clone(),
                    expected: "uniqueness metadata",
                    actual: md_node.name(),
                });
            };
            match (&meta.node, &meta.namespace) {
                (Some(_), Some(owner)) => Some(owner.clone()),
                _ => None,
            }
        };
        if let Some(first) = first {
            return Err(WiringError::Uniqueness {
                name: guarded.clone(),
                first,
                second: ns.name(),
            });
        }

        if let Some(mut meta) = md_node.downcast_mut::<VisibilityMetadata>() {
            meta.namespace = Some(ns.name());
        }
        let node = ns.get(&guarded)?;
        if let Some(mut meta) = md_node.downcast_mut::<VisibilityMetadata>() {
            meta.node = Some(node.clone());
        }
        Ok(node)
    });
    spec.alias(alias, &check_name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrValue;
    use crate::wiring::builder::NamespaceContents;
    use crate::wiring::{build_application, Namespace};

    struct Scope {
        name: String,
        contents: NamespaceContents,
    }

    impl Scope {
        fn node(name: &str) -> NodeRef {
            NodeRef::new(Scope {
                name: name.to_string(),
                contents: NamespaceContents::new(),
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
            tag == NodeTag::Instance
        }
        fn add_node(&mut self, node: NodeRef) {
            self.contents.add_node(node);
        }
        fn add_edge(&mut self, node: NodeRef) {
            self.contents.add_edge(node);
        }
    }

    impl fmt::Display for Scope {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.name)
        }
    }

    fn leaf(name: &'static str) -> impl Fn(&Namespace) -> Result<NodeRef, WiringError> {
        move |_ns| Ok(NodeRef::new(IrValue::new(name, name)))
    }

    #[test]
    fn uniqueness_needs_an_alias() {
        let mut spec = WiringSpec::new("app");
        spec.define("cache", NodeTag::Instance, leaf("cache"));
        require_uniqueness(&mut spec, "cache", NodeTag::Application);
        assert_eq!(spec.errors().len(), 1);
        assert!(matches!(
            spec.errors()[0],
            WiringError::UniquenessNotAlias(_)
        ));
    }

    #[test]
    fn uniqueness_needs_a_target() {
        let mut spec = WiringSpec::new("app");
        spec.alias("handle", "ghost");
        require_uniqueness(&mut spec, "handle", NodeTag::Application);
        assert_eq!(spec.errors().len(), 1);
        assert!(matches!(
            spec.errors()[0],
            WiringError::UniquenessUndefined(_)
        ));
    }

    #[test]
    fn single_namespace_resolution_is_allowed() {
        let mut spec = WiringSpec::new("app");
        spec.define("cache", NodeTag::Instance, leaf("cache"));
        spec.alias("handle", "cache");
        require_uniqueness(&mut spec, "handle", NodeTag::Application);

        let mut seen = Vec::new();
        let app = build_application(spec, "app", &["handle", "handle"]).unwrap();
        for child in &app.children {
            seen.push(child.name());
        }
        // The metadata marker and the guarded node; no duplicate builds.
        assert_eq!(seen, ["cache.visibility", "cache"]);
    }

    #[test]
    fn second_namespace_fails_with_both_names() {
        let mut spec = WiringSpec::new("app");
        spec.define("cache", NodeTag::Instance, leaf("cache"));
        spec.alias("handle", "cache");
        require_uniqueness(&mut spec, "handle", NodeTag::Application);

        // Two scopes racing for the same unique target.
        for scope in ["left", "right"] {
            spec.define(scope, NodeTag::Process, move |ns| {
                let node = Scope::node(scope);
                let child = ns.derive_namespace(scope, &node)?;
                child.get("handle")?;
                Ok(node)
            });
        }

        let err = build_application(spec, "app", &["left", "right"]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("cache is configured to be unique"));
        assert!(message.contains("left"));
        assert!(message.contains("right"));
    }
}
