//! The wiring spec: a registry of named definitions, aliases, and properties.
//!
//! A wiring spec is the declarative input to the compiler. Nothing is built
//! at declaration time; definitions carry a build function that runs when a
//! namespace first resolves the name during [`build_application`].
//!
//! [`build_application`]: super::namespace::build_application

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use crate::address::AddressDef;
use crate::ir::{NodeRef, NodeTag};
use crate::pointer::PointerDef;

use super::error::WiringError;
use super::namespace::Namespace;

/// A value attached to a definition property.
#[derive(Clone)]
pub enum PropertyValue {
    /// A plain string, usually another definition's name.
    Str(String),
    /// The pointer bookkeeping for a pointer definition.
    Pointer(Rc<RefCell<PointerDef>>),
    /// The address bookkeeping for an address definition.
    Address(Rc<AddressDef>),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Str(s) => f.write_str(s),
            PropertyValue::Pointer(p) => write!(f, "{}", p.borrow()),
            PropertyValue::Address(a) => f.write_str(&a.name),
        }
    }
}

/// Options controlling how a definition behaves during resolution.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefOptions {
    /// Proxy definitions forward resolution to another node. The node they
    /// return is cached under the proxy's name but never hosted in a
    /// namespace or recorded as an edge.
    pub proxy: bool,
}

/// The build function of a definition, run in the namespace that accepts it.
pub type BuildFn = Rc<dyn Fn(&Namespace) -> Result<NodeRef, WiringError>>;

/// A named definition in the wiring spec.
pub struct Definition {
    pub name: String,
    /// Placement tier; namespaces accept or reject the definition by tag.
    pub tag: NodeTag,
    pub options: DefOptions,
    /// Named lists of values. Properties survive redefinition, which lets
    /// helpers attach bookkeeping before or after the definition itself.
    pub properties: BTreeMap<String, Vec<PropertyValue>>,
    pub build: BuildFn,
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let props = self
            .properties
            .iter()
            .map(|(key, values)| {
                let joined = values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{key}={joined}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} = {}({props})", self.name, self.tag)
    }
}

/// The declarative wiring of an application.
pub struct WiringSpec {
    name: String,
    defs: BTreeMap<String, Definition>,
    aliases: BTreeMap<String, String>,
    errors: Vec<WiringError>,
}

impl WiringSpec {
    pub fn new(name: &str) -> Self {
        WiringSpec {
            name: name.to_string(),
            defs: BTreeMap::new(),
            aliases: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add or replace a definition.
    ///
    /// Replacing keeps any properties already attached to the name. A
    /// redefinition that changes the tag is recorded on the error channel.
    /// Any alias with the same name is removed.
    pub fn define(
        &mut self,
        name: &str,
        tag: NodeTag,
        build: impl Fn(&Namespace) -> Result<NodeRef, WiringError> + 'static,
    ) {
        self.define_with(name, tag, DefOptions::default(), build);
    }

    /// [`define`](WiringSpec::define) with explicit options.
    pub fn define_with(
        &mut self,
        name: &str,
        tag: NodeTag,
        options: DefOptions,
        build: impl Fn(&Namespace) -> Result<NodeRef, WiringError> + 'static,
    ) {
        self.aliases.remove(name);
        if let Some(def) = self.defs.get_mut(name) {
            if def.tag != tag {
                let err = WiringError::Redefinition {
                    name: name.to_string(),
                    old_tag: def.tag.to_string(),
                    new_tag: tag.to_string(),
                };
                def.tag = tag;
                def.options = options;
                def.build = Rc::new(build);
                self.errors.push(err);
            } else {
                def.tag = tag;
                def.options = options;
                def.build = Rc::new(build);
            }
            return;
        }
        self.defs.insert(
            name.to_string(),
            Definition {
                name: name.to_string(),
                tag,
                options,
                properties: BTreeMap::new(),
                build: Rc::new(build),
            },
        );
    }

    /// Make `alias` resolve to whatever `points_to` resolves to.
    ///
    /// Any existing definition named `alias` is removed.
    pub fn alias(&mut self, alias: &str, points_to: &str) {
        self.defs.remove(alias);
        self.aliases
            .insert(alias.to_string(), points_to.to_string());
    }

    /// The direct alias target of `name`, if `name` is an alias.
    pub fn get_alias(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(|s| s.as_str())
    }

    /// Follow the alias chain from `name` to a definition.
    ///
    /// Returns `None` for undefined names and for alias chains that never
    /// reach a definition (including alias loops).
    pub fn get_def(&self, name: &str) -> Option<&Definition> {
        let mut current = name;
        let mut seen = BTreeSet::new();
        while let Some(target) = self.aliases.get(current) {
            if !seen.insert(current) {
                return None;
            }
            current = target;
        }
        self.defs.get(current)
    }

    /// All definition names, in sorted order.
    pub fn def_names(&self) -> Vec<String> {
        self.defs.keys().cloned().collect()
    }

    /// Replace the property `key` of `name` with a single value.
    ///
    /// The definition is created as a placeholder if it does not exist yet;
    /// a later [`define`](WiringSpec::define) fills it in and keeps the
    /// property.
    pub fn set_property(&mut self, name: &str, key: &str, value: PropertyValue) {
        let def = self.def_for_properties(name);
        def.properties.insert(key.to_string(), vec![value]);
    }

    /// Append a value to the property list `key` of `name`.
    pub fn add_property(&mut self, name: &str, key: &str, value: PropertyValue) {
        let def = self.def_for_properties(name);
        def.properties
            .entry(key.to_string())
            .or_default()
            .push(value);
    }

    /// The first value of property `key` on the definition directly named
    /// `name`, if any. Aliases are not followed.
    pub fn get_property(&self, name: &str, key: &str) -> Option<PropertyValue> {
        self.defs
            .get(name)
            .and_then(|def| def.properties.get(key))
            .and_then(|values| values.first())
            .cloned()
    }

    /// All values of property `key` on `name`; empty if absent.
    pub fn get_properties(&self, name: &str, key: &str) -> Vec<PropertyValue> {
        self.defs
            .get(name)
            .and_then(|def| def.properties.get(key))
            .cloned()
            .unwrap_or_default()
    }

    /// All values of property `key` on `name` as strings.
    ///
    /// Any non-string value is a [`WiringError::PropertyType`].
    pub fn string_properties(&self, name: &str, key: &str) -> Result<Vec<String>, WiringError> {
        self.get_properties(name, key)
            .into_iter()
            .map(|value| match value {
                PropertyValue::Str(s) => Ok(s),
                _ => Err(WiringError::PropertyType {
                    name: name.to_string(),
                    key: key.to_string(),
                    expected: "string",
                }),
            })
            .collect()
    }

    /// Record an error without aborting declaration.
    ///
    /// Accumulated errors fail the build before any namespace runs, so
    /// several declaration mistakes can be reported per run.
    pub fn add_error(&mut self, err: WiringError) {
        self.errors.push(err);
    }

    /// The accumulated declaration errors.
    pub fn errors(&self) -> &[WiringError] {
        &self.errors
    }

    fn def_for_properties(&mut self, name: &str) -> &mut Definition {
        if !self.defs.contains_key(name) {
            self.aliases.remove(name);
        }
        let owned = name.to_string();
        self.defs.entry(name.to_string()).or_insert_with(|| Definition {
            name: name.to_string(),
            tag: NodeTag::Application,
            options: DefOptions::default(),
            properties: BTreeMap::new(),
            // Placeholder until a real define arrives; resolving a
            // property-only name is an error.
            build: Rc::new(move |ns: &Namespace| {
                Err(WiringError::Undefined {
                    name: owned.clone(),
                    namespace: ns.name(),
                })
            }),
        })
    }
}

impl fmt::Display for WiringSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} = WiringSpec {{", self.name)?;
        for def in self.defs.values() {
            writeln!(f, "  {def}")?;
        }
        for (alias, target) in &self.aliases {
            writeln!(f, "  {alias} -> {target}")?;
        }
        write!(f, "}}")
    }
}
