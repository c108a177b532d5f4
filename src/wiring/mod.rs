//! The declarative wiring layer: specs, namespaces, and evaluation.
//!
//! Applications are declared as a [`WiringSpec`], a registry of named
//! definitions that know how to build their IR node on demand.
//! [`build_application`] evaluates the spec into an IR tree by resolving
//! root names inside namespaces; [`builder`] carries the helpers plugins use
//! to declare namespace membership.

pub mod builder;
pub mod error;
pub mod namespace;
pub mod spec;

pub use error::{BuildError, WiringError};
pub use namespace::{build_application, DeferOpts, Namespace};
pub use spec::{BuildFn, DefOptions, Definition, PropertyValue, WiringSpec};
