//! Weave: a compiler from declarative wiring specs to deployable artifacts.
//!
//! An application is declared once as a [`WiringSpec`]: workflow services,
//! the modifiers wrapped around them (RPC, retries, timeouts), and the
//! processes, containers, and deployments they are placed in. Evaluating
//! the spec produces an IR tree of placed nodes, and the artifact driver
//! turns that tree into source code, Dockerfiles, compose files, or
//! Kubernetes manifests.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Weave Compiler             │
//! │                                         │
//! │  wiring   - specs, namespaces, eval     │
//! │  pointer  - client/server indirection   │
//! │  address  - bind/dial configs, ports    │
//! │  ir       - placed-node tree            │
//! │  plugins  - services, RPC, tiers        │
//! │                                         │
//! ├─────────────────────────────────────────┤
//! │   Artifacts (Go sources, compose, k8s)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Wiring
//!
//! Plugins extend the spec with plain functions; a two-service app over
//! gRPC in a compose deployment is wired as:
//!
//! ```
//! use weave::plugins::{dockercompose, goproc, grpc, linuxcontainer, workflow};
//! use weave::wiring::{build_application, WiringSpec};
//!
//! let mut spec = WiringSpec::new("app");
//! let a = workflow::service(&mut spec, "a", "EchoService", &[]);
//! grpc::deploy(&mut spec, &a);
//! let b = workflow::service(&mut spec, "b", "FrontendService", &[&a]);
//! grpc::deploy(&mut spec, &b);
//! for svc in ["a", "b"] {
//!     let proc_name = goproc::deploy(&mut spec, svc);
//!     linuxcontainer::deploy(&mut spec, &proc_name);
//! }
//! dockercompose::create_deployment(&mut spec, "docker", &["a_proc_ctr", "b_proc_ctr"]);
//!
//! let app = build_application(spec, "app", &["docker"]).unwrap();
//! ```

pub mod address;
pub mod cmdbuilder;
pub mod ioutil;
pub mod ir;
pub mod plugins;
pub mod pointer;
pub mod stringutil;
pub mod wiring;

pub use ir::{ApplicationNode, NodeRef};
pub use wiring::{build_application, BuildError, WiringError, WiringSpec};
