//! Command-line driver for wiring-spec binaries.
//!
//! A binary that ships wiring specs registers each one as a [`SpecOption`]
//! on a [`CmdBuilder`] and hands control to
//! [`make_and_execute`](CmdBuilder::make_and_execute):
//!
//! ```no_run
//! use weave::cmdbuilder::{CmdBuilder, SpecOption};
//!
//! let mut builder = CmdBuilder::new("demo");
//! builder.add(SpecOption {
//!     name: "docker",
//!     description: "compose deployment of the demo services",
//!     build: |_spec| {
//!         // wiring calls...
//!         vec!["docker".to_string()]
//!     },
//! });
//! builder.make_and_execute();
//! ```
//!
//! The driver exposes `build` (compile a spec to an output directory),
//! `specs` (list the registry), and `inspect` (evaluate a spec and print the
//! IR tree, optionally as JSON). It exits 0 on success, 1 for argument
//! errors, and 2 when a compile fails.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::Level;

use crate::ir::{ApplicationNode, NodeRef};
use crate::plugins;
use crate::wiring::{build_application, WiringSpec};

/// A named wiring spec a binary offers for compilation.
pub struct SpecOption {
    pub name: &'static str,
    pub description: &'static str,
    /// Declares the spec's definitions and returns the root names to build;
    /// an empty list builds every definition.
    pub build: fn(&mut WiringSpec) -> Vec<String>,
}

/// Registry of wiring specs behind a `clap` command line.
///
/// [`evaluate`](CmdBuilder::evaluate) and [`build`](CmdBuilder::build) are
/// also usable programmatically; only
/// [`make_and_execute`](CmdBuilder::make_and_execute) touches process-wide
/// state (argv, the tracing subscriber, the exit code).
pub struct CmdBuilder {
    app_name: String,
    registry: BTreeMap<&'static str, SpecOption>,
}

#[derive(Parser)]
#[command(about = "Compile wiring specs into deployment artifacts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a wiring spec to deployment artifacts
    Build {
        /// Wiring spec to compile; see `specs` for the catalog
        #[arg(short = 'w', long = "spec")]
        spec: String,

        /// Target output directory; must not already exist
        #[arg(short = 'o', long = "output")]
        output: PathBuf,

        /// Suppress compile progress, keeping errors
        #[arg(long)]
        quiet: bool,
    },

    /// List the wiring specs this binary can compile
    Specs,

    /// Evaluate a wiring spec and print its IR tree
    Inspect {
        /// Wiring spec to evaluate
        #[arg(short = 'w', long = "spec")]
        spec: String,

        /// Print a JSON summary instead of the tree
        #[arg(long)]
        json: bool,
    },
}

impl CmdBuilder {
    pub fn new(app_name: &str) -> CmdBuilder {
        CmdBuilder {
            app_name: app_name.to_string(),
            registry: BTreeMap::new(),
        }
    }

    /// Register a wiring spec. A later registration under the same name
    /// replaces the earlier one.
    pub fn add(&mut self, spec: SpecOption) {
        self.registry.insert(spec.name, spec);
    }

    /// Look up a registered spec by name.
    pub fn spec(&self, name: &str) -> Option<&SpecOption> {
        self.registry.get(name)
    }

    /// The registry as catalog lines, sorted by spec name.
    pub fn list(&self) -> String {
        let mut out = String::new();
        for option in self.registry.values() {
            let _ = writeln!(out, "  {}: {}", option.name, option.description);
        }
        out
    }

    /// Evaluate the named spec into an application IR tree.
    pub fn evaluate(&self, spec_name: &str) -> anyhow::Result<ApplicationNode> {
        let option = self.spec(spec_name).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown wiring spec {:?}, expected one of:\n{}",
                spec_name,
                self.list()
            )
        })?;
        let mut wiring = WiringSpec::new(&self.app_name);
        let roots = (option.build)(&mut wiring);
        tracing::info!(
            "constructed {}-{} wiring spec:\n{}",
            self.app_name,
            spec_name,
            wiring
        );
        let roots: Vec<&str> = roots.iter().map(String::as_str).collect();
        let app = build_application(wiring, &self.app_name, &roots)
            .with_context(|| format!("unable to build {}-{} wiring", self.app_name, spec_name))?;
        tracing::info!("built {}-{} IR:\n{}", self.app_name, spec_name, app);
        Ok(app)
    }

    /// Compile the named spec and generate its artifacts into `output_dir`.
    pub fn build(&self, spec_name: &str, output_dir: &Path) -> anyhow::Result<()> {
        let app = self.evaluate(spec_name)?;
        plugins::standard_registry()
            .build_all(output_dir, &app)
            .with_context(|| {
                format!(
                    "unable to generate {}-{} artifacts",
                    self.app_name, spec_name
                )
            })?;
        tracing::info!(
            "compiled {}-{} to {}",
            self.app_name,
            spec_name,
            output_dir.display()
        );
        Ok(())
    }

    fn inspect(&self, spec_name: &str, json: bool) -> anyhow::Result<()> {
        let app = self.evaluate(spec_name)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&app_summary(&app))?);
        } else {
            println!("{app}");
        }
        Ok(())
    }

    /// Parse the process command line, run the selected subcommand, and
    /// exit: 0 on success, 1 for argument errors, 2 when the compile fails.
    pub fn make_and_execute(self) -> ! {
        let cli = Cli::try_parse().unwrap_or_else(|err| {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            process::exit(code);
        });

        match cli.command {
            Commands::Specs => {
                print!("{}", self.list());
                process::exit(0);
            }
            Commands::Build {
                spec,
                output,
                quiet,
            } => {
                init_logging(quiet);
                if self.spec(&spec).is_none() {
                    tracing::error!(
                        "unknown wiring spec {:?}, expected one of:\n{}",
                        spec,
                        self.list()
                    );
                    process::exit(1);
                }
                if let Err(err) = self.build(&spec, &output) {
                    tracing::error!("{:#}", err);
                    process::exit(2);
                }
                process::exit(0);
            }
            Commands::Inspect { spec, json } => {
                init_logging(false);
                if self.spec(&spec).is_none() {
                    tracing::error!(
                        "unknown wiring spec {:?}, expected one of:\n{}",
                        spec,
                        self.list()
                    );
                    process::exit(1);
                }
                if let Err(err) = self.inspect(&spec, json) {
                    tracing::error!("{:#}", err);
                    process::exit(2);
                }
                process::exit(0);
            }
        }
    }
}

/// Install the fmt subscriber on stderr so compile progress never mixes
/// with printed artifacts. Logging stays quiet if a subscriber is already
/// installed.
fn init_logging(quiet: bool) {
    let level = if quiet { Level::ERROR } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// JSON shape of `inspect --json`: the application plus one entry per IR
/// node, with namespace membership nested under `children`.
#[derive(Serialize)]
struct AppSummary {
    application: String,
    nodes: Vec<NodeSummary>,
}

#[derive(Serialize)]
struct NodeSummary {
    name: String,
    tag: String,
    variant: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<NodeSummary>,
}

fn app_summary(app: &ApplicationNode) -> AppSummary {
    AppSummary {
        application: app.name.clone(),
        nodes: app.children.iter().map(node_summary).collect(),
    }
}

fn node_summary(node: &NodeRef) -> NodeSummary {
    NodeSummary {
        name: node.name(),
        tag: node.tag().to_string(),
        variant: node.variant().to_string(),
        children: node.contained().iter().map(node_summary).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{goproc, workflow};
    use serde_json::json;

    fn demo_builder() -> CmdBuilder {
        let mut builder = CmdBuilder::new("app");
        builder.add(SpecOption {
            name: "toy",
            description: "one service, no deployment tiers",
            build: |spec| {
                let a = workflow::service(spec, "a", "EchoService", &[]);
                vec![a]
            },
        });
        builder
    }

    #[test]
    fn specs_are_listed_sorted_with_descriptions() {
        let mut builder = demo_builder();
        builder.add(SpecOption {
            name: "alpha",
            description: "first",
            build: |_spec| Vec::new(),
        });
        assert_eq!(
            builder.list(),
            "  alpha: first\n  toy: one service, no deployment tiers\n"
        );
    }

    #[test]
    fn unknown_specs_are_reported_with_the_catalog() {
        let builder = demo_builder();
        let err = builder.evaluate("nope").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown wiring spec \"nope\""));
        assert!(message.contains("  toy: one service, no deployment tiers"));
    }

    #[test]
    fn evaluate_builds_the_ir_tree() {
        let builder = demo_builder();
        let app = builder.evaluate("toy").unwrap();
        assert_eq!(app.name, "app");
        assert_eq!(app.children.len(), 1);
        assert_eq!(app.children[0].name(), "a.handler");
    }

    #[test]
    fn json_summary_lists_root_nodes() {
        let builder = demo_builder();
        let app = builder.evaluate("toy").unwrap();
        let summary = serde_json::to_value(app_summary(&app)).unwrap();
        assert_eq!(
            summary,
            json!({
                "application": "app",
                "nodes": [
                    {"name": "a.handler", "tag": "instance", "variant": "plain"}
                ]
            })
        );
    }

    #[test]
    fn json_summary_descends_into_namespaces() {
        let mut builder = CmdBuilder::new("app");
        builder.add(SpecOption {
            name: "proc",
            description: "one service in a process",
            build: |spec| {
                workflow::service(spec, "a", "EchoService", &[]);
                vec![goproc::deploy(spec, "a")]
            },
        });
        let app = builder.evaluate("proc").unwrap();
        let summary = serde_json::to_value(app_summary(&app)).unwrap();
        assert_eq!(
            summary,
            json!({
                "application": "app",
                "nodes": [
                    {
                        "name": "a_proc",
                        "tag": "process",
                        "variant": "plain",
                        "children": [
                            {"name": "a.handler", "tag": "instance", "variant": "plain"}
                        ]
                    }
                ]
            })
        );
    }
}
