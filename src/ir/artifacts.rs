//! Artifact generation: plugin contracts and the build driver.
//!
//! Artifact generation is a typed dispatch over the IR tree. Each node that
//! produces output implements one or more small capability traits
//! ([`ArtifactGenerator`], [`ProvidesContainerImage`], ...); workspaces are
//! the mutable collectors those capabilities write into.
//!
//! The [`BuilderRegistry`] is constructed per compile and passed to
//! [`BuilderRegistry::build_all`]. Registration order is the iteration
//! order, which makes output deterministic.

use std::fs;
use std::path::{Path, PathBuf};

use crate::ioutil;
use crate::wiring::error::BuildError;

use super::{remove_variant, ApplicationNode, NodeRef, NodeTag, NodeVariant};

/// Capability for nodes that write artifacts into a directory of their own.
pub trait ArtifactGenerator {
    fn generate_artifacts(&self, dir: &Path) -> Result<(), BuildError>;
}

/// Capability for container nodes that build a local image.
pub trait ProvidesContainerImage {
    /// Add this container's image artifacts to the enclosing workspace.
    fn add_container_artifacts(
        &self,
        workspace: &mut dyn ContainerWorkspace,
    ) -> Result<(), BuildError>;
}

/// Capability for container nodes that declare a runnable instance.
pub trait ProvidesContainerInstance {
    /// Declare this container's instance in the enclosing workspace.
    fn add_container_instance(
        &self,
        workspace: &mut dyn ContainerWorkspace,
    ) -> Result<(), BuildError>;
}

/// Capability for process nodes that contribute code or binaries.
pub trait ProvidesProcessArtifacts {
    /// Add this process's artifacts to the enclosing workspace.
    fn add_process_artifacts(
        &self,
        workspace: &mut dyn ProcessWorkspace,
    ) -> Result<(), BuildError>;
}

/// Capability for process nodes that can be launched.
pub trait ProcessInstantiable {
    /// Declare how this process is run in the enclosing workspace.
    fn add_process_instance(&self, workspace: &mut dyn ProcessWorkspace) -> Result<(), BuildError>;
}

/// A dependency-injection graph under construction for one process.
///
/// Concrete graph builders live with the process plugins; nodes only see
/// this narrow surface.
pub trait InstanceGraph {
    /// Import a package, returning the alias to reference it by.
    fn import(&mut self, path: &str) -> String;

    /// Register a constructor for the named node, in declaration order.
    fn declare(&mut self, name: &str, constructor: &str) -> Result<(), BuildError>;
}

/// Capability for nodes that register themselves in a process's
/// dependency-injection graph.
pub trait ProvidesGraphInstance {
    fn add_graph_instance(&self, graph: &mut dyn InstanceGraph) -> Result<(), BuildError>;
}

/// Metadata about a workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceInfo {
    /// Fully qualified path of the workspace on the local filesystem.
    pub path: PathBuf,
    /// The kind of workspace being built, e.g. `linux` or `docker-compose`.
    pub target: &'static str,
}

/// Receives process artifacts and run commands from process nodes.
///
/// After every process has added its declarations, the owning plugin calls
/// `finish` on the concrete workspace to emit `build.sh` and `run.sh`.
pub trait ProcessWorkspace {
    fn info(&self) -> WorkspaceInfo;

    /// Visit tracking for artifacts shared between nodes.
    fn visited(&mut self, name: &str) -> bool;

    /// Create a subdirectory for a process node to collect its artifacts.
    fn create_process_dir(&mut self, name: &str) -> Result<PathBuf, BuildError>;

    /// Register a build script to be invoked by the workspace's `build.sh`.
    ///
    /// The path must reside within a process dir of this workspace. The
    /// script runs from the directory it resides in.
    fn add_build_script(&mut self, path: &Path) -> Result<(), BuildError>;

    /// Provide the shell function that runs the named process.
    ///
    /// `runfunc` must be a `function name() { ... }` declaration. It can
    /// read any dependency's value from the env var derived from the
    /// dependency's node name, must export an env var named after `name`
    /// once the process is up, and must return a checkable exit code.
    /// Dependencies in `deps` are started first by the generated `run.sh`.
    fn declare_run_command(
        &mut self,
        name: &str,
        runfunc: &str,
        deps: &[NodeRef],
    ) -> Result<(), BuildError>;

    /// Contribute Dockerfile commands for this process.
    ///
    /// Only meaningful when the enclosing workspace builds a container
    /// image; other workspaces ignore the contribution.
    fn add_dockerfile_commands(&mut self, _name: &str, _commands: &str) {}
}

/// Receives container images and instance declarations from container nodes.
pub trait ContainerWorkspace {
    fn info(&self) -> WorkspaceInfo;

    /// Visit tracking for artifacts shared between nodes.
    fn visited(&mut self, name: &str) -> bool;

    /// Create a subdirectory in which a container image is assembled.
    fn create_image_dir(&mut self, image_name: &str) -> Result<PathBuf, BuildError>;

    /// Declare an instance of a prebuilt image, e.g. from a registry.
    fn declare_prebuilt_instance(
        &mut self,
        instance_name: &str,
        image: &str,
        args: &[NodeRef],
    ) -> Result<(), BuildError>;

    /// Declare an instance of an image built from a directory in this
    /// workspace (a path previously returned by `create_image_dir`).
    fn declare_local_image(
        &mut self,
        instance_name: &str,
        image_dir: &str,
        args: &[NodeRef],
    ) -> Result<(), BuildError>;

    /// Set an environment variable on a declared instance.
    fn set_environment_variable(
        &mut self,
        instance_name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), BuildError>;
}

/// A builder that bundles all compatible top-level nodes at once.
///
/// Returns the subset of nodes it handled; the driver removes those from
/// the working set.
pub type NamespaceBuildFn = Box<dyn Fn(&Path, Vec<NodeRef>) -> Result<Vec<NodeRef>, BuildError>>;

/// A builder invoked once per compatible top-level node.
pub type NodeBuildFn = Box<dyn Fn(&Path, &NodeRef) -> Result<(), BuildError>>;

struct NamespaceBuilder {
    name: String,
    tag: NodeTag,
    build: NamespaceBuildFn,
}

struct NodeBuilder {
    name: String,
    tag: NodeTag,
    build: NodeBuildFn,
}

/// Per-compile registry of artifact builders.
///
/// Plugins register namespace builders (many nodes at once, e.g. "bundle
/// stray containers into a compose deployment") and node builders (one node
/// at a time, e.g. "run this deployment's artifact generator"). The driver
/// consults them in registration order.
#[derive(Default)]
pub struct BuilderRegistry {
    namespace_builders: Vec<NamespaceBuilder>,
    node_builders: Vec<NodeBuilder>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        BuilderRegistry::default()
    }

    /// Register a builder for all top-level nodes with the given tag.
    pub fn register_namespace_builder(
        &mut self,
        tag: NodeTag,
        name: &str,
        build: impl Fn(&Path, Vec<NodeRef>) -> Result<Vec<NodeRef>, BuildError> + 'static,
    ) {
        self.namespace_builders.push(NamespaceBuilder {
            name: name.to_string(),
            tag,
            build: Box::new(build),
        });
    }

    /// Register a per-node builder for the given tag.
    pub fn register_node_builder(
        &mut self,
        tag: NodeTag,
        name: &str,
        build: impl Fn(&Path, &NodeRef) -> Result<(), BuildError> + 'static,
    ) {
        self.node_builders.push(NodeBuilder {
            name: name.to_string(),
            tag,
            build: Box::new(build),
        });
    }

    /// Generate all artifacts for an application into `output_dir`.
    ///
    /// The directory must not already exist. Metadata and config nodes are
    /// dropped from the working set first; they are carried by the nodes
    /// that reference them rather than built directly. Any node left after
    /// every registered builder has run is an error.
    pub fn build_all(&self, output_dir: &Path, app: &ApplicationNode) -> Result<(), BuildError> {
        if output_dir.exists() {
            return Err(BuildError::OutputDirExists(output_dir.to_path_buf()));
        }
        fs::create_dir_all(output_dir).map_err(|source| BuildError::CreateDir {
            path: output_dir.to_path_buf(),
            source,
        })?;
        tracing::info!(
            "generating artifacts for {} to {}",
            app.name,
            output_dir.display()
        );

        let mut working = remove_variant(&app.children, NodeVariant::Metadata);
        working = remove_variant(&working, NodeVariant::Config);
        working = remove_variant(&working, NodeVariant::Value);

        for builder in &self.namespace_builders {
            let matched: Vec<NodeRef> = working
                .iter()
                .filter(|n| n.tag() == builder.tag)
                .cloned()
                .collect();
            if matched.is_empty() {
                continue;
            }
            tracing::debug!(
                "namespace builder {} handling {} node(s)",
                builder.name,
                matched.len()
            );
            let handled = (builder.build)(output_dir, matched)?;
            working.retain(|n| !handled.iter().any(|h| h.ptr_eq(n)));
        }

        for builder in &self.node_builders {
            let matched: Vec<NodeRef> = working
                .iter()
                .filter(|n| n.tag() == builder.tag)
                .cloned()
                .collect();
            for node in &matched {
                tracing::debug!("node builder {} building {}", builder.name, node.name());
                (builder.build)(output_dir, node)?;
            }
            working.retain(|n| n.tag() != builder.tag);
        }

        if !working.is_empty() {
            let mut types: Vec<String> = working.iter().map(|n| n.tag().to_string()).collect();
            types.sort();
            types.dedup();
            return Err(BuildError::UnhandledNodeTypes { types });
        }
        Ok(())
    }
}

/// Node builder that dispatches to a node's [`ArtifactGenerator`] capability.
///
/// Creates a subdirectory named after the node and generates into it.
pub fn generate_node_artifacts(output_dir: &Path, node: &NodeRef) -> Result<(), BuildError> {
    let dir = ioutil::create_node_dir(output_dir, &node.name())?;
    let borrowed = node.borrow();
    match borrowed.as_artifact_generator() {
        Some(generator) => generator.generate_artifacts(&dir),
        None => Err(BuildError::UnhandledNodeTypes {
            types: vec![node.tag().to_string()],
        }),
    }
}
