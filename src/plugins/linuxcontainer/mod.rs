//! Linux containers: the namespace tier that groups processes into a
//! deployable unit.
//!
//! Wiring specs place processes into a container with [`create_container`]
//! or the shorthand [`deploy`], which derives the container name by
//! replacing a `_service` suffix with `_ctr`. At artifact time a container
//! collects every process's artifacts into per-process subdirectories and
//! emits a `build.sh` and `run.sh` at its root. When the container is
//! built as a Docker image it additionally emits a `Dockerfile`, and
//! processes may contribute their own build stages to it.
//!
//! Containers are also the default builder for process nodes left at the
//! application root; see [`build_processes`].

use std::fmt;
use std::path::{Path, PathBuf};

use crate::ioutil;
use crate::ir::artifacts::{
    ArtifactGenerator, ContainerWorkspace, ProcessWorkspace, ProvidesContainerImage,
    ProvidesContainerInstance, WorkspaceInfo,
};
use crate::ir::visit::VisitTracker;
use crate::ir::{pretty_print_namespace, IrNode, NamespaceHandler, NodeRef, NodeTag};
use crate::stringutil;
use crate::wiring::builder::{self, NamespaceContents};
use crate::wiring::error::BuildError;
use crate::wiring::WiringSpec;

mod docker;
mod scripts;

pub use docker::Dockerfile;
pub use scripts::{BuildScript, RunScript};

/// Deploy a process-level service into its own container.
///
/// The container name is derived by replacing a `_service` suffix with
/// `_ctr` (`user_service` becomes `user_ctr`; `user` becomes `user_ctr`).
/// Returns the container name.
pub fn deploy(spec: &mut WiringSpec, service_name: &str) -> String {
    let prefix = service_name.strip_suffix("_service").unwrap_or(service_name);
    let ctr_name = format!("{prefix}_ctr");
    create_container(spec, &ctr_name, &[service_name]);
    ctr_name
}

/// Define a container named `ctr_name` hosting the given children.
///
/// More processes can be added later with [`add_to_container`]. Returns
/// the container name.
pub fn create_container(spec: &mut WiringSpec, ctr_name: &str, children: &[&str]) -> String {
    for child in children {
        add_to_container(spec, ctr_name, child);
    }
    let name = ctr_name.to_string();
    spec.define(ctr_name, NodeTag::Container, move |ns| {
        let node = NodeRef::new(Container::new(&name));
        builder::instantiate_namespace(ns, &node)?;
        Ok(node)
    });
    ctr_name.to_string()
}

/// Add a process to an existing container definition.
pub fn add_to_container(spec: &mut WiringSpec, ctr_name: &str, child_name: &str) {
    builder::add_node_to(spec, NodeTag::Container, ctr_name, child_name);
}

/// Collect stray process nodes into a default container workspace.
///
/// Registered as the namespace builder for process nodes left at the
/// application root. The workspace is named `linux` and generates into a
/// directory of the same name.
pub fn build_processes(dir: &Path, nodes: Vec<NodeRef>) -> Result<Vec<NodeRef>, BuildError> {
    let mut ctr = Container::new("linux");
    for node in &nodes {
        ctr.contents.add_node(node.clone());
    }
    let ctr_dir = ioutil::create_node_dir(dir, "linux")?;
    ctr.generate_artifacts(&ctr_dir)?;
    Ok(nodes)
}

/// IR node for a linux container hosting process nodes.
pub struct Container {
    name: String,
    image_name: String,
    contents: NamespaceContents,
}

impl Container {
    fn new(name: &str) -> Container {
        Container {
            name: name.to_string(),
            image_name: stringutil::clean_name(name),
            contents: NamespaceContents::new(),
        }
    }

    /// Collect artifacts and run commands from every contained process.
    ///
    /// Shared between the plain filesystem output and the Docker image
    /// output; the workspace decides what `finish` emits.
    fn generate_into(&self, workspace: &mut dyn ProcessWorkspace) -> Result<(), BuildError> {
        for child in &self.contents.contained_nodes {
            let borrowed = child.borrow();
            if let Some(artifacts) = borrowed.as_process_artifacts() {
                artifacts.add_process_artifacts(workspace)?;
            }
        }
        for child in &self.contents.contained_nodes {
            let borrowed = child.borrow();
            if let Some(instance) = borrowed.as_process_instance() {
                instance.add_process_instance(workspace)?;
            }
        }
        Ok(())
    }
}

impl IrNode for Container {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> NodeTag {
        NodeTag::Container
    }

    fn contained(&self) -> Vec<NodeRef> {
        self.contents.contained_nodes.clone()
    }

    fn as_namespace_handler(&self) -> Option<&dyn NamespaceHandler> {
        Some(self)
    }

    fn as_namespace_handler_mut(&mut self) -> Option<&mut dyn NamespaceHandler> {
        Some(self)
    }

    fn as_artifact_generator(&self) -> Option<&dyn ArtifactGenerator> {
        Some(self)
    }

    fn as_image_provider(&self) -> Option<&dyn ProvidesContainerImage> {
        Some(self)
    }

    fn as_instance_provider(&self) -> Option<&dyn ProvidesContainerInstance> {
        Some(self)
    }
}

impl NamespaceHandler for Container {
    fn accepts(&self, tag: NodeTag) -> bool {
        tag == NodeTag::Process
    }

    fn add_node(&mut self, node: NodeRef) {
        self.contents.add_node(node);
    }

    fn add_edge(&mut self, node: NodeRef) {
        self.contents.add_edge(node);
    }
}

impl ArtifactGenerator for Container {
    /// Write the container's processes and scripts into `dir` for running
    /// directly on the local machine.
    fn generate_artifacts(&self, dir: &Path) -> Result<(), BuildError> {
        tracing::info!(
            "collecting process artifacts for {} in {}",
            self.name,
            dir.display()
        );
        let mut workspace = BasicWorkspace::new(&self.name, dir);
        for arg in &self.contents.arg_nodes {
            workspace.require(arg);
        }
        self.generate_into(&mut workspace)?;
        workspace.finish()
    }
}

impl ProvidesContainerImage for Container {
    /// Assemble the container image directory, Dockerfile included.
    fn add_container_artifacts(
        &self,
        target: &mut dyn ContainerWorkspace,
    ) -> Result<(), BuildError> {
        if target.visited(&format!("{}.artifacts", self.image_name)) {
            return Ok(());
        }
        tracing::info!("creating container image {}", self.name);
        let dir = target.create_image_dir(&self.image_name)?;
        let mut workspace = DockerWorkspace::new(&self.name, &dir);
        for arg in &self.contents.arg_nodes {
            workspace.require(arg);
        }
        self.generate_into(&mut workspace)?;
        workspace.finish()
    }
}

impl ProvidesContainerInstance for Container {
    fn add_container_instance(
        &self,
        target: &mut dyn ContainerWorkspace,
    ) -> Result<(), BuildError> {
        if target.visited(&format!("{}.instance", self.name)) {
            return Ok(());
        }
        tracing::info!("declaring container instance {}", self.name);
        target.declare_local_image(&self.name, &self.image_name, &self.contents.arg_nodes)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&pretty_print_namespace(
            &self.name,
            "LinuxContainer",
            &self.contents.arg_nodes,
            &self.contents.contained_nodes,
        ))
    }
}

/// Workspace writing processes to a plain output directory.
///
/// Gathers each process's artifacts into a subdirectory, collects run
/// commands and build scripts, and emits a root `build.sh` and `run.sh`.
/// The user invokes the scripts directly.
pub struct BasicWorkspace {
    info: WorkspaceInfo,
    visited: VisitTracker,
    build: BuildScript,
    run: RunScript,
}

impl BasicWorkspace {
    pub fn new(name: &str, dir: &Path) -> BasicWorkspace {
        BasicWorkspace {
            info: WorkspaceInfo {
                path: dir.to_path_buf(),
                target: "basic",
            },
            visited: VisitTracker::new(),
            build: BuildScript::new(dir),
            run: RunScript::new(name, dir),
        }
    }

    /// Record a node whose env var the run script must check for.
    pub fn require(&mut self, node: &NodeRef) {
        self.run.require(node);
    }

    /// Emit `build.sh` and `run.sh` at the workspace root.
    pub fn finish(&self) -> Result<(), BuildError> {
        self.build.generate()?;
        self.run.generate()
    }
}

impl ProcessWorkspace for BasicWorkspace {
    fn info(&self) -> WorkspaceInfo {
        self.info.clone()
    }

    fn visited(&mut self, name: &str) -> bool {
        self.visited.visited(name)
    }

    fn create_process_dir(&mut self, name: &str) -> Result<PathBuf, BuildError> {
        ioutil::create_node_dir(&self.info.path, name)
    }

    fn add_build_script(&mut self, path: &Path) -> Result<(), BuildError> {
        self.build.add(path)
    }

    fn declare_run_command(
        &mut self,
        name: &str,
        runfunc: &str,
        deps: &[NodeRef],
    ) -> Result<(), BuildError> {
        self.run.add(name, runfunc, deps)
    }
}

/// Workspace assembling a Docker image directory.
///
/// Extends [`BasicWorkspace`] with a Dockerfile; processes may replace
/// their part of the default image build with custom stages.
pub struct DockerWorkspace {
    base: BasicWorkspace,
    dockerfile: Dockerfile,
}

impl DockerWorkspace {
    pub fn new(name: &str, dir: &Path) -> DockerWorkspace {
        let mut base = BasicWorkspace::new(name, dir);
        base.info.target = "docker";
        DockerWorkspace {
            base,
            dockerfile: Dockerfile::new(dir),
        }
    }

    /// Record a node whose env var the run script must check for.
    pub fn require(&mut self, node: &NodeRef) {
        self.base.require(node);
    }

    /// Emit the scripts and the `Dockerfile` at the workspace root.
    pub fn finish(&self) -> Result<(), BuildError> {
        self.base.finish()?;
        self.dockerfile.generate()
    }
}

impl ProcessWorkspace for DockerWorkspace {
    fn info(&self) -> WorkspaceInfo {
        self.base.info()
    }

    fn visited(&mut self, name: &str) -> bool {
        self.base.visited(name)
    }

    fn create_process_dir(&mut self, name: &str) -> Result<PathBuf, BuildError> {
        self.base.create_process_dir(name)
    }

    fn add_build_script(&mut self, path: &Path) -> Result<(), BuildError> {
        self.base.add_build_script(path)
    }

    fn declare_run_command(
        &mut self,
        name: &str,
        runfunc: &str,
        deps: &[NodeRef],
    ) -> Result<(), BuildError> {
        self.base.declare_run_command(name, runfunc, deps)
    }

    fn add_dockerfile_commands(&mut self, name: &str, commands: &str) {
        self.dockerfile.add_custom_commands(name, commands);
    }
}
