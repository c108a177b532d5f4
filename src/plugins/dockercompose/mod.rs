//! Docker Compose: the deployment tier that groups containers into one
//! docker-compose application.
//!
//! Wiring specs collect containers with [`create_deployment`] and
//! [`add_to_deployment`]. At artifact time the deployment gathers every
//! container's image directory and instance declaration, allocates ports
//! across the whole deployment, wires bind and dial addresses up as
//! environment variables, and emits a `docker-compose.yml` plus sourceable
//! `.env` / `.local.env` files one directory above it.
//!
//! Compose is also the default builder for container nodes left at the
//! application root; see [`build_containers`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::address::{ports, BindConfig, DialConfig};
use crate::ioutil;
use crate::ir::artifacts::{ArtifactGenerator, ContainerWorkspace, WorkspaceInfo};
use crate::ir::visit::VisitTracker;
use crate::ir::{pretty_print_namespace, IrNode, NamespaceHandler, NodeRef, NodeTag};
use crate::stringutil;
use crate::wiring::builder::{self, NamespaceContents};
use crate::wiring::error::BuildError;
use crate::wiring::WiringSpec;

mod composefile;

pub use composefile::{ComposeFile, EnvFiles};

/// Define a compose deployment named `deployment_name` hosting the given
/// containers.
///
/// More containers can be added later with [`add_to_deployment`]. Returns
/// the deployment name.
pub fn create_deployment(
    spec: &mut WiringSpec,
    deployment_name: &str,
    containers: &[&str],
) -> String {
    for container in containers {
        add_to_deployment(spec, deployment_name, container);
    }
    let name = deployment_name.to_string();
    spec.define(deployment_name, NodeTag::Deployment, move |ns| {
        let node = NodeRef::new(Deployment::new(&name));
        builder::instantiate_namespace(ns, &node)?;
        Ok(node)
    });
    deployment_name.to_string()
}

/// Add a container to an existing deployment definition.
pub fn add_to_deployment(spec: &mut WiringSpec, deployment_name: &str, child_name: &str) {
    builder::add_node_to(spec, NodeTag::Deployment, deployment_name, child_name);
}

/// Collect stray container nodes into a default compose deployment.
///
/// Registered as the namespace builder for container nodes left at the
/// application root. The deployment is named `docker` and generates into a
/// directory of the same name; its env files land at the output root.
pub fn build_containers(dir: &Path, nodes: Vec<NodeRef>) -> Result<Vec<NodeRef>, BuildError> {
    let mut deployment = Deployment::new("docker");
    for node in &nodes {
        deployment.contents.add_node(node.clone());
    }
    let deploy_dir = ioutil::create_node_dir(dir, "docker")?;
    deployment.generate_artifacts(&deploy_dir)?;
    Ok(nodes)
}

/// IR node for a docker-compose deployment hosting container nodes.
pub struct Deployment {
    name: String,
    contents: NamespaceContents,
}

impl Deployment {
    fn new(name: &str) -> Deployment {
        Deployment {
            name: name.to_string(),
            contents: NamespaceContents::new(),
        }
    }

    /// Collect image directories and instance declarations from every
    /// contained container.
    fn generate_into(&self, workspace: &mut ComposeWorkspace) -> Result<(), BuildError> {
        for child in &self.contents.contained_nodes {
            let borrowed = child.borrow();
            if let Some(image) = borrowed.as_image_provider() {
                image.add_container_artifacts(workspace)?;
            }
        }
        for child in &self.contents.contained_nodes {
            let borrowed = child.borrow();
            if let Some(instance) = borrowed.as_instance_provider() {
                instance.add_container_instance(workspace)?;
            }
        }
        Ok(())
    }
}

impl IrNode for Deployment {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> NodeTag {
        NodeTag::Deployment
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
}

impl NamespaceHandler for Deployment {
    fn accepts(&self, tag: NodeTag) -> bool {
        tag == NodeTag::Container
    }

    fn add_node(&mut self, node: NodeRef) {
        self.contents.add_node(node);
    }

    fn add_edge(&mut self, node: NodeRef) {
        self.contents.add_edge(node);
    }
}

impl ArtifactGenerator for Deployment {
    fn generate_artifacts(&self, dir: &Path) -> Result<(), BuildError> {
        tracing::info!(
            "collecting container instances for deployment {} in {}",
            self.name,
            dir.display()
        );
        let mut workspace = ComposeWorkspace::new(&self.name, dir);
        self.generate_into(&mut workspace)?;
        workspace.finish()
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&pretty_print_namespace(
            &self.name,
            "DockerCompose",
            &self.contents.arg_nodes,
            &self.contents.contained_nodes,
        ))
    }
}

/// Workspace assembling a docker-compose application.
///
/// Containers declare their images and instances through the
/// [`ContainerWorkspace`] trait; `finish` then runs the address pass over
/// the accumulated instance arguments and writes the compose and env files.
pub struct ComposeWorkspace {
    info: WorkspaceInfo,
    /// Directory the env files are written to, one level above the compose
    /// file so they sit at the root of the compiled output.
    env_dir: PathBuf,
    visited: VisitTracker,
    instance_args: BTreeMap<String, Vec<NodeRef>>,
    compose: ComposeFile,
}

impl ComposeWorkspace {
    pub fn new(name: &str, dir: &Path) -> ComposeWorkspace {
        ComposeWorkspace {
            info: WorkspaceInfo {
                path: dir.to_path_buf(),
                target: "docker-compose",
            },
            env_dir: dir.parent().unwrap_or(dir).to_path_buf(),
            visited: VisitTracker::new(),
            instance_args: BTreeMap::new(),
            compose: ComposeFile::new(name, dir),
        }
    }

    /// Resolve addresses and emit the compose and env files.
    pub fn finish(&mut self) -> Result<(), BuildError> {
        let env = self.process_arg_nodes()?;
        self.compose.generate()?;
        env.generate(&self.env_dir)
    }

    /// Turn each instance's argument nodes into environment variables.
    ///
    /// Plain configs without a hardcoded value pass through from the
    /// calling environment. Bind configs get ports allocated across the
    /// whole deployment, surface inside their container, and are published
    /// on a host port the user picks via the same variable. Dials to
    /// servers bound in this deployment resolve to the service's compose
    /// DNS name; all other dials pass through.
    fn process_arg_nodes(&mut self) -> Result<EnvFiles, BuildError> {
        let mut env = EnvFiles::new();

        for (instance, args) in &self.instance_args {
            let (_, _, rest) = ports::split(args);
            for arg in &rest {
                let borrowed = arg.borrow();
                let Some(config) = borrowed.as_config() else {
                    return Err(BuildError::InvalidInstanceArg {
                        instance: instance.clone(),
                        arg: arg.name(),
                    });
                };
                // A config with a value is hardcoded inside the container.
                if !config.has_value() {
                    self.compose
                        .passthrough_env_var(instance, &arg.name(), config.optional())?;
                }
            }
        }

        // Ports are allocated across the whole deployment so no two
        // services collide on the compose network.
        let mut all_binds: Vec<NodeRef> = Vec::new();
        for args in self.instance_args.values() {
            let (binds, _, _) = ports::split(args);
            for bind in binds {
                if !all_binds.iter().any(|b| b.ptr_eq(&bind)) {
                    all_binds.push(bind);
                }
            }
        }
        let allocation = ports::assign_ports(&all_binds)?;
        allocation.apply(&all_binds);
        ports::check_ports(&all_binds)?;

        let mut addresses: BTreeMap<String, (String, u16)> = BTreeMap::new();
        for (instance, args) in &self.instance_args {
            let (binds, _, _) = ports::split(args);
            let service = stringutil::clean_name(instance);
            for bind_node in &binds {
                let Some(bind) = bind_node.downcast_ref::<BindConfig>() else {
                    continue;
                };
                let key = bind_node.name();
                if allocation.newly_assigned.iter().any(|n| n.ptr_eq(bind_node)) {
                    self.compose
                        .add_env_var(instance, &key, &format!("0.0.0.0:{}", bind.port))?;
                }
                addresses.insert(bind.address_name.clone(), (service.clone(), bind.port));
                env.set_bind(&key, bind.port);
                self.compose.expose_port(instance, bind.port)?;
                self.compose.map_port_to_env_var(instance, bind.port, &key)?;
            }
        }

        for (instance, args) in &self.instance_args {
            let (_, dials, _) = ports::split(args);
            for dial_node in &dials {
                let Some(dial) = dial_node.downcast_ref::<DialConfig>() else {
                    continue;
                };
                let key = dial_node.name();
                match addresses.get(&dial.address_name) {
                    Some((service, port)) => {
                        self.compose
                            .add_env_var(instance, &key, &format!("{service}:{port}"))?;
                        env.set_dial(&key, service, *port);
                    }
                    None => self.compose.passthrough_env_var(instance, &key, false)?,
                }
            }
        }

        Ok(env)
    }
}

impl ContainerWorkspace for ComposeWorkspace {
    fn info(&self) -> WorkspaceInfo {
        self.info.clone()
    }

    fn visited(&mut self, name: &str) -> bool {
        self.visited.visited(name)
    }

    fn create_image_dir(&mut self, image_name: &str) -> Result<PathBuf, BuildError> {
        ioutil::create_node_dir(&self.info.path, image_name)
    }

    fn declare_prebuilt_instance(
        &mut self,
        instance_name: &str,
        image: &str,
        args: &[NodeRef],
    ) -> Result<(), BuildError> {
        self.instance_args
            .insert(instance_name.to_string(), args.to_vec());
        self.compose.add_image_instance(instance_name, image)
    }

    fn declare_local_image(
        &mut self,
        instance_name: &str,
        image_dir: &str,
        args: &[NodeRef],
    ) -> Result<(), BuildError> {
        self.instance_args
            .insert(instance_name.to_string(), args.to_vec());
        self.compose.add_build_instance(instance_name, image_dir)
    }

    fn set_environment_variable(
        &mut self,
        instance_name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), BuildError> {
        self.compose.add_env_var(instance_name, key, value)
    }
}
