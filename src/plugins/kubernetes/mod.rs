//! Kubernetes: the deployment tier that compiles containers into a pod of
//! one Deployment resource plus the services around it.
//!
//! Wiring specs collect containers with [`create_deployment`] and
//! [`add_to_deployment`], and may pick a target namespace and replica count
//! with [`set_namespace`] and [`set_replicas`]. At artifact time the
//! deployment gathers every container's image directory and instance
//! declaration, allocates ports across the whole pod, wires bind addresses
//! up as environment variables and ClusterIP services, and resolves dials
//! between containers to service DNS names. Values the deployment cannot
//! resolve are read from a ConfigMap the user fills in when applying.

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
use crate::wiring::{Namespace, PropertyValue, WiringSpec};

mod manifest;

pub use manifest::ManifestBuilder;

/// Property key for the deployment's target namespace.
const NAMESPACE: &str = "namespace";

/// Property key for the deployment's replica count.
const REPLICAS: &str = "replicas";

/// Define a Kubernetes deployment named `deployment_name` hosting the given
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
        let node = NodeRef::new(Deployment::new(
            &name,
            &namespace_property(ns, &name),
            replicas_property(ns, &name),
        ));
        builder::instantiate_namespace(ns, &node)?;
        Ok(node)
    });
    deployment_name.to_string()
}

/// Add a container to an existing deployment definition.
pub fn add_to_deployment(spec: &mut WiringSpec, deployment_name: &str, child_name: &str) {
    builder::add_node_to(spec, NodeTag::Deployment, deployment_name, child_name);
}

/// Choose the namespace the deployment is applied into.
///
/// Unset deployments fall back to `default` when the manifests are emitted.
pub fn set_namespace(spec: &mut WiringSpec, deployment_name: &str, namespace: &str) {
    spec.set_property(
        deployment_name,
        NAMESPACE,
        PropertyValue::Str(namespace.to_string()),
    );
}

/// Choose how many pod replicas the deployment runs.
///
/// Unset deployments fall back to 1 when the manifests are emitted.
pub fn set_replicas(spec: &mut WiringSpec, deployment_name: &str, replicas: u32) {
    spec.set_property(
        deployment_name,
        REPLICAS,
        PropertyValue::Str(replicas.to_string()),
    );
}

fn namespace_property(ns: &Namespace, deployment_name: &str) -> String {
    match ns.property(deployment_name, NAMESPACE) {
        Some(PropertyValue::Str(value)) => value,
        _ => String::new(),
    }
}

fn replicas_property(ns: &Namespace, deployment_name: &str) -> u32 {
    match ns.property(deployment_name, REPLICAS) {
        Some(PropertyValue::Str(value)) => value.parse().unwrap_or(0),
        _ => 0,
    }
}

/// IR node for a Kubernetes deployment hosting container nodes.
///
/// Namespace and replicas keep their unset values (empty string, zero) here;
/// the defaults are applied when the manifests are emitted.
pub struct Deployment {
    name: String,
    namespace: String,
    replicas: u32,
    contents: NamespaceContents,
}

impl Deployment {
    fn new(name: &str, namespace: &str, replicas: u32) -> Deployment {
        Deployment {
            name: name.to_string(),
            namespace: namespace.to_string(),
            replicas,
            contents: NamespaceContents::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    /// Collect image directories and instance declarations from every
    /// contained container.
    fn generate_into(&self, workspace: &mut KubernetesWorkspace) -> Result<(), BuildError> {
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
            "collecting container instances for Kubernetes deployment {} in {}",
            self.name,
            dir.display()
        );
        let mut workspace = KubernetesWorkspace::new(self, dir);
        self.generate_into(&mut workspace)?;
        workspace.finish()
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&pretty_print_namespace(
            &self.name,
            "Kubernetes",
            &self.contents.arg_nodes,
            &self.contents.contained_nodes,
        ))
    }
}

/// Workspace assembling a Kubernetes deployment.
///
/// Containers declare their images and instances through the
/// [`ContainerWorkspace`] trait; `finish` then runs the address pass over
/// the accumulated instance arguments and writes the manifest set.
pub struct KubernetesWorkspace {
    info: WorkspaceInfo,
    visited: VisitTracker,
    instance_args: BTreeMap<String, Vec<NodeRef>>,
    manifests: ManifestBuilder,
}

impl KubernetesWorkspace {
    pub fn new(deployment: &Deployment, dir: &Path) -> KubernetesWorkspace {
        KubernetesWorkspace {
            info: WorkspaceInfo {
                path: dir.to_path_buf(),
                target: "kubernetes",
            },
            visited: VisitTracker::new(),
            instance_args: BTreeMap::new(),
            manifests: ManifestBuilder::new(
                &deployment.name,
                &deployment.namespace,
                deployment.replicas,
                dir,
            ),
        }
    }

    /// Resolve addresses and emit the manifests.
    pub fn finish(&mut self) -> Result<(), BuildError> {
        self.process_arg_nodes()?;
        self.manifests.generate()
    }

    /// Turn each instance's argument nodes into environment variables.
    ///
    /// Plain configs without a hardcoded value are read from the ConfigMap.
    /// Bind configs get ports allocated across the whole pod, surface inside
    /// their container, and are exposed through a ClusterIP service named
    /// after the container. Dials to servers bound in this deployment
    /// resolve to that service's DNS name; all other dials go through the
    /// ConfigMap as well.
    fn process_arg_nodes(&mut self) -> Result<(), BuildError> {
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
                    self.manifests.passthrough_env_var(instance, &arg.name())?;
                }
            }
        }

        // One pod shares one network namespace, so ports are allocated
        // across every container in the deployment.
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

        let mut addresses: BTreeMap<String, String> = BTreeMap::new();
        for (instance, args) in &self.instance_args {
            let (binds, _, _) = ports::split(args);
            let service = stringutil::dns_label(instance);
            for bind_node in &binds {
                let Some(bind) = bind_node.downcast_ref::<BindConfig>() else {
                    continue;
                };
                let key = bind_node.name();
                if allocation.newly_assigned.iter().any(|n| n.ptr_eq(bind_node)) {
                    self.manifests
                        .add_env_var(instance, &key, &format!("0.0.0.0:{}", bind.port))?;
                }
                addresses.insert(
                    bind.address_name.clone(),
                    format!("{service}:{}", bind.port),
                );
                let stem = bind
                    .address_name
                    .strip_suffix(".addr")
                    .unwrap_or(&bind.address_name);
                self.manifests.expose_port(instance, bind.port, stem)?;
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
                    Some(addr) => self.manifests.add_env_var(instance, &key, addr)?,
                    None => self.manifests.passthrough_env_var(instance, &key)?,
                }
            }
        }

        Ok(())
    }
}

impl ContainerWorkspace for KubernetesWorkspace {
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
        self.manifests.add_image_container(instance_name, image)
    }

    fn declare_local_image(
        &mut self,
        instance_name: &str,
        image_dir: &str,
        args: &[NodeRef],
    ) -> Result<(), BuildError> {
        self.instance_args
            .insert(instance_name.to_string(), args.to_vec());
        self.manifests.add_local_container(instance_name, image_dir)
    }

    fn set_environment_variable(
        &mut self,
        instance_name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), BuildError> {
        self.manifests.add_env_var(instance_name, key, value)
    }
}
