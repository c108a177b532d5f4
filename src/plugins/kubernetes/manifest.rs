//! The Kubernetes manifest set of one deployment.
//!
//! [`ManifestBuilder`] accumulates containers, their environment, and their
//! exposed ports, then renders the YAML under `manifests/` plus apply
//! scripts and a README at the deployment root. All collections are ordered
//! so identical inputs render byte-identical output.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::ioutil;
use crate::stringutil;
use crate::wiring::error::BuildError;

/// Where a container's image comes from.
enum ImageSource {
    /// An off-the-shelf image tag pulled from a registry.
    Prebuilt(String),
    /// An image built by this compilation; referenced through the
    /// `${REGISTRY}` the user pushes it to.
    Local(String),
}

/// A named container port, exposed through a ClusterIP service.
struct PortSpec {
    name: String,
    port: u16,
}

/// How an environment variable gets its value inside the pod.
enum EnvValue {
    /// Hardcoded in the deployment manifest.
    Literal(String),
    /// Read from the deployment's ConfigMap at pod start.
    Passthrough,
}

/// One container of the deployment's pod.
struct Container {
    source: ImageSource,
    ports: Vec<PortSpec>,
    /// Environment variables; a later write to a key wins.
    env: BTreeMap<String, EnvValue>,
}

impl Container {
    fn new(source: ImageSource) -> Container {
        Container {
            source,
            ports: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

/// The manifest set of one Kubernetes deployment under construction.
///
/// Every container lands in a single Deployment resource, so the whole pod
/// shares one network namespace; ports must be allocated across all
/// containers before they are exposed here.
pub struct ManifestBuilder {
    deployment_name: String,
    namespace: String,
    replicas: u32,
    dir: PathBuf,
    containers: BTreeMap<String, Container>,
}

impl ManifestBuilder {
    /// `namespace` and `replicas` are the values stored on the IR node; the
    /// unset values (empty string, zero) default to `default` and 1 here.
    pub fn new(
        deployment_name: &str,
        namespace: &str,
        replicas: u32,
        dir: &Path,
    ) -> ManifestBuilder {
        ManifestBuilder {
            deployment_name: stringutil::dns_label(deployment_name),
            namespace: if namespace.is_empty() {
                "default".to_string()
            } else {
                namespace.to_string()
            },
            replicas: if replicas == 0 { 1 } else { replicas },
            dir: dir.to_path_buf(),
            containers: BTreeMap::new(),
        }
    }

    /// Declare a container running an off-the-shelf image.
    pub fn add_image_container(
        &mut self,
        instance_name: &str,
        image: &str,
    ) -> Result<(), BuildError> {
        self.add_container(instance_name, ImageSource::Prebuilt(image.to_string()))
    }

    /// Declare a container built from an image directory in this workspace.
    ///
    /// The manifest references `${REGISTRY}/<image>:latest`; the user pushes
    /// the built image there and `apply.sh` substitutes the registry.
    pub fn add_local_container(
        &mut self,
        instance_name: &str,
        image: &str,
    ) -> Result<(), BuildError> {
        self.add_container(instance_name, ImageSource::Local(image.to_string()))
    }

    /// Set an environment variable on a declared container.
    pub fn add_env_var(
        &mut self,
        instance_name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), BuildError> {
        let key = stringutil::env_var(key);
        let container = self.container_mut(instance_name)?;
        container.env.insert(key, EnvValue::Literal(value.to_string()));
        Ok(())
    }

    /// Pass an environment variable through from the deploying environment.
    ///
    /// The variable is read from the deployment's ConfigMap, which carries a
    /// `${KEY}` placeholder for `apply.sh` to substitute.
    pub fn passthrough_env_var(
        &mut self,
        instance_name: &str,
        key: &str,
    ) -> Result<(), BuildError> {
        let key = stringutil::env_var(key);
        let container = self.container_mut(instance_name)?;
        container.env.insert(key, EnvValue::Passthrough);
        Ok(())
    }

    /// Expose a container port and back it with a ClusterIP service.
    ///
    /// The given name is reduced to a DNS label; container port names are
    /// IANA service names, capped at 15 characters.
    pub fn expose_port(
        &mut self,
        instance_name: &str,
        port: u16,
        name: &str,
    ) -> Result<(), BuildError> {
        let mut label = stringutil::dns_label(name);
        label.truncate(15);
        let label = label.trim_end_matches('-').to_string();
        let container = self.container_mut(instance_name)?;
        container.ports.push(PortSpec { name: label, port });
        Ok(())
    }

    /// Write the manifests, the apply scripts, and the README.
    pub fn generate(&self) -> Result<(), BuildError> {
        tracing::info!(
            "generating Kubernetes manifests for {} in {}",
            self.deployment_name,
            self.dir.display()
        );
        let manifests = self.dir.join("manifests");
        ioutil::write_file(&manifests.join("deployment.yaml"), &self.render_deployment())?;
        let services = self.render_services();
        if !services.is_empty() {
            ioutil::write_file(&manifests.join("services.yaml"), &services)?;
        }
        if let Some(configmap) = self.render_configmap() {
            ioutil::write_file(&manifests.join("configmap.yaml"), &configmap)?;
        }
        ioutil::write_file(&self.dir.join("apply.sh"), &self.render_apply_script())?;
        ioutil::write_file(&self.dir.join("apply.bat"), &self.render_apply_batch())?;
        ioutil::write_file(&self.dir.join("README.md"), &self.render_readme())
    }

    fn add_container(&mut self, instance_name: &str, source: ImageSource) -> Result<(), BuildError> {
        let name = stringutil::dns_label(instance_name);
        if self.containers.contains_key(&name) {
            let image = match &source {
                ImageSource::Prebuilt(image) => image.clone(),
                ImageSource::Local(image) => image.clone(),
            };
            return Err(BuildError::DuplicateInstance {
                instance: name,
                image,
            });
        }
        self.containers.insert(name, Container::new(source));
        Ok(())
    }

    fn container_mut(&mut self, instance_name: &str) -> Result<&mut Container, BuildError> {
        let name = stringutil::dns_label(instance_name);
        self.containers
            .get_mut(&name)
            .ok_or(BuildError::InstanceNotFound(name))
    }

    /// All ConfigMap-backed variable names across containers, sorted.
    fn passthrough_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for container in self.containers.values() {
            for (key, value) in &container.env {
                if matches!(value, EnvValue::Passthrough) {
                    keys.insert(key.clone());
                }
            }
        }
        keys
    }

    fn render_deployment(&self) -> String {
        let mut out = String::from("apiVersion: apps/v1\nkind: Deployment\n");
        out.push_str(&format!(
            "metadata:\n  name: {}\n  namespace: {}\n",
            self.deployment_name, self.namespace
        ));
        out.push_str(&format!("spec:\n  replicas: {}\n", self.replicas));
        out.push_str(&format!(
            "  selector:\n    matchLabels:\n      app: {}\n",
            self.deployment_name
        ));
        out.push_str(&format!(
            "  template:\n    metadata:\n      labels:\n        app: {}\n",
            self.deployment_name
        ));
        out.push_str("    spec:\n      containers:\n");
        for (name, container) in &self.containers {
            out.push_str(&format!("      - name: {name}\n"));
            match &container.source {
                ImageSource::Prebuilt(image) => {
                    out.push_str(&format!("        image: {image}\n"));
                }
                ImageSource::Local(image) => {
                    out.push_str(&format!("        image: ${{REGISTRY}}/{image}:latest\n"));
                }
            }
            if !container.ports.is_empty() {
                out.push_str("        ports:\n");
                for port in &container.ports {
                    out.push_str(&format!(
                        "        - containerPort: {}\n          name: {}\n          protocol: TCP\n",
                        port.port, port.name
                    ));
                }
            }
            if !container.env.is_empty() {
                out.push_str("        env:\n");
                for (key, value) in &container.env {
                    match value {
                        EnvValue::Literal(v) => {
                            out.push_str(&format!(
                                "        - name: {key}\n          value: \"{v}\"\n"
                            ));
                        }
                        EnvValue::Passthrough => {
                            out.push_str(&format!(
                                "        - name: {key}\n          valueFrom:\n            configMapKeyRef:\n              name: {}-config\n              key: {key}\n              optional: true\n",
                                self.deployment_name
                            ));
                        }
                    }
                }
            }
        }
        out
    }

    fn render_services(&self) -> String {
        let mut out = String::new();
        for (name, container) in &self.containers {
            if container.ports.is_empty() {
                continue;
            }
            out.push_str("---\napiVersion: v1\nkind: Service\n");
            out.push_str(&format!(
                "metadata:\n  name: {name}\n  namespace: {}\n",
                self.namespace
            ));
            out.push_str(&format!(
                "spec:\n  selector:\n    app: {}\n  ports:\n",
                self.deployment_name
            ));
            for port in &container.ports {
                out.push_str(&format!(
                    "  - port: {0}\n    targetPort: {0}\n    protocol: TCP\n    name: {1}\n",
                    port.port, port.name
                ));
            }
            out.push_str("  type: ClusterIP\n");
        }
        out
    }

    fn render_configmap(&self) -> Option<String> {
        let keys = self.passthrough_keys();
        if keys.is_empty() {
            return None;
        }
        let mut out = String::from("apiVersion: v1\nkind: ConfigMap\n");
        out.push_str(&format!(
            "metadata:\n  name: {}-config\n  namespace: {}\n",
            self.deployment_name, self.namespace
        ));
        out.push_str("data:\n");
        for key in keys {
            out.push_str(&format!("  {key}: \"${{{key}}}\"\n"));
        }
        Some(out)
    }

    fn render_apply_script(&self) -> String {
        let mut out = String::from(
            "#!/bin/bash\n\
             \n\
             if ! command -v kubectl &> /dev/null; then\n\
             \x20   echo \"kubectl is not installed\"\n\
             \x20   exit 1\n\
             fi\n\
             \n",
        );
        out.push_str(&format!(
            "kubectl create namespace {} --dry-run=client -o yaml | kubectl apply -f -\n\n",
            self.namespace
        ));
        out.push_str(
            "if [ -f manifests/configmap.yaml ]; then\n\
             \x20   envsubst < manifests/configmap.yaml | kubectl apply -f -\n\
             fi\n\
             \n\
             if [ -f manifests/services.yaml ]; then\n\
             \x20   kubectl apply -f manifests/services.yaml\n\
             fi\n\
             \n\
             envsubst < manifests/deployment.yaml | kubectl apply -f -\n\
             \n",
        );
        out.push_str(&format!(
            "echo \"To check status: kubectl get pods -n {0}\"\n\
             echo \"To view logs: kubectl logs -n {0} -l app={1}\"\n",
            self.namespace, self.deployment_name
        ));
        out
    }

    fn render_apply_batch(&self) -> String {
        let mut out = String::from(
            "@echo off\n\
             \n\
             where kubectl >nul 2>nul\n\
             if %ERRORLEVEL% NEQ 0 (\n\
             \x20   echo kubectl is not installed\n\
             \x20   exit /b 1\n\
             )\n\
             \n",
        );
        out.push_str(&format!(
            "kubectl create namespace {} --dry-run=client -o yaml | kubectl apply -f -\n\n",
            self.namespace
        ));
        out.push_str(
            "if exist manifests\\configmap.yaml kubectl apply -f manifests\\configmap.yaml\n\
             if exist manifests\\services.yaml kubectl apply -f manifests\\services.yaml\n\
             kubectl apply -f manifests\\deployment.yaml\n\
             \n",
        );
        out.push_str(&format!(
            "echo To check status: kubectl get pods -n {}\n",
            self.namespace
        ));
        out
    }

    fn render_readme(&self) -> String {
        let mut out = format!("# Kubernetes deployment: {}\n\n", self.deployment_name);
        out.push_str(
            "Manifests for deploying the application to a Kubernetes cluster.\n\
             \n\
             ## Files\n\
             \n\
             - `manifests/deployment.yaml` - runs every container in one pod\n\
             - `manifests/services.yaml` - a ClusterIP service per exposed port\n\
             - `manifests/configmap.yaml` - values passed through from the deploying environment\n\
             - `apply.sh` / `apply.bat` - apply everything in order\n\
             \n\
             ## Deploying\n\
             \n\
             ```bash\n\
             sh apply.sh\n\
             ```\n\
             \n\
             Locally built images must be pushed to a registry first; set\n\
             `REGISTRY` to its address before applying.\n\
             \n",
        );
        out.push_str(&format!(
            "## Configuration\n\n- Namespace: {}\n- Replicas: {}\n\n",
            self.namespace, self.replicas
        ));
        let keys = self.passthrough_keys();
        if !keys.is_empty() {
            out.push_str("## Required environment variables\n\nSet these before applying:\n\n");
            for key in &keys {
                out.push_str(&format!("- `{key}`\n"));
            }
            out.push('\n');
        }
        out.push_str(&format!(
            "## Monitoring\n\
             \n\
             ```bash\n\
             kubectl get pods -n {0}\n\
             kubectl logs -n {0} -l app={1}\n\
             ```\n",
            self.namespace, self.deployment_name
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn deployment_carries_defaults_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        let manifests = ManifestBuilder::new("dep", "", 0, dir.path());
        manifests.generate().unwrap();

        let deployment =
            fs::read_to_string(dir.path().join("manifests/deployment.yaml")).unwrap();
        assert!(deployment.contains("  namespace: default\n"));
        assert!(deployment.contains("  replicas: 1\n"));
    }

    #[test]
    fn containers_render_sorted_with_ports_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifests = ManifestBuilder::new("dep", "staging", 3, dir.path());
        manifests.add_local_container("b_ctr", "b_ctr").unwrap();
        manifests.add_image_container("a_cache", "memcached").unwrap();
        manifests
            .add_env_var("b_ctr", "b.grpc.bind_addr", "0.0.0.0:2000")
            .unwrap();
        manifests.expose_port("b_ctr", 2000, "b.grpc").unwrap();
        manifests.generate().unwrap();

        let deployment =
            fs::read_to_string(dir.path().join("manifests/deployment.yaml")).unwrap();
        assert!(deployment.contains("  namespace: staging\n"));
        assert!(deployment.contains("  replicas: 3\n"));
        // Sorted container order: a_cache before b_ctr.
        let a = deployment.find("      - name: a-cache\n").unwrap();
        let b = deployment.find("      - name: b-ctr\n").unwrap();
        assert!(a < b);
        assert!(deployment.contains("        image: memcached\n"));
        assert!(deployment.contains("        image: ${REGISTRY}/b_ctr:latest\n"));
        assert!(deployment.contains(
            "        ports:\n        - containerPort: 2000\n          name: b-grpc\n          protocol: TCP\n"
        ));
        assert!(deployment
            .contains("        - name: B_GRPC_BIND_ADDR\n          value: \"0.0.0.0:2000\"\n"));
    }

    #[test]
    fn each_exposed_container_gets_a_service() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifests = ManifestBuilder::new("dep", "", 0, dir.path());
        manifests.add_local_container("a_ctr", "a_ctr").unwrap();
        manifests.add_image_container("cache", "memcached").unwrap();
        manifests.expose_port("a_ctr", 2000, "a.grpc").unwrap();
        manifests.generate().unwrap();

        let services = fs::read_to_string(dir.path().join("manifests/services.yaml")).unwrap();
        assert_eq!(
            services,
            "---\n\
             apiVersion: v1\n\
             kind: Service\n\
             metadata:\n\
             \x20 name: a-ctr\n\
             \x20 namespace: default\n\
             spec:\n\
             \x20 selector:\n\
             \x20   app: dep\n\
             \x20 ports:\n\
             \x20 - port: 2000\n\
             \x20   targetPort: 2000\n\
             \x20   protocol: TCP\n\
             \x20   name: a-grpc\n\
             \x20 type: ClusterIP\n"
        );
    }

    #[test]
    fn no_services_file_without_exposed_ports() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifests = ManifestBuilder::new("dep", "", 0, dir.path());
        manifests.add_image_container("cache", "memcached").unwrap();
        manifests.generate().unwrap();
        assert!(!dir.path().join("manifests/services.yaml").exists());
    }

    #[test]
    fn passthrough_vars_go_through_the_configmap() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifests = ManifestBuilder::new("dep", "", 0, dir.path());
        manifests.add_image_container("cache", "memcached").unwrap();
        manifests.passthrough_env_var("cache", "trace.addr").unwrap();
        manifests.generate().unwrap();

        let deployment =
            fs::read_to_string(dir.path().join("manifests/deployment.yaml")).unwrap();
        assert!(deployment.contains(
            "        - name: TRACE_ADDR\n\
             \x20         valueFrom:\n\
             \x20           configMapKeyRef:\n\
             \x20             name: dep-config\n\
             \x20             key: TRACE_ADDR\n\
             \x20             optional: true\n"
        ));

        let configmap = fs::read_to_string(dir.path().join("manifests/configmap.yaml")).unwrap();
        assert_eq!(
            configmap,
            "apiVersion: v1\n\
             kind: ConfigMap\n\
             metadata:\n\
             \x20 name: dep-config\n\
             \x20 namespace: default\n\
             data:\n\
             \x20 TRACE_ADDR: \"${TRACE_ADDR}\"\n"
        );

        let readme = fs::read_to_string(dir.path().join("README.md")).unwrap();
        assert!(readme.contains("- `TRACE_ADDR`\n"));
    }

    #[test]
    fn no_configmap_without_passthrough_vars() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifests = ManifestBuilder::new("dep", "", 0, dir.path());
        manifests.add_image_container("cache", "memcached").unwrap();
        manifests.generate().unwrap();
        assert!(!dir.path().join("manifests/configmap.yaml").exists());
    }

    #[test]
    fn apply_script_substitutes_the_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let manifests = ManifestBuilder::new("dep", "staging", 2, dir.path());
        manifests.generate().unwrap();

        let script = fs::read_to_string(dir.path().join("apply.sh")).unwrap();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains(
            "kubectl create namespace staging --dry-run=client -o yaml | kubectl apply -f -\n"
        ));
        assert!(script.contains("envsubst < manifests/deployment.yaml | kubectl apply -f -\n"));
        assert!(dir.path().join("apply.bat").exists());
    }

    #[test]
    fn long_port_names_are_cut_to_iana_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifests = ManifestBuilder::new("dep", "", 0, dir.path());
        manifests.add_local_container("a", "a").unwrap();
        manifests
            .expose_port("a", 2000, "user_service.grpc")
            .unwrap();
        manifests.generate().unwrap();

        let deployment =
            fs::read_to_string(dir.path().join("manifests/deployment.yaml")).unwrap();
        // "user-service-grpc" truncated to 15 chars.
        assert!(deployment.contains("          name: user-service-gr\n"));
    }

    #[test]
    fn redeclaring_a_container_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifests = ManifestBuilder::new("dep", "", 0, dir.path());
        manifests.add_image_container("cache", "memcached").unwrap();
        let err = manifests.add_image_container("cache", "redis").unwrap_err();
        assert_eq!(
            err.to_string(),
            "re-declaration of container instance cache of image redis"
        );
    }
}
