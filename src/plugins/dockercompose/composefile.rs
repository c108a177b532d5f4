//! The docker-compose.yml model and the deployment's env files.
//!
//! [`ComposeFile`] accumulates service declarations, exposed ports, host
//! port mappings, and environment variables, then renders them in one pass.
//! All collections are ordered so identical inputs render byte-identical
//! output. [`EnvFiles`] collects the address values the deployment resolved
//! and writes them as sourceable `.env` / `.local.env` files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::ioutil;
use crate::stringutil;
use crate::wiring::error::BuildError;

/// Where a compose service's image comes from.
enum ImageSource {
    /// An off-the-shelf image tag pulled from a registry.
    Prebuilt(String),
    /// A directory next to the compose file, built by this compilation.
    Built(String),
}

/// One service entry of the compose file.
struct Instance {
    source: ImageSource,
    /// Container-internal ports reachable by sibling services.
    expose: BTreeSet<u16>,
    /// Host port mappings: external address to internal port. The external
    /// side is usually an env var substitution the user resolves at run time.
    port_mappings: BTreeMap<String, u16>,
    /// Environment variables; a later write to a key wins.
    env: BTreeMap<String, String>,
}

impl Instance {
    fn new(source: ImageSource) -> Instance {
        Instance {
            source,
            expose: BTreeSet::new(),
            port_mappings: BTreeMap::new(),
            env: BTreeMap::new(),
        }
    }
}

/// The docker-compose.yml of one deployment under construction.
pub struct ComposeFile {
    workspace_name: String,
    path: PathBuf,
    instances: BTreeMap<String, Instance>,
}

impl ComposeFile {
    pub fn new(workspace_name: &str, dir: &Path) -> ComposeFile {
        ComposeFile {
            workspace_name: workspace_name.to_string(),
            path: dir.join("docker-compose.yml"),
            instances: BTreeMap::new(),
        }
    }

    /// Declare a service running an off-the-shelf image.
    pub fn add_image_instance(&mut self, instance_name: &str, image: &str) -> Result<(), BuildError> {
        self.add_instance(instance_name, ImageSource::Prebuilt(image.to_string()))
    }

    /// Declare a service built from an image directory in this workspace.
    pub fn add_build_instance(
        &mut self,
        instance_name: &str,
        image_dir: &str,
    ) -> Result<(), BuildError> {
        self.add_instance(instance_name, ImageSource::Built(image_dir.to_string()))
    }

    /// Set an environment variable on a declared service.
    pub fn add_env_var(
        &mut self,
        instance_name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), BuildError> {
        let key = stringutil::env_var(key);
        let instance = self.instance_mut(instance_name)?;
        instance.env.insert(key, value.to_string());
        Ok(())
    }

    /// Pass an environment variable through from the calling environment.
    ///
    /// Required variables use compose's `${VAR?message}` substitution so a
    /// missing value fails `docker-compose up` with a readable message;
    /// optional ones default to empty.
    pub fn passthrough_env_var(
        &mut self,
        instance_name: &str,
        key: &str,
        optional: bool,
    ) -> Result<(), BuildError> {
        let value = if optional {
            format!("${{{}:-}}", stringutil::env_var(key))
        } else {
            required_substitution(key)
        };
        self.add_env_var(instance_name, key, &value)
    }

    /// Expose a container-internal port to sibling services.
    pub fn expose_port(&mut self, instance_name: &str, port: u16) -> Result<(), BuildError> {
        let instance = self.instance_mut(instance_name)?;
        instance.expose.insert(port);
        Ok(())
    }

    /// Map `internal_port` to a host address, typically `host:port`.
    pub fn map_port(
        &mut self,
        instance_name: &str,
        internal_port: u16,
        external_address: &str,
    ) -> Result<(), BuildError> {
        let instance = self.instance_mut(instance_name)?;
        instance
            .port_mappings
            .insert(external_address.to_string(), internal_port);
        Ok(())
    }

    /// Map `internal_port` to a host address drawn from env var `key`.
    ///
    /// The same variable that tells the process inside the container where
    /// to bind tells compose which host address to publish it on; sourcing
    /// the generated `.env` file satisfies both.
    pub fn map_port_to_env_var(
        &mut self,
        instance_name: &str,
        internal_port: u16,
        key: &str,
    ) -> Result<(), BuildError> {
        self.map_port(instance_name, internal_port, &required_substitution(key))
    }

    /// Write the docker-compose.yml.
    pub fn generate(&self) -> Result<(), BuildError> {
        tracing::info!("generating {}/docker-compose.yml", self.workspace_name);
        ioutil::write_file(&self.path, &self.render())
    }

    fn add_instance(&mut self, instance_name: &str, source: ImageSource) -> Result<(), BuildError> {
        let name = stringutil::clean_name(instance_name);
        if self.instances.contains_key(&name) {
            let image = match &source {
                ImageSource::Prebuilt(image) => image.clone(),
                ImageSource::Built(dir) => dir.clone(),
            };
            return Err(BuildError::DuplicateInstance {
                instance: name,
                image,
            });
        }
        self.instances.insert(name, Instance::new(source));
        Ok(())
    }

    fn instance_mut(&mut self, instance_name: &str) -> Result<&mut Instance, BuildError> {
        let name = stringutil::clean_name(instance_name);
        self.instances
            .get_mut(&name)
            .ok_or(BuildError::InstanceNotFound(name))
    }

    fn render(&self) -> String {
        let mut out = String::from("version: '3'\nservices:\n");
        for (name, instance) in &self.instances {
            out.push('\n');
            out.push_str(&format!("  {name}:\n"));
            match &instance.source {
                ImageSource::Prebuilt(image) => {
                    out.push_str(&format!("    image: {image}\n"));
                }
                ImageSource::Built(dir) => {
                    out.push_str(&format!(
                        "    build:\n      context: {dir}\n      dockerfile: ./Dockerfile\n"
                    ));
                }
            }
            out.push_str(&format!("    hostname: {name}\n"));
            if !instance.port_mappings.is_empty() {
                out.push_str("    expose:\n");
                for port in &instance.expose {
                    out.push_str(&format!("     - \"{port}\"\n"));
                }
                out.push_str("    ports:\n");
                for (external, internal) in &instance.port_mappings {
                    out.push_str(&format!("     - \"{external}:{internal}\"\n"));
                }
            }
            if !instance.env.is_empty() {
                out.push_str("    environment:\n");
                for (key, value) in &instance.env {
                    out.push_str(&format!("     - {key}={value}\n"));
                }
            }
            out.push_str("    restart: always\n");
        }
        out
    }
}

/// Compose substitution that fails when the variable is unset.
///
/// The message names the unsanitized key so the user can find the address
/// or config definition it came from.
fn required_substitution(key: &str) -> String {
    format!(
        "${{{}?{key} must be set by the calling environment}}",
        stringutil::env_var(key)
    )
}

/// The `.env` and `.local.env` files written next to the deployment.
///
/// `.env` addresses services by their compose DNS name, for running under
/// docker-compose; `.local.env` dials `localhost`, for running the same
/// processes directly on one machine. Sourcing either file before
/// `docker-compose up` also resolves the host port substitutions in the
/// compose file.
#[derive(Default)]
pub struct EnvFiles {
    env: BTreeMap<String, String>,
    local: BTreeMap<String, String>,
}

impl EnvFiles {
    pub fn new() -> EnvFiles {
        EnvFiles::default()
    }

    /// Record a server's bind address; both files carry `0.0.0.0:<port>`.
    pub fn set_bind(&mut self, key: &str, port: u16) {
        let key = stringutil::env_var(key);
        let value = format!("0.0.0.0:{port}");
        self.env.insert(key.clone(), value.clone());
        self.local.insert(key, value);
    }

    /// Record a resolved dial address; `.env` carries the service DNS name,
    /// `.local.env` carries `localhost`.
    pub fn set_dial(&mut self, key: &str, service: &str, port: u16) {
        let key = stringutil::env_var(key);
        self.env.insert(key.clone(), format!("{service}:{port}"));
        self.local.insert(key, format!("localhost:{port}"));
    }

    /// Write `.env` and `.local.env` into `dir`, one sorted `KEY=value`
    /// line per entry.
    pub fn generate(&self, dir: &Path) -> Result<(), BuildError> {
        ioutil::write_file(&dir.join(".env"), &render_env(&self.env))?;
        ioutil::write_file(&dir.join(".local.env"), &render_env(&self.local))
    }
}

fn render_env(entries: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(&format!("{key}={value}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn renders_built_and_prebuilt_services_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut compose = ComposeFile::new("app", dir.path());
        compose.add_build_instance("b_ctr", "b_ctr").unwrap();
        compose.add_image_instance("a_cache", "memcached").unwrap();
        compose.generate().unwrap();

        let contents = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert_eq!(
            contents,
            "version: '3'\n\
             services:\n\
             \n\
             \x20 a_cache:\n\
             \x20   image: memcached\n\
             \x20   hostname: a_cache\n\
             \x20   restart: always\n\
             \n\
             \x20 b_ctr:\n\
             \x20   build:\n\
             \x20     context: b_ctr\n\
             \x20     dockerfile: ./Dockerfile\n\
             \x20   hostname: b_ctr\n\
             \x20   restart: always\n"
        );
    }

    #[test]
    fn ports_and_environment_render_under_their_service() {
        let dir = tempfile::tempdir().unwrap();
        let mut compose = ComposeFile::new("app", dir.path());
        compose.add_build_instance("a", "a").unwrap();
        compose.expose_port("a", 2000).unwrap();
        compose.map_port_to_env_var("a", 2000, "a.grpc.bind_addr").unwrap();
        compose
            .add_env_var("a", "a.grpc.bind_addr", "0.0.0.0:2000")
            .unwrap();
        compose.generate().unwrap();

        let contents = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert!(contents.contains("    expose:\n     - \"2000\"\n"));
        assert!(contents.contains(
            "    ports:\n     - \"${A_GRPC_BIND_ADDR?a.grpc.bind_addr must be set by the calling environment}:2000\"\n"
        ));
        assert!(contents.contains("    environment:\n     - A_GRPC_BIND_ADDR=0.0.0.0:2000\n"));
    }

    #[test]
    fn expose_without_a_host_mapping_is_not_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let mut compose = ComposeFile::new("app", dir.path());
        compose.add_image_instance("cache", "memcached").unwrap();
        compose.expose_port("cache", 11211).unwrap();
        compose.generate().unwrap();

        let contents = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert!(!contents.contains("expose:"));
    }

    #[test]
    fn env_keys_are_sanitized_and_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut compose = ComposeFile::new("app", dir.path());
        compose.add_image_instance("cache", "memcached").unwrap();
        compose.add_env_var("cache", "some.key", "first").unwrap();
        compose.add_env_var("cache", "some.key", "second").unwrap();
        compose.generate().unwrap();

        let contents = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert!(contents.contains(" - SOME_KEY=second\n"));
        assert!(!contents.contains("first"));
    }

    #[test]
    fn optional_passthrough_defaults_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut compose = ComposeFile::new("app", dir.path());
        compose.add_image_instance("cache", "memcached").unwrap();
        compose.passthrough_env_var("cache", "trace.addr", true).unwrap();
        compose.generate().unwrap();

        let contents = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert!(contents.contains(" - TRACE_ADDR=${TRACE_ADDR:-}\n"));
    }

    #[test]
    fn redeclaring_an_instance_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut compose = ComposeFile::new("app", dir.path());
        compose.add_image_instance("cache", "memcached").unwrap();
        let err = compose.add_image_instance("cache", "redis").unwrap_err();
        assert_eq!(
            err.to_string(),
            "re-declaration of container instance cache of image redis"
        );
    }

    #[test]
    fn unknown_instances_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut compose = ComposeFile::new("app", dir.path());
        let err = compose.add_env_var("ghost", "k", "v").unwrap_err();
        assert_eq!(err.to_string(), "container instance with name ghost not found");
    }

    #[test]
    fn env_files_differ_only_in_dial_hostnames() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = EnvFiles::new();
        env.set_dial("a.grpc.dial_addr", "a", 2000);
        env.set_bind("a.grpc.bind_addr", 2000);
        env.generate(dir.path()).unwrap();

        let plain = fs::read_to_string(dir.path().join(".env")).unwrap();
        assert_eq!(
            plain,
            "A_GRPC_BIND_ADDR=0.0.0.0:2000\nA_GRPC_DIAL_ADDR=a:2000\n"
        );
        let local = fs::read_to_string(dir.path().join(".local.env")).unwrap();
        assert_eq!(
            local,
            "A_GRPC_BIND_ADDR=0.0.0.0:2000\nA_GRPC_DIAL_ADDR=localhost:2000\n"
        );
    }
}
