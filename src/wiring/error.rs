//! Error types for wiring evaluation and artifact generation.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while declaring or evaluating a wiring spec.
#[derive(Debug, Error)]
pub enum WiringError {
    /// A name was resolved that has no definition or alias.
    #[error("{name} does not exist in the wiring spec of namespace {namespace}")]
    Undefined { name: String, namespace: String },

    /// A definition was replaced with one of a different node type.
    #[error("{name} redefined with node type {new_tag} but was previously {old_tag}")]
    Redefinition {
        name: String,
        old_tag: String,
        new_tag: String,
    },

    /// Resolution re-entered a definition that is still being built.
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// GetProperty on a key the definition does not carry.
    #[error("definition {name} has no property {key}")]
    PropertyNotFound { name: String, key: String },

    /// A property held a different kind of value than the caller expected.
    #[error("property {key} of {name} is not a {expected}")]
    PropertyType {
        name: String,
        key: String,
        expected: &'static str,
    },

    /// A child namespace with this name was already derived.
    #[error("attempt to create child namespace {0} that already exists")]
    DuplicateNamespace(String),

    /// GetNamespace for a child that was never derived.
    #[error("child namespace {0} does not exist")]
    NamespaceNotFound(String),

    /// A unique node was reached from two different namespaces.
    #[error(
        "reachability error detected for {name}; {name} is configured to be unique \
         but cannot be simultaneously reached from namespaces {first} and {second}; \
         fix by disabling uniqueness for {name} or exposing {name} over RPC"
    )]
    Uniqueness {
        name: String,
        first: String,
        second: String,
    },

    /// RequireUniqueness on a name that is not an alias.
    #[error(
        "cannot configure the uniqueness of {0} because it points directly to a node; \
         uniqueness can only be set for aliases"
    )]
    UniquenessNotAlias(String),

    /// RequireUniqueness on an alias whose target does not exist.
    #[error("cannot configure the uniqueness of {0} because it does not exist")]
    UniquenessUndefined(String),

    /// An address definition with nothing to point at.
    #[error("address {0} has an empty pointsTo")]
    EmptyPointsTo(String),

    /// A pointer was routed through an address that was never defined.
    #[error("no address named {0} has been defined")]
    AddressUndefined(String),

    /// SetDestination with a node lacking the server capability.
    #[error("address {addr} points to invalid server type {server}")]
    AddressType { addr: String, server: String },

    /// The server side of an address never came up during deferred work.
    #[error(
        "attempted to instantiate the server-side of address {addr} starting \
         with {server} but the server failed to instantiate"
    )]
    ServerNotInstantiated { addr: String, server: String },

    /// A resolved node had a different concrete type than required.
    #[error("expected {name} to be {expected} but got {actual}")]
    UnexpectedNodeType {
        name: String,
        expected: &'static str,
        actual: String,
    },

    /// A node was placed in a namespace whose handler cannot host it.
    #[error("namespace {namespace} cannot host node {name}")]
    NotAccepted { namespace: String, name: String },

    /// Failure while instantiating the contents of a child namespace.
    #[error("failed to instantiate contents of namespace {namespace}: {source}")]
    NamespaceContents {
        namespace: String,
        #[source]
        source: Box<WiringError>,
    },

    /// Errors accumulated on the spec's error channel before the build started.
    #[error("wiring spec has errors:\n{}", messages.join("\n"))]
    SpecErrors { messages: Vec<String> },
}

/// Errors raised while turning IR nodes into filesystem artifacts.
#[derive(Debug, Error)]
pub enum BuildError {
    /// BuildAll refuses to write into a directory that already exists.
    #[error("output directory {} already exists", .0.display())]
    OutputDirExists(PathBuf),

    /// A path expected to be a directory is something else.
    #[error("expected {} to be a directory but it is not", .0.display())]
    NotADirectory(PathBuf),

    /// A required directory is missing.
    #[error("expected directory {} but it does not exist", .0.display())]
    DirMissing(PathBuf),

    /// Directory creation failed.
    #[error("unable to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Per-node output directory creation failed.
    #[error("unable to create output dir for {name} at {}: {source}", .path.display())]
    NodeDir {
        name: String,
        path: PathBuf,
        #[source]
        source: Box<BuildError>,
    },

    /// Writing a generated file failed.
    #[error("unable to write {}: {source}", .path.display())]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A contributed script or module lives outside its workspace.
    #[error("path {} is not contained in workspace {}", .path.display(), .workspace.display())]
    PathOutsideWorkspace { path: PathBuf, workspace: PathBuf },

    /// A contributed runfunc has no `{ ... }` body to extract.
    #[error("invalid runfunc for process {0}")]
    InvalidRunFunc(String),

    /// A container instance name was declared twice.
    #[error("re-declaration of container instance {instance} of image {image}")]
    DuplicateInstance { instance: String, image: String },

    /// An instance was referenced before it was declared.
    #[error("container instance with name {0} not found")]
    InstanceNotFound(String),

    /// A container instance received an argument it cannot represent.
    #[error("container instance {instance} can only accept config nodes as arguments, but found {arg}")]
    InvalidInstanceArg { instance: String, arg: String },

    /// Two bind configs pre-assigned themselves the same port.
    #[error("{first} and {second} both pre-assigned to port {port}")]
    PortConflict {
        first: String,
        second: String,
        port: u16,
    },

    /// Bind configs left without a port after allocation should have run.
    #[error("unassigned bind addresses {}", names.join(", "))]
    UnassignedPorts { names: Vec<String> },

    /// Nodes left over after every registered builder has run.
    #[error("no registered builders for node types {}", types.join(", "))]
    UnhandledNodeTypes { types: Vec<String> },

    /// A module subdirectory was added to a workspace twice.
    #[error("redeclaration of module {0}")]
    DuplicateModule(String),

    /// A module copied into a workspace has an unusable descriptor.
    #[error("unable to read module path from {}", .0.display())]
    InvalidGoMod(PathBuf),

    /// Two constructors were declared for the same graph node.
    #[error("constructor for {0} already declared in the dependency graph")]
    DuplicateConstructor(String),

    /// An external tool exited nonzero.
    #[error("{command} in {} failed:\n{output}", .dir.display())]
    CommandFailed {
        command: String,
        dir: PathBuf,
        output: String,
    },

    /// Any other filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
