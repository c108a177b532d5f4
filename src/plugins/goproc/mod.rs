//! Go processes: the namespace tier that turns application-level instances
//! into runnable Go programs.
//!
//! Wiring specs group instances into a process with [`create_process`] or
//! the shorthand [`deploy`], which derives the process name by replacing a
//! `_service` suffix with `_proc`. At artifact time a process builds a Go
//! workspace containing one generated module: a dependency-injection file
//! that registers every contained node's constructor, and a `main.go` that
//! parses one flag per argument node, builds the graph, and waits for it to
//! drain.
//!
//! Processes are also the default builder for instances left at the
//! application root; see [`build_instances`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::ioutil;
use crate::ir::artifacts::{
    ArtifactGenerator, InstanceGraph, ProcessInstantiable, ProcessWorkspace,
    ProvidesProcessArtifacts,
};
use crate::ir::{pretty_print_namespace, IrNode, NamespaceHandler, NodeRef, NodeTag};
use crate::plugins::RUNTIME_MODULE;
use crate::stringutil;
use crate::wiring::builder::{self, NamespaceContents};
use crate::wiring::error::BuildError;
use crate::wiring::{Namespace, PropertyValue, WiringSpec};

pub mod workspace;

pub use workspace::{GoModule, GoWorkspace};

/// Property key for suppressing `go mod tidy` on generated modules.
const TIDY: &str = "tidy";

/// Deploy a service into its own Go process.
///
/// The process name is derived by replacing a `_service` suffix with
/// `_proc` (`user_service` becomes `user_proc`; `user` becomes
/// `user_proc`). Returns the process name.
pub fn deploy(spec: &mut WiringSpec, service_name: &str) -> String {
    let prefix = service_name.strip_suffix("_service").unwrap_or(service_name);
    let proc_name = format!("{prefix}_proc");
    create_process(spec, &proc_name, &[service_name]);
    proc_name
}

/// Define a process named `proc_name` hosting the given children.
///
/// More children can be added later with [`add_to_process`]. Returns the
/// process name.
pub fn create_process(spec: &mut WiringSpec, proc_name: &str, children: &[&str]) -> String {
    for child in children {
        add_to_process(spec, proc_name, child);
    }
    let name = proc_name.to_string();
    spec.define(proc_name, NodeTag::Process, move |ns| {
        let node = NodeRef::new(Process::new(&name, tidy_property(ns, &name)));
        builder::instantiate_namespace(ns, &node)?;
        Ok(node)
    });
    proc_name.to_string()
}

/// Add an instance to an existing process definition.
pub fn add_to_process(spec: &mut WiringSpec, proc_name: &str, child_name: &str) {
    builder::add_node_to(spec, NodeTag::Process, proc_name, child_name);
}

/// Define a process containing only clients of the given children.
///
/// Unlike [`create_process`], children are resolved as clients: pointers
/// build their client side here while their servers stay wherever they were
/// deployed. A starting point for writing custom drivers against deployed
/// services.
pub fn create_client_process(spec: &mut WiringSpec, proc_name: &str, children: &[&str]) -> String {
    let children: Vec<String> = children.iter().map(|c| c.to_string()).collect();
    let name = proc_name.to_string();
    spec.define(proc_name, NodeTag::Process, move |ns| {
        let node = NodeRef::new(Process::new(&name, tidy_property(ns, &name)));
        let proc_ns = ns.derive_namespace(&name, &node)?;
        for child in &children {
            proc_ns.get(child)?;
        }
        Ok(node)
    });
    proc_name.to_string()
}

/// Enable or disable running `go mod tidy` on the process's generated
/// modules. Enabled by default; tests disable it.
pub fn set_tidy(spec: &mut WiringSpec, proc_name: &str, tidy: bool) {
    spec.set_property(proc_name, TIDY, PropertyValue::Str(tidy.to_string()));
}

fn tidy_property(ns: &Namespace, proc_name: &str) -> bool {
    match ns.property(proc_name, TIDY) {
        Some(PropertyValue::Str(value)) => value != "false",
        _ => true,
    }
}

/// Collect stray application-level instances into a default process.
///
/// Registered as the namespace builder for instance nodes left at the
/// application root. The process is named `goproc` and generates into a
/// directory of the same name. Bundled processes skip `go mod tidy`; no
/// wiring definition exists to carry the tidy property.
pub fn build_instances(dir: &Path, nodes: Vec<NodeRef>) -> Result<Vec<NodeRef>, BuildError> {
    let mut proc = Process::new("goproc", false);
    for node in &nodes {
        proc.contents.add_node(node.clone());
    }
    let proc_dir = ioutil::create_node_dir(dir, "goproc")?;
    proc.generate_artifacts(&proc_dir)?;
    Ok(nodes)
}

/// IR node for a Go process hosting application-level instances.
pub struct Process {
    name: String,
    contents: NamespaceContents,
    tidy: bool,
}

impl Process {
    fn new(name: &str, tidy: bool) -> Process {
        Process {
            name: name.to_string(),
            contents: NamespaceContents::new(),
            tidy,
        }
    }

    fn proc_name(&self) -> String {
        stringutil::clean_name(&self.name)
    }
}

impl IrNode for Process {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> NodeTag {
        NodeTag::Process
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

    fn as_process_artifacts(&self) -> Option<&dyn ProvidesProcessArtifacts> {
        Some(self)
    }

    fn as_process_instance(&self) -> Option<&dyn ProcessInstantiable> {
        Some(self)
    }
}

impl NamespaceHandler for Process {
    fn accepts(&self, tag: NodeTag) -> bool {
        tag == NodeTag::Instance
    }

    fn add_node(&mut self, node: NodeRef) {
        self.contents.add_node(node);
    }

    fn add_edge(&mut self, node: NodeRef) {
        self.contents.add_edge(node);
    }
}

impl ArtifactGenerator for Process {
    /// Build the process's Go workspace into `dir`.
    ///
    /// The workspace contains a single generated module named after the
    /// process, holding the dependency-injection file and `main.go`.
    fn generate_artifacts(&self, dir: &Path) -> Result<(), BuildError> {
        tracing::info!("building go process {} to {}", self.name, dir.display());
        let mut workspace = GoWorkspace::new(dir)?;
        workspace.set_tidy(self.tidy);
        let mut module = workspace.create_module(&format!("weave/goproc/{}", self.proc_name()))?;

        let mut graph = GraphFile::new(&mut module, &self.proc_name())?;
        for node in &self.contents.contained_nodes {
            let borrowed = node.borrow();
            if let Some(instance) = borrowed.as_graph_instance() {
                instance.add_graph_instance(&mut graph)?;
            }
        }
        graph.build()?;

        generate_main(
            &self.name,
            &self.contents.arg_nodes,
            &self.contents.contained_nodes,
            &module,
            &graph,
        )?;
        module.write_descriptor()?;
        workspace.finish()
    }
}

impl ProvidesProcessArtifacts for Process {
    fn add_process_artifacts(
        &self,
        workspace: &mut dyn ProcessWorkspace,
    ) -> Result<(), BuildError> {
        if workspace.visited(&format!("{}.artifacts", self.name)) {
            return Ok(());
        }
        let dir = workspace.create_process_dir(&self.proc_name())?;
        self.generate_artifacts(&dir)?;

        if workspace.info().target == "docker" {
            let proc_name = self.proc_name();
            workspace.add_dockerfile_commands(&proc_name, &dockerfile_build_commands(&proc_name));
        }
        Ok(())
    }
}

impl ProcessInstantiable for Process {
    fn add_process_instance(&self, workspace: &mut dyn ProcessWorkspace) -> Result<(), BuildError> {
        if workspace.visited(&format!("{}.instance", self.name)) {
            return Ok(());
        }
        let runfunc = if workspace.info().target == "docker" {
            binary_runfunc(&self.proc_name(), &self.contents.arg_nodes)
        } else {
            go_run_runfunc(&self.proc_name(), &self.contents.arg_nodes)
        };
        workspace.declare_run_command(&self.name, &runfunc, &self.contents.arg_nodes)
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&pretty_print_namespace(
            &self.name,
            "GoProcess",
            &self.contents.arg_nodes,
            &self.contents.contained_nodes,
        ))
    }
}

/// Command-line flags passing each argument node's env var to the process.
fn flag_args(args: &[NodeRef]) -> String {
    args.iter()
        .map(|arg| {
            format!(
                " --{}=\"${}\"",
                arg.name(),
                stringutil::env_var(&arg.name())
            )
        })
        .collect()
}

/// Shell function launching the process with `go run` from its module dir.
fn go_run_runfunc(proc_name: &str, args: &[NodeRef]) -> String {
    let env = stringutil::env_var(proc_name);
    format!(
        "{proc_name}() {{\n\tcd {proc_name}/{proc_name}\n\tgo run .{flags} &\n\t{env}=$!\n\texport {env}\n}}",
        flags = flag_args(args),
    )
}

/// Shell function launching the prebuilt process binary.
///
/// The binary lives under `<proc>/bin`, where the image's build stage
/// placed it, next to the sources rather than among them.
fn binary_runfunc(proc_name: &str, args: &[NodeRef]) -> String {
    let env = stringutil::env_var(proc_name);
    format!(
        "{proc_name}() {{\n\tcd {proc_name}/bin\n\t./{proc_name}{flags} &\n\t{env}=$!\n\texport {env}\n}}",
        flags = flag_args(args),
    )
}

/// Dockerfile stage compiling the process workspace to a binary.
///
/// The stage is named `<proc>_build`; the enclosing Dockerfile copies the
/// binary out of it into the runtime image.
fn dockerfile_build_commands(proc_name: &str) -> String {
    format!(
        "FROM golang:1.21 AS {proc_name}_build\n\
         COPY ./{proc_name} /src/{proc_name}\n\
         WORKDIR /src/{proc_name}/{proc_name}\n\
         RUN go build -o /out/{proc_name} .\n"
    )
}

/// The dependency-injection source file generated into a process module.
///
/// Collects package imports (aliases deduplicated with a numeric suffix)
/// and constructor declarations in declaration order, then emits a single
/// file in the module's `goproc` package whose constructor function builds
/// the runtime graph.
pub struct GraphFile {
    package_dir: PathBuf,
    file_name: String,
    func_name: String,
    /// Alias to package path.
    imports: BTreeMap<String, String>,
    declarations: Vec<(String, String)>,
}

impl GraphFile {
    /// Start a graph file for `proc_name` inside `module`.
    ///
    /// Seeds the module's requirement on the runtime support module and the
    /// import of its graph package.
    pub fn new(module: &mut GoModule, proc_name: &str) -> Result<GraphFile, BuildError> {
        module.require(RUNTIME_MODULE, "");
        let package_dir = module.dir().join("goproc");
        ioutil::check_dir(&package_dir, true)?;

        let clean = stringutil::clean_name(proc_name);
        let mut imports = BTreeMap::new();
        imports.insert("graph".to_string(), format!("{RUNTIME_MODULE}/graph"));
        Ok(GraphFile {
            package_dir,
            file_name: format!("{}.go", clean.to_lowercase()),
            func_name: format!("New{}", stringutil::capitalize(&clean)),
            imports,
            declarations: Vec::new(),
        })
    }

    /// Name of the generated graph constructor function.
    pub fn func_name(&self) -> &str {
        &self.func_name
    }

    /// Write the generated source file into the module.
    pub fn build(&self) -> Result<(), BuildError> {
        let mut out = String::from("package goproc\n\nimport (\n");
        for (alias, path) in &self.imports {
            out.push_str(&format!("\t{alias} \"{path}\"\n"));
        }
        out.push_str(")\n\n");
        out.push_str(&format!(
            "func {}(args map[string]string) graph.Graph {{\n\tg := graph.NewGraph(args)\n\n",
            self.func_name
        ));
        for (name, constructor) in &self.declarations {
            out.push_str(&format!("\tg.Define(\"{name}\", {constructor})\n"));
        }
        if !self.declarations.is_empty() {
            out.push('\n');
        }
        out.push_str("\treturn g\n}\n");
        ioutil::write_file(&self.package_dir.join(&self.file_name), &out)
    }
}

impl InstanceGraph for GraphFile {
    fn import(&mut self, path: &str) -> String {
        let short = path.rsplit('/').next().unwrap_or(path);
        let mut alias = short.to_string();
        let mut suffix = 0;
        loop {
            match self.imports.get(&alias) {
                Some(existing) if existing != path => {
                    suffix += 1;
                    alias = format!("{short}{suffix}");
                }
                _ => {
                    self.imports.insert(alias.clone(), path.to_string());
                    return alias;
                }
            }
        }
    }

    fn declare(&mut self, name: &str, constructor: &str) -> Result<(), BuildError> {
        if self.declarations.iter().any(|(n, _)| n == name) {
            return Err(BuildError::DuplicateConstructor(name.to_string()));
        }
        self.declarations
            .push((name.to_string(), constructor.to_string()));
        Ok(())
    }
}

/// Write the process entrypoint `main.go` into the module.
///
/// The main method parses one command-line flag per argument node, reports
/// anything missing, builds the graph, gets every instantiable contained
/// node, and waits for the graph to drain after an interrupt.
fn generate_main(
    instance_name: &str,
    arg_nodes: &[NodeRef],
    contained_nodes: &[NodeRef],
    module: &GoModule,
    graph: &GraphFile,
) -> Result<(), BuildError> {
    let instantiate: Vec<String> = contained_nodes
        .iter()
        .filter(|n| n.borrow().as_graph_instance().is_some())
        .map(|n| n.name())
        .collect();

    let mut out = String::from(
        "// Code generated by the weave goproc plugin. DO NOT EDIT.\n\
         package main\n\nimport (\n\t\"flag\"\n\t\"log\"\n\t\"os\"\n\t\"os/signal\"\n\t\"strings\"\n\n",
    );
    out.push_str(&format!("\t\"{}/goproc\"\n)\n\n", module.name()));

    out.push_str(
        "var missingArgs []string\n\n\
         func checkArg(name string, value string) {\n\
         \tif value == \"\" {\n\
         \t\tmissingArgs = append(missingArgs, name)\n\
         \t\treturn\n\
         \t}\n\
         \tlog.Printf(\"%v = %v\", name, value)\n\
         }\n\n",
    );

    out.push_str("func main() {\n");
    out.push_str(&format!("\tlog.Printf(\"running {instance_name}\")\n\n"));

    for arg in arg_nodes {
        let doc = arg.to_string().replace('"', "'");
        out.push_str(&format!(
            "\t{} := flag.String(\"{}\", \"\", \"automatically generated from the wiring IR: {}\")\n",
            stringutil::clean_name(&arg.name()),
            arg.name(),
            doc
        ));
    }
    out.push_str("\tflag.Parse()\n\n");
    for arg in arg_nodes {
        out.push_str(&format!(
            "\tcheckArg(\"{}\", *{})\n",
            arg.name(),
            stringutil::clean_name(&arg.name())
        ));
    }
    out.push_str(
        "\tif len(missingArgs) > 0 {\n\
         \t\tlog.Fatalf(\"missing required arguments:\\n  %s\", strings.Join(missingArgs, \"\\n  \"))\n\
         \t}\n\n",
    );

    if arg_nodes.is_empty() {
        out.push_str("\tgraphArgs := map[string]string{}\n\n");
    } else {
        out.push_str("\tgraphArgs := map[string]string{\n");
        for arg in arg_nodes {
            out.push_str(&format!(
                "\t\t\"{}\": *{},\n",
                arg.name(),
                stringutil::clean_name(&arg.name())
            ));
        }
        out.push_str("\t}\n\n");
    }

    out.push_str(&format!("\tg := goproc.{}(graphArgs)\n\n", graph.func_name()));

    if !instantiate.is_empty() {
        out.push_str("\tvar node any\n");
        for name in &instantiate {
            out.push_str(&format!(
                "\tif err := g.Get(\"{name}\", &node); err != nil {{\n\t\tlog.Fatal(err)\n\t}}\n"
            ));
        }
        out.push('\n');
    }

    out.push_str(
        "\tsignals := make(chan os.Signal, 1)\n\
         \tsignal.Notify(signals, os.Interrupt)\n\
         \tgo func() {\n\
         \t\tfor sig := range signals {\n",
    );
    out.push_str(&format!(
        "\t\t\tlog.Printf(\"{instance_name} received %v, shutting down\", sig)\n"
    ));
    out.push_str("\t\t\tg.Cancel()\n\t\t}\n\t}()\n\n");
    out.push_str("\tg.WaitGroup().Wait()\n");
    out.push_str(&format!("\tlog.Printf(\"{instance_name} exiting\")\n}}\n"));

    ioutil::write_file(&module.dir().join("main.go"), &out)
}
