//! Build and run script generation for process workspaces.
//!
//! Processes contribute two kinds of shell text: optional build scripts
//! that live inside their process dir, and runfuncs declaring how to start
//! the process. The workspace collects both and emits a `build.sh` and a
//! `run.sh` at its root when it finishes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::ioutil;
use crate::ir::NodeRef;
use crate::stringutil;
use crate::wiring::error::BuildError;

/// Collects build scripts contributed by processes and renders `build.sh`.
///
/// Scripts run in the order of their path within the workspace, each from
/// its own directory.
pub struct BuildScript {
    workspace_dir: PathBuf,
    scripts: BTreeMap<String, BuildCommand>,
}

struct BuildCommand {
    dir: String,
    file_name: String,
}

impl BuildScript {
    pub fn new(workspace_dir: &Path) -> BuildScript {
        BuildScript {
            workspace_dir: workspace_dir.to_path_buf(),
            scripts: BTreeMap::new(),
        }
    }

    /// Register a script to be invoked by `build.sh`.
    ///
    /// `path` must point inside this workspace, i.e. under a dir returned
    /// by `create_process_dir`.
    pub fn add(&mut self, path: &Path) -> Result<(), BuildError> {
        let rel = path
            .strip_prefix(&self.workspace_dir)
            .map_err(|_| BuildError::PathOutsideWorkspace {
                path: path.to_path_buf(),
                workspace: self.workspace_dir.clone(),
            })?;
        let file_name = match rel.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => {
                return Err(BuildError::PathOutsideWorkspace {
                    path: path.to_path_buf(),
                    workspace: self.workspace_dir.clone(),
                })
            }
        };
        let dir = match rel.parent() {
            Some(parent) if parent != Path::new("") => parent.to_string_lossy().into_owned(),
            _ => ".".to_string(),
        };
        self.scripts.insert(
            rel.to_string_lossy().into_owned(),
            BuildCommand { dir, file_name },
        );
        Ok(())
    }

    /// Write `build.sh` at the workspace root.
    pub fn generate(&self) -> Result<(), BuildError> {
        let mut out = String::from("#!/bin/bash\n");
        for (path, cmd) in &self.scripts {
            out.push_str(&format!(
                "\necho \"Executing {path}\"\ncd {dir}\nchmod +x {file}\n./{file}\ncd -\n",
                dir = cmd.dir,
                file = cmd.file_name,
            ));
        }
        ioutil::write_file(&self.workspace_dir.join("build.sh"), &out)
    }
}

/// Collects process runfuncs and renders `run.sh`.
///
/// Each contributed runfunc is wrapped in a generated function that starts
/// the process's local dependencies first, invokes the contributed body,
/// and verifies that the body exported the env var named after the
/// process. Nodes that are required by some process but not started by any
/// runfunc become env vars the calling environment must set.
pub struct RunScript {
    workspace_name: String,
    workspace_dir: PathBuf,
    runfuncs: BTreeMap<String, RunFunc>,
    required: BTreeSet<String>,
}

struct RunFunc {
    body: String,
    deps: Vec<String>,
}

impl RunScript {
    pub fn new(workspace_name: &str, workspace_dir: &Path) -> RunScript {
        RunScript {
            workspace_name: workspace_name.to_string(),
            workspace_dir: workspace_dir.to_path_buf(),
            runfuncs: BTreeMap::new(),
            required: BTreeSet::new(),
        }
    }

    /// Record a node whose env var must be set before `run.sh` proceeds.
    pub fn require(&mut self, node: &NodeRef) {
        self.required.insert(node.name());
    }

    /// Contribute the runfunc that starts the named process.
    ///
    /// The body between the outermost braces is extracted and reindented;
    /// the contributed function name is discarded in favor of a generated
    /// wrapper. Dependencies are registered as required nodes.
    pub fn add(&mut self, name: &str, runfunc: &str, deps: &[NodeRef]) -> Result<(), BuildError> {
        let body = match func_body(runfunc) {
            Some(body) if !body.is_empty() => body,
            _ => return Err(BuildError::InvalidRunFunc(name.to_string())),
        };
        let body = stringutil::reindent(body.trim_matches('\n'), 8);

        let mut dep_names = Vec::new();
        for dep in deps {
            let dep_name = dep.name();
            self.required.insert(dep_name.clone());
            dep_names.push(dep_name);
        }

        self.runfuncs.insert(
            name.to_string(),
            RunFunc {
                body,
                deps: dep_names,
            },
        );
        Ok(())
    }

    /// Write `run.sh` at the workspace root.
    pub fn generate(&self) -> Result<(), BuildError> {
        let args: Vec<&String> = self
            .required
            .iter()
            .filter(|name| !self.runfuncs.contains_key(*name))
            .collect();

        let mut out = String::from("#!/bin/bash\n\n");
        out.push_str(&format!("WORKSPACE_NAME=\"{}\"\n", self.workspace_name));
        out.push_str("WORKSPACE_DIR=$(pwd)\n\n");

        out.push_str("usage() {\n");
        out.push_str("\techo \"Usage: $0 [-h]\" 1>&2\n");
        out.push_str("\techo \"  Required environment variables:\"\n");
        for name in &args {
            let env = stringutil::env_var(name);
            out.push_str(&format!(
                "\tif [ -z \"${{{env}+x}}\" ]; then\n\
                 \t\techo \"    {env} (missing)\"\n\
                 \telse\n\
                 \t\techo \"    {env}=${env}\"\n\
                 \tfi\n"
            ));
        }
        out.push_str("\texit 1\n}\n\n");

        out.push_str(
            "while getopts \"h\" flag; do\n\
             \tcase $flag in\n\
             \t\t*)\n\
             \t\tusage\n\
             \t\t;;\n\
             \tesac\n\
             done\n\n",
        );

        for (name, runfunc) in &self.runfuncs {
            out.push_str(&self.render_runfunc(name, runfunc));
            out.push('\n');
        }

        out.push_str("run_all() {\n");
        out.push_str(&format!("\techo \"Running {}\"\n\n", self.workspace_name));
        out.push_str("\t# Check that all necessary environment variables are set\n");
        out.push_str("\techo \"Required environment variables:\"\n");
        out.push_str("\tmissing_vars=0\n");
        for name in &args {
            let env = stringutil::env_var(name);
            out.push_str(&format!(
                "\tif [ -z \"${{{env}+x}}\" ]; then\n\
                 \t\techo \"  {env} (missing)\"\n\
                 \t\tmissing_vars=$((missing_vars+1))\n\
                 \telse\n\
                 \t\techo \"  {env}=${env}\"\n\
                 \tfi\n"
            ));
        }
        out.push_str(
            "\n\tif [ \"$missing_vars\" -gt 0 ]; then\n\
             \t\techo \"Aborting due to missing environment variables\"\n\
             \t\treturn 1\n\
             \tfi\n\n",
        );
        for name in self.runfuncs.keys() {
            out.push_str(&format!("\t{}\n", stringutil::clean_name(name)));
        }
        out.push_str("\twait\n}\n\nrun_all\n");

        ioutil::write_file(&self.workspace_dir.join("run.sh"), &out)
    }

    /// Render the wrapper function for one process.
    ///
    /// Dependencies with runfuncs of their own are started first, guarded
    /// by their exported env var so a process shared by several dependents
    /// starts once. Dependencies without local runfuncs are covered by the
    /// env var checks in `run_all`.
    fn render_runfunc(&self, name: &str, runfunc: &RunFunc) -> String {
        let func = stringutil::clean_name(name);
        let env = stringutil::env_var(name);

        let mut deps = String::new();
        for dep in &runfunc.deps {
            if !self.runfuncs.contains_key(dep) {
                continue;
            }
            let dep_func = stringutil::clean_name(dep);
            let dep_env = stringutil::env_var(dep);
            deps.push_str(&format!(
                "\tif [ -z \"${{{dep_env}+x}}\" ]; then\n\
                 \t\t{dep_func} || return $?\n\
                 \t\tcd $WORKSPACE_DIR\n\
                 \tfi\n\n"
            ));
        }

        format!(
            "{func}() {{\n\
             \tcd $WORKSPACE_DIR\n\n\
             {deps}\
             \trun_{func}() {{\n\
             {body}\n\
             \t}}\n\n\
             \tif run_{func}; then\n\
             \t\tif [ -z \"${{{env}+x}}\" ]; then\n\
             \t\t\techo \"${{WORKSPACE_NAME}} error starting {name}: function {func} did not set {env}\"\n\
             \t\t\treturn 1\n\
             \t\telse\n\
             \t\t\techo \"${{WORKSPACE_NAME}} started {name}\"\n\
             \t\t\treturn 0\n\
             \t\tfi\n\
             \telse\n\
             \t\texitcode=$?\n\
             \t\techo \"${{WORKSPACE_NAME}} aborting {name} due to exitcode ${{exitcode}} from {func}\"\n\
             \t\treturn $exitcode\n\
             \tfi\n\
             }}\n",
            body = runfunc.body,
        )
    }
}

/// Extract the text between the outermost braces of a shell function.
fn func_body(runfunc: &str) -> Option<&str> {
    let from = runfunc.find('{')?;
    let to = runfunc.rfind('}')?;
    if from + 1 > to {
        return None;
    }
    Some(&runfunc[from + 1..to])
}
