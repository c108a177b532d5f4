//! Go workspace assembly: module subdirectories, `go.mod` descriptors, the
//! `go.work` manifest, and post-generation tidying.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ioutil;
use crate::wiring::error::BuildError;

/// A Go workspace under construction.
///
/// Modules are accumulated into subdirectories, either generated fresh with
/// [`create_module`] or copied from elsewhere with [`add_local_module`].
/// [`finish`] writes the `go.work` manifest, rewires every module's
/// descriptor to its siblings, and resolves remaining imports with
/// `go mod tidy`.
///
/// [`create_module`]: GoWorkspace::create_module
/// [`add_local_module`]: GoWorkspace::add_local_module
/// [`finish`]: GoWorkspace::finish
pub struct GoWorkspace {
    dir: PathBuf,
    tidy: bool,
    /// Module path to subdirectory name.
    subdirs: BTreeMap<String, String>,
    /// Subdirectory name to module path.
    modules: BTreeMap<String, String>,
}

impl GoWorkspace {
    /// Open a workspace rooted at `dir`, creating the directory if needed.
    pub fn new(dir: &Path) -> Result<GoWorkspace, BuildError> {
        ioutil::check_dir(dir, true)?;
        Ok(GoWorkspace {
            dir: dir.to_path_buf(),
            tidy: true,
            subdirs: BTreeMap::new(),
            modules: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Enable or disable running `go mod tidy` during [`finish`].
    ///
    /// Tests disable it; tidying needs the Go toolchain and module
    /// resolution.
    ///
    /// [`finish`]: GoWorkspace::finish
    pub fn set_tidy(&mut self, tidy: bool) {
        self.tidy = tidy;
    }

    /// Create a fresh module and write its initial descriptor.
    ///
    /// The subdirectory is the final segment of the module path; name
    /// collisions get a numeric suffix. Creating the same module path twice
    /// is an error.
    pub fn create_module(&mut self, module_path: &str) -> Result<GoModule, BuildError> {
        if self.subdirs.contains_key(module_path) {
            return Err(BuildError::DuplicateModule(module_path.to_string()));
        }
        let subdir = self.claim_subdir(module_path);
        let dir = self.dir.join(&subdir);
        ioutil::check_dir(&dir, true)?;
        tracing::debug!("creating module {module_path} in {}", dir.display());

        let module = GoModule {
            module_path: module_path.to_string(),
            dir,
            requires: BTreeMap::new(),
        };
        module.write_descriptor()?;
        self.subdirs.insert(module_path.to_string(), subdir.clone());
        self.modules.insert(subdir, module_path.to_string());
        Ok(module)
    }

    /// Copy an existing module directory into the workspace.
    ///
    /// The module path is read from the source's `go.mod`. Adding a module
    /// that is already present is a no-op. Returns the module's directory
    /// within the workspace.
    pub fn add_local_module(&mut self, src: &Path) -> Result<PathBuf, BuildError> {
        let modfile = src.join("go.mod");
        let contents = fs::read_to_string(&modfile)?;
        let module_path =
            module_decl(&contents).ok_or_else(|| BuildError::InvalidGoMod(modfile.clone()))?;

        if let Some(subdir) = self.subdirs.get(&module_path) {
            return Ok(self.dir.join(subdir));
        }
        let subdir = self.claim_subdir(&module_path);
        let dst = self.dir.join(&subdir);
        tracing::debug!("copying module {module_path} to {}", dst.display());
        ioutil::copy_dir(src, &dst)?;
        self.subdirs.insert(module_path.clone(), subdir.clone());
        self.modules.insert(subdir, module_path);
        Ok(dst)
    }

    /// Write the `go.work` manifest and rewire module descriptors.
    ///
    /// Each module's `go.mod` gets a replace directive for every sibling
    /// module whether or not it imports it; replace directives already
    /// present are dropped first. Finally runs `go mod tidy` per module
    /// unless tidying is disabled.
    pub fn finish(&self) -> Result<(), BuildError> {
        let mut work = String::from("go 1.20\n\nuse (\n");
        for subdir in self.modules.keys() {
            work.push_str("\t./");
            work.push_str(subdir);
            work.push('\n');
        }
        work.push_str(")\n");
        ioutil::write_file(&self.dir.join("go.work"), &work)?;

        for (subdir, module_path) in &self.modules {
            self.rewire_descriptor(subdir, module_path)?;
        }

        if self.tidy {
            for subdir in self.modules.keys() {
                ioutil::run_command(&self.dir.join(subdir), "go", &["mod", "tidy"])?;
            }
        }
        Ok(())
    }

    /// Find an unused subdirectory name for the module.
    fn claim_subdir(&self, module_path: &str) -> String {
        let short = module_path.rsplit('/').next().unwrap_or(module_path);
        let mut subdir = short.to_string();
        let mut suffix = 0;
        while self.modules.contains_key(&subdir) {
            suffix += 1;
            subdir = format!("{short}{suffix}");
        }
        subdir
    }

    fn rewire_descriptor(&self, subdir: &str, module_path: &str) -> Result<(), BuildError> {
        let path = self.dir.join(subdir).join("go.mod");
        let contents = fs::read_to_string(&path)?;

        let mut out = String::new();
        let mut in_replace_block = false;
        for line in contents.lines() {
            if in_replace_block {
                if line.trim() == ")" {
                    in_replace_block = false;
                }
                continue;
            }
            let trimmed = line.trim();
            if trimmed.starts_with("replace (") {
                tracing::warn!("dropping stale replace block from {}", path.display());
                in_replace_block = true;
                continue;
            }
            if trimmed.starts_with("replace ") {
                tracing::warn!("dropping stale {trimmed:?} from {}", path.display());
                continue;
            }
            out.push_str(line);
            out.push('\n');
        }

        for (other_subdir, other_path) in &self.modules {
            if other_path == module_path {
                continue;
            }
            out.push_str(&format!("\nreplace {other_path} => ../{other_subdir}\n"));
        }
        ioutil::write_file(&path, &out)
    }
}

/// A single Go module inside a [`GoWorkspace`].
///
/// Tracks explicit requirements; the descriptor on disk is rewritten with
/// [`write_descriptor`] once code generation into the module is done.
///
/// [`write_descriptor`]: GoModule::write_descriptor
pub struct GoModule {
    module_path: String,
    dir: PathBuf,
    requires: BTreeMap<String, String>,
}

impl GoModule {
    /// Fully qualified module path, as declared in `go.mod`.
    pub fn name(&self) -> &str {
        &self.module_path
    }

    /// Directory the module's sources live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record a module requirement. An empty version pins `v0.0.0`.
    pub fn require(&mut self, module_path: &str, version: &str) {
        let version = if version.is_empty() { "v0.0.0" } else { version };
        self.requires
            .insert(module_path.to_string(), version.to_string());
    }

    /// Write the module's `go.mod` descriptor.
    pub fn write_descriptor(&self) -> Result<(), BuildError> {
        let mut out = format!("module {}\n\ngo 1.20\n", self.module_path);
        if !self.requires.is_empty() {
            out.push_str("\nrequire (\n");
            for (path, version) in &self.requires {
                out.push_str(&format!("\t{path} {version}\n"));
            }
            out.push_str(")\n");
        }
        ioutil::write_file(&self.dir.join("go.mod"), &out)
    }
}

/// Extract the module path from `go.mod` contents.
fn module_decl(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        line.trim()
            .strip_prefix("module ")
            .map(|path| path.trim().to_string())
    })
}
