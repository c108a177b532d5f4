//! Filesystem helpers for plugins that produce artifacts.
//!
//! All generated output funnels through these functions so that error
//! reporting (which path, which node) stays uniform across plugins.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::stringutil;
use crate::wiring::error::BuildError;

/// Ensure `path` is a directory.
///
/// If the path does not exist, `create_if_absent` decides whether it is
/// created or reported as missing. A path that exists but is not a
/// directory is always an error.
pub fn check_dir(path: &Path, create_if_absent: bool) -> Result<(), BuildError> {
    match fs::metadata(path) {
        Ok(info) if info.is_dir() => Ok(()),
        Ok(_) => Err(BuildError::NotADirectory(path.to_path_buf())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if !create_if_absent {
                return Err(BuildError::DirMissing(path.to_path_buf()));
            }
            fs::create_dir_all(path).map_err(|source| BuildError::CreateDir {
                path: path.to_path_buf(),
                source,
            })
        }
        Err(err) => Err(BuildError::Io(err)),
    }
}

/// Create a subdirectory of `workspace_dir` for the named node.
///
/// The name is sanitized with [`stringutil::clean_name`] first.
pub fn create_node_dir(workspace_dir: &Path, name: &str) -> Result<PathBuf, BuildError> {
    let node_dir = workspace_dir.join(stringutil::clean_name(name));
    check_dir(&node_dir, true).map_err(|source| BuildError::NodeDir {
        name: name.to_string(),
        path: node_dir.clone(),
        source: Box::new(source),
    })?;
    Ok(node_dir)
}

/// Write `contents` to `path`, creating parent directories as needed.
pub fn write_file(path: &Path, contents: &str) -> Result<(), BuildError> {
    if let Some(parent) = path.parent() {
        check_dir(parent, true)?;
    }
    fs::write(path, contents).map_err(|source| BuildError::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively copy the directory tree at `src` into `dst`.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<(), BuildError> {
    check_dir(dst, true)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|source| BuildError::WriteFile {
                path: target.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

/// Run an external command in `dir`, capturing combined output.
///
/// A nonzero exit status becomes a [`BuildError::CommandFailed`] carrying
/// the command line, the working directory, and everything the tool printed.
pub fn run_command(dir: &Path, program: &str, args: &[&str]) -> Result<(), BuildError> {
    let command_line = if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    };
    tracing::info!("{command_line} ({})", dir.display());

    let output = Command::new(program).args(args).current_dir(dir).output()?;
    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(BuildError::CommandFailed {
            command: command_line,
            dir: dir.to_path_buf(),
            output: combined,
        });
    }
    Ok(())
}
