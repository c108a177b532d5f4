//! Dockerfile generation for container images.
//!
//! By default the image builds its processes at image build time by
//! invoking the workspace's `build.sh`. Processes can instead contribute
//! their own Dockerfile build stage; when any process does, the default
//! build is replaced by a multi-stage file that compiles in the
//! contributed stages and copies the resulting binaries into a slim
//! runtime image.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::ioutil;
use crate::stringutil;
use crate::wiring::error::BuildError;

/// The Dockerfile of one container image under construction.
pub struct Dockerfile {
    workspace_dir: PathBuf,
    custom: BTreeMap<String, String>,
}

impl Dockerfile {
    pub fn new(workspace_dir: &Path) -> Dockerfile {
        Dockerfile {
            workspace_dir: workspace_dir.to_path_buf(),
            custom: BTreeMap::new(),
        }
    }

    /// Replace the default build of one process with custom commands.
    ///
    /// `commands` must define a build stage named `<proc>_build` that
    /// leaves the process binary at `/out/<proc>`.
    pub fn add_custom_commands(&mut self, proc_name: &str, commands: &str) {
        self.custom.insert(
            stringutil::clean_name(proc_name),
            commands.trim_end().to_string(),
        );
    }

    /// Write the `Dockerfile` at the workspace root.
    pub fn generate(&self) -> Result<(), BuildError> {
        let contents = if self.custom.is_empty() {
            default_dockerfile()
        } else {
            self.staged_dockerfile()
        };
        ioutil::write_file(&self.workspace_dir.join("Dockerfile"), &contents)
    }

    fn staged_dockerfile(&self) -> String {
        let mut out = String::new();
        for commands in self.custom.values() {
            out.push_str(commands);
            out.push_str("\n\n");
        }
        out.push_str("FROM debian:bookworm-slim\nWORKDIR /app\nCOPY . /app\n");
        for proc in self.custom.keys() {
            out.push_str(&format!(
                "COPY --from={proc}_build /out/{proc} /app/{proc}/bin/{proc}\n"
            ));
        }
        out.push_str("ENTRYPOINT [\"/bin/bash\", \"run.sh\"]\n");
        out
    }
}

fn default_dockerfile() -> String {
    "FROM golang:1.21\n\
     WORKDIR /app\n\
     COPY . /app\n\
     RUN chmod +x build.sh && ./build.sh\n\
     ENTRYPOINT [\"/bin/bash\", \"run.sh\"]\n"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dockerfile_builds_in_the_image() {
        let dir = tempfile::tempdir().unwrap();
        Dockerfile::new(dir.path()).generate().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("Dockerfile")).unwrap();
        assert!(contents.starts_with("FROM golang:1.21\n"));
        assert!(contents.contains("RUN chmod +x build.sh && ./build.sh"));
        assert!(contents.contains("ENTRYPOINT [\"/bin/bash\", \"run.sh\"]"));
    }

    #[test]
    fn custom_commands_replace_the_default_build() {
        let dir = tempfile::tempdir().unwrap();
        let mut dockerfile = Dockerfile::new(dir.path());
        dockerfile.add_custom_commands(
            "a_proc",
            "FROM golang:1.21 AS a_proc_build\nRUN go build -o /out/a_proc .\n",
        );
        dockerfile.generate().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("Dockerfile")).unwrap();
        assert!(contents.starts_with("FROM golang:1.21 AS a_proc_build\n"));
        assert!(!contents.contains("build.sh"));
        assert!(contents.contains("FROM debian:bookworm-slim"));
        assert!(contents.contains("COPY --from=a_proc_build /out/a_proc /app/a_proc/bin/a_proc"));
        assert!(contents.ends_with("ENTRYPOINT [\"/bin/bash\", \"run.sh\"]\n"));
    }

    #[test]
    fn stages_appear_for_every_contributing_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut dockerfile = Dockerfile::new(dir.path());
        dockerfile.add_custom_commands("b_proc", "FROM golang:1.21 AS b_proc_build\n");
        dockerfile.add_custom_commands("a_proc", "FROM golang:1.21 AS a_proc_build\n");
        dockerfile.generate().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("Dockerfile")).unwrap();
        let a = contents.find("AS a_proc_build").unwrap();
        let b = contents.find("AS b_proc_build").unwrap();
        assert!(a < b);
        assert!(contents.contains("COPY --from=a_proc_build"));
        assert!(contents.contains("COPY --from=b_proc_build"));
    }
}
