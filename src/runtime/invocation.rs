//! Resolution of the renderer executable and construction of its command lines.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use tokio::process::Command;

pub const DEFAULT_BIN_NAME: &str = "slidev";
pub const DEFAULT_PACKAGE_RUNNER: &[&str] = &["npx", "--yes", "@slidev/cli"];

/// Where the renderer executable was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySource {
    Override,
    ProjectLocal,
    WorkspaceLocal,
    PackageRunner,
}

impl BinarySource {
    pub fn as_str(self) -> &'static str {
        match self {
            BinarySource::Override => "override",
            BinarySource::ProjectLocal => "project_local",
            BinarySource::WorkspaceLocal => "workspace_local",
            BinarySource::PackageRunner => "package_runner",
        }
    }
}

impl fmt::Display for BinarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ready-to-spawn renderer command plus what was resolved to build it.
#[derive(Debug)]
pub struct RendererCommand {
    pub command: Command,
    pub program: String,
    pub source: BinarySource,
}

#[derive(Debug, Clone)]
pub struct RendererInvocation {
    binary_override: Option<PathBuf>,
    bin_name: String,
    workspace_root: Option<PathBuf>,
    package_runner: Vec<String>,
}

impl Default for RendererInvocation {
    fn default() -> Self {
        Self {
            binary_override: None,
            bin_name: DEFAULT_BIN_NAME.to_string(),
            workspace_root: None,
            package_runner: DEFAULT_PACKAGE_RUNNER
                .iter()
                .map(|part| part.to_string())
                .collect(),
        }
    }
}

impl RendererInvocation {
    pub fn new(
        binary_override: Option<PathBuf>,
        bin_name: impl Into<String>,
        workspace_root: Option<PathBuf>,
        package_runner: Vec<String>,
    ) -> Self {
        let package_runner = if package_runner.is_empty() {
            Self::default().package_runner
        } else {
            package_runner
        };
        Self {
            binary_override,
            bin_name: bin_name.into(),
            workspace_root,
            package_runner,
        }
    }

    /// Invocation that always runs `binary`, used by tests and `renderer.binary`.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary_override: Some(binary.into()),
            ..Self::default()
        }
    }

    /// `<bin> <entry> --port <port> --base <base>`
    pub fn preview_command(&self, entry_file: &Path, port: u16, base: &str) -> RendererCommand {
        let mut resolved = self.base_command(entry_file);
        resolved
            .command
            .arg(entry_file)
            .arg("--port")
            .arg(port.to_string())
            .arg("--base")
            .arg(base);
        resolved
    }

    /// `<bin> build <entry> --base <base> --out <out_dir>`
    pub fn build_command(&self, entry_file: &Path, base: &str, out_dir: &Path) -> RendererCommand {
        let mut resolved = self.base_command(entry_file);
        resolved
            .command
            .arg("build")
            .arg(entry_file)
            .arg("--base")
            .arg(base)
            .arg("--out")
            .arg(out_dir);
        resolved
    }

    /// Resolve the executable: explicit override, then the project's own
    /// `node_modules/.bin`, then the workspace root's, then the package runner.
    pub fn resolve(&self, entry_file: &Path) -> (Vec<String>, BinarySource) {
        if let Some(binary) = &self.binary_override {
            return (
                vec![binary.to_string_lossy().into_owned()],
                BinarySource::Override,
            );
        }

        let local_candidates = [
            (project_dir(entry_file), BinarySource::ProjectLocal),
            (self.workspace_root.as_deref(), BinarySource::WorkspaceLocal),
        ];
        for (dir, source) in local_candidates {
            let Some(dir) = dir else { continue };
            let candidate = dir.join("node_modules").join(".bin").join(&self.bin_name);
            if candidate.is_file() {
                return (vec![candidate.to_string_lossy().into_owned()], source);
            }
        }

        (self.package_runner.clone(), BinarySource::PackageRunner)
    }

    fn base_command(&self, entry_file: &Path) -> RendererCommand {
        let (parts, source) = self.resolve(entry_file);
        let (program, leading_args) = match parts.split_first() {
            Some((program, rest)) => (program.clone(), rest.to_vec()),
            None => (self.bin_name.clone(), Vec::new()),
        };

        let mut command = Command::new(&program);
        command.args(&leading_args);
        if let Some(dir) = project_dir(entry_file) {
            command.current_dir(dir);
        }

        RendererCommand {
            command,
            program,
            source,
        }
    }
}

fn project_dir(entry_file: &Path) -> Option<&Path> {
    entry_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
}

#[cfg(test)]
mod tests {
    use std::{ffi::OsStr, fs};

    use tempfile::TempDir;

    use super::*;

    fn args_of(command: &RendererCommand) -> Vec<String> {
        command
            .command
            .as_std()
            .get_args()
            .map(OsStr::to_string_lossy)
            .map(|arg| arg.into_owned())
            .collect()
    }

    #[test]
    fn override_wins_over_local_installs() {
        let dir = TempDir::new().expect("temp dir");
        let bin_dir = dir.path().join("node_modules/.bin");
        fs::create_dir_all(&bin_dir).expect("bin dir");
        fs::write(bin_dir.join("slidev"), "").expect("local bin");

        let invocation = RendererInvocation::with_binary("/opt/render/bin/slidev");
        let (parts, source) = invocation.resolve(&dir.path().join("slides.md"));
        assert_eq!(source, BinarySource::Override);
        assert_eq!(parts, vec!["/opt/render/bin/slidev".to_string()]);
    }

    #[test]
    fn project_local_binary_precedes_workspace() {
        let project = TempDir::new().expect("project");
        let workspace = TempDir::new().expect("workspace");
        for root in [project.path(), workspace.path()] {
            let bin_dir = root.join("node_modules/.bin");
            fs::create_dir_all(&bin_dir).expect("bin dir");
            fs::write(bin_dir.join("slidev"), "").expect("bin");
        }

        let invocation = RendererInvocation::new(
            None,
            "slidev",
            Some(workspace.path().to_path_buf()),
            Vec::new(),
        );
        let (_, source) = invocation.resolve(&project.path().join("slides.md"));
        assert_eq!(source, BinarySource::ProjectLocal);

        fs::remove_file(project.path().join("node_modules/.bin/slidev")).expect("remove");
        let (parts, source) = invocation.resolve(&project.path().join("slides.md"));
        assert_eq!(source, BinarySource::WorkspaceLocal);
        assert!(parts[0].starts_with(&*workspace.path().to_string_lossy()));
    }

    #[test]
    fn falls_back_to_package_runner() {
        let project = TempDir::new().expect("project");
        let invocation = RendererInvocation::default();
        let entry = project.path().join("slides.md");
        let command = invocation.preview_command(&entry, 3030, "/api/slides/preview/4/");

        assert_eq!(command.source, BinarySource::PackageRunner);
        assert_eq!(command.program, "npx");
        assert_eq!(
            args_of(&command),
            vec![
                "--yes".to_string(),
                "@slidev/cli".to_string(),
                entry.to_string_lossy().into_owned(),
                "--port".to_string(),
                "3030".to_string(),
                "--base".to_string(),
                "/api/slides/preview/4/".to_string(),
            ]
        );
        assert_eq!(command.command.as_std().get_current_dir(), Some(project.path()));
    }

    #[test]
    fn build_command_targets_output_directory() {
        let invocation = RendererInvocation::with_binary("slidev");
        let command = invocation.build_command(
            Path::new("/srv/projects/a/slides.md"),
            "/api/slides/presentation/9/",
            Path::new("/srv/presentation/.tmp123"),
        );
        assert_eq!(
            args_of(&command),
            vec![
                "build",
                "/srv/projects/a/slides.md",
                "--base",
                "/api/slides/presentation/9/",
                "--out",
                "/srv/presentation/.tmp123",
            ]
        );
    }
}
