//! External command execution.
//!
//! Every external tool (debootstrap, apt-get inside a chroot, tar, mount,
//! mksquashfs, xorriso, ...) is described as an argument vector and handed
//! to a [`CommandExecutor`]. Nothing is ever routed through a shell, so
//! paths never need quoting.
//!
//! Commands that must run inside a rootfs use [`CommandSpec::chroot`],
//! which produces `chroot <root> <argv...>`. When the command needs a
//! working directory inside the rootfs, the argv is prefixed with
//! `env -C <dir>` since `chroot(1)` always starts at `/`.

use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::debug;

/// A single external command: program, arguments, extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// `chroot <root> <argv...>`.
    pub fn chroot<I, S>(root: &Path, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new("chroot").arg_path(root).args(argv)
    }

    /// `chroot <root> env -C <dir> <argv...>`: run with a working directory
    /// inside the rootfs.
    pub fn chroot_in<I, S>(root: &Path, dir: &str, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::chroot(root, ["env", "-C", dir]).args(argv)
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set an environment variable for the child (inherited across `chroot`).
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Runs commands synchronously and reports success or failure.
pub trait CommandExecutor {
    fn run(&self, cmd: &CommandSpec) -> Result<()>;
}

/// Runs commands on the host with inherited stdio so long-running tools
/// (debootstrap, apt-get, mksquashfs) stream their progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn run(&self, cmd: &CommandSpec) -> Result<()> {
        debug!("running: {}", cmd);

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        let status = command
            .status()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", cmd.program))?;

        if !status.success() {
            match status.code() {
                Some(code) => bail!("'{}' failed (exit code {})", cmd, code),
                None => bail!("'{}' was terminated by a signal", cmd),
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn chroot_builds_argv() {
        let cmd = CommandSpec::chroot(Path::new("/build/base"), ["apt-get", "update"]);
        assert_eq!(cmd.argv(), vec!["chroot", "/build/base", "apt-get", "update"]);
        assert_eq!(cmd.to_string(), "chroot /build/base apt-get update");
    }

    #[test]
    fn chroot_in_sets_working_dir_inside_root() {
        let cmd = CommandSpec::chroot_in(
            Path::new("/r"),
            "/usr/share/limeos/packages/bios",
            ["apt-get", "download", "grub-pc"],
        );
        assert_eq!(
            cmd.argv(),
            vec![
                "chroot",
                "/r",
                "env",
                "-C",
                "/usr/share/limeos/packages/bios",
                "apt-get",
                "download",
                "grub-pc"
            ]
        );
    }

    #[test]
    fn paths_with_spaces_stay_one_argument() {
        let cmd = CommandSpec::new("tar").arg("-xzf").arg_path(Path::new("/tmp/my cache/a.tar.gz"));
        assert_eq!(cmd.get_args().len(), 2);
        assert_eq!(cmd.get_args()[1], "/tmp/my cache/a.tar.gz");
    }

    #[test]
    fn system_executor_reports_exit_status() {
        assert!(SystemExecutor.run(&CommandSpec::new("true")).is_ok());
        let err = SystemExecutor.run(&CommandSpec::new("false")).unwrap_err();
        assert!(err.to_string().contains("exit code 1"));
        assert!(SystemExecutor
            .run(&CommandSpec::new("definitely_not_a_real_command_12345"))
            .is_err());
    }

    #[test]
    fn system_executor_applies_env() {
        let temp = TempDir::new().unwrap();
        let cmd = CommandSpec::new("sh")
            .args(["-c", "printf %s \"$GREETING\" > \"$1\"", "sh"])
            .arg_path(&temp.path().join("out.txt"))
            .env("GREETING", "hello");
        SystemExecutor.run(&cmd).unwrap();
        assert_eq!(std::fs::read_to_string(temp.path().join("out.txt")).unwrap(), "hello");
    }
}
