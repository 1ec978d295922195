use std::{fmt, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Command to run inside a unit (or on the host for bare metal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `sudo <program> <args...>`
    pub fn sudo(program: impl Into<String>) -> Self {
        Self::new("sudo").arg(program)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl RunResult {
    #[inline]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr.
    pub fn output(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// A local file to place inside the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAsset {
    pub source: PathBuf,
    pub target_dir: String,
    pub target_name: String,
    /// Octal mode, e.g. `0644`.
    pub permissions: String,
}

impl FileAsset {
    pub fn target_path(&self) -> String {
        if self.target_dir.ends_with('/') {
            format!("{}{}", self.target_dir, self.target_name)
        } else {
            format!("{}/{}", self.target_dir, self.target_name)
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("`{cmd}` exited with code {code}: {stderr}")]
    NonZeroExit { cmd: String, code: i32, stderr: String },
    #[error("spawn `{cmd}` failed: {reason}")]
    Spawn { cmd: String, reason: String },
    #[error("`{cmd}` killed by signal")]
    KilledBySignal { cmd: String },
    #[error("copy {src} -> {dst} failed: {reason}")]
    Copy {
        src: String,
        dst: String,
        reason: String,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes commands in a unit and copies files into it.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `cmd`; a non-zero exit is an error carrying stderr.
    async fn run_cmd(&self, cmd: &Cmd) -> Result<RunResult, RunnerError>;

    async fn copy(&self, asset: &FileAsset) -> Result<(), RunnerError>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sudo_mkdir_display() {
        let cmd = Cmd::sudo("mkdir").arg("-p").args(["/a", "/b"]);
        assert_eq!(cmd.program, "sudo");
        assert_eq!(cmd.to_string(), "sudo mkdir -p /a /b");
    }

    #[test]
    fn target_path_joins() {
        let mut a = FileAsset {
            source: "/h/files/etc/hosts".into(),
            target_dir: "/etc".into(),
            target_name: "hosts".into(),
            permissions: "0644".into(),
        };
        assert_eq!(a.target_path(), "/etc/hosts");
        a.target_dir = "/".into();
        assert_eq!(a.target_path(), "/hosts");
    }
}
