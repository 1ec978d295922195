use mk_core::{DriverError, RunnerError};
use thiserror::Error;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("`{cmd}` exited with code {code}: {stderr}")]
    NonZeroExit {
        cmd: String,
        code: i32,
        stderr: String,
    },
    #[error("spawn `{cmd}` failed: {reason}")]
    Spawn { cmd: String, reason: String },
    #[error("`{0}` killed by signal")]
    KilledBySignal(String),
    #[error("no such container: {0}")]
    NoSuchContainer(String),
    #[error("unexpected output from `{cmd}`: {output}")]
    Parse { cmd: String, output: String },
    #[error("io error: {0}")]
    Io(String),
    #[error("cancelled")]
    Cancelled,
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

impl From<RunnerError> for ExecError {
    fn from(e: RunnerError) -> Self {
        match e {
            RunnerError::NonZeroExit { cmd, code, stderr } => ExecError::NonZeroExit { cmd, code, stderr },
            RunnerError::Spawn { cmd, reason } => ExecError::Spawn { cmd, reason },
            RunnerError::KilledBySignal { cmd } => ExecError::KilledBySignal(cmd),
            other => ExecError::Io(other.to_string()),
        }
    }
}

impl From<ExecError> for RunnerError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::NonZeroExit { cmd, code, stderr } => RunnerError::NonZeroExit { cmd, code, stderr },
            ExecError::Spawn { cmd, reason } => RunnerError::Spawn { cmd, reason },
            ExecError::KilledBySignal(cmd) => RunnerError::KilledBySignal { cmd },
            other => RunnerError::Io(std::io::Error::other(other.to_string())),
        }
    }
}

impl From<ExecError> for DriverError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::NoSuchContainer(name) => DriverError::NotFound(name),
            ExecError::Cancelled => DriverError::Cancelled,
            other => DriverError::op("oci", other),
        }
    }
}
