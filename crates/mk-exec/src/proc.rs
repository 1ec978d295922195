use std::process::Stdio;

use async_trait::async_trait;
use mk_core::{Cmd, CommandRunner, FileAsset, RunResult, RunnerError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    error::ExecError,
    util::{command_for, kill_graceful},
};

/// Runs commands on this host.
#[derive(Debug, Clone)]
pub struct ExecRunner {
    name: &'static str,
}

impl Default for ExecRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecRunner {
    pub fn new() -> Self {
        Self { name: "exec" }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Runs `cmd`, killing it when `cancel` fires.
    pub async fn run_cancellable(&self, cmd: &Cmd, cancel: &CancellationToken) -> Result<RunResult, ExecError> {
        trace!(target: "mk.exec.proc", %cmd, "spawn");

        let mut command = command_for(cmd);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| ExecError::Spawn {
            cmd: cmd.to_string(),
            reason: e.to_string(),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let read_out = tokio::spawn(read_all(stdout));
        let read_err = tokio::spawn(read_all(stderr));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                debug!(target: "mk.exec.proc", %cmd, "cancelled; killing child");
                let _ = kill_graceful(&mut child).await;
                return Err(ExecError::Cancelled);
            }
        };

        let stdout = read_out.await.unwrap_or_default();
        let stderr = read_err.await.unwrap_or_default();

        match status.code() {
            Some(0) => {
                trace!(target: "mk.exec.proc", %cmd, "exit success");
                Ok(RunResult {
                    stdout,
                    stderr,
                    exit_code: 0,
                })
            }
            Some(code) => {
                debug!(target: "mk.exec.proc", %cmd, code, "exit non-zero");
                Err(ExecError::NonZeroExit {
                    cmd: cmd.to_string(),
                    code,
                    stderr: stderr.trim().to_string(),
                })
            }
            None => Err(ExecError::KilledBySignal(cmd.to_string())),
        }
    }

    pub async fn run(&self, cmd: &Cmd) -> Result<RunResult, ExecError> {
        self.run_cancellable(cmd, &CancellationToken::new()).await
    }
}

async fn read_all<R>(pipe: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[async_trait]
impl CommandRunner for ExecRunner {
    async fn run_cmd(&self, cmd: &Cmd) -> Result<RunResult, RunnerError> {
        Ok(self.run(cmd).await?)
    }

    /// Copies through `sudo` since targets are usually root-owned.
    async fn copy(&self, asset: &FileAsset) -> Result<(), RunnerError> {
        let target = asset.target_path();
        let src = asset.source.to_string_lossy().into_owned();

        let steps = [
            Cmd::sudo("mkdir").arg("-p").arg(&asset.target_dir),
            Cmd::sudo("cp").arg("-a").arg(&src).arg(&target),
            Cmd::sudo("chmod").arg(&asset.permissions).arg(&target),
        ];
        for step in &steps {
            self.run(step).await.map_err(|e| RunnerError::Copy {
                src: src.clone(),
                dst: target.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let runner = ExecRunner::new();
        let rr = runner
            .run(&Cmd::new("sh").arg("-c").arg("echo out; echo err >&2"))
            .await
            .unwrap();
        assert_eq!(rr.stdout.trim(), "out");
        assert_eq!(rr.stderr.trim(), "err");
        assert!(rr.success());

        let err = runner
            .run(&Cmd::new("sh").arg("-c").arg("echo nope >&2; exit 3"))
            .await
            .unwrap_err();
        match err {
            ExecError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn child_sees_marker() {
        let rr = ExecRunner::new()
            .run(&Cmd::new("sh").arg("-c").arg("echo $IS_MINIKUBE_CHILD_PROCESS"))
            .await
            .unwrap();
        assert_eq!(rr.stdout.trim(), "true");
    }

    #[tokio::test]
    async fn cancellation_kills_child() {
        let cancel = CancellationToken::new();
        let c2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            c2.cancel();
        });

        let start = Instant::now();
        let err = ExecRunner::new()
            .run_cancellable(&Cmd::new("sleep").arg("10"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let err = ExecRunner::new()
            .run(&Cmd::new("definitely-not-a-real-binary-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
