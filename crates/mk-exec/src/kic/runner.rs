use async_trait::async_trait;
use mk_core::{Cmd, CommandRunner, FileAsset, RunResult, RunnerError};
use tracing::trace;

use crate::oci::Oci;

/// Runs commands inside a node container through `<oci> exec`.
#[derive(Debug, Clone)]
pub struct KicRunner {
    container: String,
    oci: Oci,
}

impl KicRunner {
    pub fn new(container: impl Into<String>, oci: Oci) -> Self {
        Self {
            container: container.into(),
            oci,
        }
    }

    #[inline]
    pub fn container(&self) -> &str {
        &self.container
    }
}

#[async_trait]
impl CommandRunner for KicRunner {
    async fn run_cmd(&self, cmd: &Cmd) -> Result<RunResult, RunnerError> {
        trace!(target: "mk.exec.kic", container = %self.container, %cmd, "exec");
        Ok(self.oci.exec_in(&self.container, cmd).await?)
    }

    async fn copy(&self, asset: &FileAsset) -> Result<(), RunnerError> {
        let target = asset.target_path();
        let copy_err = |reason: String| RunnerError::Copy {
            src: asset.source.display().to_string(),
            dst: format!("{}:{target}", self.container),
            reason,
        };

        self.run_cmd(&Cmd::new("mkdir").arg("-p").arg(&asset.target_dir))
            .await
            .map_err(|e| copy_err(e.to_string()))?;
        self.oci
            .copy_to(&self.container, &asset.source, &target)
            .await
            .map_err(|e| copy_err(e.to_string()))?;
        self.run_cmd(&Cmd::new("chmod").arg(&asset.permissions).arg(&target))
            .await
            .map_err(|e| copy_err(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "kic"
    }
}
