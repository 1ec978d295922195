//! Thin wrapper over the `docker`/`podman` CLI.
//!
//! Output of the CLI is classified here and nowhere else: callers get typed results.

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

use mk_core::{Cmd, RunResult, UnitState};
use mk_model::{LABEL_CREATED_BY, LABEL_NODE, LABEL_PROFILE};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::{ExecError, ExecResult},
    proc::ExecRunner,
};

/// Host address container ports are published on.
pub const DEFAULT_BIND_IPV4: &str = "127.0.0.1";

pub const SSH_PORT: u16 = 22;
pub const DOCKER_DAEMON_PORT: u16 = 2376;
pub const REGISTRY_ADDON_PORT: u16 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OciBinary {
    Docker,
    Podman,
}

impl OciBinary {
    pub fn as_str(&self) -> &'static str {
        match self {
            OciBinary::Docker => "docker",
            OciBinary::Podman => "podman",
        }
    }
}

impl fmt::Display for OciBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OciBinary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(OciBinary::Docker),
            "podman" => Ok(OciBinary::Podman),
            other => Err(format!("unknown OCI binary: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub listen_address: String,
    pub container_port: u16,
}

impl PortMapping {
    pub fn localhost(container_port: u16) -> Self {
        Self {
            listen_address: DEFAULT_BIND_IPV4.to_string(),
            container_port,
        }
    }
}

/// Everything needed to run a node container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateParams {
    /// Container, hostname and volume name.
    pub name: String,
    pub image: String,
    pub profile: String,
    pub cpus: u32,
    pub memory_mb: u64,
    pub envs: BTreeMap<String, String>,
    pub port_mappings: Vec<PortMapping>,
    pub extra_args: Vec<String>,
}

impl CreateParams {
    /// Arguments after the binary name.
    pub fn run_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "run",
            "-d",
            "-t",
            "--privileged",
            "--security-opt",
            "seccomp=unconfined",
            "--tmpfs",
            "/tmp",
            "--tmpfs",
            "/run",
            "-v",
            "/lib/modules:/lib/modules:ro",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        args.push(format!("--hostname={}", self.name));
        args.push(format!("--name={}", self.name));
        args.push(format!("--label={LABEL_CREATED_BY}=true"));
        args.push(format!("--label={LABEL_PROFILE}={}", self.profile));
        args.push(format!("--label={LABEL_NODE}={}", self.name));
        args.push(format!("--volume={}:/var", self.name));
        args.push(format!("--cpus={}", self.cpus));
        args.push(format!("--memory={}mb", self.memory_mb));

        for (k, v) in &self.envs {
            args.push("-e".into());
            args.push(format!("{k}={v}"));
        }
        args.extend(self.extra_args.iter().cloned());
        for p in &self.port_mappings {
            args.push(format!("--publish={}::{}", p.listen_address, p.container_port));
        }
        args.push(self.image.clone());
        args
    }
}

/// What `container inspect` says about a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerInspect {
    pub state: UnitState,
    /// Carries the created-by label.
    pub owned: bool,
}

#[derive(Debug, Clone)]
pub struct Oci {
    binary: OciBinary,
    exec: ExecRunner,
}

impl Oci {
    pub fn new(binary: OciBinary) -> Self {
        Self {
            binary,
            exec: ExecRunner::new().with_name("oci"),
        }
    }

    #[inline]
    pub fn binary(&self) -> OciBinary {
        self.binary
    }

    /// Podman needs root on Linux; it is run through non-interactive sudo.
    fn cmd<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.binary == OciBinary::Podman && cfg!(target_os = "linux") {
            Cmd::new("sudo").arg("-n").arg("podman").args(args)
        } else {
            Cmd::new(self.binary.as_str()).args(args)
        }
    }

    async fn run<I, S>(&self, args: I) -> ExecResult<RunResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec.run(&self.cmd(args)).await
    }

    /// `None` when no container has this name.
    pub async fn inspect(&self, name: &str) -> ExecResult<Option<ContainerInspect>> {
        let format = format!("{{{{.State.Status}}}}|{{{{index .Config.Labels \"{LABEL_CREATED_BY}\"}}}}");
        match self.run(["container", "inspect", "-f", format.as_str(), name]).await {
            Ok(rr) => parse_inspect(&rr.stdout).map(Some).ok_or_else(|| ExecError::Parse {
                cmd: format!("{} container inspect {name}", self.binary),
                output: rr.stdout,
            }),
            Err(ExecError::NonZeroExit { stderr, .. }) if is_no_such_container(&stderr) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn status(&self, name: &str) -> ExecResult<UnitState> {
        Ok(self.inspect(name).await?.map_or(UnitState::Missing, |i| i.state))
    }

    pub async fn create_volume(&self, name: &str, profile: &str) -> ExecResult<()> {
        self.run([
            "volume".to_string(),
            "create".to_string(),
            name.to_string(),
            format!("--label={LABEL_PROFILE}={profile}"),
            format!("--label={LABEL_CREATED_BY}=true"),
        ])
        .await?;
        Ok(())
    }

    pub async fn remove_volume(&self, name: &str) -> ExecResult<()> {
        match self.run(["volume", "rm", "-f", name]).await {
            Ok(_) => Ok(()),
            Err(ExecError::NonZeroExit { stderr, .. }) if is_no_such_volume(&stderr) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Unpacks an lz4 tarball into a volume using a throwaway container of `image`.
    pub async fn extract_tarball_to_volume(&self, tarball: &Path, volume: &str, image: &str) -> ExecResult<()> {
        self.run([
            "run".to_string(),
            "--rm".to_string(),
            "--entrypoint".to_string(),
            "/usr/bin/tar".to_string(),
            "-v".to_string(),
            format!("{}:/preloaded.tar:ro", tarball.display()),
            "-v".to_string(),
            format!("{volume}:/extractDir"),
            image.to_string(),
            "-I".to_string(),
            "lz4".to_string(),
            "-xf".to_string(),
            "/preloaded.tar".to_string(),
            "-C".to_string(),
            "/extractDir".to_string(),
        ])
        .await?;
        Ok(())
    }

    pub async fn run_container(&self, params: &CreateParams, cancel: &CancellationToken) -> ExecResult<()> {
        info!(name = %params.name, image = %params.image, "creating node container");
        self.exec
            .run_cancellable(&self.cmd(params.run_args()), cancel)
            .await?;
        Ok(())
    }

    pub async fn start(&self, name: &str) -> ExecResult<()> {
        self.run(["start", name]).await.map(|_| ())
    }

    pub async fn stop(&self, name: &str) -> ExecResult<()> {
        self.run(["stop", name]).await.map(|_| ())
    }

    /// Removes the container and its anonymous volumes; a missing container is not an error.
    pub async fn remove(&self, name: &str) -> ExecResult<()> {
        match self.run(["rm", "-f", "-v", name]).await {
            Ok(_) => Ok(()),
            Err(ExecError::NonZeroExit { stderr, .. }) if is_no_such_container(&stderr) => {
                debug!(name, "container already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// First IPv4 address of the container.
    pub async fn container_ip(&self, name: &str) -> ExecResult<String> {
        let format = "{{range .NetworkSettings.Networks}}{{.IPAddress}},{{.GlobalIPv6Address}}{{end}}";
        let rr = match self.run(["container", "inspect", "-f", format, name]).await {
            Err(ExecError::NonZeroExit { stderr, .. }) if is_no_such_container(&stderr) => {
                return Err(ExecError::NoSuchContainer(name.to_string()));
            }
            other => other?,
        };
        parse_ipv4(&rr.stdout).ok_or_else(|| ExecError::Parse {
            cmd: format!("{} container inspect {name}", self.binary),
            output: rr.stdout,
        })
    }

    /// `<os>-<version>` of the daemon.
    pub async fn version(&self) -> ExecResult<String> {
        let rr = self
            .run(["version", "--format", "{{.Server.Os}}-{{.Server.Version}}"])
            .await?;
        Ok(rr.stdout.trim().to_string())
    }

    pub async fn exec_in(&self, container: &str, cmd: &Cmd) -> ExecResult<RunResult> {
        let mut args = vec![
            "exec".to_string(),
            "--privileged".to_string(),
            container.to_string(),
            cmd.program.clone(),
        ];
        args.extend(cmd.args.iter().cloned());
        self.run(args).await
    }

    pub async fn copy_to(&self, container: &str, src: &Path, dst: &str) -> ExecResult<()> {
        self.run([
            "cp".to_string(),
            src.display().to_string(),
            format!("{container}:{dst}"),
        ])
        .await?;
        Ok(())
    }

    pub async fn image_exists(&self, image: &str) -> ExecResult<bool> {
        match self.run(["image", "inspect", "--format", "{{.Id}}", image]).await {
            Ok(_) => Ok(true),
            Err(ExecError::NonZeroExit { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn pull(&self, image: &str) -> ExecResult<()> {
        self.run(["pull", image]).await.map(|_| ())
    }

    pub async fn save_image(&self, image: &str, out: &Path) -> ExecResult<()> {
        self.run([
            "save".to_string(),
            "-o".to_string(),
            out.display().to_string(),
            image.to_string(),
        ])
        .await?;
        Ok(())
    }
}

/// Maps a container `State.Status` to a unit state.
pub fn parse_state(status: &str) -> UnitState {
    match status.trim() {
        "running" => UnitState::Running,
        "paused" => UnitState::Paused,
        "exited" | "dead" | "created" | "configured" | "stopped" => UnitState::Stopped,
        "restarting" => UnitState::Starting,
        "removing" => UnitState::Stopping,
        _ => UnitState::Error,
    }
}

fn parse_inspect(out: &str) -> Option<ContainerInspect> {
    let line = out.lines().find(|l| !l.trim().is_empty())?;
    let (status, label) = line.trim().split_once('|')?;
    Some(ContainerInspect {
        state: parse_state(status),
        owned: label.trim() == "true",
    })
}

fn parse_ipv4(out: &str) -> Option<String> {
    out.trim()
        .split(',')
        .map(str::trim)
        .find(|s| !s.is_empty() && s.parse::<std::net::Ipv4Addr>().is_ok())
        .map(str::to_string)
}

pub fn is_no_such_container(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("no such container") || s.contains("no such object") || s.contains("no container with name")
}

fn is_no_such_volume(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("no such volume") || s.contains("no volume with name")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CreateParams {
        CreateParams {
            name: "p1-m02".into(),
            image: "kicbase/stable:v0.0.10".into(),
            profile: "p1".into(),
            cpus: 2,
            memory_mb: 2200,
            envs: BTreeMap::from([("container".to_string(), "docker".to_string())]),
            port_mappings: vec![PortMapping::localhost(8443), PortMapping::localhost(SSH_PORT)],
            extra_args: vec!["--expose".into(), "8443".into()],
        }
    }

    #[test]
    fn run_args_carry_labels_and_ports() {
        let args = params().run_args();
        assert_eq!(args[0], "run");
        assert_eq!(args.last().unwrap(), "kicbase/stable:v0.0.10");
        assert!(args.contains(&format!("--label={LABEL_CREATED_BY}=true")));
        assert!(args.contains(&format!("--label={LABEL_PROFILE}=p1")));
        assert!(args.contains(&"--name=p1-m02".to_string()));
        assert!(args.contains(&"--volume=p1-m02:/var".to_string()));
        assert!(args.contains(&"--memory=2200mb".to_string()));
        assert!(args.contains(&"--publish=127.0.0.1::8443".to_string()));
        assert!(args.contains(&"container=docker".to_string()));
    }

    #[test]
    fn inspect_output_parsing() {
        assert_eq!(
            parse_inspect("running|true\n"),
            Some(ContainerInspect {
                state: UnitState::Running,
                owned: true
            })
        );
        assert_eq!(
            parse_inspect("exited|<no value>"),
            Some(ContainerInspect {
                state: UnitState::Stopped,
                owned: false
            })
        );
        assert_eq!(parse_inspect(""), None);
    }

    #[test]
    fn ip_parsing_skips_ipv6_and_empties() {
        assert_eq!(parse_ipv4("192.168.49.2,\n").as_deref(), Some("192.168.49.2"));
        assert_eq!(parse_ipv4(",fd00::2,10.88.0.5,").as_deref(), Some("10.88.0.5"));
        assert_eq!(parse_ipv4(","), None);
    }

    #[test]
    fn stderr_classification() {
        assert!(is_no_such_container("Error: No such container: minikube"));
        assert!(is_no_such_container("Error: No such object: minikube"));
        assert!(is_no_such_container("Error: no container with name or ID \"x\" found"));
        assert!(!is_no_such_container("Cannot connect to the Docker daemon"));
    }

    #[test]
    fn podman_goes_through_sudo_on_linux() {
        let cmd = Oci::new(OciBinary::Podman).cmd(["ps"]);
        if cfg!(target_os = "linux") {
            assert_eq!(cmd.to_string(), "sudo -n podman ps");
        } else {
            assert_eq!(cmd.to_string(), "podman ps");
        }
        assert_eq!(Oci::new(OciBinary::Docker).cmd(["ps"]).to_string(), "docker ps");
    }
}
