use mk_core::Cmd;
use mk_model::CHILD_PROCESS_ENV;
use tokio::process::{Child, Command};

/// Command for `program args...`, marked as spawned by this tool.
pub fn cmd_program(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args.iter().map(|s| s.as_str()));
    cmd.env(CHILD_PROCESS_ENV, "true");
    cmd
}

#[inline]
pub fn command_for(cmd: &Cmd) -> Command {
    cmd_program(&cmd.program, &cmd.args)
}

/// Whether this process was itself spawned by the tool.
pub fn is_child_process() -> bool {
    std::env::var_os(CHILD_PROCESS_ENV).is_some()
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// SIGTERM first, then kill.
        pub async fn kill_graceful(child: &mut Child) -> std::io::Result<()> {
            if let Some(id) = child.id() {
                unsafe {
                    libc::kill(id as libc::pid_t, libc::SIGTERM);
                }
            }
            let _ = child.kill().await;
            Ok(())
        }
    } else {
        pub async fn kill_graceful(child: &mut Child) -> std::io::Result<()> {
            child.kill().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_marker_is_set() {
        let cmd = cmd_program("true", &[]);
        let marker = cmd
            .as_std()
            .get_envs()
            .find(|(k, _)| *k == CHILD_PROCESS_ENV)
            .and_then(|(_, v)| v);
        assert_eq!(marker, Some(std::ffi::OsStr::new("true")));
    }
}
