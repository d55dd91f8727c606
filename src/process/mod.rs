use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::Child;

use crate::env;
use crate::error::InstallError;
use crate::util::CancelToken;

const CANCEL_POLL: Duration = Duration::from_millis(200);

/// Language tag appended to the client launch token.
pub const CLIENT_LANGUAGE: &str = "eng";

/// A running installer the orchestrator can wait on.
#[async_trait]
pub trait InstallerHandle: Send {
    /// Wait for exit, giving up with [`InstallError::Cancelled`] if the run is cancelled.
    /// The installer itself keeps running in that case.
    async fn wait(&mut self, cancel: &CancelToken) -> Result<Option<i32>, InstallError>;
}

pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, executable: &Path) -> Result<Box<dyn InstallerHandle>, InstallError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLauncher;

impl SystemLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Start the game client from `install_dir`, handing it the one-shot auth code.
    pub fn launch_client(&self, install_dir: &Path, auth_code: &str) -> Result<(), String> {
        let client_path = env::client_path(install_dir);
        if !client_path.exists() {
            warn!("launch: client not found at {}", client_path.display());
            return Err(format!(
                "game client not found at {}",
                client_path.display()
            ));
        }

        let mut cmd = Command::new(&client_path);
        cmd.arg(client_launch_argument(auth_code));
        cmd.current_dir(install_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            // DETACHED_PROCESS
            cmd.creation_flags(0x00000008);
        }

        debug!("launch: starting {}", client_path.display());
        cmd.spawn()
            .map_err(|e| format!("failed to start game process: {e}"))?;
        info!("launch: process started");
        Ok(())
    }
}

impl ProcessLauncher for SystemLauncher {
    fn spawn(&self, executable: &Path) -> Result<Box<dyn InstallerHandle>, InstallError> {
        info!("installer: starting {}", executable.display());
        let child = spawn_installer(executable).map_err(|source| InstallError::Subprocess {
            path: executable.to_path_buf(),
            source,
        })?;
        Ok(Box::new(ChildHandle { child }))
    }
}

fn spawn_installer(executable: &Path) -> std::io::Result<Child> {
    let mut cmd = tokio::process::Command::new(executable);
    if let Some(dir) = executable.parent() {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    match cmd.spawn() {
        Ok(child) => Ok(child),
        #[cfg(target_os = "windows")]
        Err(err) if err.raw_os_error() == Some(740) => {
            // ERROR_ELEVATION_REQUIRED: let the shell raise the UAC prompt and wait on it.
            warn!("installer: elevation required, retrying through the shell");
            tokio::process::Command::new("cmd")
                .arg("/C")
                .arg("start")
                .arg("")
                .arg("/WAIT")
                .arg(executable)
                .stdin(Stdio::null())
                .spawn()
        }
        Err(err) => Err(err),
    }
}

struct ChildHandle {
    child: Child,
}

#[async_trait]
impl InstallerHandle for ChildHandle {
    async fn wait(&mut self, cancel: &CancelToken) -> Result<Option<i32>, InstallError> {
        loop {
            tokio::select! {
                status = self.child.wait() => {
                    let status = status.map_err(|e| InstallError::io("wait for", "installer", e))?;
                    info!("installer: exited with {status}");
                    return Ok(status.code());
                }
                _ = tokio::time::sleep(CANCEL_POLL) => {
                    cancel.check()?;
                }
            }
        }
    }
}

pub fn client_launch_argument(auth_code: &str) -> String {
    format!("fromVLauncher::VALOFE:{auth_code}:{CLIENT_LANGUAGE}")
}
