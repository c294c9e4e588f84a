//! Renderer discovery, spawning, and the socket connector used to reach it.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};

use tracing::{debug, info};

use crate::config::SOCKET_ENV;
use crate::error::BridgeError;
use crate::transport::{ConnectError, Connection, Connector};

pub const RENDERER_BIN: &str = "ui-renderer";

/// Picks the renderer executable: the explicit override, then the first
/// conventional location that exists, then the bare name for `PATH` lookup.
pub fn resolve_renderer(override_path: Option<&Path>) -> PathBuf {
    resolve_renderer_in(override_path, &conventional_locations())
}

pub fn resolve_renderer_in(override_path: Option<&Path>, candidates: &[PathBuf]) -> PathBuf {
    if let Some(path) = override_path {
        return path.to_path_buf();
    }

    candidates
        .iter()
        .find(|candidate| candidate.is_file())
        .cloned()
        .unwrap_or_else(|| PathBuf::from(renderer_file_name()))
}

fn conventional_locations() -> Vec<PathBuf> {
    let file_name = renderer_file_name();
    let mut locations = Vec::new();

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        locations.push(dir.join(&file_name));
    }

    locations.push(Path::new("target").join("release").join(&file_name));
    locations.push(Path::new("target").join("debug").join(&file_name));
    locations
}

fn renderer_file_name() -> String {
    format!("{RENDERER_BIN}{}", std::env::consts::EXE_SUFFIX)
}

#[derive(Debug)]
pub struct RendererProcess {
    child: Child,
    path: PathBuf,
}

impl RendererProcess {
    pub fn spawn(path: &Path, socket: &Path) -> Result<Self, BridgeError> {
        let child = std::process::Command::new(path)
            .env(SOCKET_ENV, socket)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| BridgeError::Launch {
                path: path.display().to_string(),
                source,
            })?;

        info!(pid = child.id(), path = %path.display(), "spawned renderer");
        Ok(Self {
            child,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(exit_code))
    }

    /// Stops the renderer if it is still running and reaps it.
    pub fn kill(&mut self) -> io::Result<i32> {
        if let Some(code) = self.try_wait()? {
            return Ok(code);
        }
        self.child.kill()?;
        self.wait()
    }

    pub fn wait(&mut self) -> io::Result<i32> {
        let status = self.child.wait()?;
        debug!(status = %status, "renderer exited");
        Ok(exit_code(status))
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// Connects to the renderer's Unix-domain socket.
pub struct SocketConnector<'a> {
    path: &'a Path,
    renderer: Option<&'a mut RendererProcess>,
}

impl<'a> SocketConnector<'a> {
    pub fn new(path: &'a Path, renderer: Option<&'a mut RendererProcess>) -> Self {
        Self { path, renderer }
    }
}

impl Connector for SocketConnector<'_> {
    fn connect(&mut self) -> Result<Connection, ConnectError> {
        if let Some(renderer) = self.renderer.as_deref_mut() {
            match renderer.try_wait() {
                Ok(Some(code)) => return Err(ConnectError::PeerExited(code)),
                Ok(None) => {}
                Err(err) => {
                    return Err(ConnectError::Fatal(format!(
                        "failed to poll renderer process: {err}"
                    )));
                }
            }
        }

        connect_socket(self.path)
    }
}

#[cfg(unix)]
fn connect_socket(path: &Path) -> Result<Connection, ConnectError> {
    let stream =
        std::os::unix::net::UnixStream::connect(path).map_err(ConnectError::Transient)?;
    Connection::from_unix_stream(stream).map_err(|err| ConnectError::Fatal(err.to_string()))
}

#[cfg(not(unix))]
fn connect_socket(path: &Path) -> Result<Connection, ConnectError> {
    Err(ConnectError::Fatal(format!(
        "unix domain sockets are unavailable on this platform ({})",
        path.display()
    )))
}
