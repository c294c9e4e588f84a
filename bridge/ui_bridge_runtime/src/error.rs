use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("msgpack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("frame too large: {len} > {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("frame io failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("gave up connecting to renderer after {attempts} attempt(s): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("renderer connection failed: {0}")]
    ConnectFailed(String),

    #[error("renderer exited with status {0} before accepting connections")]
    RendererExited(i32),

    #[error("transport is closed")]
    Closed,

    #[error("renderer connection lost: {0}")]
    ConnectionLost(String),

    #[error("transport io failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("unrecognized virtual node tag '{0}'")]
    UnknownTag(String),

    #[error("<{tag}> requires the '{prop}' prop")]
    MissingProp { tag: String, prop: &'static str },

    #[error("handler attached to non-event prop '{0}'")]
    InvalidHandlerProp(String),

    #[error("host node {0} was disposed and cannot be reinserted")]
    NodeDisposed(String),

    #[error("host node {0} is already attached elsewhere")]
    NodeAlreadyAttached(String),

    #[error("anchor {anchor} is not a child of {parent}")]
    AnchorNotFound { parent: String, anchor: String },

    #[error("text nodes cannot have children (parent {0})")]
    TextParent(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("failed to launch renderer '{path}': {source}")]
    Launch { path: String, source: io::Error },

    #[error("renderer reported fatal error from {origin}: {message}")]
    FatalRuntime { origin: String, message: String },
}

impl BridgeError {
    /// Process status for a session that ended with this error: the
    /// renderer's own status when it died before connecting, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::Transport(TransportError::RendererExited(code)) => *code,
            _ => 1,
        }
    }
}
