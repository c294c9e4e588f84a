pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod launcher;
pub mod protocol;
pub mod reactive;
pub mod reconciler;
pub mod session;
pub mod transport;
pub mod vnode;

pub use crate::config::BridgeConfig;
pub use crate::error::{BridgeError, CodecError, ReconcileError, TransportError};
pub use crate::host::HostNode;
pub use crate::protocol::{
    Action, BridgeEvent, Command, EventValue, InboundMessage, WidgetEvent, WindowEvent,
};
pub use crate::reactive::{Signal, Signals, Subscribe, effect, signal, watch};
pub use crate::reconciler::Reconciler;
pub use crate::session::{Session, SessionEnd};
pub use crate::vnode::{PropValue, VNode, element, text, text_fn};
pub use serde_json;
