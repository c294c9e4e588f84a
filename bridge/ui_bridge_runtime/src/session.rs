//! One UI session: the transport, the widget registry, the reconciler and the
//! renderer process, plus the cooperative loop that drives them.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{error, info, warn};

use crate::config::BridgeConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{BridgeError, ReconcileError, TransportError};
use crate::host::HostNode;
use crate::launcher::{RendererProcess, SocketConnector, resolve_renderer};
use crate::protocol::{Command, InboundMessage};
use crate::reactive::{Signals, Subscribe, panic_message};
use crate::reconciler::Reconciler;
use crate::transport::{
    CloseReason, ConnectionState, Connector, ListenerId, Transport, TransportEvent,
};
use crate::vnode::VNode;

/// How a finished session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClosedByCaller,
    PeerShutdown(i32),
    RendererExited(i32),
}

impl SessionEnd {
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionEnd::ClosedByCaller => 0,
            SessionEnd::PeerShutdown(code) | SessionEnd::RendererExited(code) => *code,
        }
    }
}

struct SessionInner {
    config: BridgeConfig,
    transport: Rc<RefCell<Transport>>,
    reconciler: Reconciler,
    renderer: RefCell<Option<RendererProcess>>,
    closed_by_caller: Cell<bool>,
}

#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

impl Session {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_runtime(config, Rc::new(Signals))
    }

    pub fn with_runtime(config: BridgeConfig, runtime: Rc<dyn Subscribe>) -> Self {
        let transport = Rc::new(RefCell::new(Transport::new(
            config.connect_attempts,
            config.retry_delay,
        )));
        let reconciler = Reconciler::new(transport.clone(), Rc::new(Dispatcher::new()), runtime);

        let session = Self {
            inner: Rc::new(SessionInner {
                config,
                transport,
                reconciler,
                renderer: RefCell::new(None),
                closed_by_caller: Cell::new(false),
            }),
        };

        if let Some(title) = session.inner.config.title.clone() {
            session.set_title(title);
        }
        session
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.inner.reconciler
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.transport.borrow().state()
    }

    fn send(&self, command: Command) {
        self.inner.transport.borrow_mut().send(command);
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.send(Command::SetTitle {
            title: title.into(),
        });
    }

    pub fn resize_window(&self, width: u32, height: u32) {
        self.send(Command::ResizeWindow { width, height });
    }

    pub fn close_window(&self) {
        self.send(Command::CloseWindow);
    }

    /// Asks the renderer to quit and closes the connection from this side.
    pub fn exit(&self) {
        self.send(Command::ExitApp);
        self.close();
    }

    pub fn close(&self) {
        self.inner.closed_by_caller.set(true);
        self.inner.transport.borrow_mut().close();
    }

    fn media_target(&self, node: &HostNode) -> Result<String, ReconcileError> {
        match node.widget_id() {
            Some(id) if !node.is_disposed() => Ok(id),
            _ => Err(ReconcileError::NodeDisposed(
                node.widget_id().unwrap_or_else(|| "root".to_string()),
            )),
        }
    }

    pub fn play_video(&self, node: &HostNode) -> Result<(), ReconcileError> {
        let id = self.media_target(node)?;
        self.send(Command::PlayVideo { id });
        Ok(())
    }

    pub fn pause_video(&self, node: &HostNode) -> Result<(), ReconcileError> {
        let id = self.media_target(node)?;
        self.send(Command::PauseVideo { id });
        Ok(())
    }

    pub fn seek_video(&self, node: &HostNode, time_secs: f64) -> Result<(), ReconcileError> {
        let id = self.media_target(node)?;
        self.send(Command::SeekVideo { id, time_secs });
        Ok(())
    }

    /// A mounted root; top-level widgets rendered under it attach to
    /// `attach_to` on the renderer side, or to the window when `None`.
    pub fn root(&self, attach_to: Option<String>) -> HostNode {
        HostNode::new_root(attach_to)
    }

    pub fn render(&self, vnode: &VNode, parent: &HostNode) -> Result<HostNode, ReconcileError> {
        self.inner.reconciler.render(vnode, parent)
    }

    pub fn unrender(&self, parent: &HostNode, node: &HostNode) {
        self.inner.reconciler.remove_node(parent, node);
    }

    /// Observes every inbound message, including runtime errors and window
    /// events.
    pub fn on_message(&self, listener: impl Fn(&InboundMessage) + 'static) -> ListenerId {
        self.inner
            .transport
            .borrow_mut()
            .on_event(Rc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.transport.borrow_mut().remove_listener(id)
    }

    /// Starts the renderer (unless attaching to a running one) and connects
    /// to its socket.
    pub fn connect(&self) -> Result<(), BridgeError> {
        let config = &self.inner.config;
        let mut renderer = self.inner.renderer.borrow_mut();

        if !config.attach && renderer.is_none() {
            let path = resolve_renderer(config.renderer.as_deref());
            *renderer = Some(RendererProcess::spawn(&path, &config.socket_path)?);
        }

        let mut connector = SocketConnector::new(&config.socket_path, renderer.as_mut());
        let result = self.connect_with(&mut connector);
        drop(renderer);

        if result.is_err() {
            self.stop_renderer();
        }
        result
    }

    pub fn connect_with(&self, connector: &mut dyn Connector) -> Result<(), BridgeError> {
        self.inner.transport.borrow_mut().connect(connector)?;
        Ok(())
    }

    pub fn renderer_pid(&self) -> Option<u32> {
        self.inner.renderer.borrow().as_ref().map(RendererProcess::id)
    }

    /// Processes inbound events until the session ends. A failed session
    /// does not leave the renderer running.
    pub fn run(&self) -> Result<SessionEnd, BridgeError> {
        let result = self.run_events();
        if result.is_err() {
            self.stop_renderer();
        }
        result
    }

    fn run_events(&self) -> Result<SessionEnd, BridgeError> {
        loop {
            if self.inner.closed_by_caller.get() {
                return Ok(SessionEnd::ClosedByCaller);
            }

            let event = self.inner.transport.borrow_mut().next_event();
            let event = match event {
                Some(event) => event,
                None if self.state() == ConnectionState::Closed => {
                    TransportEvent::Closed(CloseReason::StreamEnded)
                }
                None => return Err(TransportError::Closed.into()),
            };

            if let Some(end) = self.handle(event)? {
                return Ok(end);
            }
        }
    }

    /// Handles whatever has already arrived without blocking.
    pub fn pump(&self) -> Result<Option<SessionEnd>, BridgeError> {
        loop {
            let event = self.inner.transport.borrow_mut().try_next_event();
            let Some(event) = event else {
                return Ok(None);
            };
            match self.handle(event) {
                Ok(Some(end)) => return Ok(Some(end)),
                Ok(None) => {}
                Err(err) => {
                    self.stop_renderer();
                    return Err(err);
                }
            }
        }
    }

    fn handle(&self, event: TransportEvent) -> Result<Option<SessionEnd>, BridgeError> {
        match event {
            TransportEvent::Message(message) => {
                self.notify(&message);
                self.handle_message(message)
            }
            TransportEvent::FrameError(err) => {
                warn!(error = %err, "dropping undecodable frame");
                Ok(None)
            }
            TransportEvent::Closed(reason) => {
                self.inner.transport.borrow_mut().mark_closed();
                if self.inner.closed_by_caller.get() {
                    return Ok(Some(SessionEnd::ClosedByCaller));
                }
                match reason {
                    CloseReason::StreamEnded => {
                        info!("renderer closed the connection");
                        Ok(Some(SessionEnd::RendererExited(self.wait_renderer())))
                    }
                    CloseReason::Error(message) => {
                        Err(TransportError::ConnectionLost(message).into())
                    }
                }
            }
        }
    }

    fn handle_message(&self, message: InboundMessage) -> Result<Option<SessionEnd>, BridgeError> {
        match message {
            InboundMessage::UiEvent { .. } => Ok(None),
            InboundMessage::Shutdown => {
                info!("renderer requested shutdown");
                self.inner.transport.borrow_mut().close();
                Ok(Some(SessionEnd::PeerShutdown(self.wait_renderer())))
            }
            InboundMessage::RuntimeError {
                source,
                message,
                fatal: true,
            } => {
                error!(origin = %source, detail = %message, "renderer reported a fatal error");
                self.inner.transport.borrow_mut().mark_closed();
                Err(BridgeError::FatalRuntime {
                    origin: source,
                    message,
                })
            }
            InboundMessage::RuntimeError {
                source, message, ..
            } => {
                warn!(origin = %source, detail = %message, "renderer reported an error");
                Ok(None)
            }
        }
    }

    fn notify(&self, message: &InboundMessage) {
        let listeners = self.inner.transport.borrow().listeners();
        for listener in listeners {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(message))) {
                error!(panic = panic_message(&*payload), "message listener panicked");
            }
        }
    }

    fn stop_renderer(&self) {
        let Some(mut process) = self.inner.renderer.borrow_mut().take() else {
            return;
        };

        match process.kill() {
            Ok(code) => info!(pid = process.id(), code, "renderer stopped"),
            Err(err) => warn!(error = %err, pid = process.id(), "failed to stop renderer"),
        }
    }

    fn wait_renderer(&self) -> i32 {
        let mut renderer = self.inner.renderer.borrow_mut();
        let Some(process) = renderer.as_mut() else {
            return 0;
        };

        match process.wait() {
            Ok(code) => code,
            Err(err) => {
                warn!(
                    error = %err,
                    path = %process.path().display(),
                    "failed to wait for renderer"
                );
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MAX_FRAME_LEN, read_frame, write_frame};
    use crate::protocol::WidgetEvent;
    use crate::transport::{ConnectError, Connection};
    use crate::vnode::element;
    use serde_json::json;
    use std::fs;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::net::UnixStream;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    struct PairConnector(Option<UnixStream>);

    impl Connector for PairConnector {
        fn connect(&mut self) -> Result<Connection, ConnectError> {
            let stream = self
                .0
                .take()
                .ok_or_else(|| ConnectError::Fatal("stream already used".to_string()))?;
            Connection::from_unix_stream(stream).map_err(ConnectError::Transient)
        }
    }

    fn attached_config(title: Option<&str>) -> BridgeConfig {
        BridgeConfig {
            attach: true,
            connect_attempts: 1,
            retry_delay: Duration::ZERO,
            title: title.map(str::to_string),
            ..BridgeConfig::default()
        }
    }

    fn connected(title: Option<&str>) -> (Session, UnixStream) {
        let (local, peer) = UnixStream::pair().expect("socket pair");
        let session = Session::new(attached_config(title));
        session
            .connect_with(&mut PairConnector(Some(local)))
            .expect("connect");
        (session, peer)
    }

    #[test]
    fn commands_before_connect_arrive_first_and_in_order() {
        let (local, mut peer) = UnixStream::pair().expect("socket pair");
        let session = Session::new(attached_config(Some("Demo")));
        let root = session.root(None);
        session
            .render(&element("button").prop("text", "Go").build(), &root)
            .expect("render");
        assert_eq!(session.state(), ConnectionState::Disconnected);

        session
            .connect_with(&mut PairConnector(Some(local)))
            .expect("connect");
        session.resize_window(800, 600);

        let first: Command = read_frame(&mut peer).expect("title");
        assert_eq!(
            first,
            Command::SetTitle {
                title: "Demo".to_string()
            }
        );
        match read_frame::<Command>(&mut peer).expect("create") {
            Command::CreateWidget { kind, .. } => assert_eq!(kind, "button"),
            other => panic!("expected createWidget, got {other:?}"),
        }
        let last: Command = read_frame(&mut peer).expect("resize");
        assert_eq!(
            last,
            Command::ResizeWindow {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn peer_shutdown_ends_the_run() {
        let (session, mut peer) = connected(None);
        write_frame(&mut peer, &InboundMessage::Shutdown).expect("write shutdown");

        let end = session.run().expect("run");
        assert_eq!(end, SessionEnd::PeerShutdown(0));
        assert_eq!(end.exit_code(), 0);
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[test]
    fn clicks_reach_handlers_until_the_stream_ends() {
        let (session, mut peer) = connected(None);
        let clicks = Rc::new(Cell::new(0));
        let counter = clicks.clone();

        let root = session.root(None);
        let button = session
            .render(
                &element("button")
                    .prop("id", "save")
                    .on("onClick", move |_: &WidgetEvent| counter.set(counter.get() + 1))
                    .build(),
                &root,
            )
            .expect("render");
        assert_eq!(button.widget_id().as_deref(), Some("save"));
        let _created: Command = read_frame(&mut peer).expect("create");

        for id in ["save", "missing"] {
            let click = InboundMessage::UiEvent {
                event: json!({"WidgetAction": {"widget_id": id, "action": "Click"}}),
            };
            write_frame(&mut peer, &click).expect("write click");
        }
        drop(peer);

        assert_eq!(session.run().expect("run"), SessionEnd::RendererExited(0));
        assert_eq!(clicks.get(), 1);
    }

    #[test]
    fn fatal_runtime_errors_fail_the_run() {
        let (session, mut peer) = connected(None);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        session.on_message(move |message| log.borrow_mut().push(message.clone()));

        let warning = InboundMessage::RuntimeError {
            source: "image".to_string(),
            message: "unsupported format".to_string(),
            fatal: false,
        };
        let fatal = InboundMessage::RuntimeError {
            source: "socket-read".to_string(),
            message: "bad frame".to_string(),
            fatal: true,
        };
        write_frame(&mut peer, &warning).expect("write warning");
        write_frame(&mut peer, &fatal).expect("write fatal");

        match session.run() {
            Err(BridgeError::FatalRuntime { origin, message }) => {
                assert_eq!(origin, "socket-read");
                assert_eq!(message, "bad frame");
            }
            other => panic!("expected fatal runtime error, got {other:?}"),
        }
        assert_eq!(*seen.borrow(), vec![warning, fatal]);
    }

    #[test]
    fn exit_sends_exit_app_and_closes() {
        let (session, mut peer) = connected(None);
        session.exit();

        let command: Command = read_frame(&mut peer).expect("exit command");
        assert_eq!(command, Command::ExitApp);
        assert!(read_frame::<Command>(&mut peer).is_err());

        assert_eq!(session.run().expect("run"), SessionEnd::ClosedByCaller);
    }

    #[test]
    fn pump_returns_without_blocking() {
        let (session, _peer) = connected(None);
        assert_eq!(session.pump().expect("pump"), None);
    }

    #[test]
    fn run_without_connecting_is_an_error() {
        let session = Session::new(attached_config(None));
        assert!(matches!(
            session.run(),
            Err(BridgeError::Transport(TransportError::Closed))
        ));
    }

    #[test]
    fn media_commands_need_a_live_node() {
        let session = Session::new(attached_config(None));
        let root = session.root(None);
        let video = session
            .render(&element("video").prop("src", "clip.mp4").build(), &root)
            .expect("render");

        session.play_video(&video).expect("play");
        session.seek_video(&video, 12.5).expect("seek");

        session.unrender(&root, &video);
        assert!(matches!(
            session.pause_video(&video),
            Err(ReconcileError::NodeDisposed(_))
        ));
        assert!(session.play_video(&root).is_err());
    }

    #[test]
    fn undecodable_frames_are_skipped() {
        let (session, mut peer) = connected(None);
        peer.write_all(&[3, 0, 0, 0, 0xc1, 0xc1, 0xc1]).expect("garbage frame");
        write_frame(&mut peer, &InboundMessage::Shutdown).expect("write shutdown");

        assert_eq!(session.run().expect("run"), SessionEnd::PeerShutdown(0));
    }

    #[test]
    fn oversized_frame_loses_the_connection() {
        let (session, mut peer) = connected(None);
        let len = u32::try_from(MAX_FRAME_LEN + 1).expect("fits in u32");
        peer.write_all(&len.to_le_bytes()).expect("oversized header");

        match session.run() {
            Err(BridgeError::Transport(TransportError::ConnectionLost(_))) => {}
            other => panic!("expected lost connection, got {other:?}"),
        }
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    fn renderer_script(name: &str, body: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir()
            .join(format!("ui-bridge-session-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create scratch dir");

        let script = dir.join("renderer.sh");
        fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("write script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod script");
        (dir, script)
    }

    fn spawning_config(dir: &Path, script: PathBuf, attempts: u32) -> BridgeConfig {
        BridgeConfig {
            socket_path: dir.join("renderer.sock"),
            renderer: Some(script),
            attach: false,
            connect_attempts: attempts,
            retry_delay: Duration::from_millis(20),
            title: None,
        }
    }

    #[test]
    fn renderer_exit_before_accepting_keeps_its_status() {
        let (dir, script) = renderer_script("exit", "exit 3");
        let session = Session::new(spawning_config(&dir, script, 200));

        let err = session.connect().expect_err("expected renderer exit");
        match &err {
            BridgeError::Transport(TransportError::RendererExited(3)) => {}
            other => panic!("expected renderer exit with status 3, got {other:?}"),
        }
        assert_eq!(err.exit_code(), 3);
        assert_eq!(session.renderer_pid(), None);
        assert_eq!(session.state(), ConnectionState::Closed);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_connect_stops_the_renderer() {
        let (dir, script) = renderer_script("stop", "exec sleep 30");
        let session = Session::new(spawning_config(&dir, script, 3));

        let err = session.connect().expect_err("expected exhausted retries");
        match &err {
            BridgeError::Transport(TransportError::RetriesExhausted { attempts: 3, .. }) => {}
            other => panic!("expected exhausted retries, got {other:?}"),
        }
        assert_eq!(err.exit_code(), 1);
        assert_eq!(session.renderer_pid(), None);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn exit_codes_follow_the_renderer() {
        assert_eq!(SessionEnd::ClosedByCaller.exit_code(), 0);
        assert_eq!(SessionEnd::PeerShutdown(3).exit_code(), 3);
        assert_eq!(SessionEnd::RendererExited(137).exit_code(), 137);
    }
}
