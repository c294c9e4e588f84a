//! Connection to the renderer: connect/retry state machine, outbound FIFO
//! queue, and the reader/writer threads that own the byte stream.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::{FrameDecoder, write_frame};
use crate::error::{CodecError, TransportError};
use crate::protocol::{Command, InboundMessage};

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug)]
pub enum ConnectError {
    /// The peer is not accepting yet; worth another attempt.
    Transient(io::Error),
    /// The renderer process ended before accepting; carries its exit status.
    PeerExited(i32),
    Fatal(String),
}

pub struct Connection {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    /// Runs once the writer has flushed everything, to close the write half.
    pub shutdown: Option<Box<dyn FnOnce() + Send>>,
}

impl Connection {
    #[cfg(unix)]
    pub fn from_unix_stream(stream: std::os::unix::net::UnixStream) -> io::Result<Connection> {
        let reader = stream.try_clone()?;
        let control = stream.try_clone()?;

        Ok(Connection {
            reader: Box::new(reader),
            writer: Box::new(stream),
            shutdown: Some(Box::new(move || {
                let _ = control.shutdown(std::net::Shutdown::Write);
            })),
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("shutdown", &self.shutdown.is_some())
            .finish_non_exhaustive()
    }
}

pub trait Connector {
    fn connect(&mut self) -> Result<Connection, ConnectError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    StreamEnded,
    Error(String),
}

#[derive(Debug)]
pub enum TransportEvent {
    Message(InboundMessage),
    /// A complete frame that could not be decoded; the stream is still aligned.
    FrameError(CodecError),
    Closed(CloseReason),
}

pub type ListenerId = u64;
pub type Listener = Rc<dyn Fn(&InboundMessage)>;

pub struct Transport {
    state: ConnectionState,
    queue: VecDeque<Command>,
    writer: Option<Sender<Command>>,
    writer_handle: Option<JoinHandle<()>>,
    inbound: Option<Receiver<TransportEvent>>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: ListenerId,
    connect_attempts: u32,
    retry_delay: Duration,
}

impl Transport {
    pub fn new(connect_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            queue: VecDeque::new(),
            writer: None,
            writer_handle: None,
            inbound: None,
            listeners: Vec::new(),
            next_listener: 1,
            connect_attempts,
            retry_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn send(&mut self, command: Command) {
        match self.state {
            ConnectionState::Connected => {
                let Some(writer) = &self.writer else {
                    warn!("connected transport has no writer; dropping command");
                    return;
                };

                if writer.send(command).is_err() {
                    warn!("writer thread is gone; marking transport closed");
                    self.mark_closed();
                }
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                self.queue.push_back(command);
            }
            ConnectionState::Closed => {
                warn!(command = ?command, "transport closed; dropping command");
            }
        }
    }

    /// Commands waiting for a connection, oldest first.
    pub fn pending(&self) -> &VecDeque<Command> {
        &self.queue
    }

    pub fn drain_pending(&mut self) -> Vec<Command> {
        self.queue.drain(..).collect()
    }

    pub fn on_event(&mut self, listener: Listener) -> ListenerId {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// Snapshot of the registered listeners, so they can be called without
    /// holding a borrow of the transport.
    pub fn listeners(&self) -> Vec<Listener> {
        self.listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    pub fn connect(&mut self, connector: &mut dyn Connector) -> Result<(), TransportError> {
        match self.state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Closed => return Err(TransportError::Closed),
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        self.state = ConnectionState::Connecting;
        let mut last_error = String::from("no connection attempts allowed");

        for attempt in 1..=self.connect_attempts {
            match connector.connect() {
                Ok(connection) => {
                    info!(attempt, queued = self.queue.len(), "connected to renderer");
                    self.start(connection);
                    return Ok(());
                }
                Err(ConnectError::Transient(err)) => {
                    debug!(attempt, error = %err, "renderer not accepting yet");
                    last_error = err.to_string();
                    if attempt < self.connect_attempts {
                        thread::sleep(self.retry_delay);
                    }
                }
                Err(ConnectError::PeerExited(code)) => {
                    self.state = ConnectionState::Closed;
                    return Err(TransportError::RendererExited(code));
                }
                Err(ConnectError::Fatal(message)) => {
                    self.state = ConnectionState::Closed;
                    return Err(TransportError::ConnectFailed(message));
                }
            }
        }

        self.state = ConnectionState::Closed;
        Err(TransportError::RetriesExhausted {
            attempts: self.connect_attempts,
            last_error,
        })
    }

    fn start(&mut self, connection: Connection) {
        let Connection {
            reader,
            writer,
            shutdown,
        } = connection;

        let (event_tx, event_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel();

        while let Some(command) = self.queue.pop_front() {
            // The receiver is still in scope, so this cannot fail.
            let _ = command_tx.send(command);
        }

        let writer_events = event_tx.clone();
        self.writer_handle = Some(thread::spawn(move || {
            writer_loop(command_rx, writer, shutdown, writer_events)
        }));
        thread::spawn(move || reader_loop(reader, event_tx));

        self.writer = Some(command_tx);
        self.inbound = Some(event_rx);
        self.state = ConnectionState::Connected;
    }

    /// Blocks until the reader or writer thread reports something. `None` once
    /// every thread has hung up or the transport was closed.
    pub fn next_event(&mut self) -> Option<TransportEvent> {
        self.inbound.as_ref()?.recv().ok()
    }

    pub fn try_next_event(&mut self) -> Option<TransportEvent> {
        let inbound = self.inbound.as_ref()?;
        match inbound.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Caller-initiated teardown: flushes what was already sent, then shuts
    /// the write half.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        if !self.queue.is_empty() {
            debug!(dropped = self.queue.len(), "closing before connect; dropping queue");
        }

        self.writer = None;
        if let Some(handle) = self.writer_handle.take() {
            if let Err(err) = handle.join() {
                warn!("writer thread join failed: {err:?}");
            }
        }

        self.mark_closed();
    }

    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
        self.writer = None;
        self.inbound = None;
        self.queue.clear();
    }
}

fn writer_loop(
    commands: Receiver<Command>,
    mut writer: Box<dyn Write + Send>,
    shutdown: Option<Box<dyn FnOnce() + Send>>,
    events: Sender<TransportEvent>,
) {
    for command in commands {
        match write_frame(&mut writer, &command) {
            Ok(()) => {}
            Err(CodecError::Io(err)) => {
                let _ = events.send(TransportEvent::Closed(CloseReason::Error(format!(
                    "write failed: {err}"
                ))));
                return;
            }
            Err(err) => {
                warn!(error = %err, "dropping command that could not be framed");
            }
        }
    }

    if let Some(shutdown) = shutdown {
        shutdown();
    }
}

fn reader_loop(mut reader: Box<dyn Read + Send>, events: Sender<TransportEvent>) {
    let mut decoder = FrameDecoder::<InboundMessage>::new();
    let mut chunk = vec![0_u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => {
                let _ = events.send(TransportEvent::Closed(CloseReason::StreamEnded));
                return;
            }
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                let _ = events.send(TransportEvent::Closed(CloseReason::Error(format!(
                    "read failed: {err}"
                ))));
                return;
            }
        };

        for result in decoder.feed(&chunk[..n]) {
            let event = match result {
                Ok(message) => TransportEvent::Message(message),
                Err(err) => TransportEvent::FrameError(err),
            };

            if events.send(event).is_err() {
                return;
            }
        }

        if decoder.is_poisoned() {
            let _ = events.send(TransportEvent::Closed(CloseReason::Error(
                "inbound frame stream lost alignment".to_string(),
            )));
            return;
        }
    }
}
