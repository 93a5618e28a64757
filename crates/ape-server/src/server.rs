//! The trace event server.
//!
//! One acceptor thread polls a Unix listener; each accepted peer gets a
//! reader thread that performs the handshake and then streams events into
//! [`SharedProtocolState`]. A new connection supersedes the previous one.

use std::io::{BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::artifacts::relocate_directory;
use crate::descriptor::{load_target_methods, DescriptorError, TargetMethodDescriptor};
use crate::shared::{IdleOutcome, SharedProtocolState};
use crate::wire::{self, Event, ProtocolError, HANDSHAKE};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("server I/O: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Filesystem address of the listening socket.
    pub socket_path: PathBuf,
    /// Interval between accept attempts; also bounds shutdown latency.
    pub accept_poll_millis: u64,
    /// Only count target events from the thread announced at handshake.
    pub filter_main_thread: bool,
    /// Tab-separated target method list; no targets when unset.
    pub target_method_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/dev/mt/ape"),
            accept_poll_millis: 100,
            filter_main_thread: false,
            target_method_file: None,
        }
    }
}

/// Cloneable view of the server used by the agent side.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shared: Arc<SharedProtocolState>,
    methods: Arc<Vec<TargetMethodDescriptor>>,
}

impl ServerHandle {
    pub fn wait_for_idle(&self, since: i64, timeout: Duration) -> IdleOutcome {
        self.shared.wait_for_idle(since, timeout)
    }

    pub fn met_target_methods(&self, timestamp: i64) -> bool {
        self.shared.met_target_methods(timestamp)
    }

    pub fn last_target_method(&self) -> Option<&TargetMethodDescriptor> {
        let id = self.shared.last_target_method_id()?;
        self.methods.get(id as usize)
    }

    pub fn last_target_method_id(&self) -> Option<i32> {
        self.shared.last_target_method_id()
    }

    pub fn last_idle_timestamp(&self) -> i64 {
        self.shared.last_idle_timestamp()
    }

    pub fn connection_count(&self) -> u32 {
        self.shared.connection_count()
    }

    pub fn main_thread_id(&self) -> Option<i32> {
        self.shared.main_thread_id()
    }

    pub fn peer_directory(&self) -> Option<PathBuf> {
        self.shared.peer_directory()
    }

    pub fn target_methods(&self) -> &[TargetMethodDescriptor] {
        &self.methods
    }

    /// Force the crash sentinel, e.g. after the driver killed the target.
    pub fn alert_crash(&self) {
        self.shared.mark_crashed();
    }

    /// Queue the current peer's directory to be moved to `destination` when
    /// the server closes. Returns false when no peer has announced one.
    pub fn request_directory_move(&self, destination: impl Into<PathBuf>) -> bool {
        match self.shared.peer_directory() {
            Some(source) => {
                self.shared.queue_move(source, destination.into());
                true
            }
            None => false,
        }
    }
}

/// Per-connection context handed to reader threads.
#[derive(Clone)]
struct ConnectionContext {
    shared: Arc<SharedProtocolState>,
    methods: Arc<Vec<TargetMethodDescriptor>>,
    table: Arc<Vec<u8>>,
    filter_main_thread: bool,
}

pub struct EventServer {
    handle: ServerHandle,
    socket_path: PathBuf,
    done: Option<Sender<()>>,
    acceptor: Option<JoinHandle<()>>,
}

impl EventServer {
    /// Bind using `config`, loading the target method file if one is set.
    pub fn start(config: ServerConfig) -> Result<Self, ServerError> {
        let methods = match &config.target_method_file {
            Some(path) => load_target_methods(path)?,
            None => Vec::new(),
        };
        Self::start_with_methods(config, methods)
    }

    pub fn start_with_methods(
        config: ServerConfig,
        methods: Vec<TargetMethodDescriptor>,
    ) -> Result<Self, ServerError> {
        let path = config.socket_path.clone();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path).map_err(|source| ServerError::Bind {
            path: path.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        info!(path = %path.display(), methods = methods.len(), "event server listening");

        let shared = Arc::new(SharedProtocolState::new());
        let methods = Arc::new(methods);
        let ctx = ConnectionContext {
            shared: Arc::clone(&shared),
            table: Arc::new(wire::encode_table(&methods)),
            methods: Arc::clone(&methods),
            filter_main_thread: config.filter_main_thread,
        };
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let poll = Duration::from_millis(config.accept_poll_millis.max(1));
        let acceptor = thread::Builder::new()
            .name("ape-event-acceptor".into())
            .spawn(move || accept_loop(listener, ctx, done_rx, poll))?;

        Ok(Self {
            handle: ServerHandle { shared, methods },
            socket_path: path,
            done: Some(done_tx),
            acceptor: Some(acceptor),
        })
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting, interrupt the active reader, join both threads, and
    /// run queued directory moves. Idempotent.
    pub fn close(&mut self) {
        let Some(done) = self.done.take() else {
            return;
        };
        drop(done);
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                error!("acceptor thread panicked");
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);

        for (source, destination) in self.handle.shared.take_moves() {
            match relocate_directory(&source, &destination) {
                Ok(()) => info!(to = %destination.display(), "trace directory moved"),
                Err(e) => warn!(error = %e, from = %source.display(), "trace directory move failed"),
            }
        }
        info!("event server closed");
    }
}

impl Drop for EventServer {
    fn drop(&mut self) {
        self.close();
    }
}

struct ActiveConnection {
    stream: UnixStream,
    reader: JoinHandle<()>,
}

impl ActiveConnection {
    fn terminate(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        if self.reader.join().is_err() {
            error!("connection reader panicked");
        }
    }
}

fn accept_loop(listener: UnixListener, ctx: ConnectionContext, done: Receiver<()>, poll: Duration) {
    let mut active: Option<ActiveConnection> = None;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Some(previous) = active.take() {
                    debug!("new connection supersedes the active one");
                    previous.terminate();
                }
                match spawn_reader(stream, ctx.clone()) {
                    Ok(connection) => active = Some(connection),
                    Err(e) => warn!(error = %e, "cannot start connection reader"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => warn!(error = %e, "accept failed"),
        }
        match done.recv_timeout(poll) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if let Some(connection) = active.take() {
        connection.terminate();
    }
}

fn spawn_reader(stream: UnixStream, ctx: ConnectionContext) -> std::io::Result<ActiveConnection> {
    stream.set_nonblocking(false)?;
    let control = stream.try_clone()?;
    let closer = stream.try_clone()?;
    let reader = thread::Builder::new()
        .name("ape-event-reader".into())
        .spawn(move || {
            match serve_connection(stream, &ctx) {
                Ok(()) => {}
                Err(e) if e.is_disconnect() => info!("peer disconnected"),
                Err(e) => warn!(error = %e, "connection closed on protocol error"),
            }
            let _ = closer.shutdown(Shutdown::Both);
            ctx.shared.mark_crashed();
        })?;
    Ok(ActiveConnection {
        stream: control,
        reader,
    })
}

fn serve_connection(stream: UnixStream, ctx: &ConnectionContext) -> Result<(), ProtocolError> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    let magic = wire::read_i32(&mut reader)?;
    if magic != HANDSHAKE {
        return Err(ProtocolError::BadHandshake(magic));
    }
    wire::write_i32(&mut writer, HANDSHAKE)?;
    writer.flush()?;
    let main_thread = wire::read_i32(&mut reader)?;
    let directory = wire::read_string(&mut reader)?;
    ctx.shared
        .connection_opened(main_thread, PathBuf::from(directory));
    writer.write_all(&ctx.table)?;
    writer.flush()?;
    debug!(methods = ctx.methods.len(), "handshake complete");

    loop {
        match wire::read_event(&mut reader, ctx.methods.len())? {
            Event::Target {
                kind,
                thread,
                method,
                timestamp,
            } => {
                if ctx.filter_main_thread && ctx.shared.main_thread_id() != Some(thread) {
                    debug!(thread, method, "target event from another thread ignored");
                    continue;
                }
                debug!(?kind, thread, method, timestamp, "target event");
                ctx.shared.record_target(method, timestamp);
            }
            Event::Idle { timestamp } => ctx.shared.record_idle(timestamp),
        }
    }
}
