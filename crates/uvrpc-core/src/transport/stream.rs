//! Stream transports: TCP and Unix-domain sockets.
//!
//! Both families share the same machinery: a listener accepts connections
//! into a connection table, each connection runs one read task (socket ->
//! frame decoder -> `on_recv`) and one write task (bounded queue -> socket).
//! The client role is the same machinery with a single dialed connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use uvrpc_wire::{FrameDecoder, encode_frame};

use crate::transport::{ErrorFn, RecvFn, on_loop};
use crate::{Addr, Config, Error, PerfMode, ReplyTarget};

const READ_CHUNK: usize = 16 * 1024;
const WRITE_BATCH: usize = 64;

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

enum Acceptor {
    Tcp(TcpListener),
    #[cfg(unix)]
    Ipc(UnixListener),
}

struct ConnHandle {
    writer_tx: mpsc::Sender<Bytes>,
    /// Set right after the read task is spawned; `None` only in the window
    /// where the entry exists but the task handle is not yet recorded.
    read_task: Option<JoinHandle<()>>,
    write_task: JoinHandle<()>,
}

type ConnMap = Arc<Mutex<HashMap<u64, ConnHandle>>>;

/// Read side of one connection: decode frames, deliver upward, clean up the
/// connection table on end-of-stream.
async fn read_loop(
    mut reader: BoxedReader,
    conn_id: u64,
    conns: ConnMap,
    on_recv: RecvFn,
    on_error: ErrorFn,
) {
    let target = ReplyTarget::Stream(conn_id);
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!(conn = conn_id, "peer closed");
                break;
            }
            Ok(n) => {
                decoder.push(&chunk[..n]);
                loop {
                    match decoder.next_frame() {
                        Ok(Some(frame)) => on_recv(frame, target.clone()),
                        Ok(None) => break,
                        Err(err) => {
                            // The byte stream is unsynchronized; only this
                            // connection goes down.
                            on_error(&err.into());
                            drop_conn(&conns, conn_id);
                            return;
                        }
                    }
                }
            }
            Err(err) => {
                on_error(&Error::PeerReset(format!("stream#{}: {}", conn_id, err)));
                break;
            }
        }
    }
    drop_conn(&conns, conn_id);
}

fn drop_conn(conns: &ConnMap, conn_id: u64) {
    // Dropping the handle drops the writer sender; the write task drains
    // its queue and exits on its own.
    conns.lock().remove(&conn_id);
}

/// Write side of one connection: drain the bounded queue onto the socket.
async fn write_loop(
    mut writer: BoxedWriter,
    mut rx: mpsc::Receiver<Bytes>,
    perf_mode: PerfMode,
    on_error: ErrorFn,
) {
    match perf_mode {
        PerfMode::LowLatency => {
            while let Some(frame) = rx.recv().await {
                if let Err(err) = writer.write_all(&frame).await {
                    on_error(&Error::Io(err));
                    return;
                }
                if let Err(err) = writer.flush().await {
                    on_error(&Error::Io(err));
                    return;
                }
            }
        }
        PerfMode::HighThroughput => {
            let mut batch = Vec::with_capacity(WRITE_BATCH);
            loop {
                if rx.recv_many(&mut batch, WRITE_BATCH).await == 0 {
                    return;
                }
                for frame in batch.drain(..) {
                    if let Err(err) = writer.write_all(&frame).await {
                        on_error(&Error::Io(err));
                        return;
                    }
                }
                if let Err(err) = writer.flush().await {
                    on_error(&Error::Io(err));
                    return;
                }
            }
        }
    }
}

fn spawn_conn(
    handle: &Handle,
    conns: &ConnMap,
    conn_id: u64,
    reader: BoxedReader,
    writer: BoxedWriter,
    snd_hwm: usize,
    perf_mode: PerfMode,
    on_recv: RecvFn,
    on_error: ErrorFn,
) {
    let (writer_tx, writer_rx) = mpsc::channel(snd_hwm);
    let write_task = handle.spawn(write_loop(writer, writer_rx, perf_mode, on_error.clone()));
    // The entry must be in the table before the read task can race its own
    // end-of-stream cleanup.
    conns.lock().insert(
        conn_id,
        ConnHandle {
            writer_tx,
            read_task: None,
            write_task,
        },
    );
    let read_task = handle.spawn(read_loop(reader, conn_id, conns.clone(), on_recv, on_error));
    if let Some(conn) = conns.lock().get_mut(&conn_id) {
        conn.read_task = Some(read_task);
    }
}

fn enqueue(tx: &mpsc::Sender<Bytes>, frame: Bytes, conn_id: u64) -> Result<(), Error> {
    tx.try_send(frame).map_err(|err| match err {
        TrySendError::Full(_) => Error::QueueFull,
        TrySendError::Closed(_) => Error::PeerReset(format!("stream#{}", conn_id)),
    })
}

/// Listening stream transport (TCP or Unix-domain).
#[derive(Clone)]
pub struct StreamListener {
    inner: Arc<ListenerInner>,
}

struct ListenerInner {
    handle: Handle,
    local: Addr,
    ipc_path: Option<std::path::PathBuf>,
    acceptor: Mutex<Option<Acceptor>>,
    conns: ConnMap,
    next_conn: AtomicU64,
    snd_hwm: usize,
    perf_mode: PerfMode,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl StreamListener {
    pub(crate) async fn listen(config: &Config) -> Result<Self, Error> {
        let (acceptor, local, ipc_path) = match &config.addr {
            Addr::Tcp(sa) => {
                let sa = *sa;
                let listener = on_loop(&config.handle, async move { TcpListener::bind(sa).await })
                    .await?
                    .map_err(Error::Bind)?;
                let local = Addr::Tcp(listener.local_addr().map_err(Error::Bind)?);
                (Acceptor::Tcp(listener), local, None)
            }
            #[cfg(unix)]
            Addr::Ipc(path) => {
                let path = path.clone();
                let bind_path = path.clone();
                let listener =
                    on_loop(&config.handle, async move { UnixListener::bind(&bind_path) })
                        .await?
                        .map_err(Error::Bind)?;
                (Acceptor::Ipc(listener), Addr::Ipc(path.clone()), Some(path))
            }
            #[cfg(not(unix))]
            Addr::Ipc(_) => {
                return Err(Error::InvalidParam("ipc transport requires unix"));
            }
            _ => return Err(Error::InvalidParam("not a stream address")),
        };
        Ok(Self {
            inner: Arc::new(ListenerInner {
                handle: config.handle.clone(),
                local,
                ipc_path,
                acceptor: Mutex::new(Some(acceptor)),
                conns: Arc::new(Mutex::new(HashMap::new())),
                next_conn: AtomicU64::new(1),
                snd_hwm: config.snd_hwm,
                perf_mode: config.perf_mode,
                accept_task: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn start(&self, on_recv: RecvFn, on_error: ErrorFn) -> Result<(), Error> {
        let acceptor = self
            .inner
            .acceptor
            .lock()
            .take()
            .ok_or(Error::InvalidState("transport already started"))?;
        let inner = self.inner.clone();
        let task = self.inner.handle.spawn(async move {
            loop {
                let io: Result<(BoxedReader, BoxedWriter), std::io::Error> = match &acceptor {
                    Acceptor::Tcp(listener) => listener.accept().await.map(|(stream, peer)| {
                        tracing::debug!(%peer, "accepted tcp connection");
                        let _ = stream.set_nodelay(true);
                        let (r, w) = stream.into_split();
                        (Box::new(r) as BoxedReader, Box::new(w) as BoxedWriter)
                    }),
                    #[cfg(unix)]
                    Acceptor::Ipc(listener) => listener.accept().await.map(|(stream, _)| {
                        tracing::debug!("accepted ipc connection");
                        let (r, w) = stream.into_split();
                        (Box::new(r) as BoxedReader, Box::new(w) as BoxedWriter)
                    }),
                };
                match io {
                    Ok((reader, writer)) => {
                        let conn_id = inner.next_conn.fetch_add(1, Ordering::Relaxed);
                        spawn_conn(
                            &inner.handle,
                            &inner.conns,
                            conn_id,
                            reader,
                            writer,
                            inner.snd_hwm,
                            inner.perf_mode,
                            on_recv.clone(),
                            on_error.clone(),
                        );
                    }
                    Err(err) => {
                        on_error(&Error::Io(err));
                    }
                }
            }
        });
        *self.inner.accept_task.lock() = Some(task);
        Ok(())
    }

    /// Broadcast one framed payload to every accepted connection. Returns
    /// how many peers the frame was queued for; per-peer queue overflow is
    /// logged and skipped.
    pub(crate) fn send(&self, body: &[u8]) -> Result<usize, Error> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::InvalidState("transport closed"));
        }
        let frame = encode_frame(body)?;
        let senders: Vec<(u64, mpsc::Sender<Bytes>)> = self
            .inner
            .conns
            .lock()
            .iter()
            .map(|(id, conn)| (*id, conn.writer_tx.clone()))
            .collect();
        let mut sent = 0;
        for (conn_id, tx) in senders {
            match enqueue(&tx, frame.clone(), conn_id) {
                Ok(()) => sent += 1,
                Err(err) => tracing::warn!(conn = conn_id, error = %err, "broadcast skip"),
            }
        }
        Ok(sent)
    }

    pub(crate) fn send_to(&self, body: &[u8], target: &ReplyTarget) -> Result<(), Error> {
        let ReplyTarget::Stream(conn_id) = target else {
            return Err(Error::InvalidParam("target is not a stream peer"));
        };
        let frame = encode_frame(body)?;
        let tx = self
            .inner
            .conns
            .lock()
            .get(conn_id)
            .map(|conn| conn.writer_tx.clone())
            .ok_or(Error::NotFound)?;
        enqueue(&tx, frame, *conn_id)
    }

    pub(crate) fn peers(&self) -> Vec<ReplyTarget> {
        self.inner
            .conns
            .lock()
            .keys()
            .map(|id| ReplyTarget::Stream(*id))
            .collect()
    }

    pub(crate) fn local_addr(&self) -> Addr {
        self.inner.local.clone()
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.inner.accept_task.lock().take() {
            task.abort();
        }
        let conns: Vec<ConnHandle> = {
            let mut conns = self.inner.conns.lock();
            conns.drain().map(|(_, conn)| conn).collect()
        };
        for conn in conns {
            if let Some(read_task) = conn.read_task {
                read_task.abort();
            }
            conn.write_task.abort();
        }
        if let Some(path) = &self.inner.ipc_path {
            let _ = std::fs::remove_file(path);
        }
        tracing::debug!(addr = %self.inner.local, "stream listener shut down");
    }
}

impl Drop for ListenerInner {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        if let Some(path) = &self.ipc_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Dialing stream transport (TCP or Unix-domain), one connection.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    handle: Handle,
    remote: Addr,
    io: Mutex<Option<(BoxedReader, BoxedWriter)>>,
    conns: ConnMap,
    snd_hwm: usize,
    perf_mode: PerfMode,
    started: AtomicBool,
    closed: AtomicBool,
}

/// The sole connection of a client transport.
const CLIENT_CONN: u64 = 0;

impl StreamClient {
    pub(crate) async fn connect(config: &Config) -> Result<Self, Error> {
        let io: (BoxedReader, BoxedWriter) = match &config.addr {
            Addr::Tcp(sa) => {
                let sa = *sa;
                let stream = on_loop(&config.handle, async move { TcpStream::connect(sa).await })
                    .await?
                    .map_err(Error::Connect)?;
                let _ = stream.set_nodelay(true);
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w))
            }
            #[cfg(unix)]
            Addr::Ipc(path) => {
                let path = path.clone();
                let stream = on_loop(&config.handle, async move { UnixStream::connect(path).await })
                    .await?
                    .map_err(Error::Connect)?;
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w))
            }
            #[cfg(not(unix))]
            Addr::Ipc(_) => {
                return Err(Error::InvalidParam("ipc transport requires unix"));
            }
            _ => return Err(Error::InvalidParam("not a stream address")),
        };
        Ok(Self {
            inner: Arc::new(ClientInner {
                handle: config.handle.clone(),
                remote: config.addr.clone(),
                io: Mutex::new(Some(io)),
                conns: Arc::new(Mutex::new(HashMap::new())),
                snd_hwm: config.snd_hwm,
                perf_mode: config.perf_mode,
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn start(&self, on_recv: RecvFn, on_error: ErrorFn) -> Result<(), Error> {
        let (reader, writer) = self
            .inner
            .io
            .lock()
            .take()
            .ok_or(Error::InvalidState("transport already started"))?;
        spawn_conn(
            &self.inner.handle,
            &self.inner.conns,
            CLIENT_CONN,
            reader,
            writer,
            self.inner.snd_hwm,
            self.inner.perf_mode,
            on_recv,
            on_error,
        );
        self.inner.started.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn send(&self, body: &[u8]) -> Result<usize, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let frame = encode_frame(body)?;
        let tx = self
            .inner
            .conns
            .lock()
            .get(&CLIENT_CONN)
            .map(|conn| conn.writer_tx.clone())
            .ok_or(Error::NotConnected)?;
        enqueue(&tx, frame, CLIENT_CONN)?;
        Ok(1)
    }

    pub(crate) fn send_to(&self, body: &[u8], target: &ReplyTarget) -> Result<(), Error> {
        // A client has exactly one peer; the target only selects the family.
        match target {
            ReplyTarget::Stream(_) => self.send(body).map(|_| ()),
            _ => Err(Error::InvalidParam("target is not a stream peer")),
        }
    }

    pub(crate) fn peers(&self) -> Vec<ReplyTarget> {
        if self.is_connected() && self.inner.started.load(Ordering::Acquire) {
            vec![ReplyTarget::Stream(CLIENT_CONN)]
        } else {
            Vec::new()
        }
    }

    pub(crate) fn local_addr(&self) -> Addr {
        self.inner.remote.clone()
    }

    pub(crate) fn is_connected(&self) -> bool {
        if self.inner.closed.load(Ordering::Acquire) {
            return false;
        }
        if !self.inner.started.load(Ordering::Acquire) {
            // Connected but not yet started: the dialed stream is parked.
            return self.inner.io.lock().is_some();
        }
        !self.inner.conns.lock().is_empty()
    }

    pub(crate) fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let conns: Vec<ConnHandle> = {
            let mut conns = self.inner.conns.lock();
            conns.drain().map(|(_, conn)| conn).collect()
        };
        for conn in conns {
            if let Some(read_task) = conn.read_task {
                read_task.abort();
            }
            conn.write_task.abort();
        }
        self.inner.io.lock().take();
        tracing::debug!(addr = %self.inner.remote, "stream client shut down");
    }
}
