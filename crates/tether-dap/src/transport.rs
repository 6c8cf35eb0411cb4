//! Byte-stream transport abstraction and a tokio stream implementation.
//!
//! The session only sees [`Transport`]: it writes framed bytes and gets
//! raw chunks back through a callback. How the bytes travel is up to the
//! implementation.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Size of a single read from the underlying stream.
const READ_CHUNK_SIZE: usize = 8192;

/// Lifecycle of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Created, not started.
    #[default]
    Idle,
    /// Started and able to carry bytes.
    Running,
    /// Closed locally or by the peer.
    Closed,
}

/// What the transport hands to the read callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent<'a> {
    /// A chunk of bytes, in arrival order. Chunks carry no frame alignment.
    Data(&'a [u8]),
    /// The peer closed the stream or reading failed. Delivered once.
    Closed,
}

/// Callback receiving inbound bytes.
pub type ReadCallback = Box<dyn FnMut(ReadEvent<'_>) + Send + 'static>;

/// A connected byte channel to a debug adapter.
pub trait Transport: Send + Sync {
    /// Make the transport ready for writing.
    fn start(&self) -> io::Result<()>;

    /// Close the transport. Returns `false` if it was already closed.
    fn close(&self) -> bool;

    /// Queue `bytes` for sending. Returns the number of bytes accepted.
    fn write(&self, bytes: &[u8]) -> io::Result<usize>;

    /// Begin delivering inbound bytes to `callback`.
    fn start_async_read(&self, callback: ReadCallback);

    fn state(&self) -> TransportState;
}

// ---------------------------------------------------------------------------
// Tokio stream transport
// ---------------------------------------------------------------------------

/// Transport over any tokio `AsyncRead` / `AsyncWrite` pair.
///
/// Writes go through an unbounded channel drained by a writer task, so
/// [`Transport::write`] never blocks. A reader task forwards every chunk
/// to the read callback.
pub struct StreamTransport<R, W> {
    runtime: Handle,
    reader: Mutex<Option<R>>,
    writer: Mutex<Option<W>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    state: Arc<Mutex<TransportState>>,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a reader/writer pair. Must be called inside a tokio runtime.
    pub fn new(reader: R, writer: W) -> io::Result<Self> {
        let runtime = Handle::try_current().map_err(io::Error::other)?;
        Ok(Self {
            runtime,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            outbound: Mutex::new(None),
            reader_task: Mutex::new(None),
            state: Arc::new(Mutex::new(TransportState::Idle)),
        })
    }
}

impl StreamTransport<OwnedReadHalf, OwnedWriteHalf> {
    /// Connect to a debug adapter listening on a TCP socket.
    pub async fn connect_tcp(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn start(&self) -> io::Result<()> {
        let mut writer = lock(&self.writer).take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AlreadyExists, "transport already started")
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let state = Arc::clone(&self.state);
        self.runtime.spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = writer.write_all(&msg).await {
                    tracing::error!("transport write failed: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    tracing::error!("transport flush failed: {}", e);
                    break;
                }
            }
            let _ = writer.shutdown().await;
            *lock(&state) = TransportState::Closed;
        });

        *lock(&self.outbound) = Some(tx);
        let mut state = lock(&self.state);
        if *state == TransportState::Idle {
            *state = TransportState::Running;
        }
        Ok(())
    }

    fn close(&self) -> bool {
        {
            let mut state = lock(&self.state);
            if *state == TransportState::Closed {
                return false;
            }
            *state = TransportState::Closed;
        }
        lock(&self.outbound).take();
        if let Some(task) = lock(&self.reader_task).take() {
            task.abort();
        }
        true
    }

    fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        if self.state() != TransportState::Running {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport is not running",
            ));
        }
        let outbound = lock(&self.outbound);
        let tx = outbound
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport not started"))?;
        tx.send(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer task has exited"))?;
        Ok(bytes.len())
    }

    fn start_async_read(&self, mut callback: ReadCallback) {
        let Some(mut reader) = lock(&self.reader).take() else {
            tracing::warn!("transport read loop already started");
            return;
        };

        let state = Arc::clone(&self.state);
        let task = self.runtime.spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        tracing::debug!("transport reached end of stream");
                        break;
                    }
                    Ok(n) => callback(ReadEvent::Data(&buf[..n])),
                    Err(e) => {
                        tracing::error!("transport read failed: {}", e);
                        break;
                    }
                }
            }
            *lock(&state) = TransportState::Closed;
            callback(ReadEvent::Closed);
        });
        *lock(&self.reader_task) = Some(task);
    }

    fn state(&self) -> TransportState {
        *lock(&self.state)
    }
}

impl<R, W> Drop for StreamTransport<R, W> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.reader_task).take() {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
