use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use proto::{
    Connection, ConnectionState, ErrorKind, Event, ReadError, SocketConfig, Variant, WriteError,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug_span, Instrument};

use crate::transport::GattTransport;

/// A serial byte stream over a VSP/BRSP GATT service
///
/// Construction spawns a driver task on the current tokio runtime which
/// shuttles operations and events between the protocol state machine and
/// the supplied [`GattTransport`]. The socket handle itself is cheap to
/// operate: every method takes `&self` and most are synchronous.
///
/// Dropping the socket closes the connection and stops the driver.
pub struct VspSocket {
    state: SocketRef,
}

impl VspSocket {
    /// Create a socket bound to `transport` and spawn its driver
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<T: GattTransport>(transport: T, config: &SocketConfig) -> Self {
        let state = SocketRef(Arc::new(Mutex::new(State {
            conn: Connection::new(config),
            transport: Box::new(transport),
            driver: None,
            read_waker: None,
            connect_waker: None,
            connect_error: None,
            observers: Vec::new(),
            finished: false,
            shutdown: false,
        })));
        tokio::spawn(Driver(state.clone()).instrument(debug_span!("vsp")));
        Self { state }
    }

    /// Connect to the device and run the protocol handshake to completion
    ///
    /// Resolves once the stream is usable, or with the first handshake
    /// error. After an error the connection remains half-open; call
    /// [`close`](Self::close) before retrying.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        {
            let mut state = self.state.lock();
            state.connect_error = None;
            state.finished = false;
            state.conn.connect();
            state.wake_driver();
        }
        poll_fn(|cx| {
            let mut state = self.state.lock();
            if let Some(kind) = state.connect_error.take() {
                return Poll::Ready(Err(ConnectError(kind)));
            }
            match state.conn.state() {
                ConnectionState::Connected => Poll::Ready(Ok(())),
                ConnectionState::Connecting => {
                    state.connect_waker = Some(cx.waker().clone());
                    Poll::Pending
                }
                // Closed underneath us
                _ => Poll::Ready(Err(ConnectError(ErrorKind::NotConnected))),
            }
        })
        .await
    }

    /// Receive bytes from the stream, in arrival order
    ///
    /// Waits until at least one byte is available. Returns `Ok(0)` only
    /// after the connection has been closed and all buffered data read.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, ReadError> {
        poll_fn(|cx| {
            let mut state = self.state.lock();
            if state.conn.bytes_available() > 0 {
                let n = state.conn.read(buf)?;
                // Draining may re-grant the peer permission to send
                state.wake_driver();
                return Poll::Ready(Ok(n));
            }
            if state.finished {
                return Poll::Ready(Ok(0));
            }
            if state.conn.state() != ConnectionState::Connected {
                return Poll::Ready(Err(ReadError::NotConnected));
            }
            state.read_waker = Some(cx.waker().clone());
            Poll::Pending
        })
        .await
    }

    /// Queue bytes for transmission
    ///
    /// Never blocks: the whole of `data` is buffered, or the call fails
    /// with [`WriteError::Overflow`] and nothing is queued. Delivery
    /// proceeds in the background as the peer's flow control allows and is
    /// reported via [`Event::BytesWritten`] on [`events`](Self::events)
    /// subscriptions.
    pub fn write(&self, data: &[u8]) -> Result<usize, WriteError> {
        let mut state = self.state.lock();
        let n = state.conn.write(data)?;
        state.wake_driver();
        Ok(n)
    }

    /// Manually re-grant the peer permission to send
    pub fn set_rts(&self) {
        let mut state = self.state.lock();
        state.conn.set_rts();
        state.wake_driver();
    }

    /// Manually revoke the peer's permission to send
    pub fn clear_rts(&self) {
        let mut state = self.state.lock();
        state.conn.clear_rts();
        state.wake_driver();
    }

    /// Close the connection
    ///
    /// Pending reads finish with `Ok(0)` once buffered data is drained; a
    /// subsequent [`connect`](Self::connect) starts over.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.conn.close();
        state.finished = true;
        if let Some(waker) = state.read_waker.take() {
            waker.wake();
        }
        state.wake_driver();
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state.lock().conn.state()
    }

    /// The most recently reported error, if any
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.state.lock().conn.last_error()
    }

    /// The manufacturer variant resolved by service discovery
    pub fn variant(&self) -> Option<Variant> {
        self.state.lock().conn.variant()
    }

    /// Number of received bytes waiting to be read
    pub fn bytes_available(&self) -> usize {
        self.state.lock().conn.bytes_available()
    }

    /// Number of queued bytes not yet handed to the transport
    pub fn bytes_to_write(&self) -> usize {
        self.state.lock().conn.bytes_to_write()
    }

    /// Subscribe to the connection's event stream
    ///
    /// Every protocol event from the point of subscription onwards is
    /// delivered to the returned stream, in order.
    pub fn events(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().observers.push(tx);
        EventStream { inner: rx }
    }
}

impl Drop for VspSocket {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.conn.close();
        state.shutdown = true;
        state.wake_driver();
    }
}

#[derive(Clone)]
struct SocketRef(Arc<Mutex<State>>);

impl SocketRef {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Propagating poison would mask the panic that caused it
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct State {
    conn: Connection,
    transport: Box<dyn GattTransport>,
    driver: Option<Waker>,
    read_waker: Option<Waker>,
    connect_waker: Option<Waker>,
    /// First handshake error since the current connect attempt
    connect_error: Option<ErrorKind>,
    observers: Vec<mpsc::UnboundedSender<Event>>,
    /// Whether [`Event::Finished`] has been seen; makes reads return `Ok(0)`
    finished: bool,
    /// Set on drop; tells the driver to exit once flushed
    shutdown: bool,
}

impl State {
    fn wake_driver(&mut self) {
        if let Some(waker) = self.driver.take() {
            waker.wake();
        }
    }

    /// Fan a protocol event out to wakers and subscribers
    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Connected => {
                if let Some(waker) = self.connect_waker.take() {
                    waker.wake();
                }
            }
            Event::Error(kind) => {
                if self.conn.state() == ConnectionState::Connecting {
                    self.connect_error = Some(kind);
                    if let Some(waker) = self.connect_waker.take() {
                        waker.wake();
                    }
                }
            }
            Event::Readable | Event::Finished => {
                if event == Event::Finished {
                    self.finished = true;
                }
                if let Some(waker) = self.read_waker.take() {
                    waker.wake();
                }
            }
            _ => {}
        }
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Connection-driving future spawned by [`VspSocket::new`]
///
/// Shuttles between the transport and the protocol until the socket is
/// dropped and its teardown flushed.
struct Driver(SocketRef);

/// Operations processed per driver poll before yielding back to the runtime
const IO_LOOP_BOUND: usize = 160;

impl Future for Driver {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut guard = self.0.lock();
        let state = &mut *guard;
        state.driver = Some(cx.waker().clone());
        for _ in 0..IO_LOOP_BOUND {
            let mut progress = false;
            while let Some(io) = state.conn.poll_io() {
                progress = true;
                state.transport.start_operation(io);
            }
            while let Some(event) = state.conn.poll() {
                progress = true;
                state.dispatch(event);
            }
            if let Poll::Ready(event) = state.transport.poll_event(cx) {
                progress = true;
                state.conn.handle_event(event);
            }
            if !progress {
                if state.shutdown {
                    return Poll::Ready(());
                }
                return Poll::Pending;
            }
        }
        // Still busy; yield to the runtime and resume
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Stream of protocol [`Event`]s, see [`VspSocket::events`]
pub struct EventStream {
    inner: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Receive the next event; `None` once the socket is gone
    pub async fn recv(&mut self) -> Option<Event> {
        self.inner.recv().await
    }
}

/// Errors from [`VspSocket::connect`]
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("connection failed: {0}")]
pub struct ConnectError(pub ErrorKind);
