use std::collections::VecDeque;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::profile::{CharacteristicSet, Variant, BRSP_MODE_DATA, NOTIFY_ENABLE};
use crate::shared::{GattEvent, Io, SocketConfig};
use crate::stream_buffer::StreamBuffer;
use crate::{ConnectionState, ErrorKind, PACKET_SIZE};

/// Protocol state for a single VSP connection
///
/// Objects of this type receive transport events via [`handle_event`], make
/// GATT operations available via [`poll_io`], and make application-facing
/// events available via [`poll`]. The connection performs no I/O itself and
/// arms no timers; a handshake whose next confirmation never arrives stays
/// in [`ConnectionState::Connecting`] until [`close`] is called.
///
/// Stream data is moved with [`read`] and [`write`], which operate on
/// bounded FIFO buffers. Inbound flow is controlled with the RTS flag
/// (managed automatically around buffer occupancy, or manually with
/// [`set_rts`]/[`clear_rts`]); outbound flow obeys the peer's CTS flag.
///
/// [`handle_event`]: Connection::handle_event
/// [`poll_io`]: Connection::poll_io
/// [`poll`]: Connection::poll
/// [`close`]: Connection::close
/// [`read`]: Connection::read
/// [`write`]: Connection::write
/// [`set_rts`]: Connection::set_rts
/// [`clear_rts`]: Connection::clear_rts
pub struct Connection {
    state: ConnectionState,
    phase: Phase,
    variant: Option<Variant>,
    /// Peer-granted permission to send
    cts: bool,
    /// Permission we have granted the peer, as last confirmed by the stack
    rts: bool,
    read_buffer: StreamBuffer,
    write_buffer: StreamBuffer,
    /// Whether an RX-FIFO data write is awaiting confirmation
    data_write_pending: bool,
    ios: VecDeque<Io>,
    events: VecDeque<Event>,
    last_error: Option<ErrorKind>,
}

impl Connection {
    /// Construct a connection in [`ConnectionState::Unconnected`]
    pub fn new(config: &SocketConfig) -> Self {
        Self {
            state: ConnectionState::Unconnected,
            phase: Phase::Idle,
            variant: None,
            cts: false,
            rts: false,
            read_buffer: StreamBuffer::new(config.max_buffer_size),
            write_buffer: StreamBuffer::new(config.max_buffer_size),
            data_write_pending: false,
            ios: VecDeque::new(),
            events: VecDeque::new(),
            last_error: None,
        }
    }

    /// Begin connecting to the remote device
    ///
    /// Queues the transport connect operation and enters
    /// [`ConnectionState::Connecting`]. The handshake then advances one step
    /// per confirmation event; completion is reported via
    /// [`Event::Connected`]. A handshake failure is reported via
    /// [`Event::Error`] but leaves the state at `Connecting`; call
    /// [`close`](Self::close) to return to `Unconnected` before retrying.
    ///
    /// No-op unless currently `Unconnected`.
    pub fn connect(&mut self) {
        if self.state != ConnectionState::Unconnected {
            return;
        }
        self.ios.push_back(Io::Connect);
        self.phase = Phase::AwaitLink;
        self.set_state(ConnectionState::Connecting);
    }

    /// Process an event from the transport provider
    pub fn handle_event(&mut self, event: GattEvent) {
        match event {
            GattEvent::Connected => {
                if self.phase == Phase::AwaitLink {
                    self.ios.push_back(Io::DiscoverServices);
                    self.phase = Phase::AwaitDiscovery;
                }
            }
            GattEvent::DiscoveryFinished { services } => {
                if self.phase != Phase::AwaitDiscovery {
                    return;
                }
                // First recognized service wins
                let Some(variant) = services.iter().copied().find_map(Variant::from_service)
                else {
                    self.error(ErrorKind::Discovery);
                    return;
                };
                debug!(%variant, "VSP service found");
                self.variant = Some(variant);
                self.ios.push_back(Io::DiscoverCharacteristics {
                    service: variant.service(),
                });
                self.phase = Phase::AwaitDetails;
            }
            GattEvent::ServiceDetailsReady { characteristics } => {
                if self.phase != Phase::AwaitDetails {
                    return;
                }
                let Some(variant) = self.variant else { return };
                let chars = variant.characteristics();
                let find = |uuid| characteristics.iter().find(|c| c.uuid == uuid);
                if chars.required().any(|uuid| find(uuid).is_none()) {
                    self.error(ErrorKind::CharacteristicResolution);
                    return;
                }
                let notify = |uuid| find(uuid).is_some_and(|c| c.notify_configurable);
                if !notify(chars.tx_fifo) || !notify(chars.modem_out) {
                    self.error(ErrorKind::NotificationUnavailable);
                    return;
                }
                match chars.mode_switch {
                    Some(mode_switch) => {
                        // BlueRadios streams only once switched into data mode
                        self.ios.push_back(Io::WriteCharacteristic {
                            characteristic: mode_switch,
                            value: Bytes::from_static(&BRSP_MODE_DATA),
                        });
                        self.phase = Phase::AwaitModeSwitch;
                    }
                    None => self.subscribe_tx_fifo(chars),
                }
            }
            GattEvent::DescriptorWritten {
                characteristic,
                value,
            } => {
                let Some(variant) = self.variant else { return };
                let chars = variant.characteristics();
                if characteristic == chars.tx_fifo && value[..] == NOTIFY_ENABLE {
                    // Inbound data subscribed; now subscribe the CTS line
                    self.ios.push_back(Io::WriteDescriptor {
                        characteristic: chars.modem_out,
                        value: Bytes::from_static(&NOTIFY_ENABLE),
                    });
                    self.phase = Phase::AwaitModemOutNotify;
                } else if characteristic == chars.modem_out && value[..] == NOTIFY_ENABLE {
                    // Both subscriptions up; grant the peer permission to send
                    self.write_modem(variant, true);
                    self.phase = Phase::AwaitRts;
                }
            }
            GattEvent::CharacteristicChanged {
                characteristic,
                value,
            } => {
                let Some(variant) = self.variant else { return };
                let chars = variant.characteristics();
                if characteristic == chars.tx_fifo {
                    self.recv_data(variant, value);
                } else if characteristic == chars.modem_out {
                    self.cts = value[..] == *variant.modem_set();
                    trace!(cts = self.cts, "modem status changed");
                    self.try_send();
                }
            }
            GattEvent::CharacteristicRead {
                characteristic,
                value,
            } => {
                let Some(variant) = self.variant else { return };
                let chars = variant.characteristics();
                if characteristic == chars.modem_out && self.state == ConnectionState::Connecting
                {
                    self.cts = value[..] == *variant.modem_set();
                    self.phase = Phase::Established;
                    debug!(%variant, cts = self.cts, "handshake complete");
                    self.set_state(ConnectionState::Connected);
                    self.events.push_back(Event::Connected);
                    if !self.read_buffer.is_empty() {
                        // Data arrived during the handshake window
                        self.events.push_back(Event::Readable);
                    }
                }
            }
            GattEvent::CharacteristicWritten {
                characteristic,
                value,
            } => {
                let Some(variant) = self.variant else { return };
                let chars = variant.characteristics();
                if characteristic == chars.rx_fifo {
                    self.data_write_pending = false;
                    self.try_send();
                } else if characteristic == chars.modem_in {
                    self.rts = value[..] == *variant.modem_set();
                    trace!(rts = self.rts, "modem control written");
                    if self.rts && self.state == ConnectionState::Connecting {
                        // The CTS notification may have fired before our
                        // subscription completed; read the current value
                        self.ios.push_back(Io::ReadCharacteristic {
                            characteristic: chars.modem_out,
                        });
                        self.phase = Phase::AwaitCts;
                    }
                } else if Some(characteristic) == chars.mode_switch {
                    // Data mode active; proceed with notification setup
                    self.subscribe_tx_fifo(chars);
                }
            }
            GattEvent::TransportError(e) => self.error(e.kind()),
        }
    }

    /// Return a queued GATT operation for the transport provider to perform
    ///
    /// Call until `None` after [`handle_event`](Self::handle_event) or any
    /// stream operation, and submit the operations in order.
    pub fn poll_io(&mut self) -> Option<Io> {
        self.ios.pop_front()
    }

    /// Return an application-facing event
    pub fn poll(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Dequeue received bytes, up to `buf.len()`, in arrival order
    ///
    /// Draining the buffer below one packet of headroom re-grants the peer
    /// permission to send if it was previously revoked.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        if self.state != ConnectionState::Connected {
            self.error(ErrorKind::NotConnected);
            return Err(ReadError::NotConnected);
        }
        let n = self.read_buffer.read(buf);
        if !self.rts && self.read_buffer.has_packet_headroom() {
            // Buffer drained; the peer may send again
            if let Some(variant) = self.variant {
                self.write_modem(variant, true);
            }
        }
        Ok(n)
    }

    /// Queue bytes for transmission
    ///
    /// The whole of `data` is accepted or none of it: if it does not fit in
    /// the write buffer the call fails with [`WriteError::Overflow`] and the
    /// buffer is unchanged. Acceptance does not imply delivery; chunks of at
    /// most [`PACKET_SIZE`] bytes are sent as the peer's CTS flag and write
    /// confirmations allow, reported via [`Event::BytesWritten`].
    ///
    /// [`PACKET_SIZE`]: crate::PACKET_SIZE
    pub fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if self.state != ConnectionState::Connected {
            self.error(ErrorKind::NotConnected);
            return Err(WriteError::NotConnected);
        }
        if !self.write_buffer.can_accept(data.len()) {
            self.error(ErrorKind::WriteOverflow);
            return Err(WriteError::Overflow);
        }
        self.write_buffer.push(data);
        self.try_send();
        Ok(data.len())
    }

    /// Manually grant the peer permission to send
    ///
    /// Intended to resume inbound flow after [`clear_rts`](Self::clear_rts).
    /// Silently does nothing if the read buffer lacks room for a further
    /// packet, or if permission is already granted.
    pub fn set_rts(&mut self) {
        let Some(variant) = self.variant else { return };
        if !self.rts && self.read_buffer.has_packet_headroom() {
            self.write_modem(variant, true);
        }
    }

    /// Manually revoke the peer's permission to send
    ///
    /// Useful when the application cannot accept further data for a while
    /// (e.g. going into standby). Unconditional apart from being a no-op
    /// when permission is already revoked.
    pub fn clear_rts(&mut self) {
        let Some(variant) = self.variant else { return };
        if self.rts {
            self.write_modem(variant, false);
        }
    }

    /// Close the connection and reset all per-connection state
    ///
    /// Surfaces [`Event::Finished`], requests transport disconnect, resets
    /// buffers and modem flags, and ends in `Unconnected` with
    /// [`Event::Disconnected`]. Usable from any state, including a stalled
    /// or failed handshake; no-op when already `Unconnected`. A subsequent
    /// [`connect`](Self::connect) starts a fresh handshake.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Unconnected {
            return;
        }
        debug!("closing connection");
        self.set_state(ConnectionState::Closing);
        self.events.push_back(Event::Finished);
        self.ios.clear();
        self.ios.push_back(Io::Disconnect);
        self.variant = None;
        self.cts = false;
        self.rts = false;
        self.data_write_pending = false;
        self.read_buffer.clear();
        self.write_buffer.clear();
        self.phase = Phase::Idle;
        self.set_state(ConnectionState::Unconnected);
        self.events.push_back(Event::Disconnected);
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The most recently reported error, if any
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    /// The manufacturer variant resolved by service discovery
    pub fn variant(&self) -> Option<Variant> {
        self.variant
    }

    /// Number of received bytes waiting to be read
    pub fn bytes_available(&self) -> usize {
        self.read_buffer.len()
    }

    /// Number of queued bytes not yet handed to the transport
    pub fn bytes_to_write(&self) -> usize {
        self.write_buffer.len()
    }

    fn set_state(&mut self, state: ConnectionState) {
        trace!(%state, "state changed");
        self.state = state;
        self.events.push_back(Event::StateChanged(state));
    }

    fn subscribe_tx_fifo(&mut self, chars: &CharacteristicSet) {
        self.ios.push_back(Io::WriteDescriptor {
            characteristic: chars.tx_fifo,
            value: Bytes::from_static(&NOTIFY_ENABLE),
        });
        self.phase = Phase::AwaitTxFifoNotify;
    }

    /// Queue a modem-in write asserting or clearing the peer's send permission
    ///
    /// `rts` itself only changes once the stack confirms the write.
    fn write_modem(&mut self, variant: Variant, asserted: bool) {
        let value = match asserted {
            true => variant.modem_set(),
            false => variant.modem_clear(),
        };
        self.ios.push_back(Io::WriteCharacteristic {
            characteristic: variant.characteristics().modem_in,
            value: Bytes::from_static(value),
        });
    }

    /// Buffer an inbound data notification, shedding it on overflow
    fn recv_data(&mut self, variant: Variant, value: Bytes) {
        if !self.read_buffer.can_accept(value.len()) {
            // No space left; the packet is lost and the peer gets paused
            self.write_modem(variant, false);
            self.error(ErrorKind::ReadOverflow);
            return;
        }
        self.read_buffer.push(&value);
        if !self.read_buffer.has_packet_headroom() {
            // The buffer has now become full; pause before the next packet
            self.write_modem(variant, false);
        }
        if self.state == ConnectionState::Connected {
            // During the handshake, data is buffered silently
            self.events.push_back(Event::Readable);
        }
    }

    /// Hand the next chunk to the transport if flow control permits
    ///
    /// At most one data write is in flight at a time; the confirmation for
    /// it re-triggers this.
    fn try_send(&mut self) {
        if !self.cts || self.data_write_pending {
            return;
        }
        let Some(variant) = self.variant else { return };
        let Some(chunk) = self.write_buffer.pop_chunk(PACKET_SIZE) else {
            return;
        };
        trace!(len = chunk.len(), "sending chunk");
        self.events.push_back(Event::BytesWritten(chunk.len()));
        self.ios.push_back(Io::WriteCharacteristic {
            characteristic: variant.characteristics().rx_fifo,
            value: chunk,
        });
        self.data_write_pending = true;
    }

    fn error(&mut self, kind: ErrorKind) {
        warn!(%kind, "connection error");
        self.last_error = Some(kind);
        self.events.push_back(Event::Error(kind));
    }
}

/// Position within the connection handshake
///
/// Each confirmation event advances exactly one phase; an unexpected or
/// unmatched event leaves the phase untouched.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Phase {
    /// No handshake in progress
    Idle,
    /// Transport connect requested
    AwaitLink,
    /// Service discovery requested
    AwaitDiscovery,
    /// Characteristic discovery requested on the chosen service
    AwaitDetails,
    /// Data-mode switch written (BlueRadios only)
    AwaitModeSwitch,
    /// Notify-enable written to the TX-FIFO descriptor
    AwaitTxFifoNotify,
    /// Notify-enable written to the modem-out descriptor
    AwaitModemOutNotify,
    /// Initial RTS assertion written to modem-in
    AwaitRts,
    /// Defensive modem-out read requested
    AwaitCts,
    /// Handshake finished
    Established,
}

/// Application-facing events, in the order they occurred
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Event {
    /// The lifecycle state changed
    StateChanged(ConnectionState),
    /// The handshake completed; the stream is usable
    Connected,
    /// Received data is available to [`Connection::read`]
    Readable,
    /// Bytes were handed to the transport for delivery
    BytesWritten(usize),
    /// The read channel ended; no further data will be delivered
    Finished,
    /// Teardown completed
    Disconnected,
    /// An error occurred; also recorded in [`Connection::last_error`]
    Error(ErrorKind),
}

/// Errors from [`Connection::read`]
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ReadError {
    /// The connection is not open
    #[error("cannot read while not connected")]
    NotConnected,
}

/// Errors from [`Connection::write`]
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum WriteError {
    /// The connection is not open
    #[error("cannot write while not connected")]
    NotConnected,
    /// The data does not fit in the write buffer; nothing was queued
    #[error("write buffer overflow, write failed")]
    Overflow,
}
