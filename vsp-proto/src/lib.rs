//! Low-level protocol logic for the VSP/BRSP serial-over-GATT protocol
//!
//! vsp-proto contains a fully deterministic implementation of the VSP/BRSP
//! connection handshake and flow-controlled byte stream. It contains no
//! Bluetooth code and performs no I/O: the [`Connection`] state machine is
//! driven entirely by feeding it transport events and draining the GATT
//! operations it wants performed. Most users will want the socket-style
//! `vsp` API instead.
//!
//! The vsp-proto API might be of interest if you want to bind the protocol
//! to a platform BLE stack not covered by the facade crate, or drive it from
//! a custom event loop.
//!
//! The most important type is [`Connection`], which owns all per-connection
//! state: the resolved manufacturer [`Variant`], the RTS/CTS modem flags,
//! and the bounded read and write buffers.

#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::use_self)]

use std::fmt;

use thiserror::Error;

mod connection;
pub use crate::connection::{Connection, Event, ReadError, WriteError};

mod profile;
pub use crate::profile::{CharacteristicSet, Variant, NOTIFY_DISABLE, NOTIFY_ENABLE};

mod shared;
pub use crate::shared::{
    CharacteristicInfo, ConfigError, GattEvent, Io, SocketConfig, TransportError,
};

mod stream_buffer;

#[cfg(test)]
mod tests;

/// Maximum payload carried by one GATT write or notification
///
/// 20 bytes is the ATT default (23-byte MTU minus the 3-byte header) and is
/// what both supported chip families assume. It drives outbound
/// fragmentation and the inbound overflow margin.
pub const PACKET_SIZE: usize = 20;

/// Smallest permitted buffer capacity: one full packet plus one spare byte
pub const MIN_BUFFER_SIZE: usize = PACKET_SIZE + 1;

/// Coarse lifecycle state of a VSP connection
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    /// No connection exists or a previous one has been fully torn down
    Unconnected,
    /// The transport link and the VSP handshake are being established
    ///
    /// A failed handshake leaves the connection in this state; only
    /// [`Connection::close`] returns it to `Unconnected`.
    Connecting,
    /// The handshake completed; the byte stream is usable
    Connected,
    /// Teardown is in progress
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match *self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        })
    }
}

/// Which kind of GATT access an operation failure originated from
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum AccessKind {
    /// A characteristic read failed
    Read,
    /// A characteristic write failed
    Write,
    /// A descriptor write failed
    Descriptor,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match *self {
            Self::Read => "characteristic read",
            Self::Write => "characteristic write",
            Self::Descriptor => "descriptor write",
        })
    }
}

/// Reasons a VSP connection reports an error
///
/// Handshake-phase errors are surfaced through [`Event::Error`] but do not
/// revert [`ConnectionState`]; the caller decides whether to tear down.
/// [`ErrorKind::ReadOverflow`] is non-fatal: the offending packet is dropped
/// and inbound flow is paused, but the connection stays open.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// The transport-level connect attempt failed
    #[error("transport connect failed")]
    Connection,
    /// Service discovery finished without finding a recognized VSP service
    #[error("no VSP service found")]
    Discovery,
    /// A required characteristic is missing from the discovered service
    #[error("cannot retrieve the VSP service characteristics")]
    CharacteristicResolution,
    /// A notification-configuration descriptor is missing
    #[error("cannot detect VSP service notifications")]
    NotificationUnavailable,
    /// The transport provider reported a failed GATT access
    #[error("{0} error")]
    Access(AccessKind),
    /// An inbound packet did not fit in the read buffer and was dropped
    #[error("internal read buffer overflow, data packet dropped")]
    ReadOverflow,
    /// A write did not fit in the write buffer and was rejected whole
    #[error("internal write buffer overflow, write failed")]
    WriteOverflow,
    /// A stream operation was attempted while the connection was not open
    #[error("not connected")]
    NotConnected,
}
