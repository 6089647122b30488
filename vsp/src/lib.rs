//! Serial-over-BLE (VSP/BRSP) socket with an async API
//!
//! vsp exposes the Laird VSP and BlueRadios BRSP serial-over-GATT protocols
//! as a socket-like byte stream. The protocol logic itself lives in
//! [`vsp-proto`] and is platform independent; this crate adds the tokio
//! plumbing and the [`GattTransport`] seam through which a platform BLE
//! stack is attached.
//!
//! Typical use: implement [`GattTransport`] on top of your BLE bindings,
//! hand it to [`VspSocket::new`], then [`connect`], [`read`] and [`write`].
//!
//! [`vsp-proto`]: proto
//! [`connect`]: VspSocket::connect
//! [`read`]: VspSocket::read
//! [`write`]: VspSocket::write

#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::use_self)]

pub use proto::{
    AccessKind, CharacteristicInfo, ConfigError, ConnectionState, ErrorKind, Event, GattEvent,
    Io, ReadError, SocketConfig, TransportError, Variant, WriteError, PACKET_SIZE,
};

mod socket;
pub use crate::socket::{ConnectError, EventStream, VspSocket};

mod transport;
pub use crate::transport::GattTransport;
