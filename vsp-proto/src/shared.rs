use std::fmt;

use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use crate::{AccessKind, MIN_BUFFER_SIZE};

/// Events delivered from the transport provider to a [`Connection`]
///
/// The provider is whatever binds the protocol to a platform BLE stack. It
/// reports each completed operation and each unsolicited notification here;
/// the engine never learns about the transport any other way.
///
/// [`Connection`]: crate::Connection
#[derive(Debug, Clone)]
pub enum GattEvent {
    /// The transport-level link to the device came up
    Connected,
    /// Service discovery finished; `services` lists everything advertised
    DiscoveryFinished {
        /// Discovered service UUIDs, in discovery order
        services: Vec<Uuid>,
    },
    /// Characteristic/descriptor discovery on the chosen service finished
    ServiceDetailsReady {
        /// The characteristics the service turned out to contain
        characteristics: Vec<CharacteristicInfo>,
    },
    /// A subscribed characteristic's value changed (notification)
    CharacteristicChanged {
        /// The characteristic that changed
        characteristic: Uuid,
        /// Its new value
        value: Bytes,
    },
    /// A requested characteristic read completed
    CharacteristicRead {
        /// The characteristic that was read
        characteristic: Uuid,
        /// The value returned
        value: Bytes,
    },
    /// A characteristic write was confirmed
    CharacteristicWritten {
        /// The characteristic that was written
        characteristic: Uuid,
        /// The value the write settled on
        value: Bytes,
    },
    /// A descriptor write was confirmed
    DescriptorWritten {
        /// The characteristic whose notification descriptor was written
        characteristic: Uuid,
        /// The value the write settled on
        value: Bytes,
    },
    /// The transport provider reported a failure
    TransportError(TransportError),
}

/// One characteristic found during service-details discovery
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CharacteristicInfo {
    /// The characteristic's UUID
    pub uuid: Uuid,
    /// Whether a Client Characteristic Configuration descriptor is present
    pub notify_configurable: bool,
}

/// GATT operations a [`Connection`] wants the transport provider to perform
///
/// Drain these with [`Connection::poll_io`] after feeding events or calling
/// stream operations, and submit them in order. Completions come back as
/// [`GattEvent`]s.
///
/// [`Connection`]: crate::Connection
/// [`Connection::poll_io`]: crate::Connection::poll_io
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Io {
    /// Bring up the transport link to the remote device
    Connect,
    /// Tear the transport link down
    Disconnect,
    /// Discover the services the device advertises
    DiscoverServices,
    /// Discover the characteristics and descriptors of one service
    DiscoverCharacteristics {
        /// The service to inspect
        service: Uuid,
    },
    /// Write a characteristic value
    WriteCharacteristic {
        /// Target characteristic
        characteristic: Uuid,
        /// Value to write
        value: Bytes,
    },
    /// Read a characteristic value
    ReadCharacteristic {
        /// Characteristic to read
        characteristic: Uuid,
    },
    /// Write a characteristic's notification-configuration descriptor
    WriteDescriptor {
        /// The characteristic whose descriptor to write
        characteristic: Uuid,
        /// Value to write
        value: Bytes,
    },
}

/// Failure categories a transport provider can report
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum TransportError {
    /// The transport-level connect attempt failed
    #[error("connect failed")]
    ConnectFailed,
    /// A characteristic read failed
    #[error("characteristic read failed")]
    CharacteristicRead,
    /// A characteristic write failed
    #[error("characteristic write failed")]
    CharacteristicWrite,
    /// A descriptor write failed
    #[error("descriptor write failed")]
    DescriptorWrite,
}

impl TransportError {
    pub(crate) fn kind(self) -> crate::ErrorKind {
        match self {
            Self::ConnectFailed => crate::ErrorKind::Connection,
            Self::CharacteristicRead => crate::ErrorKind::Access(AccessKind::Read),
            Self::CharacteristicWrite => crate::ErrorKind::Access(AccessKind::Write),
            Self::DescriptorWrite => crate::ErrorKind::Access(AccessKind::Descriptor),
        }
    }
}

/// Parameters governing one VSP connection
#[derive(Clone)]
pub struct SocketConfig {
    pub(crate) max_buffer_size: usize,
}

impl SocketConfig {
    /// Maximum occupancy of each of the read and write buffers, in bytes
    ///
    /// Inbound packets that would breach the bound are dropped and pause
    /// the peer via RTS; outbound writes that would breach it are rejected
    /// whole. Must be at least [`MIN_BUFFER_SIZE`] (one packet plus a spare
    /// byte). Defaults to 4096.
    ///
    /// [`MIN_BUFFER_SIZE`]: crate::MIN_BUFFER_SIZE
    pub fn max_buffer_size(&mut self, value: usize) -> Result<&mut Self, ConfigError> {
        if value < MIN_BUFFER_SIZE {
            return Err(ConfigError::IllegalValue);
        }
        self.max_buffer_size = value;
        Ok(self)
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 4096,
        }
    }
}

impl fmt::Debug for SocketConfig {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("SocketConfig")
            .field("max_buffer_size", &self.max_buffer_size)
            .finish()
    }
}

/// Errors in the configuration being used
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ConfigError {
    /// Value exceeds supported bounds
    #[error("value exceeds supported bounds")]
    IllegalValue,
}
