//! Manufacturer-specific GATT profiles
//!
//! Each supported chip family exposes the serial service under its own UUIDs
//! and encodes the modem flags with its own bit polarity. Everything here is
//! resolved once, when service discovery identifies the variant, and never
//! mutated afterwards.

use std::fmt;

use uuid::{uuid, Uuid};

/// Value written to a Client Characteristic Configuration descriptor to
/// enable notifications
pub const NOTIFY_ENABLE: [u8; 2] = [0x01, 0x00];
/// Value written to a Client Characteristic Configuration descriptor to
/// disable notifications
pub const NOTIFY_DISABLE: [u8; 2] = [0x00, 0x00];

/// Payload switching a BlueRadios chip from command mode into data mode
pub(crate) const BRSP_MODE_DATA: [u8; 1] = [0x01];

const LAIRD_SERVICE: Uuid = uuid!("569a1101-b87f-490c-92cb-11ba5ea5167c");
const BLUERADIOS_SERVICE: Uuid = uuid!("da2b84f1-6279-48de-bdc0-afbea0226079");

const LAIRD_CHARACTERISTICS: CharacteristicSet = CharacteristicSet {
    modem_in: uuid!("569a2003-b87f-490c-92cb-11ba5ea5167c"),
    modem_out: uuid!("569a2002-b87f-490c-92cb-11ba5ea5167c"),
    rx_fifo: uuid!("569a2001-b87f-490c-92cb-11ba5ea5167c"),
    tx_fifo: uuid!("569a2000-b87f-490c-92cb-11ba5ea5167c"),
    mode_switch: None,
};

const BLUERADIOS_CHARACTERISTICS: CharacteristicSet = CharacteristicSet {
    modem_in: uuid!("0a1934f5-24b8-4f13-9842-37bb167c6aff"),
    modem_out: uuid!("fdd6b4d3-046d-4330-bdec-1fd0c90cb43b"),
    rx_fifo: uuid!("bf03260c-7205-4c25-af43-93b1c299d159"),
    tx_fifo: uuid!("18cda784-4bd3-4370-85bb-bfed91ec86af"),
    mode_switch: Some(uuid!("a87988b9-694c-479c-900e-95dfa6c00a24")),
};

/// Chip family a discovered VSP service belongs to
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Variant {
    /// Laird VSP service
    Laird,
    /// BlueRadios BRSP service; requires a mode switch before streaming
    BlueRadios,
}

impl Variant {
    /// Identify the variant advertising `service`, if any
    pub fn from_service(service: Uuid) -> Option<Self> {
        match service {
            LAIRD_SERVICE => Some(Self::Laird),
            BLUERADIOS_SERVICE => Some(Self::BlueRadios),
            _ => None,
        }
    }

    /// UUID of this variant's serial service
    pub fn service(self) -> Uuid {
        match self {
            Self::Laird => LAIRD_SERVICE,
            Self::BlueRadios => BLUERADIOS_SERVICE,
        }
    }

    /// The characteristics making up this variant's serial service
    pub fn characteristics(self) -> &'static CharacteristicSet {
        match self {
            Self::Laird => &LAIRD_CHARACTERISTICS,
            Self::BlueRadios => &BLUERADIOS_CHARACTERISTICS,
        }
    }

    /// Byte written to a modem characteristic to assert a flow-control flag
    pub fn modem_set(self) -> &'static [u8] {
        match self {
            Self::Laird => &[0x01],
            Self::BlueRadios => &[0x00],
        }
    }

    /// Byte written to a modem characteristic to clear a flow-control flag
    pub fn modem_clear(self) -> &'static [u8] {
        match self {
            Self::Laird => &[0x00],
            Self::BlueRadios => &[0x01],
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match *self {
            Self::Laird => "Laird",
            Self::BlueRadios => "BlueRadios",
        })
    }
}

/// The GATT characteristics a variant's serial service is built from
///
/// Names are from the peripheral's point of view: the peer's RX FIFO is
/// where we write outbound data, its TX FIFO is where inbound data is
/// notified.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CharacteristicSet {
    /// Peer-facing RTS line; we write `modem_set`/`modem_clear` here
    pub modem_in: Uuid,
    /// Peer-driven CTS line; value changes arrive as notifications
    pub modem_out: Uuid,
    /// Outbound data sink
    pub rx_fifo: Uuid,
    /// Inbound data source, delivered by notification
    pub tx_fifo: Uuid,
    /// Data-mode switch, present on BlueRadios only
    pub mode_switch: Option<Uuid>,
}

impl CharacteristicSet {
    /// Characteristics which must resolve for the connection to be usable
    pub fn required(&self) -> impl Iterator<Item = Uuid> {
        [self.modem_in, self.modem_out, self.rx_fifo, self.tx_fifo]
            .into_iter()
            .chain(self.mode_switch)
    }
}
