use std::task::{Context, Poll};

use proto::{GattEvent, Io};

/// Binding between a [`VspSocket`] and a platform BLE stack
///
/// The socket's driver task submits the GATT operations the protocol wants
/// performed and consumes the resulting events. Implementations translate
/// between [`Io`]/[`GattEvent`] and whatever API the platform offers.
///
/// [`VspSocket`]: crate::VspSocket
pub trait GattTransport: Send + 'static {
    /// Submit a GATT operation for execution
    ///
    /// Operations must be executed in submission order; the protocol relies
    /// on completion events arriving in that same order. Failures are not
    /// returned here but reported through [`poll_event`] as
    /// [`GattEvent::TransportError`].
    ///
    /// [`poll_event`]: GattTransport::poll_event
    fn start_operation(&mut self, op: Io);

    /// Poll for the next completion event or unsolicited notification
    ///
    /// When no event is available, the implementation must arrange for
    /// `cx`'s waker to be woken once one is.
    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<GattEvent>;
}
