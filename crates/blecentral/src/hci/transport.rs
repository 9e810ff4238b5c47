//! Controller transport seam
//!
//! The host never opens devices itself. Whatever carries HCI-framed bytes to
//! the controller (a raw HCI socket, a UART, a USB endpoint) implements
//! [`HciTransport`].

use crate::error::HciError;

/// Duplex channel to the controller, write half.
///
/// Each call carries exactly one HCI packet, packet-type octet included.
/// Inbound packets are pushed into [`crate::host::Host::handle_packet`] by the
/// owner of the read half.
pub trait HciTransport {
    fn write_packet(&mut self, packet: &[u8]) -> Result<(), HciError>;
}

impl<T: HciTransport + ?Sized> HciTransport for Box<T> {
    fn write_packet(&mut self, packet: &[u8]) -> Result<(), HciError> {
        (**self).write_packet(packet)
    }
}
