//! Byte stream over which update images arrive.
//!
//! Packet framing and integrity of individual frames belong to the driver implementing
//! [`Transport`]; the bootloader only sees the reassembled byte stream.

use core::time::Duration;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// Nothing arrived within the allotted time.
    Timeout,
    /// A frame failed its integrity check, or more data arrived than was announced.
    Framing,
    /// The stream ended before the announced number of bytes arrived.
    Truncated,
}

/// A bidirectional byte stream.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Receive at most `buf.len()` bytes, waiting at most `timeout` for the first byte.
    ///
    /// Returns the number of bytes received. Returning `Ok(0)` signals the end of the stream.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Send a status report back to the peer.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Fill `buf` completely, one receive at a time.
pub(crate) async fn receive_exact<T: Transport>(
    transport: &mut T,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(), TransportError> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = transport.receive(&mut buf[pos..], timeout).await?;
        if n == 0 {
            return Err(TransportError::Truncated);
        }
        pos += n;
    }
    Ok(())
}
