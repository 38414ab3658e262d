use core::time::Duration;
use std::{collections::VecDeque, vec::Vec};

use crate::transport::{Transport, TransportError};

/// Replays a byte stream in fixed size pieces.
pub struct MockTransport {
    pieces: VecDeque<Vec<u8>>,
    /// What to answer once the stream is exhausted.
    end: Result<usize, TransportError>,
    pub sent: Vec<u8>,
    pub timeouts: Vec<Duration>,
}

impl MockTransport {
    pub fn new(stream: &[u8], piece: usize) -> Self {
        Self {
            pieces: stream.chunks(piece).map(|c| c.to_vec()).collect(),
            end: Ok(0),
            sent: Vec::new(),
            timeouts: Vec::new(),
        }
    }

    /// The sender goes silent after `len` bytes.
    pub fn stall_after(stream: &[u8], len: usize, piece: usize) -> Self {
        Self {
            end: Err(TransportError::Timeout),
            ..Self::new(&stream[..len], piece)
        }
    }
}

impl Transport for MockTransport {
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.timeouts.push(timeout);
        let Some(mut piece) = self.pieces.pop_front() else {
            return self.end;
        };
        if piece.len() > buf.len() {
            let rest = piece.split_off(buf.len());
            self.pieces.push_front(rest);
        }
        buf[..piece.len()].copy_from_slice(&piece);
        Ok(piece.len())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.sent.extend_from_slice(bytes);
        Ok(())
    }
}
