use crate::prelude::*;

/// Upper bound for one telegram frame, checksum suffix included.
pub const TELEGRAM_SIZE: usize = 368;

/// Incremental assembler for one OBIS telegram.
///
/// Fed arbitrary chunks from the serial port; bytes before the `/` frame
/// start are discarded. A frame is complete once the third-from-last byte
/// accumulated is `!` (the `!` is followed by the two checksum bytes).
#[derive(Debug, Default)]
pub struct TelegramReader {
    packet: Vec<u8>,
    started: bool,
}

impl TelegramReader {
    pub fn new() -> Self {
        Self {
            packet: Vec::with_capacity(TELEGRAM_SIZE),
            started: false,
        }
    }

    /// True once the frame-start `/` has been seen. The caller uses this to
    /// switch from an open-ended wait to the inter-byte timeout.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Consume a chunk. Returns the completed telegram once terminated.
    /// A full buffer without a terminator means the stream is out of sync.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Option<String>, Error> {
        for &byte in bytes {
            if byte == b'/' {
                self.started = true;
            }
            if !self.started {
                continue;
            }

            self.packet.push(byte);

            let len = self.packet.len();
            if len >= 3 && self.packet[len - 3] == b'!' {
                let telegram = String::from_utf8_lossy(&self.packet).into_owned();
                self.packet.clear();
                self.started = false;
                return Ok(Some(telegram));
            }

            if len >= TELEGRAM_SIZE {
                self.packet.clear();
                self.started = false;
                return Err(Error::protocol("telegram stream not in sync"));
            }
        }

        Ok(None)
    }
}
