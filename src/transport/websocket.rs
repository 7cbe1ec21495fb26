//! WebSocket client framing for MQTT-over-WebSocket schemes.
//!
//! Implements just the client half the engine needs: the HTTP Upgrade
//! handshake (RFC 6455 accept-key verification, `mqtt` subprotocol) and
//! single-frame masked binary writes with matching single-frame reads.
//! Fragmented WebSocket messages and control frames other than Close are
//! not handled; MQTT's own length framing sits above this layer.

use crate::network::error::Error;
use crate::network::{Connection, Read as _, Write as _};
use base64ct::{Base64, Encoding};
use heapless::{String, Vec};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use sha1::{Digest, Sha1};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Bounded number of read polls while waiting for the upgrade response.
const HANDSHAKE_POLL_ATTEMPTS: usize = 200;

/// Bounded number of zero-byte reads tolerated inside one frame.
const SHORT_READ_RETRIES: usize = 4;

/// Largest payload a single outgoing frame can carry (16-bit extended
/// length; longer payloads fail rather than truncate).
const MAX_WRITE_PAYLOAD: usize = u16::MAX as usize;

const RESPONSE_CAPACITY: usize = 512;

/// Compute the `Sec-WebSocket-Accept` value for a handshake key.
pub fn accept_key(key: &str) -> String<28> {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    let digest = hasher.finalize();
    let mut encoded = [0u8; 28];
    let text = Base64::encode(digest.as_slice(), &mut encoded).unwrap_or("");
    String::try_from(text).unwrap_or_default()
}

/// WebSocket framing state for one established connection.
#[derive(Debug)]
pub struct WsFraming {
    rng: SmallRng,
}

impl WsFraming {
    /// Create framing state; `seed` feeds the mask/nonce generator.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Perform the client upgrade handshake on a freshly connected socket.
    ///
    /// Sends the upgrade request, then polls the socket a bounded number of
    /// times for the response. Anything other than a `101` response whose
    /// `Sec-WebSocket-Accept` matches the computed key fails the handshake.
    pub fn handshake<C: Connection>(
        &mut self,
        socket: &mut C,
        host: &str,
        path: &str,
    ) -> Result<(), Error> {
        let mut nonce = [0u8; 16];
        self.rng.fill_bytes(&mut nonce);
        let mut key_buf = [0u8; 24];
        let key = Base64::encode(&nonce, &mut key_buf).map_err(|_| Error::HandshakeFailed)?;
        let expected = accept_key(key);

        let mut request: Vec<u8, RESPONSE_CAPACITY> = Vec::new();
        for part in [
            "GET ",
            path,
            " HTTP/1.1\r\nHost: ",
            host,
            "\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: ",
            key,
            "\r\nSec-WebSocket-Protocol: mqtt\r\n\r\n",
        ] {
            request
                .extend_from_slice(part.as_bytes())
                .map_err(|_| Error::BufferOverflow)?;
        }
        write_all(socket, &request)?;
        socket.flush().map_err(|_| Error::WriteError)?;

        let mut response = [0u8; RESPONSE_CAPACITY];
        let mut filled = 0;
        for _ in 0..HANDSHAKE_POLL_ATTEMPTS {
            if filled == response.len() {
                break;
            }
            let n = socket
                .read(&mut response[filled..])
                .map_err(|_| Error::ReadError)?;
            filled += n;
            if n > 0 && response[..filled].windows(4).any(|w| w == b"\r\n\r\n") {
                return check_upgrade_response(&response[..filled], &expected);
            }
        }
        Err(Error::HandshakeFailed)
    }

    /// Wrap `payload` in one masked binary frame and write it.
    ///
    /// The header goes out first, then the masked payload in fixed-size
    /// chunks, so frames up to the 16-bit length limit never need a
    /// frame-sized staging buffer.
    pub fn write<C: Connection>(&mut self, socket: &mut C, payload: &[u8]) -> Result<usize, Error> {
        if payload.len() > MAX_WRITE_PAYLOAD {
            return Err(Error::BufferOverflow);
        }

        let mask = self.rng.next_u32().to_be_bytes();
        let mut header: Vec<u8, 8> = Vec::new();
        let _ = header.push(0x82); // FIN + binary
        if payload.len() <= 125 {
            let _ = header.push(0x80 | payload.len() as u8);
        } else {
            let _ = header.push(0x80 | 126);
            let _ = header.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        }
        let _ = header.extend_from_slice(&mask);
        write_all(socket, &header)?;

        let mut chunk = [0u8; 128];
        for (offset, piece) in payload.chunks(chunk.len()).enumerate() {
            for (i, byte) in piece.iter().enumerate() {
                chunk[i] = byte ^ mask[(offset * 128 + i) % 4];
            }
            write_all(socket, &chunk[..piece.len()])?;
        }
        Ok(payload.len())
    }

    /// Unwrap exactly one frame into `buf`, unmasking if masked.
    ///
    /// Returns `Ok(0)` when no frame has started arriving. A frame that
    /// stalls mid-way, an oversized 64-bit length, or a payload beyond the
    /// buffer capacity is an error the session treats as connection loss.
    pub fn read<C: Connection>(&mut self, socket: &mut C, buf: &mut [u8]) -> Result<usize, Error> {
        let mut header = [0u8; 2];
        if read_full(socket, &mut header, true)? == 0 {
            return Ok(0);
        }

        let opcode = header[0] & 0x0F;
        if opcode == 0x08 {
            return Err(Error::ConnectionClosed);
        }

        let masked = header[1] & 0x80 != 0;
        let payload_len = match header[1] & 0x7F {
            126 => {
                let mut ext = [0u8; 2];
                read_full(socket, &mut ext, false)?;
                u16::from_be_bytes(ext) as usize
            }
            127 => {
                let mut ext = [0u8; 8];
                read_full(socket, &mut ext, false)?;
                let value = u64::from_be_bytes(ext);
                if value >> 32 != 0 {
                    return Err(Error::BufferOverflow);
                }
                value as usize
            }
            n => n as usize,
        };
        if payload_len > buf.len() {
            return Err(Error::BufferOverflow);
        }

        let mut mask = [0u8; 4];
        if masked {
            read_full(socket, &mut mask, false)?;
        }

        read_full(socket, &mut buf[..payload_len], false)?;
        if masked {
            for (i, byte) in buf[..payload_len].iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }
        Ok(payload_len)
    }
}

fn check_upgrade_response(response: &[u8], expected: &str) -> Result<(), Error> {
    let text = core::str::from_utf8(response).map_err(|_| Error::HandshakeFailed)?;
    let mut lines = text.split("\r\n");
    let status = lines.next().unwrap_or("");
    if !status.starts_with("HTTP/1.1 101") {
        return Err(Error::HandshakeFailed);
    }
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("sec-websocket-accept") && value.trim() == expected {
                return Ok(());
            }
        }
    }
    Err(Error::HandshakeFailed)
}

fn write_all<C: Connection>(socket: &mut C, buf: &[u8]) -> Result<(), Error> {
    let written = socket.write(buf).map_err(|_| Error::WriteError)?;
    if written != buf.len() {
        return Err(Error::WriteError);
    }
    Ok(())
}

/// Fill `buf` completely, tolerating a bounded number of empty polls.
///
/// With `empty_ok`, a connection with no data at all returns 0 instead of
/// an error; once the first byte of a frame has arrived the remainder must
/// follow promptly.
fn read_full<C: Connection>(socket: &mut C, buf: &mut [u8], empty_ok: bool) -> Result<usize, Error> {
    let mut got = 0;
    let mut idle = 0;
    while got < buf.len() {
        match socket.read(&mut buf[got..]) {
            Ok(0) => {
                if got == 0 && empty_ok {
                    return Ok(0);
                }
                idle += 1;
                if idle > SHORT_READ_RETRIES {
                    return Err(Error::ReadError);
                }
            }
            Ok(n) => {
                got += n;
                idle = 0;
            }
            Err(_) => return Err(Error::ReadError),
        }
    }
    Ok(got)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Close, Read, Write};

    /// Echoes written bytes back to the reader.
    struct Loopback {
        data: Vec<u8, 4096>,
    }

    impl Loopback {
        fn new() -> Self {
            Self { data: Vec::new() }
        }
    }

    impl Read for Loopback {
        type Error = Error;
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            let rest: Vec<u8, 4096> = Vec::from_slice(&self.data[n..]).unwrap();
            self.data = rest;
            Ok(n)
        }
    }

    impl Write for Loopback {
        type Error = Error;
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.data
                .extend_from_slice(buf)
                .map_err(|_| Error::WriteError)?;
            Ok(buf.len())
        }
        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    impl Close for Loopback {
        type Error = Error;
        fn close(self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    impl Connection for Loopback {}

    #[test]
    fn accept_key_matches_rfc6455_example() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(accept_key(key).as_str(), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn frame_round_trip_small_payload() {
        let mut framing = WsFraming::new(1);
        let mut loopback = Loopback::new();
        framing.write(&mut loopback, b"hello mqtt").unwrap();

        let mut buf = [0u8; 64];
        let n = framing.read(&mut loopback, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello mqtt");
    }

    #[test]
    fn frame_round_trip_extended_length() {
        let mut framing = WsFraming::new(2);
        let mut loopback = Loopback::new();
        let payload: [u8; 300] = core::array::from_fn(|i| i as u8);
        framing.write(&mut loopback, &payload).unwrap();

        let mut buf = [0u8; 512];
        let n = framing.read(&mut loopback, &mut buf).unwrap();
        assert_eq!(&buf[..n], &payload[..]);
    }

    #[test]
    fn write_refuses_payloads_past_16_bit_length() {
        let mut framing = WsFraming::new(3);
        let mut loopback = Loopback::new();
        let oversized = [0u8; MAX_WRITE_PAYLOAD + 1];
        assert_eq!(
            framing.write(&mut loopback, &oversized),
            Err(Error::BufferOverflow)
        );
        // Nothing half-written.
        let mut buf = [0u8; 8];
        assert_eq!(framing.read(&mut loopback, &mut buf), Ok(0));
    }

    #[test]
    fn read_rejects_64_bit_lengths_past_32_bits() {
        let mut framing = WsFraming::new(4);
        let mut loopback = Loopback::new();
        let mut frame = [0u8; 10];
        frame[0] = 0x82;
        frame[1] = 127;
        frame[2..10].copy_from_slice(&(1u64 << 33).to_be_bytes());
        loopback.write(&frame).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(
            framing.read(&mut loopback, &mut buf),
            Err(Error::BufferOverflow)
        );
    }

    #[test]
    fn read_rejects_payload_beyond_buffer() {
        let mut framing = WsFraming::new(5);
        let mut loopback = Loopback::new();
        framing.write(&mut loopback, &[0u8; 200]).unwrap();

        let mut small = [0u8; 64];
        assert_eq!(
            framing.read(&mut loopback, &mut small),
            Err(Error::BufferOverflow)
        );
    }

    #[test]
    fn read_reports_close_frames_as_connection_loss() {
        let mut framing = WsFraming::new(6);
        let mut loopback = Loopback::new();
        loopback.write(&[0x88, 0x00]).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(
            framing.read(&mut loopback, &mut buf),
            Err(Error::ConnectionClosed)
        );
    }

    #[test]
    fn unmasked_server_frames_are_accepted() {
        let mut framing = WsFraming::new(7);
        let mut loopback = Loopback::new();
        loopback.write(&[0x82, 0x03]).unwrap();
        loopback.write(b"abc").unwrap();

        let mut buf = [0u8; 8];
        let n = framing.read(&mut loopback, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");
    }
}
