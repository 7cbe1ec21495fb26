//! Wire transports for the session engine.
//!
//! A [`Transport`] moves opaque MQTT bytes over a platform socket. The
//! variant is picked once, from the connection URI's scheme, when the
//! session is configured; after that the engine only sees `write`/`read`
//! and a liveness flag. TLS-capable schemes add a certificate-verification
//! gate at establish time (the record layer itself lives in the platform
//! socket); WebSocket schemes add the upgrade handshake and per-message
//! frame packing.

use crate::network::error::Error;
use crate::network::{Close, Connection, Read, Write};

pub mod websocket;

use websocket::WsFraming;

/// Transport scheme named by the connection URI.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Scheme {
    /// MQTT over plain TCP (`mqtt://`).
    Mqtt,
    /// MQTT over TLS (`mqtts://`).
    Mqtts,
    /// MQTT over plain WebSocket (`ws://`).
    Ws,
    /// MQTT over TLS WebSocket (`wss://`).
    Wss,
}

impl Scheme {
    /// Parse a URI scheme string.
    pub fn parse(s: &str) -> Option<Scheme> {
        match s {
            "mqtt" => Some(Scheme::Mqtt),
            "mqtts" => Some(Scheme::Mqtts),
            "ws" => Some(Scheme::Ws),
            "wss" => Some(Scheme::Wss),
            _ => None,
        }
    }

    /// Port used when the URI does not name one.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Mqtt => 1883,
            Scheme::Mqtts => 8883,
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }

    /// Whether the scheme runs over a TLS socket.
    pub fn is_tls(self) -> bool {
        matches!(self, Scheme::Mqtts | Scheme::Wss)
    }

    /// Whether the scheme frames messages as WebSocket frames.
    pub fn is_websocket(self) -> bool {
        matches!(self, Scheme::Ws | Scheme::Wss)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Scheme {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Scheme::Mqtt => defmt::write!(f, "mqtt"),
            Scheme::Mqtts => defmt::write!(f, "mqtts"),
            Scheme::Ws => defmt::write!(f, "ws"),
            Scheme::Wss => defmt::write!(f, "wss"),
        }
    }
}

/// Framing applied on top of the socket, fixed at establish time.
#[derive(Debug)]
enum Framing {
    /// Pass-through byte stream (plain TCP and TLS sockets).
    Stream,
    /// WebSocket binary frames.
    WebSocket(WsFraming),
}

/// An established transport: a connected socket plus its framing.
#[derive(Debug)]
pub struct Transport<C: Connection> {
    socket: C,
    framing: Framing,
}

impl<C: Connection> Transport<C> {
    /// Wrap a freshly connected socket for `scheme`.
    ///
    /// For TLS schemes the `verify` callback runs first and a rejection
    /// aborts the connection. For WebSocket schemes the upgrade handshake
    /// runs to completion before the transport is usable. On any failure
    /// the socket is closed and the caller treats the session as not
    /// connected.
    pub fn establish<V>(
        scheme: Scheme,
        mut socket: C,
        host: &str,
        path: &str,
        seed: u64,
        verify: V,
    ) -> Result<Self, Error>
    where
        V: FnOnce(&str) -> bool,
    {
        if scheme.is_tls() && !verify(host) {
            let _ = socket.close();
            return Err(Error::ConnectionRefused);
        }

        let framing = if scheme.is_websocket() {
            let mut ws = WsFraming::new(seed);
            if let Err(e) = ws.handshake(&mut socket, host, path) {
                let _ = socket.close();
                return Err(e);
            }
            Framing::WebSocket(ws)
        } else {
            Framing::Stream
        };

        Ok(Self { socket, framing })
    }

    /// Write one message's bytes.
    ///
    /// A short write is a failure, never a partial success: the session
    /// retries whole messages from the outbox, not byte offsets.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        match &mut self.framing {
            Framing::Stream => {
                let written = self.socket.write(buf).map_err(|_| Error::WriteError)?;
                if written != buf.len() {
                    return Err(Error::WriteError);
                }
                Ok(written)
            }
            Framing::WebSocket(ws) => ws.write(&mut self.socket, buf),
        }
    }

    /// Read whatever bytes are available; `Ok(0)` means none this tick.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match &mut self.framing {
            Framing::Stream => self.socket.read(buf).map_err(|_| Error::ReadError),
            Framing::WebSocket(ws) => ws.read(&mut self.socket, buf),
        }
    }

    /// Flush the underlying socket.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.socket.flush().map_err(|_| Error::WriteError)
    }

    /// Whether the underlying socket is still usable.
    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    /// Close and discard the transport.
    pub fn close(self) {
        let _ = self.socket.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_parsing_and_defaults() {
        assert_eq!(Scheme::parse("mqtt"), Some(Scheme::Mqtt));
        assert_eq!(Scheme::parse("mqtts"), Some(Scheme::Mqtts));
        assert_eq!(Scheme::parse("ws"), Some(Scheme::Ws));
        assert_eq!(Scheme::parse("wss"), Some(Scheme::Wss));
        assert_eq!(Scheme::parse("http"), None);

        assert!(Scheme::Mqtts.is_tls() && Scheme::Wss.is_tls());
        assert!(!Scheme::Mqtt.is_tls() && !Scheme::Ws.is_tls());
        assert!(Scheme::Ws.is_websocket() && Scheme::Wss.is_websocket());
        assert!(!Scheme::Mqtt.is_websocket());
    }
}
