//! Common error types for network and protocol operations

/// A common error type for engine operations.
///
/// This enum defines a set of common errors that can occur when working with
/// the transport layer and the MQTT session engine. It is designed to be
/// simple and portable for `no_std` environments.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// An operation was attempted on a connection that is not open.
    NotOpen,
    /// An error occurred during a write operation.
    WriteError,
    /// An error occurred during a read operation.
    ReadError,
    /// A connection attempt was refused.
    ConnectionRefused,
    /// A timeout occurred.
    Timeout,
    /// The connection was closed.
    ConnectionClosed,
    /// An invalid address was provided.
    InvalidAddress,
    /// The connection URI names a scheme the transport layer does not support.
    UnsupportedScheme,
    /// A payload or field does not fit in its fixed-size buffer.
    BufferOverflow,
    /// The WebSocket upgrade handshake did not complete.
    HandshakeFailed,
    /// A protocol-specific error occurred.
    ProtocolError,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::NotOpen => defmt::write!(f, "NotOpen"),
            Error::WriteError => defmt::write!(f, "WriteError"),
            Error::ReadError => defmt::write!(f, "ReadError"),
            Error::ConnectionRefused => defmt::write!(f, "ConnectionRefused"),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::ConnectionClosed => defmt::write!(f, "ConnectionClosed"),
            Error::InvalidAddress => defmt::write!(f, "InvalidAddress"),
            Error::UnsupportedScheme => defmt::write!(f, "UnsupportedScheme"),
            Error::BufferOverflow => defmt::write!(f, "BufferOverflow"),
            Error::HandshakeFailed => defmt::write!(f, "HandshakeFailed"),
            Error::ProtocolError => defmt::write!(f, "ProtocolError"),
        }
    }
}
