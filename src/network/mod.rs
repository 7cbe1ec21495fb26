//! A network abstraction layer for embedded systems
//!
//! This module provides the set of traits the MQTT engine uses to talk to
//! the platform's socket stack. The engine never opens sockets itself: the
//! embedding program implements these traits for its TCP (or TLS-capable)
//! client and hands the engine a [`Connect`] factory, which the session uses
//! for the initial connect and every reconnect attempt.
//!
//! The traits are synchronous and non-blocking by convention: a [`Read`]
//! with no data available returns `Ok(0)`, never blocks. TLS is the
//! platform's concern — a TLS-capable socket implements the same traits and
//! the transport layer only adds the certificate-verification gate on top.

#![allow(missing_docs)]
#![deny(unsafe_code)]

/// Common error types for network operations
pub mod error;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Close, Connect, Connection, Read, Write};
}

// Core synchronous traits
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read data from the connection.
    ///
    /// Returns `Ok(0)` when no data is currently available; this is not an
    /// end-of-stream signal. Liveness is reported by
    /// [`Connection::is_connected`].
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous connection.
pub trait Connection: Read + Write + Close {
    /// Whether the underlying channel is still usable.
    ///
    /// The session engine polls this at the top of every tick; a `false`
    /// here is the only way an established connection is declared lost
    /// outside of a failed read or write.
    fn is_connected(&self) -> bool {
        true
    }
}

/// A synchronous connector (client).
///
/// Implementations open one transport-level channel per call. The session
/// engine keeps the connector for the lifetime of the session and calls it
/// again on every reconnect, so implementations must be reusable.
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Open a connection to `remote`, given as `host:port`.
    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error>;
}
