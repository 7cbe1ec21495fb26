//! Session event callbacks.

/// Callbacks the session engine fires as the connection and message flows
/// progress.
///
/// Every method has a no-op default, so embedders implement only what they
/// care about. Callbacks run inside `connect()`/`handle()` on the caller's
/// context; they must not call back into the session.
///
/// There is deliberately no disconnected callback: connectivity loss is
/// observable only as the absence of further events while the engine's
/// reconnect loop runs.
pub trait EventHandler {
    /// The CONNECT/CONNACK exchange completed and the session is live.
    fn on_connected(&mut self) {}

    /// A SUBSCRIBE was confirmed by a matching SUBACK.
    fn on_subscribed(&mut self, message_id: u16) {
        let _ = message_id;
    }

    /// An UNSUBSCRIBE was confirmed by a matching UNSUBACK.
    fn on_unsubscribed(&mut self, message_id: u16) {
        let _ = message_id;
    }

    /// A QoS 1/2 publish completed its acknowledgement flow.
    fn on_published(&mut self, message_id: u16) {
        let _ = message_id;
    }

    /// An inbound publish arrived.
    ///
    /// A message larger than the engine's receive buffer is delivered in
    /// pieces: the first carries the topic and `is_fragment = false`,
    /// continuations repeat the topic with `is_fragment = true`.
    fn on_data(&mut self, topic: &str, payload: &[u8], is_fragment: bool) {
        let _ = (topic, payload, is_fragment);
    }

    /// Gate a TLS-scheme connection on certificate verification.
    ///
    /// Called after the socket connects and before any bytes move; return
    /// `false` to abort. The default accepts every host.
    fn on_tls_verify(&mut self, host: &str) -> bool {
        let _ = host;
        true
    }
}

/// An [`EventHandler`] that ignores every event.
#[derive(Debug, Default)]
pub struct NullHandler;

impl EventHandler for NullHandler {}
