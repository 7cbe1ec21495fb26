//! MQTT session engine.
//!
//! A [`Session`] owns one logical broker connection: the transport, the
//! [`Outbox`] of unacknowledged outbound packets, the connection state
//! machine and the per-QoS acknowledgement bookkeeping. It is driven
//! cooperatively — the embedding program calls [`Session::handle`]
//! repeatedly from its super-loop, and every call performs at most one
//! bounded unit of work per concern:
//!
//! 1. reconnect, if disconnected and the backoff interval has elapsed;
//! 2. one transport read, dispatching every complete message it contained;
//! 3. a keepalive probe once half the keepalive interval has passed;
//! 4. one write: the oldest outbox entry not already handed to the
//!    transport;
//! 5. expiry and byte-ceiling pruning of the outbox.
//!
//! The engine never blocks in steady state. The only bounded waits are the
//! CONNECT/CONNACK exchange inside [`Session::connect`] and the WebSocket
//! upgrade inside the transport, both of which time out.
//!
//! Transport and protocol failures are not surfaced to the caller: the
//! engine tears the connection down and the next ticks reconnect on
//! backoff. Only configuration-time problems (bad URL, oversized fields)
//! come back as errors.

use crate::codec::{self, LastWill, MAX_PACKET_LEN, PacketType, QoS};
use crate::network::error::Error;
use crate::network::Connect;
use crate::outbox::{DEFAULT_MAX_QUEUE_BYTES, Outbox};
use crate::time::Clock;
use crate::transport::{Scheme, Transport};
use crate::url::{BrokerUrl, MAX_CLIENT_ID_LEN, MAX_CREDENTIAL_LEN, MAX_HOST_LEN, MAX_PATH_LEN};
use core::fmt::Write as _;
use heapless::{String, Vec};

pub mod events;

use events::EventHandler;

/// Keepalive used when the caller configures none.
pub const DEFAULT_KEEPALIVE_SECONDS: u16 = 120;

/// Minimum spacing between reconnect attempts.
pub const RECONNECT_BACKOFF_MS: u64 = 5_000;

/// Bound on the CONNECT/CONNACK exchange.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Outbox entries unacknowledged for longer than this are abandoned.
const OUTBOX_EXPIRY_MS: u64 = 60 * 60 * 1_000;

const MAX_TOPIC_LEN: usize = 256;
const MAX_WILL_MESSAGE_LEN: usize = 128;

/// Connection lifecycle states.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectionState {
    /// No live transport.
    Disconnected,
    /// Transport-level connect in progress.
    Connecting,
    /// CONNECT sent, waiting for the broker's CONNACK.
    AwaitingConnAck,
    /// CONNACK accepted; steady-state operation.
    Connected,
}

#[cfg(feature = "defmt")]
impl defmt::Format for ConnectionState {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ConnectionState::Disconnected => defmt::write!(f, "Disconnected"),
            ConnectionState::Connecting => defmt::write!(f, "Connecting"),
            ConnectionState::AwaitingConnAck => defmt::write!(f, "AwaitingConnAck"),
            ConnectionState::Connected => defmt::write!(f, "Connected"),
        }
    }
}

/// Session configuration passed to [`Session::begin`].
#[derive(Debug, Clone)]
pub struct SessionOptions<'a> {
    /// Keepalive interval in seconds; 0 selects the default.
    pub keep_alive_seconds: u16,
    /// Whether the broker should discard prior session state.
    pub clean_session: bool,
    /// Optional last-will registration.
    pub last_will: Option<LastWill<'a>>,
    /// Ceiling on the outbox's total encoded bytes.
    pub max_queue_bytes: usize,
}

impl Default for SessionOptions<'_> {
    fn default() -> Self {
        Self {
            keep_alive_seconds: DEFAULT_KEEPALIVE_SECONDS,
            clean_session: true,
            last_will: None,
            max_queue_bytes: DEFAULT_MAX_QUEUE_BYTES,
        }
    }
}

#[derive(Debug)]
struct StoredWill {
    topic: String<MAX_TOPIC_LEN>,
    message: Vec<u8, MAX_WILL_MESSAGE_LEN>,
    qos: QoS,
    retain: bool,
}

#[derive(Debug)]
struct SessionConfig {
    scheme: Scheme,
    host: String<MAX_HOST_LEN>,
    port: u16,
    path: String<MAX_PATH_LEN>,
    username: Option<String<MAX_CREDENTIAL_LEN>>,
    password: Option<String<MAX_CREDENTIAL_LEN>>,
    client_id: String<MAX_CLIENT_ID_LEN>,
    keep_alive_seconds: u16,
    clean_session: bool,
    will: Option<StoredWill>,
}

/// One logical connection to an MQTT broker.
///
/// Generic over the platform socket factory `F`, the event handler `H` and
/// the clock `K`. The session owns all three; nothing inside the engine is
/// shared or locked — an embedding that publishes from several contexts
/// must serialize its calls.
pub struct Session<F, H, K>
where
    F: Connect,
    H: EventHandler,
    K: Clock,
{
    connector: F,
    handler: H,
    clock: K,
    config: Option<SessionConfig>,
    state: ConnectionState,
    transport: Option<Transport<F::Connection>>,
    outbox: Outbox,
    max_queue_bytes: usize,
    next_message_id: u16,
    last_ping_ms: u64,
    last_attempt_ms: Option<u64>,
    in_buffer: [u8; MAX_PACKET_LEN],
}

impl<F, H, K> Session<F, H, K>
where
    F: Connect,
    H: EventHandler,
    K: Clock,
{
    /// Create an unconfigured session.
    pub fn new(connector: F, handler: H, clock: K) -> Self {
        Self {
            connector,
            handler,
            clock,
            config: None,
            state: ConnectionState::Disconnected,
            transport: None,
            outbox: Outbox::new(),
            max_queue_bytes: DEFAULT_MAX_QUEUE_BYTES,
            next_message_id: 0,
            last_ping_ms: 0,
            last_attempt_ms: None,
            in_buffer: [0; MAX_PACKET_LEN],
        }
    }

    /// Configure the session from a broker URL with default options.
    pub fn begin(&mut self, uri: &str) -> Result<(), Error> {
        self.begin_with(uri, SessionOptions::default())
    }

    /// Configure the session from a broker URL.
    ///
    /// Parses the URL, synthesizes a client id when the fragment carries
    /// none and clamps a zero keepalive to the default. No I/O happens
    /// here; call [`Session::connect`] or let [`Session::handle`] connect.
    pub fn begin_with(&mut self, uri: &str, options: SessionOptions) -> Result<(), Error> {
        let url = BrokerUrl::parse(uri)?;

        let client_id = match url.client_id {
            Some(id) => id,
            None => {
                let mut id: String<MAX_CLIENT_ID_LEN> = String::new();
                write!(id, "mqtt-{:08x}", self.clock.now_ms() as u32)
                    .map_err(|_| Error::BufferOverflow)?;
                id
            }
        };

        let will = match options.last_will {
            Some(will) => Some(StoredWill {
                topic: String::try_from(will.topic).map_err(|_| Error::BufferOverflow)?,
                message: Vec::from_slice(will.message).map_err(|_| Error::BufferOverflow)?,
                qos: will.qos,
                retain: will.retain,
            }),
            None => None,
        };

        let keep_alive_seconds = if options.keep_alive_seconds == 0 {
            DEFAULT_KEEPALIVE_SECONDS
        } else {
            options.keep_alive_seconds
        };

        self.config = Some(SessionConfig {
            scheme: url.scheme,
            host: url.host,
            port: url.port,
            path: url.path,
            username: url.username,
            password: url.password,
            client_id,
            keep_alive_seconds,
            clean_session: options.clean_session,
            will,
        });
        self.max_queue_bytes = options.max_queue_bytes;
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the session holds an accepted, live connection.
    pub fn connected(&self) -> bool {
        self.state == ConnectionState::Connected
            && self.transport.as_ref().is_some_and(|t| t.is_connected())
    }

    /// The client identifier in use, once configured.
    pub fn client_id(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.client_id.as_str())
    }

    /// Number of outbox entries awaiting delivery or acknowledgement.
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Connect now: open the transport and run the CONNECT/CONNACK
    /// exchange, bounded by [`CONNECT_TIMEOUT_MS`].
    ///
    /// Already connected is a no-op. Failures leave the session
    /// disconnected; [`Session::handle`] will retry on backoff.
    pub fn connect(&mut self) -> Result<(), Error> {
        if self.connected() {
            return Ok(());
        }
        if self.transport.is_some() {
            // A stale, dead transport from a lost connection.
            self.teardown();
        }
        let Some(config) = self.config.as_ref() else {
            return Err(Error::NotOpen);
        };

        let now = self.clock.now_ms();
        self.last_attempt_ms = Some(now);
        self.state = ConnectionState::Connecting;

        let mut remote: String<{ MAX_HOST_LEN + 6 }> = String::new();
        write!(remote, "{}:{}", config.host, config.port).map_err(|_| Error::BufferOverflow)?;

        let socket = match self.connector.connect(&remote) {
            Ok(socket) => socket,
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(Error::ConnectionRefused);
            }
        };

        let handler = &mut self.handler;
        let mut transport = match Transport::establish(
            config.scheme,
            socket,
            &config.host,
            &config.path,
            now,
            |host| handler.on_tls_verify(host),
        ) {
            Ok(transport) => transport,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        let connect_packet = codec::connect(&codec::ConnectOptions {
            client_id: &config.client_id,
            username: config.username.as_deref(),
            password: config.password.as_deref(),
            keep_alive_seconds: config.keep_alive_seconds,
            clean_session: config.clean_session,
            last_will: config.will.as_ref().map(|w| LastWill {
                topic: &w.topic,
                message: &w.message,
                qos: w.qos,
                retain: w.retain,
            }),
        })?;

        self.state = ConnectionState::AwaitingConnAck;
        if transport.write(&connect_packet).is_err() {
            transport.close();
            self.state = ConnectionState::Disconnected;
            return Err(Error::WriteError);
        }
        let _ = transport.flush();

        let deadline = self.clock.now_ms() + CONNECT_TIMEOUT_MS;
        let n = loop {
            match transport.read(&mut self.in_buffer) {
                Ok(0) => {
                    if self.clock.now_ms() > deadline {
                        transport.close();
                        self.state = ConnectionState::Disconnected;
                        return Err(Error::Timeout);
                    }
                }
                Ok(n) => break n,
                Err(_) => {
                    transport.close();
                    self.state = ConnectionState::Disconnected;
                    return Err(Error::ReadError);
                }
            }
        };

        let response = &self.in_buffer[..n];
        if codec::packet_type(response) != Some(PacketType::ConnAck) {
            transport.close();
            self.state = ConnectionState::Disconnected;
            return Err(Error::ProtocolError);
        }
        if codec::connect_return_code(response) != Some(codec::CONNECT_ACCEPTED) {
            transport.close();
            self.state = ConnectionState::Disconnected;
            return Err(Error::ConnectionRefused);
        }

        self.transport = Some(transport);
        self.state = ConnectionState::Connected;
        self.last_ping_ms = self.clock.now_ms();
        self.handler.on_connected();
        Ok(())
    }

    /// Drive one cooperative tick.
    pub fn handle(&mut self) {
        if self.config.is_none() {
            return;
        }

        if self.transport.as_ref().is_some_and(|t| !t.is_connected()) {
            self.teardown();
        }
        if self.transport.is_none() {
            let now = self.clock.now_ms();
            let due = match self.last_attempt_ms {
                None => true,
                Some(at) => now.saturating_sub(at) >= RECONNECT_BACKOFF_MS,
            };
            if due {
                let _ = self.connect();
            }
            if self.transport.is_none() {
                return;
            }
        }

        self.process_read();
        if self.transport.is_none() {
            return;
        }

        let now = self.clock.now_ms();
        let keepalive_ms = self
            .config
            .as_ref()
            .map(|c| c.keep_alive_seconds as u64 * 1_000)
            .unwrap_or(0);
        if keepalive_ms > 0 && now.saturating_sub(self.last_ping_ms) > keepalive_ms / 2 {
            self.last_ping_ms = now;
            if let Ok(ping) = codec::pingreq() {
                self.enqueue(&ping, true);
            }
        }

        self.dispatch_oldest();

        let now = self.clock.now_ms();
        self.outbox.delete_expired(now, OUTBOX_EXPIRY_MS);
        self.outbox.cleanup(self.max_queue_bytes);
    }

    /// Queue a publish. Returns the assigned message identifier (0 for
    /// QoS 0, which needs none).
    ///
    /// The packet goes out on a following tick; QoS 0 entries are dropped
    /// after the write, QoS 1/2 entries stay until their acknowledgement
    /// flow completes or the outbox expires them.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<u16, Error> {
        let message_id = if qos == QoS::AtMostOnce {
            0
        } else {
            self.next_id()
        };
        let packet = codec::publish(topic, payload, qos, retain, message_id)?;
        self.enqueue(&packet, qos == QoS::AtMostOnce);
        Ok(message_id)
    }

    /// Queue a subscribe for one topic filter. Returns the message
    /// identifier the eventual SUBACK will carry.
    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, Error> {
        let message_id = self.next_id();
        let packet = codec::subscribe(topic, qos, message_id)?;
        self.enqueue(&packet, false);
        Ok(message_id)
    }

    /// Queue an unsubscribe for one topic filter. Returns the message
    /// identifier the eventual UNSUBACK will carry.
    pub fn unsubscribe(&mut self, topic: &str) -> Result<u16, Error> {
        let message_id = self.next_id();
        let packet = codec::unsubscribe(topic, message_id)?;
        self.enqueue(&packet, false);
        Ok(message_id)
    }

    fn next_id(&mut self) -> u16 {
        self.next_message_id = self.next_message_id.wrapping_add(1);
        if self.next_message_id == 0 {
            self.next_message_id = 1;
        }
        self.next_message_id
    }

    /// Append an encoded packet to the outbox, deriving id and type from
    /// the bytes. Overflow is absorbed by the outbox's eviction policy.
    fn enqueue(&mut self, packet: &[u8], remove_on_sent: bool) {
        let Some(kind) = codec::packet_type(packet) else {
            return;
        };
        let message_id = codec::message_id(packet);
        let now = self.clock.now_ms();
        let _ = self
            .outbox
            .put(packet, message_id, kind, now, remove_on_sent);
    }

    fn teardown(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Hand the oldest not-yet-dispatched outbox entry to the transport.
    fn dispatch_oldest(&mut self) {
        let Some(index) = self.outbox.oldest_not_pending() else {
            return;
        };
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let Some(entry) = self.outbox.entry(index) else {
            return;
        };
        let remove_on_sent = entry.remove_on_sent();
        if transport.write(entry.payload()).is_err() {
            self.teardown();
            return;
        }
        self.outbox.mark_dispatched(index);
        if remove_on_sent {
            if let Some(transport) = self.transport.as_mut() {
                let _ = transport.flush();
            }
            self.outbox.remove_at(index);
        }
    }

    /// One transport read, then fold every complete message in the buffer
    /// into session state.
    fn process_read(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let n = match transport.read(&mut self.in_buffer) {
            Ok(0) => return,
            Ok(n) => n,
            Err(_) => {
                self.teardown();
                return;
            }
        };

        let mut pos = 0;
        while pos < n {
            match self.dispatch_message(pos, n) {
                Some(next) => pos = next,
                None => break,
            }
        }
    }

    /// Dispatch the message starting at `pos`; returns the offset of the
    /// next message, or `None` when the rest of the buffer is unusable.
    fn dispatch_message(&mut self, pos: usize, n: usize) -> Option<usize> {
        let buf = &self.in_buffer[pos..n];
        let kind = codec::packet_type(buf)?;
        let total = codec::total_length(buf)?;
        let message_id = codec::message_id(buf);
        let qos_bits = codec::qos(buf);

        match kind {
            PacketType::Publish => {
                return self.deliver_publish(pos, n, total, message_id, qos_bits);
            }
            PacketType::SubAck => {
                let matched = self
                    .outbox
                    .get(message_id)
                    .is_some_and(|e| e.kind() == PacketType::Subscribe);
                if matched {
                    self.outbox
                        .delete_by_id_and_kind(message_id, PacketType::Subscribe);
                    self.handler.on_subscribed(message_id);
                }
            }
            PacketType::UnsubAck => {
                let matched = self
                    .outbox
                    .get(message_id)
                    .is_some_and(|e| e.kind() == PacketType::Unsubscribe);
                if matched {
                    self.outbox
                        .delete_by_id_and_kind(message_id, PacketType::Unsubscribe);
                    self.handler.on_unsubscribed(message_id);
                }
            }
            PacketType::PubAck => {
                let matched = self
                    .outbox
                    .get(message_id)
                    .is_some_and(|e| e.kind() == PacketType::Publish);
                if matched {
                    self.outbox
                        .delete_by_id_and_kind(message_id, PacketType::Publish);
                    self.handler.on_published(message_id);
                }
            }
            PacketType::PubRec => {
                let matched = self
                    .outbox
                    .get(message_id)
                    .is_some_and(|e| e.kind() == PacketType::Publish);
                if matched {
                    self.outbox
                        .delete_by_id_and_kind(message_id, PacketType::Publish);
                    if let Ok(rel) = codec::pubrel(message_id) {
                        self.enqueue(&rel, false);
                    }
                }
            }
            PacketType::PubRel => {
                // Inbound QoS 2 replies are untracked; answer unconditionally.
                self.outbox
                    .delete_by_id_and_kind(message_id, PacketType::PubRec);
                if let Ok(comp) = codec::pubcomp(message_id) {
                    self.enqueue(&comp, true);
                }
            }
            PacketType::PubComp => {
                let matched = self
                    .outbox
                    .get(message_id)
                    .is_some_and(|e| e.kind() == PacketType::PubRel);
                if matched {
                    self.outbox
                        .delete_by_id_and_kind(message_id, PacketType::PubRel);
                    self.handler.on_published(message_id);
                }
            }
            PacketType::PingReq => {
                if let Ok(resp) = codec::pingresp() {
                    self.enqueue(&resp, true);
                }
            }
            PacketType::PingResp => {}
            _ => {}
        }

        Some(pos + total)
    }

    /// Deliver an inbound publish, reading continuation chunks when the
    /// message is longer than one buffer, then queue the QoS reply.
    fn deliver_publish(
        &mut self,
        pos: usize,
        n: usize,
        total: usize,
        message_id: u16,
        qos_bits: u8,
    ) -> Option<usize> {
        let available = n - pos;
        let topic: String<MAX_TOPIC_LEN> = {
            let buf = &self.in_buffer[pos..n];
            let raw = codec::publish_topic(buf)?;
            let text = core::str::from_utf8(raw).ok()?;
            String::try_from(text).ok()?
        };
        {
            let buf = &self.in_buffer[pos..n];
            let payload = codec::publish_payload(buf)?;
            self.handler.on_data(&topic, payload, false);
        }

        let next = if total <= available {
            pos + total
        } else {
            // The message continues past the buffer: read and deliver the
            // remainder as fragments within this tick.
            let mut received = available;
            while received < total {
                let Some(transport) = self.transport.as_mut() else {
                    break;
                };
                match transport.read(&mut self.in_buffer) {
                    Ok(0) => break,
                    Ok(r) => {
                        let take = r.min(total - received);
                        let Self {
                            handler, in_buffer, ..
                        } = self;
                        handler.on_data(&topic, &in_buffer[..take], true);
                        received += r;
                    }
                    Err(_) => {
                        self.teardown();
                        return None;
                    }
                }
            }
            n
        };

        match qos_bits {
            1 => {
                if let Ok(ack) = codec::puback(message_id) {
                    self.enqueue(&ack, true);
                }
            }
            2 => {
                if let Ok(rec) = codec::pubrec(message_id) {
                    self.enqueue(&rec, true);
                }
            }
            _ => {}
        }

        Some(next)
    }
}
