//! MQTT 3.1.1 wire codec.
//!
//! Encoders produce complete packets (fixed header, remaining-length varint,
//! variable header, payload) in owned fixed-capacity buffers; decoders are
//! zero-copy views over a receive buffer. The codec is stateless — message
//! identifiers are assigned by the session, and framing above the byte
//! stream (TLS, WebSocket) is the transport layer's concern.

#![allow(missing_docs)]

use crate::network::error::Error;
use heapless::Vec;

/// Largest encoded packet the engine will produce or accept.
pub const MAX_PACKET_LEN: usize = 1024;

/// An encoded MQTT packet.
pub type Packet = Vec<u8, MAX_PACKET_LEN>;

// Protocol constants defined by the MQTT 3.1.1 specification
const PROTOCOL_NAME: &[u8] = b"MQTT";
const PROTOCOL_LEVEL: u8 = 4; // MQTT 3.1.1

/// CONNACK return code for an accepted connection.
pub const CONNECT_ACCEPTED: u8 = 0;

/// Quality of Service levels for MQTT messages.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QoS {
    /// At most once delivery.
    AtMostOnce = 0,
    /// At least once delivery.
    AtLeastOnce = 1,
    /// Exactly once delivery.
    ExactlyOnce = 2,
}

impl QoS {
    /// Map a wire-level QoS value; `3` is reserved and rejected.
    pub fn from_bits(bits: u8) -> Option<QoS> {
        match bits {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// MQTT control packet types.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PacketType {
    Connect,
    ConnAck,
    Publish,
    PubAck,
    PubRec,
    PubRel,
    PubComp,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    PingReq,
    PingResp,
    Disconnect,
}

impl PacketType {
    /// Decode the packet type from a fixed-header byte.
    pub fn from_header(byte: u8) -> Option<PacketType> {
        match byte >> 4 {
            1 => Some(PacketType::Connect),
            2 => Some(PacketType::ConnAck),
            3 => Some(PacketType::Publish),
            4 => Some(PacketType::PubAck),
            5 => Some(PacketType::PubRec),
            6 => Some(PacketType::PubRel),
            7 => Some(PacketType::PubComp),
            8 => Some(PacketType::Subscribe),
            9 => Some(PacketType::SubAck),
            10 => Some(PacketType::Unsubscribe),
            11 => Some(PacketType::UnsubAck),
            12 => Some(PacketType::PingReq),
            13 => Some(PacketType::PingResp),
            14 => Some(PacketType::Disconnect),
            _ => None,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PacketType {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", *self as u8)
    }
}

/// Last-will message registered at connect time.
#[derive(Debug, Clone)]
pub struct LastWill<'a> {
    /// Topic the broker publishes the will on.
    pub topic: &'a str,
    /// Will payload.
    pub message: &'a [u8],
    /// QoS the broker uses for the will publish.
    pub qos: QoS,
    /// Whether the will is retained.
    pub retain: bool,
}

/// Fields carried by a CONNECT packet.
#[derive(Debug, Clone)]
pub struct ConnectOptions<'a> {
    /// Client identifier; never empty.
    pub client_id: &'a str,
    /// Optional username.
    pub username: Option<&'a str>,
    /// Optional password; only sent when a username is present.
    pub password: Option<&'a str>,
    /// Keepalive interval in seconds.
    pub keep_alive_seconds: u16,
    /// Whether the broker should discard prior session state.
    pub clean_session: bool,
    /// Optional last-will registration.
    pub last_will: Option<LastWill<'a>>,
}

// ---- encoding ----

/// Encode a CONNECT packet.
pub fn connect(opts: &ConnectOptions) -> Result<Packet, Error> {
    let mut body: Packet = Vec::new();
    put(&mut body, &(PROTOCOL_NAME.len() as u16).to_be_bytes())?;
    put(&mut body, PROTOCOL_NAME)?;
    push(&mut body, PROTOCOL_LEVEL)?;

    let mut flags = 0u8;
    if opts.clean_session {
        flags |= 0x02;
    }
    if let Some(will) = &opts.last_will {
        flags |= 0x04 | ((will.qos as u8) << 3);
        if will.retain {
            flags |= 0x20;
        }
    }
    if opts.username.is_some() {
        flags |= 0x80;
        if opts.password.is_some() {
            flags |= 0x40;
        }
    }
    push(&mut body, flags)?;
    put(&mut body, &opts.keep_alive_seconds.to_be_bytes())?;

    put_field(&mut body, opts.client_id.as_bytes())?;
    if let Some(will) = &opts.last_will {
        put_field(&mut body, will.topic.as_bytes())?;
        put_field(&mut body, will.message)?;
    }
    if let Some(username) = opts.username {
        put_field(&mut body, username.as_bytes())?;
        if let Some(password) = opts.password {
            put_field(&mut body, password.as_bytes())?;
        }
    }

    assemble(0x10, &body)
}

/// Encode a PUBLISH packet. `message_id` is only written for QoS 1/2.
pub fn publish(
    topic: &str,
    payload: &[u8],
    qos: QoS,
    retain: bool,
    message_id: u16,
) -> Result<Packet, Error> {
    let mut body: Packet = Vec::new();
    put_field(&mut body, topic.as_bytes())?;
    if qos != QoS::AtMostOnce {
        put(&mut body, &message_id.to_be_bytes())?;
    }
    put(&mut body, payload)?;

    let mut header = 0x30 | ((qos as u8) << 1);
    if retain {
        header |= 0x01;
    }
    assemble(header, &body)
}

/// Encode a SUBSCRIBE packet with a single topic filter.
pub fn subscribe(topic: &str, qos: QoS, message_id: u16) -> Result<Packet, Error> {
    let mut body: Packet = Vec::new();
    put(&mut body, &message_id.to_be_bytes())?;
    put_field(&mut body, topic.as_bytes())?;
    push(&mut body, qos as u8)?;
    assemble(0x82, &body)
}

/// Encode an UNSUBSCRIBE packet with a single topic filter.
pub fn unsubscribe(topic: &str, message_id: u16) -> Result<Packet, Error> {
    let mut body: Packet = Vec::new();
    put(&mut body, &message_id.to_be_bytes())?;
    put_field(&mut body, topic.as_bytes())?;
    assemble(0xA2, &body)
}

/// Encode a PUBACK packet.
pub fn puback(message_id: u16) -> Result<Packet, Error> {
    ack(0x40, message_id)
}

/// Encode a PUBREC packet.
pub fn pubrec(message_id: u16) -> Result<Packet, Error> {
    ack(0x50, message_id)
}

/// Encode a PUBREL packet.
pub fn pubrel(message_id: u16) -> Result<Packet, Error> {
    ack(0x62, message_id)
}

/// Encode a PUBCOMP packet.
pub fn pubcomp(message_id: u16) -> Result<Packet, Error> {
    ack(0x70, message_id)
}

/// Encode a PINGREQ packet.
pub fn pingreq() -> Result<Packet, Error> {
    assemble(0xC0, &[])
}

/// Encode a PINGRESP packet.
pub fn pingresp() -> Result<Packet, Error> {
    assemble(0xD0, &[])
}

fn ack(header: u8, message_id: u16) -> Result<Packet, Error> {
    assemble(header, &message_id.to_be_bytes())
}

fn assemble(header: u8, body: &[u8]) -> Result<Packet, Error> {
    let mut packet: Packet = Vec::new();
    push(&mut packet, header)?;
    encode_remaining_length(&mut packet, body.len())?;
    put(&mut packet, body)?;
    Ok(packet)
}

/// Encode the remaining-length field: up to four bytes of seven value bits
/// each, high bit set while more bytes follow.
fn encode_remaining_length(buf: &mut Packet, mut len: usize) -> Result<(), Error> {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        push(buf, byte)?;
        if len == 0 {
            break;
        }
    }
    Ok(())
}

fn put(buf: &mut Packet, bytes: &[u8]) -> Result<(), Error> {
    buf.extend_from_slice(bytes).map_err(|_| Error::BufferOverflow)
}

fn push(buf: &mut Packet, byte: u8) -> Result<(), Error> {
    buf.push(byte).map_err(|_| Error::BufferOverflow)
}

fn put_field(buf: &mut Packet, field: &[u8]) -> Result<(), Error> {
    if field.len() > u16::MAX as usize {
        return Err(Error::BufferOverflow);
    }
    put(buf, &(field.len() as u16).to_be_bytes())?;
    put(buf, field)
}

// ---- decoding ----

/// Decode the control packet type of the message at the head of `buf`.
pub fn packet_type(buf: &[u8]) -> Option<PacketType> {
    buf.first().and_then(|b| PacketType::from_header(*b))
}

/// Decode the QoS bits of the message at the head of `buf`.
///
/// Only meaningful for PUBLISH; other packet types carry fixed flag bits.
pub fn qos(buf: &[u8]) -> u8 {
    buf.first().map(|b| (b >> 1) & 0x03).unwrap_or(0)
}

/// Decode the remaining-length varint. Returns `(value, varint_bytes)`, or
/// `None` when the varint is truncated or overlong.
fn remaining_length(buf: &[u8]) -> Option<(usize, usize)> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in buf.iter().skip(1).take(4).enumerate() {
        value += (*byte as usize & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        multiplier *= 128;
    }
    None
}

/// Total on-the-wire length of the message at the head of `buf`, including
/// the fixed header. `None` when not even the length field is complete.
pub fn total_length(buf: &[u8]) -> Option<usize> {
    remaining_length(buf).map(|(len, varint)| 1 + varint + len)
}

/// Decode the message identifier of the message at the head of `buf`.
///
/// Returns 0 for packet types that carry no identifier, which includes a
/// QoS 0 PUBLISH.
pub fn message_id(buf: &[u8]) -> u16 {
    let Some(kind) = packet_type(buf) else {
        return 0;
    };
    let Some((_, varint)) = remaining_length(buf) else {
        return 0;
    };
    let vh = 1 + varint;
    match kind {
        PacketType::Publish => {
            if qos(buf) == 0 {
                return 0;
            }
            let Some(topic_len) = field_len(buf, vh) else {
                return 0;
            };
            read_u16(buf, vh + 2 + topic_len)
        }
        PacketType::PubAck
        | PacketType::PubRec
        | PacketType::PubRel
        | PacketType::PubComp
        | PacketType::Subscribe
        | PacketType::SubAck
        | PacketType::Unsubscribe
        | PacketType::UnsubAck => read_u16(buf, vh),
        _ => 0,
    }
}

/// Decode the return code of a CONNACK at the head of `buf`.
pub fn connect_return_code(buf: &[u8]) -> Option<u8> {
    if packet_type(buf) != Some(PacketType::ConnAck) {
        return None;
    }
    let (_, varint) = remaining_length(buf)?;
    buf.get(1 + varint + 1).copied()
}

/// Topic of the PUBLISH at the head of `buf`, as raw bytes.
pub fn publish_topic(buf: &[u8]) -> Option<&[u8]> {
    if packet_type(buf) != Some(PacketType::Publish) {
        return None;
    }
    let (_, varint) = remaining_length(buf)?;
    let vh = 1 + varint;
    let topic_len = field_len(buf, vh)?;
    buf.get(vh + 2..vh + 2 + topic_len)
}

/// Payload bytes of the PUBLISH at the head of `buf`, clamped to the bytes
/// actually present — the caller compares against [`total_length`] to detect
/// a message continuing past the buffer.
pub fn publish_payload(buf: &[u8]) -> Option<&[u8]> {
    if packet_type(buf) != Some(PacketType::Publish) {
        return None;
    }
    let (remaining, varint) = remaining_length(buf)?;
    let vh = 1 + varint;
    let topic_len = field_len(buf, vh)?;
    let mut start = vh + 2 + topic_len;
    if qos(buf) != 0 {
        start += 2;
    }
    let end = (vh + remaining).min(buf.len());
    buf.get(start..end)
}

fn field_len(buf: &[u8], at: usize) -> Option<usize> {
    match (buf.get(at), buf.get(at + 1)) {
        (Some(hi), Some(lo)) => Some(u16::from_be_bytes([*hi, *lo]) as usize),
        _ => None,
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    match (buf.get(at), buf.get(at + 1)) {
        (Some(hi), Some(lo)) => u16::from_be_bytes([*hi, *lo]),
        _ => 0,
    }
}
