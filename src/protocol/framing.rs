//! Length-delimited message framing
//!
//! Each packet is a 16-byte big-endian header followed by the payload:
//!
//! ```text
//! ------------------------------------
//! | Message Type | Length  | Payload |
//! ------------------------------------
//! |   8 bytes    | 8 bytes | N bytes |
//! ------------------------------------
//! ```
//!
//! Decoding never partially consumes: the header is peeked first, and
//! header plus body are committed in one step only once the full packet
//! is buffered. A failed decode leaves the accumulator untouched so the
//! caller can disconnect cleanly.

use bytes::{Buf, BufMut, Bytes, BytesMut};

#[allow(unused_imports)]
use super::{
    AudioFrame, LatencyReply, Message, TimeProbe, AUDIO_TAG, LATENCY_REPLY_TAG, TIME_PROBE_TAG,
};
use crate::error::ProtocolError;

/// Size of the `(type, length)` header
pub const HEADER_LEN: usize = 16;

/// Upper bound on payload length; anything larger is a corrupt header
pub const MAX_PAYLOAD_LEN: u64 = 16 * 1024 * 1024;

/// Encode a message into a single framed packet
pub fn encode_message(msg: &Message) -> Result<Bytes, ProtocolError> {
    let payload = match msg {
        Message::Audio(frame) => bincode::serialize(frame),
        Message::TimeProbe(probe) => bincode::serialize(probe),
        Message::LatencyReply(reply) => bincode::serialize(reply),
    }
    .map_err(|e| ProtocolError::Serialize(e.to_string()))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u64(msg.tag());
    buf.put_u64(payload.len() as u64);
    buf.extend_from_slice(&payload);

    Ok(buf.freeze())
}

/// Try to decode one message from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. On success the packet's
/// bytes are consumed from `buf`. A header-level error (unknown tag,
/// oversized length) consumes nothing; a malformed body consumes the whole
/// packet, leaving the stream at a frame boundary.
pub fn try_decode(buf: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[0..8]);
    let tag = u64::from_be_bytes(word);
    word.copy_from_slice(&buf[8..16]);
    let length = u64::from_be_bytes(word);

    match tag {
        AUDIO_TAG | TIME_PROBE_TAG | LATENCY_REPLY_TAG => {}
        unknown => return Err(ProtocolError::UnknownTag(unknown)),
    }

    if length > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::OversizedPayload(length));
    }

    let length = length as usize;
    if buf.len() < HEADER_LEN + length {
        return Ok(None);
    }

    buf.advance(HEADER_LEN);
    let body = buf.split_to(length);

    let malformed = |e: bincode::Error| ProtocolError::MalformedPayload {
        tag,
        reason: e.to_string(),
    };

    let msg = match tag {
        AUDIO_TAG => {
            let frame: AudioFrame = bincode::deserialize(&body).map_err(malformed)?;
            if frame.left.len() != frame.right.len() {
                return Err(ProtocolError::MalformedPayload {
                    tag,
                    reason: "channel arrays differ in length".into(),
                });
            }
            Message::Audio(frame)
        }
        TIME_PROBE_TAG => Message::TimeProbe(bincode::deserialize(&body).map_err(malformed)?),
        LATENCY_REPLY_TAG => Message::LatencyReply(bincode::deserialize(&body).map_err(malformed)?),
        _ => unreachable!("tag validated above"),
    };

    Ok(Some(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WireTime;

    fn probe() -> Message {
        Message::TimeProbe(TimeProbe {
            time: WireTime {
                seconds: 1_700_000_000,
                nanos: 123_456_789,
            },
        })
    }

    fn audio() -> Message {
        Message::Audio(AudioFrame::new(
            vec![0.25, -0.5, 1.0],
            vec![-0.25, 0.5, -1.0],
            WireTime {
                seconds: 1_700_000_001,
                nanos: 42,
            },
        ))
    }

    fn reply() -> Message {
        Message::LatencyReply(LatencyReply {
            latency_ns: 7_500_000,
            time: WireTime {
                seconds: 1_700_000_002,
                nanos: 999,
            },
        })
    }

    #[test]
    fn round_trip_every_variant() {
        for msg in [probe(), audio(), reply()] {
            let encoded = encode_message(&msg).unwrap();
            let mut buf = BytesMut::from(&encoded[..]);

            let decoded = try_decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, msg);
            assert!(buf.is_empty(), "no trailing bytes after a full packet");
        }
    }

    #[test]
    fn header_layout_is_big_endian() {
        let encoded = encode_message(&probe()).unwrap();

        assert_eq!(&encoded[0..8], &TIME_PROBE_TAG.to_be_bytes());
        let length = u64::from_be_bytes(encoded[8..16].try_into().unwrap());
        assert_eq!(length as usize, encoded.len() - HEADER_LEN);
    }

    #[test]
    fn two_concatenated_packets_decode_in_order() {
        let first = encode_message(&audio()).unwrap();
        let second = encode_message(&probe()).unwrap();

        let mut buf = BytesMut::with_capacity(first.len() + second.len());
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);

        assert_eq!(try_decode(&mut buf).unwrap().unwrap(), audio());
        assert_eq!(try_decode(&mut buf).unwrap().unwrap(), probe());
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_packet_waits_for_more_bytes() {
        let encoded = encode_message(&audio()).unwrap();

        // header alone, then header plus half the body
        for cut in [HEADER_LEN - 1, HEADER_LEN, encoded.len() - 1] {
            let mut buf = BytesMut::from(&encoded[..cut]);
            assert!(try_decode(&mut buf).unwrap().is_none());
            assert_eq!(buf.len(), cut, "incomplete packet must not be consumed");
        }
    }

    #[test]
    fn unknown_tag_errors_without_consuming() {
        let mut buf = BytesMut::new();
        buf.put_u64(0x99);
        buf.put_u64(4);
        buf.extend_from_slice(&[1, 2, 3, 4]);
        let before = buf.len();

        match try_decode(&mut buf) {
            Err(ProtocolError::UnknownTag(0x99)) => {}
            other => panic!("expected unknown tag error, got {:?}", other),
        }
        assert_eq!(buf.len(), before, "body must stay unconsumed");
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u64(AUDIO_TAG);
        buf.put_u64(MAX_PAYLOAD_LEN + 1);

        assert!(matches!(
            try_decode(&mut buf),
            Err(ProtocolError::OversizedPayload(_))
        ));
    }

    #[test]
    fn garbage_body_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u64(LATENCY_REPLY_TAG);
        buf.put_u64(3);
        buf.extend_from_slice(&[0xff, 0xff, 0xff]);

        assert!(matches!(
            try_decode(&mut buf),
            Err(ProtocolError::MalformedPayload { .. })
        ));
    }
}
