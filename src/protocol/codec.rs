//! OpenFlow message framing.

use byteorder::{BigEndian, ByteOrder};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::{OfMessage, HEADER_SIZE, OFP_VERSION};
use crate::error::{ProtocolError, Result};

/// Encode a message with the given transaction id.
pub fn encode_message(xid: u32, message: &OfMessage) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE);
    message.encode(xid, &mut buf)?;
    Ok(buf.to_vec())
}

/// Decode one complete message.
pub fn decode_message(data: &[u8]) -> Result<(u32, OfMessage)> {
    OfMessage::decode(data)
}

/// Tokio codec for an OpenFlow 1.0 TCP stream.
///
/// Items are `(xid, message)` pairs.
#[derive(Debug, Default)]
pub struct OpenFlowCodec;

impl OpenFlowCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for OpenFlowCodec {
    type Item = (u32, OfMessage);
    type Error = crate::Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        if src[0] != OFP_VERSION {
            return Err(ProtocolError::InvalidVersion {
                expected: OFP_VERSION,
                got: src[0],
            }
            .into());
        }

        let length = BigEndian::read_u16(&src[2..4]) as usize;
        if length < HEADER_SIZE {
            return Err(ProtocolError::MalformedHeader.into());
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        // Framing is intact past this point; a body that fails to decode becomes `Malformed`.
        let frame = src.split_to(length);
        let decoded = OfMessage::decode(&frame).unwrap_or_else(|e| {
            let xid = BigEndian::read_u32(&frame[4..8]);
            (
                xid,
                OfMessage::Malformed {
                    kind: frame[1],
                    reason: e.to_string(),
                },
            )
        });
        Ok(Some(decoded))
    }
}

impl Encoder<(u32, OfMessage)> for OpenFlowCodec {
    type Error = crate::Error;

    fn encode(
        &mut self,
        (xid, message): (u32, OfMessage),
        dst: &mut BytesMut,
    ) -> std::result::Result<(), Self::Error> {
        message.encode(xid, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Action, FlowMod, OfMatch};

    #[test]
    fn test_codec_waits_for_full_frame() {
        let mut codec = OpenFlowCodec::new();
        let bytes = encode_message(3, &OfMessage::EchoRequest(b"ping".to_vec())).unwrap();

        let mut buf = BytesMut::from(&bytes[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[5..]);
        let (xid, msg) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(xid, 3);
        assert_eq!(msg, OfMessage::EchoRequest(b"ping".to_vec()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_splits_back_to_back_messages() {
        let mut codec = OpenFlowCodec::new();
        let mut buf = BytesMut::new();
        codec.encode((1, OfMessage::Hello), &mut buf).unwrap();
        codec
            .encode(
                (2, OfMessage::FlowMod(FlowMod::add(OfMatch::any(), 1, vec![Action::flood()]))),
                &mut buf,
            )
            .unwrap();

        let (xid, first) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!((xid, first), (1, OfMessage::Hello));
        let (xid, second) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(xid, 2);
        assert!(matches!(second, OfMessage::FlowMod(_)));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_bad_body_does_not_poison_the_stream() {
        let mut codec = OpenFlowCodec::new();
        // PACKET_IN whose 2-byte body is shorter than the fixed part, then a HELLO.
        let mut buf = BytesMut::from(&[OFP_VERSION, 10, 0, 10, 0, 0, 0, 1, 0xaa, 0xbb][..]);
        codec.encode((2, OfMessage::Hello), &mut buf).unwrap();

        let (xid, first) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(xid, 1);
        assert!(matches!(first, OfMessage::Malformed { kind: 10, .. }));
        assert_eq!(first.name(), "malformed");

        let (xid, second) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!((xid, second), (2, OfMessage::Hello));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_rejects_bad_version() {
        let mut codec = OpenFlowCodec::new();
        let mut buf = BytesMut::from(&[0x04, 0, 0, 8, 0, 0, 0, 0][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_codec_rejects_short_length() {
        let mut codec = OpenFlowCodec::new();
        let mut buf = BytesMut::from(&[OFP_VERSION, 0, 0, 4, 0, 0, 0, 0][..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
