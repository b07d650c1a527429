//! POSLOYALTY frame codec for the POS TCP link.
//!
//! Every message on the wire is a 28-byte header followed by the payload
//! (XML, or plain text such as `Not Found`):
//!
//! ```text
//! +--------------+--------+------------+--------------+----------------+---------+
//! | signature    | action | dataLength | checkSumData | checkSumHeader | payload |
//! | 12 bytes     | u32 LE | u32 LE     | u32 LE       | u32 LE         | ...     |
//! +--------------+--------+------------+--------------+----------------+---------+
//! ```
//!
//! `signature` is the fixed `POSLOYALTY\0\0` literal, `checkSumData` is the
//! CRC32 of the payload and `checkSumHeader` the CRC32 of the first 24
//! header bytes. Some POS builds emit stray control bytes between frames;
//! the decoder scans forward to the next signature rather than failing the
//! connection.
//!
//! The payload length is validated against [`MAX_FRAME_SIZE`] before any
//! allocation happens, so a corrupt length field cannot exhaust memory.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::ProtocolError;

/// Fixed frame signature preceding every message.
pub const FRAME_SIGNATURE: &[u8; 12] = b"POSLOYALTY\x00\x00";

/// Action field value used by the loyalty dialogue.
pub const FRAME_ACTION: u32 = 1;

/// Header length: signature + action + length + two checksums.
pub const HEADER_LEN: usize = 28;

/// Upper bound on payload size; a basket never comes close.
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Codec implementing the POSLOYALTY framing for use with
/// [`tokio_util::codec::Framed`].
#[derive(Debug, Clone, Default)]
pub struct PosFrameCodec {
    _private: (),
}

impl PosFrameCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl Decoder for PosFrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        // Skip any inter-frame noise up to the next signature. Keeping the
        // last len(signature)-1 bytes covers a signature split across reads.
        if let Some(pos) = find_signature(src) {
            if pos > 0 {
                src.advance(pos);
            }
        } else {
            let keep = src.len().min(FRAME_SIGNATURE.len() - 1);
            let trim = src.len() - keep;
            if trim > 0 {
                src.advance(trim);
            }
            return Ok(None);
        }

        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let data_length =
            u32::from_le_bytes([src[16], src[17], src[18], src[19]]) as usize;
        // Validate the length before reserving or allocating anything.
        if data_length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: data_length,
                max: MAX_FRAME_SIZE,
            });
        }

        let total_len = HEADER_LEN + data_length;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        let checksum_data = u32::from_le_bytes([src[20], src[21], src[22], src[23]]);
        let checksum_header = u32::from_le_bytes([src[24], src[25], src[26], src[27]]);
        let expected_header = crc32fast::hash(&src[..24]);
        if checksum_header != expected_header {
            return Err(ProtocolError::ChecksumMismatch {
                field: "header",
                expected: expected_header,
                actual: checksum_header,
            });
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(data_length).freeze();

        let expected_data = crc32fast::hash(&payload);
        if checksum_data != expected_data {
            return Err(ProtocolError::ChecksumMismatch {
                field: "payload",
                expected: expected_data,
                actual: checksum_data,
            });
        }

        Ok(Some(payload))
    }
}

impl Encoder<Bytes> for PosFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if item.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: item.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(HEADER_LEN + item.len());

        let mut header = [0u8; 24];
        header[..12].copy_from_slice(FRAME_SIGNATURE);
        header[12..16].copy_from_slice(&FRAME_ACTION.to_le_bytes());
        #[allow(clippy::cast_possible_truncation)] // bounded by MAX_FRAME_SIZE
        let data_length = item.len() as u32;
        header[16..20].copy_from_slice(&data_length.to_le_bytes());
        header[20..24].copy_from_slice(&crc32fast::hash(&item).to_le_bytes());

        dst.put_slice(&header);
        dst.put_u32_le(crc32fast::hash(&header));
        dst.extend_from_slice(&item);
        Ok(())
    }
}

impl Encoder<Vec<u8>> for PosFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        self.encode(Bytes::from(item), dst)
    }
}

/// Position of the next frame signature in the buffer, if any.
fn find_signature(src: &BytesMut) -> Option<usize> {
    src.windows(FRAME_SIGNATURE.len())
        .position(|window| window == FRAME_SIGNATURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut codec = PosFrameCodec::new();
        let payload = Bytes::from_static(b"<GetRewardsRequest></GetRewardsRequest>");

        let mut buf = BytesMut::new();
        codec.encode(payload.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN + payload.len());
        assert_eq!(&buf[..12], FRAME_SIGNATURE);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn decoder_skips_leading_noise() {
        let mut codec = PosFrameCodec::new();
        let payload = Bytes::from_static(b"ok");

        let mut framed = BytesMut::new();
        codec.encode(payload.clone(), &mut framed).unwrap();

        let mut buf = BytesMut::from(&b"\x01\x02garbage"[..]);
        buf.extend_from_slice(&framed);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn partial_header_waits_for_more_data() {
        let mut codec = PosFrameCodec::new();
        let mut buf = BytesMut::from(&FRAME_SIGNATURE[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), FRAME_SIGNATURE.len());
    }

    #[test]
    fn partial_payload_waits_for_more_data() {
        let mut codec = PosFrameCodec::new();
        let mut framed = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"0123456789"), &mut framed)
            .unwrap();
        let mut buf = BytesMut::from(&framed[..framed.len() - 4]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn corrupt_payload_checksum_is_rejected() {
        let mut codec = PosFrameCodec::new();
        let mut framed = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"0123456789"), &mut framed)
            .unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0xFF;

        let err = codec.decode(&mut framed).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ChecksumMismatch { field: "payload", .. }
        ));
    }

    #[test]
    fn corrupt_header_checksum_is_rejected() {
        let mut codec = PosFrameCodec::new();
        let mut framed = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"0123456789"), &mut framed)
            .unwrap();
        framed[13] ^= 0xFF; // action field, covered by the header checksum

        let err = codec.decode(&mut framed).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ChecksumMismatch { field: "header", .. }
        ));
    }

    #[test]
    fn oversized_length_field_is_rejected_before_allocation() {
        let mut codec = PosFrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_slice(FRAME_SIGNATURE);
        buf.put_u32_le(FRAME_ACTION);
        buf.put_u32_le((MAX_FRAME_SIZE + 1) as u32);
        buf.put_u32_le(0);
        buf.put_u32_le(0);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[test]
    fn two_frames_in_one_buffer_decode_sequentially() {
        let mut codec = PosFrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"first"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"second"), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "first");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "second");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn empty_payload_frames_are_valid() {
        let mut codec = PosFrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::new(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(decoded.is_empty());
    }
}
