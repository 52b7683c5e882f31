//! Packet framing: validation and TCP chunk reassembly.
//!
//! TCP delivers arbitrary chunk boundaries, but the protocol's framing is
//! length-prefixed, so completeness is deterministic once enough bytes have
//! arrived. The assembler releases the largest buffered concatenation that
//! forms a syntactically complete blob and leaves message extraction to
//! `Packet::messages()`.

use tracing::warn;

use super::constants::{
    CANCEL_REQUEST_CODE, MIN_PACKET_LEN, PROTOCOL_VERSION_3, SSL_REQUEST_CODE,
};

/// Which side of the proxied connection a byte stream came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Origin {
    /// The server side
    Backend = 0x01,
    /// The client side
    Frontend = 0x02,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Backend => "backend",
            Origin::Frontend => "frontend",
        }
    }
}

/// A validated blob of one or more protocol frames, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub payload: Vec<u8>,
    pub origin: Origin,
}

fn be_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

/// True for a v3.0 StartupMessage: declared length covers the whole blob
/// and the protocol version field reads 196608.
pub fn is_startup_message(data: &[u8]) -> bool {
    if data.len() < 8 {
        return false;
    }
    if be_u32(&data[0..4]) as usize != data.len() {
        return false;
    }
    be_u32(&data[4..8]) == PROTOCOL_VERSION_3
}

/// True for an SSLRequest: exactly 8 bytes, declared length 8, code 80877103.
pub fn is_ssl_request(data: &[u8]) -> bool {
    if data.len() != 8 {
        return false;
    }
    if be_u32(&data[0..4]) != 8 {
        return false;
    }
    be_u32(&data[4..8]) == SSL_REQUEST_CODE
}

/// True for a CancelRequest: exactly 16 bytes, declared length 16,
/// code 80877102. The trailing pid/secret bytes are not inspected.
pub fn is_cancel_request(data: &[u8]) -> bool {
    if data.len() != 16 {
        return false;
    }
    if be_u32(&data[0..4]) != 16 {
        return false;
    }
    be_u32(&data[4..8]) == CANCEL_REQUEST_CODE
}

/// A lone byte on the wire, treated as a no-op packet.
pub fn is_noop(data: &[u8]) -> bool {
    data.len() == 1
}

/// True iff `data` is a syntactically complete packet blob: a no-op byte, a
/// startup-class message, or a concatenation of typed frames each of its
/// declared length with no trailing bytes.
///
/// Typed frames are `[type:u8][length:u32 BE]` where the length covers the
/// length field and payload but not the type byte; only lengths are walked,
/// never type identity.
pub fn is_valid_packet(data: &[u8]) -> bool {
    if is_noop(data) {
        return true;
    }
    if data.len() < MIN_PACKET_LEN {
        return false;
    }

    // Startup-class messages carry no type byte in the header
    if is_startup_message(data) || is_ssl_request(data) || is_cancel_request(data) {
        return true;
    }

    let mut offset = 0usize;
    loop {
        let remaining = data.len() - offset;
        if remaining < MIN_PACKET_LEN {
            return false;
        }
        let frame_len = be_u32(&data[offset + 1..offset + MIN_PACKET_LEN]) as usize + 1;
        // An exact match on the last frame validates every frame before it
        if frame_len == remaining {
            return true;
        }
        if frame_len > remaining {
            return false;
        }
        offset += frame_len;
    }
}

/// Buffers tee'd bytes for one direction and releases a packet whenever the
/// whole buffer forms a valid blob.
///
/// Bytes are never dropped: a stream that never validates keeps growing the
/// buffer while forwarding continues untouched. A one-time warning is logged
/// when the buffer passes `warn_bytes`.
#[derive(Debug)]
pub struct PacketAssembler {
    origin: Origin,
    buf: Vec<u8>,
    warn_bytes: usize,
    warned: bool,
}

impl PacketAssembler {
    pub fn new(origin: Origin, warn_bytes: usize) -> Self {
        Self {
            origin,
            buf: Vec::new(),
            warn_bytes,
            warned: false,
        }
    }

    /// Append a chunk; release the full buffer as a packet if it validates.
    pub fn append(&mut self, chunk: &[u8]) -> Option<Packet> {
        self.buf.extend_from_slice(chunk);
        if is_valid_packet(&self.buf) {
            self.warned = false;
            return Some(Packet {
                payload: std::mem::take(&mut self.buf),
                origin: self.origin,
            });
        }
        if !self.warned && self.buf.len() > self.warn_bytes {
            warn!(
                origin = self.origin.as_str(),
                buffered = self.buf.len(),
                "reassembly buffer exceeds warn threshold without forming a packet"
            );
            self.warned = true;
        }
        None
    }

    /// Bytes currently held back waiting for a complete packet
    #[allow(dead_code)]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_hex_stream(stream: &str) -> Vec<u8> {
        hex::decode(stream).expect("valid hex fixture")
    }

    #[test]
    fn test_ssl_request_with_valid_packet_returns_true() {
        assert!(is_ssl_request(&decode_hex_stream("0000000804d2162f")));
    }

    #[test]
    fn test_ssl_request_with_invalid_packet_returns_false() {
        let invalid = [
            "",
            // any 8 bytes that pass the length check
            "0000000f0f0f0f00",
            // declared length without the rest of the packet
            "00000070",
            // correct packet except for the request code
            "000000080fd2162f",
        ];
        for packet in invalid {
            assert!(!is_ssl_request(&decode_hex_stream(packet)), "{packet}");
        }
    }

    #[test]
    fn test_cancel_request_with_valid_packet_returns_true() {
        assert!(is_cancel_request(&decode_hex_stream(
            "0000001004d2162e0000044d00beef00"
        )));
    }

    #[test]
    fn test_cancel_request_with_invalid_packet_returns_false() {
        let invalid = [
            "",
            // correct code but 8 bytes short
            "0000001004d2162e",
            // correct length but SSLRequest code
            "0000001004d2162f0000044d00beef00",
        ];
        for packet in invalid {
            assert!(!is_cancel_request(&decode_hex_stream(packet)), "{packet}");
        }
    }

    const STARTUP_HEX: &str = "0000007000030000757365720079615f74657374696e6700646174616261736500706f73746772657300636c69656e745f656e636f64696e67005554463800446174655374796c650049534f0054696d655a6f6e65005554430065787472615f666c6f61745f64696769747300320000";

    #[test]
    fn test_startup_message_with_valid_packet_returns_true() {
        assert!(is_startup_message(&decode_hex_stream(STARTUP_HEX)));
    }

    #[test]
    fn test_startup_message_with_invalid_packet_returns_false() {
        let invalid = [
            "",
            "0000000f0f0f0f00",
            "00000070",
            // valid startup except for the protocol version field
            "0000007001030000757365720079615f74657374696e6700646174616261736500706f73746772657300636c69656e745f656e636f64696e67005554463800446174655374796c650049534f0054696d655a6f6e65005554430065787472615f666c6f61745f64696769747300320000",
        ];
        for packet in invalid {
            assert!(!is_startup_message(&decode_hex_stream(packet)), "{packet}");
        }
    }

    // Authentication + ParameterStatus sequence captured from a real backend
    const PARAM_STATUS_HEX: &str = "52000000080000000053000000166170706c69636174696f6e5f6e616d6500005300000019636c69656e745f656e636f64696e670055544638005300000017446174655374796c650049534f2c204d4459005300000019696e74656765725f6461746574696d6573006f6e00530000001b496e74657276616c5374796c6500706f73746772657300530000001569735f737570657275736572006f66660053000000197365727665725f656e636f64696e67005554463800530000001a7365727665725f76657273696f6e00392e362e313000530000002573657373696f6e5f617574686f72697a6174696f6e0079615f74657374696e670053000000237374616e646172645f636f6e666f726d696e675f737472696e6773006f6e00530000001154696d655a6f6e6500555443004b0000000c00000bbe3d082f545a0000000549";

    #[test]
    fn test_is_valid_packet_with_multi_frame_blob_returns_true() {
        assert!(is_valid_packet(&decode_hex_stream(PARAM_STATUS_HEX)));
    }

    #[test]
    fn test_is_valid_packet_accepts_noop_byte() {
        assert!(is_valid_packet(&[0x4e]));
    }

    #[test]
    fn test_is_valid_packet_rejects_incomplete_frames() {
        // declared length overshoots the available bytes
        assert!(!is_valid_packet(&decode_hex_stream("5300000016")));
        // first frame complete, second truncated
        assert!(!is_valid_packet(&decode_hex_stream(
            "52000000080000000053000000166170"
        )));
        // fewer than five bytes and not a no-op
        assert!(!is_valid_packet(&decode_hex_stream("5300")));
        assert!(!is_valid_packet(&[]));
    }

    #[test]
    fn test_assembler_releases_single_packet_after_final_chunk() {
        let chunks = [
            "52000000080000000053000000166170",
            "706c69636174696f6e5f6e616d6500005300000019636c69656e745f656e636f64696e670055544638005300000017446174655374796c650049534f2c204d4459005300000019696e74656765725f6461746574696d6573006f6e00530000001b496e74657276616c5374796c6500706f73746772657300530000001569735f737570657275736572006f66660053000000197365727665725f656e636f64696e67005554463800530000001a7365727665725f76657273696f6e00392e362e313000530000002573657373696f6e5f617574686f72697a6174696f6e0079615f74657374696e670053000000237374616e646172645f636f6e666f726d696e675f737472696e6773006f6e00530000001154696d655a6f6e6500555443004b0000000c00000bbe3d082f",
            "545a0000000549",
        ];
        let mut assembler = PacketAssembler::new(Origin::Backend, usize::MAX);

        let mut released = Vec::new();
        for chunk in &chunks {
            if let Some(packet) = assembler.append(&decode_hex_stream(chunk)) {
                released.push(packet);
            }
        }

        assert_eq!(released.len(), 1);
        assert_eq!(
            released[0].payload,
            decode_hex_stream(&chunks.concat()),
            "released payload must equal the chunk concatenation"
        );
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_assembler_releases_noop_byte_immediately() {
        let mut assembler = PacketAssembler::new(Origin::Frontend, usize::MAX);
        let packet = assembler.append(&[0x00]).expect("no-op released");
        assert_eq!(packet.payload, vec![0x00]);
        assert_eq!(packet.origin, Origin::Frontend);
    }

    #[test]
    fn test_assembler_retains_bytes_until_valid() {
        let mut assembler = PacketAssembler::new(Origin::Frontend, usize::MAX);
        assert!(assembler.append(&decode_hex_stream("5300000016")).is_none());
        assert_eq!(assembler.buffered(), 5);
        // completing the declared length releases everything buffered
        let rest = vec![0u8; 0x16 - 4];
        let packet = assembler.append(&rest).expect("completed frame released");
        assert_eq!(packet.payload.len(), 0x16 + 1);
        assert_eq!(assembler.buffered(), 0);
    }
}
