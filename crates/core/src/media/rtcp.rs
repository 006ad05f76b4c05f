//! RTCP BYE packet construction (RFC 3550 §6.6).
//!
//! The muxer sends a single BYE to the client's RTCP port when a session
//! tears down, so receivers can distinguish "stream ended" from "packets
//! lost". Only serialization is needed — the server never parses RTCP.

/// RTCP packet type for Goodbye (RFC 3550 §12.1).
pub const PT_BYE: u8 = 203;

/// Serialize an RTCP BYE packet for a single SSRC.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|    SC   |   PT=BYE=203  |             length            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     length    |  reason for leaving (opt)  ...                |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The length field counts 32-bit words minus one; the optional reason is
/// padded to a word boundary.
pub fn bye_packet(ssrc: u32, reason: Option<&str>) -> Vec<u8> {
    let mut packet = Vec::with_capacity(16);
    packet.push(2 << 6 | 1); // V=2, P=0, source count 1
    packet.push(PT_BYE);
    packet.extend_from_slice(&[0, 0]); // length, patched below
    packet.extend_from_slice(&ssrc.to_be_bytes());

    if let Some(reason) = reason {
        let text = reason.as_bytes();
        let text = &text[..text.len().min(255)];
        packet.push(text.len() as u8);
        packet.extend_from_slice(text);
        while packet.len() % 4 != 0 {
            packet.push(0);
        }
    }

    let words = (packet.len() / 4 - 1) as u16;
    packet[2..4].copy_from_slice(&words.to_be_bytes());
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_bye_layout() {
        let pkt = bye_packet(0x11223344, None);
        assert_eq!(pkt.len(), 8);
        assert_eq!(pkt[0] >> 6, 2, "version 2");
        assert_eq!(pkt[0] & 0x1F, 1, "one source");
        assert_eq!(pkt[1], PT_BYE);
        assert_eq!(u16::from_be_bytes([pkt[2], pkt[3]]), 1, "length words");
        assert_eq!(&pkt[4..8], &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn bye_with_reason_pads_to_word() {
        let pkt = bye_packet(1, Some("teardown"));
        assert_eq!(pkt.len() % 4, 0);
        assert_eq!(pkt[8] as usize, "teardown".len());
        assert_eq!(&pkt[9..17], b"teardown");
        let words = u16::from_be_bytes([pkt[2], pkt[3]]) as usize;
        assert_eq!((words + 1) * 4, pkt.len());
    }
}
