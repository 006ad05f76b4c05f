//! H.265 (HEVC) RTP packetizer — RFC 7798.
//!
//! Key differences from the H.264 payload format (RFC 6184):
//!
//! - **2-byte NAL unit header**. The NAL type lives in bits 1..6 of the
//!   first byte: `(b >> 1) & 0x3F`.
//! - **Aggregation packets** (type 48) carry several small NAL units —
//!   VPS/SPS/PPS plus the IDR they precede fit in one datagram, so a
//!   receiver can decode a keyframe from a single packet.
//! - **FU packets** (type 49) fragment NAL units that exceed the packet
//!   size cap: 2-byte PayloadHdr, then a 1-byte FU header with S/E bits
//!   and the 6-bit original NAL type.
//!
//! Packetization strategy: greedy — consecutive NAL units of an access
//! unit are aggregated while they fit under [`MAX_RTP_PACKET`], a lone NAL
//! goes out as a single-NAL packet, and an oversized NAL is fragmented.
//! The RTP marker is set on the last packet of each access unit.

use super::rtp::RtpHeader;

/// Dynamic RTP payload type used for the video track (RFC 3551 §6).
pub const PAYLOAD_TYPE: u8 = 96;

/// RTP clock rate for HEVC, fixed at 90 kHz (RFC 7798 §7.1).
pub const CLOCK_RATE: u32 = 90_000;

/// Track identifier advertised in the SDP `a=control` attribute.
pub const TRACK_ID: u8 = 0;

/// Upper bound on a whole RTP packet: Ethernet MTU 1500 minus IP and UDP
/// headers.
pub const MAX_RTP_PACKET: usize = 1472;

const RTP_HEADER_LEN: usize = 12;

/// NAL unit types (ITU-T H.265 §7.4.2.2).
pub const NAL_TRAIL_R: u8 = 1;
pub const NAL_IDR_W_RADL: u8 = 19;
pub const NAL_IDR_N_LP: u8 = 20;
pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;

/// RTP payload structure types (RFC 7798 §4.4).
const NAL_TYPE_AP: u8 = 48;
const NAL_TYPE_FU: u8 = 49;

/// NAL unit type from the first byte of a NAL unit header.
pub fn nal_unit_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| (b >> 1) & 0x3F)
}

/// Whether the type denotes an IDR slice (random access point).
pub fn is_idr(nal_type: u8) -> bool {
    nal_type == NAL_IDR_W_RADL || nal_type == NAL_IDR_N_LP
}

/// Whether an Annex-B frame should carry the key-frame flag: true iff the
/// type of its *first* NAL unit is IDR_W_RADL or IDR_N_LP.
pub fn frame_is_key(annexb: &[u8]) -> bool {
    // First NAL starts after a 3- or 4-byte start code.
    if annexb.len() < 5 {
        return false;
    }
    let off = if annexb[2] == 1 { 3 } else { 4 };
    is_idr((annexb[off] >> 1) & 0x3F)
}

/// Extract NAL units from an Annex-B bitstream as borrowed slices.
///
/// Handles both 4-byte (`00 00 00 01`) and 3-byte (`00 00 01`) start codes.
pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut nal_units = Vec::new();
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    for (idx, &(start, _)) in start_entries.iter().enumerate() {
        let end = if idx + 1 < start_entries.len() {
            let (next_start, next_sc_len) = start_entries[idx + 1];
            next_start - next_sc_len
        } else {
            data.len()
        };

        if start < end {
            nal_units.push(&data[start..end]);
        }
    }

    nal_units
}

/// H.265 RTP packetizer (RFC 7798).
///
/// Stateful per session: owns the RTP sequence/timestamp/SSRC via
/// [`RtpHeader`].
#[derive(Debug)]
pub struct H265Packetizer {
    header: RtpHeader,
    max_packet: usize,
}

impl H265Packetizer {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc),
            max_packet: MAX_RTP_PACKET,
        }
    }

    pub fn with_random_ssrc(pt: u8) -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(pt),
            max_packet: MAX_RTP_PACKET,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    /// Sequence number the next emitted packet will carry.
    pub fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    /// Packetize one Annex-B access unit into RTP packets, all stamped with
    /// the given 90 kHz timestamp. The marker bit is set on the last packet.
    pub fn packetize(&mut self, annexb: &[u8], timestamp: u32) -> Vec<Vec<u8>> {
        let nals = extract_nal_units(annexb);
        if nals.is_empty() {
            return Vec::new();
        }

        self.header.set_timestamp(timestamp);

        let mut packets = Vec::new();
        let mut i = 0usize;
        while i < nals.len() {
            let nal = nals[i];

            if RTP_HEADER_LEN + nal.len() > self.max_packet {
                let is_last_nal = i + 1 == nals.len();
                self.fragment_nal(nal, is_last_nal, &mut packets);
                i += 1;
                continue;
            }

            // Greedy: pull in following NAL units while the aggregate fits.
            let mut j = i + 1;
            let mut ap_size = RTP_HEADER_LEN + 2 + 2 + nal.len();
            while j < nals.len() {
                let entry = 2 + nals[j].len();
                if ap_size + entry > self.max_packet {
                    break;
                }
                ap_size += entry;
                j += 1;
            }

            let is_last = j == nals.len();
            if j - i >= 2 {
                packets.push(self.aggregation_packet(&nals[i..j], is_last));
            } else {
                packets.push(self.single_nal_packet(nal, is_last));
            }
            i = j;
        }

        tracing::trace!(
            nal_count = nals.len(),
            rtp_packets = packets.len(),
            frame_bytes = annexb.len(),
            seq = self.header.sequence(),
            ts = self.header.timestamp(),
            "access unit packetized"
        );

        packets
    }

    /// Single NAL unit packet (RFC 7798 §4.4.1): the payload is the NAL
    /// unit itself, 2-byte header included.
    fn single_nal_packet(&mut self, nal: &[u8], marker: bool) -> Vec<u8> {
        let hdr = self.header.write(marker);
        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + nal.len());
        packet.extend_from_slice(&hdr);
        packet.extend_from_slice(nal);
        packet
    }

    /// Aggregation packet (RFC 7798 §4.4.2): PayloadHdr with type 48, then
    /// each NAL unit prefixed by its 16-bit size.
    fn aggregation_packet(&mut self, nals: &[&[u8]], marker: bool) -> Vec<u8> {
        let hdr = self.header.write(marker);
        let total: usize = nals.iter().map(|n| 2 + n.len()).sum();

        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + 2 + total);
        packet.extend_from_slice(&hdr);
        packet.push((nals[0][0] & 0x81) | (NAL_TYPE_AP << 1));
        packet.push(if nals[0].len() >= 2 { nals[0][1] } else { 1 });
        for nal in nals {
            packet.extend_from_slice(&(nal.len() as u16).to_be_bytes());
            packet.extend_from_slice(nal);
        }
        packet
    }

    /// FU fragmentation (RFC 7798 §4.4.3) for NAL units over the cap.
    fn fragment_nal(&mut self, nal: &[u8], is_last_nal: bool, packets: &mut Vec<Vec<u8>>) {
        if nal.len() < 2 {
            return;
        }

        let nal_type = (nal[0] >> 1) & 0x3F;
        let payload_hdr = [(nal[0] & 0x81) | (NAL_TYPE_FU << 1), nal[1]];

        // PayloadHdr (2) + FU header (1) per fragment.
        let max_fragment = self.max_packet - RTP_HEADER_LEN - 3;
        let payload = &nal[2..];

        let mut offset = 0usize;
        let mut first = true;
        let mut fragments = 0usize;

        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let last_fragment = remaining <= max_fragment;
            let chunk = &payload[offset..offset + remaining.min(max_fragment)];

            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };
            let fu_header = start_bit | end_bit | nal_type;

            let marker = is_last_nal && last_fragment;
            let hdr = self.header.write(marker);

            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + 3 + chunk.len());
            packet.extend_from_slice(&hdr);
            packet.extend_from_slice(&payload_hdr);
            packet.push(fu_header);
            packet.extend_from_slice(chunk);
            packets.push(packet);

            offset += chunk.len();
            first = false;
            fragments += 1;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal.len(),
            fragments,
            "FU fragmented NAL unit"
        );
    }
}
