//! RTP/RTCP media packet construction.
//!
//! - [`rtp`] — generic 12-byte RTP header state (sequence, timestamp, SSRC).
//! - [`h265`] — the HEVC payload format (RFC 7798): Annex-B NAL extraction,
//!   single/aggregation/FU packetization, NAL type inspection.
//! - [`rtcp`] — BYE packet serialization for session teardown.

pub mod h265;
pub mod rtcp;
pub mod rtp;

pub use h265::H265Packetizer;
pub use rtp::RtpHeader;
