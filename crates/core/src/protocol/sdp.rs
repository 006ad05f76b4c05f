//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Two descriptions are produced:
//!
//! - [`describe_sdp`] — the body of every DESCRIBE response. A generic
//!   single-track H265 description with a placeholder connection address;
//!   the client reconciles the real address during SETUP. Parameter sets
//!   (VPS/SPS/PPS) are deliberately *not* embedded as `sprop-*` fields:
//!   the encoder prepends them to every IDR in-band, which keeps DESCRIBE
//!   independent of any running encoder.
//!
//! - [`session_sdp`] — the per-session description exported to
//!   `stream_sdp.txt` after the muxer header is written. A debugging aid
//!   for out-of-band clients (`ffplay -i stream_sdp.txt`), not part of the
//!   wire protocol.

use crate::media::h265;

/// Generate the generic SDP body returned by DESCRIBE.
///
/// Session/origin fields come from [`ServerConfig`](crate::ServerConfig) so
/// nothing user-visible is hardcoded.
pub fn describe_sdp(username: &str, session_id: &str, session_name: &str) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!("o={} {} 0 IN IP4 127.0.0.1", username, session_id));
    sdp.push(format!("s={}", session_name));
    // Placeholder address; the client learns the real one at SETUP time.
    sdp.push("c=IN IP4 0.0.0.0".to_string());
    sdp.push("t=0 0".to_string());
    sdp.push(format!("m=video 0 RTP/AVP {}", h265::PAYLOAD_TYPE));
    sdp.push(format!(
        "a=rtpmap:{} H265/{}",
        h265::PAYLOAD_TYPE,
        h265::CLOCK_RATE
    ));
    sdp.push(format!("a=control:trackID={}", h265::TRACK_ID));

    format!("{}\r\n", sdp.join("\r\n"))
}

/// Generate the per-session SDP written to the `stream_sdp.txt` artifact.
///
/// Unlike [`describe_sdp`], this names the actual RTP destination.
pub fn session_sdp(session_name: &str, dest_ip: &str, rtp_port: u16) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push("o=- 0 0 IN IP4 127.0.0.1".to_string());
    sdp.push(format!("s={}", session_name));
    sdp.push(format!("c=IN IP4 {}", dest_ip));
    sdp.push("t=0 0".to_string());
    sdp.push(format!("m=video {} RTP/AVP {}", rtp_port, h265::PAYLOAD_TYPE));
    sdp.push(format!(
        "a=rtpmap:{} H265/{}",
        h265::PAYLOAD_TYPE,
        h265::CLOCK_RATE
    ));

    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_is_generic_h265() {
        let sdp = describe_sdp("-", "0", "No Name");
        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("s=No Name\r\n"));
        assert!(
            sdp.contains("c=IN IP4 0.0.0.0\r\n"),
            "DESCRIBE must use the placeholder address"
        );
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H265/90000\r\n"));
        assert!(sdp.contains("a=control:trackID=0\r\n"));
        assert!(sdp.ends_with("\r\n"));
    }

    #[test]
    fn describe_omits_sprop_parameter_sets() {
        let sdp = describe_sdp("-", "0", "No Name");
        assert!(
            !sdp.contains("sprop"),
            "parameter sets travel in-band, never in the SDP"
        );
    }

    #[test]
    fn session_sdp_names_destination() {
        let sdp = session_sdp("No Name", "192.168.1.50", 18888);
        assert!(sdp.contains("c=IN IP4 192.168.1.50\r\n"));
        assert!(sdp.contains("m=video 18888 RTP/AVP 96\r\n"));
    }

    #[test]
    fn rtpmap_follows_media_line() {
        let sdp = describe_sdp("-", "0", "No Name");
        let m_idx = sdp.find("m=video").unwrap();
        let rtpmap_idx = sdp.find("a=rtpmap").unwrap();
        assert!(m_idx < rtpmap_idx, "media attributes must follow m=video");
    }
}
