//! Per-session egress: HEVC encode → NAL inspection → RTP mux → UDP.
//!
//! One [`EgressPipeline`] exists per SetUp/Playing connection. It binds one
//! encoder instance and one [`RtpMuxer`] together for the lifetime of that
//! client and is destroyed (flushing both) on TEARDOWN or disconnect.
//!
//! ## Timing
//!
//! PTS is wall-clock anchored: the first submitted frame captures `T0`, and
//! every frame's PTS is `elapsed_since_T0 × 90_000 / 1_000_000`. Late frames
//! keep their true time; decoder jitter buffers absorb the gap. There is no
//! pacing at this layer — the producer sets cadence.
//!
//! ## Bootstrap
//!
//! The muxer cannot describe its stream until the encoder has produced
//! parameter sets. Construction therefore probes the encoder with one black
//! frame; if output appears immediately the muxer header is written from the
//! encoder extradata and the probe packet (a valid IDR) is emitted. Encoders
//! with internal lookahead produce nothing on the probe — for those the
//! header is written lazily when the first real packet arrives. Either way
//! no packet reaches the muxer before its parameter sets do.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use crate::encoder::{BgrFrame, EncodedPacket, EncoderConfig, EncoderFactory, HevcEncoder};
use crate::error::{Error, Result};
use crate::media::h265::{self, H265Packetizer};
use crate::media::rtcp;
use crate::protocol::sdp;
use crate::transport::UdpTransport;

/// File the per-session SDP is exported to, overwritten per pipeline.
pub const SDP_ARTIFACT_PATH: &str = "stream_sdp.txt";

/// RTP muxer bound to a single `ip:port` destination.
///
/// Owns the UDP socket and the H.265 packetizer. Refuses to write packets
/// until [`write_header`](Self::write_header) has recorded the encoder's
/// parameter sets, and clamps outgoing timestamps so the RTP clock never
/// runs backwards.
pub struct RtpMuxer {
    transport: UdpTransport,
    rtp_dest: SocketAddr,
    rtcp_dest: SocketAddr,
    packetizer: H265Packetizer,
    extradata: Option<Vec<u8>>,
    last_pts: i64,
}

impl RtpMuxer {
    /// Bind a send socket for the given destination. The RTCP destination
    /// is the adjacent port, per convention (RFC 3550 §11).
    pub fn new(dest_ip: IpAddr, rtp_port: u16) -> Result<Self> {
        let transport = UdpTransport::bind()?;
        Ok(Self {
            transport,
            rtp_dest: SocketAddr::new(dest_ip, rtp_port),
            rtcp_dest: SocketAddr::new(dest_ip, rtp_port.wrapping_add(1)),
            packetizer: H265Packetizer::with_random_ssrc(h265::PAYLOAD_TYPE),
            extradata: None,
            last_pts: 0,
        })
    }

    /// Local port of the send socket (`server_port` in the SETUP response).
    pub fn local_rtp_port(&self) -> u16 {
        self.transport.local_port()
    }

    pub fn header_written(&self) -> bool {
        self.extradata.is_some()
    }

    /// Record the encoder's parameter sets and export the session SDP.
    ///
    /// Must be called before the first [`write_packet`](Self::write_packet).
    pub fn write_header(&mut self, extradata: &[u8]) -> Result<()> {
        if extradata.is_empty() {
            return Err(Error::MuxerNotReady);
        }
        self.extradata = Some(extradata.to_vec());

        let sdp = sdp::session_sdp(
            "framecast",
            &self.rtp_dest.ip().to_string(),
            self.rtp_dest.port(),
        );
        // Debugging aid only; a failed export must not fail the session.
        if let Err(e) = std::fs::write(SDP_ARTIFACT_PATH, &sdp) {
            tracing::warn!(path = SDP_ARTIFACT_PATH, error = %e, "failed to export SDP");
        }

        tracing::debug!(
            dest = %self.rtp_dest,
            extradata_bytes = extradata.len(),
            "muxer header written"
        );
        Ok(())
    }

    /// Packetize one access unit and send it. Returns the number of RTP
    /// packets sent.
    pub fn write_packet(&mut self, packet: &EncodedPacket, key: bool) -> Result<usize> {
        if self.extradata.is_none() {
            return Err(Error::MuxerNotReady);
        }

        // The RTP clock never runs backwards within a session.
        let pts = packet.pts.max(self.last_pts);
        self.last_pts = pts;

        let rtp_packets = self.packetizer.packetize(&packet.data, pts as u32);
        for rtp in &rtp_packets {
            self.transport.send_to(rtp, self.rtp_dest)?;
        }

        tracing::trace!(
            dest = %self.rtp_dest,
            packets = rtp_packets.len(),
            pts,
            key,
            "access unit sent"
        );
        Ok(rtp_packets.len())
    }

    /// Close the muxer, notifying the receiver with an RTCP BYE.
    pub fn close(self) {
        let bye = rtcp::bye_packet(self.packetizer.ssrc(), Some("teardown"));
        if let Err(e) = self.transport.send_to(&bye, self.rtcp_dest) {
            tracing::warn!(dest = %self.rtcp_dest, error = %e, "failed to send RTCP BYE");
        } else {
            tracing::debug!(dest = %self.rtcp_dest, "RTCP BYE sent");
        }
    }
}

/// Per-session encode/mux pipeline (one per SetUp/Playing connection).
pub struct EgressPipeline {
    encoder: Box<dyn HevcEncoder>,
    muxer: RtpMuxer,
    width: u32,
    height: u32,
    start: Option<Instant>,
    dead: bool,
}

impl EgressPipeline {
    /// Construct a pipeline for a `width`×`height` stream aimed at
    /// `dest_ip:rtp_port`, probing the encoder so the muxer can describe
    /// the stream (see module docs).
    ///
    /// Failures here are fatal for the SETUP that requested the pipeline.
    pub fn new(
        width: u32,
        height: u32,
        dest_ip: IpAddr,
        rtp_port: u16,
        config: &EncoderConfig,
        factory: &EncoderFactory,
    ) -> Result<Self> {
        let encoder = factory(config)?;
        let muxer = RtpMuxer::new(dest_ip, rtp_port)?;

        let mut pipeline = Self {
            encoder,
            muxer,
            width,
            height,
            start: None,
            dead: false,
        };
        pipeline.probe()?;

        tracing::info!(
            width,
            height,
            dest = %SocketAddr::new(dest_ip, rtp_port),
            server_port = pipeline.muxer.local_rtp_port(),
            "egress pipeline created"
        );
        Ok(pipeline)
    }

    /// Encode one synthetic black frame to force parameter sets out of the
    /// encoder. The probe output is a valid IDR and is emitted, not dropped.
    fn probe(&mut self) -> Result<()> {
        let black = vec![0u8; self.width as usize * 3 * self.height as usize];
        let frame = BgrFrame::new(self.width, self.height, &black);

        let packets = self
            .encoder
            .encode(&frame, 0)
            .map_err(|e| Error::Codec(format!("probe encode failed: {}", e)))?;

        if let Some(extradata) = self.encoder.extradata() {
            let extradata = extradata.to_vec();
            self.muxer.write_header(&extradata)?;
        }
        for packet in &packets {
            self.emit(packet);
        }
        Ok(())
    }

    /// Port the SETUP response advertises as `server_port`.
    pub fn local_rtp_port(&self) -> u16 {
        self.muxer.local_rtp_port()
    }

    /// Whether a persistent codec failure has been observed. A dead
    /// pipeline's session is closed on the next offered frame.
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Submit one frame: validate, stamp with a wall-clock PTS, encode,
    /// and emit every access unit the encoder returns.
    pub fn handle_frame(&mut self, frame: &BgrFrame<'_>) -> Result<()> {
        if self.dead {
            return Err(Error::Codec("pipeline marked dead".to_string()));
        }
        if frame.width != self.width || frame.height != self.height {
            return Err(Error::Codec(format!(
                "frame {}x{} does not match pipeline {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        if frame.stride != frame.width as usize * 3 || frame.data.len() < frame.expected_len() {
            return Err(Error::Codec("frame is not packed continuous BGR24".to_string()));
        }

        let start = *self.start.get_or_insert_with(Instant::now);
        let pts = (start.elapsed().as_micros() as i64) * 90 / 1_000_000;

        match self.encoder.encode(frame, pts) {
            Ok(packets) => {
                for packet in &packets {
                    self.emit(packet);
                }
                Ok(())
            }
            Err(e) => {
                self.dead = true;
                tracing::error!(error = %e, "encoder failed, marking pipeline dead");
                Err(e)
            }
        }
    }

    /// Emit one encoded access unit: lazily complete the muxer bootstrap,
    /// derive the key-frame flag from the first NAL, write. Muxer errors
    /// are logged and swallowed — one lost packet must not kill a session.
    fn emit(&mut self, packet: &EncodedPacket) {
        if !self.muxer.header_written() {
            match self.encoder.extradata() {
                Some(extradata) => {
                    let extradata = extradata.to_vec();
                    if let Err(e) = self.muxer.write_header(&extradata) {
                        tracing::warn!(error = %e, "deferred muxer header write failed");
                        return;
                    }
                }
                None => {
                    tracing::warn!("dropping packet produced before parameter sets");
                    return;
                }
            }
        }

        let key = h265::frame_is_key(&packet.data);
        if let Err(e) = self.muxer.write_packet(packet, key) {
            tracing::warn!(error = %e, "dropping packet after muxer write failure");
        }
    }

    /// Tear the pipeline down in order: flush the encoder, emit the drained
    /// access units, then close the muxer (which sends the RTCP BYE).
    pub fn shutdown(mut self) {
        match self.encoder.flush() {
            Ok(packets) => {
                for packet in &packets {
                    self.emit(packet);
                }
            }
            Err(e) => tracing::warn!(error = %e, "encoder flush failed"),
        }
        self.muxer.close();
        tracing::debug!("egress pipeline shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::sync::Arc;
    use std::time::Duration;

    /// Minimal in-process encoder: VPS/SPS/PPS + IDR on GOP boundaries,
    /// TRAIL_R otherwise. Structurally valid Annex-B, never decodable.
    struct StubEncoder {
        frame_index: u64,
        gop_size: u64,
        extradata: Option<Vec<u8>>,
        fail_encode: bool,
    }

    impl StubEncoder {
        fn nal(nal_type: u8, payload: &[u8]) -> Vec<u8> {
            let mut out = vec![0, 0, 0, 1, nal_type << 1, 0x01];
            out.extend_from_slice(payload);
            out
        }
    }

    impl HevcEncoder for StubEncoder {
        fn encode(&mut self, _frame: &BgrFrame<'_>, pts: i64) -> Result<Vec<EncodedPacket>> {
            if self.fail_encode {
                return Err(Error::Codec("stub failure".to_string()));
            }

            let key = self.frame_index % self.gop_size == 0;
            self.frame_index += 1;

            let mut data = Vec::new();
            if key {
                let mut params = Vec::new();
                params.extend(Self::nal(h265::NAL_VPS, &[0xE0]));
                params.extend(Self::nal(h265::NAL_SPS, &[0xE1]));
                params.extend(Self::nal(h265::NAL_PPS, &[0xE2]));
                self.extradata = Some(params.clone());
                data.extend(params);
                data.extend(Self::nal(h265::NAL_IDR_W_RADL, &[0x10; 32]));
            } else {
                data.extend(Self::nal(h265::NAL_TRAIL_R, &[0x20; 16]));
            }
            Ok(vec![EncodedPacket { data, pts }])
        }

        fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
            Ok(Vec::new())
        }

        fn extradata(&self) -> Option<&[u8]> {
            self.extradata.as_deref()
        }
    }

    fn stub_factory() -> EncoderFactory {
        Arc::new(|config: &EncoderConfig| {
            Ok(Box::new(StubEncoder {
                frame_index: 0,
                gop_size: config.gop_size as u64,
                extradata: None,
                fail_encode: false,
            }) as Box<dyn HevcEncoder>)
        })
    }

    fn receiver() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    fn make_pipeline(port: u16) -> EgressPipeline {
        EgressPipeline::new(
            64,
            48,
            "127.0.0.1".parse().unwrap(),
            port,
            &EncoderConfig::for_stream(64, 48),
            &stub_factory(),
        )
        .unwrap()
    }

    #[test]
    fn probe_emits_keyframe_with_parameter_sets() {
        let (socket, port) = receiver();
        let _pipeline = make_pipeline(port);

        let mut buf = [0u8; 2048];
        let (len, _) = socket.recv_from(&mut buf).expect("probe datagram");
        let pkt = &buf[..len];

        assert_eq!(pkt[0] >> 6, 2, "RTP version 2");
        assert_eq!(pkt[1] & 0x7F, h265::PAYLOAD_TYPE);

        // Probe AU is small, so it travels as one aggregation packet
        // holding VPS, SPS, PPS and the IDR.
        let payload = &pkt[12..];
        assert_eq!((payload[0] >> 1) & 0x3F, 48);
        let mut types = Vec::new();
        let mut off = 2;
        while off < payload.len() {
            let nal_len = u16::from_be_bytes([payload[off], payload[off + 1]]) as usize;
            types.push((payload[off + 2] >> 1) & 0x3F);
            off += 2 + nal_len;
        }
        assert_eq!(
            types,
            vec![h265::NAL_VPS, h265::NAL_SPS, h265::NAL_PPS, h265::NAL_IDR_W_RADL]
        );
    }

    #[test]
    fn frames_produce_monotonic_timestamps() {
        let (socket, port) = receiver();
        let mut pipeline = make_pipeline(port);

        let data = vec![0u8; 64 * 48 * 3];
        let frame = BgrFrame::new(64, 48, &data);
        for _ in 0..3 {
            pipeline.handle_frame(&frame).unwrap();
        }

        let mut buf = [0u8; 2048];
        let mut last_ts = 0u32;
        for _ in 0..4 {
            let (len, _) = socket.recv_from(&mut buf).expect("rtp datagram");
            let ts = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
            assert!(ts >= last_ts, "timestamp went backwards");
            last_ts = ts;
            assert!(len <= h265::MAX_RTP_PACKET);
        }
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let (_socket, port) = receiver();
        let mut pipeline = make_pipeline(port);

        let data = vec![0u8; 32 * 32 * 3];
        let frame = BgrFrame::new(32, 32, &data);
        assert!(pipeline.handle_frame(&frame).is_err());
        assert!(!pipeline.is_dead(), "dimension mismatch is not a codec death");
    }

    #[test]
    fn rejects_short_frame_data() {
        let (_socket, port) = receiver();
        let mut pipeline = make_pipeline(port);

        let data = vec![0u8; 10];
        let frame = BgrFrame::new(64, 48, &data);
        assert!(pipeline.handle_frame(&frame).is_err());
    }

    #[test]
    fn encoder_failure_marks_pipeline_dead() {
        let (_socket, port) = receiver();
        let factory: EncoderFactory = Arc::new(|_| {
            Ok(Box::new(StubEncoder {
                frame_index: 1, // skip the keyframe so probe works...
                gop_size: 30,
                extradata: Some(vec![0, 0, 0, 1, h265::NAL_VPS << 1, 1]),
                fail_encode: false,
            }) as Box<dyn HevcEncoder>)
        });
        let mut pipeline = EgressPipeline::new(
            64,
            48,
            "127.0.0.1".parse().unwrap(),
            port,
            &EncoderConfig::for_stream(64, 48),
            &factory,
        )
        .unwrap();

        // ...then force the failure path by swapping in a failing encoder.
        pipeline.encoder = Box::new(StubEncoder {
            frame_index: 0,
            gop_size: 30,
            extradata: None,
            fail_encode: true,
        });

        let data = vec![0u8; 64 * 48 * 3];
        let frame = BgrFrame::new(64, 48, &data);
        assert!(pipeline.handle_frame(&frame).is_err());
        assert!(pipeline.is_dead());
        assert!(pipeline.handle_frame(&frame).is_err(), "dead pipeline rejects frames");
    }

    #[test]
    fn muxer_refuses_packets_before_header() {
        let (_socket, port) = receiver();
        let mut muxer = RtpMuxer::new("127.0.0.1".parse().unwrap(), port).unwrap();
        let packet = EncodedPacket {
            data: vec![0, 0, 0, 1, h265::NAL_TRAIL_R << 1, 1],
            pts: 0,
        };
        assert!(matches!(
            muxer.write_packet(&packet, false),
            Err(Error::MuxerNotReady)
        ));
    }

    #[test]
    fn muxer_clamps_backwards_pts() {
        let (socket, port) = receiver();
        let mut muxer = RtpMuxer::new("127.0.0.1".parse().unwrap(), port).unwrap();
        muxer.write_header(&[0, 0, 0, 1, h265::NAL_VPS << 1, 1]).unwrap();

        let make = |pts| EncodedPacket {
            data: vec![0, 0, 0, 1, h265::NAL_TRAIL_R << 1, 1, 0xAA],
            pts,
        };
        muxer.write_packet(&make(9000), false).unwrap();
        muxer.write_packet(&make(3000), false).unwrap();

        let mut buf = [0u8; 256];
        socket.recv_from(&mut buf).unwrap();
        let first_ts = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        socket.recv_from(&mut buf).unwrap();
        let second_ts = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        assert_eq!(first_ts, 9000);
        assert_eq!(second_ts, 9000, "late PTS clamped to the last emitted");
    }

    #[test]
    fn shutdown_sends_rtcp_bye_to_adjacent_port() {
        // Find an adjacent port pair: RTP on p, RTCP on p+1.
        let (rtp_socket, rtcp_socket) = (0..32)
            .find_map(|_| {
                let rtp = UdpSocket::bind("127.0.0.1:0").ok()?;
                let port = rtp.local_addr().ok()?.port();
                let rtcp = UdpSocket::bind(("127.0.0.1", port.checked_add(1)?)).ok()?;
                rtcp.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
                Some((rtp, rtcp))
            })
            .expect("adjacent UDP port pair");
        let rtp_port = rtp_socket.local_addr().unwrap().port();

        let pipeline = make_pipeline(rtp_port);
        pipeline.shutdown();

        let mut buf = [0u8; 256];
        let (len, _) = rtcp_socket.recv_from(&mut buf).expect("BYE datagram");
        assert!(len >= 8);
        assert_eq!(buf[0] >> 6, 2);
        assert_eq!(buf[1], crate::media::rtcp::PT_BYE);
    }
}
