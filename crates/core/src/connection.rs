//! Per-client RTSP connection: framing, state machine, method handlers.
//!
//! One [`Connection`] exists per accepted TCP socket. The service loop
//! accumulates bytes until a full `\r\n\r\n`-terminated request is present,
//! parses it, and dispatches to the method handlers, which drive the
//! session lifecycle:
//!
//! ```text
//!   Fresh ──OPTIONS──> Fresh
//!         ──DESCRIBE─> Described
//!   Described ──SETUP──> SetUp     (creates the egress pipeline)
//!   SetUp     ──PLAY───> Playing
//!   Playing   ──TEARDOWN─> TornDown (destroys pipeline, closes socket)
//!   any       ──socket end/error──> TornDown
//! ```
//!
//! State is advisory — OPTIONS and DESCRIBE may be re-issued at any point.
//! The hard gates: SETUP must precede PLAY, PLAY requires a live pipeline,
//! TEARDOWN is terminal.
//!
//! All mutable session state, the egress pipeline included, sits behind one
//! mutex. The service thread (SETUP/TEARDOWN) and producer threads
//! (`offer_frame`) contend on it, which is exactly what makes a TEARDOWN
//! racing a publish safe.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::egress::EgressPipeline;
use crate::encoder::{BgrFrame, EncoderConfig};
use crate::protocol::{PUBLIC_METHODS, RtspRequest, RtspResponse, sdp};
use crate::registry::StreamRegistry;
use crate::server::ServerConfig;

/// Cap on bytes buffered while waiting for a request terminator. A header
/// block nowhere near this size is not a legitimate client.
const MAX_PENDING_BYTES: usize = 64 * 1024;

const REQUEST_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Session token length issued at SETUP (opaque alphanumeric).
const SESSION_TOKEN_LEN: usize = 8;

/// Protocol phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fresh,
    Described,
    SetUp,
    Playing,
    TornDown,
}

/// Parsed client transport parameters from the SETUP `Transport` header.
///
/// Only `RTP/AVP;unicast;client_port=RTP-RTCP` is accepted; multicast and
/// interleaved transports are rejected at parse time.
#[derive(Debug, Clone)]
pub struct TransportHeader {
    pub client_rtp_port: u16,
    pub client_rtcp_port: u16,
}

impl TransportHeader {
    /// Parse a `Transport` header value (RFC 2326 §12.39). Returns `None`
    /// for non-unicast transports or a missing/garbled `client_port`.
    pub fn parse(header: &str) -> Option<Self> {
        let mut profile_ok = false;
        let mut unicast = false;
        let mut ports = None;

        for part in header.split(';') {
            let part = part.trim();
            if part == "RTP/AVP" || part.starts_with("RTP/AVP/UDP") {
                profile_ok = true;
            } else if part.eq_ignore_ascii_case("unicast") {
                unicast = true;
            } else if part.eq_ignore_ascii_case("multicast") {
                return None;
            } else if let Some(spec) = part.strip_prefix("client_port=") {
                let (rtp, rtcp) = spec.split_once('-')?;
                ports = Some((rtp.parse().ok()?, rtcp.parse().ok()?));
            }
        }

        if !profile_ok || !unicast {
            return None;
        }
        ports.map(|(client_rtp_port, client_rtcp_port)| TransportHeader {
            client_rtp_port,
            client_rtcp_port,
        })
    }
}

/// Mutable session state, all under one lock (see module docs).
struct ConnState {
    phase: Phase,
    session: Option<String>,
    client_rtp_port: u16,
    stream_path: String,
    pipeline: Option<EgressPipeline>,
}

/// A single RTSP client connection.
pub struct Connection {
    peer: SocketAddr,
    writer: Mutex<TcpStream>,
    state: Mutex<ConnState>,
    config: Arc<ServerConfig>,
    registry: Arc<StreamRegistry>,
}

impl Connection {
    pub fn new(
        peer: SocketAddr,
        writer: TcpStream,
        config: Arc<ServerConfig>,
        registry: Arc<StreamRegistry>,
    ) -> Self {
        Self {
            peer,
            writer: Mutex::new(writer),
            state: Mutex::new(ConnState {
                phase: Phase::Fresh,
                session: None,
                client_rtp_port: 0,
                stream_path: String::new(),
                pipeline: None,
            }),
            config,
            registry,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn session_token(&self) -> Option<String> {
        self.state.lock().session.clone()
    }

    pub fn stream_path(&self) -> String {
        self.state.lock().stream_path.clone()
    }

    pub fn client_rtp_port(&self) -> u16 {
        self.state.lock().client_rtp_port
    }

    /// Request/response loop for this connection's socket. Returns the
    /// reason the loop ended.
    pub fn service(&self, mut stream: TcpStream, running: &AtomicBool) -> &'static str {
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];

        while running.load(Ordering::SeqCst) {
            let n = match stream.read(&mut chunk) {
                Ok(0) => return "connection closed by client",
                Ok(n) => n,
                Err(_) => return "read error",
            };
            pending.extend_from_slice(&chunk[..n]);
            if pending.len() > MAX_PENDING_BYTES {
                return "request buffer overflow";
            }

            // A read may complete several pipelined requests at once.
            while let Some(pos) = find_terminator(&pending) {
                let raw: Vec<u8> = pending.drain(..pos + REQUEST_TERMINATOR.len()).collect();
                let text = String::from_utf8_lossy(&raw);
                if text.trim().is_empty() {
                    continue;
                }

                let (response, close_after) = match RtspRequest::parse(&text) {
                    Ok(request) => {
                        tracing::debug!(
                            peer = %self.peer,
                            method = %request.method,
                            uri = %request.uri,
                            "request"
                        );
                        self.handle_request(&request)
                    }
                    Err(e) => {
                        tracing::warn!(peer = %self.peer, error = %e, "malformed request");
                        (RtspResponse::bad_request().add_header("CSeq", ""), false)
                    }
                };

                tracing::debug!(peer = %self.peer, status = response.status_code, "response");
                if self.send_response(&response).is_err() {
                    return "write error";
                }
                if close_after {
                    return "teardown";
                }
            }
        }

        "server shutting down"
    }

    fn send_response(&self, response: &RtspResponse) -> std::io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(response.serialize().as_bytes())?;
        writer.flush()
    }

    /// Dispatch one parsed request. Returns the response and whether the
    /// socket should close after it is flushed.
    pub fn handle_request(&self, request: &RtspRequest) -> (RtspResponse, bool) {
        let cseq = request.cseq();
        match request.method.as_str() {
            "OPTIONS" => (self.handle_options(cseq), false),
            "DESCRIBE" => (self.handle_describe(cseq), false),
            "SETUP" => (self.handle_setup(cseq, request), false),
            "PLAY" => (self.handle_play(cseq, request), false),
            "TEARDOWN" => self.handle_teardown(cseq, request),
            _ => {
                tracing::warn!(method = %request.method, cseq, "unsupported RTSP method");
                (RtspResponse::not_implemented().add_header("CSeq", cseq), false)
            }
        }
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(cseq, "OPTIONS");
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Public", PUBLIC_METHODS)
    }

    fn handle_describe(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(cseq, "DESCRIBE");

        let mut state = self.state.lock();
        if state.phase == Phase::Fresh {
            state.phase = Phase::Described;
        }
        drop(state);

        let body = sdp::describe_sdp(
            &self.config.sdp_username,
            &self.config.sdp_session_id,
            &self.config.sdp_session_name,
        );
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Content-Type", "application/sdp")
            .with_body(body)
    }

    fn handle_setup(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let transport = match request.get_header("Transport").and_then(TransportHeader::parse) {
            Some(t) => t,
            None => {
                tracing::warn!(
                    cseq,
                    transport = request.get_header("Transport").unwrap_or(""),
                    "SETUP with missing or non-unicast Transport"
                );
                return RtspResponse::bad_request().add_header("CSeq", cseq);
            }
        };

        let stream_name = match request.stream_name() {
            Some(name) => name.to_string(),
            None => {
                tracing::warn!(cseq, uri = %request.uri, "SETUP without a stream path");
                return RtspResponse::not_found().add_header("CSeq", cseq);
            }
        };

        let info = match self.registry.lookup_stream(&stream_name) {
            Some(info) => info,
            None => {
                tracing::warn!(cseq, stream = %stream_name, "SETUP for unpublished stream");
                return RtspResponse::not_found().add_header("CSeq", cseq);
            }
        };

        let Some(factory) = self.config.encoder.as_ref() else {
            tracing::error!(stream = %stream_name, "SETUP refused: no encoder configured");
            return RtspResponse::internal_error().add_header("CSeq", cseq);
        };

        let encoder_config = EncoderConfig {
            width: info.width,
            height: info.height,
            fps: self.config.fps,
            bitrate: self.config.bitrate,
            gop_size: self.config.gop_size,
        };
        // Destination IP comes from the TCP peer, never from the request.
        let pipeline = match EgressPipeline::new(
            info.width,
            info.height,
            self.peer.ip(),
            transport.client_rtp_port,
            &encoder_config,
            factory,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                tracing::error!(stream = %stream_name, error = %e, "pipeline construction failed");
                return RtspResponse::internal_error().add_header("CSeq", cseq);
            }
        };

        let server_rtp_port = pipeline.local_rtp_port();
        let session: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(SESSION_TOKEN_LEN)
            .map(char::from)
            .collect();

        let mut state = self.state.lock();
        // At most one pipeline per connection; a re-SETUP replaces it.
        if let Some(old) = state.pipeline.take() {
            old.shutdown();
        }
        state.phase = Phase::SetUp;
        state.session = Some(session.clone());
        state.client_rtp_port = transport.client_rtp_port;
        state.stream_path = stream_name.clone();
        state.pipeline = Some(pipeline);
        drop(state);

        tracing::info!(
            peer = %self.peer,
            stream = %stream_name,
            session = %session,
            client_rtp_port = transport.client_rtp_port,
            server_rtp_port,
            "session created via SETUP"
        );

        let transport_response = format!(
            "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
            transport.client_rtp_port,
            transport.client_rtcp_port,
            server_rtp_port,
            server_rtp_port.wrapping_add(1)
        );
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session)
            .add_header("Transport", &transport_response)
    }

    fn handle_play(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let mut state = self.state.lock();

        if state.pipeline.is_none() {
            tracing::warn!(cseq, "PLAY before SETUP");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        }
        if !self.session_matches(&state, request) {
            tracing::warn!(cseq, "PLAY with wrong session token");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        }

        state.phase = Phase::Playing;
        let session = state.session.clone().unwrap_or_default();
        drop(state);

        tracing::info!(peer = %self.peer, session = %session, "session playing");
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session)
            .add_header("Range", "npt=0-")
    }

    fn handle_teardown(&self, cseq: &str, request: &RtspRequest) -> (RtspResponse, bool) {
        let mut state = self.state.lock();

        if state.session.is_some() && !self.session_matches(&state, request) {
            tracing::warn!(cseq, "TEARDOWN with wrong session token");
            return (
                RtspResponse::session_not_found().add_header("CSeq", cseq),
                false,
            );
        }

        // Pipeline first: flush and BYE must precede the socket close.
        if let Some(pipeline) = state.pipeline.take() {
            pipeline.shutdown();
        }
        state.phase = Phase::TornDown;

        let mut response = RtspResponse::ok().add_header("CSeq", cseq);
        if let Some(session) = &state.session {
            response = response.add_header("Session", session);
        }
        tracing::info!(peer = %self.peer, "session torn down");
        (response, true)
    }

    /// Token check for PLAY/TEARDOWN: the `Session` header is validated
    /// when the client sends one and tolerated when absent. Any `;timeout=`
    /// suffix is ignored.
    fn session_matches(&self, state: &ConnState, request: &RtspRequest) -> bool {
        match request.get_header("Session") {
            Some(header) => {
                let token = header.split(';').next().unwrap_or("").trim();
                state.session.as_deref() == Some(token)
            }
            None => true,
        }
    }

    /// Fan-out target for [`Server::publish_frame`](crate::Server::publish_frame).
    ///
    /// Accepts the frame iff this connection subscribed to `stream_name`
    /// and its pipeline exists. A pipeline found dead (persistent codec
    /// failure) closes the session here instead.
    pub fn offer_frame(&self, stream_name: &str, frame: &BgrFrame<'_>) -> bool {
        let mut state = self.state.lock();
        if state.stream_path != stream_name {
            return false;
        }

        if state.pipeline.as_ref().is_some_and(|p| p.is_dead()) {
            tracing::warn!(peer = %self.peer, "closing session with dead pipeline");
            if let Some(pipeline) = state.pipeline.take() {
                pipeline.shutdown();
            }
            state.phase = Phase::TornDown;
            drop(state);
            let _ = self.writer.lock().shutdown(Shutdown::Both);
            return false;
        }

        let Some(pipeline) = state.pipeline.as_mut() else {
            return false;
        };
        match pipeline.handle_frame(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "frame rejected");
                false
            }
        }
    }

    /// Terminal cleanup on socket end/error/close: destroy the pipeline
    /// (flushing encoder and muxer, emitting the RTCP BYE) and mark the
    /// connection torn down.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let Some(pipeline) = state.pipeline.take() {
            pipeline.shutdown();
        }
        state.phase = Phase::TornDown;
    }
}

fn find_terminator(pending: &[u8]) -> Option<usize> {
    pending
        .windows(REQUEST_TERMINATOR.len())
        .position(|window| window == REQUEST_TERMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StreamInfo;
    use std::net::TcpListener;

    fn make_connection() -> (Connection, Arc<StreamRegistry>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (stream, peer) = listener.accept().unwrap();

        let registry = Arc::new(StreamRegistry::new());
        let config = Arc::new(ServerConfig::default());
        (
            Connection::new(peer, stream, config, registry.clone()),
            registry,
            client,
        )
    }

    fn request(raw: &str) -> RtspRequest {
        RtspRequest::parse(raw).unwrap()
    }

    // --- Transport header ---

    #[test]
    fn transport_parse_valid() {
        let t = TransportHeader::parse("RTP/AVP;unicast;client_port=18888-18889").unwrap();
        assert_eq!(t.client_rtp_port, 18888);
        assert_eq!(t.client_rtcp_port, 18889);
    }

    #[test]
    fn transport_rejects_multicast() {
        assert!(TransportHeader::parse("RTP/AVP;multicast;client_port=18888-18889").is_none());
    }

    #[test]
    fn transport_requires_client_port() {
        assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    }

    #[test]
    fn transport_requires_unicast() {
        assert!(TransportHeader::parse("RTP/AVP;client_port=18888-18889").is_none());
    }

    // --- Method handling (paths that need no encoder) ---

    #[test]
    fn options_advertises_methods() {
        let (conn, _registry, _client) = make_connection();
        let (resp, close) = conn.handle_request(&request("OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n"));
        assert!(!close);
        let s = resp.serialize();
        assert_eq!(
            s,
            "RTSP/1.0 200 OK\r\nCSeq: 1\r\n\
             Public: OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN\r\n\
             Content-Length: 0\r\n\r\n"
        );
        assert_eq!(conn.phase(), Phase::Fresh);
    }

    #[test]
    fn describe_returns_sdp_and_advances_phase() {
        let (conn, _registry, _client) = make_connection();
        let (resp, _) = conn.handle_request(&request(
            "DESCRIBE rtsp://127.0.0.1:5801/lifecam RTSP/1.0\r\nCSeq: 2\r\n\r\n",
        ));
        let s = resp.serialize();
        assert!(s.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(s.contains("Content-Type: application/sdp\r\n"));
        assert!(s.contains("m=video 0 RTP/AVP 96\r\n"));
        assert_eq!(conn.phase(), Phase::Described);
    }

    #[test]
    fn setup_unknown_stream_404() {
        let (conn, _registry, _client) = make_connection();
        let (resp, _) = conn.handle_request(&request(
            "SETUP rtsp://127.0.0.1:5801/ghost RTSP/1.0\r\nCSeq: 3\r\n\
             Transport: RTP/AVP;unicast;client_port=18888-18889\r\n\r\n",
        ));
        assert_eq!(resp.status_code, 404);
        assert_eq!(conn.phase(), Phase::Fresh);
    }

    #[test]
    fn setup_multicast_400() {
        let (conn, registry, _client) = make_connection();
        registry.update_stream(StreamInfo {
            name: "lifecam".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        });
        let (resp, _) = conn.handle_request(&request(
            "SETUP rtsp://127.0.0.1:5801/lifecam RTSP/1.0\r\nCSeq: 3\r\n\
             Transport: RTP/AVP;multicast;client_port=18888-18889\r\n\r\n",
        ));
        assert_eq!(resp.status_code, 400);
    }

    #[test]
    fn setup_without_encoder_500() {
        let (conn, registry, _client) = make_connection();
        registry.update_stream(StreamInfo {
            name: "lifecam".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        });
        let (resp, _) = conn.handle_request(&request(
            "SETUP rtsp://127.0.0.1:5801/lifecam RTSP/1.0\r\nCSeq: 3\r\n\
             Transport: RTP/AVP;unicast;client_port=18888-18889\r\n\r\n",
        ));
        assert_eq!(resp.status_code, 500, "no encoder factory configured");
    }

    #[test]
    fn play_before_setup_454() {
        let (conn, _registry, _client) = make_connection();
        let (resp, _) = conn.handle_request(&request(
            "PLAY rtsp://127.0.0.1:5801/lifecam RTSP/1.0\r\nCSeq: 4\r\n\r\n",
        ));
        assert_eq!(resp.status_code, 454);
    }

    #[test]
    fn unsupported_method_501() {
        let (conn, _registry, _client) = make_connection();
        let (resp, close) = conn.handle_request(&request(
            "ANNOUNCE rtsp://127.0.0.1:5801/lifecam RTSP/1.0\r\nCSeq: 7\r\n\r\n",
        ));
        assert!(!close);
        assert_eq!(resp.status_code, 501);
        let s = resp.serialize();
        assert!(s.contains("CSeq: 7\r\n"));
    }

    #[test]
    fn teardown_without_session_closes() {
        let (conn, _registry, _client) = make_connection();
        let (resp, close) = conn.handle_request(&request(
            "TEARDOWN rtsp://127.0.0.1:5801/lifecam RTSP/1.0\r\nCSeq: 5\r\n\r\n",
        ));
        assert!(close, "TEARDOWN is terminal");
        assert_eq!(resp.status_code, 200);
        assert_eq!(conn.phase(), Phase::TornDown);
    }

    #[test]
    fn offer_frame_ignores_other_streams() {
        let (conn, _registry, _client) = make_connection();
        let data = vec![0u8; 4 * 4 * 3];
        let frame = BgrFrame::new(4, 4, &data);
        assert!(!conn.offer_frame("lifecam", &frame));
    }

    #[test]
    fn terminator_detection() {
        assert_eq!(find_terminator(b"OPTIONS * RTSP/1.0\r\n\r\n"), Some(18));
        assert_eq!(find_terminator(b"OPTIONS * RTSP/1.0\r\n"), None);
    }
}
