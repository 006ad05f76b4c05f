//! # framecast — embedded RTSP server for live camera frames
//!
//! A Rust library that publishes live uncompressed frames from in-process
//! producers to remote RTP clients as an HEVC (H.265) elementary stream.
//! Clients drive a standard RTSP/1.0 control channel over TCP; media flows
//! as RTP/AVP over UDP, encoded and packetized independently per client.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Packet header format, SSRC generation, BYE on teardown |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Session description for DESCRIBE responses |
//! | [RFC 7798](https://tools.ietf.org/html/rfc7798) | H.265 RTP payload | NAL packetization, aggregation, FU fragmentation |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │  Producer (camera loop / FFI bridge)       │
//! ├───────────────────────────────────────────┤
//! │  api / Server  — publish entry, orchestr. │
//! │  StreamRegistry— streams + live clients   │
//! ├───────────────────────────────────────────┤
//! │  Connection    — RTSP state machine       │
//! │  EgressPipeline— encode → inspect → mux   │
//! ├───────────────────────────────────────────┤
//! │  Transport     — TCP signaling, UDP data  │
//! │  Media         — RTP header, H265, RTCP   │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use framecast::{start_server_with, publish_frame, BgrFrame, ServerConfig};
//!
//! start_server_with(ServerConfig {
//!     encoder: Some(my_encoder_factory()),
//!     ..ServerConfig::default()
//! })
//! .unwrap();
//!
//! // Capture loop, on any thread:
//! let pixels = vec![0u8; 640 * 480 * 3];
//! publish_frame("lifecam", &BgrFrame::new(640, 480, &pixels));
//! // Watch with: rtsp://127.0.0.1:5801/lifecam
//! # fn my_encoder_factory() -> framecast::EncoderFactory { unimplemented!() }
//! ```
//!
//! The HEVC encoder itself is pluggable: production embedders install a
//! hardware codec through [`EncoderFactory`]; the server owns everything
//! on either side of it (fan-out, PTS, packetization, delivery, teardown).
//!
//! ## Crate layout
//!
//! - [`api`] — process-wide [`start_server`] / [`publish_frame`].
//! - [`server`] — [`Server`] orchestrator and [`ServerConfig`].
//! - [`registry`] — stream descriptors and live connections.
//! - [`connection`] — per-client RTSP state machine.
//! - [`egress`] — per-session encode/mux pipeline.
//! - [`encoder`] — the pluggable codec contract.
//! - [`protocol`] — RTSP parsing, response building, SDP.
//! - [`media`] — RTP header, H.265 packetizer, RTCP BYE.
//! - [`transport`] — TCP listener, UDP send sockets.
//! - [`error`] — [`Error`] enum and [`Result`] alias.

pub mod api;
pub mod connection;
pub mod egress;
pub mod encoder;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;

pub use api::{publish_frame, start_server, start_server_with};
pub use encoder::{BgrFrame, EncodedPacket, EncoderConfig, EncoderFactory, HevcEncoder};
pub use error::{Error, Result};
pub use registry::{StreamInfo, StreamRegistry};
pub use server::{DEFAULT_PORT, Server, ServerConfig, Viewer};
