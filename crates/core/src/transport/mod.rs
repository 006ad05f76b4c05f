//! Network transport layer for RTSP signaling and RTP media delivery.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP** ([`tcp`]): carries RTSP request/response signaling. One TCP
//!   connection per client, with a thread per connection and keepalive
//!   bounding the lifetime of silent peers.
//!
//! - **UDP** ([`udp`]): carries RTP media packets. Each egress pipeline
//!   binds its own ephemeral send socket.

pub mod tcp;
pub mod udp;

pub use udp::UdpTransport;
