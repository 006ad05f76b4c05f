//! The codec facility contract.
//!
//! The server never links a concrete HEVC encoder — it drives one through
//! the [`HevcEncoder`] trait, injected as an [`EncoderFactory`] via
//! [`ServerConfig`](crate::ServerConfig). Production embedders wrap a
//! hardware codec (VAAPI, NVENC, RKMPP, ...); tests wrap a synthetic
//! bitstream generator.
//!
//! ## Wire contract
//!
//! - Input: packed 24-bit BGR, stride = width × 3, continuous memory.
//! - Output: HEVC Annex-B access units with 90 kHz PTS.
//! - Every IDR access unit must be preceded, in the same output buffer, by
//!   VPS/SPS/PPS NAL units — clients receive parameter sets in-band, never
//!   through the SDP.
//! - [`extradata`](HevcEncoder::extradata) exposes the parameter sets once
//!   the first access unit has been produced; the muxer refuses to write
//!   packets until it has seen them.

use std::sync::Arc;

use crate::error::Result;

/// Default target bitrate in bits per second.
pub const DEFAULT_BITRATE: u32 = 2_000_000;

/// Default framerate used for encoder metadata. Actual pacing is derived
/// from wall-clock PTS, not this value.
pub const DEFAULT_FPS: u32 = 30;

/// Default GOP size: one IDR per second at the default framerate.
pub const DEFAULT_GOP_SIZE: u32 = 30;

/// A borrowed view of one uncompressed BGR frame.
///
/// Producers own the pixel data; the server only reads it for the duration
/// of a `publish_frame` call (zero-copy into the encoder).
#[derive(Debug, Clone, Copy)]
pub struct BgrFrame<'a> {
    pub width: u32,
    pub height: u32,
    /// Bytes per row. Callers guarantee `stride == width * 3` (packed BGR24).
    pub stride: usize,
    pub data: &'a [u8],
}

impl<'a> BgrFrame<'a> {
    pub fn new(width: u32, height: u32, data: &'a [u8]) -> Self {
        Self {
            width,
            height,
            stride: width as usize * 3,
            data,
        }
    }

    /// Total bytes a frame of these dimensions must provide.
    pub fn expected_len(&self) -> usize {
        self.stride * self.height as usize
    }
}

/// Encoder configuration handed to the [`EncoderFactory`] at SETUP time.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    /// Framerate metadata (informational; timing follows wall-clock PTS).
    pub fps: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    /// Frames between IDRs.
    pub gop_size: u32,
}

impl EncoderConfig {
    /// Config for a stream of the given dimensions with default rate
    /// parameters (2 Mbps, GOP 30, 30 fps metadata).
    pub fn for_stream(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fps: DEFAULT_FPS,
            bitrate: DEFAULT_BITRATE,
            gop_size: DEFAULT_GOP_SIZE,
        }
    }
}

/// One encoded HEVC access unit in Annex-B byte-stream format.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// Annex-B data: start-code-prefixed NAL units.
    pub data: Vec<u8>,
    /// Presentation timestamp in 90 kHz ticks.
    pub pts: i64,
}

/// An HEVC encoder instance bound to one egress pipeline.
///
/// Implementations are driven from the producer's thread (encode latency is
/// the producer's budget) and must uphold the module-level wire contract.
pub trait HevcEncoder: Send {
    /// Submit one frame and drain whatever access units the encoder has
    /// ready. An empty vec is normal for encoders with internal lookahead.
    fn encode(&mut self, frame: &BgrFrame<'_>, pts: i64) -> Result<Vec<EncodedPacket>>;

    /// Signal end of stream and drain the remaining access units.
    fn flush(&mut self) -> Result<Vec<EncodedPacket>>;

    /// The VPS/SPS/PPS parameter sets (Annex-B), available once the first
    /// access unit has been produced.
    fn extradata(&self) -> Option<&[u8]>;
}

/// Fallible constructor for encoders, installed via
/// [`ServerConfig`](crate::ServerConfig) and invoked once per SETUP.
pub type EncoderFactory = Arc<dyn Fn(&EncoderConfig) -> Result<Box<dyn HevcEncoder>> + Send + Sync>;
