use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::connection::Phase;
use crate::encoder::{self, BgrFrame, EncoderFactory};
use crate::error::{Error, Result};
use crate::registry::{StreamInfo, StreamRegistry};
use crate::transport::tcp;

/// Default RTSP listen port.
pub const DEFAULT_PORT: u16 = 5801;

/// Server-level configuration shared with every connection.
#[derive(Clone)]
pub struct ServerConfig {
    /// TCP listen port for RTSP signaling.
    pub port: u16,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
    /// Framerate metadata handed to encoders (pacing follows wall clock).
    pub fps: u32,
    /// Target encoder bitrate in bits per second.
    pub bitrate: u32,
    /// Frames between IDRs.
    pub gop_size: u32,
    /// Factory constructing one HEVC encoder per SETUP. Without one, SETUP
    /// answers `500` — the server has no codec of its own.
    pub encoder: Option<EncoderFactory>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_name: "No Name".to_string(),
            fps: encoder::DEFAULT_FPS,
            bitrate: encoder::DEFAULT_BITRATE,
            gop_size: encoder::DEFAULT_GOP_SIZE,
            encoder: None,
        }
    }
}

/// High-level RTSP server orchestrator.
///
/// Owns the stream/connection registry and the listener lifecycle, and is
/// the entry point producers publish frames through. Connection handling is
/// delegated to [`crate::transport::tcp`]; per-client encode and RTP
/// delivery to each connection's [`EgressPipeline`](crate::egress::EgressPipeline).
///
/// ```no_run
/// use framecast::{Server, ServerConfig};
///
/// let server = Server::with_config(ServerConfig {
///     encoder: Some(my_encoder_factory()),
///     ..ServerConfig::default()
/// });
/// server.start().unwrap();
///
/// // Producer loop: push raw BGR frames by stream name.
/// // server.publish_frame("lifecam", &BgrFrame::new(640, 480, &pixels));
/// # fn my_encoder_factory() -> framecast::EncoderFactory { unimplemented!() }
/// ```
pub struct Server {
    registry: Arc<StreamRegistry>,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
}

impl Server {
    /// Create a server with default configuration (port 5801, no encoder).
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            registry: Arc::new(StreamRegistry::new()),
            config: Arc::new(config),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind the listener and spawn the accept loop on a worker thread.
    ///
    /// The listener is bound before this returns, so a client may connect
    /// the moment the call completes. Bind failure is fatal and surfaces
    /// here; everything later is per-connection.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        let bind = || -> Result<TcpListener> {
            if self.config.port == 0 {
                return Err(Error::InvalidBindAddress(
                    "port must be explicit (non-zero)".to_string(),
                ));
            }
            let listener = TcpListener::bind(("0.0.0.0", self.config.port))?;
            listener.set_nonblocking(true)?;
            Ok(listener)
        };
        let listener = match bind() {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        tracing::info!(port = self.config.port, "RTSP server listening");

        let registry = self.registry.clone();
        let config = self.config.clone();
        let running = self.running.clone();
        thread::spawn(move || {
            tcp::accept_loop(listener, registry, config, running);
        });

        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Publish one uncompressed frame under `stream_name`.
    ///
    /// Updates the registry's stream descriptor (so a subsequent SETUP for
    /// this name succeeds), then offers the frame to every live connection;
    /// each one accepts iff it subscribed to this stream and holds a
    /// pipeline. Encoding runs here, on the caller's thread.
    ///
    /// Returns `true` if at least one connection accepted the frame. Safe
    /// to call from any thread.
    pub fn publish_frame(&self, stream_name: &str, frame: &BgrFrame<'_>) -> bool {
        self.registry.update_stream(StreamInfo {
            name: stream_name.to_string(),
            width: frame.width,
            height: frame.height,
            fps: self.config.fps,
        });

        let mut accepted = false;
        for connection in self.registry.connections() {
            accepted |= connection.offer_frame(stream_name, frame);
        }
        accepted
    }

    /// Connected clients currently in the Playing state.
    pub fn viewers(&self) -> Vec<Viewer> {
        self.registry
            .connections()
            .iter()
            .filter(|c| c.phase() == Phase::Playing)
            .map(|c| Viewer {
                session: c.session_token().unwrap_or_default(),
                stream: c.stream_path(),
                peer: c.peer().to_string(),
                client_rtp_port: c.client_rtp_port(),
            })
            .collect()
    }

    /// The process-wide stream/connection registry.
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// The server's configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Information about a connected viewer (client in PLAY state).
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session: String,
    pub stream: String,
    pub peer: String,
    pub client_rtp_port: u16,
}
