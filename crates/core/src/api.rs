//! Process-wide publish API.
//!
//! The two-function surface embedders call from any thread, mirroring the
//! host-process contract: a capture loop (or a foreign-function bridge
//! above one) starts the server once, then pushes frames by stream name.
//!
//! The process-wide [`Server`] lives behind a one-shot initializer — there
//! is exactly one, it is constructed on first use, and repeated
//! [`start_server`] calls are no-ops. Embedders that need a non-default
//! configuration (port, encoder factory) call [`start_server_with`] first.

use std::sync::OnceLock;

use crate::encoder::BgrFrame;
use crate::error::Result;
use crate::server::{Server, ServerConfig};

static SERVER: OnceLock<Server> = OnceLock::new();

/// Start the process-wide RTSP server with default configuration.
///
/// Idempotent: the first call binds the listener (blocking until the
/// socket is ready to accept) and returns; later calls are no-ops. Safe to
/// call from any thread. Fatal init errors (bind failure) surface here,
/// once, to the first caller.
pub fn start_server() -> Result<()> {
    start_server_with(ServerConfig::default())
}

/// Start the process-wide RTSP server with the given configuration.
///
/// The configuration is consumed only by the call that actually performs
/// the one-shot initialization; on an already-initialized process it is
/// ignored and the call degrades to an idempotent no-op.
pub fn start_server_with(config: ServerConfig) -> Result<()> {
    let server = SERVER.get_or_init(|| Server::with_config(config));
    if server.is_running() {
        return Ok(());
    }
    match server.start() {
        // A racing initializer won; the server is up either way.
        Err(crate::error::Error::AlreadyRunning) => Ok(()),
        other => other,
    }
}

/// Publish one uncompressed BGR frame under `stream_name` to every
/// subscribed client of the process-wide server.
///
/// Returns `true` if at least one client accepted the frame, `false`
/// otherwise (including before [`start_server`] has been called). Safe for
/// concurrent calls from unrelated producer threads; encoding runs on the
/// caller's thread.
pub fn publish_frame(stream_name: &str, frame: &BgrFrame<'_>) -> bool {
    match SERVER.get() {
        Some(server) => server.publish_frame(stream_name, frame),
        None => false,
    }
}

/// The process-wide server, if [`start_server`] has initialized it.
pub fn server() -> Option<&'static Server> {
    SERVER.get()
}
