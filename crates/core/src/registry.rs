//! Process-wide stream and connection registry.
//!
//! The rendezvous between producer threads and per-client egress pipelines.
//! Two tables:
//!
//! - `streams` — last-known descriptor per stream name, written by every
//!   `publish_frame` call (last-write-wins) and read by SETUP lookups.
//! - `connections` — the live connections, inserted on TCP accept and
//!   removed on disconnect; `publish_frame` snapshots this list to fan
//!   frames out.
//!
//! Both tables sit behind their own mutex: producers publish from arbitrary
//! threads while accept/disconnect mutate from the transport threads.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::Connection;

/// Last-known metadata for a published stream, keyed by unique name.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Globally unique stream name, used as the RTSP URL path segment.
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Process-wide registry of streams and live connections.
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, StreamInfo>>,
    connections: Mutex<Vec<Arc<Connection>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Insert or update a stream descriptor (last write wins).
    pub fn update_stream(&self, info: StreamInfo) {
        self.streams.lock().insert(info.name.clone(), info);
    }

    /// Look up a stream descriptor by name (SETUP path).
    pub fn lookup_stream(&self, name: &str) -> Option<StreamInfo> {
        self.streams.lock().get(name).cloned()
    }

    /// Register a freshly accepted connection.
    pub fn register(&self, connection: Arc<Connection>) {
        let mut connections = self.connections.lock();
        connections.push(connection);
        tracing::debug!(total = connections.len(), "connection registered");
    }

    /// Remove a connection on close/end/error. Identity is the `Arc`
    /// allocation, not the peer address — addresses are not reused but the
    /// pointer comparison is what the ownership model guarantees.
    pub fn remove(&self, connection: &Arc<Connection>) {
        let mut connections = self.connections.lock();
        if let Some(pos) = connections.iter().position(|c| Arc::ptr_eq(c, connection)) {
            connections.swap_remove(pos);
        }
        tracing::debug!(remaining = connections.len(), "connection removed");
    }

    /// Snapshot of the live connections for publish fan-out.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().clone()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_upsert_last_write_wins() {
        let registry = StreamRegistry::new();
        registry.update_stream(StreamInfo {
            name: "lifecam".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        });
        registry.update_stream(StreamInfo {
            name: "lifecam".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
        });

        let info = registry.lookup_stream("lifecam").unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
    }

    #[test]
    fn unknown_stream_lookup() {
        let registry = StreamRegistry::new();
        assert!(registry.lookup_stream("ghost").is_none());
    }

    #[test]
    fn distinct_names_coexist() {
        let registry = StreamRegistry::new();
        for name in ["front", "rear"] {
            registry.update_stream(StreamInfo {
                name: name.to_string(),
                width: 640,
                height: 480,
                fps: 30,
            });
        }
        assert!(registry.lookup_stream("front").is_some());
        assert!(registry.lookup_stream("rear").is_some());
    }
}
