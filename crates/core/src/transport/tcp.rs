use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};

use crate::connection::Connection;
use crate::registry::StreamRegistry;
use crate::server::ServerConfig;

/// Keepalive idle time set on every accepted socket. The smallest positive
/// value portable across Linux/macOS/Windows is one second — the upstream
/// request of 1 ms is below OS keepalive granularity, so 1 s is the
/// effective interval. A silently vanished client is reaped by TCP once
/// its probes go unanswered.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(1);

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50 ms poll interval so
/// that [`Server::stop`](crate::Server::stop) can terminate it promptly.
/// Each accepted socket gets its connection registered, keepalive enabled,
/// and a dedicated service thread; the registry entry is removed when the
/// service loop ends, whatever the reason.
///
/// Per-socket failures are logged and cost only that connection — the loop
/// itself never dies with a client.
pub fn accept_loop(
    listener: TcpListener,
    registry: Arc<StreamRegistry>,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }

                let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
                if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
                    tracing::warn!(%peer, error = %e, "failed to enable TCP keepalive");
                }

                let writer = match stream.try_clone() {
                    Ok(writer) => writer,
                    Err(e) => {
                        tracing::warn!(%peer, error = %e, "failed to clone client socket");
                        continue;
                    }
                };

                let connection = Arc::new(Connection::new(
                    peer,
                    writer,
                    config.clone(),
                    registry.clone(),
                ));
                registry.register(connection.clone());

                let registry = registry.clone();
                let running = running.clone();
                thread::spawn(move || {
                    tracing::info!(%peer, "client connected");
                    let reason = connection.service(stream, &running);
                    connection.close();
                    registry.remove(&connection);
                    tracing::info!(%peer, reason, "client disconnected");
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}
