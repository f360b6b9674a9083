//! Per-request data channels
//!
//! Each `CONNECT <id>` opens a second connection to the relay's data port,
//! sends the pairing handshake, and then forwards bytes according to the
//! configured mode: raw splice to a fixed target, or HTTP head parsing and
//! a route-table lookup.

use crate::client::TunnelClient;
use crate::config::OperationalMode;
use crate::http_parser::parse_head;
use crate::pipe::pipe;
use crate::route_handler;
use crate::AgentError;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

impl TunnelClient {
    /// Entry point of a per-request task
    pub(crate) async fn handle_tunnel(&self, request_id: String) {
        if !self.is_running() {
            return;
        }

        if let Err(e) = self.run_tunnel(&request_id).await {
            error!("[{request_id}] Error: {e}");
        }
    }

    async fn run_tunnel(&self, request_id: &str) -> Result<(), AgentError> {
        let (signal_host, _) = self.store().signal_addr();
        let data_port = self.store().data_port();

        let mut data_socket = TcpStream::connect((signal_host.as_str(), data_port)).await?;

        // Pair this socket with the waiting user connection
        let handshake = format!("REGISTER {} {request_id}\n", self.store().full_domain());
        data_socket.write_all(handshake.as_bytes()).await?;
        data_socket.flush().await?;

        match self.store().mode() {
            OperationalMode::RawMode => self.handle_raw_mode(request_id, data_socket).await,
            OperationalMode::RoutingMode => self.handle_routing_mode(request_id, data_socket).await,
        }
    }

    /// Raw mode: splice every byte to the single configured target
    async fn handle_raw_mode(
        &self,
        request_id: &str,
        data_socket: TcpStream,
    ) -> Result<(), AgentError> {
        let (target_host, target_port) = self.store().raw_target();
        info!("[{request_id}] raw mode: forwarding to {target_host}:{target_port}");

        let target = TcpStream::connect((target_host.as_str(), target_port)).await?;
        exchange(request_id, data_socket, target, self.store().buffer_size()).await;
        Ok(())
    }

    /// Routing mode: parse the head, look up the first matching rule in the
    /// published snapshot, hand off to the route handler
    async fn handle_routing_mode(
        &self,
        request_id: &str,
        mut data_socket: TcpStream,
    ) -> Result<(), AgentError> {
        let buffer_size = self.store().buffer_size();

        let Some(head) = parse_head(&mut data_socket, buffer_size).await? else {
            warn!("[{request_id}] invalid HTTP request");
            return Ok(());
        };
        info!("[{request_id}] {} {}", head.method, head.path);

        let table = self.route_snapshot();
        let Some(rule) = table.lookup(&head.path) else {
            warn!("[{request_id}] no route found for {}", head.path);
            return Ok(());
        };

        route_handler::handle(
            request_id,
            data_socket,
            &head,
            rule,
            self.store().force_connection_close(),
            buffer_size,
            self.stats(),
        )
        .await
    }
}

/// Run the bidirectional pipe pair between the relay-side socket and the
/// backend. The first pipe to finish (EOF or error) tears the other down,
/// which drops both sockets and unblocks everything. The same teardown runs
/// when the whole request task is aborted mid-exchange.
pub(crate) async fn exchange<C, B>(request_id: &str, client: C, backend: B, buffer_size: usize)
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (backend_read, backend_write) = tokio::io::split(backend);

    let up_label = format!("{request_id}-up");
    let down_label = format!("{request_id}-down");

    let mut upstream = PipeGuard::spawn(async move {
        pipe(backend_read, client_write, buffer_size, &up_label).await;
    });
    let mut downstream = PipeGuard::spawn(async move {
        pipe(client_read, backend_write, buffer_size, &down_label).await;
    });

    tokio::select! {
        _ = upstream.join() => {}
        _ = downstream.join() => {}
    }
    debug!("[{request_id}] pipes closed");
    // Guards drop here and abort whichever pipe is still running
}

/// Copier task handle that aborts on drop, so an aborted request task
/// cannot leave a pipe (and its socket halves) behind
struct PipeGuard(tokio::task::JoinHandle<()>);

impl PipeGuard {
    fn spawn(fut: impl std::future::Future<Output = ()> + Send + 'static) -> Self {
        Self(tokio::spawn(fut))
    }

    async fn join(&mut self) {
        let _ = (&mut self.0).await;
    }
}

impl Drop for PipeGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_exchange_forwards_both_directions() {
        let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend_listener.local_addr().unwrap();
        let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client_listener.local_addr().unwrap();

        // Echo backend that closes after one message
        tokio::spawn(async move {
            let (mut sock, _) = backend_listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(&buf[..n]).await.unwrap();
        });

        let client_side = tokio::spawn(async move {
            let (mut sock, _) = client_listener.accept().await.unwrap();
            sock.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).await.unwrap();
            buf[..n].to_vec()
        });

        let client = TcpStream::connect(client_addr).await.unwrap();
        let backend = TcpStream::connect(backend_addr).await.unwrap();
        exchange("t1", client, backend, 8192).await;

        assert_eq!(client_side.await.unwrap(), b"ping");
    }
}
