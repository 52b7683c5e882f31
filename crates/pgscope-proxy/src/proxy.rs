//! TCP proxy harness
//!
//! Accepts client connections, dials the upstream server, and runs one
//! forwarding task per direction. Each chunk is forwarded to the opposite
//! peer first and then tee'd into that direction's observer; the proxied
//! byte stream is never modified, delayed, or filtered.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use pgscope_common::{Error, QuerySink, Result};

use crate::config::ProxyConfig;
use crate::metrics;
use crate::pg_wire::{Origin, QueryCorrelator, WireObserver};

/// The proxy server: one listener, one upstream dial per connection.
pub struct ProxyServer {
    source: String,
    target: String,
    config: Arc<ProxyConfig>,
    sink: Arc<dyn QuerySink>,
}

impl ProxyServer {
    pub fn new(
        source: String,
        target: String,
        config: Arc<ProxyConfig>,
        sink: Arc<dyn QuerySink>,
    ) -> Self {
        Self {
            source,
            target,
            config,
            sink,
        }
    }

    /// Validate the endpoint configuration and bind the listening socket.
    pub async fn bind(&self) -> Result<TcpListener> {
        if self.source.is_empty() || self.target.is_empty() {
            return Err(Error::Config(
                "source and target addresses are both required".into(),
            ));
        }
        Ok(TcpListener::bind(&self.source).await?)
    }

    /// Accept connections forever. Accept failures are logged and do not
    /// stop the listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(
            "Proxy listening on {} forwarding to {}",
            self.source, self.target
        );
        loop {
            let (client, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    continue;
                }
            };
            metrics::CONNECTIONS_TOTAL.inc();
            metrics::CONNECTIONS_ACTIVE.inc();
            debug!(peer = %peer, "accepted client connection");
            configure_tcp_keepalive(&client, self.config.tcp_keepalive_secs);

            let target = self.target.clone();
            let config = self.config.clone();
            let sink = self.sink.clone();
            tokio::spawn(async move {
                handle_connection(client, peer, target, config, sink).await;
                metrics::CONNECTIONS_ACTIVE.dec();
                debug!(peer = %peer, "connection closed");
            });
        }
    }

    /// Bind and serve.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }
}

async fn handle_connection(
    client: TcpStream,
    peer: SocketAddr,
    target: String,
    config: Arc<ProxyConfig>,
    sink: Arc<dyn QuerySink>,
) {
    let server = match TcpStream::connect(&target).await {
        Ok(server) => server,
        Err(e) => {
            error!(peer = %peer, target = %target, "Upstream dial failed: {}", e);
            return;
        }
    };
    configure_tcp_keepalive(&server, config.tcp_keepalive_secs);

    let correlator = Arc::new(QueryCorrelator::new(sink));
    let mut frontend = WireObserver::new(
        Origin::Frontend,
        correlator.clone(),
        config.reassembly_warn_bytes,
    );
    let mut backend = WireObserver::new(Origin::Backend, correlator, config.reassembly_warn_bytes);

    let (mut client_read, mut client_write) = client.into_split();
    let (mut server_read, mut server_write) = server.into_split();

    // Either leg finishing tears down both; pending correlation state is
    // discarded without synthetic outcomes.
    let result = tokio::select! {
        r = pump(&mut client_read, &mut server_write, &mut frontend, config.read_buffer_bytes) => r,
        r = pump(&mut server_read, &mut client_write, &mut backend, config.read_buffer_bytes) => r,
    };
    match result {
        Ok(bytes) => debug!(peer = %peer, bytes, "proxied stream reached EOF"),
        Err(e) => warn!(peer = %peer, "Transport error: {}", e),
    }
}

/// Forward bytes from `src` to `dst` until EOF, teeing each chunk into the
/// observer after it has been written through. Returns the total bytes
/// forwarded.
async fn pump<R, W>(
    src: &mut R,
    dst: &mut W,
    observer: &mut WireObserver,
    buffer_bytes: usize,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_bytes];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        dst.write_all(&buf[..n]).await?;
        dst.flush().await?;
        observer.observe(&buf[..n]);
        metrics::BYTES_FORWARDED
            .with_label_values(&[observer.origin().as_str()])
            .inc_by(n as u64);
        total += n as u64;
    }
}

/// Configure TCP keepalive and nodelay on a proxied socket.
/// This helps detect dead connections faster than relying on TCP defaults.
fn configure_tcp_keepalive(stream: &TcpStream, keepalive_secs: u64) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    let socket = SockRef::from(stream);
    if let Err(e) = socket.set_keepalive(true) {
        warn!("Failed to enable TCP keepalive: {}", e);
        return;
    }

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(keepalive_secs))
        .with_interval(Duration::from_secs(keepalive_secs / 2 + 1));

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    let keepalive = keepalive.with_retries(3);

    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        warn!("Failed to configure TCP keepalive timing: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pgscope_common::Query;
    use tokio::time::{sleep, timeout};

    #[derive(Default)]
    struct CaptureSink {
        records: Mutex<Vec<Query>>,
    }

    impl CaptureSink {
        fn records(&self) -> Vec<Query> {
            self.records.lock().clone()
        }
    }

    impl QuerySink for CaptureSink {
        fn write(&self, query: &Query) {
            self.records.lock().push(query.clone());
        }
    }

    fn frame(kind: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![kind];
        out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn test_server(target: String, sink: Arc<CaptureSink>) -> ProxyServer {
        ProxyServer::new(
            "127.0.0.1:0".to_string(),
            target,
            Arc::new(ProxyConfig::default()),
            sink,
        )
    }

    #[tokio::test]
    async fn test_bind_requires_source_and_target() {
        let sink = Arc::new(CaptureSink::default());
        let server = ProxyServer::new(
            String::new(),
            "127.0.0.1:5432".to_string(),
            Arc::new(ProxyConfig::default()),
            sink,
        );
        assert!(matches!(server.bind().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_proxy_forwards_bytes_and_records_queries() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();

        let sink = Arc::new(CaptureSink::default());
        let server = test_server(upstream_addr.to_string(), sink.clone());
        let listener = server.bind().await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        // Parse + Sync from the client; CommandComplete + ReadyForQuery back
        let mut request = frame(b'P', b"\0SELECT 1\0\0\0");
        request.extend_from_slice(&frame(b'S', b""));
        let mut response = frame(b'C', b"SELECT 1\0");
        response.extend_from_slice(&frame(b'Z', b"I"));

        let expected_request = request.clone();
        let upstream_response = response.clone();
        let upstream_task = tokio::spawn(async move {
            let (mut socket, _) = upstream.accept().await.unwrap();
            let mut buf = vec![0u8; expected_request.len()];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, expected_request, "request bytes must pass unmodified");
            socket.write_all(&upstream_response).await.unwrap();
            socket
        });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(&request).await.unwrap();

        let mut received = vec![0u8; response.len()];
        client.read_exact(&mut received).await.unwrap();
        assert_eq!(received, response, "response bytes must pass unmodified");

        let _upstream_socket = upstream_task.await.unwrap();

        // The sink write happens on the proxy's forwarding task
        timeout(Duration::from_secs(2), async {
            while sink.records().is_empty() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("sink should receive a record");

        assert_eq!(sink.records(), vec![Query::completed("SELECT 1")]);
    }

    #[tokio::test]
    async fn test_dial_failure_drops_client() {
        // port 1 is never listening on loopback in the test environment
        let sink = Arc::new(CaptureSink::default());
        let server = test_server("127.0.0.1:1".to_string(), sink.clone());
        let listener = server.bind().await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("client should be dropped promptly")
            .unwrap_or(0);
        assert_eq!(n, 0, "client connection should see EOF");
        assert!(sink.records().is_empty());
    }
}
