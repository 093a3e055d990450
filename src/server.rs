//! WebSocket transport: accepts subscribers and drains their queues.

use crate::hub::{HubError, HubHandle};
use crate::registry::ClientHandle;
use futures_util::{Sink, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),
    #[error("Send timed out after {0:?}")]
    SendTimeout(Duration),
}

/// Configuration for the WebSocket server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen_addr: String,
    /// Request path subscribers connect to
    pub path: String,
    /// Snapshots buffered per client before it counts as slow
    pub client_queue_capacity: usize,
    /// Keepalive ping interval
    pub ping_interval: Duration,
    /// Longest a single frame may wait on a peer that stopped reading
    pub send_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            path: "/ws".to_string(),
            client_queue_capacity: 16,
            ping_interval: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// Accepts WebSocket subscribers and hands them to the hub.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    hub: HubHandle,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(config: ServerConfig, hub: HubHandle) -> Result<Self, ServerError> {
        let listener =
            TcpListener::bind(&config.listen_addr)
                .await
                .map_err(|source| ServerError::Bind {
                    addr: config.listen_addr.clone(),
                    source,
                })?;

        Ok(Self {
            listener,
            config: Arc::new(config),
            hub,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per subscriber.
    pub async fn run(self) {
        tracing::info!(
            addr = %self.listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            path = %self.config.path,
            "Accepting subscribers"
        );

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                    continue;
                }
            };

            let hub = self.hub.clone();
            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                match serve_connection(stream, hub, config).await {
                    Ok(()) => tracing::debug!(%peer, "Connection closed"),
                    Err(e) => tracing::debug!(%peer, "Connection closed with error: {}", e),
                }
            });
        }
    }
}

/// Handshake, register, then forward snapshots until either side stops.
async fn serve_connection(
    stream: TcpStream,
    hub: HubHandle,
    config: Arc<ServerConfig>,
) -> Result<(), ServerError> {
    let path = config.path.clone();
    let check_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() == path {
            Ok(resp)
        } else {
            let mut err = ErrorResponse::new(Some("not found".to_string()));
            *err.status_mut() = StatusCode::NOT_FOUND;
            Err(err)
        }
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, check_path).await?;
    let (mut sink, mut incoming) = ws.split();

    let (handle, mut queue) = ClientHandle::new(config.client_queue_capacity);
    let id = handle.id();
    hub.register(handle).await?;

    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + config.ping_interval,
        config.ping_interval,
    );

    let result = loop {
        tokio::select! {
            snapshot = queue.recv() => match snapshot {
                Some(snapshot) => {
                    let frame = Message::text(snapshot.as_str());
                    if let Err(e) = send_within(&mut sink, frame, config.send_timeout).await {
                        break Err(e);
                    }
                }
                None => {
                    // Unregistered or evicted by the hub.
                    let _ = send_within(&mut sink, Message::Close(None), config.send_timeout).await;
                    break Ok(());
                }
            },
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
            },
            _ = ping.tick() => {
                let frame = Message::Ping(Default::default());
                if let Err(e) = send_within(&mut sink, frame, config.send_timeout).await {
                    break Err(e);
                }
            }
        }
    };

    // The hub may be gone or the client already evicted; either is fine.
    let _ = hub.unregister(id).await;

    result
}

/// Send one frame, giving up once `limit` elapses.
async fn send_within<S>(sink: &mut S, message: Message, limit: Duration) -> Result<(), ServerError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(sent) => Ok(sent?),
        Err(_) => Err(ServerError::SendTimeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig, SnapshotSource};
    use crate::merger::MergeError;
    use crate::report::TracingReporter;
    use crate::types::Snapshot;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    struct Idle;

    impl SnapshotSource for Idle {
        async fn fetch(&self) -> Result<Snapshot, MergeError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.path, "/ws");
        assert_eq!(config.client_queue_capacity, 16);
    }

    /// A peer whose receive window never opens.
    struct Stalled;

    impl Sink<Message> for Stalled {
        type Error = tungstenite::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_gives_up_on_stalled_peer() {
        let limit = Duration::from_secs(5);
        let start = tokio::time::Instant::now();

        let err = send_within(&mut Stalled, Message::text("[]"), limit)
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::SendTimeout(d) if d == limit));
        assert!(start.elapsed() >= limit);
    }

    #[tokio::test]
    async fn test_send_within_limit() {
        let mut sink = futures_util::sink::drain::<Message>()
            .sink_map_err(|never| -> tungstenite::Error { match never {} });

        send_within(&mut sink, Message::text("[]"), Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            listen_addr: taken.local_addr().unwrap().to_string(),
            ..Default::default()
        };
        let hub = Hub::new(Idle, Arc::new(TracingReporter), HubConfig::default());

        let err = Server::bind(config, hub.handle()).await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let hub = Hub::new(Idle, Arc::new(TracingReporter), HubConfig::default());

        let server = Server::bind(config, hub.handle()).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }
}
