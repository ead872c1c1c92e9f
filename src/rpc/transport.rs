//! TCP transport with newline-delimited JSON framing. One task per
//! connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::methods::MethodHandler;
use super::protocol::{Request, Response};

pub struct Transport {
    listener: TcpListener,
    handler: Arc<MethodHandler>,
}

impl Transport {
    pub async fn bind(bind_addr: SocketAddr, handler: MethodHandler) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self {
            listener,
            handler: Arc::new(handler),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled.
    pub async fn listen(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "RPC server listening");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "Client connected");
                            let handler = self.handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                                    debug!(peer = %peer_addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => error!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("RPC server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<MethodHandler>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let Some(response) = dispatch_line(&handler, line.trim(), peer_addr).await else {
            continue;
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
    }

    debug!(peer = %peer_addr, "Client disconnected");
    Ok(())
}

/// Handle one frame. `None` for blank lines and notifications.
async fn dispatch_line(
    handler: &MethodHandler,
    line: &str,
    peer_addr: SocketAddr,
) -> Option<Response> {
    if line.is_empty() {
        return None;
    }

    let request = match serde_json::from_str::<Request>(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(peer = %peer_addr, error = %e, "Unparseable request");
            return Some(Response::parse_error());
        }
    };

    if let Err(reason) = request.validate() {
        warn!(peer = %peer_addr, reason, "Rejected request");
        return Some(Response::invalid_request(
            request.id.unwrap_or(serde_json::Value::Null),
        ));
    }

    debug!(peer = %peer_addr, method = %request.method, "Dispatching");
    let notification = request.is_notification();
    let response = handler.handle(request).await;
    (!notification).then_some(response)
}
