//! JSON-RPC 2.0 control interface over TCP.
//!
//! Lets operators inspect the registry, list attached volumes and arm or
//! disarm batch mode while the daemon runs.
//!
//! - `protocol`: request/response types
//! - `transport`: TCP listener with newline-delimited JSON framing
//! - `methods`: dispatcher and handlers
//! - `client`: one-shot client used by the CLI

pub mod client;
pub mod methods;
mod protocol;
mod transport;

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use transport::Transport;

pub use client::{ClientError, RpcClient};
pub use methods::{DaemonStatus, MethodHandler, VolumeEntry};
pub use protocol::{Request, Response, RpcError};

pub struct RpcServer {
    transport: Transport,
    shutdown: CancellationToken,
}

impl RpcServer {
    /// Bind the listener. Fails if the address is in use.
    pub async fn bind(ctx: AppContext, bind_addr: SocketAddr) -> anyhow::Result<Self> {
        let transport = Transport::bind(bind_addr, MethodHandler::new(ctx)).await?;
        Ok(Self {
            transport,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Serve until [`shutdown`](Self::shutdown) is called.
    pub async fn serve(&self) -> anyhow::Result<()> {
        self.transport.listen(self.shutdown.clone()).await
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedEnumerator;
    use crate::config::AppConfig;
    use crate::core::{ChannelSink, ProcessingStatus};
    use serde_json::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_client_round_trip_over_tcp() {
        let (enumerator, _controller) = SimulatedEnumerator::new();
        let (sink, _rx) = ChannelSink::new();
        let ctx = AppContext::new(AppConfig::default(), Arc::new(enumerator), Arc::new(sink));

        let server = Arc::new(
            RpcServer::bind(ctx, "127.0.0.1:0".parse().unwrap())
                .await
                .unwrap(),
        );
        let addr = server.local_addr().unwrap();
        let serving = {
            let server = server.clone();
            tokio::spawn(async move { server.serve().await })
        };

        let client = RpcClient::new(addr);
        let status: ProcessingStatus = client.call("registry.status", None).await.unwrap();
        assert_eq!(status.processing, 0);
        assert!(!status.batch.enabled);

        let err = client.call::<Value>("nope", None).await.unwrap_err();
        assert!(matches!(err, ClientError::Rpc(ref e) if e.code == protocol::METHOD_NOT_FOUND));

        server.shutdown();
        serving.await.unwrap().unwrap();
    }
}
