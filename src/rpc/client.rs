use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::protocol::{Request, Response, RpcError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to connect to daemon at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Communication error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Daemon closed the connection without replying")]
    NoResponse,
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),
}

/// One-shot client: each call opens its own connection.
pub struct RpcClient {
    addr: SocketAddr,
}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.addr,
                source,
            })?;

        let request = Request::new(method, params, Value::from(1));
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        stream.write_all(line.as_bytes()).await?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        if reader.read_line(&mut response_line).await? == 0 {
            return Err(ClientError::NoResponse);
        }

        let response: Response = serde_json::from_str(&response_line)?;
        if let Some(error) = response.error {
            return Err(ClientError::Rpc(error));
        }

        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }
}
