//! Node-to-node delivery.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::cluster::NodeInfo;
use crate::error::TransportError;
use crate::protocol::{NodeRequest, NodeResponse};

/// Sends one request to one node and waits for its response.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn send(
        &self,
        node: &NodeInfo,
        request: &NodeRequest,
    ) -> Result<NodeResponse, TransportError>;
}

/// Newline-delimited JSON over a fresh TCP connection per request.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn exchange(
        addr: &str,
        request: &NodeRequest,
    ) -> Result<NodeResponse, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let (reader, mut writer) = stream.into_split();
        let io = |source| TransportError::Io {
            addr: addr.to_string(),
            source,
        };

        let mut payload = serde_json::to_vec(request)?;
        payload.push(b'\n');
        writer.write_all(&payload).await.map_err(io)?;
        writer.flush().await.map_err(io)?;

        let mut line = String::new();
        let read = BufReader::new(reader)
            .read_line(&mut line)
            .await
            .map_err(io)?;
        if read == 0 {
            return Err(TransportError::Closed {
                addr: addr.to_string(),
            });
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

#[async_trait]
impl NodeTransport for TcpTransport {
    async fn send(
        &self,
        node: &NodeInfo,
        request: &NodeRequest,
    ) -> Result<NodeResponse, TransportError> {
        match tokio::time::timeout(self.timeout, Self::exchange(&node.addr, request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                addr: node.addr.clone(),
                after: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NodeCommand;
    use tokio::net::TcpListener;

    fn node(addr: String) -> NodeInfo {
        NodeInfo {
            name: "peer".to_string(),
            addr,
            data: true,
        }
    }

    #[tokio::test]
    async fn exchanges_one_line_each_way() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut line = String::new();
            BufReader::new(reader).read_line(&mut line).await.unwrap();
            let request: NodeRequest = serde_json::from_str(line.trim()).unwrap();
            assert_eq!(request.cmd, NodeCommand::Flush);
            let mut out = serde_json::to_vec(&NodeResponse::rejected("peer", None, "nope")).unwrap();
            out.push(b'\n');
            writer.write_all(&out).await.unwrap();
        });

        let transport = TcpTransport::new(Duration::from_secs(5));
        let request = NodeRequest {
            cmd: NodeCommand::Flush,
            authorization: None,
        };
        let response = transport.send(&node(addr), &request).await.unwrap();
        assert!(!response.acknowledged);
        assert_eq!(response.error.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _hold = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let transport = TcpTransport::new(Duration::from_millis(100));
        let request = NodeRequest {
            cmd: NodeCommand::Reset,
            authorization: None,
        };
        let err = transport.send(&node(addr), &request).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = TcpTransport::new(Duration::from_secs(5));
        let request = NodeRequest {
            cmd: NodeCommand::Flush,
            authorization: None,
        };
        let err = transport.send(&node(addr), &request).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }), "got: {err}");
    }
}
