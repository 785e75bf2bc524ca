//! Request/reply client with mandatory deadlines.

use crate::{read_frame, write_frame, Result, WireError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A connected request/reply client.
///
/// Every operation runs under the deadline given at connect time; a peer
/// that stalls is reported as [`WireError::Timeout`] rather than blocking
/// the caller.
#[derive(Debug)]
pub struct RpcClient {
    stream: TcpStream,
    addr: String,
    deadline: Duration,
}

impl RpcClient {
    /// Connects to `addr`, bounded by `deadline`.
    pub async fn connect(addr: &str, deadline: Duration) -> Result<Self> {
        let stream = timeout(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| WireError::Timeout(addr.to_string()))??;
        Ok(Self {
            stream,
            addr: addr.to_string(),
            deadline,
        })
    }

    /// Sends one request frame and awaits one reply frame.
    pub async fn call<Q, R>(&mut self, request: &Q) -> Result<R>
    where
        Q: Serialize,
        R: DeserializeOwned,
    {
        timeout(self.deadline, write_frame(&mut self.stream, request))
            .await
            .map_err(|_| WireError::Timeout(self.addr.clone()))??;
        timeout(self.deadline, read_frame(&mut self.stream))
            .await
            .map_err(|_| WireError::Timeout(self.addr.clone()))?
    }
}

/// Connects, performs a single call, and drops the connection.
///
/// Replication pushes, time probes, election RPCs, and registry calls are
/// all one-shot exchanges; a fresh connection per call keeps peers free of
/// half-open request/reply state after a timeout.
pub async fn call_once<Q, R>(addr: &str, request: &Q, deadline: Duration) -> Result<R>
where
    Q: Serialize,
    R: DeserializeOwned,
{
    let mut client = RpcClient::connect(addr, deadline).await?;
    client.call(request).await
}
