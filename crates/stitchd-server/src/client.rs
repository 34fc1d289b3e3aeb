//! Minimal async client for the imputation protocol.

use core::net::SocketAddr;
use futures::{SinkExt, StreamExt};
use stitchd_core::{
    ProtocolError, Request, RequestBatch, Response, Result, protocol::ClientCodec,
};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

#[derive(Debug, Clone, Copy)]
pub struct Client {
    addr: SocketAddr,
}

impl Client {
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sends `batch` on a fresh connection and waits for the response.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the connection fails.
    /// - [`Error::Protocol`] if the batch cannot be encoded or the response
    ///   is malformed or missing.
    pub async fn submit(&self, batch: RequestBatch) -> Result<Response> {
        let stream = TcpStream::connect(self.addr).await?;
        let mut framed = Framed::new(stream, ClientCodec::default());

        framed.send(batch).await?;
        match framed.next().await {
            Some(response) => response,
            None => Err(ProtocolError::Truncated {
                field: "status",
                needed: 1,
                available: 0,
            }
            .into()),
        }
    }

    /// Convenience for a batch of one.
    ///
    /// # Errors
    ///
    /// See [`Client::submit`].
    pub async fn impute(&self, request: Request) -> Result<Response> {
        self.submit(RequestBatch::new(vec![request])).await
    }
}

