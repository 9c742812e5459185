// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! MCP transport abstraction (newline-delimited stdio and in-process channels).
//!
//! `recv` must be cancel-safe: the serving loop polls it inside `select!`.

use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use futures::{SinkExt, StreamExt};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

/// Longest accepted line.
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Line too long")]
    LineTooLong,
    #[error("Channel closed")]
    ChannelClosed,
}

impl From<LinesCodecError> for TransportError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => TransportError::LineTooLong,
            LinesCodecError::Io(e) => TransportError::Io(e),
        }
    }
}

/// Transport abstraction for MCP JSON-RPC messages.
#[async_trait::async_trait]
pub trait McpTransport: Send {
    /// Receive a JSON-RPC request.
    async fn recv(&mut self) -> Result<JsonRpcRequest, TransportError>;
    /// Send a JSON-RPC response.
    async fn send(&mut self, response: JsonRpcResponse) -> Result<(), TransportError>;
}

/// One JSON message per line.
pub struct LineTransport<R, W> {
    reader: FramedRead<R, LinesCodec>,
    writer: FramedWrite<W, LinesCodec>,
}

impl LineTransport<tokio::io::Stdin, tokio::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            writer: FramedWrite::new(writer, LinesCodec::new()),
        }
    }
}

#[async_trait::async_trait]
impl<R, W> McpTransport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<JsonRpcRequest, TransportError> {
        loop {
            let line = match self.reader.next().await {
                Some(line) => line?,
                None => return Err(TransportError::ChannelClosed),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(&line)?);
        }
    }

    async fn send(&mut self, response: JsonRpcResponse) -> Result<(), TransportError> {
        let line = serde_json::to_string(&response)?;
        self.writer.send(line).await?;
        Ok(())
    }
}

/// In-process transport carrying raw lines, used by tests and embedders.
pub struct ChannelTransport {
    rx: mpsc::Receiver<String>,
    tx: mpsc::Sender<String>,
}

/// Client end of a [`ChannelTransport`].
pub struct ChannelClient {
    tx: mpsc::Sender<String>,
    rx: mpsc::Receiver<String>,
}

impl ChannelTransport {
    pub fn pair(buffer: usize) -> (ChannelTransport, ChannelClient) {
        let (client_tx, server_rx) = mpsc::channel(buffer);
        let (server_tx, client_rx) = mpsc::channel(buffer);
        (
            ChannelTransport {
                rx: server_rx,
                tx: server_tx,
            },
            ChannelClient {
                tx: client_tx,
                rx: client_rx,
            },
        )
    }
}

#[async_trait::async_trait]
impl McpTransport for ChannelTransport {
    async fn recv(&mut self) -> Result<JsonRpcRequest, TransportError> {
        let line = self.rx.recv().await.ok_or(TransportError::ChannelClosed)?;
        Ok(serde_json::from_str(&line)?)
    }

    async fn send(&mut self, response: JsonRpcResponse) -> Result<(), TransportError> {
        let line = serde_json::to_string(&response)?;
        self.tx
            .send(line)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

impl ChannelClient {
    pub async fn send_line(&self, line: impl Into<String>) -> Result<(), TransportError> {
        self.tx
            .send(line.into())
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    pub async fn send_value(&self, message: &serde_json::Value) -> Result<(), TransportError> {
        self.send_line(message.to_string()).await
    }

    /// Next response, or `None` once the server side is gone.
    pub async fn recv_value(&mut self) -> Option<serde_json::Value> {
        let line = self.rx.recv().await?;
        serde_json::from_str(&line).ok()
    }
}
