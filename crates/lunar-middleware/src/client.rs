//! The duplex client connection, split into its two halves.
//!
//! The telemetry relay owns the [`ClientSink`] and the command router owns
//! the [`ClientSource`], so each direction can block on its own I/O without
//! holding up the other. Both traits are implemented for the halves of a
//! split `tokio-tungstenite` WebSocket.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use lunar_types::BridgeError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Server → client half.
#[async_trait]
pub trait ClientSink: Send {
    /// Send one text message. An error means the client is gone.
    async fn send_text(&mut self, text: String) -> Result<(), BridgeError>;

    /// Close the connection from the server side.
    async fn close(&mut self) -> Result<(), BridgeError>;
}

/// Client → server half.
#[async_trait]
pub trait ClientSource: Send {
    /// Wait for the next text message.
    ///
    /// Returns `Ok(None)` once the client has closed the connection, which is
    /// a normal end rather than an error.
    async fn next_text(&mut self) -> Result<Option<String>, BridgeError>;
}

#[async_trait]
impl<S> ClientSink for SplitSink<WebSocketStream<S>, Message>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_text(&mut self, text: String) -> Result<(), BridgeError> {
        self.send(Message::Text(text.into()))
            .await
            .map_err(|e| BridgeError::Client(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        match SinkExt::close(self).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(BridgeError::Client(e.to_string())),
        }
    }
}

#[async_trait]
impl<S> ClientSource for SplitStream<WebSocketStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_text(&mut self) -> Result<Option<String>, BridgeError> {
        while let Some(frame) = self.next().await {
            match frame {
                Ok(Message::Text(text)) => return Ok(Some(text.as_str().to_owned())),
                Ok(Message::Binary(_)) => {
                    return Err(BridgeError::CommandDecode(
                        "binary frame where JSON text was expected".to_string(),
                    ));
                }
                Ok(Message::Close(_)) => return Ok(None),
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(None),
                Err(e) => return Err(BridgeError::Client(e.to_string())),
            }
        }
        Ok(None)
    }
}
