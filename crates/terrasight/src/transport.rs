//! WebSocket transport for `StreamChannel`.

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::channel::{Connection, Transport};
use crate::error::ChannelError;

/// Text-frame WebSocket client.
///
/// Binary frames are passed on as lossy UTF-8 (and then fail result
/// parsing); ping/pong are handled by tungstenite and skipped here; a close
/// frame ends the inbound stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Connection, ChannelError> {
        let (socket, response) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Connect(format!("{}: {}", url, e)))?;
        log::debug!(
            "[Transport] WebSocket handshake with {} complete (status {})",
            url,
            response.status()
        );

        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(ChannelError::from)
            .with(|text: String| future::ready(Ok::<_, ChannelError>(Message::Text(text.into()))));

        let stream = read
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(bytes)) => {
                        Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(ChannelError::from(e))),
                })
            });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
