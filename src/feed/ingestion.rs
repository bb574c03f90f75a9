//! Event ingestion channel - owns the single live WebSocket connection.
//!
//! Text frames are forwarded in arrival order into the feed's inbound queue. A
//! disconnect or error is reported once as `Inbound::Disconnected`; reconnecting
//! is left to the caller.

use crate::feed::types::{Inbound, InboundSender};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to one live connection.
pub struct IngestionChannel {
    url: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl IngestionChannel {
    /// Connect to `url` and start forwarding frames into `inbound`.
    #[instrument(skip(subscribe_message, inbound))]
    pub async fn connect(
        url: &str,
        subscribe_message: Option<String>,
        inbound: InboundSender,
    ) -> Result<Self> {
        let (ws_stream, response) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to feed {}", url))?;
        info!("Connected to feed {} (HTTP {})", url, response.status());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(pump(
            ws_stream,
            url.to_string(),
            subscribe_message,
            inbound,
            shutdown_rx,
        ));

        Ok(Self {
            url: url.to_string(),
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the pump is still running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Close the connection and wait for the pump to exit. Only the first call does anything.
    pub async fn close(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };
        // The pump may already be gone after a disconnect.
        let _ = shutdown_tx.send(());

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Ingestion task for {} ended abnormally: {}", self.url, e);
            }
        }
        info!("Ingestion channel {} closed", self.url);
    }
}

impl Drop for IngestionChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Forward frames until shutdown, disconnect or the inbound queue closes.
async fn pump(
    ws_stream: FeedStream,
    url: String,
    subscribe_message: Option<String>,
    inbound: InboundSender,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let (mut write, mut read) = ws_stream.split();

    if let Some(message) = subscribe_message {
        if let Err(e) = write.send(Message::Text(message.into())).await {
            let reason = format!("failed to send subscription: {}", e);
            warn!("Ingestion channel {} terminated: {}", url, reason);
            let _ = inbound.send(Inbound::Disconnected(reason)).await;
            return;
        }
        debug!("Sent subscription message to {}", url);
    }

    let reason = loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                let _ = write.close().await;
                debug!("Ingestion channel {} shut down", url);
                return;
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(Inbound::Frame(text.to_string())).await.is_err() {
                        debug!("Inbound queue closed, stopping ingestion from {}", url);
                        let _ = write.close().await;
                        return;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        if inbound.send(Inbound::Frame(text)).await.is_err() {
                            let _ = write.close().await;
                            return;
                        }
                    }
                    Err(_) => warn!("Dropping non UTF-8 binary frame from {}", url),
                },
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        break format!("failed to answer ping: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break format!("server closed the connection ({:?})", frame);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("websocket error: {}", e),
                None => break "stream ended".to_string(),
            }
        }
    };

    warn!("Ingestion channel {} terminated: {}", url, reason);
    let _ = inbound.send(Inbound::Disconnected(reason)).await;
}
