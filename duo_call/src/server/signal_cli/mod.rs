use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use futures_util::{SinkExt, StreamExt};
use tokio::{select, sync::mpsc};
use tokio_tungstenite::connect_async;
use tungstenite::Message;

use super::*;
use crate::call::Role;
use crate::error::{CallError, Result};
use crate::msg_center::signaling_msgs::SignalingMessage;

const EVENT_CHANNEL_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Emitted once per adapter, when the socket opens.
    Connected,
    Message(SignalingMessage),
    Closed,
}

/// Outbound half of a signaling channel as seen by the coordinator.
pub trait SignalingChannel: Send + Sync {
    /// Non-blocking. Fails with `ChannelNotReady` when the channel is not open;
    /// the message is dropped, never queued.
    fn send(&self, message: &SignalingMessage) -> Result<()>;
    fn close(&self);
}

enum Outbound {
    Text(String),
    Close,
}

/// WebSocket signaling adapter. One connection per instance; reconnecting
/// takes a fresh `SignalCli`.
pub struct SignalCli {
    ws_url: String,
    outbound: OnceLock<mpsc::UnboundedSender<Outbound>>,
    open: Arc<AtomicBool>,
}

impl SignalCli {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            outbound: OnceLock::new(),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Open the connection for `role` in the background. Inbound traffic and
    /// the connected/closed notifications arrive on the returned receiver.
    pub fn connect(&self, role: Role) -> Result<mpsc::Receiver<ChannelEvent>> {
        let mut url = Url::parse(&self.ws_url)?;
        url.query_pairs_mut().append_pair("userId", role.as_str());

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        if self.outbound.set(outbound_tx).is_err() {
            return Err(CallError::AlreadyConnected);
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let open = Arc::clone(&self.open);
        tokio::spawn(async move {
            Self::handle_connection(url.to_string(), outbound_rx, event_tx.clone(), open.clone())
                .await;
            open.store(false, Ordering::SeqCst);
            let _ = event_tx.send(ChannelEvent::Closed).await;
        });
        Ok(event_rx)
    }

    async fn handle_connection(
        url: String,
        mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
        event_tx: mpsc::Sender<ChannelEvent>,
        open: Arc<AtomicBool>,
    ) {
        let mut ws_stream = match connect_async(url.as_str()).await {
            Ok((ws_stream, resp)) => {
                debug!("connect to signaling server success, resp: {:?}", resp.status());
                ws_stream
            }
            Err(e) => {
                error!("connect to signaling server {} failed: {}", url, e);
                return;
            }
        };

        open.store(true, Ordering::SeqCst);
        info!("signaling channel open: {}", url);
        if event_tx.send(ChannelEvent::Connected).await.is_err() {
            return;
        }

        loop {
            select! {
                out = outbound_rx.recv() => {
                    match out {
                        Some(Outbound::Text(text)) => {
                            debug!("send msg to signaling server: {}", text);
                            if let Err(e) = ws_stream.send(Message::Text(text)).await {
                                error!("send to signaling server failed: {}", e);
                                break;
                            }
                        }
                        Some(Outbound::Close) | None => {
                            open.store(false, Ordering::SeqCst);
                            let _ = ws_stream.close(None).await;
                            break;
                        }
                    }
                }

                ws_msg = ws_stream.next() => {
                    match ws_msg {
                        Some(Ok(Message::Text(text))) => {
                            debug!("receive msg from signaling server: {}", text);
                            match SignalingMessage::from_json(&text) {
                                Ok(msg) => {
                                    if event_tx.send(ChannelEvent::Message(msg)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("dropping inbound payload {:?}: {}", text, e),
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("signaling server closed the channel: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("receive msg error: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
        info!("signaling channel closed: {}", url);
    }
}

impl SignalingChannel for SignalCli {
    fn send(&self, message: &SignalingMessage) -> Result<()> {
        let outbound = match self.outbound.get() {
            Some(outbound) if self.is_open() => outbound,
            _ => {
                warn!("channel not open, dropping {:?}", message.kind());
                return Err(CallError::ChannelNotReady);
            }
        };
        let text = message.to_json()?;
        outbound.send(Outbound::Text(text)).map_err(|_| {
            warn!("channel task gone, dropping {:?}", message.kind());
            CallError::ChannelNotReady
        })
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(outbound) = self.outbound.get() {
            let _ = outbound.send(Outbound::Close);
        }
    }
}
