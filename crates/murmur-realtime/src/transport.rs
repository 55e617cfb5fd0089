//! Frame transports.
//!
//! A transport is a pair of tokio channels: frames pushed into `outbound`
//! reach the service, frames from the service arrive on `inbound`. The
//! websocket transport pumps both directions from two background tasks; the
//! loopback transport hands the other ends to the caller.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::RealtimeError;
use crate::frames::Frame;

const CHANNEL_CAPACITY: usize = 256;

/// Both directions of an open transport.
pub struct TransportHandle {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Frame>,
}

/// The far side of a [`loopback`] transport.
pub struct LoopbackPeer {
    /// Frames sent here are delivered to the client as inbound.
    pub to_client: mpsc::Sender<Frame>,
    /// Frames the client published.
    pub from_client: mpsc::Receiver<Frame>,
}

/// In-process transport, used for tests and offline sessions.
pub fn loopback() -> (TransportHandle, LoopbackPeer) {
    let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        TransportHandle {
            outbound: out_tx,
            inbound: in_rx,
        },
        LoopbackPeer {
            to_client: in_tx,
            from_client: out_rx,
        },
    )
}

/// Open a websocket to the realtime endpoint and spawn the pump tasks.
///
/// The writer task also emits a heartbeat every `heartbeat` so the service
/// keeps the socket open. No reconnection is attempted: once either side of
/// the socket fails, the handle's channels close.
pub async fn connect_websocket(
    url: &str,
    heartbeat: Duration,
) -> Result<TransportHandle, RealtimeError> {
    let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
    info!(url = %redact(url), "Realtime socket connected");

    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);

    // Writer: outbound frames + heartbeats
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        let mut heartbeat_ref: u64 = 0;

        loop {
            let frame = tokio::select! {
                frame = out_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = ticker.tick() => {
                    heartbeat_ref += 1;
                    Frame::heartbeat(heartbeat_ref)
                }
            };

            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(e) => {
                    warn!(event = %frame.event, error = %e, "Failed to encode frame");
                    continue;
                }
            };

            if let Err(e) = sink.send(Message::Text(text.into())).await {
                warn!(error = %e, "Realtime socket write failed");
                break;
            }
        }

        let _ = sink.close().await;
        debug!("Realtime writer stopped");
    });

    // Reader: inbound text frames
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => {
                        if in_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error = %e, "Ignoring undecodable frame"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Realtime socket read failed");
                    break;
                }
            }
        }
        debug!("Realtime reader stopped");
    });

    Ok(TransportHandle {
        outbound: out_tx,
        inbound: in_rx,
    })
}

/// Strip the query string (it carries the api key) before logging.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
