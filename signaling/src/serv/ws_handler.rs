use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::mngr::Delivery;
use super::*;

const OUTBOUND_QUEUE: usize = 100;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(user_id) = params.get("userId").filter(|id| !id.is_empty()).cloned() else {
        return (StatusCode::BAD_REQUEST, "missing userId").into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: String, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

    let conn_id = state.registry.lock().await.connect(&user_id, msg_tx);
    info!("ws connected: user {} ({})", user_id, conn_id);

    let recv_state = Arc::clone(&state);
    let recv_user = user_id.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            debug!("from {}: {}", recv_user, text);
            let signal = match serde_json::from_str::<SignalMessage>(&text) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("malformed frame from {}: {}", recv_user, e);
                    continue;
                }
            };
            let mut registry = recv_state.registry.lock().await;
            let deliveries = registry.route(signal);
            deliver(&registry, deliveries);
        }
    });

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut receive_task) => send_task.abort(),
        _ = (&mut send_task) => receive_task.abort(),
    };

    // a dropped connection counts as leaving every call
    let mut registry = state.registry.lock().await;
    let deliveries = registry.disconnect(&user_id, &conn_id);
    deliver(&registry, deliveries);
    info!("ws disconnected: user {} ({})", user_id, conn_id);
}

fn deliver(registry: &mngr::CallRegistry, deliveries: Vec<Delivery>) {
    for (to, msg) in deliveries {
        let Some(tx) = registry.sender(&to) else {
            warn!("{} is not connected, {:?} dropped", to, msg.msg_type);
            continue;
        };
        match serde_json::to_string(&msg) {
            Ok(text) => {
                if let Err(e) = tx.try_send(text) {
                    error!("failed to queue {:?} for {}: {}", msg.msg_type, to, e);
                }
            }
            Err(e) => error!("failed to encode {:?}: {}", msg.msg_type, e),
        }
    }
}
