use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json;
use std::collections::HashSet;
use tokio::select;

use crate::api::routes::AppState;
use crate::brokerage::Event;

// Subscription action enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

// Subscription message from client
#[derive(Debug, Deserialize)]
struct SubscriptionMessage {
    action: SubscriptionAction,
    symbol: String,
}

// Subscription status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Success,
    Error,
}

// Acknowledgment message to client
#[derive(Debug, Serialize)]
struct SubscriptionAck {
    status: SubscriptionStatus,
    message: String,
    symbol: Option<String>,
}

// WebSocket handler - accepts upgrade and handles the connection
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// Handle individual WebSocket connection: trade and price events for the
// symbols the client subscribed to.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.brokerage.subscribe();
    let mut subscribed_symbols: HashSet<String> = HashSet::new();

    loop {
        select! {
            // Handle broadcast events and send to client (if subscribed)
            result = events.recv() => {
                match result {
                    Ok(event) => {
                        let symbol = match &event {
                            Event::Trade { symbol, .. } => symbol,
                            Event::Price { symbol, .. } => symbol,
                        };

                        if subscribed_symbols.contains(symbol) {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if socket.send(Message::Text(json.into())).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(_) => {
                        // Broadcast channel closed or receiver lagged too far
                        return;
                    }
                }
            }
            // Handle incoming messages from client
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SubscriptionMessage>(&text) {
                            Ok(sub_msg) => {
                                let normalized_symbol = sub_msg.symbol.to_uppercase();

                                // Validate symbol against the price board
                                let symbol_exists =
                                    state.brokerage.feed().contains(&normalized_symbol).await;

                                let ack = match sub_msg.action {
                                    SubscriptionAction::Subscribe => {
                                        if symbol_exists {
                                            subscribed_symbols.insert(normalized_symbol.clone());
                                            SubscriptionAck {
                                                status: SubscriptionStatus::Success,
                                                message: format!("Subscribed to {}", normalized_symbol),
                                                symbol: Some(normalized_symbol),
                                            }
                                        } else {
                                            SubscriptionAck {
                                                status: SubscriptionStatus::Error,
                                                message: format!("Symbol '{}' not found", normalized_symbol),
                                                symbol: None,
                                            }
                                        }
                                    }
                                    SubscriptionAction::Unsubscribe => {
                                        subscribed_symbols.remove(&normalized_symbol);
                                        SubscriptionAck {
                                            status: SubscriptionStatus::Success,
                                            message: format!("Unsubscribed from {}", normalized_symbol),
                                            symbol: Some(normalized_symbol),
                                        }
                                    }
                                };

                                // Send acknowledgment back to client
                                if let Ok(ack_json) = serde_json::to_string(&ack) {
                                    if socket.send(Message::Text(ack_json.into())).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(_) => {
                                // Invalid JSON - send error acknowledgment
                                let error_ack = SubscriptionAck {
                                    status: SubscriptionStatus::Error,
                                    message: "Invalid message format. Expected: {\"action\": \"subscribe\", \"symbol\": \"AAPL\"}".to_string(),
                                    symbol: None,
                                };
                                if let Ok(ack_json) = serde_json::to_string(&error_ack) {
                                    let _ = socket.send(Message::Text(ack_json.into())).await;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        // Client closed connection
                        return;
                    }
                    Some(Err(_)) | None => {
                        // Client disconnected or error
                        return;
                    }
                    _ => {
                        // Ignore other message types (binary, ping, pong)
                    }
                }
            }
        }
    }
}
