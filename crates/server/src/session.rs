//! WebSocket progress sessions.
//!
//! Session protocol:
//!   1. The first client message must be `{"type":"auth","api_key"}`;
//!      anything else gets an error and the session closes.
//!   2. After auth, the client sends `{"type":"monitor",...}` to follow
//!      one job. Monitoring blocks the session until the terminal
//!      update; every update is forwarded as
//!      `{"type":"progress","data":{...}}`.
//!   3. `{"type":"ping"}` gets `{"type":"pong"}`. Any other message
//!      gets an error response without closing the session.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{json, Value};

use forge_orchestrator::MonitorRequest;

use crate::state::AppState;

/// Messages a client may send over the session socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Auth {
        api_key: String,
    },
    Monitor {
        prompt_id: String,
        workflow_id: String,
        #[serde(default)]
        workflow_name: String,
        #[serde(default)]
        prompt: String,
        #[serde(default = "default_save")]
        save_to_disk: bool,
    },
    Ping,
}

fn default_save() -> bool {
    true
}

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

/// Drive one session from auth to disconnect.
async fn handle_session(mut socket: WebSocket, state: AppState) {
    let Some(user_id) = authenticate(&mut socket, &state).await else {
        return;
    };
    tracing::info!(user_id, "WebSocket session authenticated");

    while let Some(result) = socket.recv().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Monitor {
                prompt_id,
                workflow_id,
                workflow_name,
                prompt,
                save_to_disk,
            }) => {
                let request = MonitorRequest {
                    workflow_id,
                    workflow_name,
                    prompt,
                    user_id: user_id.clone(),
                    save_outputs: save_to_disk,
                };
                if !forward_progress(&mut socket, &state, &prompt_id, request).await {
                    break;
                }
            }
            Ok(ClientMessage::Ping) => {
                if !send_json(&mut socket, &json!({ "type": "pong" })).await {
                    break;
                }
            }
            Ok(ClientMessage::Auth { .. }) => {
                if !send_error(&mut socket, "Already authenticated").await {
                    break;
                }
            }
            Err(_) => {
                // Unknown message types are an error response, not a
                // disconnect.
                if !send_error(&mut socket, "Unknown message type").await {
                    break;
                }
            }
        }
    }

    tracing::info!(user_id, "WebSocket session closed");
}

/// First-message auth gate. Returns the user ID, or `None` after
/// closing the session.
async fn authenticate(socket: &mut WebSocket, state: &AppState) -> Option<String> {
    let text = match socket.recv().await? {
        Ok(Message::Text(text)) => text,
        _ => {
            let _ = send_error(socket, "First message must be auth").await;
            return None;
        }
    };

    let api_key = match serde_json::from_str::<ClientMessage>(&text) {
        Ok(ClientMessage::Auth { api_key }) => api_key,
        _ => {
            let _ = send_error(socket, "First message must be auth").await;
            return None;
        }
    };

    match state.api_keys.validate(&api_key) {
        Some(user_id) => {
            let user_id = user_id.to_string();
            if !send_json(socket, &json!({ "type": "auth_ok" })).await {
                return None;
            }
            Some(user_id)
        }
        None => {
            tracing::warn!("WebSocket auth failed: invalid API key");
            let _ = send_error(socket, "Invalid API key").await;
            None
        }
    }
}

/// Forward one job's updates until the terminal one. Returns `false`
/// when the socket is gone.
async fn forward_progress(
    socket: &mut WebSocket,
    state: &AppState,
    prompt_id: &str,
    request: MonitorRequest,
) -> bool {
    let mut monitor = state.service.monitor(prompt_id, request);
    while let Some(update) = monitor.next_update().await {
        let body = json!({ "type": "progress", "data": update });
        if !send_json(socket, &body).await {
            return false;
        }
    }
    true
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> bool {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .is_ok()
}

async fn send_error(socket: &mut WebSocket, message: &str) -> bool {
    send_json(socket, &json!({ "type": "error", "message": message })).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_auth_message() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"auth","api_key":"key-abc"}"#).unwrap();
        assert_matches!(msg, ClientMessage::Auth { api_key } if api_key == "key-abc");
    }

    #[test]
    fn parses_monitor_with_defaults() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"monitor","prompt_id":"p1","workflow_id":"wf-1"}"#,
        )
        .unwrap();
        assert_matches!(
            msg,
            ClientMessage::Monitor { prompt_id, save_to_disk: true, .. } if prompt_id == "p1"
        );
    }

    #[test]
    fn parses_monitor_opting_out_of_saving() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"monitor","prompt_id":"p1","workflow_id":"wf-1","save_to_disk":false}"#,
        )
        .unwrap();
        assert_matches!(msg, ClientMessage::Monitor { save_to_disk: false, .. });
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
    }
}
