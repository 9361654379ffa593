//! WebSocket signaling surface.
//!
//! Each socket is one participant. The participant id is assigned on connect
//! and announced with `welcome`; every request on that socket acts as that
//! participant. Requests are JSON objects tagged by `type`:
//!
//! ```json
//! {"type": "join_room", "roomId": "...", "displayName": "Bob"}
//! {"type": "signal", "targetId": "...", "kind": "offer", "payload": {...}}
//! ```
//!
//! Room events come back as `{"type": "event", "event": "...", ...}`.
//! A rejected request is answered with `{"type": "error", "code", "message"}`.

use crate::admin::AdminAction;
use crate::coordinator::Coordinator;
use crate::errors::{DeliveryError, MeshError};
use crate::events::{EventSink, RoomEvent};
use crate::link::SignalKind;
use crate::substitution::SubstitutionReport;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use common::types::{MediaKind, ParticipantId, RoomId, SourceToken};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

/// Error code sent for a message that does not parse.
const MALFORMED_REQUEST_CODE: i32 = 1;

/// Request from a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    CreateRoom {
        name: String,
        #[serde(default)]
        display_name: String,
    },
    JoinRoom {
        room_id: RoomId,
        #[serde(default)]
        display_name: String,
    },
    LeaveRoom,
    Signal {
        target_id: ParticipantId,
        kind: SignalKind,
        #[serde(default)]
        payload: serde_json::Value,
    },
    ReplaceSource {
        source_token: SourceToken,
    },
    RestoreSource,
    SetPrimarySource {
        source_token: SourceToken,
    },
    AdminAction {
        target_id: ParticipantId,
        kind: AdminAction,
    },
    SelfMute {
        kind: MediaKind,
        muted: bool,
    },
    RequestMic,
    /// Shorthand for an `admin_action` of kind `grant_mic`.
    GrantMic {
        target_id: ParticipantId,
    },
    LinkFailed {
        peer_id: ParticipantId,
    },
    EndRoom,
}

impl ClientMessage {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientMessage::CreateRoom { .. } => "create_room",
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::LeaveRoom => "leave_room",
            ClientMessage::Signal { .. } => "signal",
            ClientMessage::ReplaceSource { .. } => "replace_source",
            ClientMessage::RestoreSource => "restore_source",
            ClientMessage::SetPrimarySource { .. } => "set_primary_source",
            ClientMessage::AdminAction { .. } => "admin_action",
            ClientMessage::SelfMute { .. } => "self_mute",
            ClientMessage::RequestMic => "request_mic",
            ClientMessage::GrantMic { .. } => "grant_mic",
            ClientMessage::LinkFailed { .. } => "link_failed",
            ClientMessage::EndRoom => "end_room",
        }
    }
}

/// Message to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        participant_id: ParticipantId,
    },
    Event(RoomEvent),
    SubstitutionReport(SubstitutionReport),
    Error {
        request: &'static str,
        code: i32,
        message: String,
    },
}

impl ServerMessage {
    fn rejected(request: &'static str, error: &MeshError) -> Self {
        ServerMessage::Error {
            request,
            code: error.error_code(),
            message: error.client_message(),
        }
    }
}

/// Open sockets by participant. This is the coordinator's [`EventSink`].
#[derive(Debug, Default)]
pub struct WsSessions {
    sessions: RwLock<HashMap<ParticipantId, mpsc::UnboundedSender<ServerMessage>>>,
}

impl WsSessions {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(
        &self,
        participant_id: ParticipantId,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) {
        self.sessions.write().await.insert(participant_id, sender);
    }

    pub async fn unregister(&self, participant_id: ParticipantId) {
        self.sessions.write().await.remove(&participant_id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl EventSink for WsSessions {
    async fn deliver(&self, to: ParticipantId, event: RoomEvent) -> Result<(), DeliveryError> {
        let sessions = self.sessions.read().await;
        let sender = sessions.get(&to).ok_or(DeliveryError::NoChannel)?;
        sender
            .send(ServerMessage::Event(event))
            .map_err(|_| DeliveryError::Closed)
    }
}

/// Shared state for the signaling router.
#[derive(Clone)]
pub struct WsState {
    pub coordinator: Arc<Coordinator>,
    pub sessions: Arc<WsSessions>,
}

/// Router serving the signaling socket at `/ws`.
pub fn signaling_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    let participant_id = ParticipantId::new();
    ws.on_upgrade(move |socket| handle_socket(socket, participant_id, state))
}

#[instrument(skip_all, name = "mesh.ws", fields(participant_id = %participant_id))]
async fn handle_socket(socket: WebSocket, participant_id: ParticipantId, state: WsState) {
    info!(target: "mesh.ws", participant_id = %participant_id, "Signaling socket opened");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    state.sessions.register(participant_id, tx.clone()).await;
    let _ = tx.send(ServerMessage::Welcome { participant_id });

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(target: "mesh.ws", error = %e, "Failed to encode server message");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let coordinator = Arc::clone(&state.coordinator);
        async move {
            while let Some(Ok(message)) = receiver.next().await {
                match message {
                    Message::Text(text) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(request) => dispatch(&coordinator, participant_id, request).await,
                            Err(e) => {
                                debug!(
                                    target: "mesh.ws",
                                    participant_id = %participant_id,
                                    error = %e,
                                    "Malformed client message"
                                );
                                Some(ServerMessage::Error {
                                    request: "unknown",
                                    code: MALFORMED_REQUEST_CODE,
                                    message: "Malformed message".to_string(),
                                })
                            }
                        };
                        if let Some(reply) = reply {
                            if tx.send(reply).is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    match state.coordinator.disconnect(participant_id).await {
        Ok(()) | Err(MeshError::ParticipantNotFound(_) | MeshError::RoomNotFound(_)) => {}
        Err(e) => {
            warn!(
                target: "mesh.ws",
                participant_id = %participant_id,
                error = %e,
                "Failed to remove disconnected participant"
            );
        }
    }
    state.sessions.unregister(participant_id).await;

    info!(target: "mesh.ws", participant_id = %participant_id, "Signaling socket closed");
}

/// Apply one request as `participant_id`. Returns the direct reply, if any.
///
/// Successful requests are mostly answered by room events; only a
/// substitution report or an error goes straight back.
pub async fn dispatch(
    coordinator: &Coordinator,
    participant_id: ParticipantId,
    request: ClientMessage,
) -> Option<ServerMessage> {
    let name = request.name();

    let result = match request {
        ClientMessage::CreateRoom { name, display_name } => coordinator
            .create_room(participant_id, display_name, &name)
            .await
            .map(|_| None),
        ClientMessage::JoinRoom {
            room_id,
            display_name,
        } => coordinator
            .join_room(participant_id, display_name, room_id)
            .await
            .map(|_| None),
        ClientMessage::LeaveRoom => coordinator.leave_room(participant_id).await.map(|()| None),
        ClientMessage::Signal {
            target_id,
            kind,
            payload,
        } => coordinator
            .signal(participant_id, target_id, kind, payload)
            .await
            .map(|()| None),
        ClientMessage::ReplaceSource { source_token } => coordinator
            .replace_source(participant_id, source_token)
            .await
            .map(|report| Some(ServerMessage::SubstitutionReport(report))),
        ClientMessage::RestoreSource => coordinator
            .restore_source(participant_id)
            .await
            .map(|report| Some(ServerMessage::SubstitutionReport(report))),
        ClientMessage::SetPrimarySource { source_token } => coordinator
            .set_primary_source(participant_id, source_token)
            .await
            .map(|report| Some(ServerMessage::SubstitutionReport(report))),
        ClientMessage::AdminAction { target_id, kind } => coordinator
            .admin_action(participant_id, target_id, kind)
            .await
            .map(|()| None),
        ClientMessage::SelfMute { kind, muted } => coordinator
            .self_mute(participant_id, kind, muted)
            .await
            .map(|()| None),
        ClientMessage::RequestMic => coordinator.request_mic(participant_id).await.map(|()| None),
        ClientMessage::GrantMic { target_id } => coordinator
            .admin_action(participant_id, target_id, AdminAction::GrantMic)
            .await
            .map(|()| None),
        ClientMessage::LinkFailed { peer_id } => coordinator
            .report_link_failure(participant_id, peer_id)
            .await
            .map(|()| None),
        ClientMessage::EndRoom => coordinator.end_room(participant_id).await.map(|()| None),
    };

    match result {
        Ok(reply) => reply,
        Err(e) => {
            debug!(
                target: "mesh.ws",
                participant_id = %participant_id,
                request = name,
                error = %e,
                "Request rejected"
            );
            Some(ServerMessage::rejected(name, &e))
        }
    }
}
