//! Push channel for dispatch events.
//!
//! Each connection gets its own broadcast receiver and a session entry that
//! lives exactly as long as the socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use shared::types::Actor;
use shared::DispatchEvent;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::extract::CurrentActor;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user_id: String,
    pub role: &'static str,
    pub connected_at: DateTime<Utc>,
    pub delivered: u64,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, actor: &Actor, now: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(
            id,
            Session {
                user_id: actor.user_id.clone(),
                role: actor.role.name(),
                connected_at: now,
                delivered: 0,
            },
        );
        id
    }

    pub fn record_delivery(&self, id: Uuid) {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.delivered += 1;
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Session> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    pub fn remove(&self, id: Uuid) -> Option<Session> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

pub async fn events_socket(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ws: WebSocketUpgrade,
) -> Response {
    let events = state.events.subscribe();
    let sessions = state.sessions.clone();
    let clock = state.clock.clone();
    ws.on_upgrade(move |socket| async move {
        let session = sessions.register(&actor, clock.now());
        info!(session = %session, role = actor.role.name(), "event stream opened");
        forward_events(socket, events, sessions, session).await
    })
}

async fn forward_events(
    socket: WebSocket,
    mut events: broadcast::Receiver<DispatchEvent>,
    sessions: Arc<SessionRegistry>,
    session: Uuid,
) {
    let (mut sink, mut incoming) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let frame = match serde_json::to_string(&event) {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(session = %session, error = %err, "event not serializable");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                    sessions.record_delivery(session);
                    debug!(session = %session, event = event.name(), "event forwarded");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(session = %session, skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    if let Some(closed) = sessions.remove(session) {
        info!(session = %session, delivered = closed.delivered, "event stream closed");
    }
}
