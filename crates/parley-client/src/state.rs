//! Session view state and its reducer.
//!
//! Every action produces a new [`ClientState`]; snapshots already handed
//! out are never mutated. Actions that do not apply to the current state
//! (sending before a session exists, for instance) return an unchanged
//! snapshot with the same `version`.

use parley_types::Role;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Transport status shown by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// One line of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Server message id, or a client-generated id while `pending`.
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Sent by the user but not yet answered.
    #[serde(default)]
    pub pending: bool,
}

/// Immutable snapshot of the session view.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientState {
    pub session_id: Option<String>,
    pub messages: Arc<[ChatEntry]>,
    /// The assistant is composing a reply.
    pub is_typing: bool,
    pub connection: ConnectionStatus,
    /// Incremented by every applied action.
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Binds a fresh session and clears the transcript.
    CreateSession { session_id: String },
    /// Appends the user's message as pending.
    SendMessage { local_id: String, content: String },
    /// Appends a message from the server and settles pending user messages.
    ReceiveMessage(ChatEntry),
    SetTyping(bool),
    SetConnectionStatus(ConnectionStatus),
    /// Back to the initial state; the connection status is kept.
    Reset,
}

impl ClientState {
    fn next(&self) -> Self {
        Self {
            version: self.version + 1,
            ..self.clone()
        }
    }

    fn with_message(&self, entry: ChatEntry) -> Arc<[ChatEntry]> {
        let mut messages = self.messages.to_vec();
        messages.push(entry);
        messages.into()
    }

    pub fn has_pending(&self) -> bool {
        self.messages.iter().any(|m| m.pending)
    }
}

/// Applies `action` to `state`, returning the next snapshot.
pub fn reduce(state: &ClientState, action: Action) -> ClientState {
    match action {
        Action::CreateSession { session_id } => ClientState {
            session_id: Some(session_id),
            messages: Arc::from(Vec::new()),
            is_typing: false,
            ..state.next()
        },
        Action::SendMessage { local_id, content } => {
            if state.session_id.is_none() || content.trim().is_empty() {
                tracing::debug!("ignoring message sent without a session or content");
                return state.clone();
            }
            ClientState {
                messages: state.with_message(ChatEntry {
                    id: local_id,
                    role: Role::User,
                    content,
                    audio_url: None,
                    pending: true,
                }),
                ..state.next()
            }
        }
        Action::ReceiveMessage(entry) => {
            let entry_role = entry.role;
            let mut messages: Vec<ChatEntry> = state
                .messages
                .iter()
                .cloned()
                .map(|mut m| {
                    m.pending = false;
                    m
                })
                .collect();
            messages.push(ChatEntry {
                pending: false,
                ..entry
            });
            // A reply ends the typing indicator; a user turn leaves it alone.
            let is_typing = state.is_typing && entry_role == Role::User;
            ClientState {
                messages: messages.into(),
                is_typing,
                ..state.next()
            }
        }
        Action::SetTyping(typing) => {
            if state.is_typing == typing {
                return state.clone();
            }
            ClientState {
                is_typing: typing,
                ..state.next()
            }
        }
        Action::SetConnectionStatus(connection) => {
            if state.connection == connection {
                return state.clone();
            }
            ClientState {
                connection,
                // A dropped connection will never finish the reply.
                is_typing: state.is_typing && connection == ConnectionStatus::Connected,
                ..state.next()
            }
        }
        Action::Reset => ClientState {
            connection: state.connection,
            version: state.version + 1,
            ..ClientState::default()
        },
    }
}

/// Holds the current snapshot and applies actions in order.
#[derive(Debug, Default)]
pub struct Store {
    current: Arc<ClientState>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<ClientState> {
        self.current.clone()
    }

    pub fn dispatch(&mut self, action: Action) -> Arc<ClientState> {
        let next = reduce(&self.current, action);
        if next.version != self.current.version {
            self.current = Arc::new(next);
        }
        self.current.clone()
    }
}
