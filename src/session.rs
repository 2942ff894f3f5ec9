use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::events::SessionEvent;
use crate::phase::Phase;
use crate::phase_machine::{self, PhaseOutcome};

/// Reserved input that begins a session instead of carrying a user utterance.
pub const SESSION_START: &str = "START_SESSION";

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Coach,
}

/// Structured picture of the user's current situation. Filled by the model, not by heuristics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub current_role: String,
    pub likes: Vec<String>,
    pub dislikes: Vec<String>,
    pub desired_change: String,
}

/// Everything collected about the user during one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub energizers: Vec<String>,
    pub drainers: Vec<String>,
    pub stories: Vec<String>,
    pub patterns: Vec<String>,
    pub why_statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub streaming: bool,
    pub failed: bool,
    pub phase: Phase,
}

impl ChatMessage {
    fn new(sender: Sender, content: String, streaming: bool, phase: Phase) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            sender,
            content,
            timestamp: Utc::now(),
            streaming,
            failed: false,
            phase,
        }
    }

    pub fn user(content: impl Into<String>, phase: Phase) -> Self {
        Self::new(Sender::User, content.into(), false, phase)
    }

    /// A finished coach message, used for scripted replies.
    pub fn coach(content: impl Into<String>, phase: Phase) -> Self {
        Self::new(Sender::Coach, content.into(), false, phase)
    }

    /// Empty coach message that fragments are streamed into.
    pub fn coach_placeholder(phase: Phase) -> Self {
        Self::new(Sender::Coach, String::new(), true, phase)
    }
}

/// Read-only `{sender, content}` projection of a transcript message used as model input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub sender: Sender,
    pub content: String,
}

impl From<&ChatMessage> for HistoryEntry {
    fn from(message: &ChatMessage) -> Self {
        Self {
            sender: message.sender,
            content: message.content.clone(),
        }
    }
}

/// Consistent copy of the whole session aggregate.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub started: bool,
    pub phase: Phase,
    pub data: SessionData,
    pub messages: Vec<ChatMessage>,
    pub error: Option<String>,
}

impl SessionSnapshot {
    /// Transcript messages of either sender tagged with `phase`.
    pub fn messages_in_phase(&self, phase: Phase) -> usize {
        self.messages.iter().filter(|m| m.phase == phase).count()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages.iter().map(HistoryEntry::from).collect()
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last_coach_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.sender == Sender::Coach)
    }
}

/// In-memory owner of the transcript and session data.
///
/// A single mutex guards the whole aggregate so every read-modify-write is
/// atomic with respect to snapshot readers. Each mutation is followed by a
/// [`SessionEvent`].
pub struct SessionStore {
    state: Mutex<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(SessionSnapshot::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is a normal state for a headless session.
        let _ = self.events.send(event);
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.clone()
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    /// Clears messages and data and rewinds to `Intro`.
    pub async fn reset(&self) {
        {
            let mut state = self.state.lock().await;
            *state = SessionSnapshot {
                started: true,
                ..SessionSnapshot::default()
            };
        }
        tracing::info!("Session reset to intro");
        self.emit(SessionEvent::SessionStarted);
    }

    /// Appends a message and returns its id.
    pub async fn push_message(&self, message: ChatMessage) -> String {
        let id = message.id.clone();
        let added = SessionEvent::MessageAdded {
            id: id.clone(),
            sender: message.sender,
            streaming: message.streaming,
            content: message.content.clone(),
        };
        self.state.lock().await.messages.push(message);
        self.emit(added);
        id
    }

    /// Appends a streamed fragment to a message. Returns false if the id is unknown.
    pub async fn append_fragment(&self, id: &str, fragment: &str) -> bool {
        let found = {
            let mut state = self.state.lock().await;
            match state.messages.iter_mut().find(|m| m.id == id) {
                Some(message) => {
                    message.content.push_str(fragment);
                    true
                }
                None => false,
            }
        };
        if found {
            self.emit(SessionEvent::FragmentAppended {
                id: id.to_string(),
                fragment: fragment.to_string(),
            });
        } else {
            tracing::warn!(%id, "Dropping fragment for unknown message");
        }
        found
    }

    pub async fn replace_content(&self, id: &str, content: &str) {
        {
            let mut state = self.state.lock().await;
            if let Some(message) = state.messages.iter_mut().find(|m| m.id == id) {
                message.content = content.to_string();
            }
        }
        self.emit(SessionEvent::FragmentAppended {
            id: id.to_string(),
            fragment: content.to_string(),
        });
    }

    /// Marks a message as no longer streaming, optionally appending a suffix first.
    pub async fn finalize_message(&self, id: &str, suffix: Option<&str>, failed: bool) {
        {
            let mut state = self.state.lock().await;
            if let Some(message) = state.messages.iter_mut().find(|m| m.id == id) {
                if let Some(suffix) = suffix {
                    message.content.push_str(suffix);
                }
                message.streaming = false;
                message.failed = failed;
            }
        }
        if let Some(suffix) = suffix {
            self.emit(SessionEvent::FragmentAppended {
                id: id.to_string(),
                fragment: suffix.to_string(),
            });
        }
        self.emit(SessionEvent::MessageFinalized { id: id.to_string() });
    }

    /// Runs the phase machine for a completed turn and applies its outcome.
    ///
    /// `sent_phase` is the phase that was active when the user sent the message;
    /// message counting is done against it. If the session moved on in the
    /// meantime (e.g. it was restarted) nothing is applied.
    pub async fn advance_phase(&self, sent_phase: Phase, user_message: &str) -> Option<PhaseOutcome> {
        let (outcome, from) = {
            let mut state = self.state.lock().await;
            if state.phase != sent_phase {
                tracing::debug!(current = %state.phase, %sent_phase, "Phase moved during turn, skipping advance");
                return None;
            }
            let count = state.messages_in_phase(sent_phase);
            let outcome = phase_machine::advance(sent_phase, &state.data, user_message, count);
            if outcome.changed {
                state.phase = outcome.phase;
                state.data = outcome.session_data.clone();
            }
            (outcome, sent_phase)
        };

        if outcome.changed {
            self.emit(SessionEvent::SessionDataUpdated);
            if outcome.phase != from {
                tracing::info!(%from, to = %outcome.phase, "Phase advanced");
                self.emit(SessionEvent::PhaseChanged {
                    from,
                    to: outcome.phase,
                });
            }
        }
        Some(outcome)
    }

    pub async fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.state.lock().await.error = Some(message.clone());
        self.emit(SessionEvent::Error { message });
    }

    pub async fn clear_error(&self) {
        self.state.lock().await.error = None;
        self.emit(SessionEvent::ErrorCleared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let store = SessionStore::new();
        store.push_message(ChatMessage::user("hi", Phase::Intro)).await;
        store.set_error("boom").await;
        store.reset().await;

        let snapshot = store.snapshot().await;
        assert!(snapshot.started);
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.phase, Phase::Intro);
        assert_eq!(snapshot.data, SessionData::default());
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_fragments_append_in_order() {
        let store = SessionStore::new();
        let id = store.push_message(ChatMessage::coach_placeholder(Phase::Intro)).await;
        assert!(store.append_fragment(&id, "Hel").await);
        assert!(store.append_fragment(&id, "lo").await);
        assert!(!store.append_fragment("missing", "x").await);
        store.finalize_message(&id, None, false).await;

        let snapshot = store.snapshot().await;
        let message = snapshot.message(&id).unwrap();
        assert_eq!(message.content, "Hello");
        assert!(!message.streaming);
        assert!(!message.failed);
    }

    #[tokio::test]
    async fn test_finalize_with_suffix_marks_failed() {
        let store = SessionStore::new();
        let id = store.push_message(ChatMessage::coach_placeholder(Phase::Intro)).await;
        store.append_fragment(&id, "partial").await;
        store.finalize_message(&id, Some(" [Stopped]"), true).await;

        let snapshot = store.snapshot().await;
        let message = snapshot.message(&id).unwrap();
        assert_eq!(message.content, "partial [Stopped]");
        assert!(message.failed);
    }

    #[tokio::test]
    async fn test_events_follow_mutations() {
        let store = SessionStore::new();
        let mut rx = store.subscribe();
        let id = store.push_message(ChatMessage::coach_placeholder(Phase::Intro)).await;
        store.append_fragment(&id, "a").await;
        store.finalize_message(&id, None, false).await;

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::MessageAdded {
                id: id.clone(),
                sender: Sender::Coach,
                streaming: true,
                content: String::new(),
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::FragmentAppended {
                id: id.clone(),
                fragment: "a".to_string()
            }
        );
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::MessageFinalized { id });
    }

    #[tokio::test]
    async fn test_advance_counts_messages_of_sent_phase() {
        let store = SessionStore::new();
        store.reset().await;
        store.push_message(ChatMessage::coach("greeting", Phase::Intro)).await;
        store.push_message(ChatMessage::user("hello", Phase::Intro)).await;

        let outcome = store.advance_phase(Phase::Intro, "hello").await.unwrap();
        assert!(outcome.changed);
        assert_eq!(store.phase().await, Phase::Snapshot);

        // The session is no longer in intro, so a stale advance is ignored.
        assert!(store.advance_phase(Phase::Intro, "hello").await.is_none());
    }

    #[test]
    fn test_session_data_serializes_camel_case() {
        let data = SessionData {
            why_statement: "To help so that others grow".to_string(),
            ..SessionData::default()
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["whyStatement"], "To help so that others grow");
        assert!(json.get("snapshot").is_none());
    }

    #[test]
    fn test_history_projection() {
        let snapshot = SessionSnapshot {
            messages: vec![
                ChatMessage::coach("hi", Phase::Intro),
                ChatMessage::user("hey", Phase::Intro),
            ],
            ..SessionSnapshot::default()
        };
        let history = snapshot.history();
        assert_eq!(history[0].sender, Sender::Coach);
        assert_eq!(history[1].content, "hey");
        assert_eq!(snapshot.messages_in_phase(Phase::Intro), 2);
        assert_eq!(snapshot.messages_in_phase(Phase::Snapshot), 0);
    }
}
