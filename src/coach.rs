//! Turn orchestration: crisis gate, prompt composition, streamed model call,
//! incremental message updates and the post-turn phase update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CoachConfig;
use crate::crisis::{self, CRISIS_RESPONSE};
use crate::error::{CoachError, Result};
use crate::events::SessionEvent;
use crate::model_client::{ChatBackend, ChatRequest, ModelInfo, SamplingParams};
use crate::phase::Phase;
use crate::prompts::{self, INITIAL_GREETING};
use crate::session::{ChatMessage, SessionSnapshot, SessionStore, SESSION_START};

/// Appended to a coach message when the user stops generation.
pub const STOPPED_MARKER: &str = " [Stopped]";

const FRAGMENT_BUFFER: usize = 64;

/// How a turn ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Session-start turn: the fixed greeting was posted.
    Greeted,
    /// Crisis keywords found; the crisis response was posted and the phase left alone.
    Crisis,
    /// The model response finished and the phase machine ran.
    Completed { phase_changed: bool },
    /// Generation was stopped by the user.
    Stopped,
}

enum StreamEnd {
    Finished,
    Cancelled,
}

/// Releases the single-flight flag when the turn ends, however it ends.
struct TurnGuard<'a>(&'a AtomicBool);

impl<'a> TurnGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| TurnGuard(flag))
            .map_err(|_| CoachError::TurnInFlight)
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One coaching session bound to a chat backend.
pub struct CoachSession<B: ChatBackend> {
    backend: B,
    store: Arc<SessionStore>,
    params: SamplingParams,
    preferred_model: Option<String>,
    models: Mutex<Vec<ModelInfo>>,
    selected: Mutex<Option<ModelInfo>>,
    active_turn: Mutex<Option<CancellationToken>>,
    in_flight: AtomicBool,
}

impl<B: ChatBackend> CoachSession<B> {
    pub fn new(backend: B, config: &CoachConfig) -> Self {
        Self {
            backend,
            store: Arc::new(SessionStore::new()),
            params: SamplingParams {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
            preferred_model: config.preferred_model.clone(),
            models: Mutex::new(Vec::new()),
            selected: Mutex::new(None),
            active_turn: Mutex::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> Arc<SessionStore> {
        Arc::clone(&self.store)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.store.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot().await
    }

    pub async fn clear_error(&self) {
        self.store.clear_error().await;
    }

    pub fn is_generating(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn models(&self) -> Vec<ModelInfo> {
        self.models.lock().await.clone()
    }

    pub async fn selected_model(&self) -> Option<ModelInfo> {
        self.selected.lock().await.clone()
    }

    /// Fetches the model list and keeps (or picks) a selection.
    ///
    /// An empty list is not an error, but it records the user-facing message
    /// that blocks [`start_session`](Self::start_session).
    pub async fn load_models(&self) -> Result<Vec<ModelInfo>> {
        let models = match self.backend.list_models().await {
            Ok(models) => models,
            Err(e) => {
                error!("Error loading models: {}", e);
                self.store.set_error("Failed to load AI models").await;
                return Err(e);
            }
        };

        let selection = {
            let current = self.selected.lock().await.clone();
            let still_listed = current.filter(|model| models.contains(model));
            let preferred = self.preferred_model.as_deref().and_then(|name| {
                let found = models.iter().find(|m| m.name == name).cloned();
                if found.is_none() {
                    warn!(model = name, "Preferred model not offered by the API");
                }
                found
            });
            still_listed.or(preferred).or_else(|| models.first().cloned())
        };

        *self.models.lock().await = models.clone();
        *self.selected.lock().await = selection.clone();
        info!(
            count = models.len(),
            selected = selection.as_ref().map(|m| m.name.as_str()).unwrap_or("none"),
            "Models loaded"
        );
        self.store.emit(SessionEvent::ModelsLoaded { count: models.len() });

        if models.is_empty() {
            self.store.set_error(CoachError::NoModelsAvailable.to_string()).await;
        }
        Ok(models)
    }

    pub async fn select_model(&self, name: &str) -> Result<ModelInfo> {
        let model = self
            .models
            .lock()
            .await
            .iter()
            .find(|m| m.name == name)
            .cloned()
            .ok_or_else(|| CoachError::UnknownModel(name.to_string()))?;
        *self.selected.lock().await = Some(model.clone());
        info!(model = %model.name, "Model selected");
        Ok(model)
    }

    /// Resets the session and posts the greeting.
    pub async fn start_session(&self) -> Result<TurnOutcome> {
        if self.selected_model().await.is_none() {
            let first = self.models.lock().await.first().cloned();
            match first {
                Some(model) => *self.selected.lock().await = Some(model),
                None => {
                    let e = CoachError::NoModelsAvailable;
                    self.store.set_error(e.to_string()).await;
                    return Err(e);
                }
            }
        }

        let _guard = TurnGuard::acquire(&self.in_flight)?;
        self.store.reset().await;
        info!("Starting Why Discovery session");
        self.run_turn(SESSION_START).await
    }

    /// Sends one user message and streams the coach's answer into the transcript.
    ///
    /// Only one turn may run at a time; a concurrent call gets
    /// [`CoachError::TurnInFlight`].
    pub async fn send_turn(&self, user_text: &str) -> Result<TurnOutcome> {
        let _guard = TurnGuard::acquire(&self.in_flight)?;
        self.run_turn(user_text).await
    }

    /// Asks the in-flight turn, if any, to stop. Returns whether a turn was signalled.
    pub async fn stop_generation(&self) -> bool {
        match self.active_turn.lock().await.as_ref() {
            Some(token) => {
                info!("Stopping generation");
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn run_turn(&self, user_text: &str) -> Result<TurnOutcome> {
        let model = self.selected_model().await.ok_or(CoachError::NoModelSelected)?;

        let before = self.store.snapshot().await;
        let sent_phase = before.phase;

        if user_text == SESSION_START {
            self.store
                .push_message(ChatMessage::coach(INITIAL_GREETING, sent_phase))
                .await;
            return Ok(TurnOutcome::Greeted);
        }

        // Registered before the turn becomes visible so an early stop is never lost.
        let cancel = CancellationToken::new();
        *self.active_turn.lock().await = Some(cancel.clone());
        let outcome = self.respond(user_text, model, before, &cancel).await;
        *self.active_turn.lock().await = None;
        outcome
    }

    async fn respond(
        &self,
        user_text: &str,
        model: ModelInfo,
        before: SessionSnapshot,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let sent_phase = before.phase;
        self.store
            .push_message(ChatMessage::user(user_text, sent_phase))
            .await;
        let coach_id = self
            .store
            .push_message(ChatMessage::coach_placeholder(sent_phase))
            .await;

        if let Some(keyword) = crisis::matched_crisis_keyword(user_text) {
            warn!(keyword, "Crisis signal detected, skipping model call");
            self.store.replace_content(&coach_id, CRISIS_RESPONSE).await;
            self.store.finalize_message(&coach_id, None, false).await;
            return Ok(TurnOutcome::Crisis);
        }

        let messages = prompts::build_messages(sent_phase, &before.data, &before.history(), Some(user_text));
        debug!(phase = %sent_phase, count = messages.len(), "Composed coach prompt");
        let request = ChatRequest {
            model,
            messages,
            params: self.params,
        };

        let streamed = self.stream_into(&coach_id, request, cancel).await;

        match streamed {
            Ok(StreamEnd::Finished) => {
                self.store.finalize_message(&coach_id, None, false).await;
                let outcome = self.store.advance_phase(sent_phase, user_text).await;
                let phase_changed = outcome.is_some_and(|o| o.phase != sent_phase);
                Ok(TurnOutcome::Completed { phase_changed })
            }
            Ok(StreamEnd::Cancelled) => {
                self.store
                    .finalize_message(&coach_id, Some(STOPPED_MARKER), false)
                    .await;
                info!(phase = %sent_phase, "Coach response stopped by user");
                Ok(TurnOutcome::Stopped)
            }
            Err(e) => {
                warn!(error = %e, "Coach turn failed");
                self.store.finalize_message(&coach_id, None, true).await;
                self.store.set_error(format!("Error: {}", e)).await;
                Err(e)
            }
        }
    }

    /// Drives the backend call, appending fragments to message `id` in arrival order.
    async fn stream_into(&self, id: &str, request: ChatRequest, cancel: &CancellationToken) -> Result<StreamEnd> {
        if cancel.is_cancelled() {
            debug!("Stopped before the model was called");
            return Ok(StreamEnd::Cancelled);
        }
        let (tx, mut rx) = mpsc::channel::<String>(FRAGMENT_BUFFER);
        let call = self.backend.stream_chat(request, tx, cancel.clone());
        tokio::pin!(call);

        let mut call_result: Option<Result<()>> = None;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fragment = rx.recv() => match fragment {
                    Some(text) => {
                        self.store.append_fragment(id, &text).await;
                    }
                    None => break,
                },
                result = &mut call, if call_result.is_none() => call_result = Some(result),
            }
        }
        // Anything still queued after a stop is discarded.
        drop(rx);

        let result = match call_result {
            Some(result) => result,
            None => (&mut call).await,
        };

        if cancel.is_cancelled() {
            if let Err(e) = result {
                debug!(error = %e, "Backend reported an error after stop");
            }
            return Ok(StreamEnd::Cancelled);
        }
        result.map(|()| StreamEnd::Finished)
    }

    /// Phase the session is currently in.
    pub async fn phase(&self) -> Phase {
        self.store.phase().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoBackend {
        models: Vec<ModelInfo>,
    }

    fn model(name: &str) -> ModelInfo {
        ModelInfo {
            name: name.to_string(),
            provider: "ollama".to_string(),
            provider_id: "ollama_servers_settings".to_string(),
            server_name: "Local".to_string(),
            server_id: "local".to_string(),
        }
    }

    #[async_trait]
    impl ChatBackend for EchoBackend {
        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(self.models.clone())
        }

        async fn stream_chat(
            &self,
            request: ChatRequest,
            fragments: mpsc::Sender<String>,
            _cancel: CancellationToken,
        ) -> Result<()> {
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let _ = fragments.send(format!("echo: {}", last)).await;
            Ok(())
        }
    }

    fn session(models: Vec<ModelInfo>) -> CoachSession<EchoBackend> {
        CoachSession::new(EchoBackend { models }, &CoachConfig::default())
    }

    #[tokio::test]
    async fn test_turn_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = TurnGuard::acquire(&flag).unwrap();
        assert!(matches!(TurnGuard::acquire(&flag), Err(CoachError::TurnInFlight)));
        drop(guard);
        assert!(TurnGuard::acquire(&flag).is_ok());
    }

    #[tokio::test]
    async fn test_send_without_model_leaves_state_untouched() {
        let coach = session(vec![]);
        let err = coach.send_turn("hello").await.unwrap_err();
        assert!(matches!(err, CoachError::NoModelSelected));
        let snapshot = coach.snapshot().await;
        assert!(snapshot.messages.is_empty());
        assert!(!coach.is_generating());
    }

    #[tokio::test]
    async fn test_preferred_model_wins_over_first() {
        let config = CoachConfig::default().with_preferred_model("b");
        let coach = CoachSession::new(
            EchoBackend {
                models: vec![model("a"), model("b")],
            },
            &config,
        );
        coach.load_models().await.unwrap();
        assert_eq!(coach.selected_model().await.unwrap().name, "b");
        assert!(matches!(coach.select_model("zzz").await, Err(CoachError::UnknownModel(_))));
        assert_eq!(coach.select_model("a").await.unwrap().name, "a");
    }

    #[tokio::test]
    async fn test_echo_turn_streams_into_placeholder() {
        let coach = session(vec![model("a")]);
        coach.load_models().await.unwrap();
        coach.start_session().await.unwrap();

        let outcome = coach.send_turn("hi coach").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Completed { phase_changed: true });

        let snapshot = coach.snapshot().await;
        let reply = snapshot.last_coach_message().unwrap();
        assert_eq!(reply.content, "echo: hi coach");
        assert!(!reply.streaming);
        assert_eq!(reply.phase, Phase::Intro);
        assert_eq!(snapshot.phase, Phase::Snapshot);
        assert!(!coach.stop_generation().await);
    }
}
