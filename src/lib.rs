//! Guided "Find Your Why" coaching sessions backed by a streaming chat API.
//!
//! The core is [`coach::CoachSession`]: it gates crisis messages, composes
//! phase-aware prompts, streams the model's answer into the transcript held by
//! [`session::SessionStore`] and advances the [`phase::Phase`] machine after
//! each completed turn.

pub mod chat;
pub mod coach;
pub mod config;
pub mod constants;
pub mod crisis;
pub mod error;
pub mod events;
pub mod model_client;
pub mod phase;
pub mod phase_machine;
pub mod prompts;
pub mod session;

pub use coach::{CoachSession, TurnOutcome};
pub use config::CoachConfig;
pub use error::{CoachError, Result};
pub use events::SessionEvent;
pub use model_client::{ChatBackend, ChatRequest, HttpChatBackend, ModelInfo, SamplingParams};
pub use phase::Phase;
pub use session::{ChatMessage, Sender, SessionData, SessionSnapshot, SessionStore, Snapshot};
