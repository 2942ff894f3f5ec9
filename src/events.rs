use crate::phase::Phase;
use crate::session::Sender;

/// State-change notifications emitted by the session store after each mutation.
///
/// Hosts subscribe through [`crate::session::SessionStore::subscribe`] and
/// re-read a snapshot (or render the carried fragment directly).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SessionStarted,
    /// Carries the message as it was when pushed, so renderers never race later fragments.
    MessageAdded {
        id: String,
        sender: Sender,
        streaming: bool,
        content: String,
    },
    FragmentAppended { id: String, fragment: String },
    MessageFinalized { id: String },
    PhaseChanged { from: Phase, to: Phase },
    SessionDataUpdated,
    ModelsLoaded { count: usize },
    Error { message: String },
    ErrorCleared,
}
