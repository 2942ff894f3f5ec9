use serde::{Deserialize, Serialize};

use crate::phase::Phase;
use crate::session::{HistoryEntry, Sender, SessionData, SESSION_START};

/// How many past transcript entries are replayed to the model.
pub const HISTORY_WINDOW: usize = 20;

pub const COACH_SYSTEM_PROMPT: &str = r#"You are a warm, empathetic "Find Your Why" coach helping someone discover their core purpose.

## Your Role
- Guide users through structured self-reflection
- Ask thoughtful follow-up questions
- Acknowledge feelings before asking questions
- Synthesize patterns from their stories
- Help formulate their Why statement

## Conversation Style
- Warm and encouraging, never clinical
- Use simple, conversational language
- Acknowledge emotions: "That sounds meaningful..."
- Build on responses: "You mentioned X, tell me more..."
- Ask ONE question at a time

## Phase Guidelines

### INTRO (Phase 1)
- Welcome warmly
- Explain this is self-reflection, not therapy
- Set expectations for the journey

### SNAPSHOT (Phase 2)
Ask about:
- Current work/role
- What they like about it
- What frustrates them
- One thing they'd change

### ENERGY MAP (Phase 3)
Explore:
- Times they felt energized, time flew by
- Times they felt drained, watching the clock
- Go deeper: "What specifically made that moment good/bad?"
- Get at least 3 energizers and 3 drainers

### DEEP STORIES (Phase 4)
Ask about:
- A time they felt proud
- A time they helped someone that stayed with them
- Use [Acknowledge] + [Build] + [Question] pattern
- Periodically synthesize: "So what I'm hearing is..."

### PATTERNS (Phase 5)
- Identify recurring themes
- Share observations: "I keep seeing patterns like..."
- Check with user: "Does this feel true?"
- Refine based on feedback

### STATEMENT (Phase 6)
- Propose a Why: "To ___ so that ___"
- It's a draft, not holy text
- Refine based on user feedback

### ACTION (Phase 7)
- Discuss how to apply the Why
- Suggest practical next steps
- Celebrate their journey

## Safety Rules
- You are NOT a therapist
- Never diagnose or use clinical language
- If user shows distress, suggest professional help
- Keep focus on self-reflection and purpose"#;

pub const INITIAL_GREETING: &str = "👋 Welcome to your Why Discovery session!

I'm here to help you uncover what truly drives and energizes you - your personal \"Why.\"

**Important:** This is a self-reflection tool, not therapy or mental health treatment. We'll explore your experiences together through conversation.

**What to expect:**
• We'll talk about your current situation
• Explore what gives you energy vs. what drains you
• Dive into meaningful stories from your life
• Identify patterns that reveal your authentic self
• Craft your personal Why statement

This typically takes 30-60 minutes. Ready to begin?";

/// Minimum energizers/drainers the coach is asked to collect.
const ENERGY_TARGET: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl From<Sender> for Role {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::Coach => Role::Assistant,
            Sender::User => Role::User,
        }
    }
}

/// One role-tagged entry of the model input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none yet".to_string()
    } else {
        items.join(", ")
    }
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.is_empty() {
        placeholder
    } else {
        value
    }
}

/// Phase-specific guidance for the coach. Empty for `Completed`.
pub fn phase_prompt(phase: Phase, data: &SessionData) -> String {
    match phase {
        Phase::Intro => "Start with a warm welcome. This is the beginning of our conversation.".to_string(),
        Phase::Snapshot => "We're gathering a quick snapshot of who they are today. Ask about:
- What they currently do (work/life)
- What they enjoy about it
- What frustrates them
- What they'd change if they could"
            .to_string(),
        Phase::EnergyMap => format!(
            "We're mapping their energy. Current progress:
- Energizers found: {}/{target} minimum
- Drainers found: {}/{target} minimum

Ask about specific times they felt energized or drained. Go deeper on each one.",
            data.energizers.len(),
            data.drainers.len(),
            target = ENERGY_TARGET,
        ),
        Phase::DeepStories => format!(
            "We're exploring meaningful stories. Stories collected: {}

Ask about:
- Times they felt proud
- Times they helped someone that stayed with them
- What values showed up in those moments

Use the [Acknowledge] + [Build] + [Question] pattern.",
            data.stories.len()
        ),
        Phase::Patterns => format!(
            "Time to identify patterns. We have:
- Energizers: {}
- Drainers: {}
- Patterns noted: {}

Share the themes you see. Check if they resonate with the user.",
            join_or_none(&data.energizers),
            join_or_none(&data.drainers),
            join_or_none(&data.patterns),
        ),
        Phase::Statement => format!(
            "Time to formulate their Why statement.
Current draft: {}

Propose a \"To ___ so that ___\" statement based on the patterns.
Be open to refinement.",
            or_placeholder(&data.why_statement, "Not yet created")
        ),
        Phase::Action => format!(
            "Wrap up the session positively.
Their Why: {}

Discuss how they can apply this Why in daily life and decisions.
Celebrate their journey.",
            or_placeholder(&data.why_statement, "To be finalized")
        ),
        Phase::Completed => String::new(),
    }
}

/// Like [`build_messages`] with an explicit history window.
pub fn build_messages_with_window(
    phase: Phase,
    data: &SessionData,
    history: &[HistoryEntry],
    user_message: Option<&str>,
    window: usize,
) -> Vec<PromptMessage> {
    let mut messages = vec![PromptMessage::system(COACH_SYSTEM_PROMPT)];

    let guidance = phase_prompt(phase, data);
    if !guidance.is_empty() {
        messages.push(PromptMessage::system(format!(
            "[Current Phase: {}]\n{}",
            phase.as_str().to_uppercase(),
            guidance
        )));
    }

    let start = history.len().saturating_sub(window);
    messages.extend(history[start..].iter().map(|entry| PromptMessage {
        role: entry.sender.into(),
        content: entry.content.clone(),
    }));

    if let Some(text) = user_message.filter(|text| !text.is_empty() && *text != SESSION_START) {
        messages.push(PromptMessage::user(text));
    }

    messages
}

/// Ordered model input: persona, phase guidance, recent history, then the new user message.
pub fn build_messages(
    phase: Phase,
    data: &SessionData,
    history: &[HistoryEntry],
    user_message: Option<&str>,
) -> Vec<PromptMessage> {
    build_messages_with_window(phase, data, history, user_message, HISTORY_WINDOW)
}
