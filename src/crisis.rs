/// Phrases that route a message to the crisis response instead of the coach.
/// Matching favours recall; false positives are acceptable.
pub const CRISIS_KEYWORDS: &[&str] = &[
    "suicide",
    "kill myself",
    "end my life",
    "self-harm",
    "hurt myself",
    "want to die",
    "no reason to live",
    "better off dead",
];

pub const CRISIS_RESPONSE: &str = "I hear that you're going through something really difficult. Your feelings are valid.

This coaching session is designed for self-reflection, not crisis support. Please reach out to someone who can help:

• National Suicide Prevention Lifeline (US): 988
• Crisis Text Line: Text HOME to 741741
• International: https://www.iasp.info/resources/Crisis_Centres/

Would you like to continue our session when you're feeling more settled?";

/// First crisis keyword found in `text`, case-insensitively.
pub fn matched_crisis_keyword(text: &str) -> Option<&'static str> {
    let lowercase = text.to_lowercase();
    CRISIS_KEYWORDS
        .iter()
        .copied()
        .find(|keyword| lowercase.contains(keyword))
}

pub fn contains_crisis_signal(text: &str) -> bool {
    matched_crisis_keyword(text).is_some()
}
