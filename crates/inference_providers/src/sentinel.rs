//! Upstream wording the gateway reacts to.
//!
//! Backends signal account trouble in-band, as ordinary reply text or error
//! strings. Matching depends on the exact upstream wording, so every literal
//! lives here and all matching goes through the functions below.

use crate::CompletionError;

/// Error text returned while a token is temporarily out of quota
pub const RATE_LIMITED: &str = "Exceeded completions limit";

/// Entire reply text returned for a request that violates the usage policy
pub const VIOLATING_POLICY: &str =
    "Your message violates the usage policy of this service and was not processed.";

/// Marker contained in replies of disabled accounts
pub const BANNED: &str = "Your account has been disabled";

/// Marker contained in refusals triggered by the harm filter
pub const HARM: &str = "I apologize, but I will not provide any responses that violate";

/// Substituted when a session backend disengages without saying anything
pub const DISENGAGED_APOLOGY: &str = "Sorry, I'd prefer not to continue this conversation. \
     I'm still learning, so I appreciate your understanding and patience. \u{1f64f}";

/// Native message type a session backend uses to end a conversation
pub const DISENGAGED_MESSAGE_TYPE: &str = "Disengaged";

/// Classify the final text of a finished reply.
///
/// Returns the error the stream should terminate with, or `None` when the
/// reply is ordinary content.
pub fn classify_final_text(text: &str) -> Option<CompletionError> {
    if text == VIOLATING_POLICY {
        return Some(CompletionError::PolicyViolation(VIOLATING_POLICY.to_string()));
    }
    if text.contains(BANNED) {
        return Some(CompletionError::BannedContent(BANNED.to_string()));
    }
    if text.contains(HARM) {
        return Some(CompletionError::HarmContent(HARM.to_string()));
    }
    None
}

/// Whether a credential failure message only means "try again later"
pub fn is_transient_failure(message: &str) -> bool {
    message == RATE_LIMITED
}

/// Map a raw backend error string onto the typed taxonomy
pub fn classify_error_message(message: &str) -> CompletionError {
    if is_transient_failure(message) {
        CompletionError::RateLimited
    } else {
        CompletionError::CompletionError(message.to_string())
    }
}
