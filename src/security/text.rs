use regex::RegexSet;
use std::sync::LazyLock;

use super::{Rejection, ValidationResult};

pub const MAX_MESSAGE_LENGTH: usize = 10_000;

static DANGEROUS_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)<script",
        r"(?i)javascript:",
        r"(?i)onerror=",
        r"(?i)onclick=",
        r"(?i)onload=",
    ])
    .expect("message blocklist is valid")
});

/// Check a user message: non-blank, at most `MAX_MESSAGE_LENGTH` characters,
/// and free of blocklisted markup. First failing rule wins.
pub fn validate_message(message: &str) -> ValidationResult {
    if message.trim().is_empty() {
        return Err(Rejection::invalid("Message cannot be empty"));
    }

    if message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(Rejection::invalid(format!(
            "Message must be less than {} characters",
            MAX_MESSAGE_LENGTH
        )));
    }

    if DANGEROUS_PATTERNS.is_match(message) {
        return Err(Rejection::security(
            "Message contains potentially dangerous content",
        ));
    }

    Ok(())
}
