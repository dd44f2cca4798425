//! Token estimation for admission control.
//!
//! A fixed character-to-token ratio, not a tokenizer. Cheap and deterministic,
//! good enough to reject clearly-unfunded requests before any upstream call.
//! Must never stand in for an authoritative provider usage figure when one
//! exists.

use crate::types::ChatMessage;

/// Average characters per token across the model families we route to.
const CHARS_PER_TOKEN: u64 = 3;

/// Estimated token count for a character count, rounded up.
#[must_use]
pub fn estimate_chars(chars: usize) -> u64 {
    (chars as u64).div_ceil(CHARS_PER_TOKEN)
}

/// Estimated token count for a piece of text.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    estimate_chars(text.chars().count())
}

/// Estimated input tokens for a full message history.
#[must_use]
pub fn estimate_messages(messages: &[ChatMessage]) -> u64 {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, Role};

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 2);
    }

    #[test]
    fn test_two_thousand_chars() {
        let text = "x".repeat(2000);
        assert_eq!(estimate_tokens(&text), 667);
    }

    #[test]
    fn test_multibyte_counts_chars_not_bytes() {
        // 6 chars, 18 bytes
        assert_eq!(estimate_tokens("日本語日本語"), 2);
    }

    #[test]
    fn test_messages_sum() {
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: "abc".into(),
            },
            ChatMessage {
                role: Role::User,
                content: "abcdef".into(),
            },
        ];
        assert_eq!(estimate_messages(&messages), 3);
    }
}
