//! Request-input validation: conversation IDs, search terms, and free-text
//! message content. Mirrors the checks a client-facing API needs before
//! anything reaches the audit sink or an LLM prompt.

use choir_domain::error::Error;

const MAX_TEXT_LEN: usize = 10_000;
const MAX_CONVERSATION_ID_LEN: usize = 100;
const MIN_SEARCH_TERM_LEN: usize = 2;
const MAX_SEARCH_TERM_LEN: usize = 500;

/// Strips control characters (keeping `\n`, `\r`, `\t`), truncates to
/// `max_length`, and trims surrounding whitespace.
pub fn sanitize_text(text: &str, max_length: usize) -> String {
    let truncated: String = text.chars().take(max_length).collect();
    truncated
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Validates a client-supplied conversation ID: non-empty, bounded length,
/// `[a-zA-Z0-9_-]` only.
pub fn validate_conversation_id(conversation_id: &str) -> Result<(), Error> {
    if conversation_id.is_empty() {
        return Err(Error::Validation("conversation ID cannot be empty".into()));
    }
    if conversation_id.len() > MAX_CONVERSATION_ID_LEN {
        return Err(Error::Validation(format!(
            "conversation ID too long ({} > {MAX_CONVERSATION_ID_LEN})",
            conversation_id.len()
        )));
    }
    if !conversation_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::Validation("conversation ID contains invalid characters".into()));
    }
    Ok(())
}

/// Validates and sanitizes a search term: non-empty, within length bounds,
/// then run through [`sanitize_text`].
pub fn validate_search_term(search_term: &str) -> Result<String, Error> {
    if search_term.is_empty() {
        return Err(Error::Validation("search term cannot be empty".into()));
    }
    if search_term.len() < MIN_SEARCH_TERM_LEN {
        return Err(Error::Validation(format!("search term too short (minimum {MIN_SEARCH_TERM_LEN} characters)")));
    }
    if search_term.len() > MAX_SEARCH_TERM_LEN {
        return Err(Error::Validation(format!("search term too long (maximum {MAX_SEARCH_TERM_LEN} characters)")));
    }
    Ok(sanitize_text(search_term, MAX_SEARCH_TERM_LEN))
}

/// Validates a chat message: non-empty after sanitization, within the
/// default text length bound. Returns the sanitized content.
pub fn validate_message_content(content: &str) -> Result<String, Error> {
    let sanitized = sanitize_text(content, MAX_TEXT_LEN);
    if sanitized.is_empty() {
        return Err(Error::Validation("message content cannot be empty".into()));
    }
    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_text_strips_control_chars_and_trims() {
        let input = "  hello\x00world\n  ";
        assert_eq!(sanitize_text(input, MAX_TEXT_LEN), "helloworld");
    }

    #[test]
    fn sanitize_text_truncates_to_max_length() {
        let input = "a".repeat(20);
        assert_eq!(sanitize_text(&input, 5), "aaaaa");
    }

    #[test]
    fn validate_conversation_id_accepts_normal_ids() {
        assert!(validate_conversation_id("conv-123_abc").is_ok());
    }

    #[test]
    fn validate_conversation_id_rejects_empty() {
        assert!(validate_conversation_id("").is_err());
    }

    #[test]
    fn validate_conversation_id_rejects_bad_chars() {
        assert!(validate_conversation_id("conv/../etc").is_err());
        assert!(validate_conversation_id("conv id").is_err());
    }

    #[test]
    fn validate_conversation_id_rejects_too_long() {
        let id = "a".repeat(MAX_CONVERSATION_ID_LEN + 1);
        assert!(validate_conversation_id(&id).is_err());
    }

    #[test]
    fn validate_search_term_rejects_too_short() {
        assert!(validate_search_term("a").is_err());
    }

    #[test]
    fn validate_search_term_rejects_too_long() {
        let term = "a".repeat(MAX_SEARCH_TERM_LEN + 1);
        assert!(validate_search_term(&term).is_err());
    }

    #[test]
    fn validate_search_term_sanitizes_result() {
        let result = validate_search_term("  ship it  ").unwrap();
        assert_eq!(result, "ship it");
    }

    #[test]
    fn validate_message_content_rejects_empty_after_sanitizing() {
        assert!(validate_message_content("   \x00  ").is_err());
    }
}
