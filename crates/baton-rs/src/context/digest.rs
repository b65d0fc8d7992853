//! Bookkeeping digests for summarized message blocks.
//!
//! When compaction summarizes a contiguous block of older history, the
//! block is replaced by a single terse digest message. The digest is a
//! deterministic factual reduction — role counts, boundary excerpts, token
//! totals — because agent reasoning (and therefore LLM summarization) is
//! outside this crate's scope. Callers that want richer summaries can
//! post-process the archived artifact instead.

use crate::{Message, MessageRole};

/// Configuration for digest construction.
#[derive(Debug, Clone)]
pub struct DigestConfig {
    /// Maximum characters taken from the first and last message of the block.
    pub excerpt_chars: usize,
    /// Hard cap on the digest's total length.
    pub max_chars: usize,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            excerpt_chars: 120,
            max_chars: 600,
        }
    }
}

/// Build a digest string for a block of messages.
///
/// Returns an empty string for an empty block — callers skip inserting a
/// digest message in that case.
pub fn digest_block(messages: &[Message], config: &DigestConfig) -> String {
    if messages.is_empty() {
        return String::new();
    }

    let total_tokens: u64 = messages.iter().map(|m| m.token_estimate).sum();
    let (mut users, mut agents, mut system) = (0usize, 0usize, 0usize);
    for msg in messages {
        match msg.role {
            MessageRole::User => users += 1,
            MessageRole::Agent => agents += 1,
            MessageRole::System => system += 1,
        }
    }

    let first = excerpt(&messages[0].content, config.excerpt_chars);
    let last = excerpt(&messages[messages.len() - 1].content, config.excerpt_chars);

    let digest = if messages.len() == 1 {
        format!(
            "[Summarized 1 message (~{total_tokens} tokens): {first}]"
        )
    } else {
        format!(
            "[Summarized {} messages (~{} tokens; {} user / {} agent / {} system). \
             Began: {} … Ended: {}]",
            messages.len(),
            total_tokens,
            users,
            agents,
            system,
            first,
            last,
        )
    };

    truncate_chars(&digest, config.max_chars)
}

/// First `max` characters of a string, single-line, with an ellipsis when
/// trimmed.
fn excerpt(content: &str, max: usize) -> String {
    let flat: String = content
        .chars()
        .map(|c| if c == '\n' { ' ' } else { c })
        .take(max)
        .collect();
    if content.chars().count() > max {
        format!("{flat}…")
    } else {
        flat
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let truncated: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{truncated}…")
    } else {
        s.to_string()
    }
}
