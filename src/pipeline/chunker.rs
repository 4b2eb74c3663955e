//! Text chunking and truncation policies.
//!
//! Shared by the live-message manager (preview truncation) and the
//! adapters (splitting final replies to the platform's message limit).

/// Ellipsis appended to truncated previews.
const ELLIPSIS: char = '…';

/// Split `text` into chunks of at most `max_chars` characters, preferring
/// newline boundaries.
///
/// A newline chosen as the break point is consumed (it acts as the chunk
/// separator); windows without a newline break hard on the limit. All
/// boundaries are char-safe.
#[must_use]
pub fn smart_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_owned()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_chars {
            chunks.push(remaining.to_owned());
            break;
        }

        let window_end = remaining
            .char_indices()
            .nth(max_chars)
            .map_or(remaining.len(), |(idx, _)| idx);
        let window = &remaining[..window_end];

        match window.rfind('\n').filter(|&at| at > 0) {
            Some(at) => {
                chunks.push(remaining[..at].to_owned());
                remaining = &remaining[at + 1..];
            }
            None => {
                chunks.push(window.to_owned());
                remaining = &remaining[window_end..];
            }
        }
    }

    chunks
}

/// Truncate `text` to at most `max_chars` characters, replacing the tail
/// with an ellipsis when over-long.
///
/// The result never exceeds `max_chars` characters including the ellipsis.
#[must_use]
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push(ELLIPSIS);
    out
}
