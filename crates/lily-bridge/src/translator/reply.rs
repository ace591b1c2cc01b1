//! Splitting and prefixing replies to fit the platform message limit.

use lily_config::schema::PlatformConfig;

const CONTINUATION: &str = "...";

/// How replies are dressed before they are posted.
#[derive(Debug, Clone)]
pub struct ReplyStyle {
    pub prefix: String,
    pub limit: usize,
}

impl Default for ReplyStyle {
    fn default() -> Self {
        Self::from(&PlatformConfig::default())
    }
}

impl From<&PlatformConfig> for ReplyStyle {
    fn from(config: &PlatformConfig) -> Self {
        Self {
            prefix: config.reply_prefix.clone(),
            limit: config.message_limit,
        }
    }
}

impl ReplyStyle {
    /// A single short line with the prefix, e.g. for notices.
    pub fn line(&self, text: &str) -> String {
        if self.prefix.is_empty() {
            text.to_string()
        } else {
            format!("{} {text}", self.prefix)
        }
    }
}

/// Split `text` into chunks of at most `max_chars` characters, breaking at
/// the last newline inside the window when there is one.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let window_end = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(remaining.len());
        if window_end == remaining.len() {
            chunks.push(remaining.to_string());
            break;
        }

        let split_at = match remaining[..window_end].rfind('\n') {
            Some(pos) if pos > 0 => pos,
            _ => window_end,
        };
        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches('\n');
    }
    chunks
}

/// Messages to post for one reply: first chunk prefixed, the rest marked as
/// continuations. Every message fits within `style.limit` characters.
pub fn format_reply(text: &str, style: &ReplyStyle) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if style.prefix.is_empty() {
        return split_message(text, style.limit);
    }

    let overhead = (style.prefix.chars().count() + 1).max(CONTINUATION.len());
    let budget = style.limit.saturating_sub(overhead).max(1);
    split_message(text, budget)
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            if i == 0 {
                format!("{} {chunk}", style.prefix)
            } else {
                format!("{CONTINUATION}{chunk}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello", 2000), vec!["hello".to_string()]);
    }

    #[test]
    fn prefers_newline_boundaries() {
        let text = format!("{}\n{}", "a".repeat(8), "b".repeat(8));
        let chunks = split_message(&text, 10);
        assert_eq!(chunks, vec!["a".repeat(8), "b".repeat(8)]);
    }

    #[test]
    fn hard_splits_without_newlines() {
        let chunks = split_message(&"x".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[2].len(), 5);
        assert_eq!(chunks.concat(), "x".repeat(25));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(15);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 10);
    }

    #[test]
    fn leading_newline_in_window_does_not_produce_empty_chunk() {
        let text = format!("\n{}", "y".repeat(20));
        let chunks = split_message(&text, 10);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn formatted_reply_prefixes_and_fits_limit() {
        let style = ReplyStyle::default();
        let text = "word ".repeat(900);
        let messages = format_reply(&text, &style);

        assert!(messages.len() > 1);
        assert!(messages[0].starts_with("**Lily:** "));
        assert!(messages[1..].iter().all(|m| m.starts_with("...")));
        assert!(messages.iter().all(|m| m.chars().count() <= 2000));
    }

    #[test]
    fn empty_reply_posts_nothing() {
        assert!(format_reply("  \n ", &ReplyStyle::default()).is_empty());
    }

    #[test]
    fn notice_line_uses_prefix() {
        let style = ReplyStyle::default();
        assert_eq!(style.line("hi"), "**Lily:** hi");
    }
}
