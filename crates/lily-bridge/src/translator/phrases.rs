//! Wake and goodbye phrase handling.

use lily_config::schema::PlatformConfig;

/// Where a piece of text goes before any request is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextRoute {
    /// Wake phrase; carries whatever followed it.
    Start(String),
    /// Goodbye phrase inside an open conversation.
    End,
    /// Goodbye phrase with nothing open.
    NoActive,
    /// Ordinary text inside an open conversation.
    Message,
    /// Looks like an attempt to wake the bot; answer with a hint.
    Hint,
    Ignore,
}

#[derive(Debug, Clone)]
pub struct Phrases {
    wake: String,
    goodbye: String,
}

impl Default for Phrases {
    fn default() -> Self {
        Self::from(&PlatformConfig::default())
    }
}

impl From<&PlatformConfig> for Phrases {
    fn from(config: &PlatformConfig) -> Self {
        Self::new(&config.wake_phrase, &config.goodbye_phrase)
    }
}

impl Phrases {
    pub fn new(wake: &str, goodbye: &str) -> Self {
        Self {
            wake: wake.trim().to_lowercase(),
            goodbye: goodbye.trim().to_lowercase(),
        }
    }

    pub fn wake(&self) -> &str {
        &self.wake
    }

    /// Case-insensitive prefix match on the trimmed content.
    pub fn is_wake(&self, content: &str) -> bool {
        self.strip_wake(content).is_some()
    }

    /// Case-insensitive exact match.
    pub fn is_goodbye(&self, content: &str) -> bool {
        content.trim().to_lowercase() == self.goodbye
    }

    /// Text after the wake phrase, without separating punctuation.
    pub fn strip_wake<'a>(&self, content: &'a str) -> Option<&'a str> {
        let content = content.trim();
        let len = self.wake.len();
        if content.len() < len || !content.is_char_boundary(len) {
            return None;
        }
        let (head, rest) = content.split_at(len);
        if head.to_lowercase() != self.wake {
            return None;
        }
        // "hey lilyanne" is not the wake phrase.
        if rest.chars().next().is_some_and(char::is_alphanumeric) {
            return None;
        }
        Some(rest.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '!' | '.' | ':' | '?')))
    }

    /// Route `content` given whether the author has a conversation open.
    pub fn classify(&self, content: &str, conversation_open: bool) -> TextRoute {
        if let Some(rest) = self.strip_wake(content) {
            return TextRoute::Start(rest.to_string());
        }
        if self.is_goodbye(content) {
            return if conversation_open {
                TextRoute::End
            } else {
                TextRoute::NoActive
            };
        }
        if conversation_open {
            return TextRoute::Message;
        }
        if content.trim().to_lowercase().starts_with("hey") {
            TextRoute::Hint
        } else {
            TextRoute::Ignore
        }
    }
}
