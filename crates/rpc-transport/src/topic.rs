//! # Topic Patterns
//!
//! AMQP topic matching: routing keys and patterns are dot-separated words,
//! `*` matches exactly one word and `#` matches zero or more words.

use crate::message::ExchangeKind;

/// A binding pattern compiled into words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    words: Vec<String>,
}

impl TopicPattern {
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        Self {
            raw: pattern.to_string(),
            words: split(pattern),
        }
    }

    /// The pattern as declared.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check a routing key against this pattern under the exchange's rules.
    #[must_use]
    pub fn matches(&self, kind: ExchangeKind, routing_key: &str) -> bool {
        match kind {
            ExchangeKind::Fanout => true,
            ExchangeKind::Direct => self.raw == routing_key,
            ExchangeKind::Topic => {
                let key = split(routing_key);
                match_words(&self.words, &key)
            }
        }
    }
}

fn split(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    s.split('.').map(str::to_string).collect()
}

fn match_words(pattern: &[String], key: &[String]) -> bool {
    let Some((head, rest)) = pattern.split_first() else {
        return key.is_empty();
    };

    match head.as_str() {
        // Zero or more words: try every possible split point.
        "#" => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        "*" => !key.is_empty() && match_words(rest, &key[1..]),
        word => key.first().is_some_and(|k| k == word) && match_words(rest, &key[1..]),
    }
}
