//! # Content policy for generated text.
//!
//! A reply passes when it contains none of the banned tokens (case-insensitive) and
//! the share of letters outside the expected [`Script`] stays below
//! `max_foreign_ratio`. Text without foreign letters always passes this check. [`ContentPolicy::sanitize`] is the deterministic repair used
//! when no attempts are left: strip banned tokens, strip foreign letters, collapse
//! whitespace.
//!
//! ```rust
//! use worldtick::{ContentPolicy, Violation};
//!
//! let policy = ContentPolicy::default();
//! assert!(policy.check("The harvest was good.").is_ok());
//! assert!(matches!(policy.check("As an AI, I cannot"), Err(Violation::BannedToken(_))));
//! assert_eq!(policy.sanitize("As an AI,   the harvest was good."), ", the harvest was good.");
//! ```

use std::fmt;

/// Alphabet a reply is expected to be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Script {
    /// ASCII letters plus Latin-1 Supplement and Latin Extended-A/B.
    #[default]
    Latin,
    /// Cyrillic and Cyrillic Supplement.
    Cyrillic,
}

impl Script {
    pub fn contains(self, c: char) -> bool {
        match self {
            Script::Latin => c.is_ascii_alphabetic() || ('\u{00C0}'..='\u{024F}').contains(&c),
            Script::Cyrillic => ('\u{0400}'..='\u{052F}').contains(&c),
        }
    }
}

/// Why a text failed the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// The banned token that matched first.
    BannedToken(String),
    /// Share of foreign letters among all letters.
    ForeignScript { ratio: f64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::BannedToken(token) => write!(f, "contains banned phrase '{token}'"),
            Violation::ForeignScript { ratio } => {
                write!(f, "uses a foreign script for {:.0}% of its letters", ratio * 100.0)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentPolicy {
    /// Matched case-insensitively anywhere in the text.
    pub banned_tokens: Vec<String>,
    pub script: Script,
    /// Share of foreign letters at which a reply is rejected (0.0..=1.0).
    pub max_foreign_ratio: f64,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            banned_tokens: ["as an ai", "language model", "<|", "|>", "assistant:"]
                .into_iter()
                .map(String::from)
                .collect(),
            script: Script::Latin,
            max_foreign_ratio: 0.1,
        }
    }
}

impl ContentPolicy {
    pub fn check(&self, text: &str) -> Result<(), Violation> {
        let folded: Vec<char> = text.chars().map(fold).collect();
        for token in &self.banned_tokens {
            if find_token(&folded, token).is_some() {
                return Err(Violation::BannedToken(token.clone()));
            }
        }
        let ratio = self.foreign_ratio(text);
        if ratio > 0.0 && ratio >= self.max_foreign_ratio {
            return Err(Violation::ForeignScript { ratio });
        }
        Ok(())
    }

    /// Share of alphabetic characters outside [`Self::script`]; `0.0` without letters.
    pub fn foreign_ratio(&self, text: &str) -> f64 {
        let (letters, foreign) = text
            .chars()
            .filter(|c| c.is_alphabetic())
            .fold((0usize, 0usize), |(l, f), c| {
                (l + 1, f + usize::from(!self.script.contains(c)))
            });
        if letters == 0 {
            0.0
        } else {
            foreign as f64 / letters as f64
        }
    }

    /// Strips banned tokens and foreign letters, then collapses whitespace.
    pub fn sanitize(&self, text: &str) -> String {
        let mut chars: Vec<char> = text.chars().collect();

        // Removing one token can join its neighbours into another; repeat until stable.
        loop {
            let folded: Vec<char> = chars.iter().copied().map(fold).collect();
            let hit = self
                .banned_tokens
                .iter()
                .filter_map(|t| find_token(&folded, t).map(|at| (at, t.chars().count())))
                .min_by_key(|(at, _)| *at);
            match hit {
                Some((at, len)) => {
                    chars.drain(at..at + len);
                }
                None => break,
            }
        }

        let kept: String = chars
            .into_iter()
            .filter(|c| !c.is_alphabetic() || self.script.contains(*c))
            .collect();
        kept.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

/// Char index of the first case-insensitive occurrence of `token` in `folded`.
fn find_token(folded: &[char], token: &str) -> Option<usize> {
    let needle: Vec<char> = token.chars().map(fold).collect();
    if needle.is_empty() || needle.len() > folded.len() {
        return None;
    }
    folded.windows(needle.len()).position(|w| w == needle.as_slice())
}
