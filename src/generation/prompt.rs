//! # Prompts sent to the generation service.
//!
//! | Variant | Used for |
//! |---------|----------|
//! | [`PromptVariant::Primary`] | attempt 1 |
//! | [`PromptVariant::Reask`] | later attempts while nothing parseable came back |
//! | [`PromptVariant::Rewrite`] | later attempts once a parseable reply violated policy |

use std::fmt;

use crate::generation::policy::Violation;
use crate::generation::request::GenerationRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    Primary,
    Reask,
    Rewrite,
}

impl PromptVariant {
    pub fn as_label(self) -> &'static str {
        match self {
            PromptVariant::Primary => "primary",
            PromptVariant::Reask => "reask",
            PromptVariant::Rewrite => "rewrite",
        }
    }
}

impl fmt::Display for PromptVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Instruction plus input, ready for a [`GenerationClient`](crate::GenerationClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub variant: PromptVariant,
    pub system: String,
    pub user: String,
}

const SHAPE: &str = r#"{"text": "<reply>", "value": <optional number>}"#;

impl Prompt {
    pub fn primary(req: &GenerationRequest, language: &str) -> Self {
        let mut user = format!(
            "You are {subject}, a {archetype}.",
            subject = req.subject_id,
            archetype = req.archetype
        );
        if !req.location.is_empty() {
            user.push_str(&format!(" You are at {}.", req.location));
        }
        if !req.context.is_empty() {
            user.push_str(&format!("\n{}", req.context));
        }
        Self {
            variant: PromptVariant::Primary,
            system: format!(
                "Stay in character. Answer in {language} with a JSON object shaped like {SHAPE}."
            ),
            user,
        }
    }

    pub fn reask(req: &GenerationRequest, language: &str) -> Self {
        Self {
            variant: PromptVariant::Reask,
            system: format!(
                "Return ONLY compact JSON shaped like {SHAPE}. No prose, no code fences. \
                 The text must be in {language}."
            ),
            user: format!(
                "Speak as {subject}, a {archetype}, in one or two sentences.",
                subject = req.subject_id,
                archetype = req.archetype
            ),
        }
    }

    pub fn rewrite(best: &str, violation: &Violation, language: &str) -> Self {
        Self {
            variant: PromptVariant::Rewrite,
            system: format!(
                "The text below was rejected because it {violation}. Rewrite it keeping the \
                 meaning, write only in {language}, and return compact JSON shaped like {SHAPE}."
            ),
            user: best.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;

    #[test]
    fn primary_includes_subject_and_context() {
        let req = GenerationRequest::new("npc-4", "fisher", Scope::root())
            .with_location("harbor")
            .with_context("The catch was poor today.");
        let p = Prompt::primary(&req, "English");
        assert_eq!(p.variant, PromptVariant::Primary);
        assert!(p.user.contains("npc-4") && p.user.contains("harbor"));
        assert!(p.user.contains("catch was poor"));
        assert!(p.system.contains("English"));
    }

    #[test]
    fn rewrite_is_seeded_with_best_text() {
        let p = Prompt::rewrite(
            "As an AI I sell fish",
            &Violation::BannedToken("as an ai".into()),
            "English",
        );
        assert_eq!(p.variant, PromptVariant::Rewrite);
        assert_eq!(p.user, "As an AI I sell fish");
        assert!(p.system.contains("banned phrase"));
    }
}
