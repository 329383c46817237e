//! Opening prompts sent as the first assistant message of every session.

use rand::seq::SliceRandom;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptCategory {
    Reflection,
    Gratitude,
    Emotional,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub category: PromptCategory,
    pub text: &'static str,
}

const fn prompt(category: PromptCategory, text: &'static str) -> Prompt {
    Prompt { category, text }
}

pub const JOURNAL_PROMPTS: &[Prompt] = &[
    prompt(
        PromptCategory::Reflection,
        "Tell me about the most interesting part of your day.",
    ),
    prompt(
        PromptCategory::Reflection,
        "What did you spend most of your time doing today?",
    ),
    prompt(
        PromptCategory::Reflection,
        "Tell me about something unexpected that happened today.",
    ),
    prompt(PromptCategory::Gratitude, "What moments made today enjoyable?"),
    prompt(
        PromptCategory::Gratitude,
        "Tell me about the conversations you had today.",
    ),
    prompt(
        PromptCategory::Emotional,
        "Describe how your day has been making you feel.",
    ),
    prompt(PromptCategory::Emotional, "What's been on your mind lately?"),
    prompt(PromptCategory::General, "Describe your day."),
];

/// Pick one prompt uniformly at random.
pub fn random_prompt() -> Prompt {
    JOURNAL_PROMPTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(prompt(PromptCategory::General, "Describe your day."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_covers_every_category() {
        for category in [
            PromptCategory::Reflection,
            PromptCategory::Gratitude,
            PromptCategory::Emotional,
            PromptCategory::General,
        ] {
            assert!(
                JOURNAL_PROMPTS.iter().any(|p| p.category == category),
                "missing {:?}",
                category
            );
        }
    }

    #[test]
    fn test_random_prompt_comes_from_catalogue() {
        for _ in 0..20 {
            let p = random_prompt();
            assert!(JOURNAL_PROMPTS.contains(&p));
            assert!(!p.text.is_empty());
        }
    }
}
