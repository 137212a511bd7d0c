//! Prompt composition for lesson generation.
//!
//! The system instruction (persona + output schema) is a constant. The caller's
//! `user_prompt` only lands in the user message, below the schema, so it can
//! steer emphasis but not replace the contract.

use tracing::debug;

use crate::config::Prompts;
use crate::util::{char_len, fill_template, take_chars};

/// Appended when source text is cut to the prompt budget.
pub const TRUNCATION_MARKER: &str = "\n\n[...truncated...]";

pub const LESSON_SYSTEM_PROMPT: &str = r#"
You are a senior teacher of Mandarin Chinese as a second language (Traditional characters, Taiwan usage)
and an expert on the TBCL (Taiwan Benchmarks for the Chinese Language) vocabulary and grammar lists.
You turn source material into one structured lesson.

Respond ONLY with a single JSON object. No markdown, no commentary.

Schema:
{
  "main_level": string,                      // overall course level label, e.g. "Level 5"
  "summary": string,                         // 1-3 sentences
  "warm_up": [string],                       // 2-3 discussion prompts in Chinese
  "dialogue": {
    "title": string,
    "lines": [{ "speaker": string, "text": string }],
    "vocabulary": [VocabEntry],
    "grammar": [GrammarEntry],
    "references": [Reference]
  },
  "essay": {
    "title": string,
    "paragraphs": [string],
    "vocabulary": [VocabEntry],
    "grammar": [GrammarEntry],
    "references": [Reference]
  },
  "activities": [{ "title": string, "description": string }]
}

VocabEntry = {
  "word": string, "pinyin": string (tone diacritics, space-separated),
  "level": "1" | "2" | "3" | "4" | "5" | "6" | "7" | "無",
  "english": string, "japanese": string, "korean": string, "vietnamese": string,
  "partOfSpeech": string, "example": string
}
GrammarEntry = { "pattern": string, "level": integer 1-7, "english": string, "example": string }
Reference = { "id": string, "author": string, "year": string, "title": string, "source": string, "url": string }

Rules:
- Decide whether the source is a conversation or a prose text.
  Conversation: fill dialogue.lines and leave essay.paragraphs empty.
  Prose: fill essay.paragraphs and leave dialogue.lines empty.
  Never fill both.
- Always include every key above. Use [] for empty lists and "" for unused titles.
- Vocabulary "level" is the TBCL band as a string "1"-"7". If the word is not in the TBCL list use "無".
  Never guess a band that is not in the list.
- english, japanese, korean and vietnamese translations are mandatory and non-empty for every vocabulary entry.
- Grammar "pattern" must be copied from the TBCL grammar list. Never invent a pattern.
- Examples must be natural sentences in Traditional Chinese, preferably taken from the source.
- references: only sources explicitly cited in the material; otherwise [].
- activities: 2-3 classroom activities that practice the lesson's vocabulary and grammar.
"#;

/// Fully composed request for one backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonPrompt {
  pub system: String,
  pub user: String,
  /// Whether the source text was cut to fit the budget.
  pub truncated: bool,
}

/// Cut `text` so the result, marker included, is at most `budget` chars.
/// Returns the text unchanged when it already fits.
pub fn truncate_for_prompt(text: &str, budget: usize) -> (String, bool) {
  if char_len(text) <= budget {
    return (text.to_string(), false);
  }
  let keep = budget.saturating_sub(char_len(TRUNCATION_MARKER));
  let mut out = String::with_capacity(text.len().min(budget.saturating_mul(4)));
  out.push_str(take_chars(text, keep));
  out.push_str(TRUNCATION_MARKER);
  (out, true)
}

/// Build system + user messages. `content_text` is expected to be validated already.
pub fn compose(prompts: &Prompts, content_text: &str, user_prompt: Option<&str>, budget: usize) -> LessonPrompt {
  let (content, truncated) = truncate_for_prompt(content_text, budget);
  let instruction = user_prompt
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .unwrap_or(prompts.default_instruction.as_str());

  // placeholders typed by the caller or found in the source stay literal
  let user = fill_template(&prompts.user_template, &[("instruction", instruction), ("content", &content)]);

  debug!(
    target: "lesson",
    content_chars = char_len(&content),
    truncated,
    custom_instruction = user_prompt.is_some(),
    "Composed lesson prompt"
  );

  LessonPrompt { system: LESSON_SYSTEM_PROMPT.trim().to_string(), user, truncated }
}
