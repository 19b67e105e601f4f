// src/enrich/prompts.rs
//! Prompt builders for the four enrichment tasks. Each system prompt starts
//! with a task tag so offline providers can recognize the task.

use super::Prompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Summarize,
    Categorize,
    Elaborate,
    Translate,
}

impl TaskKind {
    fn tag(self) -> &'static str {
        match self {
            TaskKind::Summarize => "[summarize]",
            TaskKind::Categorize => "[categorize]",
            TaskKind::Elaborate => "[elaborate]",
            TaskKind::Translate => "[translate]",
        }
    }
}

// Input is cut to keep single prompts well under provider context limits.
const MAX_BODY_CHARS: usize = 6_000;

fn clip(s: &str) -> String {
    s.chars().take(MAX_BODY_CHARS).collect()
}

pub fn summarize(title: &str, body: &str) -> Prompt {
    Prompt::new(
        format!(
            "{} Summarize the text in 3 to 5 short points. Output each point on its own line as \"N. point\". No other text.",
            TaskKind::Summarize.tag()
        ),
        format!("{title}\n\n{}", clip(body)),
    )
}

pub fn categorize(title: &str, body: &str) -> Prompt {
    Prompt::new(
        format!(
            "{} Classify the text. Answer with one digit only: 1 politics, 2 economy, 3 society, 4 technology, 5 culture.",
            TaskKind::Categorize.tag()
        ),
        format!("{title}\n\n{}", clip(body)),
    )
}

pub fn elaborate(body: &str, summary_line: &str) -> Prompt {
    Prompt::new(
        format!(
            "{} Explain the given summary point in two or three sentences using only the source text.",
            TaskKind::Elaborate.tag()
        ),
        format!("Point: {summary_line}\n\nSource:\n{}", clip(body)),
    )
}

pub fn translate(text: &str, language: &str) -> Prompt {
    Prompt::new(
        format!(
            "{} Translate the user text into {language}. Output only the translation.",
            TaskKind::Translate.tag()
        ),
        text.to_string(),
    )
}

/// Recover the task from a prompt built here.
pub fn kind_of(prompt: &Prompt) -> Option<TaskKind> {
    [
        TaskKind::Summarize,
        TaskKind::Categorize,
        TaskKind::Elaborate,
        TaskKind::Translate,
    ]
    .into_iter()
    .find(|k| prompt.system.starts_with(k.tag()))
}

/// The user part of a prompt (the text being worked on).
pub fn payload_of(prompt: &Prompt) -> &str {
    &prompt.user
}
