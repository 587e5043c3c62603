//! Builds the per-step user prompt from the task, history and page snapshot.

use std::fmt::Write as _;
use std::time::Duration;

use crate::agent::{ActionRecord, ActionStatus};
use crate::config::get_system_prompt;
use crate::page::PageSnapshot;

/// Maximum number of page elements listed in a prompt.
pub const PROMPT_ELEMENT_LIMIT: usize = 20;

/// Maximum number of characters of visible page text in a prompt.
pub const PAGE_TEXT_LIMIT: usize = 1000;

/// A rendered prompt: system instruction plus the step's user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Everything the model sees about the current step.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub task: &'a str,
    pub elapsed: Duration,
    pub max_duration: Duration,
    pub attempts: u32,
    pub ceiling: u32,
    pub execution_speed: u8,
    /// Most recent records, oldest first.
    pub history: &'a [ActionRecord],
    pub snapshot: &'a PageSnapshot,
    pub clipboard: Option<&'a str>,
}

/// Build the prompt for one step.
pub fn build_prompt(ctx: &PromptContext<'_>) -> Prompt {
    Prompt {
        system: get_system_prompt(),
        user: build_user_message(ctx),
    }
}

fn build_user_message(ctx: &PromptContext<'_>) -> String {
    let snapshot = ctx.snapshot;
    let remaining = ctx.max_duration.saturating_sub(ctx.elapsed);
    let mut out = String::new();

    // write! into a String cannot fail
    let _ = writeln!(out, "TASK: {}", ctx.task);
    let _ = writeln!(out);
    let _ = writeln!(out, "CURRENT PAGE:");
    let _ = writeln!(out, "- URL: {}", snapshot.url);
    let _ = writeln!(out, "- Title: {}", snapshot.title);
    let _ = writeln!(
        out,
        "- Viewport: {}x{} at scroll ({}, {})",
        snapshot.viewport.width,
        snapshot.viewport.height,
        snapshot.viewport.scroll_x,
        snapshot.viewport.scroll_y
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "STATUS:");
    let _ = writeln!(
        out,
        "- Time elapsed: {}s, remaining: {}s",
        ctx.elapsed.as_secs(),
        remaining.as_secs()
    );
    let _ = writeln!(out, "- Retry count: {}/{}", ctx.attempts, ctx.ceiling);
    let _ = writeln!(out, "- Execution speed: {}/5", ctx.execution_speed);

    let _ = writeln!(out);
    let _ = writeln!(out, "RECENT ACTIONS:");
    if ctx.history.is_empty() {
        let _ = writeln!(out, "None yet");
    }
    for (i, record) in ctx.history.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, describe_record(record));
    }

    if let Some(data) = ctx.clipboard.filter(|d| !d.is_empty()) {
        let _ = writeln!(out);
        let _ = writeln!(out, "CLIPBOARD DATA: {}", data);
    }

    if !snapshot.forms.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "FORMS:");
        for form in &snapshot.forms {
            let inputs = form
                .inputs
                .iter()
                .map(|input| {
                    let name = if input.name.is_empty() {
                        &input.placeholder
                    } else {
                        &input.name
                    };
                    let required = if input.required { "*" } else { "" };
                    format!("{}:{}{}", input.input_type, name, required)
                })
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "- {} {} [{}]", form.method, form.action, inputs);
        }
    }

    let text = truncate_chars(snapshot.page_text.trim(), PAGE_TEXT_LIMIT);
    if !text.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "PAGE TEXT: {}", text);
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "INTERACTIVE ELEMENTS ({} of {}):",
        snapshot.elements.len().min(PROMPT_ELEMENT_LIMIT),
        snapshot.elements.len()
    );
    for element in snapshot.elements.iter().take(PROMPT_ELEMENT_LIMIT) {
        let _ = writeln!(
            out,
            "[{}] {} \"{}\" selector: {}",
            element.index, element.tag, element.label, element.selector
        );
    }

    let _ = writeln!(out);
    out.push_str("What is the next action? Reply with one JSON object.");
    out
}

fn describe_record(record: &ActionRecord) -> String {
    let mut line = record.action.kind_name().to_string();
    let description = record.action.describe();
    if !description.is_empty() {
        let _ = write!(line, " ({})", description);
    }
    match record.status {
        ActionStatus::Success => line.push_str(" -> success"),
        ActionStatus::Failed => {
            line.push_str(" -> failed");
            if let Some(ref reason) = record.reason {
                let _ = write!(line, ": {}", reason);
            }
        }
    }
    if let Some(ref detail) = record.detail {
        let _ = write!(line, " [{}]", truncate_chars(detail, 200));
    }
    line
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionKind};
    use crate::page::{FormInfo, FormInput, PageElement};
    use crate::surface::Point;

    fn snapshot_with(count: usize) -> PageSnapshot {
        PageSnapshot {
            url: "https://example.com/".to_string(),
            title: "Example".to_string(),
            elements: (0..count)
                .map(|i| {
                    let mut e = PageElement::new("a", format!("#link-{}", i), Point::new(0, 0))
                        .with_label(format!("Link {}", i));
                    e.index = i;
                    e
                })
                .collect(),
            page_text: "é".repeat(PAGE_TEXT_LIMIT + 50),
            ..Default::default()
        }
    }

    #[test]
    fn test_prompt_limits_elements_and_text() {
        let snapshot = snapshot_with(30);
        let ctx = PromptContext {
            task: "open the docs",
            elapsed: Duration::from_secs(12),
            max_duration: Duration::from_secs(120),
            attempts: 1,
            ceiling: 5,
            execution_speed: 3,
            history: &[],
            snapshot: &snapshot,
            clipboard: None,
        };
        let prompt = build_prompt(&ctx);

        assert!(prompt.system.contains("AVAILABLE ACTIONS"));
        assert!(prompt.user.contains("TASK: open the docs"));
        assert!(prompt.user.contains("Time elapsed: 12s, remaining: 108s"));
        assert!(prompt.user.contains("Retry count: 1/5"));
        assert!(prompt.user.contains("INTERACTIVE ELEMENTS (20 of 30)"));
        assert!(prompt.user.contains("#link-19"));
        assert!(!prompt.user.contains("#link-20"));
        assert!(prompt.user.contains(&"é".repeat(PAGE_TEXT_LIMIT)));
        assert!(!prompt.user.contains(&"é".repeat(PAGE_TEXT_LIMIT + 1)));
        assert!(!prompt.user.contains("CLIPBOARD DATA"));
    }

    #[test]
    fn test_prompt_includes_history_forms_and_clipboard() {
        let mut snapshot = snapshot_with(1);
        snapshot.forms.push(FormInfo {
            action: "/search".to_string(),
            method: "get".to_string(),
            inputs: vec![FormInput {
                input_type: "text".to_string(),
                name: "q".to_string(),
                placeholder: String::new(),
                required: true,
            }],
        });
        let history = vec![
            ActionRecord::success(
                Action::new(ActionKind::Click {
                    selector: "#link-0".to_string(),
                })
                .with_message("Open the first link"),
            ),
            ActionRecord::failed(
                Action::new(ActionKind::Paste),
                "Clipboard is empty".to_string(),
            ),
        ];
        let ctx = PromptContext {
            task: "t",
            elapsed: Duration::ZERO,
            max_duration: Duration::from_secs(60),
            attempts: 0,
            ceiling: 5,
            execution_speed: 5,
            history: &history,
            snapshot: &snapshot,
            clipboard: Some("https://img.example.com/a.png"),
        };
        let user = build_prompt(&ctx).user;

        assert!(user.contains("1. click (Open the first link) -> success"));
        assert!(user.contains("2. paste -> failed: Clipboard is empty"));
        assert!(user.contains("CLIPBOARD DATA: https://img.example.com/a.png"));
        assert!(user.contains("- get /search [text:q*]"));
    }
}
