//! Action vocabulary and validation of model decisions.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::get_destination;

/// Errors raised while turning model output into an [`Action`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionParseError {
    #[error("Response is not a JSON object: {0}")]
    InvalidJson(String),
    #[error("Response is missing the action kind")]
    MissingKind,
    #[error("Unrecognized action kind: {0}")]
    UnknownKind(String),
    #[error("Action '{kind}' requires field '{field}'")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("Invalid scroll direction: {0}")]
    InvalidDirection(String),
}

/// Scroll direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
}

/// One option of a clarification question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarifyOption {
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Locator into the snapshot the question was asked about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl ClarifyOption {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: String::new(),
            selector: None,
        }
    }
}

/// The effect an action has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    Scroll {
        #[serde(default)]
        direction: ScrollDirection,
    },
    ReadText {
        selector: String,
    },
    CopyImageUrl {
        selector: String,
    },
    Paste,
    Wait,
    Finish,
    Clarify {
        question: String,
        options: Vec<ClarifyOption>,
    },
}

impl ActionKind {
    /// Wire name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Navigate { .. } => "navigate",
            ActionKind::Click { .. } => "click",
            ActionKind::Type { .. } => "type",
            ActionKind::Scroll { .. } => "scroll",
            ActionKind::ReadText { .. } => "read_text",
            ActionKind::CopyImageUrl { .. } => "copy_image_url",
            ActionKind::Paste => "paste",
            ActionKind::Wait => "wait",
            ActionKind::Finish => "finish",
            ActionKind::Clarify { .. } => "clarify",
        }
    }
}

/// A single decision returned by the model.
///
/// `message` and `reasoning` are only used for logging, except that
/// `message` is the completion text of a `finish` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            message: None,
            reasoning: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Short human description for log lines.
    pub fn describe(&self) -> &str {
        self.message
            .as_deref()
            .or(self.reasoning.as_deref())
            .unwrap_or("")
    }

    /// Whether the action needs the exclusive control channel.
    pub fn needs_control_channel(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::Click { .. }
                | ActionKind::Type { .. }
                | ActionKind::Paste
                | ActionKind::Scroll { .. }
        )
    }

    /// Whether the result of the action arrives out-of-band.
    pub fn is_capture(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::ReadText { .. } | ActionKind::CopyImageUrl { .. }
        )
    }
}

/// Clarification options arrive either as bare labels or as objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOption {
    Label(String),
    Full(ClarifyOption),
}

impl From<RawOption> for ClarifyOption {
    fn from(raw: RawOption) -> Self {
        match raw {
            RawOption::Label(label) => ClarifyOption::new(label),
            RawOption::Full(option) => option,
        }
    }
}

/// Loose shape of the model's JSON object before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAction {
    #[serde(alias = "kind")]
    action: Option<String>,
    url: Option<String>,
    selector: Option<String>,
    text: Option<String>,
    direction: Option<String>,
    message: Option<String>,
    #[serde(alias = "reason")]
    reasoning: Option<String>,
    question: Option<String>,
    options: Vec<RawOption>,
}

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*\})\s*```").expect("valid code fence regex")
});

/// Pull the JSON object out of a model reply.
///
/// Models occasionally wrap the object in a markdown fence or put prose
/// around it despite being asked for a bare object.
fn extract_json_object(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    if let Some(captures) = CODE_FENCE.captures(trimmed) {
        return captures.get(1).map(|m| m.as_str());
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}

fn required(
    value: Option<String>,
    kind: &'static str,
    field: &'static str,
) -> Result<String, ActionParseError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ActionParseError::MissingField { kind, field }),
    }
}

/// Shortcut names resolve through the destination table; bare hosts get
/// `https://`.
fn navigation_target(target: &str) -> String {
    let target = target.trim();
    if target.contains("://") || target.starts_with("about:") {
        return target.to_string();
    }
    match get_destination(target) {
        Some(url) => url.to_string(),
        None => format!("https://{}", target),
    }
}

/// Parse and validate a model reply into an [`Action`].
///
/// The kind must be recognized and every field that kind needs must be
/// present.
pub fn parse_action(content: &str) -> Result<Action, ActionParseError> {
    let json = extract_json_object(content)
        .ok_or_else(|| ActionParseError::InvalidJson(content.trim().to_string()))?;
    let raw: RawAction =
        serde_json::from_str(json).map_err(|e| ActionParseError::InvalidJson(e.to_string()))?;

    let kind_name = raw
        .action
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or(ActionParseError::MissingKind)?;

    let kind = match kind_name.as_str() {
        "navigate" => ActionKind::Navigate {
            url: navigation_target(&required(raw.url, "navigate", "url")?),
        },
        "click" => ActionKind::Click {
            selector: required(raw.selector, "click", "selector")?,
        },
        "type" => ActionKind::Type {
            selector: required(raw.selector, "type", "selector")?,
            text: raw.text.ok_or(ActionParseError::MissingField {
                kind: "type",
                field: "text",
            })?,
        },
        "scroll" => ActionKind::Scroll {
            direction: match raw.direction.as_deref().map(str::trim) {
                None | Some("") => ScrollDirection::Down,
                Some(d) if d.eq_ignore_ascii_case("down") => ScrollDirection::Down,
                Some(d) if d.eq_ignore_ascii_case("up") => ScrollDirection::Up,
                Some(d) => return Err(ActionParseError::InvalidDirection(d.to_string())),
            },
        },
        "read_text" => ActionKind::ReadText {
            selector: required(raw.selector, "read_text", "selector")?,
        },
        "copy_image_url" => ActionKind::CopyImageUrl {
            selector: required(raw.selector, "copy_image_url", "selector")?,
        },
        "paste" => ActionKind::Paste,
        "wait" => ActionKind::Wait,
        "finish" => ActionKind::Finish,
        "clarify" => {
            let question = required(raw.question, "clarify", "question")?;
            let options: Vec<ClarifyOption> =
                raw.options.into_iter().map(ClarifyOption::from).collect();
            if options.is_empty() {
                return Err(ActionParseError::MissingField {
                    kind: "clarify",
                    field: "options",
                });
            }
            ActionKind::Clarify { question, options }
        }
        other => return Err(ActionParseError::UnknownKind(other.to_string())),
    };

    Ok(Action {
        kind,
        message: raw.message,
        reasoning: raw.reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_navigate() {
        let action =
            parse_action(r#"{"action":"navigate","url":"https://www.github.com","message":"go"}"#)
                .unwrap();
        assert_eq!(
            action.kind,
            ActionKind::Navigate {
                url: "https://www.github.com".to_string()
            }
        );
        assert_eq!(action.describe(), "go");
    }

    #[test]
    fn test_parse_navigate_resolves_shortcuts() {
        let url = |raw: &str| match parse_action(raw).unwrap().kind {
            ActionKind::Navigate { url } => url,
            other => panic!("unexpected kind: {:?}", other),
        };
        assert_eq!(
            url(r#"{"action":"navigate","url":"YouTube"}"#),
            "https://www.youtube.com"
        );
        assert_eq!(
            url(r#"{"action":"navigate","url":"news.ycombinator.com"}"#),
            "https://news.ycombinator.com"
        );
        assert_eq!(url(r#"{"action":"navigate","url":"about:blank"}"#), "about:blank");
    }

    #[test]
    fn test_parse_click_requires_selector() {
        let err = parse_action(r#"{"action":"click"}"#).unwrap_err();
        assert_eq!(
            err,
            ActionParseError::MissingField {
                kind: "click",
                field: "selector"
            }
        );
    }

    #[test]
    fn test_parse_type() {
        let action =
            parse_action(r##"{"action":"type","selector":"#q","text":"rust books"}"##).unwrap();
        assert_eq!(
            action.kind,
            ActionKind::Type {
                selector: "#q".to_string(),
                text: "rust books".to_string()
            }
        );
        assert!(action.needs_control_channel());
    }

    #[test]
    fn test_parse_scroll_directions() {
        let down = parse_action(r#"{"action":"scroll"}"#).unwrap();
        assert_eq!(
            down.kind,
            ActionKind::Scroll {
                direction: ScrollDirection::Down
            }
        );
        let up = parse_action(r#"{"action":"scroll","direction":"UP"}"#).unwrap();
        assert_eq!(
            up.kind,
            ActionKind::Scroll {
                direction: ScrollDirection::Up
            }
        );
        assert!(matches!(
            parse_action(r#"{"action":"scroll","direction":"sideways"}"#),
            Err(ActionParseError::InvalidDirection(_))
        ));
    }

    #[test]
    fn test_parse_finish_keeps_message() {
        let action = parse_action(r#"{"action":"finish","message":"done"}"#).unwrap();
        assert_eq!(action.kind, ActionKind::Finish);
        assert_eq!(action.message.as_deref(), Some("done"));
    }

    #[test]
    fn test_parse_clarify_with_mixed_options() {
        let action = parse_action(
            r##"{"action":"clarify","question":"Which result?",
                "options":["A",{"label":"B","description":"second","selector":"#b"}]}"##,
        )
        .unwrap();
        match action.kind {
            ActionKind::Clarify { question, options } => {
                assert_eq!(question, "Which result?");
                assert_eq!(options[0], ClarifyOption::new("A"));
                assert_eq!(options[1].label, "B");
                assert_eq!(options[1].selector.as_deref(), Some("#b"));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_parse_clarify_requires_options() {
        assert_eq!(
            parse_action(r#"{"action":"clarify","question":"?","options":[]}"#).unwrap_err(),
            ActionParseError::MissingField {
                kind: "clarify",
                field: "options"
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_missing_kind() {
        assert_eq!(
            parse_action(r#"{"action":"teleport"}"#).unwrap_err(),
            ActionParseError::UnknownKind("teleport".to_string())
        );
        assert_eq!(
            parse_action(r#"{"message":"hello"}"#).unwrap_err(),
            ActionParseError::MissingKind
        );
        assert!(matches!(
            parse_action("I think we should click the button"),
            Err(ActionParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_parse_fenced_and_prefixed_json() {
        let fenced = "```json\n{\"action\":\"wait\"}\n```";
        assert_eq!(parse_action(fenced).unwrap().kind, ActionKind::Wait);

        let prefixed = "Next step: {\"kind\":\"paste\", \"reason\": \"fill form\"}";
        let action = parse_action(prefixed).unwrap();
        assert_eq!(action.kind, ActionKind::Paste);
        assert_eq!(action.describe(), "fill form");
    }

    #[test]
    fn test_serialize_uses_action_tag() {
        let action = Action::new(ActionKind::Click {
            selector: "#go".to_string(),
        })
        .with_message("press go");
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["action"], "click");
        assert_eq!(value["selector"], "#go");
        assert_eq!(value["message"], "press go");
        assert!(value.get("reasoning").is_none());
    }

    #[test]
    fn test_capture_kinds() {
        let read = Action::new(ActionKind::ReadText {
            selector: "h1".to_string(),
        });
        assert!(read.is_capture());
        assert!(!read.needs_control_channel());
        assert!(!Action::new(ActionKind::Wait).is_capture());
    }
}
