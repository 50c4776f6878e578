//! Parsers for oracle output.
//!
//! The oracle is trusted for fluency only. Every shape it can return (the
//! name-check JSON object, the intent label, the candidate array, agent-loop
//! steps, and bracketed control tags) goes through a strict parser here.
//! Shape mismatches are not errors: they produce a visible
//! `ParseOutcome::Fallback` carrying the safe default and the reason, so the
//! fallback path lives in the type system instead of a catch-all.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::types::{Intent, RecommendationCandidate};

/// Result of parsing oracle output: either the parsed value or a safe
/// default with the reason it was needed.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Fallback { value: T, reason: String },
}

impl<T> ParseOutcome<T> {
    pub fn fallback(value: T, reason: impl Into<String>) -> Self {
        ParseOutcome::Fallback {
            value,
            reason: reason.into(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ParseOutcome::Fallback { .. })
    }

    /// Unwrap either way, logging the fallback reason at the call site's
    /// discretion via [`ParseOutcome::fallback_reason`] first.
    pub fn into_value(self) -> T {
        match self {
            ParseOutcome::Parsed(v) => v,
            ParseOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            ParseOutcome::Parsed(_) => None,
            ParseOutcome::Fallback { reason, .. } => Some(reason.as_str()),
        }
    }
}

/// Remove markdown code fences the oracle likes to wrap JSON in.
fn strip_code_fences(text: &str) -> String {
    static FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?\s*").unwrap());
    FENCE.replace_all(text, "").trim().to_string()
}

/// Extract the outermost `{...}` span, if any.
fn json_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Extract the outermost `[...]` span, if any.
fn json_array_span(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// The oracle's verdict on whether a message was a name offering.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NameCheck {
    #[serde(default)]
    pub is_name: bool,
    #[serde(default)]
    pub name: String,
}

impl NameCheck {
    fn none() -> Self {
        Self {
            is_name: false,
            name: String::new(),
        }
    }
}

/// Parse the name-detection JSON object. Fallback: not a name.
pub fn parse_name_check(text: &str) -> ParseOutcome<NameCheck> {
    let cleaned = strip_code_fences(text);
    let Some(span) = json_object_span(&cleaned) else {
        return ParseOutcome::fallback(NameCheck::none(), "no JSON object in oracle response");
    };
    match serde_json::from_str::<NameCheck>(span) {
        Ok(mut check) => {
            check.name = check.name.trim().to_string();
            if check.is_name && check.name.is_empty() {
                ParseOutcome::fallback(NameCheck::none(), "is_name set but name empty")
            } else {
                ParseOutcome::Parsed(check)
            }
        }
        Err(e) => ParseOutcome::fallback(NameCheck::none(), format!("bad name-check JSON: {}", e)),
    }
}

/// Parse the intent label. Fallback: general conversation.
pub fn parse_intent(text: &str) -> ParseOutcome<Intent> {
    let lowered = text.to_lowercase();
    if lowered.contains("task_assignment") {
        ParseOutcome::Parsed(Intent::TaskAssignment)
    } else if lowered.contains("buddy_response") {
        ParseOutcome::Parsed(Intent::BuddyResponse)
    } else if lowered.contains("general_conversation") {
        ParseOutcome::Parsed(Intent::GeneralConversation)
    } else {
        ParseOutcome::fallback(
            Intent::GeneralConversation,
            format!("unrecognized intent label: {:?}", text.trim()),
        )
    }
}

/// Parse the task-proposal array. Fallback: no candidates.
pub fn parse_candidates(text: &str) -> ParseOutcome<Vec<RecommendationCandidate>> {
    let cleaned = strip_code_fences(text);
    let Some(span) = json_array_span(&cleaned) else {
        return ParseOutcome::fallback(Vec::new(), "no JSON array in oracle response");
    };
    match serde_json::from_str::<Vec<RecommendationCandidate>>(span) {
        Ok(candidates) => ParseOutcome::Parsed(candidates),
        Err(e) => ParseOutcome::fallback(Vec::new(), format!("bad candidate JSON: {}", e)),
    }
}

/// One step of the closed-dispatch proposal loop: the oracle either invokes a
/// known operation, emits the final candidate array, or answers with prose.
#[derive(Debug, Clone)]
pub enum AgentStep {
    Call { name: String, args: Value },
    Final(Vec<RecommendationCandidate>),
    Text(String),
}

pub fn parse_agent_step(text: &str) -> AgentStep {
    let cleaned = strip_code_fences(text);

    if let Some(span) = json_object_span(&cleaned) {
        if let Ok(obj) = serde_json::from_str::<Value>(span) {
            if let Some(name) = obj.get("call").and_then(Value::as_str) {
                let args = obj.get("args").cloned().unwrap_or(Value::Null);
                return AgentStep::Call {
                    name: name.to_string(),
                    args,
                };
            }
        }
    }

    if let Some(span) = json_array_span(&cleaned) {
        if let Ok(candidates) = serde_json::from_str::<Vec<RecommendationCandidate>>(span) {
            return AgentStep::Final(candidates);
        }
    }

    AgentStep::Text(cleaned)
}

/// How long to postpone, as stated by the user (via the oracle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostponeSpec {
    pub days: Option<i64>,
    pub date: Option<NaiveDate>,
}

impl PostponeSpec {
    fn unspecified() -> Self {
        Self {
            days: None,
            date: None,
        }
    }
}

/// A typed scenario command extracted from oracle prose.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioCommand {
    Busy,
    Postpone(PostponeSpec),
    Confirm,
}

/// The result of scrubbing oracle prose: typed commands, button suggestions,
/// and text guaranteed free of control tags.
#[derive(Debug, Clone)]
pub struct ScenarioParse {
    pub commands: Vec<ScenarioCommand>,
    pub suggestions: Vec<String>,
    pub clean_text: String,
}

// Matches both well-formed and malformed control tags so the display text is
// always scrubbed; typed parsing happens per capture.
static CONTROL_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\s*(scenario|suggest)\s*:([^\]]*)\]").unwrap());

static KEY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z_]+)\s*=\s*([0-9-]+)").unwrap());

/// Extract scenario commands and button suggestions, and scrub every control
/// tag (known or not) from the text. Unparseable tags are "no command",
/// never an error.
pub fn extract_control_tags(text: &str) -> ScenarioParse {
    let mut commands = Vec::new();
    let mut suggestions = Vec::new();

    for caps in CONTROL_TAG.captures_iter(text) {
        let kind = caps[1].to_lowercase();
        let body = caps[2].trim();
        if kind == "suggest" {
            if !body.is_empty() {
                suggestions.push(body.to_lowercase());
            }
            continue;
        }

        let mut parts = body.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or("").to_uppercase();
        let attrs = parts.next().unwrap_or("");
        match name.as_str() {
            "BUSY" => commands.push(ScenarioCommand::Busy),
            "CONFIRM" => commands.push(ScenarioCommand::Confirm),
            "POSTPONE" => commands.push(ScenarioCommand::Postpone(parse_postpone_attrs(attrs))),
            _ => {
                // Unknown tag: stripped from the text, no command.
            }
        }
    }

    let stripped = CONTROL_TAG.replace_all(text, "");
    ScenarioParse {
        commands,
        suggestions,
        clean_text: tidy_whitespace(&stripped),
    }
}

fn parse_postpone_attrs(attrs: &str) -> PostponeSpec {
    let mut spec = PostponeSpec::unspecified();
    for caps in KEY_VALUE.captures_iter(attrs) {
        match &caps[1] {
            "days" => spec.days = caps[2].parse::<i64>().ok().filter(|d| *d > 0),
            "date" => spec.date = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").ok(),
            _ => {}
        }
    }
    spec
}

/// Collapse the holes tag removal leaves behind: per-line space runs and
/// stacked blank lines.
fn tidy_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut last_blank = false;
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !last_blank && !lines.is_empty() {
                lines.push(String::new());
            }
            last_blank = true;
        } else {
            lines.push(collapsed);
            last_blank = false;
        }
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
