//! Static quick-reply lookup.
//!
//! Button taps arrive as plain messages carrying either the callback code or
//! the button text (sometimes truncated by the messaging client). Recognized
//! entries are answered from this table without consulting the oracle.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::types::QuickReplyButton;

struct Resource {
    name: &'static str,
    url: &'static str,
}

const SFS: Resource = Resource {
    name: "Software Finishing School",
    url: "https://learn.example.com/courses/software-finishing-school",
};
const PS: Resource = Resource {
    name: "#1 + 1 on 1 Placement Support",
    url: "https://learn.example.com/courses/placement-school",
};
const JS: Resource = Resource {
    name: "Job Support",
    url: "https://learn.example.com/jobs",
};

// Maps callback codes, full button texts, and the truncated forms the
// messaging client produces.
static LOOKUP: Lazy<HashMap<&'static str, &'static Resource>> = Lazy::new(|| {
    HashMap::from([
        ("sfs", &SFS),
        ("software finishing school", &SFS),
        ("software finishing s", &SFS),
        ("ps", &PS),
        ("#1 + 1 on 1 placement support", &PS),
        ("#1 + 1 on 1 placemen", &PS),
        ("js", &JS),
        ("job support", &JS),
    ])
});

/// Canned response for a recognized quick-reply message, if any.
pub fn resolve(message: &str) -> Option<String> {
    let key = message.to_lowercase();
    let resource = LOOKUP.get(key.trim())?;
    Some(format!(
        "Great! The following resource should help you.\n\n{}: {}",
        resource.name, resource.url
    ))
}

/// Button for a `[SUGGEST:code]` hint from the oracle, if the code is known.
pub fn button_for_code(code: &str) -> Option<QuickReplyButton> {
    let resource = LOOKUP.get(code.to_lowercase().trim())?;
    Some(QuickReplyButton::new(resource.name, code))
}

/// The onboarding buttons offered right after the assistant is named.
pub fn onboarding_buttons() -> Vec<QuickReplyButton> {
    vec![
        QuickReplyButton::new("Upskilling", "upskilling"),
        QuickReplyButton::new("Getting a job", "getting_job"),
        QuickReplyButton::new("Achieving your Goals", "achieving_goals"),
    ]
}
