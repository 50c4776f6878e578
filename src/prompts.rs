//! Compiled-in prompt templates.
//!
//! Every prompt states its output contract explicitly; the matching parser
//! in `oracle::parse` enforces it and falls back when the oracle strays.

use crate::types::ChatTurn;

/// Render recent transcript turns as context lines.
pub fn transcript_context(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.as_str(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn name_check(recent_context: &str, user_message: &str) -> String {
    format!(
        "Analyze if the user's message is providing a name in response to being asked \
         to give the assistant a new name.\n\n\
         Recent conversation:\n{recent_context}\n\n\
         User's latest message: \"{user_message}\"\n\n\
         Short greetings such as \"hi\" or \"hello\" are never names.\n\n\
         If the user is providing a name (a single word, multiple words, or a creative \
         name), respond with:\n\
         {{\"is_name\": true, \"name\": \"<extracted_name>\"}}\n\n\
         If the user is asking a question or having a general conversation, respond with:\n\
         {{\"is_name\": false, \"name\": \"\"}}\n\n\
         Respond ONLY with the JSON object, nothing else."
    )
}

pub fn intent_classification(user_message: &str) -> String {
    format!(
        "Classify the intent of this message from a learner:\n\n\
         \"{user_message}\"\n\n\
         Respond with exactly one of these labels and nothing else:\n\
         - task_assignment: the user wants task recommendations for their goals\n\
         - buddy_response: the user is replying to a check-in (busy, wants a pause, \
           confirms, asks for the next task)\n\
         - general_conversation: anything else (career or learning questions, chat)"
    )
}

/// System+task instructions for the closed-dispatch proposal loop. The oracle
/// may invoke the listed operations one at a time, then must emit the final
/// JSON array of proposals.
pub fn task_proposal(assistant_name: &str, user_id: &str, scratch: &str) -> String {
    format!(
        "You are {assistant_name}, a learning coach picking the next tasks for user \
         {user_id}.\n\n\
         You may call these operations, one per response, as \
         {{\"call\": \"<name>\", \"args\": {{...}}}}:\n\
         - get_user_goals {{\"user_id\"}}: the user's stated learning goals\n\
         - get_assigned_projects {{\"user_id\"}}: projects assigned to the user\n\
         - get_tasks_for_project {{\"project_id\"}}: tasks within one project\n\
         - get_chat_history {{\"user_id\", \"limit\"}}: recent conversation\n\n\
         When you have enough information, respond with ONLY a JSON array of up to 3 \
         task proposals, each {{\"id\": \"<task id>\", \"title\": \"<task title>\"}}. \
         Use only ids returned by the operations above.\n\n\
         Results so far:\n{scratch}"
    )
}

pub fn buddy_response(assistant_name: &str, user_message: &str, active_task_count: usize) -> String {
    format!(
        "You are {assistant_name}, checking in with a learner who has \
         {active_task_count} active task(s). They replied:\n\n\"{user_message}\"\n\n\
         Write a short, warm reply. Additionally, append machine-readable markers for \
         any of these situations (the markers are stripped before display):\n\
         - the user says they are busy right now: [SCENARIO:BUSY]\n\
         - the user asks to pause or be contacted later: [SCENARIO:POSTPONE days=<n>] \
           or [SCENARIO:POSTPONE date=<YYYY-MM-DD>] if they named a day count or date; \
           bare [SCENARIO:POSTPONE] otherwise\n\
         - the user confirms, is ready, or asks for the next task: [SCENARIO:CONFIRM]"
    )
}

pub fn general_conversation(
    assistant_name: &str,
    recent_context: &str,
    user_message: &str,
) -> String {
    format!(
        "You are {assistant_name}, a friendly learning coach helping with upskilling, \
         job seeking, and goal achievement. Keep replies concise and encouraging.\n\n\
         Recent conversation:\n{recent_context}\n\n\
         User: \"{user_message}\"\n\n\
         If (and only if) one of these resources is clearly relevant, append its marker: \
         [SUGGEST:sfs] software finishing school, [SUGGEST:ps] placement support, \
         [SUGGEST:js] job listings."
    )
}

pub fn relevance_check(project_description: &str, task_title: &str) -> String {
    format!(
        "Is the task title \"{task_title}\" relevant to this project description: \
         \"{project_description}\"?\n\nAnswer only \"yes\" or \"no\"."
    )
}

// Fixed copy used by the orchestrator.

pub const WELCOME: &str = "Hello! I am your new learning buddy. Looks like we meet for \
the first time. Please give me a new name to get going.";

pub const NAME_REPROMPT: &str = "I'd love a name first! What would you like to call me?";

pub const PLAN_NOT_READY: &str = "Looks like your study plan has not been prepared yet. \
Please check in with your mentor soon.";

pub const GENERIC_APOLOGY: &str = "Sorry, something went wrong on my side. Please try \
again in a moment.";

pub const ACKNOWLEDGMENT: &str = "Got it!";

pub const NUDGE_NO_FRESH_TASK: &str = "I looked for a fresh task matching your preferences \
but came up empty for now. I'll keep an eye out and check back soon!";

pub fn personalized_greeting(name: &str) -> String {
    format!(
        "Hola! {name} at your service.\n\nI can help you with\n> Upskilling\n> Getting a job\n> Achieving your Goals"
    )
}

pub fn nudge_no_preferences(assistant_name: &str) -> String {
    format!(
        "Hi, {assistant_name} here! I don't know your learning preferences yet. \
         Tell me what you'd like to get better at and I'll line up tasks for you."
    )
}

pub fn nudge_new_task(task_title: &str, project_name: &str) -> String {
    format!(
        "I picked your next task: *{task_title}*\nProject: {project_name}\n\
         Ping me when you're done, or say \"busy\" and I'll check back later."
    )
}

pub fn nudge_active_tasks(titles: &[String]) -> String {
    let list = titles
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}. {}", i + 1, t))
        .collect::<Vec<_>>()
        .join("\n");
    let plural = if titles.len() > 1 { "s" } else { "" };
    format!(
        "You have {} task{} to complete:\n\n{}",
        titles.len(),
        plural,
        list
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpeakerRole;

    #[test]
    fn active_task_nudge_pluralizes() {
        let one = nudge_active_tasks(&["Intro".to_string()]);
        assert!(one.starts_with("You have 1 task to complete"));
        let two = nudge_active_tasks(&["Intro".to_string(), "Loops".to_string()]);
        assert!(two.starts_with("You have 2 tasks to complete"));
        assert!(two.contains("2. Loops"));
    }

    #[test]
    fn transcript_context_orders_lines() {
        let turns = vec![
            ChatTurn::new("u", SpeakerRole::Assistant, "welcome"),
            ChatTurn::new("u", SpeakerRole::User, "hi"),
        ];
        assert_eq!(transcript_context(&turns), "assistant: welcome\nuser: hi");
    }
}
