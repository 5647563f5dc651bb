//! Prompt text and model-reply parsing for the agent loop.
//!
//! The model is asked for exactly one `Thought:`/`Action:` pair per step; the
//! reply parser is forgiving — a missing `Action:` token degrades to an empty
//! action, which the loop treats as a no-op step rather than a failure.

use crate::marker::ElementMarker;

/// System instruction fixed for the whole task.
pub const SYSTEM_PROMPT: &str = r#"Imagine you are operating a web browser to carry out a task for a user. In each iteration you receive an Observation: a screenshot of the current page on which every interactive element is outlined in a dashed box with a numeric label, together with a text list of those elements in the form "[index]: tag "content"". Carefully analyze the screenshot first, then use the text list to confirm what each numbered element is.

You can take exactly ONE action per iteration, chosen from:
1. Click a web element: Click [index]
2. Type into a text field (this does not clear what is already there): Type [index]; the text to type
3. Scroll the window: Scroll [WINDOW]; down
4. Conclude the task when you can answer it: ANSWER; your final answer

Your reply must strictly follow this format:
Thought: briefly explain what you see and why you choose this action
Action: the single action for this iteration

Guidelines:
* Only interact with numbered elements that exist in the current observation; numbering changes every iteration.
* A <textarea> or <input> may be a textbox even when it does not look like one; trust the screenshot over the tag name.
* If the page has not given you what you need, prefer scrolling or refining a search over answering early.
* When you answer, put everything the user needs into the ANSWER action itself."#;

/// Render the marker list the way the model sees it:
/// `[0]: a "Home"; [1]: input "Search"; …`
pub fn render_markers(markers: &[ElementMarker]) -> String {
    markers
        .iter()
        .map(|m| format!("[{}]: {} \"{}\"", m.index, m.label, m.content))
        .collect::<Vec<_>>()
        .join("; ")
}

/// First user message of a task: the task text, the starting URL, and the
/// current observation.
pub fn initial_observation(task: &str, current_url: &str, markers: &[ElementMarker]) -> String {
    format!(
        "Now given a task: {task}  Please interact with {current_url} and get the answer. {}",
        observation_body(markers)
    )
}

/// Follow-up user message: observation only, history carries the task.
pub fn resume_observation(markers: &[ElementMarker]) -> String {
    observation_body(markers)
}

fn observation_body(markers: &[ElementMarker]) -> String {
    format!(
        "Observation: please analyze the attached screenshot and give the Thought and Action. \
         I've provided the tag name of each element and the text it contains (if text exists). \
         Note that <textarea> or <input> may be textbox, but not exactly. \
         Please focus more on the screenshot and then refer to the textual information.\n {}",
        render_markers(markers)
    )
}

/// Split a model reply into `(thought, action)`.
///
/// Everything before the literal `Action:` token is the thought (with a
/// leading `Thought:` label stripped); everything after is the action,
/// trimmed. No `Action:` token means an empty action.
pub fn split_reply(reply: &str) -> (String, String) {
    match reply.split_once("Action:") {
        Some((thought, action)) => (strip_thought_label(thought), action.trim().to_string()),
        None => (strip_thought_label(reply), String::new()),
    }
}

fn strip_thought_label(text: &str) -> String {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("Thought:")
        .map(|rest| rest.trim_start())
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(index: usize, label: &str, content: &str) -> ElementMarker {
        ElementMarker {
            selector: format!("{label}:nth-child({})", index + 1),
            index,
            content: content.into(),
            label: label.into(),
        }
    }

    #[test]
    fn markers_render_as_indexed_list() {
        let markers = vec![marker(0, "a", "Home"), marker(1, "input", "Search")];
        assert_eq!(
            render_markers(&markers),
            "[0]: a \"Home\"; [1]: input \"Search\""
        );
    }

    #[test]
    fn no_markers_render_as_empty_text() {
        assert_eq!(render_markers(&[]), "");
    }

    #[test]
    fn reply_splits_into_thought_and_action() {
        let (thought, action) =
            split_reply("Thought: The search box is [4].\nAction: Type [4]; rust tutorials");
        assert_eq!(thought, "The search box is [4].");
        assert_eq!(action, "Type [4]; rust tutorials");
    }

    #[test]
    fn missing_action_token_yields_empty_action() {
        let (thought, action) = split_reply("Thought: I am not sure yet.");
        assert_eq!(thought, "I am not sure yet.");
        assert_eq!(action, "");
    }

    #[test]
    fn unlabeled_reply_is_kept_as_thought() {
        let (thought, action) = split_reply("no structure at all");
        assert_eq!(thought, "no structure at all");
        assert_eq!(action, "");
    }

    #[test]
    fn initial_observation_carries_task_and_url() {
        let text = initial_observation("find the birthday", "https://example.com/", &[]);
        assert!(text.starts_with("Now given a task: find the birthday"));
        assert!(text.contains("https://example.com/"));
        assert!(text.contains("Observation:"));
    }
}
