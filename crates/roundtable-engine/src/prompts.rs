//! Prompt templates for speaker election, group-chat responses, and history
//! compression.

use roundtable_core::messages::Message;

/// How many recent messages the election prompt shows.
const HISTORY_WINDOW: usize = 10;
/// Per-message clip length in the rendered history.
const HISTORY_CLIP_CHARS: usize = 500;

pub fn should_speak_prompt(
    display_name: &str,
    other_names: &[String],
    history: &str,
    user_message: &str,
    prior_responses: &[(String, String)],
) -> String {
    let prior_section = if prior_responses.is_empty() {
        String::new()
    } else {
        let rendered = prior_responses
            .iter()
            .map(|(name, text)| format!("[{name}]: {text}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "\nRESPONSES FROM OTHER MODELS IN THIS TURN:\n{rendered}\n\n\
             If they have already covered the topic well, consider staying silent.\n"
        )
    };

    format!(
        "You are {display_name} in a collaborative group coding chat with other AI \
assistants ({others}).\n\n\
CURRENT CONVERSATION:\n{history}\n\n\
USER'S LATEST MESSAGE:\n{user_message}\n{prior_section}\n\
Should you respond? Consider whether you have a genuinely different perspective, \
spot an error or risk in earlier responses, can add real technical value, were \
directly addressed, or the question plays to your strengths. If a previous answer \
is already complete and you would only repeat it, stay silent.\n\n\
Respond with ONLY valid JSON (no markdown, no explanation):\n\
{{\"should_speak\": true, \"confidence\": 0.7, \"reason\": \"one short sentence\"}}\n\n\
Confidence scale: 0.9-1.0 critical information others missed; 0.7-0.8 a valuable \
different perspective; 0.5-0.6 possibly some value; 0.3-0.4 minimal value; \
0.0-0.2 pure repetition.",
        others = other_names.join(", "),
        history = if history.is_empty() {
            "(no previous messages)"
        } else {
            history
        },
    )
}

pub fn system_prompt(
    display_name: &str,
    other_names: &[String],
    additional_context: Option<&str>,
) -> String {
    let mut prompt = format!(
        "You are {display_name}, an AI assistant in a collaborative coding group chat.\n\n\
The other assistants here are: {others}. Each of you contributes your own \
perspective; responses should complement rather than repeat one another. \
Acknowledge and build on good points from the others. Be direct and technical, \
use markdown code blocks with language tags, and keep explanations practical.",
        others = other_names.join(", "),
    );
    if let Some(extra) = additional_context {
        prompt.push_str("\n\nADDITIONAL CONTEXT:\n");
        prompt.push_str(extra);
    }
    prompt
}

pub fn compression_prompt(conversation: &str) -> String {
    format!(
        "Summarize this conversation history for context in a coding group chat.\n\
Keep key technical decisions, important code or file references, unresolved \
questions, and error messages. Discard pleasantries, redundant explanations, \
and verbose code that a filename can stand in for.\n\n\
CONVERSATION TO SUMMARIZE:\n{conversation}\n\n\
Provide a concise technical summary (aim for 500-1000 tokens):"
    )
}

/// Render recent history for prompt embedding: most recent messages, each
/// clipped, tagged with role and author.
pub fn render_history(messages: &[Message]) -> String {
    let start = messages.len().saturating_sub(HISTORY_WINDOW);
    messages[start..]
        .iter()
        .map(render_line)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render every message in full, for the summarizer.
pub fn render_full(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|msg| {
            let author = msg
                .author
                .as_ref()
                .map(|a| format!(" [{a}]"))
                .unwrap_or_default();
            format!("{}{author}: {}", msg.role.as_str().to_uppercase(), msg.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_line(msg: &Message) -> String {
    let author = msg
        .author
        .as_ref()
        .map(|a| format!(" [{a}]"))
        .unwrap_or_default();
    let mut content = msg.content.clone();
    if content.chars().count() > HISTORY_CLIP_CHARS {
        content = content.chars().take(HISTORY_CLIP_CHARS).collect::<String>() + "...";
    }
    format!("{}{author}: {content}", msg.role.as_str().to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_core::ids::{ParticipantId, SessionId};

    #[test]
    fn should_speak_prompt_contains_parts() {
        let prompt = should_speak_prompt(
            "Claude",
            &["GPT".into(), "Gemini".into()],
            "USER: hi",
            "what is a lifetime?",
            &[],
        );
        assert!(prompt.contains("Claude"));
        assert!(prompt.contains("GPT, Gemini"));
        assert!(prompt.contains("what is a lifetime?"));
        assert!(prompt.contains("should_speak"));
        assert!(!prompt.contains("RESPONSES FROM OTHER MODELS"));
    }

    #[test]
    fn should_speak_prompt_includes_prior_responses() {
        let prompt = should_speak_prompt(
            "Gemini",
            &["Claude".into()],
            "",
            "q",
            &[("Claude".into(), "already answered".into())],
        );
        assert!(prompt.contains("RESPONSES FROM OTHER MODELS"));
        assert!(prompt.contains("already answered"));
        assert!(prompt.contains("(no previous messages)"));
    }

    #[test]
    fn system_prompt_with_additional_context() {
        let prompt = system_prompt("GPT", &["Claude".into()], Some("others responded"));
        assert!(prompt.contains("GPT"));
        assert!(prompt.contains("ADDITIONAL CONTEXT"));
        assert!(prompt.contains("others responded"));

        let bare = system_prompt("GPT", &["Claude".into()], None);
        assert!(!bare.contains("ADDITIONAL CONTEXT"));
    }

    #[test]
    fn history_window_caps_at_ten() {
        let sess = SessionId::new();
        let messages: Vec<Message> = (0..15)
            .map(|i| Message::user(sess.clone(), format!("msg {i}")))
            .collect();
        let rendered = render_history(&messages);
        assert!(!rendered.contains("msg 4"));
        assert!(rendered.contains("msg 5"));
        assert!(rendered.contains("msg 14"));
    }

    #[test]
    fn history_clips_long_messages() {
        let sess = SessionId::new();
        let long = "x".repeat(900);
        let messages = vec![Message::user(sess, long)];
        let rendered = render_history(&messages);
        assert!(rendered.ends_with("..."));
        assert!(rendered.len() < 600);
    }

    #[test]
    fn history_tags_author() {
        let sess = SessionId::new();
        let messages = vec![Message::assistant(
            sess,
            ParticipantId::new("claude"),
            "my take",
        )];
        let rendered = render_history(&messages);
        assert!(rendered.starts_with("ASSISTANT [claude]:"));
    }
}
