use crate::ChatTurn;
use parley_types::Role;

/// Instructions given to the conversational model on every turn. Replies are
/// spoken aloud, so the prompt steers away from anything that reads badly as
/// speech.
pub const SYSTEM_PROMPT: &str = "\
You are a helpful and friendly voice assistant. You are good at natural \
conversation and at giving useful information.

Speak naturally and conversationally. Keep replies short: one to three \
sentences unless the user asks for more. Ask a follow-up question when it \
helps the conversation, and ask for clarification when a request is unclear. \
Avoid jargon unless the user asks for it, and use what was said earlier in \
the conversation.

Your reply will be read aloud. Do not use markdown, lists, emoji or special \
symbols. Spell out numbers and abbreviations that would be unclear when \
spoken. Use contractions and plain sentence structure.";

/// Instructions for the conversation summary.
pub const SUMMARY_PROMPT: &str =
    "Summarize the following conversation concisely, highlighting key topics and outcomes.";

/// Builds the prompt for the next reply: the system prompt followed by the
/// stored history in its original order.
pub fn conversation_turns<'a, I>(history: I) -> Vec<ChatTurn>
where
    I: IntoIterator<Item = (Role, &'a str)>,
{
    let mut turns = vec![ChatTurn::system(SYSTEM_PROMPT)];
    turns.extend(history.into_iter().map(|(role, content)| ChatTurn {
        role: role.into(),
        content: content.to_string(),
    }));
    turns
}

/// Builds the summary prompt: one user turn holding the transcript as
/// `role: content` lines.
pub fn summary_turns<'a, I>(history: I) -> Vec<ChatTurn>
where
    I: IntoIterator<Item = (Role, &'a str)>,
{
    let transcript = history
        .into_iter()
        .map(|(role, content)| format!("{role}: {content}"))
        .collect::<Vec<_>>()
        .join("\n");
    vec![ChatTurn::system(SUMMARY_PROMPT), ChatTurn::user(transcript)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatRole;

    #[test]
    fn system_prompt_leads_history() {
        let turns = conversation_turns([(Role::User, "hi"), (Role::Assistant, "hello"), (Role::User, "how are you")]);
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].role, ChatRole::System);
        assert_eq!(turns[0].content, SYSTEM_PROMPT);
        assert_eq!(turns[3], ChatTurn::user("how are you"));
    }

    #[test]
    fn summary_flattens_transcript() {
        let turns = summary_turns([(Role::User, "book a table"), (Role::Assistant, "for how many?")]);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, "user: book a table\nassistant: for how many?");
    }
}
