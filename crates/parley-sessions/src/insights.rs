use chrono::DateTime;
use parley_types::Role;
use serde::Serialize;

use crate::messages::Message;

/// Aggregate figures over one session's transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationInsights {
    pub total_messages: u64,
    pub user_messages: u64,
    pub assistant_messages: u64,
    /// Mean length of user turns in characters; `0.0` without user turns.
    pub average_user_message_length: f64,
    pub average_assistant_message_length: f64,
    /// Seconds between the first and last stored turn. `None` for an empty
    /// transcript or unparseable timestamps.
    pub conversation_duration: Option<f64>,
}

/// Computes insights over `messages`, which must be in replay order.
pub fn conversation_insights(messages: &[Message]) -> ConversationInsights {
    let mut insights = ConversationInsights {
        total_messages: messages.len() as u64,
        ..Default::default()
    };

    let (mut user_chars, mut assistant_chars) = (0usize, 0usize);
    for m in messages {
        match m.role {
            Role::User => {
                insights.user_messages += 1;
                user_chars += m.content.chars().count();
            }
            Role::Assistant => {
                insights.assistant_messages += 1;
                assistant_chars += m.content.chars().count();
            }
        }
    }
    insights.average_user_message_length = mean(user_chars, insights.user_messages);
    insights.average_assistant_message_length = mean(assistant_chars, insights.assistant_messages);

    if let (Some(first), Some(last)) = (messages.first(), messages.last()) {
        match (
            DateTime::parse_from_rfc3339(&first.created_at),
            DateTime::parse_from_rfc3339(&last.created_at),
        ) {
            (Ok(start), Ok(end)) => {
                let micros = (end - start).num_microseconds().unwrap_or(0);
                insights.conversation_duration = Some(micros as f64 / 1_000_000.0);
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "unparseable message timestamp");
            }
        }
    }

    insights
}

fn mean(total: usize, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}
